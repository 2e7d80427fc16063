use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::frame::frame_header::{FrameType, StreamId, StreamType};
use crate::frame::protocol_version::ResumePosition;

/// What is needed to recreate a stream after a cold resumption
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamResumeInfo {
    pub stream_id: StreamId,
    pub stream_type: StreamType,
    pub initial_request_n: u32,
}

/// Ledger for resumption, shared between a session's successive connections.
///
/// Positions are byte offsets into the sequence of resumable frames (see
///  [FrameType::is_resumable]) sent or received on a session. Non-resumable frame types are
///  ignored by the tracking methods.
///
/// Implementations must allow concurrent calls: the ledger outlives a connection's driver task and
///  may be consulted by the connection set.
#[cfg_attr(test, automock)]
pub trait ResumeManager: Send + Sync {
    /// A frame with `len` wire bytes was received
    fn track_received_frame(&self, len: usize, frame_type: FrameType, stream_id: StreamId);

    /// A serialized frame was written to the transport
    fn track_sent_frame(&self, frame: &Bytes, frame_type: FrameType, stream_id: StreamId);

    /// Can the frames sent from `position` onwards be replayed?
    fn is_position_available(&self, position: ResumePosition) -> bool;

    /// The retained frames from `position` onwards, in send order
    fn frames_to_resend(&self, position: ResumePosition) -> Vec<Bytes>;

    /// The peer acknowledged receipt up to `position`: frames before it need not be retained
    fn reset_up_to_position(&self, position: ResumePosition);

    /// how far this side has received resumable frames
    fn implied_position(&self) -> ResumePosition;

    fn first_sent_position(&self) -> ResumePosition;
    fn last_sent_position(&self) -> ResumePosition;

    fn on_stream_open(&self, stream_id: StreamId, stream_type: StreamType, initial_request_n: u32);
    fn on_stream_closed(&self, stream_id: StreamId);

    /// streams that were open when the session was interrupted
    fn stream_resume_infos(&self) -> Vec<StreamResumeInfo>;
    fn largest_used_stream_id(&self) -> StreamId;
}

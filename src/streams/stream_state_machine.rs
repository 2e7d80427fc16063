use std::sync::Arc;

use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::frame::error_code::ErrorCode;
use crate::frame::frame_header::{StreamId, StreamType};
use crate::frame::frames::Frame;
use crate::frame::payload::Payload;

/// The terminal signal a stream receives when it is ended by the connection rather than by its
///  own frames
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StreamCompletionSignal {
    Complete,
    Cancel,
    Error,
    ApplicationError,
    InvalidSetup,
    UnsupportedSetup,
    RejectedSetup,
    ConnectionError,
    ConnectionEnd,
    SocketClosed,
}

impl StreamCompletionSignal {
    pub fn for_error_code(code: ErrorCode) -> StreamCompletionSignal {
        match code {
            ErrorCode::InvalidSetup => StreamCompletionSignal::InvalidSetup,
            ErrorCode::UnsupportedSetup => StreamCompletionSignal::UnsupportedSetup,
            ErrorCode::RejectedSetup => StreamCompletionSignal::RejectedSetup,
            ErrorCode::ConnectionError | ErrorCode::RejectedResume => StreamCompletionSignal::ConnectionError,
            ErrorCode::ConnectionClose => StreamCompletionSignal::ConnectionEnd,
            ErrorCode::ApplicationError => StreamCompletionSignal::ApplicationError,
            ErrorCode::Rejected | ErrorCode::Canceled | ErrorCode::Invalid => StreamCompletionSignal::Error,
        }
    }
}


/// The first frame of a peer initiated stream, reassembled if it arrived in fragments
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamRequest {
    pub stream_id: StreamId,
    pub stream_type: StreamType,
    pub initial_request_n: u32,
    pub payload: Payload,
    /// REQUEST_CHANNEL can complete the requester's side in its first frame
    pub complete: bool,
}


/// Per stream logic, e.g. a reactive publisher / subscriber pair. The connection routes frames for
///  the stream's id to it and ends it when the connection goes away.
///
/// Implementations send their frames through a [StreamsWriter] and report their own termination
///  through [StreamsWriter::on_stream_closed]; they must not call back into the connection in any
///  other way.
#[cfg_attr(test, automock)]
pub trait StreamStateMachine: Send + Sync {
    fn handle_frame(&self, frame: Frame);

    /// Terminal signal from the connection. No frames are routed to the stream afterwards.
    fn end_stream(&self, signal: StreamCompletionSignal);
}


/// Outbound path for stream handles
#[cfg_attr(test, automock)]
pub trait StreamsWriter: Send + Sync {
    fn write_frame(&self, frame: Frame);

    /// Writes the opening frame of a locally initiated stream that was previously registered
    fn write_new_stream(&self, stream_id: StreamId, stream_type: StreamType, initial_request_n: u32, payload: Payload);

    fn on_stream_closed(&self, stream_id: StreamId);
}


/// Application side factory for peer initiated interactions
#[cfg_attr(test, automock)]
pub trait RequestResponder: Send + Sync {
    fn create_stream(&self, request: StreamRequest, writer: Arc<dyn StreamsWriter>) -> Arc<dyn StreamStateMachine>;

    fn handle_fire_and_forget(&self, stream_id: StreamId, payload: Payload);

    fn handle_metadata_push(&self, metadata: Bytes);
}

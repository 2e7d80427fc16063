use rustc_hash::FxHashMap;
use tracing::trace;

use crate::frame::frame_header::{get_stream_type, is_new_stream_frame, FrameFlags, StreamId, StreamType};
use crate::frame::frames::Frame;
use crate::streams::stream_state_machine::StreamRequest;

#[derive(Debug, Eq, PartialEq)]
pub enum AccumulatorResult {
    /// The request is complete and a stream can be created for it
    Complete(StreamRequest),
    /// More fragments are expected
    Incomplete,
    /// Protocol violation: the frame is not a valid fragment in the current state
    Rejected(String),
}

/// Reassembles the opening frame of peer initiated streams that arrive as a FOLLOWS chain: a
///  REQUEST_* frame with FOLLOWS, then PAYLOAD frames with FOLLOWS, and a final PAYLOAD frame
///  without it.
///
/// Entries exist only until the stream is created, so a stream id is never in the accumulator and
///  the stream registry at the same time.
pub struct FragmentAccumulator {
    pending: FxHashMap<StreamId, StreamRequest>,
    max_payload_len: usize,
}

impl FragmentAccumulator {
    pub fn new(max_payload_len: usize) -> FragmentAccumulator {
        FragmentAccumulator {
            pending: Default::default(),
            max_payload_len,
        }
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.pending.contains_key(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// drops all partially received requests
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            trace!("dropping {} partially received requests", self.pending.len());
        }
        self.pending.clear();
    }

    /// drops a partially received request, e.g. because the peer canceled it
    pub fn discard(&mut self, stream_id: StreamId) -> bool {
        self.pending.remove(&stream_id).is_some()
    }

    pub fn accept(&mut self, stream_id: StreamId, frame: Frame) -> AccumulatorResult {
        let follows = frame.flags().contains(FrameFlags::FOLLOWS);
        let complete = frame.flags().contains(FrameFlags::COMPLETE);

        if is_new_stream_frame(frame.frame_type()) {
            if self.pending.contains_key(&stream_id) {
                return AccumulatorResult::Rejected(format!("duplicate request frame for stream {}", stream_id));
            }

            let stream_type = get_stream_type(frame.frame_type());
            let (initial_request_n, payload) = match frame {
                Frame::RequestResponse(f) => (1, f.payload),
                Frame::RequestFnf(f) => (0, f.payload),
                Frame::RequestStream(f) => (f.request_n, f.payload),
                Frame::RequestChannel(f) => (f.request_n, f.payload),
                _ => unreachable!("checked by is_new_stream_frame"),
            };
            let request = StreamRequest {
                stream_id,
                stream_type,
                initial_request_n,
                payload,
                complete: complete && stream_type == StreamType::Channel,
            };

            if request.payload.len() > self.max_payload_len {
                return AccumulatorResult::Rejected(format!("request for stream {} exceeds the maximum payload size", stream_id));
            }

            return if follows {
                trace!("stream {}: first fragment of {:?}", stream_id, stream_type);
                self.pending.insert(stream_id, request);
                AccumulatorResult::Incomplete
            }
            else {
                AccumulatorResult::Complete(request)
            };
        }

        let fragment = match frame {
            Frame::Payload(f) => f.payload,
            other => return AccumulatorResult::Rejected(format!("{:?} is not a fragment", other.frame_type())),
        };

        let request = match self.pending.get_mut(&stream_id) {
            Some(r) => r,
            None => return AccumulatorResult::Rejected(format!("no fragmented request for stream {}", stream_id)),
        };

        request.payload.append(fragment);
        request.complete |= complete && request.stream_type == StreamType::Channel;

        if request.payload.len() > self.max_payload_len {
            self.pending.remove(&stream_id);
            return AccumulatorResult::Rejected(format!("request for stream {} exceeds the maximum payload size", stream_id));
        }

        if follows {
            return AccumulatorResult::Incomplete;
        }

        match self.pending.remove(&stream_id) {
            Some(request) => AccumulatorResult::Complete(request),
            None => AccumulatorResult::Incomplete,
        }
    }
}

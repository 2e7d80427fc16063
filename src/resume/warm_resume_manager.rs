use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::frame::frame_header::{FrameType, StreamId, StreamType};
use crate::frame::protocol_version::ResumePosition;
use crate::resume::resume_manager::{ResumeManager, StreamResumeInfo};

struct RetainedFrame {
    position: ResumePosition,
    bytes: Bytes,
}

#[derive(Default)]
struct WarmState {
    frames: VecDeque<RetainedFrame>,
    retained_bytes: usize,
    first_sent_position: ResumePosition,
    last_sent_position: ResumePosition,
    implied_position: ResumePosition,
    streams: FxHashMap<StreamId, StreamResumeInfo>,
    largest_used_stream_id: StreamId,
}

/// In-memory [ResumeManager] that retains sent frames up to a configured number of bytes,
///  evicting the oldest frames first.
pub struct WarmResumeManager {
    capacity: usize,
    state: Mutex<WarmState>,
}

impl WarmResumeManager {
    pub fn new(capacity: usize) -> WarmResumeManager {
        WarmResumeManager {
            capacity,
            state: Default::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, WarmState> {
        self.state.lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn retained_bytes(&self) -> usize {
        self.state().retained_bytes
    }
}

impl WarmState {
    fn evict_front(&mut self) {
        if let Some(evicted) = self.frames.pop_front() {
            self.retained_bytes -= evicted.bytes.len();
        }
        self.first_sent_position = self.frames.front()
            .map(|f| f.position)
            .unwrap_or(self.last_sent_position);
    }
}

impl ResumeManager for WarmResumeManager {
    fn track_received_frame(&self, len: usize, frame_type: FrameType, stream_id: StreamId) {
        if !frame_type.is_resumable() {
            return;
        }
        let mut state = self.state();
        state.implied_position += len as ResumePosition;
        trace!("received {:?} on stream {}, implied position {}", frame_type, stream_id, state.implied_position);
    }

    fn track_sent_frame(&self, frame: &Bytes, frame_type: FrameType, stream_id: StreamId) {
        if !frame_type.is_resumable() {
            return;
        }
        let mut state = self.state();

        let position = state.last_sent_position;
        state.last_sent_position += frame.len() as ResumePosition;
        state.frames.push_back(RetainedFrame { position, bytes: frame.clone() });
        state.retained_bytes += frame.len();
        trace!("sent {:?} on stream {} at position {}", frame_type, stream_id, position);

        if state.retained_bytes > self.capacity {
            debug!("resume buffer exceeds {} bytes, evicting oldest frames", self.capacity);
            while state.retained_bytes > self.capacity {
                state.evict_front();
            }
        }
    }

    fn is_position_available(&self, position: ResumePosition) -> bool {
        let state = self.state();
        position == state.last_sent_position
            || state.frames.iter().any(|f| f.position == position)
    }

    fn frames_to_resend(&self, position: ResumePosition) -> Vec<Bytes> {
        self.state().frames.iter()
            .filter(|f| f.position >= position)
            .map(|f| f.bytes.clone())
            .collect()
    }

    fn reset_up_to_position(&self, position: ResumePosition) {
        let mut state = self.state();
        if position <= state.first_sent_position {
            return;
        }

        let position = if position > state.last_sent_position {
            warn!("peer acknowledged position {} beyond last sent position {}", position, state.last_sent_position);
            state.last_sent_position
        }
        else {
            position
        };

        while state.frames.front().map(|f| f.position < position).unwrap_or(false) {
            state.evict_front();
        }
        state.first_sent_position = position;
    }

    fn implied_position(&self) -> ResumePosition {
        self.state().implied_position
    }

    fn first_sent_position(&self) -> ResumePosition {
        self.state().first_sent_position
    }

    fn last_sent_position(&self) -> ResumePosition {
        self.state().last_sent_position
    }

    fn on_stream_open(&self, stream_id: StreamId, stream_type: StreamType, initial_request_n: u32) {
        let mut state = self.state();
        state.largest_used_stream_id = state.largest_used_stream_id.max(stream_id);
        state.streams.insert(stream_id, StreamResumeInfo { stream_id, stream_type, initial_request_n });
    }

    fn on_stream_closed(&self, stream_id: StreamId) {
        self.state().streams.remove(&stream_id);
    }

    fn stream_resume_infos(&self) -> Vec<StreamResumeInfo> {
        let mut result = self.state().streams.values()
            .cloned()
            .collect::<Vec<_>>();
        result.sort_by_key(|i| i.stream_id);
        result
    }

    fn largest_used_stream_id(&self) -> StreamId {
        self.state().largest_used_stream_id
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn frame(len: usize) -> Bytes {
        Bytes::from(vec![len as u8; len])
    }

    fn manager_with_frames(capacity: usize, lens: &[usize]) -> WarmResumeManager {
        let manager = WarmResumeManager::new(capacity);
        for &len in lens {
            manager.track_sent_frame(&frame(len), FrameType::Payload, StreamId(1));
        }
        manager
    }

    #[test]
    fn test_tracks_sent_positions() {
        let manager = manager_with_frames(1024, &[10, 20, 30]);
        assert_eq!(manager.first_sent_position(), 0);
        assert_eq!(manager.last_sent_position(), 60);
        assert_eq!(manager.retained_bytes(), 60);
    }

    #[test]
    fn test_ignores_non_resumable_frames() {
        let manager = WarmResumeManager::new(1024);
        manager.track_sent_frame(&frame(10), FrameType::Keepalive, StreamId::CONNECTION);
        manager.track_received_frame(10, FrameType::Lease, StreamId::CONNECTION);
        assert_eq!(manager.last_sent_position(), 0);
        assert_eq!(manager.implied_position(), 0);

        manager.track_received_frame(10, FrameType::RequestN, StreamId(1));
        assert_eq!(manager.implied_position(), 10);
    }

    #[rstest]
    #[case::start(0, true)]
    #[case::frame_boundary(10, true)]
    #[case::last_frame(30, true)]
    #[case::end(60, true)]
    #[case::mid_frame(15, false)]
    #[case::beyond_end(70, false)]
    fn test_is_position_available(#[case] position: ResumePosition, #[case] expected: bool) {
        let manager = manager_with_frames(1024, &[10, 20, 30]);
        assert_eq!(manager.is_position_available(position), expected);
    }

    #[test]
    fn test_frames_to_resend() {
        let manager = manager_with_frames(1024, &[10, 20, 30]);
        assert_eq!(manager.frames_to_resend(10), vec![frame(20), frame(30)]);
        assert_eq!(manager.frames_to_resend(60), Vec::<Bytes>::new());
    }

    #[test]
    fn test_eviction_by_capacity() {
        let manager = manager_with_frames(45, &[10, 20, 30]);
        assert_eq!(manager.first_sent_position(), 30);
        assert_eq!(manager.retained_bytes(), 30);
        assert!(!manager.is_position_available(0));
        assert!(!manager.is_position_available(10));
        assert!(manager.is_position_available(30));
    }

    #[test]
    fn test_frame_larger_than_capacity() {
        let manager = manager_with_frames(5, &[10]);
        assert_eq!(manager.retained_bytes(), 0);
        assert_eq!(manager.first_sent_position(), 10);
        assert!(manager.is_position_available(10));
    }

    #[rstest]
    #[case::noop(0, 0, 60)]
    #[case::first_frame(10, 10, 50)]
    #[case::two_frames(30, 30, 30)]
    #[case::all(60, 60, 0)]
    #[case::beyond_end(100, 60, 0)]
    fn test_reset_up_to_position(#[case] position: ResumePosition, #[case] expected_first: ResumePosition, #[case] expected_retained: usize) {
        let manager = manager_with_frames(1024, &[10, 20, 30]);
        manager.reset_up_to_position(position);
        assert_eq!(manager.first_sent_position(), expected_first);
        assert_eq!(manager.retained_bytes(), expected_retained);
        assert_eq!(manager.last_sent_position(), 60);
    }

    #[test]
    fn test_stream_infos() {
        let manager = WarmResumeManager::new(1024);
        manager.on_stream_open(StreamId(5), StreamType::Stream, 10);
        manager.on_stream_open(StreamId(1), StreamType::Channel, 1);
        manager.on_stream_open(StreamId(3), StreamType::RequestResponse, 1);
        manager.on_stream_closed(StreamId(3));

        assert_eq!(manager.stream_resume_infos(), vec![
            StreamResumeInfo { stream_id: StreamId(1), stream_type: StreamType::Channel, initial_request_n: 1 },
            StreamResumeInfo { stream_id: StreamId(5), stream_type: StreamType::Stream, initial_request_n: 10 },
        ]);
        assert_eq!(manager.largest_used_stream_id(), StreamId(5));
    }
}

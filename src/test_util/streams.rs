use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use crate::frame::frame_header::StreamId;
use crate::frame::frames::Frame;
use crate::frame::payload::Payload;
use crate::streams::stream_state_machine::{RequestResponder, StreamCompletionSignal, StreamRequest, StreamStateMachine, StreamsWriter};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock()
        .unwrap_or_else(|e| e.into_inner())
}


#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamEvent {
    Frame(Frame),
    End(StreamCompletionSignal),
}

/// [StreamStateMachine] that records the frames and signals it receives
#[derive(Default)]
pub struct TrackingStream {
    events: Mutex<Vec<StreamEvent>>,
}

impl TrackingStream {
    pub fn new() -> Arc<TrackingStream> {
        Default::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        lock(&self.events).clone()
    }

    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.events).iter()
            .filter_map(|e| match e {
                StreamEvent::Frame(f) => Some(f.clone()),
                StreamEvent::End(_) => None,
            })
            .collect()
    }

    pub fn end_signals(&self) -> Vec<StreamCompletionSignal> {
        lock(&self.events).iter()
            .filter_map(|e| match e {
                StreamEvent::End(s) => Some(*s),
                StreamEvent::Frame(_) => None,
            })
            .collect()
    }
}

impl StreamStateMachine for TrackingStream {
    fn handle_frame(&self, frame: Frame) {
        lock(&self.events).push(StreamEvent::Frame(frame));
    }

    fn end_stream(&self, signal: StreamCompletionSignal) {
        lock(&self.events).push(StreamEvent::End(signal));
    }
}


#[derive(Default)]
struct ResponderLog {
    streams: Vec<(StreamRequest, Arc<TrackingStream>, Arc<dyn StreamsWriter>)>,
    fire_and_forget: Vec<(StreamId, Payload)>,
    metadata_pushes: Vec<Bytes>,
}

/// [RequestResponder] that creates a [TrackingStream] for every peer initiated stream
#[derive(Default)]
pub struct TrackingResponder {
    log: Mutex<ResponderLog>,
}

impl TrackingResponder {
    pub fn new() -> Arc<TrackingResponder> {
        Default::default()
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        lock(&self.log).streams.iter()
            .map(|(r, _, _)| r.clone())
            .collect()
    }

    pub fn stream(&self, stream_id: StreamId) -> Option<Arc<TrackingStream>> {
        lock(&self.log).streams.iter()
            .find(|(r, _, _)| r.stream_id == stream_id)
            .map(|(_, s, _)| s.clone())
    }

    /// the writer that was passed to the stream's creation
    pub fn writer(&self, stream_id: StreamId) -> Option<Arc<dyn StreamsWriter>> {
        lock(&self.log).streams.iter()
            .find(|(r, _, _)| r.stream_id == stream_id)
            .map(|(_, _, w)| w.clone())
    }

    pub fn fire_and_forget_requests(&self) -> Vec<(StreamId, Payload)> {
        lock(&self.log).fire_and_forget.clone()
    }

    pub fn metadata_pushes(&self) -> Vec<Bytes> {
        lock(&self.log).metadata_pushes.clone()
    }
}

impl RequestResponder for TrackingResponder {
    fn create_stream(&self, request: StreamRequest, writer: Arc<dyn StreamsWriter>) -> Arc<dyn StreamStateMachine> {
        let stream = TrackingStream::new();
        lock(&self.log).streams.push((request, stream.clone(), writer));
        stream
    }

    fn handle_fire_and_forget(&self, stream_id: StreamId, payload: Payload) {
        lock(&self.log).fire_and_forget.push((stream_id, payload));
    }

    fn handle_metadata_push(&self, metadata: Bytes) {
        lock(&self.log).metadata_pushes.push(metadata);
    }
}

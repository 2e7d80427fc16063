use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use anyhow::bail;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::frame::frame_header::{StreamId, StreamType};
use crate::streams::stream_state_machine::StreamStateMachine;

/// Which side of the connection this is. Determines stream id parity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Client,
    Server,
}

impl Mode {
    pub fn is_client(&self) -> bool {
        *self == Mode::Client
    }

    fn first_stream_id(&self) -> u32 {
        match self {
            Mode::Client => 1,
            Mode::Server => 2,
        }
    }

    /// Is this id in the range this side allocates from?
    pub fn is_local_stream_id(&self, stream_id: StreamId) -> bool {
        match self {
            Mode::Client => stream_id.is_client_initiated(),
            Mode::Server => stream_id.is_server_initiated(),
        }
    }
}


pub struct StreamStateElem {
    pub handle: Arc<dyn StreamStateMachine>,
    pub stream_type: StreamType,
}

impl Debug for StreamStateElem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamStateElem({:?})", self.stream_type)
    }
}


#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamAlreadyExists(pub StreamId);

impl Display for StreamAlreadyExists {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream {} is already registered", self.0)
    }
}

impl std::error::Error for StreamAlreadyExists {}


/// The active streams of a connection, and the policy for allocating stream ids.
///
/// Ids are never reused within a connection: locally allocated ids grow monotonically, and a peer
///  initiated stream is only accepted if its id is larger than all previous peer ids.
#[derive(Debug)]
pub struct StreamRegistry {
    mode: Mode,
    streams: FxHashMap<StreamId, StreamStateElem>,
    next_stream_id: u32,
    last_peer_stream_id: u32,
}

impl StreamRegistry {
    pub fn new(mode: Mode) -> StreamRegistry {
        StreamRegistry {
            mode,
            streams: Default::default(),
            next_stream_id: mode.first_stream_id(),
            last_peer_stream_id: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Registers a stream. An existing registration for the same id is left untouched.
    pub fn insert(&mut self, stream_id: StreamId, handle: Arc<dyn StreamStateMachine>, stream_type: StreamType) -> Result<(), StreamAlreadyExists> {
        if self.streams.contains_key(&stream_id) {
            return Err(StreamAlreadyExists(stream_id));
        }
        trace!("registering stream {} ({:?})", stream_id, stream_type);
        self.streams.insert(stream_id, StreamStateElem { handle, stream_type });
        Ok(())
    }

    pub fn find(&self, stream_id: StreamId) -> Option<Arc<dyn StreamStateMachine>> {
        self.streams.get(&stream_id)
            .map(|e| e.handle.clone())
    }

    pub fn get(&self, stream_id: StreamId) -> Option<&StreamStateElem> {
        self.streams.get(&stream_id)
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Returns `false` if the stream was not registered, e.g. because it terminated concurrently
    pub fn remove(&mut self, stream_id: StreamId) -> bool {
        self.streams.remove(&stream_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Removes all streams, in ascending id order
    pub fn drain(&mut self) -> Vec<(StreamId, StreamStateElem)> {
        let mut all = self.streams.drain().collect::<Vec<_>>();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn next_stream_id(&mut self) -> anyhow::Result<StreamId> {
        if self.next_stream_id > StreamId::MAX.0 {
            bail!("stream ids are exhausted");
        }
        let result = StreamId(self.next_stream_id);
        self.next_stream_id += 2;
        Ok(result)
    }

    /// Makes sure that locally allocated ids continue after `largest_used`, e.g. after streams
    ///  were restored during cold resumption
    pub fn continue_after(&mut self, largest_used: StreamId) {
        let mut next = largest_used.0 + 1;
        if !self.mode.is_local_stream_id(StreamId(next)) {
            next += 1;
        }
        self.next_stream_id = self.next_stream_id.max(next);
    }

    pub fn is_local_stream_id(&self, stream_id: StreamId) -> bool {
        self.mode.is_local_stream_id(stream_id)
    }

    /// Accepts a peer initiated stream id if it has the peer's parity and is newer than all
    ///  previously accepted peer ids
    pub fn register_new_peer_stream_id(&mut self, stream_id: StreamId) -> bool {
        if stream_id.is_connection() || self.is_local_stream_id(stream_id) {
            return false;
        }
        if stream_id.0 <= self.last_peer_stream_id {
            return false;
        }
        self.last_peer_stream_id = stream_id.0;
        true
    }
}

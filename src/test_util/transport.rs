use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::bail;
use bytes::Bytes;

use crate::frame::frames::Frame;
use crate::frame::protocol_version::ProtocolVersion;
use crate::serializer::serializer_for;
use crate::transport::{FrameTransport, TransportId};

#[derive(Default)]
struct TransportLog {
    frames: Vec<Bytes>,
    closed: bool,
    fail_writes: bool,
}

/// [FrameTransport] that records written frames. Clones share the same log, so a test can keep a
///  clone after passing the transport to a connection.
#[derive(Clone)]
pub struct TrackingFrameTransport {
    id: TransportId,
    log: Arc<Mutex<TransportLog>>,
}

impl TrackingFrameTransport {
    pub fn new() -> TrackingFrameTransport {
        TrackingFrameTransport {
            id: TransportId::next(),
            log: Default::default(),
        }
    }

    fn log(&self) -> MutexGuard<'_, TransportLog> {
        self.log.lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// all frames written so far, in serialized form
    pub fn raw_frames(&self) -> Vec<Bytes> {
        self.log().frames.clone()
    }

    /// Removes and decodes the frames written so far. Panics if a frame can not be decoded.
    pub fn take_frames(&self, version: ProtocolVersion) -> Vec<Frame> {
        let serializer = match serializer_for(version) {
            Some(s) => s,
            None => panic!("unsupported protocol version {}", version),
        };
        let frames = std::mem::take(&mut self.log().frames);
        frames.into_iter()
            .map(|buf| match serializer.deserialize(buf.clone()) {
                Ok(frame) => frame,
                Err(e) => panic!("written frame {:?} can not be decoded: {}", buf, e),
            })
            .collect()
    }

    pub fn assert_no_frames(&self) {
        let frames = self.raw_frames();
        assert!(frames.is_empty(), "expected no frames, was {:?}", frames);
    }

    pub fn is_closed(&self) -> bool {
        self.log().closed
    }

    /// makes subsequent writes fail, simulating a broken connection
    pub fn fail_writes(&self) {
        self.log().fail_writes = true;
    }
}

impl Default for TrackingFrameTransport {
    fn default() -> Self {
        TrackingFrameTransport::new()
    }
}

impl FrameTransport for TrackingFrameTransport {
    fn transport_id(&self) -> TransportId {
        self.id
    }

    fn output_frame(&self, frame: Bytes) -> anyhow::Result<()> {
        let mut log = self.log();
        if log.closed {
            bail!("{} is closed", self.id);
        }
        if log.fail_writes {
            bail!("{}: write failed", self.id);
        }
        log.frames.push(frame);
        Ok(())
    }

    fn close(&self) {
        self.log().closed = true;
    }
}

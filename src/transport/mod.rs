//! The byte transport a connection runs on. A connection treats its transport as replaceable: on
//!  resumption, the session continues on a new transport.

pub mod framed;

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
#[cfg(test)] use mockall::automock;

/// Identifies a transport instance, so that late callbacks from a replaced transport can be told
///  apart from those of the current one
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TransportId(pub u64);

impl TransportId {
    pub fn next() -> TransportId {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TransportId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for TransportId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}


/// Outbound side of a transport: ordered delivery of whole frames
#[cfg_attr(test, automock)]
pub trait FrameTransport: Send {
    fn transport_id(&self) -> TransportId;

    /// Queues a serialized frame for writing. Frames are written in call order.
    fn output_frame(&self, frame: Bytes) -> anyhow::Result<()>;

    /// Flushes frames that were already queued, then closes the transport. Idempotent.
    fn close(&self);
}


/// Inbound side of a transport: receives frames and the transport's termination
#[cfg_attr(test, automock)]
pub trait FrameProcessor: Send + Sync {
    /// fails if there is no connection to process the frame any more
    fn process_frame(&self, transport_id: TransportId, frame: Bytes) -> anyhow::Result<()>;

    fn on_terminal(&self, transport_id: TransportId, error: Option<String>);
}

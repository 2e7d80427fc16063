//! Tracking fakes for the connection's collaborators: transports, stream handles, responders and
//!  lifecycle listeners. They record everything that is passed to them, so tests can assert on
//!  the frames a connection wrote and the signals its streams received.
//!
//! They are used for testing the connection layer itself, but they are also exported for
//!  application testing, which is why this is regular (non-#[cfg(test)]) code.

pub mod connection;
pub mod streams;
pub mod transport;

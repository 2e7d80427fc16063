//! Connection layer of the RSocket reactive-streams protocol: the binary frame model, versioned
//!  wire serializers, and the per-connection state machine that multiplexes logical streams
//!  (request/response, fire-and-forget, stream, channel) over a single ordered byte transport.
//!
//! The layering is, leaves first:
//! * [frame] - tagged frame variants and their constructors
//! * [serializer] - wire encoding for protocol versions 0.1 and 1.0, with auto-detection
//! * [streams] - stream registry, fragment reassembly and the stream handle contract
//! * [resume] - resumption ledger (warm) and the cold-resume collaborator
//! * [transport] - the transport abstraction and a length-prefixed tokio implementation
//! * [connection] - the connection state machine, its driver task and the connection set
//!
//! The state machine itself is synchronous and single-writer: all I/O completions and callbacks
//!  are funneled into its driver task as commands through a [connection::handle::ConnectionHandle].

pub mod connection;
pub mod frame;
pub mod resume;
pub mod serializer;
pub mod streams;
pub mod test_util;
pub mod transport;
pub mod util;

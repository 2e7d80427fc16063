use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::connection::connection_events::ClientResumeStatusCallback;
use crate::connection::parameters::{ResumeParameters, SetupParameters};
use crate::connection::state_machine::ConnectionState;
use crate::frame::frame_header::{StreamId, StreamType};
use crate::frame::frames::{Frame, FrameError};
use crate::frame::payload::Payload;
use crate::frame::protocol_version::{ProtocolVersion, ResumeToken};
use crate::streams::stream_state_machine::{StreamStateMachine, StreamsWriter};
use crate::transport::{FrameProcessor, FrameTransport, TransportId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> ConnectionId {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ConnectionId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection-{}", self.0)
    }
}


/// Creates the handle for a locally initiated stream once its id is allocated
pub type StreamFactory = Box<dyn FnOnce(StreamId) -> Arc<dyn StreamStateMachine> + Send>;

/// Everything that happens to a connection, funneled into its driver task
pub enum ConnectionCommand {
    Inbound { transport_id: TransportId, frame: Bytes },
    TransportTerminated { transport_id: TransportId, error: Option<String> },
    ConnectClient { transport: Box<dyn FrameTransport>, params: SetupParameters, reply: oneshot::Sender<anyhow::Result<()>> },
    ConnectServer { transport: Box<dyn FrameTransport>, params: SetupParameters },
    ResumeClient { transport: Box<dyn FrameTransport>, token: ResumeToken, version: ProtocolVersion, callback: Box<dyn ClientResumeStatusCallback> },
    ResumeServer { transport: Box<dyn FrameTransport>, params: ResumeParameters, reply: oneshot::Sender<bool> },
    OpenStream { stream_type: StreamType, initial_request_n: u32, payload: Payload, factory: StreamFactory, reply: oneshot::Sender<anyhow::Result<StreamId>> },
    FireAndForget { payload: Payload, reply: oneshot::Sender<anyhow::Result<StreamId>> },
    MetadataPush(Bytes),
    SendLease { ttl_ms: u32, number_of_requests: u32, metadata: Option<Bytes> },
    WriteFrame(Frame),
    WriteNewStream { stream_id: StreamId, stream_type: StreamType, initial_request_n: u32, payload: Payload },
    StreamClosed(StreamId),
    KeepaliveTick,
    QueryState(oneshot::Sender<ConnectionState>),
    Disconnect(String),
    Close(String),
    CloseWithError(FrameError),
}

impl Debug for ConnectionCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionCommand::Inbound { transport_id, frame } => write!(f, "Inbound({}, {} bytes)", transport_id, frame.len()),
            ConnectionCommand::TransportTerminated { transport_id, error } => write!(f, "TransportTerminated({}, {:?})", transport_id, error),
            ConnectionCommand::ConnectClient { .. } => write!(f, "ConnectClient"),
            ConnectionCommand::ConnectServer { .. } => write!(f, "ConnectServer"),
            ConnectionCommand::ResumeClient { .. } => write!(f, "ResumeClient"),
            ConnectionCommand::ResumeServer { params, .. } => write!(f, "ResumeServer({:?})", params),
            ConnectionCommand::OpenStream { stream_type, .. } => write!(f, "OpenStream({:?})", stream_type),
            ConnectionCommand::FireAndForget { .. } => write!(f, "FireAndForget"),
            ConnectionCommand::MetadataPush(_) => write!(f, "MetadataPush"),
            ConnectionCommand::SendLease { ttl_ms, number_of_requests, .. } => write!(f, "SendLease({}ms, {})", ttl_ms, number_of_requests),
            ConnectionCommand::WriteFrame(frame) => write!(f, "WriteFrame({})", frame),
            ConnectionCommand::WriteNewStream { stream_id, stream_type, .. } => write!(f, "WriteNewStream({}, {:?})", stream_id, stream_type),
            ConnectionCommand::StreamClosed(stream_id) => write!(f, "StreamClosed({})", stream_id),
            ConnectionCommand::KeepaliveTick => write!(f, "KeepaliveTick"),
            ConnectionCommand::QueryState(_) => write!(f, "QueryState"),
            ConnectionCommand::Disconnect(reason) => write!(f, "Disconnect({})", reason),
            ConnectionCommand::Close(reason) => write!(f, "Close({})", reason),
            ConnectionCommand::CloseWithError(error) => write!(f, "CloseWithError({})", error.message_str()),
        }
    }
}


/// Cheaply cloneable reference to a connection running in its driver task. All operations are
///  asynchronous messages to the driver; they fail once the connection is closed.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<ConnectionCommand>,
}

impl Debug for ConnectionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionHandle({})", self.id)
    }
}

impl ConnectionHandle {
    pub fn new() -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            id: ConnectionId::next(),
            sender,
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// `true` once the driver task terminated
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn send(&self, command: ConnectionCommand) -> anyhow::Result<()> {
        self.sender.send(command)
            .map_err(|e| anyhow!("{} is closed, dropping {:?}", self.id, e.0))
    }

    pub async fn connect_client(&self, transport: Box<dyn FrameTransport>, params: SetupParameters) -> anyhow::Result<()> {
        let (reply, result) = oneshot::channel();
        self.send(ConnectionCommand::ConnectClient { transport, params, reply })?;
        result.await
            .map_err(|_| anyhow!("{} closed while connecting", self.id))?
    }

    pub fn connect_server(&self, transport: Box<dyn FrameTransport>, params: SetupParameters) -> anyhow::Result<()> {
        self.send(ConnectionCommand::ConnectServer { transport, params })
    }

    /// The callback is notified exactly once, also if the connection is already gone
    pub fn resume_client(&self, transport: Box<dyn FrameTransport>, token: ResumeToken, version: ProtocolVersion, callback: Box<dyn ClientResumeStatusCallback>) {
        let command = ConnectionCommand::ResumeClient { transport, token, version, callback };
        if let Err(SendError(ConnectionCommand::ResumeClient { callback, transport, .. })) = self.sender.send(command) {
            transport.close();
            callback.on_resume_error(anyhow!("{} is closed", self.id));
        }
    }

    /// Returns `true` if the session was resumed on the new transport
    pub async fn resume_server(&self, transport: Box<dyn FrameTransport>, params: ResumeParameters) -> anyhow::Result<bool> {
        let (reply, result) = oneshot::channel();
        self.send(ConnectionCommand::ResumeServer { transport, params, reply })?;
        result.await
            .map_err(|_| anyhow!("{} closed while resuming", self.id))
    }

    pub async fn open_stream(&self, stream_type: StreamType, initial_request_n: u32, payload: Payload, factory: StreamFactory) -> anyhow::Result<StreamId> {
        let (reply, result) = oneshot::channel();
        self.send(ConnectionCommand::OpenStream { stream_type, initial_request_n, payload, factory, reply })?;
        result.await
            .map_err(|_| anyhow!("{} closed while opening a stream", self.id))?
    }

    pub async fn fire_and_forget(&self, payload: Payload) -> anyhow::Result<StreamId> {
        let (reply, result) = oneshot::channel();
        self.send(ConnectionCommand::FireAndForget { payload, reply })?;
        result.await
            .map_err(|_| anyhow!("{} closed while sending a request", self.id))?
    }

    pub fn metadata_push(&self, metadata: Bytes) -> anyhow::Result<()> {
        self.send(ConnectionCommand::MetadataPush(metadata))
    }

    pub fn send_lease(&self, ttl_ms: u32, number_of_requests: u32, metadata: Option<Bytes>) -> anyhow::Result<()> {
        self.send(ConnectionCommand::SendLease { ttl_ms, number_of_requests, metadata })
    }

    pub async fn state(&self) -> anyhow::Result<ConnectionState> {
        let (reply, result) = oneshot::channel();
        self.send(ConnectionCommand::QueryState(reply))?;
        result.await
            .map_err(|_| anyhow!("{} is closed", self.id))
    }

    pub fn keepalive_tick(&self) {
        let _ = self.send(ConnectionCommand::KeepaliveTick);
    }

    pub fn disconnect(&self, reason: impl Into<String>) -> anyhow::Result<()> {
        self.send(ConnectionCommand::Disconnect(reason.into()))
    }

    pub fn close(&self, reason: impl Into<String>) -> anyhow::Result<()> {
        self.send(ConnectionCommand::Close(reason.into()))
    }

    pub fn close_with_error(&self, error: FrameError) -> anyhow::Result<()> {
        self.send(ConnectionCommand::CloseWithError(error))
    }
}

impl StreamsWriter for ConnectionHandle {
    fn write_frame(&self, frame: Frame) {
        if let Err(e) = self.send(ConnectionCommand::WriteFrame(frame)) {
            trace!("{}", e);
        }
    }

    fn write_new_stream(&self, stream_id: StreamId, stream_type: StreamType, initial_request_n: u32, payload: Payload) {
        if let Err(e) = self.send(ConnectionCommand::WriteNewStream { stream_id, stream_type, initial_request_n, payload }) {
            trace!("{}", e);
        }
    }

    fn on_stream_closed(&self, stream_id: StreamId) {
        let _ = self.send(ConnectionCommand::StreamClosed(stream_id));
    }
}

impl FrameProcessor for ConnectionHandle {
    fn process_frame(&self, transport_id: TransportId, frame: Bytes) -> anyhow::Result<()> {
        self.send(ConnectionCommand::Inbound { transport_id, frame })
    }

    fn on_terminal(&self, transport_id: TransportId, error: Option<String>) {
        let _ = self.send(ConnectionCommand::TransportTerminated { transport_id, error });
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::connection_events::OneshotResumeCallback;
    use crate::test_util::transport::TrackingFrameTransport;

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = ConnectionHandle::new();
        let (b, _rb) = ConnectionHandle::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_send_after_driver_is_gone() {
        let (handle, receiver) = ConnectionHandle::new();
        assert!(!handle.is_closed());
        drop(receiver);

        assert!(handle.is_closed());
        assert!(handle.metadata_push(Bytes::from_static(b"m")).is_err());
        assert!(handle.process_frame(TransportId(1), Bytes::new()).is_err());
    }

    #[tokio::test]
    async fn test_resume_client_on_closed_connection_fails_callback() {
        let (handle, receiver) = ConnectionHandle::new();
        drop(receiver);

        let transport = TrackingFrameTransport::new();
        let (callback, result) = OneshotResumeCallback::new();
        handle.resume_client(Box::new(transport.clone()), ResumeToken::generate(), ProtocolVersion::V1_0, Box::new(callback));

        assert!(OneshotResumeCallback::wait(result).await.is_err());
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_streams_writer_sends_commands() {
        let (handle, mut receiver) = ConnectionHandle::new();
        handle.write_new_stream(StreamId(1), StreamType::Stream, 5, Payload::new("x"));
        handle.on_stream_closed(StreamId(1));

        assert!(matches!(receiver.recv().await, Some(ConnectionCommand::WriteNewStream { stream_id: StreamId(1), initial_request_n: 5, .. })));
        assert!(matches!(receiver.recv().await, Some(ConnectionCommand::StreamClosed(StreamId(1)))));
    }
}

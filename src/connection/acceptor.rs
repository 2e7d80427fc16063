use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::connection::connection_config::ConnectionConfig;
use crate::connection::connection_set::ConnectionSet;
use crate::connection::driver::spawn_connection;
use crate::connection::handle::ConnectionHandle;
use crate::connection::parameters::{ResumeParameters, SetupParameters};
use crate::connection::state_machine::ConnectionContext;
use crate::frame::frames::{Frame, FrameError, FrameResume, FrameSetup};
use crate::serializer::v1_0::V1Serializer;
use crate::serializer::{detect_protocol_version, serializer_for, FrameSerializer};
use crate::streams::stream_registry::Mode;
use crate::streams::stream_state_machine::RequestResponder;
use crate::transport::framed::{read_frame, write_frame, FramedTransport};

/// Decides whether a new connection is accepted, and provides the responder for its
///  peer initiated streams
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SetupHandler: Send + Sync {
    /// An error rejects the connection with REJECTED_SETUP, using the error's message
    async fn on_setup(&self, params: &SetupParameters) -> anyhow::Result<Arc<dyn RequestResponder>>;
}


/// Server side entry point for new transports. The first frame on a transport decides what
///  happens to it: SETUP creates a new connection, RESUME moves an existing session to the
///  transport.
pub struct ConnectionAcceptor {
    config: ConnectionConfig,
    connection_set: Arc<ConnectionSet>,
    setup_handler: Arc<dyn SetupHandler>,
}

impl ConnectionAcceptor {
    pub fn new(config: ConnectionConfig, setup_handler: Arc<dyn SetupHandler>) -> anyhow::Result<ConnectionAcceptor> {
        config.validate()?;
        Ok(ConnectionAcceptor {
            config,
            connection_set: Arc::new(ConnectionSet::new()),
            setup_handler,
        })
    }

    pub fn connection_set(&self) -> &Arc<ConnectionSet> {
        &self.connection_set
    }

    /// Accepts TCP connections until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("accepting connections on {:?}", listener.local_addr());
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("new TCP connection from {}", peer_addr);

            let acceptor = self.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(e) = acceptor.accept(reader, writer).await {
                    warn!("connection from {} failed: {}", peer_addr, e);
                }
            });
        }
    }

    /// Reads the first frame from a new transport and hands the transport to a connection.
    ///  Returns `None` if the transport was rejected; the peer was sent an ERROR frame then.
    pub async fn accept<R, W>(&self, mut reader: R, writer: W) -> anyhow::Result<Option<ConnectionHandle>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let first = match read_frame(&mut reader).await? {
            Some(frame) => frame,
            None => bail!("transport closed before the first frame"),
        };

        let version = match detect_protocol_version(&first) {
            Some(version) => version,
            None => {
                reject(writer, &V1Serializer, FrameError::invalid_setup("first frame must be SETUP or RESUME")).await?;
                return Ok(None);
            }
        };

        // the 1.0 layout is stable across 1.x, so frames of unsupported 1.x versions can be decoded
        //  well enough to reject them properly
        let (serializer, supported): (Arc<dyn FrameSerializer>, bool) = match serializer_for(version) {
            Some(s) => (s, true),
            None => (Arc::new(V1Serializer), false),
        };

        match serializer.deserialize(first) {
            Ok(Frame::Setup(setup)) if supported => self.accept_setup(reader, writer, serializer.as_ref(), setup).await,
            Ok(Frame::Setup(_)) => {
                reject(writer, serializer.as_ref(), FrameError::unsupported_setup(format!("unsupported protocol version {}", version))).await?;
                Ok(None)
            }
            Ok(Frame::Resume(resume)) if supported => self.accept_resume(reader, writer, serializer.as_ref(), resume).await,
            Ok(Frame::Resume(_)) => {
                reject(writer, serializer.as_ref(), FrameError::rejected_resume(format!("unsupported protocol version {}", version))).await?;
                Ok(None)
            }
            Ok(other) => {
                debug!("unexpected first frame {}", other);
                reject(writer, serializer.as_ref(), FrameError::connection_error("Invalid frame")).await?;
                Ok(None)
            }
            Err(e) => {
                debug!("first frame can not be decoded: {}", e);
                reject(writer, serializer.as_ref(), FrameError::connection_error("Invalid frame")).await?;
                Ok(None)
            }
        }
    }

    async fn accept_setup<R, W>(&self, reader: R, writer: W, serializer: &dyn FrameSerializer, setup: FrameSetup) -> anyhow::Result<Option<ConnectionHandle>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let params = SetupParameters::from_frame(setup);
        let version = params.version;

        let token = if params.resumable && !params.token.is_empty() {
            Some(params.token.clone())
        }
        else {
            None
        };
        if let Some(token) = &token {
            if self.connection_set.find_by_token(token).await.is_some() {
                info!("rejecting SETUP: resume token {} belongs to a live session", token);
                reject(writer, serializer, FrameError::rejected_setup("resume token in use")).await?;
                return Ok(None);
            }
        }

        let responder = match self.setup_handler.on_setup(&params).await {
            Ok(responder) => responder,
            Err(e) => {
                info!("rejecting SETUP: {}", e);
                reject(writer, serializer, FrameError::rejected_setup(e.to_string())).await?;
                return Ok(None);
            }
        };

        let context = ConnectionContext::new(Mode::Server, self.config.clone(), responder);
        let handle = spawn_connection(context, Some(self.connection_set.clone()));

        // a concurrent SETUP may have claimed the token while the handler ran
        if !self.connection_set.insert(handle.clone(), token).await {
            info!("{}: rejecting SETUP: resume token belongs to a live session", handle.id());
            if let Err(e) = handle.close("resume token in use") {
                debug!("{}", e);
            }
            reject(writer, serializer, FrameError::rejected_setup("resume token in use")).await?;
            return Ok(None);
        }

        let (transport, gate) = FramedTransport::spawn(reader, writer, Arc::new(handle.clone()));
        handle.connect_server(Box::new(transport), params)?;
        gate.open();

        debug!("{}: accepted SETUP with protocol version {}", handle.id(), version);
        Ok(Some(handle))
    }

    async fn accept_resume<R, W>(&self, reader: R, writer: W, serializer: &dyn FrameSerializer, resume: FrameResume) -> anyhow::Result<Option<ConnectionHandle>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let params = ResumeParameters::from_frame(resume);

        let handle = match self.connection_set.find_by_token(&params.token).await {
            Some(handle) => handle,
            None => {
                debug!("RESUME with unknown token {}", params.token);
                reject(writer, serializer, FrameError::rejected_resume("unknown resume token")).await?;
                return Ok(None);
            }
        };

        let (transport, gate) = FramedTransport::spawn(reader, writer, Arc::new(handle.clone()));
        if handle.resume_server(Box::new(transport), params).await? {
            gate.open();
            Ok(Some(handle))
        }
        else {
            Ok(None)
        }
    }
}

async fn reject<W: AsyncWrite + Unpin>(mut writer: W, serializer: &dyn FrameSerializer, error: FrameError) -> anyhow::Result<()> {
    debug!("rejecting transport with {:?}: {}", error.error_code, error.message_str());
    write_frame(&mut writer, &serializer.serialize(&error.into())).await?;
    writer.shutdown().await?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use anyhow::anyhow;
    use bytes::Bytes;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};
    use tokio::time;
    use crate::connection::driver::{connect_client, resume_client};
    use crate::connection::state_machine::ConnectionState;
    use crate::frame::error_code::ErrorCode;
    use crate::frame::frame_header::{FrameFlags, StreamId, StreamType};
    use crate::frame::frames::*;
    use crate::frame::payload::Payload;
    use crate::frame::protocol_version::{ProtocolVersion, ResumeToken};
    use crate::serializer::v0_1::V0Serializer;
    use crate::streams::stream_state_machine::StreamStateMachine;
    use crate::test_util::streams::{TrackingResponder, TrackingStream};
    use rstest::*;

    const V1: ProtocolVersion = ProtocolVersion::V1_0;

    fn accepting_handler(responder: Arc<TrackingResponder>) -> Arc<dyn SetupHandler> {
        let mut handler = MockSetupHandler::new();
        handler.expect_on_setup()
            .returning(move |_| Ok(responder.clone() as Arc<dyn RequestResponder>));
        Arc::new(handler)
    }

    fn acceptor(responder: Arc<TrackingResponder>) -> Arc<ConnectionAcceptor> {
        Arc::new(ConnectionAcceptor::new(ConnectionConfig::new(), accepting_handler(responder)).unwrap())
    }

    fn token() -> ResumeToken {
        ResumeToken(Bytes::from_static(b"resume-me"))
    }

    fn setup_params(resumable: bool) -> SetupParameters {
        versioned_setup_params(V1, resumable)
    }

    fn versioned_setup_params(version: ProtocolVersion, resumable: bool) -> SetupParameters {
        let params = SetupParameters {
            version,
            ..SetupParameters::new(&ConnectionConfig::new(), Payload::new("setup"))
        };
        if resumable {
            params.resumable_with_token(token())
        }
        else {
            params
        }
    }

    fn client_context() -> ConnectionContext {
        ConnectionContext::new(Mode::Client, ConnectionConfig::new(), TrackingResponder::new())
    }

    fn spawn_accept(acceptor: &Arc<ConnectionAcceptor>, io: DuplexStream) -> tokio::task::JoinHandle<anyhow::Result<Option<ConnectionHandle>>> {
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let (reader, writer) = split(io);
            acceptor.accept(reader, writer).await
        })
    }

    async fn eventually(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    fn wire(version: ProtocolVersion) -> Arc<dyn FrameSerializer> {
        serializer_for(version).unwrap()
    }

    /// sends a raw first frame and returns the frame the server answered with, decoded in the
    ///  given version's layout
    async fn send_first_frame(acceptor: &Arc<ConnectionAcceptor>, frame: Bytes, answer_version: ProtocolVersion) -> (anyhow::Result<Option<ConnectionHandle>>, Option<Frame>) {
        let (client_io, server_io) = duplex(4096);
        let accepted = spawn_accept(acceptor, server_io);

        let (mut reader, mut writer): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) = split(client_io);
        write_frame(&mut writer, &frame).await.unwrap();

        let answer = read_frame(&mut reader).await.unwrap()
            .map(|buf| wire(answer_version).deserialize(buf).unwrap());
        (accepted.await.unwrap(), answer)
    }

    fn assert_error_code(frame: Option<Frame>, expected: ErrorCode) {
        match frame {
            Some(Frame::Error(e)) => assert_eq!(e.error_code, expected),
            other => panic!("expected ERROR {:?}, was {:?}", expected, other),
        }
    }

    #[rstest]
    #[case::v1_0(ProtocolVersion::V1_0)]
    #[case::v0_1(ProtocolVersion::V0_1)]
    #[tokio::test]
    async fn test_setup_creates_connection(#[case] version: ProtocolVersion) {
        let responder = TrackingResponder::new();
        let acceptor = acceptor(responder.clone());
        let (client_io, server_io) = duplex(4096);
        let accepted = spawn_accept(&acceptor, server_io);

        let (reader, writer) = split(client_io);
        let client = connect_client(reader, writer, client_context(), versioned_setup_params(version, false)).await.unwrap();
        let server = accepted.await.unwrap().unwrap().unwrap();
        assert_eq!(acceptor.connection_set().len().await, 1);

        client.metadata_push(Bytes::from_static(b"hello")).unwrap();
        let stream_id = client.open_stream(StreamType::RequestResponse, 1, Payload::new("request"), Box::new(|_: StreamId| TrackingStream::new() as Arc<dyn StreamStateMachine>)).await.unwrap();

        eventually(|| !responder.metadata_pushes().is_empty() && !responder.requests().is_empty()).await;
        assert_eq!(responder.metadata_pushes(), vec![Bytes::from_static(b"hello")]);
        assert_eq!(responder.requests()[0].stream_id, stream_id);
        assert_eq!(responder.requests()[0].payload, Payload::new("request"));
        assert_eq!(server.state().await.unwrap(), ConnectionState::Connected);

        client.close("done").unwrap();
        for _ in 0..200 {
            if acceptor.connection_set().is_empty().await {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert!(acceptor.connection_set().is_empty().await);
    }

    #[rstest]
    #[case::v1_0(ProtocolVersion::V1_0)]
    #[case::v0_1(ProtocolVersion::V0_1)]
    #[tokio::test]
    async fn test_setup_rejected_by_handler(#[case] version: ProtocolVersion) {
        let mut handler = MockSetupHandler::new();
        handler.expect_on_setup()
            .returning(|_| Err(anyhow!("go away")));
        let acceptor = Arc::new(ConnectionAcceptor::new(ConnectionConfig::new(), Arc::new(handler)).unwrap());

        let setup = wire(version).serialize(&versioned_setup_params(version, false).to_frame().into());
        let (accepted, answer) = send_first_frame(&acceptor, setup, version).await;

        assert!(accepted.unwrap().is_none());
        match answer {
            Some(Frame::Error(e)) => {
                assert_eq!(e.error_code, ErrorCode::RejectedSetup);
                assert_eq!(e.message_str(), "go away");
            }
            other => panic!("expected REJECTED_SETUP, was {:?}", other),
        }
        assert!(acceptor.connection_set().is_empty().await);
    }

    #[tokio::test]
    async fn test_unsupported_setup_version() {
        let acceptor = acceptor(TrackingResponder::new());
        let params = SetupParameters {
            version: ProtocolVersion::new(1, 7),
            ..setup_params(false)
        };
        let setup = V1Serializer.serialize(&params.to_frame().into());
        let (accepted, answer) = send_first_frame(&acceptor, setup, V1).await;

        assert!(accepted.unwrap().is_none());
        assert_error_code(answer, ErrorCode::UnsupportedSetup);
    }

    #[rstest]
    #[case::request_as_first_frame(FrameRequestResponse::new(StreamId(1), FrameFlags::empty(), Payload::new("x")).into(), ErrorCode::InvalidSetup)]
    #[case::keepalive_as_first_frame(FrameKeepalive::new(FrameFlags::RESPOND, 0, Bytes::new()).into(), ErrorCode::InvalidSetup)]
    #[case::resume_with_unknown_token(FrameResume::new(V1, token(), 0, 0).into(), ErrorCode::RejectedResume)]
    #[tokio::test]
    async fn test_first_frame_rejected(#[case] frame: Frame, #[case] expected: ErrorCode) {
        let acceptor = acceptor(TrackingResponder::new());
        let (accepted, answer) = send_first_frame(&acceptor, V1Serializer.serialize(&frame), V1).await;

        assert!(accepted.unwrap().is_none());
        assert_error_code(answer, expected);
    }

    #[tokio::test]
    async fn test_setup_with_token_of_live_session_is_rejected() {
        let mut handler = MockSetupHandler::new();
        handler.expect_on_setup()
            .times(1)
            .returning(|_| Ok(TrackingResponder::new() as Arc<dyn RequestResponder>));
        let acceptor = Arc::new(ConnectionAcceptor::new(ConnectionConfig::new(), Arc::new(handler)).unwrap());

        let (client_io, server_io) = duplex(4096);
        let accepted = spawn_accept(&acceptor, server_io);
        let (reader, writer) = split(client_io);
        let _client = connect_client(reader, writer, client_context(), setup_params(true)).await.unwrap();
        let server = accepted.await.unwrap().unwrap().unwrap();

        let setup = V1Serializer.serialize(&setup_params(true).to_frame().into());
        let (accepted, answer) = send_first_frame(&acceptor, setup, V1).await;

        assert!(accepted.unwrap().is_none());
        match answer {
            Some(Frame::Error(e)) => {
                assert_eq!(e.error_code, ErrorCode::RejectedSetup);
                assert_eq!(e.message_str(), "resume token in use");
            }
            other => panic!("expected REJECTED_SETUP, was {:?}", other),
        }
        assert_eq!(acceptor.connection_set().len().await, 1);
        assert_eq!(acceptor.connection_set().find_by_token(&token()).await.map(|h| h.id()), Some(server.id()));
        assert_eq!(server.state().await.unwrap(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_transport_closed_before_first_frame() {
        let acceptor = acceptor(TrackingResponder::new());
        let (client_io, server_io) = duplex(64);
        let accepted = spawn_accept(&acceptor, server_io);
        drop(client_io);

        assert!(accepted.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_resume_on_new_transport() {
        let responder = TrackingResponder::new();
        let acceptor = acceptor(responder.clone());

        let (client_io, server_io) = duplex(4096);
        let accepted = spawn_accept(&acceptor, server_io);
        let (reader, writer) = split(client_io);
        let client = connect_client(reader, writer, client_context(), setup_params(true)).await.unwrap();
        let server = accepted.await.unwrap().unwrap().unwrap();

        client.disconnect("network trouble").unwrap();
        assert_eq!(client.state().await.unwrap(), ConnectionState::Disconnected);
        client.metadata_push(Bytes::from_static(b"queued")).unwrap();

        let (client_io, server_io) = duplex(4096);
        let accepted = spawn_accept(&acceptor, server_io);
        let (reader, writer) = split(client_io);
        resume_client(&client, reader, writer, token(), V1).await.unwrap();

        let resumed = accepted.await.unwrap().unwrap().unwrap();
        assert_eq!(resumed.id(), server.id());
        assert_eq!(client.state().await.unwrap(), ConnectionState::Connected);
        assert_eq!(server.state().await.unwrap(), ConnectionState::Connected);

        eventually(|| responder.metadata_pushes() == vec![Bytes::from_static(b"queued")]).await;
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let responder = TrackingResponder::new();
        let acceptor = acceptor(responder.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(acceptor.clone().serve(listener));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let client = connect_client(reader, writer, client_context(), setup_params(false)).await.unwrap();
        client.fire_and_forget(Payload::new("fnf")).await.unwrap();

        eventually(|| !responder.fire_and_forget_requests().is_empty()).await;
        assert_eq!(responder.fire_and_forget_requests(), vec![(StreamId(1), Payload::new("fnf"))]);
    }
}

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::connection::connection_config::ConnectionConfig;
use crate::connection::connection_events::{ClientResumeStatusCallback, ConnectionEventNotifier, ConnectionEvents};
use crate::connection::handle::{ConnectionHandle, StreamFactory};
use crate::connection::keepalive_timer::KeepaliveTimer;
use crate::connection::parameters::{ResumeParameters, SetupParameters};
use crate::frame::error_code::ErrorCode;
use crate::frame::frame_header::{FrameFlags, StreamId, StreamType};
use crate::frame::frames::*;
use crate::frame::payload::Payload;
use crate::frame::protocol_version::{ProtocolVersion, ResumePosition, ResumeToken};
use crate::resume::cold_resume_handler::ColdResumeHandler;
use crate::resume::resume_manager::ResumeManager;
use crate::resume::warm_resume_manager::WarmResumeManager;
use crate::serializer::v1_0::V1Serializer;
use crate::serializer::{detect_protocol_version, serializer_for, FrameSerializer};
use crate::streams::fragment_accumulator::{AccumulatorResult, FragmentAccumulator};
use crate::streams::stream_registry::{Mode, StreamRegistry};
use crate::streams::stream_state_machine::{RequestResponder, StreamCompletionSignal, StreamRequest, StreamStateMachine, StreamsWriter};
use crate::transport::{FrameTransport, TransportId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// no transport attached, either initially or after the transport of a resumable session was lost
    Disconnected,
    /// a client's SETUP is being written
    Connecting,
    Connected,
    /// a client sent RESUME and waits for RESUME_OK
    Resuming,
    Closed,
}


/// A connection's collaborators
pub struct ConnectionContext {
    pub mode: Mode,
    pub config: ConnectionConfig,
    pub responder: Arc<dyn RequestResponder>,
    pub events: Arc<dyn ConnectionEvents>,
    /// shared between the successive transports of a session
    pub resume_manager: Arc<dyn ResumeManager>,
    pub cold_resume_handler: Option<Arc<dyn ColdResumeHandler>>,
}

impl ConnectionContext {
    pub fn new(mode: Mode, config: ConnectionConfig, responder: Arc<dyn RequestResponder>) -> ConnectionContext {
        let resume_manager = Arc::new(WarmResumeManager::new(config.resume_buffer_capacity));
        ConnectionContext {
            mode,
            config,
            responder,
            events: Arc::new(ConnectionEventNotifier::new()),
            resume_manager,
            cold_resume_handler: None,
        }
    }
}


/// The per-connection orchestrator: lifecycle, frame dispatch, stream multiplexing, keepalive and
///  resumption.
///
/// It is purely synchronous and owned by a single driver task. Everything that happens
///  asynchronously (inbound frames, transport termination, timer ticks, stream output) reaches it
///  as a method call from that task, so no state is ever shared.
///
/// All connection-fatal conditions go through [ConnectionStateMachine::close] (directly or via
///  [ConnectionStateMachine::disconnect_or_close_with_error]), which performs the complete cleanup.
pub struct ConnectionStateMachine {
    mode: Mode,
    config: ConnectionConfig,
    state: ConnectionState,
    handle: ConnectionHandle,

    serializer: Option<Arc<dyn FrameSerializer>>,
    transport: Option<Box<dyn FrameTransport>>,

    streams: StreamRegistry,
    fragments: FragmentAccumulator,
    pending_output: VecDeque<Frame>,

    responder: Arc<dyn RequestResponder>,
    events: Arc<dyn ConnectionEvents>,
    resume_manager: Arc<dyn ResumeManager>,
    cold_resume_handler: Option<Arc<dyn ColdResumeHandler>>,

    resumable: bool,
    resume_token: ResumeToken,
    resume_callback: Option<Box<dyn ClientResumeStatusCallback>>,
    cold_resume_in_progress: bool,
    disconnected_since: Option<Instant>,
    max_lifetime: Duration,

    keepalive_timer: Option<Box<dyn KeepaliveTimer>>,
    keepalive_interval: Duration,
    awaiting_keepalive_response: bool,

    received_lease: Option<FrameLease>,
}

impl ConnectionStateMachine {
    /// `keepalive_timer` is only used by clients: servers answer keepalives, they do not send them
    pub fn new(context: ConnectionContext, handle: ConnectionHandle, keepalive_timer: Option<Box<dyn KeepaliveTimer>>) -> ConnectionStateMachine {
        ConnectionStateMachine {
            mode: context.mode,
            state: ConnectionState::Disconnected,
            handle,
            serializer: None,
            transport: None,
            streams: StreamRegistry::new(context.mode),
            fragments: FragmentAccumulator::new(context.config.max_reassembled_payload_len),
            pending_output: Default::default(),
            responder: context.responder,
            events: context.events,
            resume_manager: context.resume_manager,
            cold_resume_handler: context.cold_resume_handler,
            resumable: false,
            resume_token: ResumeToken::empty(),
            resume_callback: None,
            cold_resume_in_progress: false,
            disconnected_since: None,
            max_lifetime: context.config.max_lifetime,
            keepalive_timer: if context.mode.is_client() { keepalive_timer } else { None },
            keepalive_interval: context.config.keepalive_interval,
            awaiting_keepalive_response: false,
            received_lease: None,
            config: context.config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    /// `true` exactly while output must be buffered until the connection is (re)established
    pub fn should_queue(&self) -> bool {
        matches!(self.state, ConnectionState::Disconnected | ConnectionState::Resuming)
    }

    pub fn current_transport_id(&self) -> Option<TransportId> {
        self.transport.as_ref()
            .map(|t| t.transport_id())
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.serializer.as_ref()
            .map(|s| s.protocol_version())
    }

    /// when a resumable session lost its transport, if it is currently disconnected
    pub fn disconnected_since(&self) -> Option<Instant> {
        self.disconnected_since
    }

    /// how long a disconnected session waits for resumption
    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    pub fn received_lease(&self) -> Option<&FrameLease> {
        self.received_lease.as_ref()
    }

    pub fn has_stream(&self, stream_id: StreamId) -> bool {
        self.streams.contains(stream_id)
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn num_pending_frames(&self) -> usize {
        self.pending_output.len()
    }

    fn writer(&self) -> Arc<dyn StreamsWriter> {
        Arc::new(self.handle.clone())
    }

    // ------------------------------------------------------------------------------------------
    // establishing

    pub fn connect_server(&mut self, transport: Box<dyn FrameTransport>, params: SetupParameters) {
        if self.state != ConnectionState::Disconnected {
            warn!("SETUP for a connection in state {:?}, closing the new transport", self.state);
            transport.close();
            return;
        }

        let serializer = match serializer_for(params.version) {
            Some(s) => s,
            None => {
                self.reject_setup(transport, FrameError::unsupported_setup(format!("unsupported protocol version {}", params.version)));
                return;
            }
        };
        self.serializer = Some(serializer);

        if params.resumable && params.token.is_empty() {
            self.reject_setup(transport, FrameError::invalid_setup("resumable SETUP without resume token"));
            return;
        }
        if params.keepalive_interval.is_zero() || params.max_lifetime.is_zero() {
            self.reject_setup(transport, FrameError::invalid_setup("keepalive interval and max lifetime must be positive"));
            return;
        }

        info!("accepted SETUP (version {}, resumable: {})", params.version, params.resumable);
        self.resumable = params.resumable;
        self.resume_token = params.token;
        self.max_lifetime = params.max_lifetime;
        self.attach_transport(transport);
        self.on_connected();
    }

    fn reject_setup(&mut self, transport: Box<dyn FrameTransport>, error: FrameError) {
        if self.serializer.is_none() {
            self.serializer = Some(Arc::new(V1Serializer));
        }
        self.attach_transport(transport);
        self.close_with_error(error);
    }

    pub fn connect_client(&mut self, transport: Box<dyn FrameTransport>, params: SetupParameters) -> anyhow::Result<()> {
        if self.state != ConnectionState::Disconnected {
            transport.close();
            bail!("can not connect in state {:?}", self.state);
        }
        let serializer = match serializer_for(params.version) {
            Some(s) => s,
            None => {
                transport.close();
                bail!("unsupported protocol version {}", params.version);
            }
        };

        self.serializer = Some(serializer);
        self.resumable = params.resumable;
        self.resume_token = params.token.clone();
        self.keepalive_interval = params.keepalive_interval;
        self.max_lifetime = params.max_lifetime;
        self.attach_transport(transport);
        self.state = ConnectionState::Connecting;

        if let Err(e) = self.write_to_transport(&params.to_frame().into()) {
            let reason = format!("sending SETUP failed: {}", e);
            self.close(&reason, StreamCompletionSignal::SocketClosed);
            bail!(reason);
        }

        debug!("sent SETUP (version {}, resumable: {})", params.version, params.resumable);
        self.on_connected();
        Ok(())
    }

    fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.disconnected_since = None;
        self.events.on_connected();
        self.start_keepalive();
        self.send_pending_frames();
    }

    pub fn resume_client(&mut self, token: ResumeToken, transport: Box<dyn FrameTransport>, callback: Box<dyn ClientResumeStatusCallback>, version: ProtocolVersion) {
        if self.state == ConnectionState::Connected {
            self.disconnect("resuming on a new transport");
        }
        if self.state != ConnectionState::Disconnected {
            transport.close();
            callback.on_resume_error(anyhow!("can not resume in state {:?}", self.state));
            return;
        }
        let serializer = match serializer_for(version) {
            Some(s) => s,
            None => {
                transport.close();
                callback.on_resume_error(anyhow!("unsupported protocol version {}", version));
                return;
            }
        };

        self.serializer = Some(serializer);
        self.resumable = true;
        self.resume_token = token.clone();
        self.cold_resume_in_progress = self.streams.is_empty() && !self.resume_manager.stream_resume_infos().is_empty();
        self.attach_transport(transport);
        self.state = ConnectionState::Resuming;
        self.resume_callback = Some(callback);

        let frame = FrameResume::new(version, token, self.resume_manager.implied_position(), self.resume_manager.first_sent_position());
        debug!("sending RESUME (received up to {}, cold: {})", frame.last_received_server_position, self.cold_resume_in_progress);
        if let Err(e) = self.write_to_transport(&frame.into()) {
            self.on_transport_terminated(Some(format!("sending RESUME failed: {}", e)));
        }
    }

    fn handle_resume_ok(&mut self, frame: FrameResumeOk) {
        if self.state != ConnectionState::Resuming || self.mode == Mode::Server {
            self.close_with_error(FrameError::connection_error("unexpected RESUME_OK"));
            return;
        }

        if self.cold_resume_in_progress {
            self.restore_cold_streams();
        }
        else if !self.resume_manager.is_position_available(frame.position) {
            self.close_with_error(FrameError::connection_error(format!("client can not resume, server requested unavailable position {}", frame.position)));
            return;
        }
        self.cold_resume_in_progress = false;

        info!("resumed from position {}", frame.position);
        self.resume_from_position(frame.position);
    }

    fn restore_cold_streams(&mut self) {
        let handler = match &self.cold_resume_handler {
            Some(h) => h.clone(),
            None => {
                warn!("cold resumption without a cold resume handler, dropping persisted streams");
                return;
            }
        };

        for info in self.resume_manager.stream_resume_infos() {
            match handler.resume_stream(&info, self.writer()) {
                Some(stream) => {
                    debug!("restored stream {} ({:?})", info.stream_id, info.stream_type);
                    if let Err(e) = self.streams.insert(info.stream_id, stream, info.stream_type) {
                        warn!("{}", e);
                    }
                }
                None => {
                    debug!("stream {} is not resumed", info.stream_id);
                    self.resume_manager.on_stream_closed(info.stream_id);
                }
            }
        }
        self.streams.continue_after(self.resume_manager.largest_used_stream_id());
    }

    /// Server side resumption on a new transport. Returns `false` if the resumption was rejected;
    ///  the session is left unchanged then.
    pub fn resume_server(&mut self, transport: Box<dyn FrameTransport>, params: ResumeParameters) -> bool {
        if let Err(reason) = self.check_resumable(&params) {
            debug!("rejecting RESUME: {}", reason);
            Self::reject_resume(transport, params.version, reason);
            return false;
        }

        if matches!(self.state, ConnectionState::Connected | ConnectionState::Connecting) {
            self.disconnect("resumed on a new transport");
        }
        self.attach_transport(transport);

        let implied_position = self.resume_manager.implied_position();
        if let Err(e) = self.write_to_transport(&FrameResumeOk::new(implied_position).into()) {
            self.on_transport_terminated(Some(format!("sending RESUME_OK failed: {}", e)));
            return false;
        }

        info!("resumed from position {}", params.server_position);
        self.resume_from_position(params.server_position);
        true
    }

    fn check_resumable(&self, params: &ResumeParameters) -> Result<(), String> {
        if self.is_closed() {
            return Err("session is closed".to_string());
        }
        if !self.resumable {
            return Err("session is not resumable".to_string());
        }
        if params.token != self.resume_token {
            return Err("unknown resume token".to_string());
        }
        if self.protocol_version() != Some(params.version) {
            return Err(format!("session does not use protocol version {}", params.version));
        }
        let implied_position = self.resume_manager.implied_position();
        if params.client_position > implied_position {
            return Err(format!("client can replay from {} but server received up to {}", params.client_position, implied_position));
        }
        if !self.resume_manager.is_position_available(params.server_position) {
            return Err(format!("position {} is not available", params.server_position));
        }
        Ok(())
    }

    fn reject_resume(transport: Box<dyn FrameTransport>, version: ProtocolVersion, reason: String) {
        let serializer = serializer_for(version)
            .unwrap_or_else(|| Arc::new(V1Serializer));
        let frame: Frame = FrameError::rejected_resume(reason).into();
        if let Err(e) = transport.output_frame(serializer.serialize(&frame)) {
            debug!("sending REJECTED_RESUME failed: {}", e);
        }
        transport.close();
    }

    fn resume_from_position(&mut self, position: ResumePosition) {
        self.resume_manager.reset_up_to_position(position);
        self.state = ConnectionState::Connected;
        self.disconnected_since = None;

        if let Some(callback) = self.resume_callback.take() {
            callback.on_resume_ok();
        }

        for frame in self.resume_manager.frames_to_resend(position) {
            trace!("resending {} bytes", frame.len());
            let result = match &self.transport {
                Some(transport) => transport.output_frame(frame),
                None => Err(anyhow!("no transport attached")),
            };
            if let Err(e) = result {
                self.on_transport_terminated(Some(format!("resending frames failed: {}", e)));
                return;
            }
        }

        self.events.on_streams_resumed();
        self.start_keepalive();
        self.send_pending_frames();
    }

    // ------------------------------------------------------------------------------------------
    // terminating

    /// Detaches the transport of a resumable session, preserving its streams. Closes a
    ///  non-resumable connection.
    pub fn disconnect(&mut self, reason: &str) {
        if !self.resumable {
            self.close(reason, StreamCompletionSignal::ConnectionEnd);
            return;
        }
        if matches!(self.state, ConnectionState::Disconnected | ConnectionState::Closed) {
            return;
        }

        info!("disconnected: {}", reason);
        self.events.on_disconnected(reason);
        self.close_transport();
        self.state = ConnectionState::Disconnected;
        self.disconnected_since = Some(Instant::now());

        if let Some(callback) = self.resume_callback.take() {
            callback.on_resume_error(anyhow!("disconnected during resumption: {}", reason));
        }
        self.events.on_streams_paused();
    }

    /// Terminal. Every registered stream receives `signal` exactly once. Idempotent.
    pub fn close(&mut self, reason: &str, signal: StreamCompletionSignal) {
        if self.is_closed() {
            return;
        }
        info!("closing connection: {}", reason);
        self.state = ConnectionState::Closed;
        self.disconnected_since = None;

        if let Some(callback) = self.resume_callback.take() {
            callback.on_resume_error(anyhow!("connection closed: {}", reason));
        }

        self.fragments.clear();
        self.pending_output.clear();

        for (stream_id, elem) in self.streams.drain() {
            trace!("ending stream {} with {:?}", stream_id, signal);
            elem.handle.end_stream(signal);
        }

        self.close_transport();
        self.events.on_closed(reason);
    }

    /// Sends the ERROR frame if a transport is attached, then closes
    pub fn close_with_error(&mut self, error: FrameError) {
        if self.is_closed() {
            return;
        }
        let reason = error.message_str().into_owned();
        warn!("closing connection with {:?}: {}", error.error_code, reason);

        let signal = StreamCompletionSignal::for_error_code(error.error_code);
        if self.transport.is_some() {
            if let Err(e) = self.write_to_transport(&error.into()) {
                debug!("sending ERROR failed: {}", e);
            }
        }
        self.close(&reason, signal);
    }

    pub fn disconnect_or_close_with_error(&mut self, error: FrameError) {
        if self.resumable {
            self.disconnect(&error.message_str());
        }
        else {
            self.close_with_error(error);
        }
    }

    /// The current transport failed (`error`) or ended
    pub fn on_transport_terminated(&mut self, error: Option<String>) {
        if self.resumable {
            self.disconnect(error.as_deref().unwrap_or("transport closed"));
        }
        else {
            match error {
                Some(e) => self.close(&e, StreamCompletionSignal::ConnectionError),
                None => self.close("transport closed", StreamCompletionSignal::ConnectionEnd),
            }
        }
    }

    fn attach_transport(&mut self, transport: Box<dyn FrameTransport>) {
        debug!("attaching {}", transport.transport_id());
        if let Some(previous) = self.transport.replace(transport) {
            previous.close();
        }
    }

    fn close_transport(&mut self) {
        self.stop_keepalive();
        if let Some(transport) = self.transport.take() {
            debug!("closing {}", transport.transport_id());
            transport.close();
        }
    }

    // ------------------------------------------------------------------------------------------
    // streams

    /// Registers a stream created by higher level logic. No frame is sent.
    pub fn add_stream(&mut self, stream_id: StreamId, stream: Arc<dyn StreamStateMachine>, stream_type: StreamType) -> anyhow::Result<()> {
        self.register_stream(stream_id, stream, stream_type, 0)
    }

    fn register_stream(&mut self, stream_id: StreamId, stream: Arc<dyn StreamStateMachine>, stream_type: StreamType, initial_request_n: u32) -> anyhow::Result<()> {
        if self.is_closed() {
            bail!("connection is closed");
        }
        self.streams.insert(stream_id, stream, stream_type)?;
        self.resume_manager.on_stream_open(stream_id, stream_type, initial_request_n);
        Ok(())
    }

    pub fn next_stream_id(&mut self) -> anyhow::Result<StreamId> {
        self.streams.next_stream_id()
    }

    /// Allocates an id, registers the stream created by `factory` and sends its opening frame
    pub fn open_stream(&mut self, stream_type: StreamType, initial_request_n: u32, payload: Payload, factory: StreamFactory) -> anyhow::Result<StreamId> {
        if self.is_closed() {
            bail!("connection is closed");
        }
        if stream_type == StreamType::FireAndForget {
            bail!("fire-and-forget requests do not open a stream");
        }
        let stream_id = self.next_stream_id()?;
        self.register_stream(stream_id, factory(stream_id), stream_type, initial_request_n)?;
        self.write_new_stream(stream_id, stream_type, initial_request_n, payload);
        Ok(stream_id)
    }

    pub fn fire_and_forget(&mut self, payload: Payload) -> anyhow::Result<StreamId> {
        if self.is_closed() {
            bail!("connection is closed");
        }
        let stream_id = self.next_stream_id()?;
        self.write_new_stream(stream_id, StreamType::FireAndForget, 0, payload);
        Ok(stream_id)
    }

    pub fn write_new_stream(&mut self, stream_id: StreamId, stream_type: StreamType, initial_request_n: u32, payload: Payload) {
        let flags = FrameFlags::empty();
        let frame: Frame = match stream_type {
            StreamType::RequestResponse => FrameRequestResponse::new(stream_id, flags, payload).into(),
            StreamType::Stream => FrameRequestStream::new(stream_id, flags, initial_request_n, payload).into(),
            StreamType::Channel => FrameRequestChannel::new(stream_id, flags, initial_request_n, payload).into(),
            StreamType::FireAndForget => FrameRequestFnf::new(stream_id, flags, payload).into(),
        };
        self.output_frame(frame);
    }

    pub fn on_stream_closed(&mut self, stream_id: StreamId) {
        if self.streams.remove(stream_id) {
            trace!("stream {} closed", stream_id);
            self.resume_manager.on_stream_closed(stream_id);
        }
    }

    pub fn metadata_push(&mut self, metadata: Bytes) {
        self.output_frame(FrameMetadataPush::new(metadata).into());
    }

    pub fn send_lease(&mut self, ttl_ms: u32, number_of_requests: u32, metadata: Option<Bytes>) {
        self.output_frame(FrameLease::new(ttl_ms, number_of_requests, metadata).into());
    }

    // ------------------------------------------------------------------------------------------
    // output

    /// The single outbound path: writes the frame, or queues it while the connection is not
    ///  established
    pub fn output_frame(&mut self, frame: Frame) {
        if self.is_closed() {
            debug!("connection is closed, dropping {}", frame);
            return;
        }

        if self.should_queue() {
            if self.pending_output.len() >= self.config.max_pending_output_frames {
                self.close_with_error(FrameError::connection_error("too many frames queued while disconnected"));
                return;
            }
            trace!("queueing {}", frame);
            self.pending_output.push_back(frame);
            return;
        }

        if let Err(e) = self.write_to_transport(&frame) {
            self.on_transport_terminated(Some(e.to_string()));
        }
    }

    /// Writes queued frames in submission order
    pub fn send_pending_frames(&mut self) {
        if !self.pending_output.is_empty() {
            debug!("sending {} queued frames", self.pending_output.len());
        }
        while self.state == ConnectionState::Connected {
            let frame = match self.pending_output.pop_front() {
                Some(f) => f,
                None => break,
            };
            if let Err(e) = self.write_to_transport(&frame) {
                self.on_transport_terminated(Some(e.to_string()));
            }
        }
    }

    fn write_to_transport(&self, frame: &Frame) -> anyhow::Result<()> {
        let serializer = match &self.serializer {
            Some(s) => s,
            None => bail!("no protocol version negotiated"),
        };
        let transport = match &self.transport {
            Some(t) => t,
            None => bail!("no transport attached"),
        };

        let bytes = serializer.serialize(frame);
        trace!("sending {}", frame);
        if self.resumable {
            self.resume_manager.track_sent_frame(&bytes, frame.frame_type(), frame.stream_id());
        }
        transport.output_frame(bytes)
    }

    // ------------------------------------------------------------------------------------------
    // keepalive

    fn start_keepalive(&mut self) {
        self.awaiting_keepalive_response = false;
        if let Some(timer) = self.keepalive_timer.as_mut() {
            let handle = self.handle.clone();
            timer.start(self.keepalive_interval, Box::new(move || handle.keepalive_tick()));
        }
    }

    fn stop_keepalive(&mut self) {
        self.awaiting_keepalive_response = false;
        if let Some(timer) = self.keepalive_timer.as_mut() {
            timer.stop();
        }
    }

    pub fn on_keepalive_tick(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        if self.awaiting_keepalive_response {
            self.disconnect_or_close_with_error(FrameError::connection_error("no response to keepalive"));
            return;
        }
        self.awaiting_keepalive_response = true;
        self.send_keepalive(Bytes::new());
    }

    /// sends a KEEPALIVE the peer must answer
    pub fn send_keepalive(&mut self, data: Bytes) {
        self.send_keepalive_with_flags(FrameFlags::RESPOND, data);
    }

    pub fn send_keepalive_with_flags(&mut self, flags: FrameFlags, data: Bytes) {
        if self.state != ConnectionState::Connected {
            trace!("not connected, skipping KEEPALIVE");
            return;
        }
        let frame = FrameKeepalive::new(flags, self.resume_manager.implied_position(), data);
        if let Err(e) = self.write_to_transport(&frame.into()) {
            self.on_transport_terminated(Some(e.to_string()));
        }
    }

    fn handle_keepalive(&mut self, frame: FrameKeepalive) {
        let respond = frame.header.has(FrameFlags::RESPOND);
        match self.mode {
            Mode::Server => {
                if !respond {
                    self.close_with_error(FrameError::connection_error("keepalive without RESPOND flag"));
                    return;
                }
                self.send_keepalive_with_flags(FrameFlags::empty(), frame.data);
            }
            Mode::Client => {
                if respond {
                    self.close_with_error(FrameError::connection_error("client received keepalive with RESPOND flag"));
                    return;
                }
                self.awaiting_keepalive_response = false;
            }
        }

        if self.resumable {
            self.resume_manager.reset_up_to_position(frame.position);
        }
    }

    // ------------------------------------------------------------------------------------------
    // input

    /// Decodes and dispatches an inbound frame from the current transport
    pub fn process_frame(&mut self, buf: Bytes) {
        if self.is_closed() {
            trace!("connection is closed, dropping inbound frame");
            return;
        }

        if self.serializer.is_none() {
            match detect_protocol_version(&buf).and_then(serializer_for) {
                Some(s) => {
                    debug!("detected protocol version {}", s.protocol_version());
                    self.serializer = Some(s);
                }
                None => {
                    self.disconnect_or_close_with_error(FrameError::connection_error("Invalid frame"));
                    return;
                }
            }
        }
        let serializer = match &self.serializer {
            Some(s) => s.clone(),
            None => return,
        };

        let len = buf.len();
        let frame = match serializer.deserialize(buf) {
            Ok(f) => f,
            Err(e) if e.is_ignorable() => {
                debug!("ignoring frame: {}", e);
                return;
            }
            Err(e) => {
                warn!("invalid frame: {}", e);
                self.disconnect_or_close_with_error(FrameError::connection_error("Invalid frame"));
                return;
            }
        };

        trace!("received {}", frame);
        if self.resumable {
            self.resume_manager.track_received_frame(len, frame.frame_type(), frame.stream_id());
        }

        let stream_id = frame.stream_id();
        if stream_id.is_connection() {
            self.handle_connection_frame(frame);
        }
        else {
            self.handle_stream_frame(stream_id, frame);
        }
    }

    fn handle_connection_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Keepalive(f) => self.handle_keepalive(f),
            Frame::MetadataPush(f) => self.responder.handle_metadata_push(f.metadata),
            Frame::ResumeOk(f) => self.handle_resume_ok(f),
            Frame::Error(f) => self.handle_connection_error(f),
            Frame::Lease(f) => {
                debug!("received lease for {} requests within {}ms", f.number_of_requests, f.ttl_ms);
                self.received_lease = Some(f);
            }
            Frame::Setup(_) | Frame::Resume(_) => {
                self.close_with_error(FrameError::connection_error(format!("unexpected {:?} on an established connection", frame.frame_type())));
            }
            Frame::RequestResponse(_) | Frame::RequestFnf(_) | Frame::RequestStream(_) | Frame::RequestChannel(_)
            | Frame::RequestN(_) | Frame::Cancel(_) | Frame::Payload(_) => {
                self.disconnect_or_close_with_error(FrameError::connection_error(format!("{:?} on stream 0", frame.frame_type())));
            }
        }
    }

    fn handle_connection_error(&mut self, frame: FrameError) {
        if !frame.error_code.is_connection_scoped() {
            self.disconnect_or_close_with_error(FrameError::connection_error(format!("stream scoped error {:?} on stream 0", frame.error_code)));
            return;
        }

        let peer_error = frame.to_peer_error();
        if matches!(frame.error_code, ErrorCode::ConnectionError | ErrorCode::RejectedResume) {
            if let Some(callback) = self.resume_callback.take() {
                callback.on_resume_error(peer_error.clone().into());
            }
        }
        self.close(&peer_error.to_string(), StreamCompletionSignal::for_error_code(frame.error_code));
    }

    fn handle_stream_frame(&mut self, stream_id: StreamId, frame: Frame) {
        if let Frame::Error(f) = &frame {
            if f.error_code.is_connection_scoped() {
                self.disconnect_or_close_with_error(FrameError::connection_error(format!("connection scoped error {:?} on stream {}", f.error_code, stream_id)));
                return;
            }
        }

        if let Some(stream) = self.streams.find(stream_id) {
            stream.handle_frame(frame);
            return;
        }

        if self.fragments.contains(stream_id) {
            match frame {
                Frame::Payload(_) => self.accumulate(stream_id, frame),
                Frame::Cancel(_) | Frame::Error(_) => {
                    debug!("stream {}: request canceled before it was complete", stream_id);
                    self.fragments.discard(stream_id);
                }
                other => self.disconnect_or_close_with_error(FrameError::connection_error(format!("{:?} for partially received request on stream {}", other.frame_type(), stream_id))),
            }
            return;
        }

        self.handle_unknown_stream(stream_id, frame);
    }

    fn handle_unknown_stream(&mut self, stream_id: StreamId, frame: Frame) {
        match frame {
            Frame::RequestResponse(_) | Frame::RequestFnf(_) | Frame::RequestStream(_) | Frame::RequestChannel(_) => {
                if self.streams.is_local_stream_id(stream_id) {
                    self.disconnect_or_close_with_error(FrameError::connection_error(format!("invalid stream id {} for a peer initiated stream", stream_id)));
                    return;
                }
                if !self.streams.register_new_peer_stream_id(stream_id) {
                    debug!("ignoring {:?} for stale stream id {}", frame.frame_type(), stream_id);
                    return;
                }
                self.accumulate(stream_id, frame);
            }
            Frame::Payload(_) | Frame::RequestN(_) | Frame::Cancel(_) | Frame::Error(_) => {
                trace!("ignoring {:?} for unknown stream {}", frame.frame_type(), stream_id);
            }
            Frame::Setup(_) | Frame::Lease(_) | Frame::Keepalive(_) | Frame::MetadataPush(_) | Frame::Resume(_) | Frame::ResumeOk(_) => {
                self.disconnect_or_close_with_error(FrameError::connection_error(format!("{:?} must be sent on stream 0, was {}", frame.frame_type(), stream_id)));
            }
        }
    }

    fn accumulate(&mut self, stream_id: StreamId, frame: Frame) {
        match self.fragments.accept(stream_id, frame) {
            AccumulatorResult::Complete(request) => self.create_peer_stream(request),
            AccumulatorResult::Incomplete => {}
            AccumulatorResult::Rejected(reason) => self.disconnect_or_close_with_error(FrameError::connection_error(reason)),
        }
    }

    fn create_peer_stream(&mut self, request: StreamRequest) {
        if request.stream_type == StreamType::FireAndForget {
            self.responder.handle_fire_and_forget(request.stream_id, request.payload);
            return;
        }

        let stream_id = request.stream_id;
        let stream_type = request.stream_type;
        let initial_request_n = request.initial_request_n;
        debug!("peer opened stream {} ({:?})", stream_id, stream_type);

        let stream = self.responder.create_stream(request, self.writer());
        if let Err(e) = self.register_stream(stream_id, stream, stream_type, initial_request_n) {
            self.disconnect_or_close_with_error(FrameError::connection_error(e.to_string()));
        }
    }
}

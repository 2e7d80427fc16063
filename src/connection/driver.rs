use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, span, trace, warn, Instrument, Level};

use crate::connection::connection_events::OneshotResumeCallback;
use crate::connection::connection_set::ConnectionSet;
use crate::connection::handle::{ConnectionCommand, ConnectionHandle};
use crate::connection::keepalive_timer::{KeepaliveTimer, TokioKeepaliveTimer};
use crate::connection::parameters::SetupParameters;
use crate::connection::state_machine::{ConnectionContext, ConnectionStateMachine};
use crate::frame::protocol_version::{ProtocolVersion, ResumeToken};
use crate::streams::stream_state_machine::StreamCompletionSignal;
use crate::transport::framed::FramedTransport;

/// Spawns the driver task for a new connection and returns the handle to it. The connection
///  removes itself from `connection_set` when it terminates.
pub fn spawn_connection(context: ConnectionContext, connection_set: Option<Arc<ConnectionSet>>) -> ConnectionHandle {
    let (handle, commands) = ConnectionHandle::new();

    let keepalive_timer: Option<Box<dyn KeepaliveTimer>> = if context.mode.is_client() {
        Some(Box::new(TokioKeepaliveTimer::new()))
    }
    else {
        None
    };
    let state_machine = ConnectionStateMachine::new(context, handle.clone(), keepalive_timer);

    let span = span!(Level::INFO, "connection", id = %handle.id());
    tokio::spawn(run_connection(state_machine, commands, handle.clone(), connection_set).instrument(span));
    handle
}

async fn run_connection(mut state_machine: ConnectionStateMachine, mut commands: mpsc::UnboundedReceiver<ConnectionCommand>, handle: ConnectionHandle, connection_set: Option<Arc<ConnectionSet>>) {
    debug!("connection started");

    while !state_machine.is_closed() {
        let resumption_deadline = state_machine.disconnected_since()
            .map(|since| since + state_machine.max_lifetime());

        select! {
            command = commands.recv() => {
                match command {
                    Some(command) => handle_command(&mut state_machine, command),
                    None => break,
                }
            }
            _ = sleep_until(resumption_deadline) => {
                warn!("not resumed within {:?}", state_machine.max_lifetime());
                state_machine.close("resumption timed out", StreamCompletionSignal::ConnectionError);
            }
        }
    }

    // answer the requests that are still queued, they all fail on a closed connection
    commands.close();
    while let Ok(command) = commands.try_recv() {
        handle_command(&mut state_machine, command);
    }

    if let Some(connection_set) = connection_set {
        connection_set.remove(handle.id()).await;
    }
    debug!("connection terminated");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn handle_command(state_machine: &mut ConnectionStateMachine, command: ConnectionCommand) {
    trace!("command: {:?}", command);

    match command {
        ConnectionCommand::Inbound { transport_id, frame } => {
            if state_machine.current_transport_id() == Some(transport_id) {
                state_machine.process_frame(frame);
            }
            else {
                trace!("dropping frame from detached {}", transport_id);
            }
        }
        ConnectionCommand::TransportTerminated { transport_id, error } => {
            if state_machine.current_transport_id() == Some(transport_id) {
                state_machine.on_transport_terminated(error);
            }
            else {
                trace!("ignoring termination of detached {}", transport_id);
            }
        }
        ConnectionCommand::ConnectClient { transport, params, reply } => {
            let _ = reply.send(state_machine.connect_client(transport, params));
        }
        ConnectionCommand::ConnectServer { transport, params } => {
            state_machine.connect_server(transport, params);
        }
        ConnectionCommand::ResumeClient { transport, token, version, callback } => {
            state_machine.resume_client(token, transport, callback, version);
        }
        ConnectionCommand::ResumeServer { transport, params, reply } => {
            let _ = reply.send(state_machine.resume_server(transport, params));
        }
        ConnectionCommand::OpenStream { stream_type, initial_request_n, payload, factory, reply } => {
            let _ = reply.send(state_machine.open_stream(stream_type, initial_request_n, payload, factory));
        }
        ConnectionCommand::FireAndForget { payload, reply } => {
            let _ = reply.send(state_machine.fire_and_forget(payload));
        }
        ConnectionCommand::MetadataPush(metadata) => state_machine.metadata_push(metadata),
        ConnectionCommand::SendLease { ttl_ms, number_of_requests, metadata } => {
            state_machine.send_lease(ttl_ms, number_of_requests, metadata);
        }
        ConnectionCommand::WriteFrame(frame) => state_machine.output_frame(frame),
        ConnectionCommand::WriteNewStream { stream_id, stream_type, initial_request_n, payload } => {
            state_machine.write_new_stream(stream_id, stream_type, initial_request_n, payload);
        }
        ConnectionCommand::StreamClosed(stream_id) => state_machine.on_stream_closed(stream_id),
        ConnectionCommand::KeepaliveTick => state_machine.on_keepalive_tick(),
        ConnectionCommand::QueryState(reply) => {
            let _ = reply.send(state_machine.state());
        }
        ConnectionCommand::Disconnect(reason) => state_machine.disconnect(&reason),
        ConnectionCommand::Close(reason) => state_machine.close(&reason, StreamCompletionSignal::ConnectionEnd),
        ConnectionCommand::CloseWithError(error) => state_machine.close_with_error(error),
    }
}


/// Establishes a client connection over a byte stream: spawns the connection, sends SETUP and
///  starts reading.
pub async fn connect_client<R, W>(reader: R, writer: W, context: ConnectionContext, params: SetupParameters) -> anyhow::Result<ConnectionHandle>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let handle = spawn_connection(context, None);
    let (transport, gate) = FramedTransport::spawn(reader, writer, Arc::new(handle.clone()));

    handle.connect_client(Box::new(transport), params).await?;
    gate.open();
    Ok(handle)
}

/// Resumes a client session over a new byte stream. Returns after the server accepted or
///  rejected the resumption.
pub async fn resume_client<R, W>(handle: &ConnectionHandle, reader: R, writer: W, token: ResumeToken, version: ProtocolVersion) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (transport, gate) = FramedTransport::spawn(reader, writer, Arc::new(handle.clone()));
    let (callback, result) = OneshotResumeCallback::new();

    handle.resume_client(Box::new(transport), token, version, Box::new(callback));
    gate.open();
    OneshotResumeCallback::wait(result).await
}

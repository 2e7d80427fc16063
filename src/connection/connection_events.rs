use anyhow::anyhow;
#[cfg(test)] use mockall::automock;
use tokio::sync::{broadcast, oneshot};
use tracing::trace;

/// Lifecycle notifications of a connection. Called on the connection's driver task, so
///  implementations must not block.
#[cfg_attr(test, automock)]
pub trait ConnectionEvents: Send + Sync {
    fn on_connected(&self);

    /// The transport was lost, but the session can be resumed
    fn on_disconnected(&self, reason: &str);

    /// Terminal, called exactly once per connection
    fn on_closed(&self, reason: &str);

    fn on_streams_paused(&self);
    fn on_streams_resumed(&self);
}


#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected(String),
    Closed(String),
    StreamsPaused,
    StreamsResumed,
}

/// [ConnectionEvents] as a broadcast of [ConnectionEvent]s
pub struct ConnectionEventNotifier {
    sender: broadcast::Sender<ConnectionEvent>,
}
impl ConnectionEventNotifier {
    pub fn new() -> ConnectionEventNotifier {
        let (sender, _) = broadcast::channel(128);

        ConnectionEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: ConnectionEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for ConnectionEventNotifier {
    fn default() -> Self {
        ConnectionEventNotifier::new()
    }
}

impl ConnectionEvents for ConnectionEventNotifier {
    fn on_connected(&self) {
        self.send_event(ConnectionEvent::Connected);
    }

    fn on_disconnected(&self, reason: &str) {
        self.send_event(ConnectionEvent::Disconnected(reason.to_string()));
    }

    fn on_closed(&self, reason: &str) {
        self.send_event(ConnectionEvent::Closed(reason.to_string()));
    }

    fn on_streams_paused(&self) {
        self.send_event(ConnectionEvent::StreamsPaused);
    }

    fn on_streams_resumed(&self) {
        self.send_event(ConnectionEvent::StreamsResumed);
    }
}


/// Completion of a client side resumption. Exactly one of the methods is called.
pub trait ClientResumeStatusCallback: Send {
    fn on_resume_ok(self: Box<Self>);

    /// `error` is a [crate::frame::error_code::PeerError] if the server rejected the resumption
    fn on_resume_error(self: Box<Self>, error: anyhow::Error);
}

/// [ClientResumeStatusCallback] that completes a future
pub struct OneshotResumeCallback {
    sender: oneshot::Sender<anyhow::Result<()>>,
}

impl OneshotResumeCallback {
    pub fn new() -> (OneshotResumeCallback, oneshot::Receiver<anyhow::Result<()>>) {
        let (sender, receiver) = oneshot::channel();
        (OneshotResumeCallback { sender }, receiver)
    }

    /// Waits for the callback's completion. A dropped callback counts as a failed resumption.
    pub async fn wait(receiver: oneshot::Receiver<anyhow::Result<()>>) -> anyhow::Result<()> {
        receiver.await
            .map_err(|_| anyhow!("connection went away during resumption"))?
    }
}

impl ClientResumeStatusCallback for OneshotResumeCallback {
    fn on_resume_ok(self: Box<Self>) {
        let _ = self.sender.send(Ok(()));
    }

    fn on_resume_error(self: Box<Self>, error: anyhow::Error) {
        let _ = self.sender.send(Err(error));
    }
}

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::connection::connection_events::{ClientResumeStatusCallback, ConnectionEvent, ConnectionEvents};
use crate::connection::keepalive_timer::KeepaliveTimer;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock()
        .unwrap_or_else(|e| e.into_inner())
}


/// [ConnectionEvents] that records events in the order they were raised
#[derive(Default)]
pub struct TrackingConnectionEvents {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl TrackingConnectionEvents {
    pub fn new() -> Arc<TrackingConnectionEvents> {
        Default::default()
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        lock(&self.events).clone()
    }

    pub fn closed_count(&self) -> usize {
        lock(&self.events).iter()
            .filter(|e| matches!(e, ConnectionEvent::Closed(_)))
            .count()
    }
}

impl ConnectionEvents for TrackingConnectionEvents {
    fn on_connected(&self) {
        lock(&self.events).push(ConnectionEvent::Connected);
    }

    fn on_disconnected(&self, reason: &str) {
        lock(&self.events).push(ConnectionEvent::Disconnected(reason.to_string()));
    }

    fn on_closed(&self, reason: &str) {
        lock(&self.events).push(ConnectionEvent::Closed(reason.to_string()));
    }

    fn on_streams_paused(&self) {
        lock(&self.events).push(ConnectionEvent::StreamsPaused);
    }

    fn on_streams_resumed(&self) {
        lock(&self.events).push(ConnectionEvent::StreamsResumed);
    }
}


/// Outcomes of a [RecordingResumeCallback]: `Ok` for success, the error message otherwise
#[derive(Clone, Default)]
pub struct ResumeOutcomes(Arc<Mutex<Vec<Result<(), String>>>>);

impl ResumeOutcomes {
    pub fn get(&self) -> Vec<Result<(), String>> {
        lock(&self.0).clone()
    }
}

pub struct RecordingResumeCallback {
    outcomes: ResumeOutcomes,
}

impl RecordingResumeCallback {
    pub fn new() -> (Box<RecordingResumeCallback>, ResumeOutcomes) {
        let outcomes = ResumeOutcomes::default();
        (Box::new(RecordingResumeCallback { outcomes: outcomes.clone() }), outcomes)
    }
}

impl ClientResumeStatusCallback for RecordingResumeCallback {
    fn on_resume_ok(self: Box<Self>) {
        lock(&self.outcomes.0).push(Ok(()));
    }

    fn on_resume_error(self: Box<Self>, error: anyhow::Error) {
        lock(&self.outcomes.0).push(Err(error.to_string()));
    }
}


#[derive(Default)]
struct ManualTimerState {
    interval: Option<Duration>,
    on_tick: Option<Arc<dyn Fn() + Send + Sync>>,
    num_starts: usize,
}

/// [KeepaliveTimer] that ticks only when a test calls [ManualKeepaliveTimer::fire]. Clones share
///  their state.
#[derive(Clone, Default)]
pub struct ManualKeepaliveTimer {
    state: Arc<Mutex<ManualTimerState>>,
}

impl ManualKeepaliveTimer {
    pub fn new() -> ManualKeepaliveTimer {
        Default::default()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).on_tick.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        lock(&self.state).interval
    }

    pub fn num_starts(&self) -> usize {
        lock(&self.state).num_starts
    }

    /// Invokes the tick callback if the timer is running. Returns `false` otherwise.
    pub fn fire(&self) -> bool {
        let on_tick = lock(&self.state).on_tick.clone();
        match on_tick {
            Some(on_tick) => {
                on_tick();
                true
            }
            None => false,
        }
    }
}

impl KeepaliveTimer for ManualKeepaliveTimer {
    fn start(&mut self, interval: Duration, on_tick: Box<dyn Fn() + Send + Sync>) {
        let mut state = lock(&self.state);
        state.interval = Some(interval);
        state.on_tick = Some(Arc::from(on_tick));
        state.num_starts += 1;
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        state.interval = None;
        state.on_tick = None;
    }
}

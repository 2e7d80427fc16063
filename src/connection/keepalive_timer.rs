use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

/// Periodically triggers the connection's keepalive logic while it is connected
pub trait KeepaliveTimer: Send {
    /// (Re)starts the timer. The first tick happens one `interval` after the call.
    fn start(&mut self, interval: Duration, on_tick: Box<dyn Fn() + Send + Sync>);

    fn stop(&mut self);
}


#[derive(Default)]
pub struct TokioKeepaliveTimer {
    task: Option<JoinHandle<()>>,
}

impl TokioKeepaliveTimer {
    pub fn new() -> TokioKeepaliveTimer {
        Default::default()
    }
}

impl KeepaliveTimer for TokioKeepaliveTimer {
    fn start(&mut self, interval: Duration, on_tick: Box<dyn Fn() + Send + Sync>) {
        self.stop();
        trace!("starting keepalive timer with interval {:?}", interval);

        self.task = Some(tokio::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                on_tick();
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            trace!("stopping keepalive timer");
            task.abort();
        }
    }
}

impl Drop for TokioKeepaliveTimer {
    fn drop(&mut self) {
        self.stop();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback() -> (Arc<AtomicUsize>, Box<dyn Fn() + Send + Sync>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let cloned = counter.clone();
        (counter, Box::new(move || { cloned.fetch_add(1, Ordering::SeqCst); }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let (counter, on_tick) = counting_callback();
        let mut timer = TokioKeepaliveTimer::new();
        timer.start(Duration::from_secs(1), on_tick);

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        timer.stop();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_timer() {
        let (first, on_first) = counting_callback();
        let (second, on_second) = counting_callback();
        let mut timer = TokioKeepaliveTimer::new();

        timer.start(Duration::from_secs(1), on_first);
        timer.start(Duration::from_secs(1), on_second);

        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timer() {
        let (counter, on_tick) = counting_callback();
        let mut timer = TokioKeepaliveTimer::new();
        timer.start(Duration::from_secs(1), on_tick);
        drop(timer);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}

//! Stop signal, heartbeat and watchdog

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::warn;

/// Create a connected stop handle and signal
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Sending side of a stop signal
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask every holder of the signal to stop
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    /// New receiver for this handle
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Whether stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of a stop signal, threaded through every suspend point
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once stop is requested. Pends forever if the handle is gone.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Derive a signal that fires when this one does or when the returned
    /// handle is used.
    pub fn child(&self) -> (StopHandle, StopSignal) {
        let (handle, signal) = stop_channel();
        let parent = self.clone();
        let forward = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.stopped() => forward.stop(),
                _ = forward.tx.closed() => {}
            }
        });
        (handle, signal)
    }

    /// Sleep for `duration` unless stopped first; returns false when stopped
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = self.stopped() => false,
        }
    }
}

/// Last time a document pass made progress
#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Heartbeat {
    /// Create a heartbeat that starts now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record progress
    pub fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last recorded progress
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Watches a heartbeat and stops the pass when it goes quiet
pub struct Watchdog {
    task: JoinHandle<Option<Duration>>,
}

impl Watchdog {
    /// Spawn a watchdog checking `heartbeat` every `period`.
    ///
    /// Fires `handle` once the heartbeat has been idle longer than
    /// `threshold`.
    pub fn spawn(
        heartbeat: Arc<Heartbeat>,
        threshold: Duration,
        period: Duration,
        handle: StopHandle,
    ) -> Self {
        let signal = handle.signal();
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let idle = heartbeat.idle();
                        if idle > threshold {
                            warn!(idle_secs = idle.as_secs(), "Pass made no progress, stopping it");
                            handle.stop();
                            return Some(idle);
                        }
                    }
                    _ = signal.stopped() => return None,
                }
            }
        });
        Self { task }
    }

    /// Stop watching; returns the idle time if the watchdog fired
    pub async fn finish(self) -> Option<Duration> {
        self.task.abort();
        self.task.await.ok().flatten()
    }
}

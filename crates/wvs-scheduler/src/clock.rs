//! A cheap monotonic clock refreshed by a background ticker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Milliseconds since the scheduler started, cached at a fixed
/// resolution so hot paths read one atomic instead of the OS clock.
#[derive(Debug, Clone)]
pub struct Clock {
    millis: Arc<AtomicU64>,
}

impl Clock {
    /// Starts the ticker task. The returned handle must be aborted when
    /// the owner shuts down.
    pub(crate) fn start(resolution: Duration) -> (Self, JoinHandle<()>) {
        let millis = Arc::new(AtomicU64::new(0));
        let clock = Self {
            millis: Arc::clone(&millis),
        };
        let origin = Instant::now();
        let ticker = tokio::spawn(async move {
            let mut interval = time::interval(resolution.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let elapsed = origin.elapsed().as_millis() as u64;
                millis.store(elapsed, Ordering::Relaxed);
            }
        });
        (clock, ticker)
    }

    /// Time since the scheduler started, accurate to the clock resolution.
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::Relaxed))
    }
}

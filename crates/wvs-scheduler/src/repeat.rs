//! Timers that feed the scheduler queue.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::time::{self, Instant};
use tracing::debug;

use crate::SchedulerHandle;

pub(crate) type RepeatFn<S> = Arc<dyn Fn(&mut S, &SchedulerHandle<S>) + Send + Sync>;

struct Shared {
    active: AtomicBool,
    stopped: Notify,
}

/// Handle to a timer registered with
/// [`SchedulerHandle::start_repeating`].
///
/// Cloning shares the same timer; stopping any clone stops it.
#[derive(Clone)]
pub struct RepeatingAction {
    name: Cow<'static, str>,
    interval: Duration,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RepeatingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatingAction")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("active", &self.is_active())
            .finish()
    }
}

impl RepeatingAction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `false` once stopped, or once a run-once action has fired.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Suppresses every future firing. A run already executing finishes;
    /// a run that is queued but has not started is skipped.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        if self.shared.active.swap(false, Ordering::AcqRel) {
            debug!(action = %self.name, "repeating action stopped");
            self.shared.stopped.notify_one();
        }
    }
}

/// Sends the run's start instant back to the timer task when dropped,
/// so a panicking run still re-arms the timer.
struct Completion {
    fired: Instant,
    tx: Option<oneshot::Sender<Instant>>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(self.fired);
        }
    }
}

pub(crate) fn start<S: Send + 'static>(
    handle: &SchedulerHandle<S>,
    name: Cow<'static, str>,
    func: RepeatFn<S>,
    initial_delay: Duration,
    interval: Duration,
) -> RepeatingAction {
    let shared = Arc::new(Shared {
        active: AtomicBool::new(true),
        stopped: Notify::new(),
    });
    let action = RepeatingAction {
        name: name.clone(),
        interval,
        shared: Arc::clone(&shared),
    };
    let handle = handle.clone();

    tokio::spawn(async move {
        let mut due = Instant::now() + initial_delay;
        loop {
            tokio::select! {
                _ = shared.stopped.notified() => break,
                _ = time::sleep_until(due) => {}
            }
            if !shared.active.load(Ordering::Acquire) {
                break;
            }

            let (done_tx, done_rx) = oneshot::channel();
            let func = Arc::clone(&func);
            let run_shared = Arc::clone(&shared);
            let queued = handle.enqueue(name.clone(), move |state, h| {
                if !run_shared.active.load(Ordering::Acquire) {
                    return;
                }
                let _completion = Completion {
                    fired: Instant::now(),
                    tx: Some(done_tx),
                };
                func(state, h);
            });
            if queued.is_err() {
                break;
            }

            // Exactly one run is outstanding until this resolves.
            let Ok(fired) = done_rx.await else {
                // Skipped because it was stopped while queued, or the
                // scheduler dropped it on shutdown.
                break;
            };
            if interval.is_zero() {
                shared.active.store(false, Ordering::Release);
                break;
            }
            due = fired + interval;
        }
    });

    action
}

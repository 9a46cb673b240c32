//! Single-owner action scheduler for the Center process.
//!
//! Every piece of shared Center state lives inside one value `S` that is
//! owned by one tokio task. Nothing else ever touches it. Network readers,
//! timers and blocking workers only *enqueue* closures; the scheduler task
//! runs them one at a time, in the order they arrived, with exclusive
//! `&mut S` access. That is the whole concurrency story: no locks, because
//! there is never a second writer.
//!
//! # Execution model
//!
//! - The queue is FIFO. A timer that becomes due is just another entry,
//!   appended at the moment it fires.
//! - Each action runs inside `catch_unwind`. A panic is logged with the
//!   action's name and the loop moves on to the next entry.
//! - An action that runs longer than
//!   [`SchedulerConfig::slow_callback`] is reported as a warning. There
//!   is no way to interrupt a running action.
//! - When the queue is empty the task parks until a producer sends.
//!
//! # Integration
//!
//! ```ignore
//! let scheduler = Scheduler::spawn(CenterContext::new(cfg), SchedulerConfig::default());
//! let handle = scheduler.handle();
//! handle.enqueue("dispatch", |ctx, _| ctx.handle_packet(...))?;
//! handle.start_repeating("pinger", Duration::ZERO, Duration::from_secs(15), |ctx, _| ctx.ping_all());
//! let ctx = scheduler.shutdown().await?;
//! ```

mod clock;
mod error;
mod repeat;

pub use clock::Clock;
pub use error::SchedulerError;
pub use repeat::RepeatingAction;

use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Actions that run longer than this are logged as slow.
    pub slow_callback: Duration,
    /// Refresh period of the cached [`Clock`].
    pub clock_resolution: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slow_callback: Duration::from_millis(100),
            clock_resolution: Duration::from_millis(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters since the scheduler started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    /// Actions that ran, including those that panicked.
    pub executed: u64,
    pub panicked: u64,
    /// Actions that exceeded the slow-callback threshold.
    pub slow: u64,
}

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    panicked: AtomicU64,
    slow: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            executed: self.executed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            slow: self.slow.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

type Action<S> = Box<dyn FnOnce(&mut S, &SchedulerHandle<S>) + Send>;

struct Job<S> {
    name: Cow<'static, str>,
    action: Action<S>,
}

struct Shared {
    closed: AtomicBool,
    shutdown: Notify,
    counters: Counters,
    clock: Clock,
}

/// Producer side of the scheduler. Cheap to clone and safe to use from
/// any task or thread, including from inside a running action.
pub struct SchedulerHandle<S> {
    tx: mpsc::UnboundedSender<Job<S>>,
    shared: Arc<Shared>,
}

impl<S> Clone for SchedulerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Send + 'static> SchedulerHandle<S> {
    /// Appends an action to the queue.
    ///
    /// Fails only when the scheduler has shut down. The caller learns
    /// nothing about how the action went; failures stay inside the loop.
    pub fn enqueue<F>(&self, name: impl Into<Cow<'static, str>>, action: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut S, &SchedulerHandle<S>) + Send + 'static,
    {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::Closed);
        }
        self.tx
            .send(Job {
                name: name.into(),
                action: Box::new(action),
            })
            .map_err(|_| SchedulerError::Closed)
    }

    /// Registers a timer that enqueues `action` after `initial_delay` and
    /// then every `interval`, measured from the moment each run starts.
    /// An `interval` of zero fires once.
    ///
    /// At most one run of the same timer is queued or executing at a
    /// time, so consecutive runs are never closer than `interval`.
    pub fn start_repeating<F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        initial_delay: Duration,
        interval: Duration,
        action: F,
    ) -> RepeatingAction
    where
        F: Fn(&mut S, &SchedulerHandle<S>) + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(action = %name, ?initial_delay, ?interval, "repeating action started");
        repeat::start(self, name, Arc::new(action), initial_delay, interval)
    }

    /// Cached time since the scheduler started.
    pub fn now(&self) -> Duration {
        self.shared.clock.now()
    }

    pub fn clock(&self) -> Clock {
        self.shared.clock.clone()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Asks the loop to stop after the action it is running, if any.
    /// Entries still queued are dropped without running.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.shutdown.notify_one();
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns the scheduler task. Dropping it leaves the task running; call
/// [`Scheduler::shutdown`] to stop it and get the state back.
pub struct Scheduler<S> {
    handle: SchedulerHandle<S>,
    task: JoinHandle<S>,
    ticker: JoinHandle<()>,
}

impl<S: Send + 'static> Scheduler<S> {
    /// Moves `state` into a new scheduler task and starts the clock.
    pub fn spawn(state: S, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (clock, ticker) = Clock::start(config.clock_resolution);
        let handle = SchedulerHandle {
            tx,
            shared: Arc::new(Shared {
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                counters: Counters::default(),
                clock,
            }),
        };
        let task = tokio::spawn(run_loop(state, rx, handle.clone(), config));
        Self {
            handle,
            task,
            ticker,
        }
    }

    pub fn handle(&self) -> SchedulerHandle<S> {
        self.handle.clone()
    }

    /// Stops the loop and returns the state it owned.
    pub async fn shutdown(self) -> Result<S, SchedulerError> {
        self.handle.close();
        self.ticker.abort();
        self.task
            .await
            .map_err(|e| SchedulerError::TaskFailed(e.to_string()))
    }
}

async fn run_loop<S: Send + 'static>(
    mut state: S,
    mut rx: mpsc::UnboundedReceiver<Job<S>>,
    handle: SchedulerHandle<S>,
    config: SchedulerConfig,
) -> S {
    debug!("scheduler loop started");
    loop {
        let job = tokio::select! {
            biased;
            _ = handle.shared.shutdown.notified() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        if handle.is_closed() {
            break;
        }
        run_one(&mut state, job, &handle, &config);
    }
    rx.close();
    debug!(metrics = ?handle.metrics(), "scheduler loop stopped");
    state
}

fn run_one<S: Send + 'static>(
    state: &mut S,
    job: Job<S>,
    handle: &SchedulerHandle<S>,
    config: &SchedulerConfig,
) {
    let Job { name, action } = job;
    let counters = &handle.shared.counters;
    trace!(action = %name, "running action");

    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| action(state, handle)));
    let elapsed = started.elapsed();

    counters.executed.fetch_add(1, Ordering::Relaxed);
    if let Err(payload) = result {
        counters.panicked.fetch_add(1, Ordering::Relaxed);
        let msg = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic");
        error!(action = %name, panic = msg, "scheduled action panicked");
    }
    if elapsed > config.slow_callback {
        counters.slow.fetch_add(1, Ordering::Relaxed);
        warn!(
            action = %name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            threshold_ms = config.slow_callback.as_secs_f64() * 1000.0,
            "slow scheduled action"
        );
    }
}

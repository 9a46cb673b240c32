//! Periodic Center jobs.
//!
//! Each job is a [`RepeatingAction`] on the scheduler, so it sees the
//! same state as the handlers and never races them. Anything that
//! blocks (the counter store) is pushed onto a blocking worker.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use wvs_scheduler::{RepeatingAction, SchedulerHandle};

use crate::config::Intervals;
use crate::{CenterContext, WvsError};

/// Online characters at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCounts {
    pub world: String,
    pub total: usize,
    /// Characters per channel, shop players included under their shop
    /// channel.
    pub per_channel: BTreeMap<u8, usize>,
}

/// Where the periodic user count goes.
///
/// `record` runs on a blocking worker and may do synchronous I/O.
pub trait CounterStore: Send + Sync + 'static {
    fn record(&self, counts: &UserCounts) -> Result<(), WvsError>;
}

/// Writes user counts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCounterStore;

impl CounterStore for TracingCounterStore {
    fn record(&self, counts: &UserCounts) -> Result<(), WvsError> {
        tracing::info!(
            world = %counts.world,
            total = counts.total,
            per_channel = ?counts.per_channel,
            "online users"
        );
        Ok(())
    }
}

/// The timers a running Center owns.
#[derive(Debug)]
pub struct Jobs {
    pinger: RepeatingAction,
    server_list: RepeatingAction,
    counter: RepeatingAction,
}

impl Jobs {
    pub fn start(scheduler: &SchedulerHandle<CenterContext>, intervals: &Intervals) -> Self {
        let pinger = scheduler.start_repeating("pinger", intervals.ping(), intervals.ping(), |ctx, _| {
            ctx.ping_round();
        });

        // Also expires server changes that never arrived.
        let server_list = scheduler.start_repeating(
            "server-list",
            Duration::ZERO,
            intervals.server_list(),
            |ctx, _| {
                for server in ctx.registry.all() {
                    tracing::debug!(
                        server = %server.name,
                        role = %server.role,
                        channel = server.channel,
                        connections = server.connections,
                        maintenance = server.in_maintenance,
                        "registered server"
                    );
                }
                ctx.expire_migrations(Instant::now());
                ctx.push_user_counts();
            },
        );

        let counter = scheduler.start_repeating(
            "user-counter",
            intervals.counter(),
            intervals.counter(),
            |ctx, _| {
                let store = ctx.counter_store();
                let counts = ctx.user_counts();
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = store.record(&counts) {
                        tracing::warn!(error = %e, "failed to record user counts");
                    }
                });
            },
        );

        Self {
            pinger,
            server_list,
            counter,
        }
    }

    pub fn is_active(&self) -> bool {
        self.pinger.is_active() && self.server_list.is_active() && self.counter.is_active()
    }

    pub fn stop(&self) {
        self.pinger.stop();
        self.server_list.stop();
        self.counter.stop();
    }
}

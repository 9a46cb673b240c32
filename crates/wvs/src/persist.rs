//! Guild persistence off the scheduler thread.
//!
//! A [`GuildStore`] blocks, so it never runs inside a scheduler action.
//! One blocking worker drains a queue of [`GuildChange`]s in order and
//! reports each outcome back to the scheduler as a named action.

use std::sync::Arc;

use tokio::sync::mpsc;
use wvs_protocol::{Guild, GuildId};
use wvs_scheduler::SchedulerHandle;
use wvs_sync::{GuildChange, GuildStore, SyncError};

use crate::{CenterContext, WvsError};

/// Producer side of the persistence worker.
#[derive(Debug, Clone)]
pub struct GuildPersister {
    tx: mpsc::UnboundedSender<GuildChange>,
}

impl GuildPersister {
    /// Starts the worker. It stops once every `GuildPersister` clone is
    /// dropped or the scheduler closes.
    pub fn spawn(store: Arc<dyn GuildStore>, scheduler: SchedulerHandle<CenterContext>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<GuildChange>();
        tokio::task::spawn_blocking(move || {
            while let Some(change) = rx.blocking_recv() {
                let (guild, result) = match &change {
                    GuildChange::Saved(g) => (g.id, store.save(g)),
                    GuildChange::Deleted(id) => (*id, store.delete(*id)),
                };
                let reported =
                    scheduler.enqueue("guild-persisted", move |_, _| report(guild, result));
                if reported.is_err() {
                    break;
                }
            }
            tracing::debug!("guild persistence worker stopped");
        });
        Self { tx }
    }

    pub fn submit(&self, change: GuildChange) {
        if self.tx.send(change).is_err() {
            tracing::error!("guild persistence worker is gone, change lost");
        }
    }
}

fn report(guild: GuildId, result: Result<(), SyncError>) {
    match result {
        Ok(()) => tracing::debug!(%guild, "guild persisted"),
        Err(e) => tracing::error!(%guild, error = %e, "guild persistence failed"),
    }
}

/// Reads every stored guild on a blocking worker.
pub async fn load_guilds(store: Arc<dyn GuildStore>) -> Result<Vec<Guild>, WvsError> {
    let guilds = tokio::task::spawn_blocking(move || store.load_all())
        .await
        .map_err(|e| SyncError::Persistence(e.to_string()))??;
    Ok(guilds)
}

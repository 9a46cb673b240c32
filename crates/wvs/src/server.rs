//! `CenterServer` builder and accept loop.
//!
//! This is the entry point for running a Center. It ties the layers
//! together: transport → scheduler → router → synchronizers.
//!
//! Every accepted link gets two tasks. The writer drains an unbounded
//! channel of [`Outgoing`] items onto the socket; the reader turns each
//! frame into a `dispatch` action on the scheduler. Neither task touches
//! shared state directly.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use wvs_protocol::Handshake;
use wvs_scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
use wvs_sync::{GuildStore, MemoryGuildStore};
use wvs_transport::{Connection, ConnectionId, TcpConnection, TcpTransport, Transport};
use wvs_world::ServerAuthenticator;

use crate::context::{CenterContext, Outgoing};
use crate::jobs::{CounterStore, Jobs};
use crate::persist::{load_guilds, GuildPersister};
use crate::router::Router;
use crate::{CenterConfig, WvsError};

/// Builder for configuring and starting a Center.
///
/// # Example
///
/// ```rust,ignore
/// let config = CenterConfig::load("center.json")?;
/// let server = CenterServerBuilder::new(config).build().await?;
/// server.run().await
/// ```
pub struct CenterServerBuilder {
    config: CenterConfig,
    scheduler: SchedulerConfig,
    authenticator: Option<Arc<dyn ServerAuthenticator>>,
    guild_store: Arc<dyn GuildStore>,
    counter_store: Option<Arc<dyn CounterStore>>,
}

impl CenterServerBuilder {
    pub fn new(config: CenterConfig) -> Self {
        Self {
            config,
            scheduler: SchedulerConfig::default(),
            authenticator: None,
            guild_store: Arc::new(MemoryGuildStore::new()),
            counter_store: None,
        }
    }

    /// Replaces the shared-key check on allocation.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn ServerAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Where guilds are loaded from at startup and written to afterwards.
    /// Defaults to an in-memory store.
    pub fn with_guild_store(mut self, store: Arc<dyn GuildStore>) -> Self {
        self.guild_store = store;
        self
    }

    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Binds the listener, loads guilds and starts the scheduler and its
    /// periodic jobs. Connections are not accepted until [`CenterServer::run`].
    pub async fn build(self) -> Result<CenterServer, WvsError> {
        self.config.validate()?;
        let transport = TcpTransport::bind(&self.config.bind).await?;

        let guilds = load_guilds(Arc::clone(&self.guild_store)).await?;
        tracing::info!(guilds = guilds.len(), "guilds loaded");

        let mut ctx = CenterContext::new(&self.config);
        ctx.guilds.load(guilds);
        if let Some(authenticator) = self.authenticator {
            ctx = ctx.with_authenticator(authenticator);
        }
        if let Some(counters) = self.counter_store {
            ctx = ctx.with_counter_store(counters);
        }

        let router = Arc::new(Router::center()?);
        tracing::debug!(handlers = router.len(), "router built");

        let scheduler = Scheduler::spawn(ctx, self.scheduler);
        let handle = scheduler.handle();
        let persister = GuildPersister::spawn(self.guild_store, handle.clone());
        handle.enqueue("attach-persister", move |ctx, _| ctx.set_persister(persister))?;
        let jobs = Jobs::start(&handle, &self.config.intervals);

        Ok(CenterServer {
            transport,
            scheduler,
            router,
            jobs,
        })
    }
}

/// A running Center.
///
/// Call [`run()`](Self::run) to start accepting worker connections.
pub struct CenterServer {
    transport: TcpTransport,
    scheduler: Scheduler<CenterContext>,
    router: Arc<Router>,
    jobs: Jobs,
}

impl CenterServer {
    pub fn builder(config: CenterConfig) -> CenterServerBuilder {
        CenterServerBuilder::new(config)
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, WvsError> {
        Ok(self.transport.local_addr()?)
    }

    /// The scheduler that owns the Center's state.
    pub fn handle(&self) -> SchedulerHandle<CenterContext> {
        self.scheduler.handle()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), WvsError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then stops the
    /// jobs and the scheduler. Links still open are left to drain on
    /// their own tasks.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<(), WvsError> {
        tracing::info!("center running");
        let handle = self.scheduler.handle();
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.transport.accept() => accepted,
                _ = &mut shutdown => {
                    tracing::info!("center shutting down");
                    break;
                }
            };
            match accepted {
                Ok(conn) => {
                    let handle = handle.clone();
                    let router = Arc::clone(&self.router);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(conn, handle, router).await {
                            tracing::debug!(error = %e, "link ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }

        self.jobs.stop();
        let ctx = self.scheduler.shutdown().await?;
        tracing::info!(
            servers = ctx.registry.len(),
            characters = ctx.directory.len(),
            "center stopped"
        );
        Ok(())
    }
}

/// Enqueues the link's cleanup however the reader exits.
///
/// `Drop` is synchronous, so the cleanup is handed to the scheduler as a
/// regular action rather than awaited here.
struct LinkGuard {
    id: ConnectionId,
    scheduler: SchedulerHandle<CenterContext>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        let id = self.id;
        if self
            .scheduler
            .enqueue("connection-lost", move |ctx, _| ctx.connection_lost(id))
            .is_err()
        {
            tracing::debug!(connection = %id, "scheduler closed before link cleanup");
        }
    }
}

/// Handles one worker link from accept to close.
async fn serve_connection(
    conn: TcpConnection,
    scheduler: SchedulerHandle<CenterContext>,
    router: Arc<Router>,
) -> Result<(), WvsError> {
    let id = conn.id();
    let peer = conn.peer_addr();
    tracing::debug!(connection = %id, %peer, "link accepted");

    let conn = Arc::new(conn);
    conn.send(Handshake::random().encode().as_bytes()).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    scheduler.enqueue("attach", move |ctx, _| ctx.attach(id, peer, tx))?;
    let _guard = LinkGuard {
        id,
        scheduler: scheduler.clone(),
    };

    let mut writer = tokio::spawn(write_loop(Arc::clone(&conn), rx));

    loop {
        let frame = tokio::select! {
            frame = conn.recv() => frame,
            _ = &mut writer => {
                tracing::debug!(connection = %id, "writer finished, stopping reader");
                break;
            }
        };
        match frame {
            Ok(Some(frame)) => {
                let router = Arc::clone(&router);
                scheduler.enqueue("dispatch", move |ctx, _| router.dispatch(ctx, id, &frame))?;
            }
            Ok(None) => {
                tracing::info!(connection = %id, "link closed by peer");
                break;
            }
            Err(e) => {
                tracing::warn!(connection = %id, error = %e, "link read failed");
                break;
            }
        }
    }

    // _guard drops here → connection-lost runs on the scheduler.
    Ok(())
}

async fn write_loop(conn: Arc<TcpConnection>, mut rx: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outgoing::Frame(bytes) => {
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(connection = %conn.id(), error = %e, "link write failed");
                    break;
                }
            }
            Outgoing::Close => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(connection = %conn.id(), error = %e, "link close failed");
                }
                break;
            }
        }
    }
}

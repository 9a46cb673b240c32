//! # WvsBeta Center
//!
//! The control plane of a WvsBeta cluster. Login, game and shop workers
//! each keep one link to Center; Center tracks which workers are up,
//! which characters are online where, and owns the state that spans
//! workers: guilds, messenger rooms and parties.
//!
//! ## Architecture
//!
//! ```text
//! TcpTransport → reader task → Scheduler (CenterContext) → Router → handler
//!                                        │
//!                                        └→ Outbox → writer tasks
//! ```
//!
//! Every mutation runs as an action on one [`Scheduler`](wvs_scheduler::Scheduler)
//! that owns the [`CenterContext`], so no table is ever locked.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wvs::{CenterConfig, CenterServer};
//!
//! # async fn start() -> Result<(), wvs::WvsError> {
//! let config = CenterConfig::load("center.json")?;
//! let server = CenterServer::builder(config).build().await?;
//! server.run().await
//! # }
//! ```
//!
//! Workers reach Center through [`CenterLink`].

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

pub mod config;
pub mod context;
mod error;
mod handlers;
pub mod jobs;
pub mod link;
mod persist;
pub mod router;
pub mod server;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::{CenterConfig, Intervals, WorldConfig};
pub use context::{CenterContext, Outgoing};
pub use error::WvsError;
pub use jobs::{CounterStore, Jobs, TracingCounterStore, UserCounts};
pub use link::{Assignment, CenterLink, LinkConfig};
pub use persist::{load_guilds, GuildPersister};
pub use router::{Handler, Request, Router};
pub use server::{CenterServer, CenterServerBuilder};

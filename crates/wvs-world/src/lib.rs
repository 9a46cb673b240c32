//! World state owned by the Center: who is connected, and where every
//! online character lives.
//!
//! - [`Registry`]: connected Login/Game/Shop workers, keyed by name and
//!   by connection, including the maintenance hand-over link.
//! - [`Directory`]: online characters keyed by [`CharacterId`], and
//!   routing of client packets to the worker that owns each one.
//! - [`ServerAuthenticator`]: the gate a worker passes before any of the
//!   above is touched on its behalf.
//!
//! # How it fits in the stack
//!
//! ```text
//! Synchronizers (above)  ← guilds, parties, messenger rooms address characters by ID
//!     ↕
//! World layer (this crate)  ← resolves IDs to connections
//!     ↕
//! Protocol / Transport (below)  ← packets and connection IDs
//! ```
//!
//! Nothing here is thread-safe on purpose: all of it lives inside the
//! scheduler's single owned state.

mod auth;
mod directory;
mod error;
mod registry;

pub use auth::{ServerAuthenticator, SharedKeyAuthenticator};
pub use directory::{CharacterEntry, Directory, Registration};
pub use error::WorldError;
pub use registry::{
    Allocation, AllocationRequest, Departure, LocalServer, Registry, ServerDefinition,
};

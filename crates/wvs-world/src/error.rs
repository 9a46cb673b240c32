//! Error types for the world layer.

use wvs_protocol::CharacterId;
use wvs_transport::ConnectionId;

/// Errors raised by the registry, the directory and authentication.
///
/// All of them are business-rule outcomes: the handler that hit one logs
/// it (and usually closes the offending link), the scheduler keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// The worker presented a key that does not match.
    #[error("authentication failed for server {0}")]
    AuthFailed(String),

    /// The worker's name is not in the configured server list.
    #[error("unknown server {0}")]
    UnknownServer(String),

    /// A game or shop worker claims to belong to a different world.
    #[error("server {server} belongs to world {got}, this center runs world {expected}")]
    WorldMismatch { server: String, expected: u8, got: u8 },

    /// A second hand-over connection for a server already being replaced.
    #[error("server {0} is already in maintenance")]
    AlreadyInMaintenance(String),

    /// No allocated server owns this connection.
    #[error("{0} is not an allocated server connection")]
    NotAllocated(ConnectionId),

    /// The character is not online anywhere in the cluster.
    #[error("character {0} is not online")]
    CharacterNotFound(CharacterId),
}

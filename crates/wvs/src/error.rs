//! Unified error type for the Center.

use wvs_protocol::{ClientMessage, ProtocolError};
use wvs_scheduler::SchedulerError;
use wvs_sync::SyncError;
use wvs_transport::TransportError;
use wvs_world::WorldError;

/// Top-level error that wraps all crate-specific errors.
///
/// Handlers return this so `?` works on anything the lower layers
/// produce. The router logs it at the dispatch boundary; nothing here
/// ever unwinds into the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum WvsError {
    /// A transport-level error (connect, send, recv, framing).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The scheduler has stopped.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Registry, directory or authentication rejected the request.
    #[error(transparent)]
    World(#[from] WorldError),

    /// A guild, party or messenger rule was violated.
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    /// Two handlers were registered for one opcode.
    #[error("a handler for {0} is already registered")]
    DuplicateHandler(ClientMessage),

    /// A worker lost its Center link without being told to move.
    #[error("lost connection to center: {0}")]
    CenterLost(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use wvs_protocol::CharacterId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let wvs_err: WvsError = err.into();
        assert!(matches!(wvs_err, WvsError::Transport(_)));
        assert!(wvs_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::UnexpectedEnd {
            needed: 4,
            remaining: 1,
        };
        let wvs_err: WvsError = err.into();
        assert!(matches!(wvs_err, WvsError::Protocol(_)));
    }

    #[test]
    fn test_from_world_error() {
        let err = WorldError::AuthFailed("Game0".into());
        let wvs_err: WvsError = err.into();
        assert!(matches!(wvs_err, WvsError::World(_)));
        assert!(wvs_err.to_string().contains("Game0"));
    }

    #[test]
    fn test_from_sync_error() {
        let err = SyncError::CharacterOffline(CharacterId(7));
        let wvs_err: WvsError = err.into();
        assert!(matches!(wvs_err, WvsError::Sync(_)));
    }

    #[test]
    fn test_duplicate_handler_names_opcode() {
        let err = WvsError::DuplicateHandler(ClientMessage::GuildChat);
        assert!(err.to_string().contains("GuildChat"));
    }
}

//! Authentication hook for workers joining the cluster.
//!
//! Center never runs privileged logic for a peer before this check
//! passes. The trait is synchronous because it is called from inside a
//! scheduler action, which must not block or await.

use crate::WorldError;

/// Decides whether a worker that introduced itself as `server` may join.
///
/// # Example
///
/// ```rust
/// use wvs_world::{ServerAuthenticator, SharedKeyAuthenticator};
///
/// let auth = SharedKeyAuthenticator::new("hunter2");
/// assert!(auth.authenticate("Game0", "hunter2").is_ok());
/// assert!(auth.authenticate("Game0", "guess").is_err());
/// ```
pub trait ServerAuthenticator: Send + Sync + 'static {
    /// Returns `Err(WorldError::AuthFailed)` when the key is wrong.
    fn authenticate(&self, server: &str, key: &str) -> Result<(), WorldError>;
}

/// Every worker in the cluster shares one key from the configuration.
#[derive(Debug, Clone)]
pub struct SharedKeyAuthenticator {
    key: String,
}

impl SharedKeyAuthenticator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl ServerAuthenticator for SharedKeyAuthenticator {
    fn authenticate(&self, server: &str, key: &str) -> Result<(), WorldError> {
        // Compare every byte so timing does not leak the matching prefix.
        let expected = self.key.as_bytes();
        let given = key.as_bytes();
        let mut diff = expected.len() ^ given.len();
        for (i, b) in expected.iter().enumerate() {
            diff |= usize::from(b ^ given.get(i).copied().unwrap_or(0));
        }
        if diff == 0 {
            Ok(())
        } else {
            Err(WorldError::AuthFailed(server.to_string()))
        }
    }
}

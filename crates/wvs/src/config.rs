//! Center configuration, loaded from a JSON file at startup.
//!
//! ```json
//! {
//!   "bind": "0.0.0.0:8383",
//!   "auth_key": "change-me",
//!   "world": { "id": 0, "name": "Scania" },
//!   "servers": [
//!     { "name": "Login0", "role": "Login" },
//!     { "name": "Game0", "role": "Game", "channel": 0 },
//!     { "name": "Shop0", "role": "Shop", "channel": 0 }
//!   ],
//!   "rates": { "exp": 1.0, "meso": 1.0, "drop": 1.0 },
//!   "guild_capacity": 10
//! }
//! ```
//!
//! Every field except `auth_key` has a default.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use wvs_protocol::Rates;
use wvs_world::ServerDefinition;

use crate::WvsError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CenterConfig {
    /// Address the IS listener binds to.
    pub bind: String,
    /// Shared secret every worker presents when it allocates.
    pub auth_key: String,
    pub world: WorldConfig,
    /// Workers allowed to connect.
    pub servers: Vec<ServerDefinition>,
    /// Rates handed to a worker when it allocates.
    pub rates: Rates,
    /// Capacity of a newly created guild.
    pub guild_capacity: u8,
    pub intervals: Intervals,
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8383".to_string(),
            auth_key: String::new(),
            world: WorldConfig::default(),
            servers: Vec::new(),
            rates: Rates::default(),
            guild_capacity: 10,
            intervals: Intervals::default(),
        }
    }
}

impl CenterConfig {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WvsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| WvsError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| WvsError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WvsError> {
        if self.auth_key.is_empty() {
            return Err(WvsError::ConfigInvalid("auth_key must not be empty".into()));
        }
        if self.guild_capacity == 0 {
            return Err(WvsError::ConfigInvalid("guild_capacity must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(WvsError::ConfigInvalid(format!(
                    "server {} is listed twice",
                    server.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub id: u8,
    pub name: String,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            id: 0,
            name: "Scania".to_string(),
        }
    }
}

/// Periods of the Center's repeating jobs, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Intervals {
    pub ping_secs: u64,
    pub server_list_secs: u64,
    pub counter_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            ping_secs: 15,
            server_list_secs: 5,
            counter_secs: 60,
        }
    }
}

impl Intervals {
    pub fn ping(&self) -> Duration {
        Duration::from_secs(self.ping_secs)
    }

    pub fn server_list(&self) -> Duration {
        Duration::from_secs(self.server_list_secs)
    }

    pub fn counter(&self) -> Duration {
        Duration::from_secs(self.counter_secs)
    }
}

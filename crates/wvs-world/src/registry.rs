//! Center's table of connected worker processes.
//!
//! The configured server list says which names may connect and in which
//! role. A [`LocalServer`] entry exists only while that worker is
//! connected: it is created by [`Registry::allocate`] and removed by
//! [`Registry::remove_connection`].
//!
//! ```text
//!              allocate()                     remove_connection(main)
//!   (absent) ─────────────→ [connected] ──────────────────────────→ (absent)
//!                              │    ▲
//!        allocate() again      │    │ remove_connection(main):
//!        while connected       ▼    │ transfer promoted
//!                         [in maintenance]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use wvs_protocol::{Rates, ServerRole};
use wvs_transport::ConnectionId;

use crate::WorldError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One entry of the configured server list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub name: String,
    pub role: ServerRole,
    /// Channel ID for game and shop workers. Ignored for logins.
    #[serde(default)]
    pub channel: u8,
}

// ---------------------------------------------------------------------------
// LocalServer
// ---------------------------------------------------------------------------

/// A connected worker.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalServer {
    pub name: String,
    pub role: ServerRole,
    pub channel: u8,
    pub world_id: u8,
    pub public_ip: Ipv4Addr,
    pub port: u16,
    /// The live connection.
    pub connection: ConnectionId,
    /// A replacement process that connected while this one was still up.
    /// It takes over when `connection` drops.
    pub transfer_connection: Option<ConnectionId>,
    pub in_maintenance: bool,
    /// Player connections the worker last reported.
    pub connections: i32,
    pub rates: Rates,
}

/// What a worker sent when it asked to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub name: String,
    pub public_ip: Ipv4Addr,
    pub port: u16,
    /// Only game and shop workers send a world ID.
    pub world_id: Option<u8>,
}

/// How an accepted allocation was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// The server was not connected; this connection is now its link.
    Fresh,
    /// The server was already connected; this connection waits as the
    /// hand-over link and the server enters maintenance.
    HandOver,
}

/// What happened to the registry when a connection went away.
#[derive(Debug, Clone, PartialEq)]
pub enum Departure {
    /// The server is gone; its entry is returned.
    Removed(LocalServer),
    /// The hand-over connection became the live one.
    Promoted { name: String, connection: ConnectionId },
    /// The waiting hand-over connection dropped; the live one stays.
    TransferDropped { name: String },
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Registry {
    world_id: u8,
    definitions: BTreeMap<String, ServerDefinition>,
    servers: BTreeMap<String, LocalServer>,
    by_connection: HashMap<ConnectionId, String>,
}

impl Registry {
    pub fn new(world_id: u8, definitions: impl IntoIterator<Item = ServerDefinition>) -> Self {
        Self {
            world_id,
            definitions: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            servers: BTreeMap::new(),
            by_connection: HashMap::new(),
        }
    }

    pub fn world_id(&self) -> u8 {
        self.world_id
    }

    /// The configured definition for a server name.
    pub fn definition(&self, name: &str) -> Option<&ServerDefinition> {
        self.definitions.get(name)
    }

    /// Configured game channels, in channel order.
    pub fn game_channels(&self) -> Vec<u8> {
        let mut channels: Vec<u8> = self
            .definitions
            .values()
            .filter(|d| d.role == ServerRole::Game)
            .map(|d| d.channel)
            .collect();
        channels.sort_unstable();
        channels
    }

    /// Registers `connection` as the link for the requested server.
    ///
    /// The caller has already authenticated the peer.
    pub fn allocate(
        &mut self,
        connection: ConnectionId,
        request: AllocationRequest,
        default_rates: Rates,
    ) -> Result<(Allocation, &LocalServer), WorldError> {
        let definition = self
            .definitions
            .get(&request.name)
            .ok_or_else(|| WorldError::UnknownServer(request.name.clone()))?;

        if definition.role.has_channel() {
            let got = request.world_id.unwrap_or(u8::MAX);
            if got != self.world_id {
                return Err(WorldError::WorldMismatch {
                    server: request.name,
                    expected: self.world_id,
                    got,
                });
            }
        }

        let name = definition.name.clone();
        let allocation = match self.servers.get_mut(&name) {
            Some(existing) if existing.in_maintenance => {
                return Err(WorldError::AlreadyInMaintenance(name));
            }
            Some(existing) => {
                existing.transfer_connection = Some(connection);
                existing.in_maintenance = true;
                tracing::info!(server = %name, %connection, "hand-over connection accepted, server in maintenance");
                Allocation::HandOver
            }
            None => {
                let server = LocalServer {
                    name: name.clone(),
                    role: definition.role,
                    channel: if definition.role.has_channel() {
                        definition.channel
                    } else {
                        0
                    },
                    world_id: self.world_id,
                    public_ip: request.public_ip,
                    port: request.port,
                    connection,
                    transfer_connection: None,
                    in_maintenance: false,
                    connections: 0,
                    rates: default_rates,
                };
                tracing::info!(
                    server = %name,
                    role = %server.role,
                    channel = server.channel,
                    %connection,
                    "server allocated"
                );
                self.servers.insert(name.clone(), server);
                Allocation::Fresh
            }
        };
        self.by_connection.insert(connection, name.clone());

        let server = self
            .servers
            .get(&name)
            .ok_or(WorldError::NotAllocated(connection))?;
        Ok((allocation, server))
    }

    /// Forgets a connection. Returns `None` if it was never allocated.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Option<Departure> {
        let name = self.by_connection.remove(&connection)?;
        let server = self.servers.get_mut(&name)?;

        if server.transfer_connection == Some(connection) {
            server.transfer_connection = None;
            server.in_maintenance = false;
            tracing::info!(server = %name, %connection, "hand-over connection dropped");
            return Some(Departure::TransferDropped { name });
        }

        if let Some(transfer) = server.transfer_connection.take() {
            server.connection = transfer;
            server.in_maintenance = false;
            tracing::info!(server = %name, connection = %transfer, "hand-over connection promoted");
            return Some(Departure::Promoted {
                name,
                connection: transfer,
            });
        }

        let removed = self.servers.remove(&name)?;
        tracing::info!(server = %name, %connection, "server disconnected");
        Some(Departure::Removed(removed))
    }

    // -- lookups ------------------------------------------------------------

    pub fn by_connection(&self, connection: ConnectionId) -> Option<&LocalServer> {
        self.by_connection
            .get(&connection)
            .and_then(|name| self.servers.get(name))
    }

    pub fn by_connection_mut(&mut self, connection: ConnectionId) -> Option<&mut LocalServer> {
        let name = self.by_connection.get(&connection)?;
        self.servers.get_mut(name)
    }

    pub fn by_name(&self, name: &str) -> Option<&LocalServer> {
        self.servers.get(name)
    }

    /// `true` once the connection has passed allocation, as either the
    /// live link or a waiting hand-over.
    pub fn is_allocated(&self, connection: ConnectionId) -> bool {
        self.by_connection.contains_key(&connection)
    }

    fn with_role(&self, role: ServerRole) -> impl Iterator<Item = &LocalServer> {
        self.servers.values().filter(move |s| s.role == role)
    }

    pub fn game(&self, channel: u8) -> Option<&LocalServer> {
        self.with_role(ServerRole::Game).find(|s| s.channel == channel)
    }

    pub fn shop(&self, channel: u8) -> Option<&LocalServer> {
        self.with_role(ServerRole::Shop).find(|s| s.channel == channel)
    }

    pub fn games(&self) -> impl Iterator<Item = &LocalServer> {
        self.with_role(ServerRole::Game)
    }

    pub fn shops(&self) -> impl Iterator<Item = &LocalServer> {
        self.with_role(ServerRole::Shop)
    }

    pub fn logins(&self) -> impl Iterator<Item = &LocalServer> {
        self.with_role(ServerRole::Login)
    }

    pub fn all(&self) -> impl Iterator<Item = &LocalServer> {
        self.servers.values()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    // -- stats push ---------------------------------------------------------

    pub fn set_connections(&mut self, connection: ConnectionId, value: i32) -> Result<(), WorldError> {
        let server = self
            .by_connection_mut(connection)
            .ok_or(WorldError::NotAllocated(connection))?;
        server.connections = value;
        Ok(())
    }

    pub fn set_rates(&mut self, connection: ConnectionId, rates: Rates) -> Result<(), WorldError> {
        let server = self
            .by_connection_mut(connection)
            .ok_or(WorldError::NotAllocated(connection))?;
        tracing::info!(server = %server.name, exp = rates.exp, meso = rates.meso, drop = rates.drop, "rates changed");
        server.rates = rates;
        Ok(())
    }
}

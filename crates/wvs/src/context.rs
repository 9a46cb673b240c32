//! The state value the Center scheduler owns.
//!
//! [`CenterContext`] holds every table of shared state plus one outgoing
//! channel per open link. It is only ever touched from inside scheduler
//! actions, so none of it is locked. Handlers mutate the tables, collect
//! packets in an [`Outbox`], and hand the outbox to
//! [`CenterContext::flush`], which resolves each [`Target`] to
//! connections and queues the bytes on the writer tasks.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use wvs_protocol::{CharacterId, Packet, Rates, ServerMessage};
use wvs_sync::{GuildTable, MessengerRooms, Outbox, PartyTable, Target};
use wvs_transport::{ConnectionId, Heartbeat, HeartbeatAction};
use wvs_world::{
    Departure, Directory, LocalServer, Registry, ServerAuthenticator, SharedKeyAuthenticator,
    WorldError,
};

use crate::jobs::{CounterStore, TracingCounterStore, UserCounts};
use crate::persist::GuildPersister;
use crate::{CenterConfig, WvsError};

/// How long a character granted a server change may take to register on
/// its destination before Center logs it out.
pub const MIGRATION_TIMEOUT: Duration = Duration::from_secs(50);

/// Consecutive undecodable messages after which a link is closed.
pub const MAX_DECODE_FAILURES: u32 = 5;

/// What the writer task of a link should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Send one frame.
    Frame(Vec<u8>),
    /// Shut down the write side; the peer sees end of stream.
    Close,
}

struct Link {
    tx: mpsc::UnboundedSender<Outgoing>,
    heartbeat: Heartbeat,
    peer: SocketAddr,
    decode_failures: u32,
}

pub struct CenterContext {
    pub registry: Registry,
    pub directory: Directory,
    pub guilds: GuildTable,
    pub messengers: MessengerRooms,
    pub parties: PartyTable,
    world_name: String,
    rates: Rates,
    links: HashMap<ConnectionId, Link>,
    /// Deadline of every server change in flight.
    migrations: HashMap<CharacterId, Instant>,
    authenticator: Arc<dyn ServerAuthenticator>,
    counters: Arc<dyn CounterStore>,
    persister: Option<GuildPersister>,
}

impl CenterContext {
    pub fn new(config: &CenterConfig) -> Self {
        Self {
            registry: Registry::new(config.world.id, config.servers.iter().cloned()),
            directory: Directory::new(),
            guilds: GuildTable::new(config.guild_capacity),
            messengers: MessengerRooms::new(),
            parties: PartyTable::new(),
            world_name: config.world.name.clone(),
            rates: config.rates,
            links: HashMap::new(),
            migrations: HashMap::new(),
            authenticator: Arc::new(SharedKeyAuthenticator::new(config.auth_key.clone())),
            counters: Arc::new(TracingCounterStore),
            persister: None,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn ServerAuthenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_counter_store(mut self, counters: Arc<dyn CounterStore>) -> Self {
        self.counters = counters;
        self
    }

    /// Routes every later guild change to `persister`.
    pub fn set_persister(&mut self, persister: GuildPersister) {
        self.persister = Some(persister);
    }

    pub fn world_name(&self) -> &str {
        &self.world_name
    }

    /// Rates a worker starts with when it allocates.
    pub fn default_rates(&self) -> Rates {
        self.rates
    }

    pub fn authenticate(&self, server: &str, key: &str) -> Result<(), WorldError> {
        self.authenticator.authenticate(server, key)
    }

    /// The allocated server behind `connection`.
    pub fn server_of(&self, connection: ConnectionId) -> Result<&LocalServer, WvsError> {
        self.registry
            .by_connection(connection)
            .ok_or(WvsError::World(WorldError::NotAllocated(connection)))
    }

    // -- links --------------------------------------------------------------

    pub fn attach(&mut self, id: ConnectionId, peer: SocketAddr, tx: mpsc::UnboundedSender<Outgoing>) {
        tracing::debug!(connection = %id, %peer, "link attached");
        self.links.insert(
            id,
            Link {
                tx,
                heartbeat: Heartbeat::new(),
                peer,
                decode_failures: 0,
            },
        );
    }

    pub fn is_attached(&self, id: ConnectionId) -> bool {
        self.links.contains_key(&id)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Queues `packet` on a link. Returns `false` if the link is gone.
    pub fn send(&self, id: ConnectionId, packet: &Packet) -> bool {
        let Some(link) = self.links.get(&id) else {
            tracing::debug!(connection = %id, "dropping packet for closed link");
            return false;
        };
        link.tx.send(Outgoing::Frame(packet.as_bytes().to_vec())).is_ok()
    }

    /// Asks the writer to close the link. Cleanup runs once the reader
    /// notices the socket is gone.
    pub fn close(&mut self, id: ConnectionId) {
        if let Some(link) = self.links.get(&id) {
            tracing::info!(connection = %id, peer = %link.peer, "closing link");
            let _ = link.tx.send(Outgoing::Close);
        }
    }

    pub fn on_pong(&mut self, id: ConnectionId) {
        if let Some(link) = self.links.get_mut(&id) {
            link.heartbeat.on_pong();
        }
    }

    /// One round of the pinger over every open link.
    pub fn ping_round(&mut self) {
        let ping = Packet::new(ServerMessage::Ping);
        let mut dead = Vec::new();
        for (id, link) in &mut self.links {
            match link.heartbeat.tick() {
                HeartbeatAction::SendPing => {
                    let _ = link.tx.send(Outgoing::Frame(ping.as_bytes().to_vec()));
                }
                HeartbeatAction::Disconnect => dead.push(*id),
            }
        }
        for id in dead {
            tracing::warn!(connection = %id, "link stopped answering pings");
            self.close(id);
        }
    }

    /// Counts one undecodable message from `id` and closes the link once
    /// [`MAX_DECODE_FAILURES`] arrive in a row.
    pub fn decode_failed(&mut self, id: ConnectionId) {
        let Some(link) = self.links.get_mut(&id) else {
            return;
        };
        link.decode_failures += 1;
        if link.decode_failures >= MAX_DECODE_FAILURES {
            tracing::warn!(connection = %id, failures = link.decode_failures, "link keeps sending garbage");
            self.close(id);
        }
    }

    pub fn decoded(&mut self, id: ConnectionId) {
        if let Some(link) = self.links.get_mut(&id) {
            link.decode_failures = 0;
        }
    }

    /// Tells every allocated worker to reconnect to the Center at `to`.
    /// Workers close their link themselves once they have read it.
    pub fn redirect_workers(&self, to: SocketAddrV4) {
        let mut p = Packet::new(ServerMessage::ChangeCenterServer);
        p.write_bytes(&to.ip().octets()).write_u16(to.port());
        tracing::info!(%to, servers = self.registry.len(), "moving workers to another center");
        let mut out = Outbox::new();
        out.push(Target::AllServers, p);
        self.deliver(out);
    }

    // -- delivery -----------------------------------------------------------

    fn connections_for(&self, target: Target) -> Vec<(ConnectionId, Option<CharacterId>)> {
        fn servers<'a>(it: impl Iterator<Item = &'a LocalServer>) -> Vec<(ConnectionId, Option<CharacterId>)> {
            it.map(|s| (s.connection, None)).collect()
        }
        match target {
            Target::Character(id) => self
                .directory
                .route(id, &self.registry)
                .map(|c| vec![(c, Some(id))])
                .unwrap_or_default(),
            Target::OwnerOf(id) => self
                .directory
                .route(id, &self.registry)
                .map(|c| vec![(c, None)])
                .unwrap_or_default(),
            Target::Connection(c) => vec![(c, None)],
            Target::GameServers => servers(self.registry.games()),
            Target::ShopServers => servers(self.registry.shops()),
            Target::GameAndShop => servers(self.registry.games().chain(self.registry.shops())),
            Target::LoginServers => servers(self.registry.logins()),
            Target::AllServers => servers(self.registry.all()),
        }
    }

    /// Sends every packet in `out` to where its target currently lives.
    /// Targets that resolve to nothing are dropped silently.
    pub fn deliver(&self, out: Outbox) {
        for (target, packet) in out {
            let connections = self.connections_for(target);
            if connections.is_empty() {
                tracing::trace!(?target, "no recipient for packet");
            }
            for (connection, character) in connections {
                match character {
                    Some(id) => self.send(connection, &Directory::envelope(id, &packet)),
                    None => self.send(connection, &packet),
                };
            }
        }
    }

    /// Delivers `out` and hands pending guild writes to the persister.
    pub fn flush(&mut self, out: Outbox) {
        self.deliver(out);
        let changes = self.guilds.take_changes();
        if let Some(persister) = &self.persister {
            for change in changes {
                persister.submit(change);
            }
        }
    }

    // -- user counts ----------------------------------------------------------

    pub fn user_counts(&self) -> UserCounts {
        let per_channel = self.directory.count_by_channel();
        UserCounts {
            world: self.world_name.clone(),
            total: self.directory.len(),
            per_channel,
        }
    }

    /// `ServerSetUserNo`: one count per configured game channel, in
    /// channel order.
    pub fn user_counts_packet(&self) -> Packet {
        let counts = self.directory.count_by_channel();
        let mut p = Packet::new(ServerMessage::ServerSetUserNo);
        for channel in self.registry.game_channels() {
            let n = counts.get(&channel).copied().unwrap_or(0);
            p.write_i32(i32::try_from(n).unwrap_or(i32::MAX));
        }
        p
    }

    /// Sends the current user counts to every login worker.
    pub fn push_user_counts(&self) {
        let mut out = Outbox::new();
        out.push(Target::LoginServers, self.user_counts_packet());
        self.deliver(out);
    }

    pub fn counter_store(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.counters)
    }

    // -- server changes -------------------------------------------------------

    /// Marks `character` as moving between workers until it registers
    /// again or [`MIGRATION_TIMEOUT`] passes. A move already in flight
    /// keeps its deadline.
    pub fn begin_migration(&mut self, character: CharacterId) {
        if let Some(entry) = self.directory.find_mut(character) {
            entry.ccing = true;
        }
        self.migrations
            .entry(character)
            .or_insert_with(|| Instant::now() + MIGRATION_TIMEOUT);
    }

    /// The character arrived, or left for good.
    pub fn end_migration(&mut self, character: CharacterId) {
        self.migrations.remove(&character);
    }

    pub fn is_migrating(&self, character: CharacterId) -> bool {
        self.migrations.contains_key(&character)
    }

    /// Logs out every character whose server change was not completed by
    /// `now`. Returns how many moves expired.
    pub fn expire_migrations(&mut self, now: Instant) -> usize {
        let expired: Vec<CharacterId> = self
            .migrations
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(character, _)| *character)
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let mut out = Outbox::new();
        for &character in &expired {
            self.migrations.remove(&character);
            if self.directory.find(character).is_some_and(|c| c.ccing) {
                tracing::warn!(%character, "server change never completed");
                self.logout(&mut out, character);
            }
        }
        self.flush(out);
        self.push_user_counts();
        expired.len()
    }

    // -- departures -----------------------------------------------------------

    /// Everything that happens when a character leaves the cluster.
    ///
    /// Messenger and guild go first, while the directory still knows the
    /// character; the party goes last, once it sees the member offline.
    pub fn logout(&mut self, out: &mut Outbox, character: CharacterId) {
        if self.messengers.seat_of(character).is_some() {
            if let Err(e) = self.messengers.leave(&mut self.directory, out, character) {
                tracing::warn!(%character, error = %e, "leaving messenger on logout failed");
            }
        }
        self.guilds.set_online(out, character, false);
        self.migrations.remove(&character);
        if self.directory.unregister(character).is_none() {
            tracing::debug!(%character, "logout for character not in directory");
        }
        self.parties.on_logout(&mut self.directory, out, character);
        tracing::info!(%character, "character logged out");
    }

    /// Cleanup once the reader of a link has stopped.
    pub fn connection_lost(&mut self, id: ConnectionId) {
        self.links.remove(&id);
        let Some(departure) = self.registry.remove_connection(id) else {
            tracing::debug!(connection = %id, "unallocated link closed");
            return;
        };
        let Departure::Removed(server) = departure else {
            return;
        };
        if !server.role.has_channel() {
            return;
        }

        let owned = self.directory.owned_by(server.role, server.channel);
        tracing::warn!(
            server = %server.name,
            characters = owned.len(),
            "server lost, dropping its characters"
        );
        let mut out = Outbox::new();
        for character in owned {
            self.logout(&mut out, character);
        }
        self.flush(out);
        self.push_user_counts();
    }
}

//! Packets produced by a state mutation, waiting to be delivered.
//!
//! Synchronizers never touch connections. They describe *who* should
//! receive each packet with a [`Target`] and leave delivery to the
//! caller, which resolves targets against the registry and directory
//! after the mutation is complete.

use wvs_protocol::{CharacterId, Packet};
use wvs_transport::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A game-client packet for one character, relayed by the worker
    /// that owns the character inside `PlayerSendPacket`.
    Character(CharacterId),
    /// An IS packet for whichever worker owns the character.
    OwnerOf(CharacterId),
    /// One specific connection.
    Connection(ConnectionId),
    GameServers,
    ShopServers,
    /// Every game and every shop worker.
    GameAndShop,
    LoginServers,
    AllServers,
}

#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<(Target, Packet)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: Target, packet: Packet) {
        self.items.push((target, packet));
    }

    /// Queues a client packet for `id`.
    pub fn to_character(&mut self, id: CharacterId, packet: Packet) {
        self.push(Target::Character(id), packet);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Target, Packet)> {
        self.items.iter()
    }

    /// Packets queued for exactly `target`, in order.
    pub fn packets_for(&self, target: Target) -> Vec<&Packet> {
        self.items
            .iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, p)| p)
            .collect()
    }

    /// Removes and returns everything queued so far.
    pub fn take(&mut self) -> Vec<(Target, Packet)> {
        std::mem::take(&mut self.items)
    }
}

impl IntoIterator for Outbox {
    type Item = (Target, Packet);
    type IntoIter = std::vec::IntoIter<(Target, Packet)>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

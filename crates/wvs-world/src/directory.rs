//! Center's map from character ID to the worker holding the live session.
//!
//! An entry exists only while the character is online somewhere in the
//! cluster. Everything that refers to a character (parties, messenger
//! rooms, guild rosters) stores the [`CharacterId`] and resolves it here
//! at the moment it needs to, so a logout can never leave a dangling
//! reference behind.

use std::collections::{BTreeMap, HashMap};

use wvs_protocol::{AvatarLook, CharacterId, MessengerId, Packet, PartyId, ServerMessage, ServerRole};
use wvs_transport::ConnectionId;

use crate::Registry;

/// What a worker reports when a character comes online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: CharacterId,
    pub name: String,
    pub job: i16,
    pub level: u8,
    pub gm_level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterEntry {
    pub id: CharacterId,
    pub name: String,
    /// Channel of the owning worker, in that worker's role numbering.
    pub channel: u8,
    pub in_cash_shop: bool,
    /// The game channel to return to when leaving the cash shop.
    pub last_channel: u8,
    /// Set while the character is moving between workers.
    pub ccing: bool,
    pub job: i16,
    pub level: u8,
    pub gm_level: u8,
    pub map: i32,
    pub party: Option<PartyId>,
    /// Room and slot index.
    pub messenger: Option<(MessengerId, u8)>,
    pub avatar: AvatarLook,
}

impl CharacterEntry {
    pub fn is_gm(&self) -> bool {
        self.gm_level > 0
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    characters: HashMap<CharacterId, CharacterEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a character online on the worker `(role, channel)`.
    ///
    /// A character that was mid-transfer keeps its party and messenger
    /// state; only its location and stats are refreshed.
    pub fn register(&mut self, reg: Registration, role: ServerRole, channel: u8) -> &mut CharacterEntry {
        let in_cash_shop = role == ServerRole::Shop;
        let entry = self
            .characters
            .entry(reg.id)
            .and_modify(|e| {
                e.name = reg.name.clone();
                e.job = reg.job;
                e.level = reg.level;
                e.gm_level = reg.gm_level;
            })
            .or_insert_with(|| CharacterEntry {
                id: reg.id,
                name: reg.name.clone(),
                channel,
                in_cash_shop,
                last_channel: 0,
                ccing: false,
                job: reg.job,
                level: reg.level,
                gm_level: reg.gm_level,
                map: 0,
                party: None,
                messenger: None,
                avatar: AvatarLook::default(),
            });
        if !in_cash_shop {
            entry.last_channel = channel;
        }
        entry.channel = channel;
        entry.in_cash_shop = in_cash_shop;
        entry.ccing = false;
        tracing::debug!(character = %reg.id, name = %reg.name, %role, channel, "character registered");
        entry
    }

    /// Drops a character from the directory, returning its last state.
    pub fn unregister(&mut self, id: CharacterId) -> Option<CharacterEntry> {
        let entry = self.characters.remove(&id)?;
        tracing::debug!(character = %id, "character unregistered");
        Some(entry)
    }

    pub fn find(&self, id: CharacterId) -> Option<&CharacterEntry> {
        self.characters.get(&id)
    }

    pub fn find_mut(&mut self, id: CharacterId) -> Option<&mut CharacterEntry> {
        self.characters.get_mut(&id)
    }

    /// Linear, case-insensitive lookup.
    pub fn find_by_name(&self, name: &str) -> Option<&CharacterEntry> {
        self.characters
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, id: CharacterId) -> bool {
        self.characters.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterEntry> {
        self.characters.values()
    }

    /// Characters whose live session is on the worker `(role, channel)`.
    pub fn owned_by(&self, role: ServerRole, channel: u8) -> Vec<CharacterId> {
        let shop = role == ServerRole::Shop;
        let mut ids: Vec<CharacterId> = self
            .characters
            .values()
            .filter(|c| c.channel == channel && c.in_cash_shop == shop)
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Online characters per game channel, excluding the cash shop.
    pub fn count_by_channel(&self) -> BTreeMap<u8, usize> {
        let mut counts = BTreeMap::new();
        for c in self.characters.values().filter(|c| !c.in_cash_shop) {
            *counts.entry(c.channel).or_insert(0) += 1;
        }
        counts
    }

    /// The connection that currently owns `id`, if both exist.
    pub fn route(&self, id: CharacterId, registry: &Registry) -> Option<ConnectionId> {
        let character = self.characters.get(&id)?;
        let server = if character.in_cash_shop {
            registry.shop(character.channel)
        } else {
            registry.game(character.channel)
        };
        server.map(|s| s.connection)
    }

    /// Wraps a client packet so the owning worker relays it to `id`.
    pub fn envelope(id: CharacterId, payload: &Packet) -> Packet {
        let mut p = Packet::new(ServerMessage::PlayerSendPacket);
        p.write_i32(id.0).write_bytes(payload.as_bytes());
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(id: i32, name: &str) -> Registration {
        Registration {
            id: CharacterId(id),
            name: name.into(),
            job: 100,
            level: 20,
            gm_level: 0,
        }
    }

    #[test]
    fn test_register_then_find_by_id_and_name() {
        let mut dir = Directory::new();
        dir.register(reg(1, "Athena"), ServerRole::Game, 2);

        assert_eq!(dir.find(CharacterId(1)).unwrap().channel, 2);
        assert_eq!(dir.find_by_name("aTHENA").unwrap().id, CharacterId(1));
        assert!(dir.find_by_name("Athen").is_none());
    }

    #[test]
    fn test_reregister_keeps_party_and_clears_ccing() {
        let mut dir = Directory::new();
        dir.register(reg(1, "Athena"), ServerRole::Game, 0);
        {
            let e = dir.find_mut(CharacterId(1)).unwrap();
            e.party = Some(PartyId(4));
            e.ccing = true;
        }

        let e = dir.register(reg(1, "Athena"), ServerRole::Game, 3);

        assert_eq!(e.party, Some(PartyId(4)));
        assert_eq!(e.channel, 3);
        assert!(!e.ccing);
    }

    #[test]
    fn test_register_on_shop_keeps_last_game_channel() {
        let mut dir = Directory::new();
        dir.register(reg(1, "Athena"), ServerRole::Game, 4);

        let e = dir.register(reg(1, "Athena"), ServerRole::Shop, 0);

        assert!(e.in_cash_shop);
        assert_eq!(e.last_channel, 4);
        assert_eq!(dir.owned_by(ServerRole::Shop, 0), vec![CharacterId(1)]);
        assert!(dir.owned_by(ServerRole::Game, 0).is_empty());
    }

    #[test]
    fn test_count_by_channel_skips_cash_shop() {
        let mut dir = Directory::new();
        dir.register(reg(1, "A"), ServerRole::Game, 0);
        dir.register(reg(2, "B"), ServerRole::Game, 0);
        dir.register(reg(3, "C"), ServerRole::Game, 1);
        dir.register(reg(4, "D"), ServerRole::Shop, 0);

        let counts = dir.count_by_channel();
        assert_eq!(counts.get(&0), Some(&2));
        assert_eq!(counts.get(&1), Some(&1));
        assert_eq!(dir.len(), 4);
    }

    #[test]
    fn test_envelope_layout() {
        let mut inner = Packet::new(0x83u8);
        inner.write_u8(6);

        let outer = Directory::envelope(CharacterId(258), &inner);

        assert_eq!(
            outer.as_bytes(),
            &[ServerMessage::PlayerSendPacket as u8, 2, 1, 0, 0, 0x83, 6]
        );
    }

    #[test]
    fn test_unregister_removes_entry() {
        let mut dir = Directory::new();
        dir.register(reg(1, "A"), ServerRole::Game, 0);
        assert!(dir.unregister(CharacterId(1)).is_some());
        assert!(dir.unregister(CharacterId(1)).is_none());
        assert!(dir.is_empty());
    }
}

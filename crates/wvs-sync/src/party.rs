//! Parties: up to six characters sharing a roster, chat and doors.
//!
//! Unlike messenger rooms, party membership survives a logout: an offline
//! member keeps their slot and shows up on everyone's roster as being
//! nowhere. The table here is authoritative; [`CharacterEntry::party`]
//! mirrors it for characters that are online, and every change of that
//! mirror is pushed to the owning worker as `ChangeParty`.
//!
//! [`CharacterEntry::party`]: wvs_world::CharacterEntry

use std::collections::{BTreeMap, HashMap};

use wvs_protocol::{CharacterId, DoorInfo, Packet, PartyId, ServerMessage, client};
use wvs_world::{CharacterEntry, Directory};

use crate::{Outbox, SyncError, Target};

pub const MAX_MEMBERS: usize = 6;

/// Channel reported for members who are not online.
const CHANNEL_OFFLINE: i32 = -2;
/// Shop channels are numbered separately from game channels.
const SHOP_CHANNEL_BASE: i32 = 50;
/// Width of each name in the party roster.
const NAME_WIDTH: usize = 13;
/// Party chat is group 1 of the group message.
const GROUP_PARTY: u8 = 1;
/// Notice type of the red "nobody is online" line.
const NOTICE_RED: u8 = 5;
const NONE_ONLINE: &str = "Either the party doesn't exist or no member of your party is logged on.";

/// Result codes carried after the `PARTY_RESULT` client opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartyFunction {
    InviteDone = 0x04,
    LoadDone = 0x06,
    CreateNewDone = 0x07,
    CreateNewAlreadyJoined = 0x08,
    CreateNewBeginnerDisallowed = 0x09,
    WithdrawDone = 0x0B,
    WithdrawNotJoined = 0x0C,
    JoinDone = 0x0E,
    JoinAlreadyJoined = 0x0F,
    JoinAlreadyFull = 0x10,
    InviteUserAlreadyHasInvite = 0x14,
    InviteRejected = 0x15,
    UnableToFindPlayer = 0x19,
    TownPortalChanged = 0x1A,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyMember {
    pub id: CharacterId,
    pub name: String,
    pub door: DoorInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub id: PartyId,
    pub leader: CharacterId,
    pub slots: [Option<PartyMember>; MAX_MEMBERS],
}

impl Party {
    pub fn members(&self) -> impl Iterator<Item = &PartyMember> {
        self.slots.iter().flatten()
    }

    pub fn member(&self, id: CharacterId) -> Option<&PartyMember> {
        self.members().find(|m| m.id == id)
    }

    pub fn slot_of(&self, id: CharacterId) -> Option<usize> {
        self.slots
            .iter()
            .position(|m| m.as_ref().is_some_and(|m| m.id == id))
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn len(&self) -> usize {
        self.members().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members that currently have a directory entry.
    fn online<'a>(&'a self, dir: &'a Directory) -> impl Iterator<Item = CharacterId> + 'a {
        self.members().map(|m| m.id).filter(|id| dir.contains(*id))
    }
}

#[derive(Debug)]
pub struct PartyTable {
    parties: BTreeMap<PartyId, Party>,
    /// Invitee to the party that invited them. One pending invite each.
    invites: HashMap<CharacterId, PartyId>,
    next_id: i32,
}

impl Default for PartyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PartyTable {
    pub fn new() -> Self {
        Self {
            parties: BTreeMap::new(),
            invites: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: PartyId) -> Option<&Party> {
        self.parties.get(&id)
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    /// The party `character` holds a slot in, online or not.
    pub fn party_of(&self, character: CharacterId) -> Option<PartyId> {
        self.parties
            .values()
            .find(|p| p.member(character).is_some())
            .map(|p| p.id)
    }

    pub fn pending_invite(&self, character: CharacterId) -> Option<PartyId> {
        self.invites.get(&character).copied()
    }

    fn allocate_id(&mut self) -> PartyId {
        loop {
            let id = PartyId(self.next_id);
            self.next_id = if self.next_id >= i32::MAX - 1 { 1 } else { self.next_id + 1 };
            if !self.parties.contains_key(&id) {
                return id;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn create(
        &mut self,
        dir: &mut Directory,
        out: &mut Outbox,
        leader: CharacterId,
        door: DoorInfo,
    ) -> Result<Option<PartyId>, SyncError> {
        let entry = dir.find(leader).ok_or(SyncError::CharacterOffline(leader))?;
        if entry.job == 0 && entry.level < 10 {
            tracing::warn!(%leader, "beginner below level 10 cannot create a party");
            out.to_character(leader, error(PartyFunction::CreateNewBeginnerDisallowed));
            return Ok(None);
        }
        if entry.party.is_some() || self.party_of(leader).is_some() {
            tracing::warn!(%leader, "already in a party");
            out.to_character(leader, error(PartyFunction::CreateNewAlreadyJoined));
            return Ok(None);
        }

        let id = self.allocate_id();
        let mut slots: [Option<PartyMember>; MAX_MEMBERS] = Default::default();
        slots[0] = Some(PartyMember {
            id: leader,
            name: entry.name.clone(),
            door,
        });
        let party = Party { id, leader, slots };
        tracing::info!(party = %id, %leader, "party created");

        out.push(Target::GameServers, information_update(&party));
        self.parties.insert(id, party);
        set_party(dir, out, leader, Some(id));

        let mut p = result(PartyFunction::CreateNewDone);
        p.write_i32(id.0);
        door.encode(&mut p);
        out.to_character(leader, p);
        Ok(Some(id))
    }

    /// `leader` invites `target`. Refusals go back to the leader.
    pub fn invite(
        &mut self,
        dir: &Directory,
        out: &mut Outbox,
        leader: CharacterId,
        target: CharacterId,
    ) -> Result<(), SyncError> {
        let id = self.led_by(leader)?;
        let Some(invitee) = dir.find(target) else {
            out.to_character(leader, error(PartyFunction::UnableToFindPlayer));
            return Ok(());
        };
        if self.invites.contains_key(&target) {
            out.to_character(
                leader,
                error_with_name(PartyFunction::InviteUserAlreadyHasInvite, &invitee.name),
            );
            return Ok(());
        }
        if invitee.party.is_some() || self.party_of(target).is_some() {
            out.to_character(leader, error(PartyFunction::JoinAlreadyJoined));
            return Ok(());
        }
        let party = self.parties.get(&id).ok_or(SyncError::PartyNotFound(id))?;
        if party.is_full() {
            out.to_character(leader, error(PartyFunction::JoinAlreadyFull));
            return Ok(());
        }

        let leader_name = party.member(leader).map(|m| m.name.as_str()).unwrap_or_default();
        let mut p = result(PartyFunction::InviteDone);
        p.write_i32(id.0).write_string(leader_name);
        out.to_character(target, p);
        self.invites.insert(target, id);
        tracing::debug!(party = %id, %leader, %target, "party invite sent");
        Ok(())
    }

    /// `character` accepts their pending invite.
    pub fn accept(
        &mut self,
        dir: &mut Directory,
        out: &mut Outbox,
        character: CharacterId,
    ) -> Result<(), SyncError> {
        let entry = dir
            .find(character)
            .ok_or(SyncError::CharacterOffline(character))?;
        let Some(id) = self.invites.remove(&character) else {
            tracing::warn!(%character, "accepted a party invite that does not exist");
            out.to_character(character, error(PartyFunction::UnableToFindPlayer));
            return Ok(());
        };
        let party = self.parties.get(&id).ok_or(SyncError::PartyNotFound(id))?;

        if party.is_full() {
            out.to_character(character, error(PartyFunction::JoinAlreadyFull));
            return Ok(());
        }
        if entry.party.is_some() || self.party_of(character).is_some() {
            out.to_character(character, error(PartyFunction::JoinAlreadyJoined));
            return Ok(());
        }
        let leader_map = dir.find(party.leader).map(|l| l.map);
        if leader_map != Some(entry.map) {
            tracing::warn!(party = %id, %character, "accepted a party invite from another map");
            out.to_character(character, error(PartyFunction::UnableToFindPlayer));
            return Ok(());
        }

        let member = PartyMember {
            id: character,
            name: entry.name.clone(),
            door: DoorInfo::NONE,
        };
        let party = self.parties.get_mut(&id).ok_or(SyncError::PartyNotFound(id))?;
        let slot = party
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SyncError::PartyNotFound(id))?;
        party.slots[slot] = Some(member);
        tracing::debug!(party = %id, %character, slot, "joined party");

        set_party(dir, out, character, Some(id));
        let Some(party) = self.parties.get(&id) else {
            return Err(SyncError::PartyNotFound(id));
        };
        let mut p = result(PartyFunction::JoinDone);
        p.write_i32(id.0).write_string(&party_name(party, character));
        encode_roster(&mut p, party, character, dir, None);
        for member in party.online(dir) {
            out.to_character(member, p.clone());
        }
        request_hp(dir, out, character);
        out.push(Target::GameServers, information_update(party));
        Ok(())
    }

    /// `character` turns their pending invite down.
    pub fn decline(
        &mut self,
        dir: &Directory,
        out: &mut Outbox,
        character: CharacterId,
    ) -> Result<(), SyncError> {
        let id = self
            .invites
            .remove(&character)
            .ok_or(SyncError::NoInvite(character))?;
        let party = self.parties.get(&id).ok_or(SyncError::PartyNotFound(id))?;
        let name = dir
            .find(character)
            .map(|c| c.name.as_str())
            .unwrap_or_default();
        tracing::debug!(party = %id, %character, "party invite declined");
        out.to_character(party.leader, error_with_name(PartyFunction::InviteRejected, name));
        Ok(())
    }

    /// Drops any invite waiting for `character`.
    pub fn discard_invite(&mut self, character: CharacterId) {
        self.invites.remove(&character);
    }

    /// `character` walks out. The leader walking out disbands the party.
    pub fn leave(
        &mut self,
        dir: &mut Directory,
        out: &mut Outbox,
        character: CharacterId,
    ) -> Result<(), SyncError> {
        let Some(id) = self.party_of(character) else {
            tracing::warn!(%character, "left a party without being in one");
            out.to_character(character, error(PartyFunction::WithdrawNotJoined));
            return Ok(());
        };
        let party = self.parties.get(&id).ok_or(SyncError::PartyNotFound(id))?;
        if party.leader == character {
            return self.disband(dir, out, id);
        }
        self.remove_member(dir, out, id, character, false)
    }

    /// `leader` removes `target`.
    pub fn expel(
        &mut self,
        dir: &mut Directory,
        out: &mut Outbox,
        leader: CharacterId,
        target: CharacterId,
    ) -> Result<(), SyncError> {
        let id = self.led_by(leader)?;
        if target == leader {
            return Err(SyncError::NotInParty(target));
        }
        let in_party = self.parties.get(&id).is_some_and(|p| p.member(target).is_some());
        if !in_party {
            return Err(SyncError::NotInParty(target));
        }
        tracing::info!(party = %id, %leader, %target, "expelled from party");
        self.remove_member(dir, out, id, target, true)
    }

    fn remove_member(
        &mut self,
        dir: &mut Directory,
        out: &mut Outbox,
        id: PartyId,
        character: CharacterId,
        expelled: bool,
    ) -> Result<(), SyncError> {
        let party = self.parties.get_mut(&id).ok_or(SyncError::PartyNotFound(id))?;
        let slot = party
            .slot_of(character)
            .ok_or(SyncError::NotInParty(character))?;
        let Some(leaving) = party.slots[slot].take() else {
            return Err(SyncError::NotInParty(character));
        };
        tracing::debug!(party = %id, %character, slot, expelled, "left party");

        let party = self.parties.get(&id).ok_or(SyncError::PartyNotFound(id))?;
        let recipients: Vec<_> = party.online(dir).chain([character]).collect();
        for to in recipients {
            if !dir.contains(to) {
                continue;
            }
            let mut p = result(PartyFunction::WithdrawDone);
            p.write_i32(id.0)
                .write_i32(character.0)
                .write_bool(true)
                .write_bool(expelled)
                .write_string(&leaving.name);
            encode_roster(&mut p, party, to, dir, Some(character));
            out.to_character(to, p);
        }
        out.push(Target::GameServers, information_update(party));
        set_party(dir, out, character, None);
        Ok(())
    }

    fn disband(&mut self, dir: &mut Directory, out: &mut Outbox, id: PartyId) -> Result<(), SyncError> {
        let party = self.parties.remove(&id).ok_or(SyncError::PartyNotFound(id))?;
        tracing::info!(party = %id, leader = %party.leader, "party disbanded");

        let mut p = result(PartyFunction::WithdrawDone);
        p.write_i32(id.0).write_i32(party.leader.0).write_bool(false);
        for member in party.members() {
            if dir.contains(member.id) {
                out.to_character(member.id, p.clone());
            }
            set_party(dir, out, member.id, None);
        }
        self.invites.retain(|_, invited_to| *invited_to != id);

        let mut p = Packet::new(ServerMessage::PartyDisbanded);
        p.write_i32(id.0);
        out.push(Target::GameServers, p);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Relays a party chat line to the other online members.
    pub fn chat(
        &self,
        dir: &Directory,
        out: &mut Outbox,
        sender: CharacterId,
        text: &str,
    ) -> Result<(), SyncError> {
        let id = self
            .party_of(sender)
            .ok_or(SyncError::NotInParty(sender))?;
        let party = self.parties.get(&id).ok_or(SyncError::PartyNotFound(id))?;
        let name = party.member(sender).map(|m| m.name.as_str()).unwrap_or_default();

        let others: Vec<_> = party.online(dir).filter(|c| *c != sender).collect();
        if others.is_empty() {
            let mut p = Packet::new(client::BROADCAST_MSG);
            p.write_u8(NOTICE_RED).write_string(NONE_ONLINE);
            out.to_character(sender, p);
            return Ok(());
        }
        tracing::debug!(party = %id, %sender, text, "party chat");
        let mut p = Packet::new(client::GROUP_MESSAGE);
        p.write_u8(GROUP_PARTY).write_string(name).write_string(text);
        for to in others {
            out.to_character(to, p.clone());
        }
        Ok(())
    }

    /// Stores `character`'s new door and shows it to every online member.
    pub fn update_door(
        &mut self,
        dir: &Directory,
        out: &mut Outbox,
        character: CharacterId,
        door: DoorInfo,
    ) -> Result<(), SyncError> {
        let id = self
            .party_of(character)
            .ok_or(SyncError::NotInParty(character))?;
        let party = self.parties.get_mut(&id).ok_or(SyncError::PartyNotFound(id))?;
        let slot = party
            .slot_of(character)
            .ok_or(SyncError::NotInParty(character))?;
        if let Some(member) = party.slots[slot].as_mut() {
            member.door = door;
        }

        let mut p = result(PartyFunction::TownPortalChanged);
        p.write_u8(slot as u8);
        door.encode(&mut p);
        for to in party.online(dir) {
            out.to_character(to, p.clone());
        }
        Ok(())
    }

    /// Resends the roster to every online member after `character` moved,
    /// logged in or logged out. Characters without a party are ignored.
    pub fn silent_update(&self, dir: &Directory, out: &mut Outbox, character: CharacterId) {
        let Some(party) = self.party_of(character).and_then(|id| self.parties.get(&id)) else {
            return;
        };
        for to in party.online(dir) {
            let mut p = result(PartyFunction::LoadDone);
            p.write_i32(party.id.0);
            encode_roster(&mut p, party, to, dir, None);
            out.to_character(to, p);
        }
        request_hp(dir, out, character);
        out.push(Target::GameServers, information_update(party));
    }

    /// Restores the directory's party field after `character` came online
    /// and refreshes everyone's roster.
    pub fn on_login(&self, dir: &mut Directory, out: &mut Outbox, character: CharacterId) {
        let Some(id) = self.party_of(character) else {
            return;
        };
        set_party(dir, out, character, Some(id));
        self.silent_update(dir, out, character);
    }

    /// Call once `character` has left the directory. A leader logging out
    /// disbands; anyone else stays in the party as an offline member.
    pub fn on_logout(&mut self, dir: &mut Directory, out: &mut Outbox, character: CharacterId) {
        self.discard_invite(character);
        let Some(id) = self.party_of(character) else {
            return;
        };
        let is_leader = self.parties.get(&id).is_some_and(|p| p.leader == character);
        if is_leader {
            if let Err(e) = self.disband(dir, out, id) {
                tracing::warn!(party = %id, error = %e, "disband on logout failed");
            }
        } else {
            self.silent_update(dir, out, character);
        }
    }

    fn led_by(&self, leader: CharacterId) -> Result<PartyId, SyncError> {
        let id = self
            .party_of(leader)
            .ok_or(SyncError::NotInParty(leader))?;
        match self.parties.get(&id) {
            Some(p) if p.leader == leader => Ok(id),
            Some(_) => {
                tracing::warn!(party = %id, character = %leader, "only the leader may do this");
                Err(SyncError::NotPartyLeader(leader))
            }
            None => Err(SyncError::PartyNotFound(id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Updates the directory's copy of `character`'s party and tells the
/// owning worker when it actually changed.
fn set_party(dir: &mut Directory, out: &mut Outbox, character: CharacterId, party: Option<PartyId>) {
    let Some(entry) = dir.find_mut(character) else {
        return;
    };
    if entry.party == party {
        return;
    }
    entry.party = party;
    let mut p = Packet::new(ServerMessage::ChangeParty);
    p.write_i32(character.0).write_i32(party.map_or(0, |id| id.0));
    out.push(Target::OwnerOf(character), p);
}

fn request_hp(dir: &Directory, out: &mut Outbox, character: CharacterId) {
    if !dir.contains(character) {
        return;
    }
    let mut p = Packet::new(ServerMessage::UpdateHpParty);
    p.write_i32(character.0);
    out.push(Target::OwnerOf(character), p);
}

fn information_update(party: &Party) -> Packet {
    let mut p = Packet::new(ServerMessage::PartyInformationUpdate);
    p.write_i32(party.id.0).write_i32(party.leader.0);
    for slot in &party.slots {
        p.write_i32(slot.as_ref().map_or(0, |m| m.id.0));
    }
    p
}

fn party_name(party: &Party, character: CharacterId) -> String {
    party.member(character).map(|m| m.name.clone()).unwrap_or_default()
}

/// Where a character is, comparable across game and shop workers.
fn location(entry: Option<&CharacterEntry>) -> i32 {
    match entry {
        None => CHANNEL_OFFLINE,
        Some(e) if e.in_cash_shop => SHOP_CHANNEL_BASE + i32::from(e.channel),
        Some(e) => i32::from(e.channel),
    }
}

/// The roster block as `viewer` sees it. Maps are only shown for members
/// on the viewer's channel; `hidden` is shown as nowhere regardless.
fn encode_roster(
    p: &mut Packet,
    party: &Party,
    viewer: CharacterId,
    dir: &Directory,
    hidden: Option<CharacterId>,
) {
    let viewer_location = location(dir.find(viewer));
    for slot in &party.slots {
        p.write_i32(slot.as_ref().map_or(0, |m| m.id.0));
    }
    for slot in &party.slots {
        p.write_fixed_string(slot.as_ref().map_or("", |m| m.name.as_str()), NAME_WIDTH);
    }
    for slot in &party.slots {
        let map = slot
            .as_ref()
            .filter(|m| Some(m.id) != hidden)
            .map(|m| dir.find(m.id))
            .filter(|e| location(*e) == viewer_location)
            .and_then(|e| e.map(|e| e.map))
            .unwrap_or(DoorInfo::INVALID_MAP);
        p.write_i32(map);
    }
    p.write_i32(party.leader.0);
    for slot in &party.slots {
        slot.as_ref().map_or(DoorInfo::NONE, |m| m.door).encode_wide(p);
    }
}

fn result(func: PartyFunction) -> Packet {
    let mut p = Packet::new(client::PARTY_RESULT);
    p.write_u8(func as u8);
    p
}

fn error(func: PartyFunction) -> Packet {
    result(func)
}

fn error_with_name(func: PartyFunction, name: &str) -> Packet {
    let mut p = result(func);
    p.write_string(name);
    p
}

//! Messenger rooms: three-seat chat windows that live only in Center.
//!
//! A room exists from its first occupant until its last one leaves, and
//! a room ID is never handed out twice. Each character sits in at most
//! one seat of one room; [`MessengerRooms`] keeps a reverse index for
//! that and mirrors it into [`CharacterEntry::messenger`] so workers and
//! logs can see it too.
//!
//! [`CharacterEntry::messenger`]: wvs_world::CharacterEntry

use std::collections::{BTreeMap, HashMap};

use wvs_protocol::{AvatarLook, CharacterId, MessengerId, Packet, client};
use wvs_world::{CharacterEntry, Directory};

use crate::{Outbox, SyncError};

/// Seats per room.
pub const MAX_OCCUPANTS: usize = 3;

/// Function codes carried after the `MESSENGER` client opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessengerFunction {
    SelfEnter = 0,
    Enter = 1,
    Leave = 2,
    Invite = 3,
    InviteResult = 4,
    Blocked = 5,
    Chat = 6,
    Avatar = 7,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessengerRoom {
    pub id: MessengerId,
    /// Whoever opened the room. Kept for logs after they leave.
    pub owner: CharacterId,
    pub slots: [Option<CharacterId>; MAX_OCCUPANTS],
}

impl MessengerRoom {
    fn new(id: MessengerId, owner: CharacterId) -> Self {
        Self {
            id,
            owner,
            slots: [None; MAX_OCCUPANTS],
        }
    }

    /// Occupied seats as `(slot, character)`, in slot order.
    pub fn occupants(&self) -> impl Iterator<Item = (u8, CharacterId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, c)| c.map(|c| (slot as u8, c)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= MAX_OCCUPANTS
    }
}

#[derive(Debug)]
pub struct MessengerRooms {
    rooms: BTreeMap<MessengerId, MessengerRoom>,
    seats: HashMap<CharacterId, (MessengerId, u8)>,
    next_id: i32,
}

impl Default for MessengerRooms {
    fn default() -> Self {
        Self::new()
    }
}

impl MessengerRooms {
    pub fn new() -> Self {
        Self {
            rooms: BTreeMap::new(),
            seats: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: MessengerId) -> Option<&MessengerRoom> {
        self.rooms.get(&id)
    }

    /// The room and slot `character` sits in.
    pub fn seat_of(&self, character: CharacterId) -> Option<(MessengerId, u8)> {
        self.seats.get(&character).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessengerRoom> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Opens a new room with `owner` in slot 0 and sends them `Enter`.
    ///
    /// If `owner` already sits somewhere they leave that room first.
    pub fn create(
        &mut self,
        dir: &mut Directory,
        out: &mut Outbox,
        owner: CharacterId,
    ) -> Result<MessengerId, SyncError> {
        if !dir.contains(owner) {
            return Err(SyncError::CharacterOffline(owner));
        }
        if self.seats.contains_key(&owner) {
            self.leave(dir, out, owner)?;
        }

        let id = MessengerId(self.next_id);
        self.next_id += 1;
        self.rooms.insert(id, MessengerRoom::new(id, owner));
        let slot = self
            .add_character(dir, id, owner)
            .ok_or(SyncError::RoomFull(id))?;

        tracing::info!(character = %owner, room = %id, "messenger room opened");
        out.to_character(owner, enter(slot));
        Ok(id)
    }

    /// Puts `character` into room `id`, or into a fresh room when `id`
    /// is not positive or names a room that no longer exists.
    ///
    /// The avatar the worker sent along is stored on the directory entry
    /// so other occupants see the character's current look.
    pub fn join(
        &mut self,
        dir: &mut Directory,
        out: &mut Outbox,
        id: MessengerId,
        character: CharacterId,
        avatar: AvatarLook,
    ) -> Result<MessengerId, SyncError> {
        let entry = dir
            .find_mut(character)
            .ok_or(SyncError::CharacterOffline(character))?;
        entry.avatar = avatar;

        if id.0 <= 0 {
            return self.create(dir, out, character);
        }
        if !self.rooms.contains_key(&id) {
            tracing::warn!(%character, room = %id, "tried to enter a messenger room that does not exist");
            return self.create(dir, out, character);
        }
        if self.seats.get(&character).is_some_and(|(room, _)| *room == id) {
            return Ok(id);
        }
        if self.rooms.get(&id).is_some_and(MessengerRoom::is_full) {
            tracing::warn!(%character, room = %id, "messenger room is full");
            return Err(SyncError::RoomFull(id));
        }
        if self.seats.contains_key(&character) {
            self.leave(dir, out, character)?;
        }

        let Some(slot) = self.add_character(dir, id, character) else {
            return Err(SyncError::RoomFull(id));
        };
        tracing::info!(%character, room = %id, slot, "joined messenger room");

        let Some(room) = self.rooms.get(&id) else {
            return Err(SyncError::RoomNotFound(id));
        };
        let Some(joinee) = dir.find(character) else {
            return Err(SyncError::CharacterOffline(character));
        };
        for (other_slot, other) in room.occupants() {
            if other == character {
                out.to_character(character, enter(slot));
                continue;
            }
            let Some(other_entry) = dir.find(other) else {
                continue;
            };
            out.to_character(character, self_enter(other_slot, other_entry));
            out.to_character(other, self_enter(slot, joinee));
        }
        Ok(id)
    }

    /// Seats `character` in the first free slot of room `id` and returns
    /// the slot. Both [`create`](Self::create) and [`join`](Self::join)
    /// seat through here.
    ///
    /// Returns `None` (and logs) when the character already sits in a
    /// room, or the room is full or gone. Nobody is notified.
    pub fn add_character(
        &mut self,
        dir: &mut Directory,
        id: MessengerId,
        character: CharacterId,
    ) -> Option<u8> {
        if self.seats.contains_key(&character) {
            tracing::warn!(%character, room = %id, "already seated in a messenger room");
            return None;
        }
        let slot = self.seat(dir, id, character);
        if slot.is_none() {
            tracing::warn!(%character, room = %id, "no free messenger slot");
        }
        slot
    }

    fn seat(&mut self, dir: &mut Directory, id: MessengerId, character: CharacterId) -> Option<u8> {
        let room = self.rooms.get_mut(&id)?;
        let index = room.slots.iter().position(Option::is_none)?;
        room.slots[index] = Some(character);
        let slot = index as u8;
        self.seats.insert(character, (id, slot));
        if let Some(entry) = dir.find_mut(character) {
            entry.messenger = Some((id, slot));
        }
        Some(slot)
    }

    /// Vacates `character`'s seat and tells every occupant, the leaver
    /// included, which slot emptied. The room closes once nobody is left.
    pub fn leave(
        &mut self,
        dir: &mut Directory,
        out: &mut Outbox,
        character: CharacterId,
    ) -> Result<(), SyncError> {
        let (id, slot) = self
            .seats
            .remove(&character)
            .ok_or(SyncError::NotInRoom(character))?;
        if let Some(entry) = dir.find_mut(character) {
            entry.messenger = None;
        }
        let room = self.rooms.get_mut(&id).ok_or(SyncError::RoomNotFound(id))?;

        for (_, occupant) in room.occupants() {
            out.to_character(occupant, leave(slot));
        }
        room.slots[usize::from(slot)] = None;
        tracing::info!(%character, room = %id, slot, "left messenger room");

        if room.is_empty() {
            self.rooms.remove(&id);
            tracing::info!(room = %id, "messenger room closed");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Invites the character named `recipient` into the sender's room.
    ///
    /// Every refusal is answered with `InviteResult(name, false)`; only
    /// the log says why.
    pub fn invite(
        &self,
        dir: &Directory,
        out: &mut Outbox,
        sender: CharacterId,
        recipient: &str,
    ) -> Result<(), SyncError> {
        let from = dir.find(sender).ok_or(SyncError::CharacterOffline(sender))?;
        let refuse = |out: &mut Outbox, reason: &str| {
            tracing::info!(%sender, recipient, reason, "messenger invite refused");
            out.to_character(sender, invite_result(recipient, false));
        };

        let Some(to) = dir.find_by_name(recipient) else {
            refuse(out, "recipient not online");
            return Ok(());
        };
        if to.id == sender {
            refuse(out, "self invite");
            return Ok(());
        }
        let Some(room) = self.seat_of(sender).and_then(|(id, _)| self.rooms.get(&id)) else {
            refuse(out, "no open room");
            return Ok(());
        };
        if room.is_full() {
            refuse(out, "room full");
            return Ok(());
        }

        tracing::info!(%sender, recipient = %to.id, room = %room.id, "messenger invite sent");
        out.to_character(to.id, invite(&from.name, from.channel, room.id, from.is_gm()));
        out.to_character(sender, invite_result(recipient, true));
        Ok(())
    }

    /// The invitee refused or has the inviter blocked.
    pub fn blocked(
        &self,
        dir: &Directory,
        out: &mut Outbox,
        invitee: &str,
        inviter: &str,
        mode: u8,
    ) -> Result<(), SyncError> {
        let Some(target) = dir.find_by_name(inviter) else {
            tracing::debug!(inviter, "messenger block notice for offline inviter");
            return Ok(());
        };
        out.to_character(target.id, blocked(invitee, mode));
        Ok(())
    }

    /// Relays a chat line to everyone in the room but the speaker.
    pub fn chat(
        &self,
        out: &mut Outbox,
        sender: CharacterId,
        text: &str,
    ) -> Result<(), SyncError> {
        let room = self.room_of(sender)?;
        tracing::debug!(%sender, room = %room.id, text, "messenger chat");
        let packet = chat(text);
        for (_, occupant) in room.occupants().filter(|(_, c)| *c != sender) {
            out.to_character(occupant, packet.clone());
        }
        Ok(())
    }

    /// Stores a new look for `sender` and shows it to the rest of the room.
    pub fn avatar(
        &self,
        dir: &mut Directory,
        out: &mut Outbox,
        sender: CharacterId,
        look: AvatarLook,
    ) -> Result<(), SyncError> {
        let (_, slot) = self.seat_of(sender).ok_or(SyncError::NotInRoom(sender))?;
        let room = self.room_of(sender)?;
        let entry = dir
            .find_mut(sender)
            .ok_or(SyncError::CharacterOffline(sender))?;
        entry.avatar = look;

        let packet = avatar(slot, entry);
        for (_, occupant) in room.occupants().filter(|(_, c)| *c != sender) {
            out.to_character(occupant, packet.clone());
        }
        Ok(())
    }

    fn room_of(&self, character: CharacterId) -> Result<&MessengerRoom, SyncError> {
        let (id, _) = self
            .seat_of(character)
            .ok_or(SyncError::NotInRoom(character))?;
        self.rooms.get(&id).ok_or(SyncError::RoomNotFound(id))
    }
}

// ---------------------------------------------------------------------------
// Client packets
// ---------------------------------------------------------------------------

fn function(func: MessengerFunction) -> Packet {
    let mut p = Packet::new(client::MESSENGER);
    p.write_u8(func as u8);
    p
}

pub fn self_enter(slot: u8, who: &CharacterEntry) -> Packet {
    let mut p = function(MessengerFunction::SelfEnter);
    p.write_u8(slot);
    who.avatar.encode(&mut p);
    p.write_string(&who.name).write_u8(who.channel).write_bool(true);
    p
}

pub fn enter(slot: u8) -> Packet {
    let mut p = function(MessengerFunction::Enter);
    p.write_u8(slot);
    p
}

pub fn leave(slot: u8) -> Packet {
    let mut p = function(MessengerFunction::Leave);
    p.write_u8(slot);
    p
}

pub fn invite(sender_name: &str, sender_channel: u8, room: MessengerId, by_admin: bool) -> Packet {
    let mut p = function(MessengerFunction::Invite);
    p.write_string(sender_name)
        .write_u8(sender_channel)
        .write_i32(room.0)
        .write_bool(by_admin);
    p
}

pub fn invite_result(name: &str, success: bool) -> Packet {
    let mut p = function(MessengerFunction::InviteResult);
    p.write_string(name).write_bool(success);
    p
}

pub fn blocked(name: &str, mode: u8) -> Packet {
    let mut p = function(MessengerFunction::Blocked);
    p.write_string(name).write_u8(mode);
    p
}

pub fn chat(text: &str) -> Packet {
    let mut p = function(MessengerFunction::Chat);
    p.write_string(text);
    p
}

pub fn avatar(slot: u8, who: &CharacterEntry) -> Packet {
    let mut p = function(MessengerFunction::Avatar);
    p.write_u8(slot).write_u8(slot);
    who.avatar.encode(&mut p);
    p.write_string(&who.name).write_u8(who.channel).write_bool(false);
    p
}

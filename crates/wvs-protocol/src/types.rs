//! Identity newtypes and the records that travel inside IS messages.
//!
//! Every record here has an `encode` that appends it to a [`Packet`] and
//! a `decode` that reads it back from a [`PacketReader`], in the exact
//! field order the other processes expect.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Packet, PacketReader, ProtocolError};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A character's database ID. Unique across the whole cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub i32);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// A guild's database ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub i32);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G-{}", self.0)
    }
}

/// A messenger room ID. Handed out from 1 upwards and never reused
/// while the Center process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessengerId(pub i32);

impl fmt::Display for MessengerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

/// A party ID. `0` on the wire means "no party".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartyId(pub i32);

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PT-{}", self.0)
    }
}

/// What kind of worker process a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRole {
    Login,
    Game,
    Shop,
}

impl ServerRole {
    /// Game and shop workers belong to a world and get a channel ID;
    /// login workers serve every world.
    pub fn has_channel(self) -> bool {
        matches!(self, ServerRole::Game | ServerRole::Shop)
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerRole::Login => "login",
            ServerRole::Game => "game",
            ServerRole::Shop => "shop",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

/// Experience, meso and drop multipliers of a world or a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    pub exp: f64,
    pub meso: f64,
    pub drop: f64,
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            exp: 1.0,
            meso: 1.0,
            drop: 1.0,
        }
    }
}

impl Rates {
    pub fn encode(&self, p: &mut Packet) {
        p.write_f64(self.exp).write_f64(self.meso).write_f64(self.drop);
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            exp: r.read_f64()?,
            meso: r.read_f64()?,
            drop: r.read_f64()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Avatar look
// ---------------------------------------------------------------------------

/// How a character looks, as drawn in the messenger window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvatarLook {
    pub gender: u8,
    pub skin: u8,
    pub face: i32,
    pub hair: i32,
    /// `(slot, item id)` pairs of visible equipment.
    pub equips: Vec<(u8, i32)>,
    pub weapon_sticker: i32,
}

impl AvatarLook {
    /// Terminates the equipment list.
    const EQUIPS_END: u8 = 0xFF;

    pub fn encode(&self, p: &mut Packet) {
        p.write_u8(self.gender)
            .write_u8(self.skin)
            .write_i32(self.face)
            .write_u8(0)
            .write_i32(self.hair);
        for (slot, item) in &self.equips {
            p.write_u8(*slot).write_i32(*item);
        }
        p.write_u8(Self::EQUIPS_END).write_i32(self.weapon_sticker);
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        let gender = r.read_u8()?;
        let skin = r.read_u8()?;
        let face = r.read_i32()?;
        let _ = r.read_u8()?;
        let hair = r.read_i32()?;
        let mut equips = Vec::new();
        loop {
            let slot = r.read_u8()?;
            if slot == Self::EQUIPS_END {
                break;
            }
            equips.push((slot, r.read_i32()?));
        }
        Ok(Self {
            gender,
            skin,
            face,
            hair,
            equips,
            weapon_sticker: r.read_i32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Guild records
// ---------------------------------------------------------------------------

/// A guild emblem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuildLogo {
    pub background: i16,
    pub background_color: u8,
    pub foreground: i16,
    pub foreground_color: u8,
}

impl GuildLogo {
    pub fn encode(&self, p: &mut Packet) {
        p.write_i16(self.background)
            .write_u8(self.background_color)
            .write_i16(self.foreground)
            .write_u8(self.foreground_color);
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            background: r.read_i16()?,
            background_color: r.read_u8()?,
            foreground: r.read_i16()?,
            foreground_color: r.read_u8()?,
        })
    }
}

/// Rank inside a guild. Higher byte value means more authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum GuildRank {
    Member = 1,
    JrMaster = 2,
    Master = 3,
}

impl TryFrom<u8> for GuildRank {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(GuildRank::Member),
            2 => Ok(GuildRank::JrMaster),
            3 => Ok(GuildRank::Master),
            other => Err(ProtocolError::InvalidValue(format!("guild rank {other}"))),
        }
    }
}

/// One row of a guild roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildMember {
    pub id: CharacterId,
    pub name: String,
    pub job: i16,
    pub level: u8,
    pub online: bool,
    pub rank: GuildRank,
}

impl GuildMember {
    pub fn encode(&self, p: &mut Packet) {
        p.write_i32(self.id.0)
            .write_string(&self.name)
            .write_i16(self.job)
            .write_u8(self.level)
            .write_bool(self.online)
            .write_u8(self.rank as u8);
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: CharacterId(r.read_i32()?),
            name: r.read_string()?,
            job: r.read_i16()?,
            level: r.read_u8()?,
            online: r.read_bool()?,
            rank: GuildRank::try_from(r.read_u8()?)?,
        })
    }
}

/// The canonical guild record Center owns and workers mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub logo: GuildLogo,
    pub capacity: u8,
    /// Roster in join order.
    pub members: Vec<GuildMember>,
}

impl Guild {
    pub fn member(&self, id: CharacterId) -> Option<&GuildMember> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn member_mut(&mut self, id: CharacterId) -> Option<&mut GuildMember> {
        self.members.iter_mut().find(|m| m.id == id)
    }

    pub fn master(&self) -> Option<&GuildMember> {
        self.members.iter().find(|m| m.rank == GuildRank::Master)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= usize::from(self.capacity)
    }

    pub fn encode(&self, p: &mut Packet) {
        p.write_i32(self.id.0).write_string(&self.name);
        self.logo.encode(p);
        p.write_u8(self.capacity)
            .write_i16(self.members.len() as i16);
        for member in &self.members {
            member.encode(p);
        }
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        let id = GuildId(r.read_i32()?);
        let name = r.read_string()?;
        let logo = GuildLogo::decode(r)?;
        let capacity = r.read_u8()?;
        let count = r.read_i16()?;
        if count < 0 {
            return Err(ProtocolError::InvalidValue(format!("member count {count}")));
        }
        let members = (0..count)
            .map(|_| GuildMember::decode(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id,
            name,
            logo,
            capacity,
            members,
        })
    }
}

// ---------------------------------------------------------------------------
// Party door
// ---------------------------------------------------------------------------

/// Where a party member's mystic door leads, if they have one open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorInfo {
    pub town_id: i32,
    pub field_id: i32,
    pub x: i16,
    pub y: i16,
}

impl DoorInfo {
    /// Map ID the client reads as "nowhere".
    pub const INVALID_MAP: i32 = 999_999_999;

    /// The value for a member without an open door.
    pub const NONE: DoorInfo = DoorInfo {
        town_id: Self::INVALID_MAP,
        field_id: Self::INVALID_MAP,
        x: -1,
        y: -1,
    };

    pub fn encode(&self, p: &mut Packet) {
        p.write_i32(self.town_id)
            .write_i32(self.field_id)
            .write_i16(self.x)
            .write_i16(self.y);
    }

    /// The client copies party data with a struct that stores the door
    /// position as two `i32`s, so party data uses this wider layout.
    pub fn encode_wide(&self, p: &mut Packet) {
        p.write_i32(self.town_id)
            .write_i32(self.field_id)
            .write_i32(i32::from(self.x))
            .write_i32(i32::from(self.y));
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            town_id: r.read_i32()?,
            field_id: r.read_i32()?,
            x: r.read_i16()?,
            y: r.read_i16()?,
        })
    }
}

impl Default for DoorInfo {
    fn default() -> Self {
        Self::NONE
    }
}

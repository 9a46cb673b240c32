//! Error types for the synchronizers.

use wvs_protocol::{CharacterId, GuildId, MessengerId, PartyId, ProtocolError};

/// Errors that can occur while mutating a shared entity.
///
/// These are rule violations, not crashes. Requests a player can fix
/// themselves are answered with a client result packet instead; an
/// `Err` means the request was dropped and should be logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The character is not in the directory.
    #[error("character {0} is not online")]
    CharacterOffline(CharacterId),

    // -- messenger ----------------------------------------------------------
    #[error("messenger room {0} not found")]
    RoomNotFound(MessengerId),

    #[error("messenger room {0} is full")]
    RoomFull(MessengerId),

    #[error("character {0} is not in a messenger room")]
    NotInRoom(CharacterId),

    // -- guild --------------------------------------------------------------
    #[error("guild {0} not found")]
    GuildNotFound(GuildId),

    #[error("character {0} is not in a guild")]
    NotInGuild(CharacterId),

    #[error("character {0} is already in a guild")]
    AlreadyInGuild(CharacterId),

    #[error("guild {0} is full")]
    GuildFull(GuildId),

    /// Kicks and rank changes need more authority than the actor has.
    #[error("character {actor} may not change character {target}")]
    RankTooLow {
        actor: CharacterId,
        target: CharacterId,
    },

    #[error("guild {guild} cannot shrink to {requested} with {members} members")]
    InvalidCapacity {
        guild: GuildId,
        requested: u8,
        members: usize,
    },

    #[error("guild name {0:?} is taken")]
    GuildNameTaken(String),

    /// The guild store rejected a write.
    #[error("guild persistence failed: {0}")]
    Persistence(String),

    // -- party --------------------------------------------------------------
    #[error("party {0} not found")]
    PartyNotFound(PartyId),

    #[error("character {0} is not in a party")]
    NotInParty(CharacterId),

    #[error("character {0} is not the party leader")]
    NotPartyLeader(CharacterId),

    #[error("character {0} has no pending party invite")]
    NoInvite(CharacterId),

    // -- mirror -------------------------------------------------------------
    /// A packet handed to a mirror could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A mirror received a message it does not apply.
    #[error("unexpected message 0x{0:02X}")]
    UnexpectedMessage(u8),
}

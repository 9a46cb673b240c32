//! Opcode namespaces for the inter-server (IS) protocol.
//!
//! Traffic between Center and a worker uses two closed enumerations, one
//! per direction. They are disjoint except for `Ping` and `Pong`, which
//! carry the same byte in both so every connection kind can answer a
//! heartbeat without knowing which side it is on. Everything else starts
//! at [`IS_OPCODE_OFFSET`] + 1 and counts up in declaration order, so the
//! order of the variants below is part of the wire format.

use crate::ProtocolError;

/// Byte value of the heartbeat request in every namespace.
pub const PING: u8 = 0x11;
/// Byte value of the heartbeat answer in every namespace.
pub const PONG: u8 = 0x12;
/// IS opcodes other than ping/pong start right after this value.
pub const IS_OPCODE_OFFSET: u8 = 30;

/// Declares a `#[repr(u8)]` opcode enum plus its byte conversions.
///
/// The first two variants are pinned to [`PING`] and [`PONG`]; the rest
/// are numbered from `IS_OPCODE_OFFSET + 1` in order.
macro_rules! is_opcodes {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $first:ident,
            $($variant:ident,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum $name {
            Ping = PING,
            Pong = PONG,
            $first = IS_OPCODE_OFFSET + 1,
            $($variant,)*
        }

        impl $name {
            /// Every opcode in the namespace, in byte order.
            pub const ALL: &'static [$name] = &[
                $name::Ping,
                $name::Pong,
                $name::$first,
                $($name::$variant,)*
            ];

            /// The variant name, for log lines.
            pub fn name(self) -> &'static str {
                match self {
                    $name::Ping => "Ping",
                    $name::Pong => "Pong",
                    $name::$first => stringify!($first),
                    $($name::$variant => stringify!($variant),)*
                }
            }
        }

        impl From<$name> for u8 {
            fn from(op: $name) -> u8 {
                op as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ProtocolError;

            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|op| *op as u8 == byte)
                    .ok_or(ProtocolError::UnknownOpcode(byte))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}(0x{:02X})", self.name(), *self as u8)
            }
        }
    };
}

is_opcodes! {
    /// Messages a worker sends to Center.
    pub enum ClientMessage {
        ServerRequestAllocation,
        ServerSetConnectionsValue,
        ServerRegisterUnregisterPlayer,

        PlayerChangeServer,
        PlayerQuitCashShop,
        PlayerRequestWorldLoad,
        PlayerRequestChannelStatus,
        PlayerWhisperOrFindOperation,
        PlayerUsingSuperMegaphone,

        MessengerJoin,
        MessengerLeave,
        MessengerInvite,
        MessengerBlocked,
        MessengerDeclined,
        MessengerChat,
        MessengerAvatar,

        PartyCreate,
        PartyInvite,
        PartyAccept,
        PartyLeave,
        PartyExpel,
        PartyDisconnect,
        PartyDecline,
        PartyChat,
        PartyDoorChanged,

        RequestBuddylist,
        BuddyUpdate,
        BuddyInvite,
        BuddyInviteAnswer,
        BuddyListExpand,
        BuddyDisconnect,
        BuddyChat,
        BuddyDeclineOrDelete,

        GuildKickPlayer,
        GuildJoinPlayer,
        GuildLeavePlayer,
        GuildUpdatePlayer,
        GuildResize,
        GuildDisband,
        GuildCreate,
        GuildChat,
        GuildReload,
        GuildRankUpdate,
        GuildRename,
        GuildChangeLogo,

        AdminMessage,
        ChangeRates,
        PlayerUpdateMap,
        ServerMigrationUpdate,
        PlayerCreateCharacterNamecheck,
        PlayerCreateCharacter,
        PlayerDeleteCharacter,
        KickPlayer,
        UpdatePlayerJobLevel,
        BroadcastPacketToGameservers,
        BroadcastPacketToShopservers,
        BroadcastPacketToAllServers,
        ReloadEvents,
        RenamePlayer,
        UpdatePublicIP,
    }
}

is_opcodes! {
    /// Messages Center sends to a worker.
    pub enum ServerMessage {
        ServerAssignmentResult,
        ServerSetUserNo,

        PlayerChangeServerData,
        PlayerChangeServerResult,
        PlayerRequestWorldLoadResult,
        PlayerRequestChannelStatusResult,
        PlayerWhisperOrFindOperationResult,
        PlayerSuperMegaphone,
        PlayerSendPacket,

        ChangeRates,
        AdminMessage,

        ChangeParty,
        UpdateHpParty,
        PartyInformationUpdate,
        PartyDisbanded,

        ServerMigrationUpdate,
        ChangeCenterServer,

        PlayerCreateCharacterNamecheckResult,
        PlayerCreateCharacterResult,
        PlayerDeleteCharacterResult,

        GuildUpdate,
        GuildUpdateSingle,
        GuildLeavePlayer,
        GuildJoinPlayer,
        GuildUpdatePlayer,
        GuildDisbanded,
        GuildResized,
        GuildChat,
        GuildRename,
        GuildChangeLogo,

        KickPlayerResult,
        WseChangeScrollingHeader,
        ReloadNpcScript,
        ReloadCashshopData,
        PlayerRenamed,
        PublicIpUpdated,
        UpdateHaProxyIps,
    }
}

/// Opcodes of game-client packets that Center builds and hands to a
/// worker inside [`ServerMessage::PlayerSendPacket`]. The worker relays
/// the bytes to the player's client untouched.
pub mod client {
    /// Messenger window updates; the first payload byte is a function code.
    pub const MESSENGER: u8 = 0x83;
    /// Party operation results; the first payload byte is a function code.
    pub const PARTY_RESULT: u8 = 0x3A;
    /// Party/buddy group chat line.
    pub const GROUP_MESSAGE: u8 = 0x55;
    /// Coloured notice in the chat box.
    pub const BROADCAST_MSG: u8 = 0x23;
}

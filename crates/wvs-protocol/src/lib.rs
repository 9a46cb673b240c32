//! Wire protocol for the WvsBeta cluster.
//!
//! This crate defines the bytes every process in the cluster speaks:
//!
//! - **Packets** ([`Packet`], [`PacketReader`]): the little-endian
//!   writer and the strict forward-only reader.
//! - **Opcodes** ([`ClientMessage`], [`ServerMessage`], [`client`]):
//!   the closed inter-server namespaces, one per direction, plus the few
//!   game-client opcodes Center builds itself.
//! - **Records** ([`Guild`], [`AvatarLook`], [`DoorInfo`], [`Rates`],
//!   [`Handshake`]): the structures embedded inside messages.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (frames of raw bytes) and
//! the Center's handlers. It knows nothing about connections or
//! characters; it only turns values into bytes and back.
//!
//! ```text
//! Transport (frame) → Protocol (opcode + reader) → Router (handler)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod error;
mod handshake;
mod opcode;
mod packet;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::ProtocolError;
pub use handshake::Handshake;
pub use opcode::{client, ClientMessage, ServerMessage, IS_OPCODE_OFFSET, PING, PONG};
pub use packet::{Packet, PacketReader, MAX_STRING_LEN, UTF8_FLAG};
pub use types::{
    AvatarLook, CharacterId, DoorInfo, Guild, GuildId, GuildLogo, GuildMember, GuildRank,
    MessengerId, PartyId, Rates, ServerRole,
};

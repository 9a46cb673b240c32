//! Handlers for every worker→Center opcode the Center acts on.
//!
//! Each submodule registers its own opcodes. Opcodes that appear in the
//! protocol but have no entry here (buddy lists, character creation and
//! the like) fall through to the router's "no handler" warning.

mod guild;
mod messenger;
mod party;
mod player;
mod server;

use wvs_protocol::{CharacterId, PacketReader, ServerRole};
use wvs_transport::ConnectionId;

use crate::router::Router;
use crate::{CenterContext, WvsError};

pub(crate) fn register_all(router: &mut Router) -> Result<(), WvsError> {
    server::register(router)?;
    player::register(router)?;
    messenger::register(router)?;
    guild::register(router)?;
    party::register(router)?;
    Ok(())
}

fn read_character(r: &mut PacketReader<'_>) -> Result<CharacterId, WvsError> {
    Ok(CharacterId(r.read_i32()?))
}

/// Whether the sender plays `role`. A mismatch is logged by the caller.
fn sent_by(ctx: &CenterContext, connection: ConnectionId, role: ServerRole) -> bool {
    ctx.registry
        .by_connection(connection)
        .is_some_and(|s| s.role == role)
}

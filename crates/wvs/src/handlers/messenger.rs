use wvs_protocol::{AvatarLook, ClientMessage, MessengerId};

use super::read_character;
use crate::router::{Request, Router};
use crate::{CenterContext, WvsError};

pub(super) fn register(router: &mut Router) -> Result<(), WvsError> {
    router.register(ClientMessage::MessengerJoin, join)?;
    router.register(ClientMessage::MessengerLeave, leave)?;
    router.register(ClientMessage::MessengerInvite, invite)?;
    router.register(ClientMessage::MessengerBlocked, blocked)?;
    router.register(ClientMessage::MessengerChat, chat)?;
    router.register(ClientMessage::MessengerAvatar, avatar)?;
    Ok(())
}

/// `roomId, charId, avatar`. A room id of zero opens a new room.
fn join(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let room = MessengerId(req.reader.read_i32()?);
    let id = read_character(&mut req.reader)?;
    let look = AvatarLook::decode(&mut req.reader)?;
    ctx.messengers
        .join(&mut ctx.directory, &mut req.out, room, id, look)?;
    Ok(())
}

fn leave(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    ctx.messengers.leave(&mut ctx.directory, &mut req.out, id)?;
    Ok(())
}

/// `charId, recipientName`.
fn invite(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let recipient = req.reader.read_string()?;
    ctx.messengers
        .invite(&ctx.directory, &mut req.out, id, &recipient)?;
    Ok(())
}

/// `charId, invitee, inviter, mode`.
fn blocked(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let _id = read_character(&mut req.reader)?;
    let invitee = req.reader.read_string()?;
    let inviter = req.reader.read_string()?;
    let mode = req.reader.read_u8()?;
    ctx.messengers
        .blocked(&ctx.directory, &mut req.out, &invitee, &inviter, mode)?;
    Ok(())
}

fn chat(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let text = req.reader.read_string()?;
    ctx.messengers.chat(&mut req.out, id, &text)?;
    Ok(())
}

fn avatar(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let look = AvatarLook::decode(&mut req.reader)?;
    ctx.messengers
        .avatar(&mut ctx.directory, &mut req.out, id, look)?;
    Ok(())
}

use wvs_protocol::{ClientMessage, DoorInfo};

use super::read_character;
use crate::router::{Request, Router};
use crate::{CenterContext, WvsError};

pub(super) fn register(router: &mut Router) -> Result<(), WvsError> {
    router.register(ClientMessage::PartyCreate, create)?;
    router.register(ClientMessage::PartyInvite, invite)?;
    router.register(ClientMessage::PartyAccept, accept)?;
    router.register(ClientMessage::PartyDecline, decline)?;
    router.register(ClientMessage::PartyLeave, leave)?;
    router.register(ClientMessage::PartyExpel, expel)?;
    router.register(ClientMessage::PartyChat, chat)?;
    router.register(ClientMessage::PartyDoorChanged, door_changed)?;
    Ok(())
}

fn create(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let door = DoorInfo::decode(&mut req.reader)?;
    if let Some(party) = ctx
        .parties
        .create(&mut ctx.directory, &mut req.out, id, door)?
    {
        tracing::debug!(character = %id, %party, "party created");
    }
    Ok(())
}

/// `leaderId, targetId`.
fn invite(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let leader = read_character(&mut req.reader)?;
    let target = read_character(&mut req.reader)?;
    ctx.parties
        .invite(&ctx.directory, &mut req.out, leader, target)?;
    Ok(())
}

fn accept(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    ctx.parties.accept(&mut ctx.directory, &mut req.out, id)?;
    Ok(())
}

/// `charId, name`. The name is the decliner's own and is already known.
fn decline(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let _name = req.reader.read_string()?;
    ctx.parties.decline(&ctx.directory, &mut req.out, id)?;
    Ok(())
}

fn leave(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    ctx.parties.leave(&mut ctx.directory, &mut req.out, id)?;
    Ok(())
}

/// `leaderId, targetId`.
fn expel(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let leader = read_character(&mut req.reader)?;
    let target = read_character(&mut req.reader)?;
    ctx.parties
        .expel(&mut ctx.directory, &mut req.out, leader, target)?;
    Ok(())
}

fn chat(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let text = req.reader.read_string()?;
    ctx.parties.chat(&ctx.directory, &mut req.out, id, &text)?;
    Ok(())
}

fn door_changed(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let door = DoorInfo::decode(&mut req.reader)?;
    ctx.parties
        .update_door(&ctx.directory, &mut req.out, id, door)?;
    Ok(())
}

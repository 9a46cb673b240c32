//! Guild requests. Workers hold the invite flow themselves and only
//! tell Center about accepted outcomes; Center re-checks the rules that
//! protect the roster before anything is broadcast.

use wvs_protocol::{ClientMessage, GuildId, GuildLogo, GuildMember, GuildRank};
use wvs_sync::Founder;

use super::read_character;
use crate::router::{Request, Router};
use crate::{CenterContext, WvsError};

pub(super) fn register(router: &mut Router) -> Result<(), WvsError> {
    router.register(ClientMessage::GuildCreate, create)?;
    router.register(ClientMessage::GuildJoinPlayer, join)?;
    router.register(ClientMessage::GuildLeavePlayer, leave)?;
    router.register(ClientMessage::GuildKickPlayer, kick)?;
    router.register(ClientMessage::GuildRankUpdate, rank_update)?;
    router.register(ClientMessage::GuildUpdatePlayer, update_player)?;
    router.register(ClientMessage::GuildResize, resize)?;
    router.register(ClientMessage::GuildRename, rename)?;
    router.register(ClientMessage::GuildChangeLogo, change_logo)?;
    router.register(ClientMessage::GuildDisband, disband)?;
    router.register(ClientMessage::GuildChat, chat)?;
    router.register(ClientMessage::GuildReload, reload)?;
    Ok(())
}

fn read_guild(req: &mut Request<'_>) -> Result<GuildId, WvsError> {
    Ok(GuildId(req.reader.read_i32()?))
}

/// `masterId, name, count, {id, name, job, level} * count`.
fn create(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let master = read_character(&mut req.reader)?;
    let name = req.reader.read_string()?;
    let count = req.reader.read_u8()?;
    let mut founders = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        founders.push(Founder {
            id: read_character(&mut req.reader)?,
            name: req.reader.read_string()?,
            job: req.reader.read_i16()?,
            level: req.reader.read_u8()?,
        });
    }

    ctx.guilds
        .create(&ctx.directory, &mut req.out, master, &name, founders)?;
    Ok(())
}

fn join(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_guild(req)?;
    let member = GuildMember::decode(&mut req.reader)?;
    ctx.guilds.join(&ctx.directory, &mut req.out, id, member)?;
    Ok(())
}

fn leave(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    ctx.guilds.leave(&mut req.out, id)?;
    Ok(())
}

/// `kickerId, targetId`.
fn kick(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let kicker = read_character(&mut req.reader)?;
    let target = read_character(&mut req.reader)?;
    ctx.guilds.kick(&mut req.out, kicker, target)?;
    Ok(())
}

/// `updaterId, guildId, member, newRank`.
fn rank_update(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let updater = read_character(&mut req.reader)?;
    let id = read_guild(req)?;
    let member = GuildMember::decode(&mut req.reader)?;
    let rank = GuildRank::try_from(req.reader.read_u8()?)?;
    ctx.guilds
        .update_rank(&mut req.out, updater, id, member.id, rank)?;
    Ok(())
}

fn update_player(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_guild(req)?;
    let member = GuildMember::decode(&mut req.reader)?;
    ctx.guilds.update_member(&mut req.out, id, &member)?;
    Ok(())
}

/// `guildId, by, capacity`.
fn resize(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_guild(req)?;
    let by = read_character(&mut req.reader)?;
    let capacity = req.reader.read_u8()?;
    ctx.guilds.resize(&mut req.out, id, by, capacity)?;
    Ok(())
}

fn rename(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_guild(req)?;
    let by = read_character(&mut req.reader)?;
    let name = req.reader.read_string()?;
    ctx.guilds.rename(&mut req.out, id, by, &name)?;
    Ok(())
}

fn change_logo(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_guild(req)?;
    let by = read_character(&mut req.reader)?;
    let logo = GuildLogo::decode(&mut req.reader)?;
    ctx.guilds.change_logo(&mut req.out, id, by, logo)?;
    Ok(())
}

fn disband(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_guild(req)?;
    let by = read_character(&mut req.reader)?;
    ctx.guilds.disband(&mut req.out, id, by)?;
    Ok(())
}

/// `guildId, chatterId, text`.
fn chat(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_guild(req)?;
    let chatter = read_character(&mut req.reader)?;
    let text = req.reader.read_string()?;
    ctx.guilds.chat(&mut req.out, id, chatter, &text)?;
    Ok(())
}

fn reload(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    ctx.guilds.reload(&ctx.directory, &mut req.out);
    tracing::info!(guilds = ctx.guilds.len(), "guild snapshot rebroadcast");
    Ok(())
}

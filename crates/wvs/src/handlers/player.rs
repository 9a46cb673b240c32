//! Character presence and the messages Center routes on a character's
//! behalf: channel changes, whisper/find and world-wide notices.

use wvs_protocol::{CharacterId, ClientMessage, Packet, ServerMessage, ServerRole};
use wvs_sync::Target;
use wvs_world::{LocalServer, Registration};

use super::{read_character, sent_by};
use crate::router::{Request, Router};
use crate::{CenterContext, WvsError};

/// Channel numbers from this value up address shop workers.
const SHOP_CHANNEL_BASE: u8 = 50;
/// Channel byte a find result carries for a character in the cash shop.
const FIND_IN_CASH_SHOP: i8 = -2;

pub(super) fn register(router: &mut Router) -> Result<(), WvsError> {
    router.register(ClientMessage::ServerRegisterUnregisterPlayer, register_unregister)?;
    router.register(ClientMessage::PlayerChangeServer, change_server)?;
    router.register(ClientMessage::PlayerQuitCashShop, quit_cash_shop)?;
    router.register(ClientMessage::PlayerWhisperOrFindOperation, whisper_or_find)?;
    router.register(ClientMessage::PlayerUsingSuperMegaphone, super_megaphone)?;
    router.register(ClientMessage::AdminMessage, admin_message)?;
    router.register(ClientMessage::KickPlayer, kick_player)?;
    router.register(ClientMessage::UpdatePlayerJobLevel, update_job_level)?;
    router.register(ClientMessage::PlayerUpdateMap, update_map)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// `charId, add, (name, job, level, gmLevel) | ccing`.
fn register_unregister(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let add = req.reader.read_bool()?;

    if add {
        let registration = Registration {
            id,
            name: req.reader.read_string()?,
            job: req.reader.read_i16()?,
            level: req.reader.read_u8()?,
            gm_level: req.reader.read_u8()?,
        };
        let server = ctx.server_of(req.connection)?;
        let (role, channel) = (server.role, server.channel);
        ctx.directory.register(registration, role, channel);
        ctx.end_migration(id);
        ctx.parties.on_login(&mut ctx.directory, &mut req.out, id);
        ctx.guilds.set_online(&mut req.out, id, true);
        tracing::info!(character = %id, %role, channel, "character online");
    } else {
        let ccing = req.reader.read_bool()?;
        if ccing {
            ctx.begin_migration(id);
            ctx.parties.discard_invite(id);
            tracing::debug!(character = %id, "character left its worker to change server");
        } else {
            ctx.logout(&mut req.out, id);
        }
    }

    req.out.push(Target::LoginServers, ctx.user_counts_packet());
    Ok(())
}

// ---------------------------------------------------------------------------
// Server changes
// ---------------------------------------------------------------------------

/// The link that should receive state for a character moving to
/// `server`: the replacement when one is waiting.
fn migration_link(server: &LocalServer) -> Target {
    let connection = match server.transfer_connection {
        Some(transfer) if server.in_maintenance => transfer,
        _ => server.connection,
    };
    Target::Connection(connection)
}

fn change_result(hash: &str, id: CharacterId, destination: Option<&LocalServer>) -> Packet {
    let mut p = Packet::new(ServerMessage::PlayerChangeServerResult);
    p.write_string(hash).write_i32(id.0);
    match destination {
        Some(server) => {
            p.write_bytes(&server.public_ip.octets()).write_u16(server.port);
        }
        None => {
            p.write_i32(0).write_i16(0);
        }
    }
    p
}

fn change_data(id: CharacterId, state: &[u8]) -> Packet {
    let mut p = Packet::new(ServerMessage::PlayerChangeServerData);
    p.write_i32(id.0).write_bytes(state);
    p
}

/// `hash, charId, world, channel, ccing, state...`.
fn change_server(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let hash = req.reader.read_string()?;
    let id = read_character(&mut req.reader)?;
    let _world = req.reader.read_u8()?;
    let channel = req.reader.read_u8()?;
    let ccing = req.reader.read_bool()?;
    let state = req.reader.read_leftover();

    let mut already_moving = ctx.directory.find(id).is_some_and(|c| c.ccing);
    if already_moving && sent_by(ctx, req.connection, ServerRole::Login) {
        // A fresh login means the earlier move never arrived anywhere.
        tracing::warn!(character = %id, "login replaces an unfinished server change");
        ctx.logout(&mut req.out, id);
        req.out.push(Target::LoginServers, ctx.user_counts_packet());
        already_moving = false;
    }
    let destination = if already_moving {
        tracing::warn!(character = %id, "server change while already changing server");
        None
    } else if channel < SHOP_CHANNEL_BASE {
        ctx.registry.game(channel)
    } else {
        ctx.registry.shop(channel - SHOP_CHANNEL_BASE)
    };

    let reply = change_result(&hash, id, destination);
    let Some(server) = destination else {
        if !already_moving {
            tracing::info!(character = %id, channel, "server change to a channel that is not online");
        }
        req.out.push(Target::Connection(req.connection), reply);
        return Ok(());
    };
    let link = migration_link(server);

    let online = ctx.directory.contains(id);
    if ccing && online {
        req.out.push(link, change_data(id, state));
    }
    ctx.begin_migration(id);
    tracing::info!(character = %id, channel, "server change granted");
    req.out.push(Target::Connection(req.connection), reply);
    Ok(())
}

/// `hash, charId, world, state...`, from a shop worker only.
fn quit_cash_shop(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    if !sent_by(ctx, req.connection, ServerRole::Shop) {
        tracing::warn!(connection = %req.connection, "cash shop exit from a non-shop worker");
        return Ok(());
    }
    let hash = req.reader.read_string()?;
    let id = read_character(&mut req.reader)?;
    let world = req.reader.read_u8()?;
    let state = req.reader.read_leftover();

    let Some(last_channel) = ctx.directory.find(id).map(|c| c.last_channel) else {
        return Ok(());
    };
    let destination = if world == ctx.registry.world_id() {
        ctx.registry.game(last_channel)
    } else {
        None
    };

    let reply = change_result(&hash, id, destination);
    if let Some(server) = destination {
        req.out.push(migration_link(server), change_data(id, state));
        ctx.begin_migration(id);
    }
    req.out.push(Target::Connection(req.connection), reply);
    Ok(())
}

// ---------------------------------------------------------------------------
// Whisper / find
// ---------------------------------------------------------------------------

fn whisper_result(whisper: bool, found: bool, to: CharacterId, name: &str) -> Packet {
    let mut p = Packet::new(ServerMessage::PlayerWhisperOrFindOperationResult);
    p.write_bool(whisper)
        .write_bool(found)
        .write_i32(to.0)
        .write_string(name);
    p
}

/// `sender, whisper, receiverName, [message]`.
///
/// GMs are invisible to non-GMs; both whisper and find report them as
/// not found.
fn whisper_or_find(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let sender_id = read_character(&mut req.reader)?;
    let Some(sender) = ctx.directory.find(sender_id) else {
        return Ok(());
    };
    let whisper = req.reader.read_bool()?;
    let receiver_name = req.reader.read_string()?;
    let reply_to = Target::Connection(req.connection);

    let receiver = ctx
        .directory
        .find_by_name(&receiver_name)
        .filter(|r| !r.is_gm() || sender.is_gm());

    if whisper {
        let message = req.reader.read_string()?;
        let receiver_link = receiver
            .filter(|r| !r.in_cash_shop)
            .and_then(|r| ctx.registry.game(r.channel).map(|s| (r, s.connection)));
        let Some((receiver, link)) = receiver_link else {
            req.out
                .push(reply_to, whisper_result(true, false, sender_id, &receiver_name));
            return Ok(());
        };

        let mut ack = whisper_result(false, true, sender_id, &receiver_name);
        ack.write_i8(-1).write_i8(-1);
        req.out.push(reply_to, ack);

        let mut delivery = whisper_result(true, true, receiver.id, &sender.name);
        delivery
            .write_u8(sender.channel)
            .write_string(&message)
            .write_bool(false);
        req.out.push(Target::Connection(link), delivery);
        tracing::debug!(from = %sender_id, to = %receiver.id, "whisper delivered");
    } else {
        let located = receiver.filter(|r| r.in_cash_shop || ctx.registry.game(r.channel).is_some());
        match located {
            None => req
                .out
                .push(reply_to, whisper_result(false, false, sender_id, &receiver_name)),
            Some(r) => {
                let mut p = whisper_result(false, true, sender_id, &r.name);
                if r.in_cash_shop {
                    p.write_i8(FIND_IN_CASH_SHOP);
                } else {
                    p.write_u8(r.channel);
                }
                p.write_i8(0);
                req.out.push(reply_to, p);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// World-wide notices
// ---------------------------------------------------------------------------

/// `message, whisperable, channel` to every game worker.
fn super_megaphone(_: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let mut p = Packet::new(ServerMessage::PlayerSuperMegaphone);
    p.write_string(&req.reader.read_string()?)
        .write_bool(req.reader.read_bool()?)
        .write_u8(req.reader.read_u8()?);
    req.out.push(Target::GameServers, p);
    Ok(())
}

/// `message, type` to every game worker.
fn admin_message(_: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let mut p = Packet::new(ServerMessage::AdminMessage);
    p.write_string(&req.reader.read_string()?)
        .write_u8(req.reader.read_u8()?);
    req.out.push(Target::GameServers, p);
    Ok(())
}

/// Disconnects a user account wherever it is logged in.
fn kick_player(_: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let user = req.reader.read_i32()?;
    tracing::info!(user, "kicking user cluster-wide");
    let mut p = Packet::new(ServerMessage::KickPlayerResult);
    p.write_i32(user);
    req.out.push(Target::GameAndShop, p);
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory updates
// ---------------------------------------------------------------------------

fn update_job_level(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let job = req.reader.read_i16()?;
    let level = req.reader.read_u8()?;
    let Some(entry) = ctx.directory.find_mut(id) else {
        return Ok(());
    };
    entry.job = job;
    entry.level = level;
    ctx.guilds.update_job_level(&mut req.out, id, job, level);
    Ok(())
}

fn update_map(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let id = read_character(&mut req.reader)?;
    let map = req.reader.read_i32()?;
    let Some(entry) = ctx.directory.find_mut(id) else {
        return Ok(());
    };
    entry.map = map;
    ctx.parties.silent_update(&ctx.directory, &mut req.out, id);
    Ok(())
}

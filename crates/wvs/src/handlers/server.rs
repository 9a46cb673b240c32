//! Worker lifecycle: allocation, stats push, hand-over traffic and the
//! raw broadcast relays.

use std::net::Ipv4Addr;

use wvs_protocol::{ClientMessage, Packet, ProtocolError, Rates, ServerMessage, ServerRole};
use wvs_sync::Target;
use wvs_world::{Allocation, AllocationRequest, WorldError};

use crate::router::{Request, Router};
use crate::{CenterContext, WvsError};

pub(super) fn register(router: &mut Router) -> Result<(), WvsError> {
    router.register(ClientMessage::ServerRequestAllocation, request_allocation)?;
    router.register(ClientMessage::ServerSetConnectionsValue, set_connections)?;
    router.register(ClientMessage::ChangeRates, change_rates)?;
    router.register(ClientMessage::ServerMigrationUpdate, migration_update)?;
    router.register(ClientMessage::BroadcastPacketToGameservers, broadcast_to_games)?;
    router.register(ClientMessage::BroadcastPacketToShopservers, broadcast_to_shops)?;
    router.register(ClientMessage::BroadcastPacketToAllServers, broadcast_to_all)?;
    Ok(())
}

/// `name, authKey, publicIp, port, [worldId, worldName]`.
///
/// Any failure closes the link without a reply.
fn request_allocation(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let result = allocate(ctx, req);
    if result.is_err() {
        ctx.close(req.connection);
    }
    result
}

fn allocate(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let name = req.reader.read_string()?;
    let key = req.reader.read_string()?;
    let role = ctx
        .registry
        .definition(&name)
        .map(|d| d.role)
        .ok_or_else(|| WorldError::UnknownServer(name.clone()))?;
    ctx.authenticate(&name, &key)?;

    let ip = req.reader.read_string()?;
    let public_ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| ProtocolError::InvalidValue(format!("public ip {ip:?}")))?;
    let port = req.reader.read_u16()?;
    let world_id = if role.has_channel() {
        let id = req.reader.read_u8()?;
        if req.reader.remaining() > 0 {
            let world_name = req.reader.read_string()?;
            if world_name != ctx.world_name() {
                tracing::debug!(server = %name, %world_name, "worker calls this world by another name");
            }
        }
        Some(id)
    } else {
        None
    };

    let rates = ctx.default_rates();
    let (allocation, server) = ctx.registry.allocate(
        req.connection,
        AllocationRequest {
            name,
            public_ip,
            port,
            world_id,
        },
        rates,
    )?;
    if allocation == Allocation::HandOver {
        tracing::info!(server = %server.name, "replacement worker waiting for hand-over");
    }

    let mut assignment = Packet::new(ServerMessage::ServerAssignmentResult);
    assignment.write_bool(server.in_maintenance);
    if role.has_channel() {
        assignment.write_u8(server.channel);
    }
    let mut rates = Packet::new(ServerMessage::ChangeRates);
    server.rates.encode(&mut rates);

    let to = Target::Connection(req.connection);
    req.out.push(to, assignment);
    req.out.push(to, rates);
    match role {
        ServerRole::Game | ServerRole::Shop => {
            let snapshot = ctx.guilds.snapshot(&ctx.directory);
            req.out.push(to, snapshot);
        }
        ServerRole::Login => req.out.push(to, ctx.user_counts_packet()),
    }
    Ok(())
}

fn set_connections(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let value = req.reader.read_i32()?;
    ctx.registry.set_connections(req.connection, value)?;
    Ok(())
}

fn change_rates(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let rates = Rates::decode(&mut req.reader)?;
    ctx.registry.set_rates(req.connection, rates)?;
    Ok(())
}

/// Relays state between the outgoing worker and its replacement.
fn migration_update(ctx: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    let server = ctx.server_of(req.connection)?;
    if !server.in_maintenance {
        tracing::warn!(server = %server.name, "migration update outside maintenance");
        return Ok(());
    }
    let counterpart = if server.connection == req.connection {
        server.transfer_connection
    } else {
        Some(server.connection)
    };
    let Some(counterpart) = counterpart else {
        return Ok(());
    };

    let mut p = Packet::new(ServerMessage::ServerMigrationUpdate);
    p.write_bytes(req.reader.read_leftover());
    req.out.push(Target::Connection(counterpart), p);
    Ok(())
}

fn relay(req: &mut Request<'_>, target: Target) -> Result<(), WvsError> {
    let bytes = req.reader.read_leftover();
    if bytes.is_empty() {
        return Err(ProtocolError::MissingOpcode.into());
    }
    req.out.push(target, Packet::from_bytes(bytes.to_vec()));
    Ok(())
}

fn broadcast_to_games(_: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    relay(req, Target::GameServers)
}

fn broadcast_to_shops(_: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    relay(req, Target::ShopServers)
}

fn broadcast_to_all(_: &mut CenterContext, req: &mut Request<'_>) -> Result<(), WvsError> {
    relay(req, Target::AllServers)
}

//! Integration tests for the Center over real loopback TCP: accept,
//! handshake, allocation, relaying between workers and persistence.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use wvs::{CenterConfig, CenterLink, CenterServer, LinkConfig, WvsError};
use wvs_protocol::{
    CharacterId, ClientMessage, Guild, GuildId, GuildLogo, Handshake, Packet, PacketReader,
    ServerMessage, ServerRole,
};
use wvs_sync::{GuildStore, MemoryGuildStore};
use wvs_transport::{Connection, TcpConnection, TcpTransport, Transport};
use wvs_world::ServerDefinition;

// =========================================================================
// Helpers
// =========================================================================

const KEY: &str = "secret";

fn config() -> CenterConfig {
    let def = |name: &str, role, channel| ServerDefinition {
        name: name.into(),
        role,
        channel,
    };
    CenterConfig {
        bind: "127.0.0.1:0".into(),
        auth_key: KEY.into(),
        servers: vec![
            def("Login0", ServerRole::Login, 0),
            def("Game0", ServerRole::Game, 0),
            def("Game1", ServerRole::Game, 1),
        ],
        ..CenterConfig::default()
    }
}

async fn start_with(store: Arc<dyn GuildStore>) -> std::net::SocketAddr {
    let server = CenterServer::builder(config())
        .with_guild_store(store)
        .build()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn start() -> std::net::SocketAddr {
    start_with(Arc::new(MemoryGuildStore::new())).await
}

async fn recv(conn: &TcpConnection) -> Option<Vec<u8>> {
    tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
}

/// Skips frames until one with `op` arrives.
async fn recv_op(conn: &TcpConnection, op: ServerMessage) -> Vec<u8> {
    loop {
        let frame = recv(conn).await.expect("link closed");
        if PacketReader::new(&frame).read_opcode::<ServerMessage>().ok() == Some(op) {
            return frame;
        }
    }
}

/// Connects, checks the greeting and requests allocation as `name`.
async fn worker(addr: std::net::SocketAddr, name: &str, key: &str) -> TcpConnection {
    let conn = TcpConnection::connect(addr).await.unwrap();
    let greeting = recv(&conn).await.unwrap();
    let handshake = Handshake::decode(&greeting).unwrap();
    assert_eq!(handshake.version, Handshake::VERSION);

    let mut p = Packet::new(ClientMessage::ServerRequestAllocation);
    p.write_string(name)
        .write_string(key)
        .write_string("127.0.0.1")
        .write_u16(8585);
    if name != "Login0" {
        p.write_u8(0).write_string("Scania");
    }
    conn.send(p.as_bytes()).await.unwrap();
    conn
}

/// Waits until a login worker sees `expected` online per game channel.
/// Links are served concurrently, so this orders one link's effects
/// before the next request.
async fn wait_counts(login: &TcpConnection, expected: &[i32]) {
    loop {
        let frame = recv_op(login, ServerMessage::ServerSetUserNo).await;
        let mut r = PacketReader::new(&frame);
        r.read_u8().unwrap();
        let counts: Vec<i32> = expected.iter().map(|_| r.read_i32().unwrap()).collect();
        if counts == expected {
            return;
        }
    }
}

async fn login_character(conn: &TcpConnection, id: i32) {
    let mut p = Packet::new(ClientMessage::ServerRegisterUnregisterPlayer);
    p.write_i32(id)
        .write_bool(true)
        .write_string(&format!("char{id}"))
        .write_i16(100)
        .write_u8(30)
        .write_u8(0);
    conn.send(p.as_bytes()).await.unwrap();
}

// =========================================================================
// Allocation
// =========================================================================

#[tokio::test]
async fn test_invalid_key_gets_handshake_then_close() {
    let addr = start().await;
    let conn = worker(addr, "Game0", "wrong").await;

    assert_eq!(recv(&conn).await, None, "no assignment may follow a bad key");
}

#[tokio::test]
async fn test_game_worker_is_assigned_its_channel() {
    let addr = start().await;
    let conn = worker(addr, "Game1", KEY).await;

    let assignment = recv(&conn).await.unwrap();
    let mut r = PacketReader::new(&assignment);
    assert_eq!(r.read_opcode::<ServerMessage>().unwrap(), ServerMessage::ServerAssignmentResult);
    assert!(!r.read_bool().unwrap());
    assert_eq!(r.read_u8().unwrap(), 1);

    let rates = recv(&conn).await.unwrap();
    assert_eq!(rates[0], u8::from(ServerMessage::ChangeRates));
    let guilds = recv(&conn).await.unwrap();
    assert_eq!(guilds[0], u8::from(ServerMessage::GuildUpdate));
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let addr = start().await;
    let conn = worker(addr, "Login0", KEY).await;

    conn.send(Packet::new(ClientMessage::Ping).as_bytes()).await.unwrap();

    recv_op(&conn, ServerMessage::Pong).await;
}

// =========================================================================
// Cross-worker traffic
// =========================================================================

#[tokio::test]
async fn test_whisper_crosses_workers() {
    let addr = start().await;
    let login = worker(addr, "Login0", KEY).await;
    let game0 = worker(addr, "Game0", KEY).await;
    let game1 = worker(addr, "Game1", KEY).await;
    recv_op(&game0, ServerMessage::GuildUpdate).await;
    recv_op(&game1, ServerMessage::GuildUpdate).await;

    login_character(&game0, 10).await;
    login_character(&game1, 11).await;
    wait_counts(&login, &[1, 1]).await;
    let mut p = Packet::new(ClientMessage::PlayerWhisperOrFindOperation);
    p.write_i32(10)
        .write_bool(true)
        .write_string("char11")
        .write_string("hello");
    game0.send(p.as_bytes()).await.unwrap();

    let delivered = recv_op(&game1, ServerMessage::PlayerWhisperOrFindOperationResult).await;
    let mut r = PacketReader::new(&delivered);
    r.read_u8().unwrap();
    assert!(r.read_bool().unwrap());
    assert!(r.read_bool().unwrap());
    assert_eq!(r.read_i32().unwrap(), 11);
    assert_eq!(r.read_string().unwrap(), "char10");
}

#[tokio::test]
async fn test_lost_worker_updates_login_counts() {
    let addr = start().await;
    let login = worker(addr, "Login0", KEY).await;
    let game1 = worker(addr, "Game1", KEY).await;
    recv_op(&game1, ServerMessage::GuildUpdate).await;

    login_character(&game1, 11).await;
    wait_counts(&login, &[0, 1]).await;

    game1.close().await.unwrap();
    drop(game1);

    wait_counts(&login, &[0, 0]).await;
}

// =========================================================================
// Persistence
// =========================================================================

#[tokio::test]
async fn test_stored_guilds_reach_new_workers() {
    let store = Arc::new(MemoryGuildStore::with_guilds([Guild {
        id: GuildId(7),
        name: "Sea".into(),
        logo: GuildLogo::default(),
        capacity: 10,
        members: Vec::new(),
    }]));
    let addr = start_with(store).await;
    let game0 = worker(addr, "Game0", KEY).await;

    let snapshot = recv_op(&game0, ServerMessage::GuildUpdate).await;
    let mut r = PacketReader::new(&snapshot);
    r.read_u8().unwrap();
    assert_eq!(r.read_i32().unwrap(), 1);
    assert_eq!(Guild::decode(&mut r).unwrap().id, GuildId(7));
}

#[tokio::test]
async fn test_created_guild_is_written_to_store() {
    let store = Arc::new(MemoryGuildStore::new());
    let addr = start_with(store.clone()).await;
    let game0 = worker(addr, "Game0", KEY).await;
    recv_op(&game0, ServerMessage::GuildUpdate).await;
    login_character(&game0, 10).await;

    let mut p = Packet::new(ClientMessage::GuildCreate);
    p.write_i32(10)
        .write_string("Sea")
        .write_u8(1)
        .write_i32(10)
        .write_string("char10")
        .write_i16(100)
        .write_u8(30);
    game0.send(p.as_bytes()).await.unwrap();
    recv_op(&game0, ServerMessage::GuildJoinPlayer).await;

    let mut stored = Vec::new();
    for _ in 0..50 {
        stored = store.load_all().unwrap();
        if stored.first().is_some_and(|g| !g.members.is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "Sea");
    assert_eq!(stored[0].members[0].id, CharacterId(10));
}

// =========================================================================
// CenterLink
// =========================================================================

fn link_config(center: std::net::SocketAddr, name: &str) -> LinkConfig {
    LinkConfig {
        center,
        name: name.into(),
        auth_key: KEY.into(),
        public_ip: Ipv4Addr::LOCALHOST,
        port: 8585,
        world: Some((0, "Scania".into())),
    }
}

/// Accepts one worker on `transport`, greets it and swallows its
/// allocation request.
async fn accept_worker(transport: &mut TcpTransport) -> TcpConnection {
    let conn = transport.accept().await.unwrap();
    conn.send(Handshake::random().encode().as_bytes()).await.unwrap();
    let request = recv(&conn).await.unwrap();
    assert_eq!(request[0], u8::from(ClientMessage::ServerRequestAllocation));
    conn
}

#[tokio::test]
async fn test_link_is_assigned_by_real_center() {
    let addr = start().await;
    let mut link = CenterLink::connect(link_config(addr, "Game0")).await.unwrap();

    loop {
        let (op, _) = link.next_message().await.unwrap();
        if op == ServerMessage::GuildUpdate {
            break;
        }
    }

    let assignment = link.assignment().unwrap();
    assert!(!assignment.in_maintenance);
    assert_eq!(assignment.channel, Some(0));
    assert!(link.mirror().is_empty());
}

#[tokio::test]
async fn test_link_loss_without_notice_is_fatal() {
    let mut center = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = center.local_addr().unwrap();
    let fake = tokio::spawn(async move {
        let conn = accept_worker(&mut center).await;
        conn.close().await.unwrap();
    });

    let mut link = CenterLink::connect(link_config(addr, "Game0")).await.unwrap();
    fake.await.unwrap();

    let result = link.next_message().await;
    assert!(matches!(result, Err(WvsError::CenterLost(_))));
}

#[tokio::test]
async fn test_link_follows_change_center_server() {
    let mut first = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let mut second = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let first_addr = first.local_addr().unwrap();
    let second_addr = second.local_addr().unwrap();

    tokio::spawn(async move {
        let conn = accept_worker(&mut first).await;
        let mut p = Packet::new(ServerMessage::ChangeCenterServer);
        p.write_bytes(&[127, 0, 0, 1]).write_u16(second_addr.port());
        conn.send(p.as_bytes()).await.unwrap();
        // Keep the old link up until the worker hangs up itself.
        let _ = conn.recv().await;
    });
    tokio::spawn(async move {
        let conn = accept_worker(&mut second).await;
        let mut p = Packet::new(ServerMessage::ServerAssignmentResult);
        p.write_bool(false).write_u8(3);
        conn.send(p.as_bytes()).await.unwrap();
        let _ = conn.recv().await;
    });

    let mut link = CenterLink::connect(link_config(first_addr, "Game3")).await.unwrap();
    let (op, _) = link.next_message().await.unwrap();

    assert_eq!(op, ServerMessage::ServerAssignmentResult);
    assert_eq!(link.center(), second_addr);
    assert_eq!(link.assignment().unwrap().channel, Some(3));
}

#[tokio::test]
async fn test_center_moves_its_workers_elsewhere() {
    let server = CenterServer::builder(config()).build().await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let mut next = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let next_addr = next.local_addr().unwrap();
    tokio::spawn(async move {
        let conn = accept_worker(&mut next).await;
        let mut p = Packet::new(ServerMessage::ServerAssignmentResult);
        p.write_bool(false).write_u8(0);
        conn.send(p.as_bytes()).await.unwrap();
        let _ = conn.recv().await;
    });

    let mut link = CenterLink::connect(link_config(addr, "Game0")).await.unwrap();
    while link.next_message().await.unwrap().0 != ServerMessage::GuildUpdate {}

    let std::net::SocketAddr::V4(to) = next_addr else {
        panic!("loopback listener is not IPv4");
    };
    handle
        .enqueue("redirect", move |ctx, _| ctx.redirect_workers(to))
        .unwrap();

    let (op, _) = link.next_message().await.unwrap();
    assert_eq!(op, ServerMessage::ServerAssignmentResult);
    assert_eq!(link.center(), next_addr);
    assert_eq!(link.assignment().unwrap().channel, Some(0));
}

// =========================================================================
// Builder
// =========================================================================

#[tokio::test]
async fn test_build_rejects_empty_key() {
    let config = CenterConfig {
        auth_key: String::new(),
        ..config()
    };

    let result = CenterServer::builder(config).build().await;

    assert!(matches!(result, Err(WvsError::ConfigInvalid(_))));
}

#[tokio::test]
async fn test_run_until_stops_on_signal() {
    let server = CenterServer::builder(config()).build().await.unwrap();
    let handle = server.handle();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    assert!(handle.is_closed());
}

//! Integration tests for routing characters through the registry.

use std::net::Ipv4Addr;

use wvs_protocol::{CharacterId, Rates, ServerRole};
use wvs_transport::ConnectionId;
use wvs_world::{AllocationRequest, Directory, Registration, Registry, ServerDefinition};

// =========================================================================
// Helpers
// =========================================================================

fn definitions() -> Vec<ServerDefinition> {
    serde_json::from_str(
        r#"[
            { "name": "Login0", "role": "Login" },
            { "name": "Game0", "role": "Game", "channel": 0 },
            { "name": "Game1", "role": "Game", "channel": 1 },
            { "name": "Shop0", "role": "Shop", "channel": 0 }
        ]"#,
    )
    .expect("definitions parse")
}

fn connect(reg: &mut Registry, name: &str, conn: u64) -> ConnectionId {
    let id = ConnectionId::new(conn);
    reg.allocate(
        id,
        AllocationRequest {
            name: name.into(),
            public_ip: Ipv4Addr::LOCALHOST,
            port: 8585,
            world_id: Some(0),
        },
        Rates::default(),
    )
    .expect("allocation");
    id
}

fn registration(id: i32) -> Registration {
    Registration {
        id: CharacterId(id),
        name: format!("char{id}"),
        job: 0,
        level: 1,
        gm_level: 0,
    }
}

// =========================================================================
// Routing
// =========================================================================

#[test]
fn test_route_follows_character_between_channels_and_shop() {
    let mut reg = Registry::new(0, definitions());
    let game0 = connect(&mut reg, "Game0", 1);
    let game1 = connect(&mut reg, "Game1", 2);
    let shop0 = connect(&mut reg, "Shop0", 3);
    let mut dir = Directory::new();

    dir.register(registration(7), ServerRole::Game, 0);
    assert_eq!(dir.route(CharacterId(7), &reg), Some(game0));

    dir.register(registration(7), ServerRole::Game, 1);
    assert_eq!(dir.route(CharacterId(7), &reg), Some(game1));

    dir.register(registration(7), ServerRole::Shop, 0);
    assert_eq!(dir.route(CharacterId(7), &reg), Some(shop0));
    assert_eq!(dir.find(CharacterId(7)).unwrap().last_channel, 1);
}

#[test]
fn test_route_to_disconnected_worker_is_none() {
    let mut reg = Registry::new(0, definitions());
    let game0 = connect(&mut reg, "Game0", 1);
    let mut dir = Directory::new();
    dir.register(registration(7), ServerRole::Game, 0);

    reg.remove_connection(game0);

    assert_eq!(dir.route(CharacterId(7), &reg), None);
    assert_eq!(dir.route(CharacterId(8), &reg), None);
}

#[test]
fn test_hand_over_keeps_routing_to_live_connection() {
    let mut reg = Registry::new(0, definitions());
    let old = connect(&mut reg, "Game0", 1);
    let new = connect(&mut reg, "Game0", 2);
    let mut dir = Directory::new();
    dir.register(registration(7), ServerRole::Game, 0);

    assert_eq!(dir.route(CharacterId(7), &reg), Some(old));
    reg.remove_connection(old);
    assert_eq!(dir.route(CharacterId(7), &reg), Some(new));
}

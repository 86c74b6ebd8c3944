//! Full socket-based integration tests for client ↔ server communication.

use std::time::Duration;

use motion_client::client::ClientState;
use motion_client::walker::WalkBlocked;
use motion_server::server::FIRST_BOAT_SERIAL;
use motion_shared::math::{Direction, TilePos};
use motion_shared::net::{decode_from_bytes, encode_to_bytes, ClientId, NetMsg, Rider, PROTOCOL_VERSION};
use motion_shared::world::{EntityId, EntityStore};
use motion_tests::{connect_pair, connect_pair_with, init_tracing, pump_until};

const SPAWN: TilePos = TilePos { x: 1000, y: 1000, z: 0 };

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let hello = NetMsg::Hello {
        protocol: PROTOCOL_VERSION,
        name: "Tester".to_string(),
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&hello)?)?, hello);

    let welcome = NetMsg::Welcome {
        client_id: ClientId(1),
        player: EntityId(1),
        position: SPAWN,
        direction: Direction::South,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&welcome)?)?, welcome);

    let boat = NetMsg::VehicleMove {
        vehicle: EntityId(FIRST_BOAT_SERIAL),
        speed: 4,
        moving_dir: 0,
        facing_dir: 2,
        x: 5,
        y: 4,
        z: -5,
        riders: vec![Rider {
            id: EntityId(1),
            position: TilePos::new(6, 4, -5),
        }],
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&boat)?)?, boat);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn steps_are_confirmed_and_keys_replenished() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, mut client, cid) = connect_pair("Walker", &[]).await?;
    assert_eq!(client.state, ClientState::Connected);
    assert_eq!(client.session.player_position(), Some(SPAWN));

    assert!(
        pump_until(&mut server, &mut client, |_, c| c.session.walker.keys().available() == 5).await?,
        "login keys never arrived"
    );

    let target = TilePos::new(1000, 1001, 0);
    assert_eq!(client.walk(Direction::South, false), Ok(1));
    assert_eq!(client.session.player_position(), Some(target));

    let settled = pump_until(&mut server, &mut client, |_, c| {
        c.session.walker.pending() == 0 && c.session.walker.keys().available() == 5
    })
    .await?;
    assert!(settled, "step was never confirmed");
    assert_eq!(client.session.walker.authoritative(), target);
    assert_eq!(server.player_position(cid), Some(target));

    // The next step waits out the walk delay, then goes through with sequence 2.
    let mut second = Err(WalkBlocked::Throttled);
    for _ in 0..100 {
        second = client.walk(Direction::South, false);
        if second != Err(WalkBlocked::Throttled) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(second, Ok(2));

    let further = TilePos::new(1000, 1002, 0);
    assert!(pump_until(&mut server, &mut client, |s, _| s.player_position(cid) == Some(further)).await?);
    assert!(pump_until(&mut server, &mut client, |_, c| c.session.walker.pending() == 0).await?);
    assert_eq!(client.session.walker.authoritative(), further);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn step_without_key_is_denied_and_snapped_back() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, mut client, cid) = connect_pair("Cheater", &[]).await?;
    assert!(pump_until(&mut server, &mut client, |_, c| c.session.walker.keys().available() == 5).await?);

    client.session.walker.keys_mut().clear();
    assert_eq!(client.walk(Direction::South, false), Ok(1));
    assert_eq!(client.session.player_position(), Some(TilePos::new(1000, 1001, 0)));

    let snapped = pump_until(&mut server, &mut client, |_, c| {
        c.session.walker.pending() == 0 && c.session.player_position() == Some(SPAWN)
    })
    .await?;
    assert!(snapped, "deny never reached the client");
    assert_eq!(server.player_position(cid), Some(SPAWN));

    // Every handled request earns a fresh key, so walking recovers.
    assert!(pump_until(&mut server, &mut client, |_, c| c.session.walker.keys().available() == 1).await?);
    assert_eq!(client.walk(Direction::South, false), Ok(1));
    assert!(
        pump_until(&mut server, &mut client, |s, _| s.player_position(cid) == Some(TilePos::new(1000, 1001, 0)))
            .await?
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unmatched_confirm_triggers_resync() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, mut client, _cid) = connect_pair("Lagger", &[]).await?;

    let now = client.now();
    client.session.handle(now, NetMsg::StepConfirm { sequence: 42 });
    assert!(client.session.walker.walking_failed());
    assert_eq!(client.walk(Direction::South, false), Err(WalkBlocked::AwaitingResync));

    let recovered = pump_until(&mut server, &mut client, |_, c| {
        !c.session.walker.walking_failed() && c.session.walker.keys().available() == 5
    })
    .await?;
    assert!(recovered, "resync was never answered");
    assert_eq!(client.session.player_position(), Some(SPAWN));
    assert_eq!(client.walk(Direction::South, false), Ok(1));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn boat_carries_player_on_both_sides() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, mut client, cid) = connect_pair_with("Sailor", |server| {
        server.set_spawn_point(TilePos::new(2000, 2000, 0));
        server.spawn_boat(TilePos::new(2001, 2000, 0));
    })
    .await?;
    let boat = EntityId(FIRST_BOAT_SERIAL);
    assert_eq!(client.session.player_position(), Some(TilePos::new(2000, 2000, 0)));

    assert!(pump_until(&mut server, &mut client, |_, c| c.session.world.exists(boat)).await?);

    client.steer_boat(boat, Direction::North, 3);

    let boat_target = TilePos::new(2001, 1999, 0);
    let player_target = TilePos::new(2000, 1999, 0);
    let arrived = pump_until(&mut server, &mut client, |_, c| {
        c.session.world.position(boat) == Some(boat_target) && !c.session.boats.is_tracking(boat)
    })
    .await?;
    assert!(arrived, "boat never finished its step");

    assert_eq!(server.boat_position(boat), Some(boat_target));
    assert_eq!(server.player_position(cid), Some(player_target));
    assert_eq!(client.session.player_position(), Some(player_target));
    assert_eq!(client.session.walker.authoritative(), player_target);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_keys_keep_walking_until_released() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, mut client, cid) = connect_pair("Strider", &[]).await?;
    assert!(pump_until(&mut server, &mut client, |_, c| c.session.walker.keys().available() == 5).await?);

    assert_eq!(client.exec_console("hold s run"), vec!["Holding South".to_string()]);
    let two_tiles = TilePos::new(1000, 1002, 0);
    let walked = pump_until(&mut server, &mut client, |s, _| {
        s.player_position(cid).is_some_and(|p| p.y >= two_tiles.y)
    })
    .await?;
    assert!(walked, "held keys never moved the player two tiles");

    client.exec_console("release");
    assert!(pump_until(&mut server, &mut client, |_, c| c.session.walker.pending() == 0).await?);
    let stopped = server.player_position(cid);
    assert_eq!(client.session.walker.authoritative(), stopped.unwrap_or(SPAWN));

    for _ in 0..20 {
        server.step()?;
        client.frame();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.player_position(cid), stopped);

    Ok(())
}

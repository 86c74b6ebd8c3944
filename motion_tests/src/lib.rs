//! Shared plumbing for the socket-level tests: a bound server, a connected
//! client and a loop that drives both until a condition holds.

use std::time::Duration;

use motion_client::GameClient;
use motion_server::server::bind_ephemeral;
use motion_server::GameServer;
use motion_shared::math::TilePos;
use motion_shared::net::ClientId;

/// Upper bound on [`pump_until`] rounds.
pub const MAX_PUMP_ROUNDS: usize = 400;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Binds a server and connects one client to it.
///
/// `boats` are spawned before the handshake so the client learns about them
/// in its initial state.
pub async fn connect_pair(
    name: &str,
    boats: &[TilePos],
) -> anyhow::Result<(GameServer, GameClient, ClientId)> {
    connect_pair_with(name, |server| {
        for pos in boats {
            server.spawn_boat(*pos);
        }
    })
    .await
}

/// Like [`connect_pair`], with `setup` run on the server before the client
/// connects.
pub async fn connect_pair_with<F>(name: &str, setup: F) -> anyhow::Result<(GameServer, GameClient, ClientId)>
where
    F: FnOnce(&mut GameServer),
{
    let (mut server, mut cfg) = bind_ephemeral(60).await?;
    setup(&mut server);
    cfg.player_name = name.to_string();

    let (accepted, client) = tokio::join!(server.accept_one(), GameClient::connect(&cfg));
    Ok((server, client?, accepted?))
}

/// Steps server and client alternately until `done` holds.
///
/// Returns `false` if it never did.
pub async fn pump_until<F>(server: &mut GameServer, client: &mut GameClient, mut done: F) -> anyhow::Result<bool>
where
    F: FnMut(&GameServer, &GameClient) -> bool,
{
    for _ in 0..MAX_PUMP_ROUNDS {
        server.step()?;
        client.frame();
        if done(server, client) {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(false)
}

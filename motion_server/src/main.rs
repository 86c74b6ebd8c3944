//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p motion_server -- [--addr 127.0.0.1:40000] [--tick-hz 60] [--spawn 1000,1000] [--boat 1005,1000]
//!
//! The server listens for client connections, validates their steps and moves
//! boats on request.
//!
//! Console commands:
//!   boat <x> <y> [z] - Spawn a boat
//!   status           - Show server status
//!   quit             - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use motion_server::server::GameServer;
use motion_shared::{config::MotionConfig, math::TilePos};
use tokio::sync::mpsc;
use tracing::info;

struct Args {
    cfg: MotionConfig,
    spawn: Option<TilePos>,
    boats: Vec<TilePos>,
}

fn parse_tile(arg: &str) -> Option<TilePos> {
    let mut parts = arg.split(',').filter_map(|p| p.trim().parse::<u16>().ok());
    Some(TilePos::new(parts.next()?, parts.next()?, 0))
}

fn parse_args() -> Args {
    let mut cfg = MotionConfig::default();
    let mut spawn = None;
    let mut boats = Vec::new();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--spawn" if i + 1 < args.len() => {
                spawn = parse_tile(&args[i + 1]);
                i += 2;
            }
            "--boat" if i + 1 < args.len() => {
                boats.extend(parse_tile(&args[i + 1]));
                i += 2;
            }
            _ => i += 1,
        }
    }
    Args { cfg, spawn, boats }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, spawn, boats } = parse_args();
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting server");

    let mut server = GameServer::new(cfg.clone()).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    if let Some(pos) = spawn {
        server.set_spawn_point(pos);
    }
    for pos in boats {
        server.spawn_boat(pos);
    }

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'boat <x> <y>' to spawn a boat, 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let tick_interval = std::time::Duration::from_secs_f32(1.0 / cfg.tick_hz.max(1) as f32);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new clients (non-blocking).
        if let Ok(Some(cid)) = server.try_accept(std::time::Duration::from_millis(1)).await {
            info!(client_id = ?cid, "New client accepted");
        }

        server.step()?;
        if server.quit_requested() {
            info!("Server shutting down");
            return Ok(());
        }

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}

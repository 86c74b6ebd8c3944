//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p motion_client -- [--addr 127.0.0.1:40000] [--name Player] [--tick-hz 60]
//!
//! The client connects to the server and runs movement frames at the tick
//! rate. Typed commands drive it.
//!
//! Console commands:
//!   walk <dir>                  - Step (or turn) in a direction (n, ne, e, ...)
//!   run <dir>                   - Same, running
//!   hold <dir> [run]            - Keep walking every frame until released
//!   release                     - Stop walking
//!   boat <id> <dir> [speed]     - Ask the server to move a boat
//!   status                      - Show movement state
//!   quit                        - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use motion_client::client::{ClientState, GameClient};
use motion_shared::config::MotionConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> MotionConfig {
    let mut cfg = MotionConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, name = %cfg.player_name, tick_hz = cfg.tick_hz, "Starting client");

    let mut client = GameClient::connect(&cfg).await?;

    // Console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
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

    println!("Connected. Type 'walk <dir>', 'hold <dir>', 'boat <id> <dir>', 'status' or 'quit'.");

    let frame = Duration::from_secs_f32(1.0 / cfg.tick_hz.max(1) as f32);
    let mut ticker = tokio::time::interval(frame);

    loop {
        ticker.tick().await;

        while let Ok(line) = console_rx.try_recv() {
            if matches!(line.as_str(), "quit" | "exit") {
                info!("Client shutting down");
                return Ok(());
            }
            for out in client.exec_console(&line) {
                println!("{out}");
            }
        }

        client.frame();

        if client.state == ClientState::Disconnected {
            info!("Connection lost, exiting");
            return Ok(());
        }
    }
}

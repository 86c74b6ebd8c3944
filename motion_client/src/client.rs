//! Client implementation.
//!
//! The client maintains:
//! - A reliable TCP stream to the server, split into a reader task and a
//!   writer task
//! - A single-consumer inbound queue, so every message is applied on the
//!   thread that calls [`GameClient::frame`]
//! - The movement [`Session`]
//! - A small console for driving it by hand

use std::net::SocketAddr;

use anyhow::Context;
use motion_shared::{
    clock::{Clock, SystemClock},
    config::MotionConfig,
    math::Direction,
    net::{ClientId, NetMsg, ReliableConn, PROTOCOL_VERSION},
    world::EntityId,
};
use tokio::{
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    input::{parse_direction, InputState},
    session::Session,
    walker::WalkBlocked,
};

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Disconnected,
}

/// High-level game client.
pub struct GameClient {
    pub client_id: ClientId,
    pub state: ClientState,
    pub session: Session,
    /// Movement keys applied every frame.
    pub held: InputState,

    clock: SystemClock,
    inbound: mpsc::UnboundedReceiver<NetMsg>,
    outbound: mpsc::UnboundedSender<NetMsg>,
    reader: JoinHandle<()>,
}

impl GameClient {
    /// Connects to a server and performs the handshake.
    pub async fn connect(cfg: &MotionConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, "Connecting to server");

        let mut conn = ReliableConn::connect(server_addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
            name: cfg.player_name.clone(),
        })
        .await?;

        let (client_id, player, position, direction) = match conn.recv().await? {
            NetMsg::Welcome {
                client_id,
                player,
                position,
                direction,
            } => (client_id, player, position, direction),
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };

        info!(client_id = ?client_id, player = ?player, x = position.x, y = position.y, "Connected to server");

        let (reader, writer) = conn.into_split();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            if let Err(e) = reader.forward(in_tx, |msg| msg).await {
                debug!(error = %e, "Reader stopped");
            }
        });
        tokio::spawn(async move {
            if let Err(e) = writer.drain(out_rx).await {
                warn!(error = %e, "Writer stopped");
            }
        });

        Ok(Self {
            client_id,
            state: ClientState::Connected,
            session: Session::new(cfg, player, position, direction),
            held: InputState::default(),
            clock: SystemClock::new(),
            inbound: in_rx,
            outbound: out_tx,
            reader,
        })
    }

    /// Milliseconds on the client's clock.
    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Runs one frame: applies queued messages, advances time, sends packets.
    ///
    /// Returns how many inbound messages were applied.
    pub fn frame(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut handled = 0;
        loop {
            match self.inbound.try_recv() {
                Ok(NetMsg::Disconnect { reason }) => {
                    info!(reason = %reason, "Disconnected by server");
                    self.state = ClientState::Disconnected;
                }
                Ok(msg) => {
                    self.session.handle(now, msg);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.state == ClientState::Connected {
                        warn!("Connection closed");
                        self.state = ClientState::Disconnected;
                    }
                    break;
                }
            }
        }
        if let Some(Err(blocked)) = self.session.apply_input(now, self.held) {
            if blocked != WalkBlocked::Throttled {
                debug!(?blocked, "Held step refused");
            }
        }
        self.session.update(now);
        self.session.flush_into(&mut self.outbound);
        handled
    }

    /// Requests a player step and sends it right away.
    pub fn walk(&mut self, direction: Direction, running: bool) -> Result<u8, WalkBlocked> {
        let now = self.clock.now_ms();
        let result = self.session.walk(now, direction, running);
        self.session.flush_into(&mut self.outbound);
        result
    }

    /// Asks the server to move a boat and sends the request right away.
    pub fn steer_boat(&mut self, vehicle: EntityId, direction: Direction, speed: u8) {
        let now = self.clock.now_ms();
        self.session.steer_boat(now, vehicle, direction, speed);
        self.session.flush_into(&mut self.outbound);
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            return Vec::new();
        };

        match cmd {
            "walk" | "run" => {
                let Some(dir) = tokens.get(1).and_then(|t| parse_direction(t)) else {
                    return vec![format!("Usage: {cmd} <direction>")];
                };
                match self.walk(dir, cmd == "run") {
                    Ok(seq) => vec![format!("Step {seq} sent ({dir:?})")],
                    Err(blocked) => vec![format!("Step refused: {blocked:?}")],
                }
            }
            "hold" => {
                let Some(dir) = tokens.get(1).and_then(|t| parse_direction(t)) else {
                    return vec!["Usage: hold <direction> [run]".to_string()];
                };
                self.held = InputState::toward(dir, tokens.get(2) == Some(&"run"));
                vec![format!("Holding {dir:?}")]
            }
            "release" => {
                self.held = InputState::default();
                vec!["Released".to_string()]
            }
            "boat" => {
                let vehicle = tokens.get(1).and_then(|t| parse_serial(t));
                let dir = tokens.get(2).and_then(|t| parse_direction(t));
                let (Some(vehicle), Some(dir)) = (vehicle, dir) else {
                    return vec!["Usage: boat <id> <direction> [speed]".to_string()];
                };
                let speed = tokens.get(3).and_then(|t| t.parse().ok()).unwrap_or(3);
                self.steer_boat(EntityId(vehicle), dir, speed);
                vec![format!("Boat {vehicle:#x} asked to move {dir:?} at speed {speed}")]
            }
            "status" => {
                let s = &self.session;
                let mut out = Vec::new();
                out.push(format!("State: {:?}", self.state));
                out.push(format!("Client ID: {:?}", self.client_id));
                out.push(format!("Position: {:?}", s.player_position()));
                out.push(format!("Authoritative: {:?}", s.walker.authoritative()));
                out.push(format!(
                    "Pending steps: {} (next seq {})",
                    s.walker.pending(),
                    s.walker.next_sequence()
                ));
                out.push(format!("Fast-walk keys: {}", s.walker.keys().available()));
                if s.walker.walking_failed() {
                    out.push("Waiting for resync".to_string());
                }
                out.push(format!("Entities: {}", s.world.len()));
                out
            }
            _ => vec![format!("Unknown command: {cmd}")],
        }
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Parses a decimal or `0x`-prefixed serial.
fn parse_serial(s: &str) -> Option<u32> {
    match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

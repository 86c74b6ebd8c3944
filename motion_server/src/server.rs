//! Server implementation.
//!
//! A small authoritative server for the movement protocol. It supports:
//! - Client handshake with a spawn position and an initial fast-walk key batch
//! - Step validation by sequence number and fast-walk key, answered with a
//!   confirm or a deny
//! - Resync requests
//! - Boats that move one tile per request and carry nearby players
//!
//! Each connection gets a reader task feeding one shared inbound queue and a
//! writer task draining a per-client outbound queue; all game state is only
//! touched from [`GameServer::step`].
//!
//! Determinism notes:
//! - Use stable ordering when iterating collections.

use anyhow::Context;
use motion_shared::{
    config::MotionConfig,
    math::{Direction, TilePos},
    net::{
        ClientId, EntitySpawn, NetMsg, PacketSink, ReliableConn, ReliableListener, Rider,
        PROTOCOL_VERSION,
    },
    world::{EntityId, EntityKind},
};
use std::{
    collections::{BTreeMap, HashSet},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

/// Keys handed out when a client logs in.
pub const LOGIN_KEY_COUNT: usize = 5;

/// First serial used for boats; players count up from 1.
pub const FIRST_BOAT_SERIAL: u32 = 0x4000_0001;

const FIRST_SEQUENCE: u8 = 1;

/// `None` marks a closed connection.
type Inbound = (ClientId, Option<NetMsg>);

/// Connected client state.
struct ClientState {
    name: String,
    player: EntityId,
    position: TilePos,
    direction: Direction,
    expected_sequence: u8,
    /// Issued, not yet spent.
    keys: HashSet<u32>,
    out: mpsc::UnboundedSender<NetMsg>,
}

#[derive(Debug, Clone, Copy)]
struct Boat {
    position: TilePos,
    facing: Direction,
}

/// Game server.
pub struct GameServer {
    pub cfg: MotionConfig,
    listener: ReliableListener,
    clients: BTreeMap<ClientId, ClientState>,
    boats: BTreeMap<EntityId, Boat>,

    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,

    spawn_point: TilePos,
    next_player_serial: u32,
    next_boat_serial: u32,
    tick: u32,
    quit: bool,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl GameServer {
    /// Creates a new server bound to `cfg.server_addr`.
    pub async fn new(cfg: MotionConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;
        Ok(Self::with_listener(cfg, listener))
    }

    fn with_listener(cfg: MotionConfig, listener: ReliableListener) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            cfg,
            listener,
            clients: BTreeMap::new(),
            boats: BTreeMap::new(),
            inbound_tx,
            inbound_rx,
            spawn_point: TilePos::new(1000, 1000, 0),
            next_player_serial: 1,
            next_boat_serial: FIRST_BOAT_SERIAL,
            tick: 0,
            quit: false,
            console_rx: None,
        }
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Where new players appear.
    pub fn set_spawn_point(&mut self, pos: TilePos) {
        self.spawn_point = pos;
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Set once the console asked for shutdown.
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn player_position(&self, client: ClientId) -> Option<TilePos> {
        self.clients.get(&client).map(|c| c.position)
    }

    pub fn boat_position(&self, boat: EntityId) -> Option<TilePos> {
        self.boats.get(&boat).map(|b| b.position)
    }

    /// Accepts exactly one client (handshake + initial state).
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (conn, peer) = self.listener.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientId>> {
        match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ClientId> {
        let (protocol, name) = match conn.recv().await? {
            NetMsg::Hello { protocol, name } => (protocol, name),
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        };
        if protocol != PROTOCOL_VERSION {
            conn.send(&NetMsg::Disconnect {
                reason: format!("protocol {protocol} not supported"),
            })
            .await?;
            anyhow::bail!("client protocol {protocol} != {PROTOCOL_VERSION}");
        }

        let id = ClientId::new_unique();
        let player = EntityId(self.next_player_serial);
        self.next_player_serial += 1;
        let position = self.spawn_point;
        let direction = Direction::South;

        conn.send(&NetMsg::Welcome {
            client_id: id,
            player,
            position,
            direction,
        })
        .await?;

        let keys: Vec<u32> = (0..LOGIN_KEY_COUNT).map(|_| fresh_key()).collect();
        conn.send(&NetMsg::FastWalkKeys { keys: keys.clone() })
            .await?;
        for (boat_id, boat) in &self.boats {
            conn.send(&boat_spawn(*boat_id, boat)).await?;
        }

        let (reader, writer) = conn.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Err(e) = writer.drain(out_rx).await {
                debug!(client_id = ?id, error = %e, "Writer stopped");
            }
        });
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = reader.forward(tx.clone(), move |msg| (id, Some(msg))).await {
                debug!(client_id = ?id, error = %e, "Reader stopped");
            }
            let _ = tx.send((id, None));
        });

        self.clients.insert(
            id,
            ClientState {
                name,
                player,
                position,
                direction,
                expected_sequence: FIRST_SEQUENCE,
                keys: keys.into_iter().collect(),
                out: out_tx,
            },
        );

        info!(client_id = ?id, %peer, player = ?player, "Client connected");
        Ok(id)
    }

    /// Spawns a boat and announces it to everyone connected.
    pub fn spawn_boat(&mut self, position: TilePos) -> EntityId {
        let id = EntityId(self.next_boat_serial);
        self.next_boat_serial += 1;
        let boat = Boat {
            position,
            facing: Direction::North,
        };
        self.boats.insert(id, boat);
        self.broadcast(&boat_spawn(id, &boat));
        info!(boat = ?id, x = position.x, y = position.y, "Boat spawned");
        id
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz.max(1) as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step()?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Processes everything queued since the last step.
    pub fn step(&mut self) -> anyhow::Result<usize> {
        self.process_console_commands();

        let mut handled = 0;
        while let Ok((client, msg)) = self.inbound_rx.try_recv() {
            match msg {
                Some(msg) => {
                    self.handle_message(client, msg);
                    handled += 1;
                }
                None => {
                    if let Some(c) = self.clients.remove(&client) {
                        info!(client_id = ?client, name = %c.name, "Client disconnected");
                    }
                }
            }
        }
        self.tick += 1;
        Ok(handled)
    }

    fn process_console_commands(&mut self) {
        // Collect lines first to avoid borrow conflict
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            for out in self.exec_console(&line) {
                println!("{out}");
            }
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            return Vec::new();
        };

        match cmd {
            "boat" => {
                let coords: Vec<i64> = tokens[1..].iter().filter_map(|t| t.parse().ok()).collect();
                match coords.as_slice() {
                    [x, y] | [x, y, _] if in_u16(*x) && in_u16(*y) => {
                        let z = coords.get(2).copied().unwrap_or(0).clamp(-128, 127) as i8;
                        let id = self.spawn_boat(TilePos::new(*x as u16, *y as u16, z));
                        vec![format!("Boat {:#x} spawned", id.0)]
                    }
                    _ => vec!["Usage: boat <x> <y> [z]".to_string()],
                }
            }
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Tick: {}", self.tick));
                out.push(format!("Clients: {}", self.clients.len()));
                for (id, c) in &self.clients {
                    out.push(format!(
                        "  {:?} {}: player={:?} pos={:?} facing={:?} next_seq={} keys={}",
                        id,
                        c.name,
                        c.player,
                        c.position,
                        c.direction,
                        c.expected_sequence,
                        c.keys.len()
                    ));
                }
                for (id, b) in &self.boats {
                    out.push(format!("  boat {:#x}: pos={:?} facing={:?}", id.0, b.position, b.facing));
                }
                out
            }
            "quit" | "exit" => {
                self.quit = true;
                vec!["Shutting down".to_string()]
            }
            _ => vec![format!("Unknown command: {cmd}")],
        }
    }

    fn handle_message(&mut self, client: ClientId, msg: NetMsg) {
        match msg {
            NetMsg::MoveRequest {
                direction,
                running,
                sequence,
                fast_walk_key,
            } => self.on_move(client, Direction::from_byte(direction), running, sequence, fast_walk_key),
            NetMsg::ResyncRequest => self.on_resync(client),
            NetMsg::VehicleMoveRequest {
                vehicle,
                direction,
                speed,
            } => self.on_boat_move(vehicle, Direction::from_byte(direction), speed),
            other => {
                debug!(client_id = ?client, ?other, "Unexpected client message");
            }
        }
    }

    fn on_move(&mut self, client: ClientId, dir: Direction, running: bool, sequence: u8, key: u32) {
        let Some(c) = self.clients.get_mut(&client) else {
            return;
        };

        let key_ok = c.keys.remove(&key);
        if sequence != c.expected_sequence || !key_ok {
            warn!(
                client_id = ?client,
                seq = sequence,
                expected = c.expected_sequence,
                key_ok,
                "Step denied"
            );
            c.out.send_packet(NetMsg::StepDeny {
                sequence,
                x: c.position.x,
                y: c.position.y,
                z: c.position.z,
            });
            c.expected_sequence = FIRST_SEQUENCE;
        } else {
            if c.direction == dir {
                c.position = c.position.step(dir);
            } else {
                c.direction = dir;
            }
            c.out.send_packet(NetMsg::StepConfirm { sequence });
            c.expected_sequence = following(sequence);
            debug!(client_id = ?client, seq = sequence, running, x = c.position.x, y = c.position.y, "Step confirmed");
        }

        let key = fresh_key();
        c.keys.insert(key);
        c.out.send_packet(NetMsg::AddFastWalkKey { key });
    }

    fn on_resync(&mut self, client: ClientId) {
        let Some(c) = self.clients.get_mut(&client) else {
            return;
        };
        c.expected_sequence = FIRST_SEQUENCE;
        c.out.send_packet(NetMsg::PlayerPosition {
            x: c.position.x,
            y: c.position.y,
            z: c.position.z,
            direction: c.direction.as_byte(),
        });

        let keys: Vec<u32> = (0..LOGIN_KEY_COUNT).map(|_| fresh_key()).collect();
        c.keys = keys.iter().copied().collect();
        c.out.send_packet(NetMsg::FastWalkKeys { keys });
        info!(client_id = ?client, "Resync answered");
    }

    fn on_boat_move(&mut self, vehicle: EntityId, dir: Direction, speed: u8) {
        let Some(boat) = self.boats.get_mut(&vehicle) else {
            debug!(boat = ?vehicle, "Move for unknown boat");
            return;
        };

        let from = boat.position;
        let to = from.step(dir);
        if to == from {
            return;
        }

        let mut riders = Vec::new();
        for c in self.clients.values_mut() {
            if aboard(from, c.position) {
                c.position = c.position.step(dir);
                riders.push(Rider {
                    id: c.player,
                    position: c.position,
                });
            }
        }

        boat.position = to;
        boat.facing = dir;
        let msg = NetMsg::VehicleMove {
            vehicle,
            speed,
            moving_dir: dir.as_byte(),
            facing_dir: dir.as_byte(),
            x: to.x,
            y: to.y,
            z: to.z,
            riders,
        };
        self.broadcast(&msg);
        debug!(boat = ?vehicle, x = to.x, y = to.y, "Boat moved");
    }

    fn broadcast(&mut self, msg: &NetMsg) {
        for c in self.clients.values_mut() {
            c.out.send_packet(msg.clone());
        }
    }
}

fn boat_spawn(id: EntityId, boat: &Boat) -> NetMsg {
    NetMsg::EntitySpawn(EntitySpawn {
        id,
        kind: EntityKind::Multi {
            components: Vec::new(),
            house: false,
        },
        position: boat.position,
        direction: boat.facing,
    })
}

/// Within one tile of the boat's centre, on the same deck height.
fn aboard(boat: TilePos, pos: TilePos) -> bool {
    (boat.x as i32 - pos.x as i32).abs() <= 1
        && (boat.y as i32 - pos.y as i32).abs() <= 1
        && (boat.z as i32 - pos.z as i32).abs() <= 5
}

fn following(sequence: u8) -> u8 {
    if sequence == u8::MAX {
        FIRST_SEQUENCE
    } else {
        sequence + 1
    }
}

fn fresh_key() -> u32 {
    rand::random::<u32>().max(1)
}

fn in_u16(v: i64) -> bool {
    (0..=u16::MAX as i64).contains(&v)
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, MotionConfig)> {
    let mut cfg = MotionConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };

    let listener = ReliableListener::bind(cfg.server_addr.parse()?).await?;
    cfg.server_addr = listener.local_addr()?.to_string();

    Ok((GameServer::with_listener(cfg.clone(), listener), cfg))
}

//! Session context.
//!
//! One `Session` per connected world. It owns the entity store, both movement
//! components and the outbound packet queue, and is driven from a single
//! thread: inbound messages through [`Session::handle`], time through
//! [`Session::update`].

use motion_shared::{
    config::MotionConfig,
    math::{Direction, TilePos},
    net::{NetMsg, PacketSink},
    world::{EntityId, EntityKind, EntityStore, World},
};
use tracing::{debug, info};

use crate::{
    boat::BoatTracker,
    input::InputState,
    walker::{StepSequencer, WalkBlocked},
};

pub struct Session {
    pub world: World,
    pub walker: StepSequencer,
    pub boats: BoatTracker,
    player: EntityId,
    outbox: Vec<NetMsg>,
}

impl Session {
    pub fn new(cfg: &MotionConfig, player: EntityId, position: TilePos, direction: Direction) -> Self {
        let mut world = World::default();
        world.spawn(player, EntityKind::Mobile, position, direction);
        Self {
            world,
            walker: StepSequencer::new(cfg.walker, player, position),
            boats: BoatTracker::new(cfg.boats),
            player,
            outbox: Vec::new(),
        }
    }

    pub fn player(&self) -> EntityId {
        self.player
    }

    /// Where the player is drawn right now (speculative).
    pub fn player_position(&self) -> Option<TilePos> {
        self.world.position(self.player)
    }

    pub fn walk(&mut self, now: u64, direction: Direction, running: bool) -> Result<u8, WalkBlocked> {
        self.walker
            .request_step(&mut self.world, &mut self.outbox, now, direction, running)
    }

    /// Steps towards whatever the held keys point at. `None` while idle.
    pub fn apply_input(&mut self, now: u64, input: InputState) -> Option<Result<u8, WalkBlocked>> {
        let dir = input.direction()?;
        Some(self.walk(now, dir, input.running))
    }

    pub fn steer_boat(&mut self, now: u64, vehicle: EntityId, direction: Direction, speed: u8) {
        self.boats
            .move_request(&mut self.outbox, now, vehicle, direction, speed);
    }

    /// Applies one inbound message.
    pub fn handle(&mut self, now: u64, msg: NetMsg) {
        match msg {
            NetMsg::StepConfirm { sequence } => {
                self.walker.confirm(&mut self.outbox, sequence);
            }
            NetMsg::StepDeny { sequence, x, y, z } => {
                self.walker
                    .deny(&mut self.world, sequence, TilePos::new(x, y, z));
            }
            NetMsg::PlayerPosition { x, y, z, direction } => {
                self.walker.resync_complete(
                    &mut self.world,
                    TilePos::new(x, y, z),
                    Direction::from_byte(direction),
                );
            }
            NetMsg::FastWalkKeys { keys } => {
                self.walker.keys_mut().replace(&keys);
            }
            NetMsg::AddFastWalkKey { key } => {
                if !self.walker.keys_mut().add(key) {
                    debug!(key, "Fast-walk key pool full, key dropped");
                }
            }
            NetMsg::VehicleMove {
                vehicle,
                speed,
                moving_dir,
                facing_dir,
                x,
                y,
                z,
                riders,
            } => {
                let target = TilePos::new(x, y, z);
                let queued = self.boats.add_step(
                    &self.world,
                    now,
                    vehicle,
                    speed,
                    Direction::from_byte(moving_dir),
                    Direction::from_byte(facing_dir),
                    target,
                );
                if queued {
                    for rider in riders {
                        self.boats
                            .push_passenger(vehicle, rider.id, target.offset_to(rider.position));
                    }
                }
            }
            NetMsg::EntitySpawn(spawn) => {
                self.world
                    .spawn(spawn.id, spawn.kind, spawn.position, spawn.direction);
            }
            NetMsg::EntityDelete { id } => {
                self.boats.remove_vehicle(&mut self.world, id);
                self.boats.remove_passenger(id);
                self.world.despawn(id);
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Server closed the session");
            }
            other => {
                debug!(?other, "Unexpected message for session");
            }
        }
    }

    /// Per-frame tick.
    pub fn update(&mut self, now: u64) {
        self.walker.update(now);

        let before = self.player_position();
        self.boats.update(&mut self.world, now);
        let after = self.player_position();
        if let Some(pos) = after.filter(|_| after != before) {
            self.walker.carried(pos);
        }
    }

    /// Takes every packet queued since the last call.
    pub fn drain_outbox(&mut self) -> Vec<NetMsg> {
        std::mem::take(&mut self.outbox)
    }

    /// Moves queued packets into `sink`, oldest first.
    pub fn flush_into(&mut self, sink: &mut impl PacketSink) {
        for msg in self.outbox.drain(..) {
            sink.send_packet(msg);
        }
    }
}

//! Server-driven vehicle motion.
//!
//! Boats are never predicted. The server sends one tile step at a time; the
//! tracker queues those steps per vehicle, slides the boat (and everything on
//! it) towards the next tile with a pixel offset, and snaps to the exact tile
//! once the step's duration has elapsed.
//!
//! Passengers are stored as fixed tile offsets inside the vehicle's frame:
//! a passenger's world tile is always `vehicle tile - offset`.

use std::collections::{BTreeMap, VecDeque};

use motion_shared::{
    config::BoatConfig,
    math::{Direction, TileOffset, TilePos, Vec3, PIXELS_PER_Z},
    net::{NetMsg, PacketSink},
    world::{EntityId, EntityStore},
};
use tracing::debug;

use crate::interp;

pub const SLOW_STEP_MS: u64 = 1000;
pub const NORMAL_STEP_MS: u64 = 500;
pub const FAST_STEP_MS: u64 = 250;

/// Step duration for a wire speed code.
///
/// Codes above 4 are tens of milliseconds; unknown low codes fall back to the
/// normal speed.
pub fn step_duration(speed: u8) -> u64 {
    match speed {
        2 => SLOW_STEP_MS,
        4 => FAST_STEP_MS,
        s if s > 4 => s as u64 * 10,
        _ => NORMAL_STEP_MS,
    }
}

/// One server-issued vehicle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleStep {
    pub vehicle: EntityId,
    pub speed: u8,
    /// Expected duration in milliseconds.
    pub duration: u64,
    pub target: TilePos,
    pub moving_dir: Direction,
    pub facing_dir: Direction,
}

/// A passenger glued to a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiderOffset {
    pub passenger: EntityId,
    pub offset: TileOffset,
}

#[derive(Debug, Clone)]
struct Track {
    steps: VecDeque<VehicleStep>,
    /// Start of the step at the front of the queue.
    last_step_at: u64,
    /// Structural parts, remembered so they can be released after the
    /// vehicle itself is gone from the store.
    parts: Vec<EntityId>,
}

/// Queues and interpolates vehicle steps, carrying passengers along.
#[derive(Debug, Clone)]
pub struct BoatTracker {
    max_queued: usize,
    tracks: BTreeMap<EntityId, Track>,
    riders: BTreeMap<EntityId, Vec<RiderOffset>>,
    /// When the last outbound move request (or the step after it) happened.
    last_request_at: Option<u64>,
}

impl BoatTracker {
    pub fn new(cfg: BoatConfig) -> Self {
        Self {
            max_queued: cfg.max_queued_steps.max(1),
            tracks: BTreeMap::new(),
            riders: BTreeMap::new(),
            last_request_at: None,
        }
    }

    /// Asks the server to move `vehicle` and starts timing the answer.
    pub fn move_request(
        &mut self,
        sink: &mut impl PacketSink,
        now: u64,
        vehicle: EntityId,
        direction: Direction,
        speed: u8,
    ) {
        sink.send_packet(NetMsg::VehicleMoveRequest {
            vehicle,
            direction: direction.as_byte(),
            speed,
        });
        self.last_request_at = Some(now);
    }

    /// Queues a server step for `vehicle`. Returns false if the vehicle is
    /// unknown to the store.
    #[allow(clippy::too_many_arguments)]
    pub fn add_step(
        &mut self,
        store: &impl EntityStore,
        now: u64,
        vehicle: EntityId,
        speed: u8,
        moving_dir: Direction,
        facing_dir: Direction,
        target: TilePos,
    ) -> bool {
        if !store.exists(vehicle) {
            debug!(vehicle = ?vehicle, "Step for unknown vehicle ignored");
            return false;
        }

        let track = self.tracks.entry(vehicle).or_insert_with(|| Track {
            steps: VecDeque::new(),
            last_step_at: now,
            parts: Vec::new(),
        });
        track.parts = store.components(vehicle);
        let was_empty = track.steps.is_empty();

        let duration = match self.last_request_at {
            Some(at) if !was_empty && now > at => now - at,
            _ => step_duration(speed),
        };

        track.steps.push_back(VehicleStep {
            vehicle,
            speed,
            duration,
            target,
            moving_dir,
            facing_dir,
        });
        while track.steps.len() > self.max_queued {
            track.steps.pop_front();
        }

        if was_empty {
            track.last_step_at = now;
            self.riders.remove(&vehicle);
        }
        if let Some(at) = self.last_request_at.as_mut() {
            *at = now;
        }

        debug!(vehicle = ?vehicle, speed, duration, x = target.x, y = target.y, queued = track.steps.len(), "Vehicle step queued");
        true
    }

    /// Registers or updates a passenger's offset inside `vehicle`.
    ///
    /// A passenger belongs to one vehicle at a time; it is removed from any
    /// other vehicle first.
    pub fn push_passenger(&mut self, vehicle: EntityId, passenger: EntityId, offset: TileOffset) {
        for (other, list) in self.riders.iter_mut() {
            if *other != vehicle {
                list.retain(|r| r.passenger != passenger);
            }
        }
        self.riders.retain(|_, list| !list.is_empty());

        let list = self.riders.entry(vehicle).or_default();
        match list.iter_mut().find(|r| r.passenger == passenger) {
            Some(rider) => rider.offset = offset,
            None => list.push(RiderOffset { passenger, offset }),
        }
    }

    /// Forgets a passenger that left its vehicle.
    pub fn remove_passenger(&mut self, passenger: EntityId) {
        for list in self.riders.values_mut() {
            list.retain(|r| r.passenger != passenger);
        }
        self.riders.retain(|_, list| !list.is_empty());
    }

    /// Drops everything tracked for `vehicle` and clears the offsets of its
    /// parts and passengers.
    ///
    /// Call before the vehicle leaves the store; the parts remembered from its
    /// last queued step are used otherwise.
    pub fn remove_vehicle(&mut self, store: &mut impl EntityStore, vehicle: EntityId) {
        let mut parts = store.components(vehicle);
        if let Some(track) = self.tracks.remove(&vehicle) {
            if parts.is_empty() {
                parts = track.parts;
            }
        }
        release(store, &parts, self.riders.remove(&vehicle));
    }

    /// Advances every queued vehicle to `now`.
    ///
    /// Elapsed steps commit in order; the first unfinished one is interpolated.
    pub fn update(&mut self, store: &mut impl EntityStore, now: u64) {
        let Self { tracks, riders, .. } = self;
        let mut lost = Vec::new();

        for (&vehicle, track) in tracks.iter_mut() {
            if let Some(list) = riders.get_mut(&vehicle) {
                list.retain(|r| store.exists(r.passenger));
            }

            while let Some(step) = track.steps.front().copied() {
                let Some(current) = store.position(vehicle) else {
                    lost.push((vehicle, std::mem::take(&mut track.parts)));
                    break;
                };

                let elapsed = now.saturating_sub(track.last_step_at);
                let stationary = step.facing_dir == step.moving_dir && step.target == current;

                if !stationary && elapsed < step.duration {
                    let p = interp::progress(elapsed, step.duration);
                    let dz = step.target.z as i32 - current.z as i32;
                    let offset = if (step.target.x, step.target.y) == (current.x, current.y) {
                        Vec3::new(0.0, 0.0, dz as f32 * PIXELS_PER_Z * p)
                    } else {
                        interp::step_offset(step.moving_dir, dz, p)
                    };
                    apply_offset(store, vehicle, riders.get(&vehicle), offset);
                    break;
                }

                commit(store, vehicle, riders.get(&vehicle), &step);
                track.steps.pop_front();
                if !stationary {
                    track.last_step_at += step.duration;
                }
            }

            if track.steps.is_empty() {
                riders.remove(&vehicle);
            }
        }

        tracks.retain(|vehicle, track| {
            !track.steps.is_empty() && !lost.iter().any(|(gone, _)| gone == vehicle)
        });
        for (vehicle, parts) in lost {
            debug!(vehicle = ?vehicle, "Vehicle gone, dropping its steps");
            release(store, &parts, riders.remove(&vehicle));
        }
    }

    pub fn is_tracking(&self, vehicle: EntityId) -> bool {
        self.tracks.contains_key(&vehicle)
    }

    pub fn queued(&self, vehicle: EntityId) -> usize {
        self.tracks.get(&vehicle).map_or(0, |t| t.steps.len())
    }

    pub fn steps(&self, vehicle: EntityId) -> impl Iterator<Item = &VehicleStep> {
        self.tracks
            .get(&vehicle)
            .into_iter()
            .flat_map(|t| t.steps.iter())
    }

    pub fn riders(&self, vehicle: EntityId) -> &[RiderOffset] {
        self.riders.get(&vehicle).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn apply_offset(
    store: &mut impl EntityStore,
    vehicle: EntityId,
    riders: Option<&Vec<RiderOffset>>,
    offset: Vec3,
) {
    store.set_offset(vehicle, offset);
    for part in store.components(vehicle) {
        store.set_offset(part, offset);
    }
    for rider in riders.into_iter().flatten() {
        store.set_offset(rider.passenger, offset);
    }
}

fn release(store: &mut impl EntityStore, parts: &[EntityId], riders: Option<Vec<RiderOffset>>) {
    for &part in parts {
        store.set_offset(part, Vec3::ZERO);
    }
    for rider in riders.into_iter().flatten() {
        store.set_offset(rider.passenger, Vec3::ZERO);
    }
}

fn commit(
    store: &mut impl EntityStore,
    vehicle: EntityId,
    riders: Option<&Vec<RiderOffset>>,
    step: &VehicleStep,
) {
    // Parts keep their placement relative to the vehicle.
    let shift = store
        .position(vehicle)
        .map(|from| from.offset_to(step.target))
        .unwrap_or_default();
    store.place(vehicle, step.target);
    store.set_direction(vehicle, step.facing_dir);
    store.set_offset(vehicle, Vec3::ZERO);
    for part in store.components(vehicle) {
        if let Some(at) = store.position(part) {
            store.place(part, at.sub_offset(shift));
        }
        store.set_offset(part, Vec3::ZERO);
    }
    if store.regenerate_house(vehicle) {
        debug!(vehicle = ?vehicle, "House geometry rebuilt");
    }

    for rider in riders.into_iter().flatten() {
        store.place(rider.passenger, step.target.sub_offset(rider.offset));
        store.set_offset(rider.passenger, Vec3::ZERO);
    }
    debug!(vehicle = ?vehicle, x = step.target.x, y = step.target.y, z = step.target.z, "Vehicle step committed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_shared::world::{EntityKind, World};

    const BOAT: EntityId = EntityId(0x4000_0001);
    const PLANK: EntityId = EntityId(0x4000_0002);
    const PLAYER: EntityId = EntityId(1);
    const CRATE: EntityId = EntityId(0x4000_0010);

    fn spawn_boat(world: &mut World, at: TilePos) {
        world.spawn(
            BOAT,
            EntityKind::Multi {
                components: vec![PLANK],
                house: false,
            },
            at,
            Direction::East,
        );
        world.spawn(PLANK, EntityKind::Item, at, Direction::North);
    }

    fn tracker() -> BoatTracker {
        BoatTracker::new(BoatConfig::default())
    }

    #[test]
    fn speed_codes_map_to_durations() {
        assert_eq!(step_duration(2), 1000);
        assert_eq!(step_duration(3), 500);
        assert_eq!(step_duration(4), 250);
        assert_eq!(step_duration(6), 60);
        assert_eq!(step_duration(5), 50);
        assert_eq!(step_duration(0), 500);
        assert_eq!(step_duration(1), 500);
    }

    #[test]
    fn queue_never_exceeds_six() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(100, 100, 0));
        let mut boats = tracker();

        for i in 1..=10u16 {
            boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(100 + i, 100, 0));
            assert!(boats.queued(BOAT) <= 6);
        }
        assert_eq!(boats.queued(BOAT), 6);
        assert_eq!(boats.steps(BOAT).next().unwrap().target.x, 105);
    }

    #[test]
    fn elapsed_step_commits_exact_tile() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(100, 100, 0));
        let mut boats = tracker();

        boats.add_step(&world, 1_000, BOAT, 3, Direction::East, Direction::East, TilePos::new(101, 100, 0));
        boats.update(&mut world, 1_500);

        assert_eq!(world.position(BOAT), Some(TilePos::new(101, 100, 0)));
        assert_eq!(world.offset(BOAT), Some(Vec3::ZERO));
        assert_eq!(world.at(101, 100), &[BOAT, PLANK]);
        assert!(world.at(100, 100).is_empty());
        assert_eq!(boats.queued(BOAT), 0);
        assert!(!boats.is_tracking(BOAT));
    }

    #[test]
    fn partial_step_offsets_boat_parts_and_riders_alike() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(100, 100, 0));
        world.spawn(PLAYER, EntityKind::Mobile, TilePos::new(100, 101, 0), Direction::East);
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(101, 100, 0));
        boats.push_passenger(BOAT, PLAYER, TileOffset::new(0, -1, 0));
        boats.update(&mut world, 250);

        let expected = Vec3::new(11.0, 11.0, 0.0);
        assert_eq!(world.offset(BOAT), Some(expected));
        assert_eq!(world.offset(PLANK), Some(expected));
        assert_eq!(world.offset(PLAYER), Some(expected));
        assert_eq!(world.position(BOAT), Some(TilePos::new(100, 100, 0)));
        assert_eq!(boats.queued(BOAT), 1);
    }

    #[test]
    fn parts_keep_their_place_in_the_vehicle_frame() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(100, 100, 0));
        world.place(PLANK, TilePos::new(99, 101, 0));
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(101, 100, 0));
        boats.add_step(&world, 0, BOAT, 3, Direction::North, Direction::North, TilePos::new(101, 99, 2));

        boats.update(&mut world, 499);
        assert_eq!(world.position(PLANK), Some(TilePos::new(99, 101, 0)));
        assert_eq!(world.offset(PLANK), world.offset(BOAT));

        boats.update(&mut world, 500);
        assert_eq!(world.position(PLANK), Some(TilePos::new(100, 101, 0)));
        assert_eq!(world.offset(PLANK), Some(Vec3::ZERO));

        boats.update(&mut world, 1_000);
        assert_eq!(world.position(BOAT), Some(TilePos::new(101, 99, 2)));
        assert_eq!(world.position(PLANK), Some(TilePos::new(100, 100, 2)));
    }

    #[test]
    fn vertical_step_only_lifts_the_offset() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(10, 10, 5));
        boats.update(&mut world, 125);

        let progress = interp::progress(125, 500);
        let off = world.offset(BOAT).unwrap();
        assert_eq!((off.x, off.y), (0.0, 0.0));
        assert!((off.z - 5.0 * PIXELS_PER_Z * progress).abs() < 1e-4);
        assert_eq!(world.offset(PLANK), Some(off));

        boats.update(&mut world, 500);
        assert_eq!(world.position(BOAT), Some(TilePos::new(10, 10, 5)));
        assert_eq!(world.offset(BOAT), Some(Vec3::ZERO));
    }

    #[test]
    fn commit_carries_passengers_by_offset() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(49, 50, 0));
        world.spawn(PLAYER, EntityKind::Mobile, TilePos::new(51, 50, 0), Direction::East);
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(50, 50, 0));
        boats.push_passenger(BOAT, PLAYER, TileOffset::new(-2, 0, 0));
        boats.update(&mut world, 500);

        assert_eq!(world.position(BOAT), Some(TilePos::new(50, 50, 0)));
        assert_eq!(world.position(PLAYER), Some(TilePos::new(52, 50, 0)));
    }

    #[test]
    fn draining_zeroes_rider_offsets_and_forgets_them() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        world.spawn(CRATE, EntityKind::Item, TilePos::new(10, 11, 0), Direction::North);
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 4, Direction::South, Direction::South, TilePos::new(10, 11, 0));
        boats.push_passenger(BOAT, CRATE, TileOffset::new(0, -1, 0));
        boats.update(&mut world, 100);
        assert_ne!(world.offset(CRATE), Some(Vec3::ZERO));

        boats.update(&mut world, 300);
        assert_eq!(world.offset(CRATE), Some(Vec3::ZERO));
        assert_eq!(world.position(CRATE), Some(TilePos::new(10, 12, 0)));
        assert!(boats.riders(BOAT).is_empty());
    }

    #[test]
    fn overdue_steps_drain_in_one_update() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        let mut boats = tracker();
        for x in 11..=13 {
            boats.add_step(&world, 0, BOAT, 4, Direction::East, Direction::East, TilePos::new(x, 10, 0));
        }

        boats.update(&mut world, 300);
        assert_eq!(world.position(BOAT), Some(TilePos::new(11, 10, 0)));
        assert_eq!(boats.queued(BOAT), 2);
        let off = world.offset(BOAT).unwrap();
        assert!((off.x - 4.4).abs() < 1e-4 && (off.y - 4.4).abs() < 1e-4);

        boats.update(&mut world, 800);
        assert_eq!(world.position(BOAT), Some(TilePos::new(13, 10, 0)));
        assert_eq!(boats.queued(BOAT), 0);
    }

    #[test]
    fn stationary_step_commits_without_waiting() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 2, Direction::East, Direction::East, TilePos::new(10, 10, 0));
        boats.update(&mut world, 1);
        assert_eq!(boats.queued(BOAT), 0);
    }

    #[test]
    fn turning_in_place_does_not_slide() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::North, TilePos::new(10, 10, 0));
        boats.update(&mut world, 200);
        assert_eq!(world.offset(BOAT), Some(Vec3::ZERO));

        boats.update(&mut world, 500);
        assert_eq!(world.direction(BOAT), Some(Direction::North));
    }

    #[test]
    fn answer_to_move_request_is_timed_by_the_clock() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        let mut boats = tracker();
        let mut out: Vec<NetMsg> = Vec::new();

        boats.move_request(&mut out, 1_000, BOAT, Direction::East, 3);
        assert_eq!(
            out,
            vec![NetMsg::VehicleMoveRequest {
                vehicle: BOAT,
                direction: 2,
                speed: 3,
            }]
        );

        boats.add_step(&world, 1_000, BOAT, 3, Direction::East, Direction::East, TilePos::new(11, 10, 0));
        boats.add_step(&world, 1_300, BOAT, 3, Direction::East, Direction::East, TilePos::new(12, 10, 0));

        let durations: Vec<u64> = boats.steps(BOAT).map(|s| s.duration).collect();
        assert_eq!(durations, vec![500, 300]);
    }

    #[test]
    fn restarting_a_queue_clears_stale_riders() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        let mut boats = tracker();

        boats.push_passenger(BOAT, PLAYER, TileOffset::new(1, 1, 0));
        boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(11, 10, 0));
        assert!(boats.riders(BOAT).is_empty());

        boats.push_passenger(BOAT, PLAYER, TileOffset::new(1, 1, 0));
        boats.add_step(&world, 10, BOAT, 3, Direction::East, Direction::East, TilePos::new(12, 10, 0));
        assert_eq!(boats.riders(BOAT).len(), 1);
    }

    #[test]
    fn passenger_rides_one_vehicle_at_a_time() {
        let mut boats = tracker();
        let other = EntityId(0x4000_0099);

        boats.push_passenger(BOAT, PLAYER, TileOffset::new(1, 0, 0));
        boats.push_passenger(BOAT, PLAYER, TileOffset::new(2, 0, 0));
        assert_eq!(boats.riders(BOAT), &[RiderOffset { passenger: PLAYER, offset: TileOffset::new(2, 0, 0) }]);

        boats.push_passenger(other, PLAYER, TileOffset::new(0, 1, 0));
        assert!(boats.riders(BOAT).is_empty());
        assert_eq!(boats.riders(other).len(), 1);

        boats.remove_passenger(PLAYER);
        assert!(boats.riders(other).is_empty());
    }

    #[test]
    fn destroyed_vehicle_is_dropped_on_update() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        world.spawn(PLAYER, EntityKind::Mobile, TilePos::new(10, 10, 0), Direction::East);
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(11, 10, 0));
        boats.push_passenger(BOAT, PLAYER, TileOffset::default());
        boats.update(&mut world, 100);
        world.despawn(BOAT);
        boats.update(&mut world, 200);

        assert!(!boats.is_tracking(BOAT));
        assert!(boats.riders(BOAT).is_empty());
        assert_eq!(world.offset(PLAYER), Some(Vec3::ZERO));
        assert_eq!(world.offset(PLANK), Some(Vec3::ZERO));
    }

    #[test]
    fn removing_a_vehicle_mid_step_releases_parts_and_riders() {
        let mut world = World::default();
        spawn_boat(&mut world, TilePos::new(10, 10, 0));
        world.spawn(PLAYER, EntityKind::Mobile, TilePos::new(10, 10, 0), Direction::East);
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(11, 10, 0));
        boats.push_passenger(BOAT, PLAYER, TileOffset::default());
        boats.update(&mut world, 100);
        assert_ne!(world.offset(PLANK), Some(Vec3::ZERO));

        boats.remove_vehicle(&mut world, BOAT);
        world.despawn(BOAT);

        assert!(!boats.is_tracking(BOAT));
        assert_eq!(world.offset(PLANK), Some(Vec3::ZERO));
        assert_eq!(world.offset(PLAYER), Some(Vec3::ZERO));
    }

    #[test]
    fn unknown_vehicle_step_is_ignored() {
        let world = World::default();
        let mut boats = tracker();
        assert!(!boats.add_step(&world, 0, BOAT, 3, Direction::East, Direction::East, TilePos::new(1, 1, 0)));
        assert!(!boats.is_tracking(BOAT));
    }

    #[test]
    fn house_geometry_rebuilds_on_commit() {
        let mut world = World::default();
        world.spawn(
            BOAT,
            EntityKind::Multi {
                components: vec![],
                house: true,
            },
            TilePos::new(10, 10, 0),
            Direction::East,
        );
        let mut boats = tracker();

        boats.add_step(&world, 0, BOAT, 4, Direction::East, Direction::East, TilePos::new(11, 10, 0));
        boats.update(&mut world, 250);
        assert_eq!(world.house_builds(BOAT), 1);
    }
}

//! Speculative player steps.
//!
//! Every move the player makes is applied locally at once, remembered in a
//! small bounded buffer under a sequence number, and sent to the server. The
//! server answers each step with a confirm or a deny:
//!
//! - confirm: the step (and anything accepted behind it) leaves the buffer and
//!   its target becomes the authoritative position;
//! - confirm for a sequence we never sent, or out of order: local state can no
//!   longer be trusted, so the buffer is dropped and one resync is requested;
//! - deny: the buffer is dropped and the player snaps to the server position.
//!
//! Sequence numbers run 1..=255 and wrap back to 1; 0 is never issued.

use std::collections::VecDeque;

use motion_shared::{
    config::WalkerConfig,
    math::{Direction, TilePos, Vec3},
    net::{NetMsg, PacketSink},
    world::{EntityId, EntityStore},
};
use tracing::{debug, warn};

/// First sequence issued by a fresh or reset sequencer.
pub const FIRST_SEQUENCE: u8 = 1;

/// A Z drop at least this large keeps the previous facing.
const NO_ROTATION_Z_DROP: i32 = 11;

/// One speculative step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRecord {
    pub direction: Direction,
    pub old_direction: Direction,
    pub sequence: u8,
    pub accepted: bool,
    pub running: bool,
    pub no_rotation: bool,
    /// Time (ms) at which the step has finished locally.
    pub deadline: u64,
    pub target: TilePos,
}

/// Fixed-capacity buffer of in-flight steps, oldest first.
///
/// Records are handed out by value; changes go back through [`StepRing::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepRing {
    records: VecDeque<StepRecord>,
    capacity: usize,
}

impl StepRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a record. Returns false when the ring is full.
    pub fn push(&mut self, rec: StepRecord) -> bool {
        if self.is_full() {
            return false;
        }
        self.records.push_back(rec);
        true
    }

    pub fn find(&self, sequence: u8) -> Option<usize> {
        self.records.iter().position(|r| r.sequence == sequence)
    }

    pub fn get(&self, index: usize) -> Option<StepRecord> {
        self.records.get(index).copied()
    }

    /// Overwrites the record at `index`. Returns false if out of range.
    pub fn update(&mut self, index: usize, rec: StepRecord) -> bool {
        match self.records.get_mut(index) {
            Some(slot) => {
                *slot = rec;
                true
            }
            None => false,
        }
    }

    /// Removes the oldest record, shifting the rest down one slot.
    pub fn remove_front(&mut self) -> Option<StepRecord> {
        self.records.pop_front()
    }

    pub fn front(&self) -> Option<StepRecord> {
        self.records.front().copied()
    }

    pub fn back(&self) -> Option<StepRecord> {
        self.records.back().copied()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Pool of server-issued fast-walk keys.
///
/// Empty slots hold 0. Keys are handed out from the first occupied slot, which
/// is not necessarily the oldest key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastWalkKeys {
    slots: Vec<u32>,
}

impl FastWalkKeys {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![0; slots],
        }
    }

    /// Stores `key` in the first empty slot. Returns false if the pool is full
    /// or `key` is 0.
    pub fn add(&mut self, key: u32) -> bool {
        if key == 0 {
            return false;
        }
        match self.slots.iter_mut().find(|k| **k == 0) {
            Some(slot) => {
                *slot = key;
                true
            }
            None => false,
        }
    }

    /// Writes `key` into slot `index`; out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, key: u32) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = key;
        }
    }

    /// Clears the pool and refills it slot by slot from `keys`.
    pub fn replace(&mut self, keys: &[u32]) {
        self.clear();
        for (i, key) in keys.iter().enumerate() {
            self.set(i, *key);
        }
    }

    /// Returns and clears the first occupied slot.
    pub fn take(&mut self) -> Option<u32> {
        let slot = self.slots.iter_mut().find(|k| **k != 0)?;
        Some(std::mem::take(slot))
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|k| *k = 0);
    }

    pub fn available(&self) -> usize {
        self.slots.iter().filter(|k| **k != 0).count()
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }
}

/// Why a step request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkBlocked {
    /// A resync is outstanding.
    AwaitingResync,
    /// The previous step has not finished yet.
    Throttled,
    BufferFull,
    /// The player entity is not in the store.
    NoPlayer,
}

/// What a confirm did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The step was still in progress and is now accepted.
    Accepted,
    /// The oldest, already finished step was acknowledged and removed.
    Slid,
    /// The sequence could not be matched; pending state was dropped.
    Resync,
}

/// Owns the local player's speculative steps and fast-walk keys.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSequencer {
    cfg: WalkerConfig,
    player: EntityId,
    steps: StepRing,
    keys: FastWalkKeys,
    next_sequence: u8,
    /// Leading records whose deadline has passed.
    completed: usize,
    walking_failed: bool,
    resync_sent: bool,
    next_step_at: u64,
    authoritative: TilePos,
}

impl StepSequencer {
    pub fn new(cfg: WalkerConfig, player: EntityId, position: TilePos) -> Self {
        Self {
            cfg,
            player,
            steps: StepRing::new(cfg.max_steps),
            keys: FastWalkKeys::new(cfg.fast_walk_slots),
            next_sequence: FIRST_SEQUENCE,
            completed: 0,
            walking_failed: false,
            resync_sent: false,
            next_step_at: 0,
            authoritative: position,
        }
    }

    pub fn player(&self) -> EntityId {
        self.player
    }

    /// Last position the server agreed to.
    pub fn authoritative(&self) -> TilePos {
        self.authoritative
    }

    pub fn steps(&self) -> &StepRing {
        &self.steps
    }

    pub fn pending(&self) -> usize {
        self.steps.len()
    }

    pub fn next_sequence(&self) -> u8 {
        self.next_sequence
    }

    pub fn walking_failed(&self) -> bool {
        self.walking_failed
    }

    pub fn resync_pending(&self) -> bool {
        self.resync_sent
    }

    pub fn keys(&self) -> &FastWalkKeys {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut FastWalkKeys {
        &mut self.keys
    }

    /// Speculatively moves the player one step and tells the server.
    ///
    /// A request facing a new direction only turns the player in place.
    pub fn request_step(
        &mut self,
        store: &mut impl EntityStore,
        sink: &mut impl PacketSink,
        now: u64,
        direction: Direction,
        running: bool,
    ) -> Result<u8, WalkBlocked> {
        if self.walking_failed {
            return Err(WalkBlocked::AwaitingResync);
        }
        if now < self.next_step_at {
            return Err(WalkBlocked::Throttled);
        }
        if self.steps.is_full() {
            return Err(WalkBlocked::BufferFull);
        }
        let from = store.position(self.player).ok_or(WalkBlocked::NoPlayer)?;
        let facing = store.direction(self.player).unwrap_or_default();

        let turning = facing != direction;
        let target = if turning { from } else { from.step(direction) };
        let delay = if turning {
            self.cfg.turn_ms
        } else if running {
            self.cfg.run_step_ms
        } else {
            self.cfg.walk_step_ms
        };

        let sequence = self.next_sequence;
        let record = StepRecord {
            direction,
            old_direction: facing,
            sequence,
            accepted: false,
            running,
            no_rotation: !turning && from.z as i32 - target.z as i32 >= NO_ROTATION_Z_DROP,
            deadline: now + delay,
            target,
        };
        if !self.steps.push(record) {
            return Err(WalkBlocked::BufferFull);
        }

        let fast_walk_key = self.keys.take().unwrap_or(0);
        sink.send_packet(NetMsg::MoveRequest {
            direction: direction.as_byte(),
            running,
            sequence,
            fast_walk_key,
        });

        self.next_sequence = following(sequence);
        self.next_step_at = now + delay;

        store.set_direction(self.player, direction);
        if !turning {
            store.place(self.player, target);
        }

        debug!(seq = sequence, ?direction, running, turning, x = target.x, y = target.y, "Step requested");
        Ok(sequence)
    }

    /// Handles a server confirm for `sequence`.
    pub fn confirm(&mut self, sink: &mut impl PacketSink, sequence: u8) -> ConfirmOutcome {
        let Some(index) = self.steps.find(sequence) else {
            return self.resync(sink, sequence);
        };

        let outcome = if index >= self.completed {
            let Some(mut rec) = self.steps.get(index) else {
                return self.resync(sink, sequence);
            };
            rec.accepted = true;
            self.steps.update(index, rec);
            self.authoritative = rec.target;
            ConfirmOutcome::Accepted
        } else if index == 0 {
            let Some(rec) = self.steps.remove_front() else {
                return self.resync(sink, sequence);
            };
            self.completed -= 1;
            self.authoritative = rec.target;
            ConfirmOutcome::Slid
        } else {
            return self.resync(sink, sequence);
        };

        self.settle_front();
        debug!(seq = sequence, ?outcome, pending = self.steps.len(), "Step confirmed");
        outcome
    }

    /// Handles a server deny: drops every pending step and snaps the player.
    pub fn deny(&mut self, store: &mut impl EntityStore, sequence: u8, position: TilePos) {
        let dropped = self.steps.len();
        self.reset();
        self.snap(store, position);
        debug!(seq = sequence, dropped, x = position.x, y = position.y, z = position.z, "Step denied");
    }

    /// Applies the server's answer to a resync and re-opens walking.
    pub fn resync_complete(&mut self, store: &mut impl EntityStore, position: TilePos, direction: Direction) {
        self.reset();
        self.snap(store, position);
        store.set_direction(self.player, direction);
        debug!(x = position.x, y = position.y, z = position.z, "Resync complete");
    }

    /// Follows the player when something else (a boat) moved it.
    ///
    /// Ignored while steps are in flight; their confirms will settle it.
    pub fn carried(&mut self, position: TilePos) {
        if self.steps.is_empty() {
            self.authoritative = position;
        }
    }

    /// Marks steps whose deadline has passed as finished locally.
    pub fn update(&mut self, now: u64) {
        while let Some(rec) = self.steps.get(self.completed) {
            if rec.deadline > now {
                break;
            }
            self.completed += 1;
        }
    }

    /// Zeroes all counters and drops pending steps. Keys are kept.
    pub fn reset(&mut self) {
        self.steps.clear();
        self.next_sequence = FIRST_SEQUENCE;
        self.completed = 0;
        self.walking_failed = false;
        self.resync_sent = false;
        self.next_step_at = 0;
    }

    fn resync(&mut self, sink: &mut impl PacketSink, sequence: u8) -> ConfirmOutcome {
        if !self.resync_sent {
            sink.send_packet(NetMsg::ResyncRequest);
            self.resync_sent = true;
            warn!(seq = sequence, pending = self.steps.len(), "Unmatched step confirm, resyncing");
        }
        self.steps.clear();
        self.completed = 0;
        self.walking_failed = true;
        ConfirmOutcome::Resync
    }

    /// Drops accepted records from the front; each becomes authoritative in turn.
    fn settle_front(&mut self) {
        while let Some(rec) = self.steps.front() {
            if !rec.accepted {
                break;
            }
            self.steps.remove_front();
            self.completed = self.completed.saturating_sub(1);
            self.authoritative = rec.target;
        }
    }

    fn snap(&mut self, store: &mut impl EntityStore, position: TilePos) {
        self.authoritative = position;
        store.place(self.player, position);
        store.set_offset(self.player, Vec3::ZERO);
    }
}

fn following(sequence: u8) -> u8 {
    if sequence == u8::MAX {
        FIRST_SEQUENCE
    } else {
        sequence + 1
    }
}

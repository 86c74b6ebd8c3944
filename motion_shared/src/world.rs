//! Entity store.
//!
//! The movement components never own entities. They reach them through the
//! narrow [`EntityStore`] trait: look up by id, move, offset, and ask a placed
//! structure to rebuild its geometry. [`World`] is the in-memory store used by
//! the client session and by tests; it keys entities by id and keeps a tile
//! index so whatever draws the map can find what stands where.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::math::{Direction, TilePos, Vec3};

/// Opaque entity id (serial).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

/// What kind of thing an entity is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Mobile,
    Item,
    /// Multi-tile structure. `components` share the multi's pixel offset;
    /// `house` marks structures whose geometry is rebuilt after a move.
    Multi {
        components: Vec<EntityId>,
        house: bool,
    },
}

/// Lookup and mutation surface the movement components depend on.
pub trait EntityStore {
    /// Returns false for ids that were never spawned or have been destroyed.
    fn exists(&self, id: EntityId) -> bool;

    fn position(&self, id: EntityId) -> Option<TilePos>;

    fn direction(&self, id: EntityId) -> Option<Direction>;

    fn offset(&self, id: EntityId) -> Option<Vec3>;

    /// Moves an entity to `pos` and re-inserts it into the tile index.
    fn place(&mut self, id: EntityId, pos: TilePos);

    fn set_direction(&mut self, id: EntityId, dir: Direction);

    fn set_offset(&mut self, id: EntityId, offset: Vec3);

    /// Structural sub-components moving in the same frame as `id`.
    fn components(&self, id: EntityId) -> Vec<EntityId>;

    /// Rebuilds house geometry for `id`. Returns false if `id` is not a house.
    fn regenerate_house(&mut self, id: EntityId) -> bool;
}

/// A single stored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub kind: EntityKind,
    pub position: TilePos,
    pub direction: Direction,
    pub offset: Vec3,
}

/// In-memory entity store with a tile index.
#[derive(Debug, Default)]
pub struct World {
    entities: HashMap<EntityId, Entity>,
    tiles: HashMap<(u16, u16), Vec<EntityId>>,
    house_builds: HashMap<EntityId, u32>,
}

impl World {
    /// Inserts or replaces an entity.
    pub fn spawn(&mut self, id: EntityId, kind: EntityKind, position: TilePos, direction: Direction) {
        self.despawn(id);
        self.entities.insert(
            id,
            Entity {
                kind,
                position,
                direction,
                offset: Vec3::ZERO,
            },
        );
        self.index(id, position);
    }

    /// Removes an entity. Returns false if it was not present.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        match self.entities.remove(&id) {
            Some(ent) => {
                self.unindex(id, ent.position);
                self.house_builds.remove(&id);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities indexed on a tile, in insertion order.
    pub fn at(&self, x: u16, y: u16) -> &[EntityId] {
        self.tiles.get(&(x, y)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// How many times a house has had its geometry rebuilt.
    pub fn house_builds(&self, id: EntityId) -> u32 {
        self.house_builds.get(&id).copied().unwrap_or(0)
    }

    fn index(&mut self, id: EntityId, pos: TilePos) {
        self.tiles.entry((pos.x, pos.y)).or_default().push(id);
    }

    fn unindex(&mut self, id: EntityId, pos: TilePos) {
        if let Some(list) = self.tiles.get_mut(&(pos.x, pos.y)) {
            list.retain(|e| *e != id);
            if list.is_empty() {
                self.tiles.remove(&(pos.x, pos.y));
            }
        }
    }
}

impl EntityStore for World {
    fn exists(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    fn position(&self, id: EntityId) -> Option<TilePos> {
        self.entities.get(&id).map(|e| e.position)
    }

    fn direction(&self, id: EntityId) -> Option<Direction> {
        self.entities.get(&id).map(|e| e.direction)
    }

    fn offset(&self, id: EntityId) -> Option<Vec3> {
        self.entities.get(&id).map(|e| e.offset)
    }

    fn place(&mut self, id: EntityId, pos: TilePos) {
        let Some(old) = self.entities.get(&id).map(|e| e.position) else {
            return;
        };
        self.unindex(id, old);
        if let Some(ent) = self.entities.get_mut(&id) {
            ent.position = pos;
        }
        self.index(id, pos);
    }

    fn set_direction(&mut self, id: EntityId, dir: Direction) {
        if let Some(ent) = self.entities.get_mut(&id) {
            ent.direction = dir;
        }
    }

    fn set_offset(&mut self, id: EntityId, offset: Vec3) {
        if let Some(ent) = self.entities.get_mut(&id) {
            ent.offset = offset;
        }
    }

    fn components(&self, id: EntityId) -> Vec<EntityId> {
        match self.entities.get(&id).map(|e| &e.kind) {
            Some(EntityKind::Multi { components, .. }) => components.clone(),
            _ => Vec::new(),
        }
    }

    fn regenerate_house(&mut self, id: EntityId) -> bool {
        match self.entities.get(&id).map(|e| &e.kind) {
            Some(EntityKind::Multi { house: true, .. }) => {
                *self.house_builds.entry(id).or_default() += 1;
                true
            }
            _ => false,
        }
    }
}

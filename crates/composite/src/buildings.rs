//! Index of rooms and buildings across a composite, rebuilt lazily after
//! structural changes. Backs square-to-room lookup and the suppression
//! region computed when a room is hovered.

use crate::{CellRegion, CompositeMap};
use projection::TilePoint;
use std::collections::HashMap;

/// Index into the flattened room table of one [`BuildingIndex`] build.
/// Stale after the next rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId(usize);

#[derive(Debug)]
struct Room {
    name: String,
    level: i32,
    region: CellRegion,
    building: usize,
}

#[derive(Debug, Default)]
struct Building {
    rooms: Vec<usize>,
}

#[derive(Debug)]
pub struct BuildingIndex {
    rooms: Vec<Room>,
    buildings: Vec<Building>,
    by_square: HashMap<(TilePoint, i32), RoomId>,
    dirty: bool,
}

impl Default for BuildingIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildingIndex {
    pub fn new() -> Self {
        Self {
            rooms: Vec::new(),
            buildings: Vec::new(),
            by_square: HashMap::new(),
            dirty: true,
        }
    }

    /// Marks the index stale; the next [`ensure`](Self::ensure) rebuilds it.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn ensure(&mut self, map: &CompositeMap) {
        if self.dirty {
            self.rebuild(map);
        }
    }

    /// Flattens every room source into composite-local squares. One
    /// building per source map; sources stack bottom to top, so the
    /// square lookup keeps the topmost room.
    pub fn rebuild(&mut self, map: &CompositeMap) {
        self.rooms.clear();
        self.buildings.clear();
        self.by_square.clear();
        for (defs, origin, level_offset) in map.room_sources() {
            let building = self.buildings.len();
            self.buildings.push(Building::default());
            for def in &defs {
                let level = level_offset + def.level;
                let region = CellRegion::from_rects(&def.rects).translated(origin);
                let index = self.rooms.len();
                for square in region.iter() {
                    self.by_square.insert((square, level), RoomId(index));
                }
                self.rooms.push(Room {
                    name: def.name.clone(),
                    level,
                    region,
                    building,
                });
                self.buildings[building].rooms.push(index);
            }
        }
        self.dirty = false;
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Topmost room covering a composite-local square at a level.
    pub fn room_at(&self, square: TilePoint, level: i32) -> Option<RoomId> {
        self.by_square.get(&(square, level)).copied()
    }

    pub fn room_name(&self, id: RoomId) -> Option<&str> {
        self.rooms.get(id.0).map(|r| r.name.as_str())
    }

    pub fn room_name_at(&self, square: TilePoint, level: i32) -> Option<&str> {
        self.room_at(square, level).and_then(|id| self.room_name(id))
    }

    pub fn room_level(&self, id: RoomId) -> Option<i32> {
        self.rooms.get(id.0).map(|r| r.level)
    }

    pub fn room_region(&self, id: RoomId) -> Option<&CellRegion> {
        self.rooms.get(id.0).map(|r| &r.region)
    }

    /// Squares of the room's building on the room's level, excluding the
    /// room itself. Drawing all but the topmost quad is skipped there, so
    /// the hovered room stays readable inside its building footprint.
    pub fn suppression_region(&self, id: RoomId) -> CellRegion {
        let Some(room) = self.rooms.get(id.0) else {
            return CellRegion::new();
        };
        let mut region = CellRegion::new();
        for &other in &self.buildings[room.building].rooms {
            if other == id.0 {
                continue;
            }
            let o = &self.rooms[other];
            if o.level == room.level {
                region.union_with(&o.region);
            }
        }
        region.subtract(&room.region);
        region
    }
}

//! Current-level highlighting and room-under-pointer suppression. While
//! the highlight preference is on, levels above the current one are
//! hidden and levels below draw dimmed; hovering a room suppresses the
//! rest of its building down to the topmost quad per square.

use composite::{CellRegion, RoomId};
use projection::TilePoint;

use crate::SceneCompositor;

impl SceneCompositor {
    pub fn set_current_level(&mut self, level: i32) {
        if self.view_state.current_level == level {
            return;
        }
        self.view_state.current_level = level;
        self.update_current_level_highlight();
        self.refresh_room_suppression();
    }

    pub fn set_highlight_current_level(&mut self, on: bool) {
        if self.view_state.preferences.highlight_current_level == on {
            return;
        }
        self.view_state.preferences.highlight_current_level = on;
        self.update_current_level_highlight();
    }

    pub fn set_show_objects(&mut self, on: bool) {
        if self.view_state.preferences.show_objects == on {
            return;
        }
        self.view_state.preferences.show_objects = on;
        self.update_current_level_highlight();
    }

    /// Tracks the pointer square for room highlighting. While a room is
    /// under the pointer, its building's other squares on the current
    /// level keep only their topmost quad, so the room stays readable.
    pub fn set_highlight_room_position(&mut self, square: Option<TilePoint>) {
        self.view_state.highlight_pos = square;
        self.refresh_room_suppression();
    }

    pub fn room_at(&mut self, square: TilePoint, level: i32) -> Option<RoomId> {
        self.cache_state
            .buildings
            .ensure(&self.world_state.center.composite);
        self.cache_state.buildings.room_at(square, level)
    }

    pub fn room_name_at(&mut self, square: TilePoint, level: i32) -> Option<&str> {
        self.cache_state
            .buildings
            .ensure(&self.world_state.center.composite);
        self.cache_state.buildings.room_name_at(square, level)
    }

    /// Re-applies lot and object visibility for the current level and
    /// highlight preference, and repaints every level.
    pub(crate) fn update_current_level_highlight(&mut self) {
        let Self {
            world_state,
            view_state,
            item_state,
            ..
        } = self;
        let composite = &world_state.center.composite;
        let highlight = view_state.preferences.highlight_current_level;
        let current = view_state.current_level;
        for &id in &item_state.lots {
            let Some(item) = item_state.items.get_mut(id) else {
                continue;
            };
            let Some(sub_map) = item.sub_map() else {
                continue;
            };
            item.visible = composite
                .sub_map(sub_map)
                .map(|sub| sub.is_lot_visible() && (!highlight || sub.level() == current))
                .unwrap_or(false);
        }
        let show_objects = view_state.preferences.show_objects;
        for &id in &item_state.objects {
            let Some(item) = item_state.items.get_mut(id) else {
                continue;
            };
            let Some((level, _)) = item.object_slot() else {
                continue;
            };
            item.visible = show_objects && (!highlight || level == current);
        }
        for item in &mut item_state.levels {
            item.dirty = true;
        }
    }

    /// Recomputes the suppression region for the tracked pointer square at
    /// the current level, touching the composite only when it changed.
    fn refresh_room_suppression(&mut self) {
        let current = self.view_state.current_level;
        let region = match self.view_state.highlight_pos {
            Some(square) => {
                self.cache_state
                    .buildings
                    .ensure(&self.world_state.center.composite);
                match self.cache_state.buildings.room_at(square, current) {
                    Some(room) => self.cache_state.buildings.suppression_region(room),
                    None => CellRegion::new(),
                }
            }
            None => CellRegion::new(),
        };

        let composite = &mut self.world_state.center.composite;
        let previous_level = composite.suppression().map(|(_, level)| level);
        let unchanged = match composite.suppression() {
            Some((active, level)) => *active == region && level == current,
            None => region.is_empty(),
        };
        if unchanged {
            return;
        }
        if region.is_empty() {
            composite.clear_suppression();
        } else {
            composite.set_suppression(region, current);
        }

        for level in [previous_level, Some(current)].into_iter().flatten() {
            if level < 0 {
                continue;
            }
            if let Some(item) = self.item_state.levels.get_mut(level as usize) {
                item.dirty = true;
            }
        }
    }
}

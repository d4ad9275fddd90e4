//! Document-change notifications. Each entry point applies the minimal
//! synchronous mutation, then accumulates pending flags so the real work
//! happens once per tick in the flush, no matter how many notifications
//! one user action produced.

use std::sync::Arc;

use atlas::ContextId;
use composite::{CompositeMap, MapData, Road};
use projection::{MapGeometry, Projector, ScreenRectF, TilePoint};
use update_scheduler::PendingFlags;

use crate::{
    MapResponse, MapSlot, MapSource, PendingLoad, SceneCompositor, SceneItem, SceneItemId,
    SceneItemKind, ToolCategory, WorldState, adjacent_origin,
};

impl SceneCompositor {
    /// A lot appeared in the document. The map source answers immediately
    /// or later through [`map_loaded`](Self::map_loaded); until then the
    /// lot has no item and draws nothing.
    pub fn lot_added(
        &mut self,
        source: &mut dyn MapSource,
        path: &str,
        origin: TilePoint,
        level: i32,
        lot_index: usize,
    ) -> Option<SceneItemId> {
        match source.request(path) {
            MapResponse::Ready(data) => {
                Some(self.finish_lot_add(path.to_string(), data, origin, level, lot_index))
            }
            MapResponse::Loading => {
                self.load_state.pending.push(PendingLoad {
                    path: path.to_string(),
                    origin,
                    level,
                    lot_index,
                });
                None
            }
        }
    }

    /// Async load completion. Placements that still wait for this path are
    /// finished; completions nothing waits for are ignored.
    pub fn map_loaded(&mut self, path: &str, data: Arc<MapData>) {
        let mut completed = Vec::new();
        self.load_state.pending.retain(|entry| {
            if entry.path == path {
                completed.push((entry.origin, entry.level, entry.lot_index));
                false
            } else {
                true
            }
        });
        for (origin, level, lot_index) in completed {
            self.finish_lot_add(path.to_string(), data.clone(), origin, level, lot_index);
        }
    }

    /// Async load failure. The waiting placements are dropped; the lots
    /// never appear.
    pub fn map_failed(&mut self, path: &str) {
        let before = self.load_state.pending.len();
        self.load_state.pending.retain(|entry| entry.path != path);
        let dropped = before - self.load_state.pending.len();
        if dropped > 0 {
            log::warn!("map {path:?} failed to load, dropped {dropped} pending lot placements");
        }
    }

    /// The map behind a path changed on disk; every lot showing it swaps
    /// to the new data.
    pub fn lot_map_changed(&mut self, path: &str, data: &Arc<MapData>) {
        let stale: Vec<composite::SubMapId> = self
            .item_state
            .lots
            .iter()
            .filter_map(|&id| {
                let item = self.item_state.items.get(id)?;
                if item.path() == Some(path) {
                    item.sub_map()
                } else {
                    None
                }
            })
            .collect();
        if stale.is_empty() {
            return;
        }
        for sub_map in stale {
            if self
                .world_state
                .center
                .composite
                .replace_sub_map_data(sub_map, data.clone())
                .is_err()
            {
                debug_assert!(false, "lot item referenced a missing sub-map");
            }
        }
        self.cache_state.buildings.invalidate();
        self.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::PAINT,
        );
    }

    pub fn lot_removed(&mut self, lot_index: usize) {
        self.load_state
            .pending
            .retain(|entry| entry.lot_index != lot_index);
        if let Some(id) = self.lot_item(lot_index) {
            self.remove_item(id);
        }
    }

    pub fn lot_moved(&mut self, lot_index: usize, origin: TilePoint) {
        for entry in &mut self.load_state.pending {
            if entry.lot_index == lot_index {
                entry.origin = origin;
            }
        }
        let Some(sub_map) = self.lot_sub_map(lot_index) else {
            return;
        };
        if self
            .world_state
            .center
            .composite
            .move_sub_map(sub_map, origin)
            .is_err()
        {
            debug_assert!(false, "lot item referenced a missing sub-map");
        }
        self.cache_state.buildings.invalidate();
        self.request_later(PendingFlags::ALL_GROUPS | PendingFlags::BOUNDS | PendingFlags::SYNCH);
    }

    pub fn lot_level_changed(&mut self, lot_index: usize, origin: TilePoint, level: i32) {
        for entry in &mut self.load_state.pending {
            if entry.lot_index == lot_index {
                entry.origin = origin;
                entry.level = level;
            }
        }
        let Some(sub_map) = self.lot_sub_map(lot_index) else {
            return;
        };
        let composite = &mut self.world_state.center.composite;
        if composite.move_sub_map(sub_map, origin).is_err()
            || composite.set_sub_map_level(sub_map, level).is_err()
        {
            debug_assert!(false, "lot item referenced a missing sub-map");
        }
        self.cache_state.buildings.invalidate();
        self.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::Z_ORDER,
        );
    }

    pub fn lot_visibility_changed(&mut self, lot_index: usize, visible: bool) {
        let Some(sub_map) = self.lot_sub_map(lot_index) else {
            return;
        };
        if self
            .world_state
            .center
            .composite
            .set_sub_map_visible(sub_map, visible)
            .is_err()
        {
            debug_assert!(false, "lot item referenced a missing sub-map");
        }
        self.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::LOT_VISIBILITY,
        );
    }

    pub fn level_visibility_changed(&mut self, level: i32, visible: bool) {
        self.world_state
            .center
            .composite
            .set_level_visible(level, visible);
        self.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::LOT_VISIBILITY,
        );
    }

    /// Toggles one named layer on every slot, so "Walls" hides in the
    /// neighbor maps too.
    pub fn layer_visibility_changed(&mut self, level: i32, suffix: &str, visible: bool) {
        let mut changed = false;
        for slot in self.world_state.slots_mut() {
            changed |= slot.composite.set_layer_visible(level, suffix, visible);
        }
        if changed {
            self.queue_level(level);
            self.request_later(
                PendingFlags::BOUNDS | PendingFlags::SYNCH | PendingFlags::PAINT,
            );
        }
    }

    pub fn layer_opacity_changed(&mut self, level: i32, suffix: &str, opacity: f32) {
        let mut changed = false;
        for slot in self.world_state.slots_mut() {
            changed |= slot.composite.set_layer_opacity(level, suffix, opacity);
        }
        if changed {
            self.queue_level(level);
            self.request_later(PendingFlags::PAINT);
        }
    }

    /// Whole-level display opacity, applied at submit time on top of
    /// per-layer opacity.
    pub fn set_level_opacity(&mut self, level: i32, opacity: f32) {
        if level < 0 {
            return;
        }
        let Some(item) = self.item_state.levels.get_mut(level as usize) else {
            return;
        };
        if item.opacity != opacity {
            item.opacity = opacity;
            item.dirty = true;
        }
    }

    /// Replaces the road overlay: regenerates the synthetic road layer and
    /// rebuilds the road items.
    pub fn roads_changed(&mut self, world_origin: TilePoint, roads: &[Road]) {
        self.world_state
            .center
            .composite
            .generate_road_layers(world_origin, roads);
        let stale: Vec<SceneItemId> = self
            .item_state
            .items
            .iter()
            .filter(|(_, item)| matches!(item.kind, SceneItemKind::Road { .. }))
            .map(|(id, _)| id)
            .collect();
        for id in stale {
            self.item_state.items.remove(id);
        }
        for road in roads {
            let rect = road
                .rect()
                .translated(TilePoint::new(-world_origin.x, -world_origin.y));
            self.insert_item(SceneItemKind::Road { rect }, true);
        }
        self.queue_level(0);
        self.request_later(PendingFlags::PAINT);
    }

    /// Installs or clears one of the eight neighbor maps. Offsets outside
    /// the 3x3 ring are ignored.
    pub fn set_adjacent_map(&mut self, sx: i32, sy: i32, data: Option<Arc<MapData>>) {
        let Some(index) = WorldState::adjacent_index(sx, sy) else {
            return;
        };
        self.world_state.adjacent[index] =
            data.map(|data| MapSlot::new(CompositeMap::new(data), adjacent_origin(sx, sy)));
        self.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::PAINT,
        );
    }

    /// Schedules a full geometry resynch, for callers that changed state
    /// the typed notifications do not cover.
    pub fn synch_later(&mut self) {
        self.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::Z_ORDER,
        );
    }

    /// A tileset's pixels changed. Levels repaint only when some slot
    /// actually uses it; the texture cache re-uploads on its own via the
    /// tileset's change counter.
    pub fn tileset_changed(&mut self, name: &str) {
        if self.is_tileset_used(name) {
            self.mark_all_levels_dirty();
        }
    }

    /// The rendering context is going away. Its textures and every batch
    /// buffer are released now, before the context they were created under
    /// becomes invalid.
    pub fn context_destroyed(&mut self, context: ContextId) {
        self.cache_state.textures.context_destroyed(context);
        for slot in self.world_state.slots_mut() {
            slot.reset_grids();
        }
        self.mark_all_levels_dirty();
    }

    pub fn set_active_tool(&mut self, tool: ToolCategory) {
        if self.view_state.active_tool != tool {
            self.view_state.active_tool = tool;
            self.request_later(PendingFlags::Z_ORDER);
        }
    }

    /// Swaps in a new root map, dropping every lot item and pending load.
    /// Scheduled flushes are deferred until the swap is complete, then one
    /// flush rebuilds everything.
    pub fn reload(&mut self, root: Arc<MapData>) {
        self.flush_state.scheduler.set_defer(true);
        self.load_state.pending.clear();
        let lots: Vec<SceneItemId> = self.item_state.lots.drain(..).collect();
        for id in lots {
            self.item_state.items.remove(id);
        }
        let geometry = MapGeometry {
            tile_width: self.view_state.projector.geometry().tile_width,
            tile_height: self.view_state.projector.geometry().tile_height,
            map_width: root.width(),
            map_height: root.height(),
        };
        let composite = CompositeMap::new(root);
        self.view_state.projector = Projector::new(
            geometry,
            composite.max_level(),
            self.view_state.projector.is_double_density(),
        );
        self.world_state.center = MapSlot::new(composite, TilePoint::new(0, 0));
        self.item_state.levels.clear();
        self.view_state.scene_rect = ScreenRectF::default();
        self.view_state.highlight_pos = None;
        self.cache_state.buildings.invalidate();
        self.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::Z_ORDER
                | PendingFlags::PAINT,
        );
        self.flush_state.scheduler.set_defer(false);
        self.flush();
    }

    fn finish_lot_add(
        &mut self,
        path: String,
        data: Arc<MapData>,
        origin: TilePoint,
        level: i32,
        lot_index: usize,
    ) -> SceneItemId {
        let sub_map = self
            .world_state
            .center
            .composite
            .add_sub_map(data, origin, level);
        let id = self.insert_lot_item(lot_index, sub_map, path);
        self.sort_composite_lots();
        self.cache_state.buildings.invalidate();
        self.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::Z_ORDER,
        );
        id
    }

    fn lot_sub_map(&self, lot_index: usize) -> Option<composite::SubMapId> {
        let id = self.lot_item(lot_index)?;
        self.item_state.items.get(id).and_then(SceneItem::sub_map)
    }
}

//! The deferred flush. Pending flags accumulated by the notification
//! entry points are drained here in fixed order: level coverage, synch,
//! bounds, lot visibility, paint, z-order. At most one flush runs per
//! tick no matter how many notifications piled up.

use projection::ScreenRectF;
use update_scheduler::PendingFlags;

use crate::{LevelItem, SceneCompositor};
use crate::scene_items::item_bounds;

impl SceneCompositor {
    /// Runs the scheduled flush if one is due. Returns false when nothing
    /// was scheduled or the defer gate put it off for a later tick.
    pub fn flush(&mut self) -> bool {
        let Some(flags) = self.flush_state.scheduler.begin_flush() else {
            return false;
        };
        self.flush_pending(flags);
        true
    }

    fn flush_pending(&mut self, mut flags: PendingFlags) {
        if self.ensure_level_coverage() {
            flags |= PendingFlags::ALL_GROUPS | PendingFlags::BOUNDS | PendingFlags::SYNCH;
        }
        if flags.contains(PendingFlags::SYNCH) {
            for slot in self.world_state.slots_mut() {
                slot.composite.synch();
            }
            // Synch can grow the level span when a lot reaches higher.
            if self.ensure_level_coverage() {
                flags |= PendingFlags::ALL_GROUPS | PendingFlags::BOUNDS;
            }
        }
        let levels: Vec<i32> = if flags.contains(PendingFlags::ALL_GROUPS) {
            self.flush_state.queued_levels.clear();
            (0..=self.world_state.center.composite.max_level()).collect()
        } else {
            std::mem::take(&mut self.flush_state.queued_levels)
                .into_iter()
                .collect()
        };
        if flags.contains(PendingFlags::BOUNDS) {
            self.update_bounds();
        }
        if flags.contains(PendingFlags::LOT_VISIBILITY) {
            self.update_lot_visibility();
        }
        if flags.contains(PendingFlags::PAINT) {
            for &level in &levels {
                if level < 0 {
                    continue;
                }
                if let Some(item) = self.item_state.levels.get_mut(level as usize) {
                    item.dirty = true;
                }
            }
        }
        if flags.contains(PendingFlags::Z_ORDER) {
            self.assign_z_order();
        }
    }

    /// Grows per-slot grids and per-level items to the current level span
    /// and keeps the projector in step. Moving the projector's top level
    /// shifts every level's screen offset, so all batches go stale.
    fn ensure_level_coverage(&mut self) -> bool {
        let mut grew = false;
        for slot in self.world_state.slots_mut() {
            grew |= slot.ensure_grids();
        }
        let center_max = self.world_state.center.composite.max_level();
        while self.item_state.levels.len() <= center_max as usize {
            self.item_state.levels.push(LevelItem::new());
            grew = true;
        }
        if self.view_state.projector.max_level() != center_max {
            self.view_state.projector.set_max_level(center_max);
            for slot in self.world_state.slots_mut() {
                slot.invalidate_grids();
            }
            grew = true;
        }
        grew
    }

    /// Recomputes per-level bounds, the scene rect and every item's
    /// projected position.
    fn update_bounds(&mut self) {
        let Self {
            world_state,
            view_state,
            item_state,
            ..
        } = self;
        let mut scene = ScreenRectF::default();
        for (index, item) in item_state.levels.iter_mut().enumerate() {
            let level = index as i32;
            let mut bounds = ScreenRectF::default();
            for slot in world_state.slots() {
                bounds = bounds.united(&slot.composite.level_bounding_rect(
                    &view_state.projector,
                    slot.origin,
                    level,
                ));
            }
            if item.bounds != bounds {
                item.bounds = bounds;
                item.dirty = true;
            }
            scene = scene.united(&bounds);
        }
        view_state.scene_rect = scene;

        let composite = &world_state.center.composite;
        for item in item_state.items.values_mut() {
            item.bounds = item_bounds(&item.kind, composite, &view_state.projector);
        }
    }

    /// Folds level visibility into each lot and mirrors the result onto
    /// the lot items.
    fn update_lot_visibility(&mut self) {
        let changed = self.world_state.center.composite.sync_lot_visibility();
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
        if changed {
            for item in &mut item_state.levels {
                item.dirty = true;
            }
        }
    }
}

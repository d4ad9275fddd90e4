//! Overlay item bookkeeping: insertion, detachment, hit-testing and the
//! projected bounds each item kind occupies.

use crate::{SceneCompositor, SceneItem, SceneItemId, SceneItemKind};
use composite::CompositeMap;
use projection::{Projector, ScreenPointF, ScreenRectF, TilePoint, TileRect};
use update_scheduler::PendingFlags;

/// Projected extent of one item. A lot item spans every level its sub-map
/// occupies; a stale sub-map reference yields an empty rect.
pub(crate) fn item_bounds(
    kind: &SceneItemKind,
    composite: &CompositeMap,
    projector: &Projector,
) -> ScreenRectF {
    match kind {
        SceneItemKind::Object {
            level, tile_rect, ..
        } => projector.bounding_rect(*tile_rect, *level),
        SceneItemKind::SpawnPoint { level, square, .. } => {
            projector.bounding_rect(TileRect::new(square.x, square.y, 1, 1), *level)
        }
        SceneItemKind::SubMap { sub_map, .. } => {
            let Some(sub) = composite.sub_map(*sub_map) else {
                return ScreenRectF::default();
            };
            let mut bounds = ScreenRectF::default();
            for level in sub.level()..=sub.level() + sub.data().max_level() {
                bounds = bounds.united(&projector.bounding_rect(sub.bounds(), level));
            }
            bounds
        }
        SceneItemKind::Road { rect } => projector.bounding_rect(*rect, 0),
        SceneItemKind::Label { anchor, level, .. } => {
            projector.bounding_rect(TileRect::new(anchor.x, anchor.y, 1, 1), *level)
        }
    }
}

impl SceneCompositor {
    pub fn item(&self, id: SceneItemId) -> Option<&SceneItem> {
        self.item_state.items.get(id)
    }

    pub fn item_count(&self) -> usize {
        self.item_state.items.len()
    }

    pub fn items(&self) -> impl Iterator<Item = (SceneItemId, &SceneItem)> {
        self.item_state.items.iter()
    }

    /// Lot item carrying the given document index.
    pub fn lot_item(&self, lot_index: usize) -> Option<SceneItemId> {
        self.item_state.lots.iter().copied().find(|&id| {
            self.item_state
                .items
                .get(id)
                .and_then(SceneItem::lot_index)
                == Some(lot_index)
        })
    }

    /// Topmost visible item under a scene point.
    pub fn item_at(&self, point: ScreenPointF) -> Option<SceneItemId> {
        let mut best: Option<(f64, SceneItemId)> = None;
        for (id, item) in &self.item_state.items {
            if !item.visible || !item.bounds.contains(point) {
                continue;
            }
            let above = match best {
                None => true,
                Some((z, _)) => item.z > z,
            };
            if above {
                best = Some((item.z, id));
            }
        }
        best.map(|(_, id)| id)
    }

    pub fn add_object(&mut self, level: i32, group_index: usize, tile_rect: TileRect) -> SceneItemId {
        let kind = SceneItemKind::Object {
            level,
            group_index,
            tile_rect,
        };
        let id = self.insert_item(kind, self.object_visible(level));
        self.item_state.objects.push(id);
        self.request_later(PendingFlags::Z_ORDER);
        id
    }

    pub fn add_spawn_point(
        &mut self,
        level: i32,
        group_index: usize,
        square: TilePoint,
    ) -> SceneItemId {
        let kind = SceneItemKind::SpawnPoint {
            level,
            group_index,
            square,
        };
        let id = self.insert_item(kind, self.object_visible(level));
        self.item_state.objects.push(id);
        self.request_later(PendingFlags::Z_ORDER);
        id
    }

    pub fn add_label(&mut self, name: &str, anchor: TilePoint, level: i32) -> SceneItemId {
        let kind = SceneItemKind::Label {
            name: name.to_string(),
            anchor,
            level,
        };
        self.insert_item(kind, true)
    }

    /// Replaces the document order of object and spawn-point items. Ids
    /// that are stale or name other kinds are dropped.
    pub fn reorder_objects(&mut self, ordered: &[SceneItemId]) {
        let items = &self.item_state.items;
        self.item_state.objects = ordered
            .iter()
            .copied()
            .filter(|&id| items.get(id).is_some_and(|item| item.object_slot().is_some()))
            .collect();
        self.request_later(PendingFlags::Z_ORDER);
    }

    /// Removes an item and clears every slot referring back to it. A lot
    /// item takes its sub-map out of the composite as well.
    pub fn remove_item(&mut self, id: SceneItemId) {
        let Some(item) = self.item_state.items.remove(id) else {
            return;
        };
        match item.kind {
            SceneItemKind::SubMap { sub_map, .. } => {
                self.item_state.lots.retain(|&other| other != id);
                if self
                    .world_state
                    .center
                    .composite
                    .remove_sub_map(sub_map)
                    .is_err()
                {
                    debug_assert!(false, "lot item referenced a missing sub-map");
                }
                self.cache_state.buildings.invalidate();
                self.request_later(
                    PendingFlags::ALL_GROUPS
                        | PendingFlags::BOUNDS
                        | PendingFlags::SYNCH
                        | PendingFlags::Z_ORDER
                        | PendingFlags::PAINT,
                );
            }
            SceneItemKind::Object { .. } | SceneItemKind::SpawnPoint { .. } => {
                self.item_state.objects.retain(|&other| other != id);
                self.request_later(PendingFlags::Z_ORDER);
            }
            SceneItemKind::Road { .. } | SceneItemKind::Label { .. } => {}
        }
    }

    pub(crate) fn insert_item(&mut self, kind: SceneItemKind, visible: bool) -> SceneItemId {
        let bounds = item_bounds(
            &kind,
            &self.world_state.center.composite,
            &self.view_state.projector,
        );
        let z = match kind {
            SceneItemKind::Road { .. } => crate::ROAD_ITEM_Z,
            SceneItemKind::Label { .. } => crate::LABEL_ITEM_Z,
            _ => 0.0,
        };
        self.item_state.items.insert(SceneItem {
            kind,
            bounds,
            z,
            visible,
        })
    }

    /// Creates the scene item for a lot, keeping the lot list sorted by
    /// document index.
    pub(crate) fn insert_lot_item(
        &mut self,
        lot_index: usize,
        sub_map: composite::SubMapId,
        path: String,
    ) -> SceneItemId {
        let kind = SceneItemKind::SubMap {
            lot_index,
            sub_map,
            path,
        };
        let id = self.insert_item(kind, true);
        let items = &self.item_state.items;
        let position = self
            .item_state
            .lots
            .iter()
            .position(|&other| {
                match items.get(other).and_then(SceneItem::lot_index) {
                    Some(existing) => existing > lot_index,
                    None => false,
                }
            })
            .unwrap_or(self.item_state.lots.len());
        self.item_state.lots.insert(position, id);
        id
    }

    /// Pushes the lot list's order down into the composite's stacking
    /// order, so late async arrivals draw where the document says.
    pub(crate) fn sort_composite_lots(&mut self) {
        let ordered: Vec<composite::SubMapId> = self
            .item_state
            .lots
            .iter()
            .filter_map(|&id| self.item_state.items.get(id)?.sub_map())
            .collect();
        self.world_state.center.composite.sort_sub_maps(&ordered);
    }

    pub(crate) fn object_visible(&self, level: i32) -> bool {
        let preferences = self.view_state.preferences;
        preferences.show_objects
            && (!preferences.highlight_current_level || level == self.view_state.current_level)
    }
}

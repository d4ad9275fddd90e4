//! Draw-order assignment. Tile levels stack in ascending order; lot and
//! object items occupy computed slots above all of them, with the active
//! tool's category entirely on top so drag hit-testing stays unambiguous.

use crate::{LABEL_ITEM_Z, ROAD_ITEM_Z, SceneCompositor, SceneItemKind, ToolCategory};

impl SceneCompositor {
    /// Stamps a deterministic z on every level item and scene item. The
    /// result depends only on (level, group, document index) tuples, never
    /// on arrival order.
    pub(crate) fn assign_z_order(&mut self) {
        let Self {
            world_state,
            view_state,
            item_state,
            ..
        } = self;
        let composite = &world_state.center.composite;

        let mut z = 0.0f64;
        for item in &mut item_state.levels {
            item.z = z;
            z += 1.0;
        }

        let lot_count = item_state.lots.len();
        let object_count = item_state.objects.len();
        let level_count = (composite.max_level() + 1) as usize;
        let group_count = item_state
            .objects
            .iter()
            .filter_map(|&id| item_state.items.get(id)?.object_slot())
            .map(|(_, group_index)| group_index + 1)
            .max()
            .unwrap_or(1);

        let lot_spaces = (lot_count * level_count) as f64;
        let object_spaces = (object_count * group_count * level_count) as f64;

        let mut lot_base = z;
        let mut object_base = z;
        match view_state.active_tool {
            ToolCategory::AffectsLots => lot_base += object_spaces,
            ToolCategory::AffectsObjects | ToolCategory::Neutral => object_base += lot_spaces,
        }

        for (position, &id) in item_state.lots.iter().enumerate() {
            let level = item_state
                .items
                .get(id)
                .and_then(|item| item.sub_map())
                .and_then(|sub_map| composite.sub_map(sub_map))
                .map(|sub| sub.level())
                .unwrap_or(0);
            if let Some(item) = item_state.items.get_mut(id) {
                item.z = lot_base + (level as usize * lot_count + position) as f64;
            }
        }

        for (position, &id) in item_state.objects.iter().enumerate() {
            let Some(item) = item_state.items.get_mut(id) else {
                continue;
            };
            let Some((level, group_index)) = item.object_slot() else {
                continue;
            };
            let level = level.max(0) as usize;
            item.z = object_base
                + (group_count * object_count * level + group_index * object_count + position)
                    as f64;
        }

        for item in item_state.items.values_mut() {
            match item.kind {
                SceneItemKind::Road { .. } => item.z = ROAD_ITEM_Z,
                SceneItemKind::Label { .. } => item.z = LABEL_ITEM_Z,
                _ => {}
            }
        }
    }
}

//! The composite map: one root map plus nested sub-maps ("lots") stacked in
//! draw order, evaluated per square into ordered cell stacks.

use crate::{CellRegion, MapData, RoomDef, TileLayer, TileRef, Tileset};
use projection::{Projector, ScreenRectF, TilePoint, TileRect};
use slotmap::SlotMap;
use std::collections::HashMap;
use std::sync::Arc;

slotmap::new_key_type! {
    /// Weak handle to a sub-map within one composite.
    pub struct SubMapId;
}

/// Name of the synthetic layer road geometry is rasterized into.
pub const ROAD_LAYER_NAME: &str = "0_Roads";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeError {
    UnknownSubMap,
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositeError::UnknownSubMap => write!(f, "sub-map handle is stale or foreign"),
        }
    }
}

impl std::error::Error for CompositeError {}

/// A map embedded at a tile offset and level within a composite.
#[derive(Debug)]
pub struct SubMap {
    data: Arc<MapData>,
    origin: TilePoint,
    level: i32,
    visible: bool,
    group_visible: bool,
    hidden_during_drag: bool,
    hide_if_visible: Option<SubMapId>,
    lot_index: usize,
}

impl SubMap {
    pub fn data(&self) -> &Arc<MapData> {
        &self.data
    }

    pub const fn origin(&self) -> TilePoint {
        self.origin
    }

    pub const fn level(&self) -> i32 {
        self.level
    }

    pub fn bounds(&self) -> TileRect {
        TileRect::new(
            self.origin.x,
            self.origin.y,
            self.data.width() as i32,
            self.data.height() as i32,
        )
    }

    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    pub const fn is_group_visible(&self) -> bool {
        self.group_visible
    }

    pub const fn is_hidden_during_drag(&self) -> bool {
        self.hidden_during_drag
    }

    /// Effective visibility used by the draw skip chain.
    pub const fn is_lot_visible(&self) -> bool {
        self.visible && self.group_visible && !self.hidden_during_drag
    }

    pub const fn hide_if_visible(&self) -> Option<SubMapId> {
        self.hide_if_visible
    }

    /// Document-side insertion index, used to restore stacking order after
    /// late asynchronous loads.
    pub const fn lot_index(&self) -> usize {
        self.lot_index
    }
}

/// Per-level layer bookkeeping: the root map's layers of that level in
/// declared order, with current visibility and opacity per layer.
///
/// Sub-map layers are matched onto this table by base name, so toggling
/// "Walls" also affects every lot's walls on the level.
#[derive(Debug)]
pub struct LayerGroup {
    level: i32,
    visible: bool,
    root_layers: Vec<usize>,
    layer_suffixes: Vec<String>,
    layer_visible: Vec<bool>,
    layer_opacity: Vec<f32>,
    name_to_index: HashMap<String, usize>,
}

impl LayerGroup {
    pub const fn level(&self) -> i32 {
        self.level
    }

    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn layer_count(&self) -> usize {
        self.root_layers.len()
    }

    pub fn layer_suffixes(&self) -> &[String] {
        &self.layer_suffixes
    }

    pub fn index_of(&self, suffix: &str) -> Option<usize> {
        self.name_to_index.get(suffix).copied()
    }

    /// Indices past the table (synthetic layers) default to visible.
    pub fn is_layer_visible(&self, index: usize) -> bool {
        self.layer_visible.get(index).copied().unwrap_or(true)
    }

    pub fn layer_opacity(&self, index: usize) -> f32 {
        self.layer_opacity.get(index).copied().unwrap_or(1.0)
    }
}

/// Axis-aligned road segment rasterized into the synthetic road layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Road {
    pub start: TilePoint,
    pub end: TilePoint,
    pub width: u32,
    pub tile: TileRef,
}

impl Road {
    /// World-square footprint: the segment's bounding rect grown to the
    /// road width, centered on the carriageway.
    pub fn rect(&self) -> TileRect {
        let half = (self.width / 2) as i32;
        let min_x = self.start.x.min(self.end.x);
        let min_y = self.start.y.min(self.end.y);
        let max_x = self.start.x.max(self.end.x);
        let max_y = self.start.y.max(self.end.y);
        TileRect::new(
            min_x - half,
            min_y - half,
            max_x - min_x + self.width as i32,
            max_y - min_y + self.width as i32,
        )
    }
}

/// One root map plus its sub-maps, with stacking order, per-level layer
/// groups, the generated road layer, and the active suppression region.
///
/// Every structural mutation advances the change counter; consumers cache
/// the counter and fully invalidate when it moves. Draw-state changes
/// (visibility, opacity, suppression) deliberately do not advance it.
#[derive(Debug)]
pub struct CompositeMap {
    root: Arc<MapData>,
    sub_maps: SlotMap<SubMapId, SubMap>,
    order: Vec<SubMapId>,
    groups: Vec<LayerGroup>,
    max_level: i32,
    ensured_levels: i32,
    change_count: u64,
    needs_synch: bool,
    suppress_region: CellRegion,
    suppress_level: i32,
    road_layer: Option<TileLayer>,
    next_lot_index: usize,
}

impl CompositeMap {
    pub fn new(root: Arc<MapData>) -> Self {
        let mut map = Self {
            root,
            sub_maps: SlotMap::with_key(),
            order: Vec::new(),
            groups: Vec::new(),
            max_level: 0,
            ensured_levels: 0,
            change_count: 0,
            needs_synch: false,
            suppress_region: CellRegion::new(),
            suppress_level: 0,
            road_layer: None,
            next_lot_index: 0,
        };
        map.synch();
        map
    }

    pub fn root(&self) -> &Arc<MapData> {
        &self.root
    }

    pub fn bounds(&self) -> TileRect {
        self.root.bounds()
    }

    pub const fn change_count(&self) -> u64 {
        self.change_count
    }

    pub const fn needs_synch(&self) -> bool {
        self.needs_synch
    }

    pub const fn max_level(&self) -> i32 {
        self.max_level
    }

    fn bump(&mut self) {
        self.change_count = self
            .change_count
            .checked_add(1)
            .expect("composite change counter overflow");
    }

    /// Recomputes the level span and rebuilds the per-level layer groups,
    /// carrying per-layer visibility and opacity over by base name.
    pub fn synch(&mut self) {
        let mut max_level = self.root.max_level().max(self.ensured_levels);
        for sub in self.sub_maps.values() {
            max_level = max_level.max(sub.level + sub.data.max_level());
        }
        self.max_level = max_level;

        let mut kept_layers: HashMap<(i32, String), (bool, f32)> = HashMap::new();
        let mut kept_visible: HashMap<i32, bool> = HashMap::new();
        for group in &self.groups {
            kept_visible.insert(group.level, group.visible);
            for (i, suffix) in group.layer_suffixes.iter().enumerate() {
                kept_layers.insert(
                    (group.level, suffix.clone()),
                    (group.layer_visible[i], group.layer_opacity[i]),
                );
            }
        }

        self.groups.clear();
        for level in 0..=max_level {
            let mut group = LayerGroup {
                level,
                visible: kept_visible.get(&level).copied().unwrap_or(true),
                root_layers: Vec::new(),
                layer_suffixes: Vec::new(),
                layer_visible: Vec::new(),
                layer_opacity: Vec::new(),
                name_to_index: HashMap::new(),
            };
            for (i, layer) in self.root.layers().iter().enumerate() {
                if layer.level() != level {
                    continue;
                }
                let index = group.root_layers.len();
                let (visible, opacity) = kept_layers
                    .get(&(level, layer.suffix().to_string()))
                    .copied()
                    .unwrap_or((true, 1.0));
                group.root_layers.push(i);
                group.layer_suffixes.push(layer.suffix().to_string());
                group.layer_visible.push(visible);
                group.layer_opacity.push(opacity);
                group.name_to_index.insert(layer.suffix().to_string(), index);
            }
            self.groups.push(group);
        }
        self.needs_synch = false;
    }

    pub fn group(&self, level: i32) -> Option<&LayerGroup> {
        if level < 0 {
            return None;
        }
        self.groups.get(level as usize)
    }

    /// Grows the representable level span. Levels never shrink back; a
    /// sub-map placed above the current maximum is not drawable until the
    /// span covers its level.
    pub fn ensure_level_count(&mut self, max_level: i32) {
        if max_level <= self.ensured_levels {
            return;
        }
        self.ensured_levels = max_level;
        self.needs_synch = true;
        self.bump();
    }

    pub fn add_sub_map(&mut self, data: Arc<MapData>, origin: TilePoint, level: i32) -> SubMapId {
        assert!(level >= 0, "sub-map level must not be negative");
        let lot_index = self.next_lot_index;
        self.next_lot_index += 1;
        let id = self.sub_maps.insert(SubMap {
            data,
            origin,
            level,
            visible: true,
            group_visible: true,
            hidden_during_drag: false,
            hide_if_visible: None,
            lot_index,
        });
        self.order.push(id);
        self.needs_synch = true;
        self.bump();
        id
    }

    pub fn remove_sub_map(&mut self, id: SubMapId) -> Result<Arc<MapData>, CompositeError> {
        let Some(sub) = self.sub_maps.remove(id) else {
            return Err(CompositeError::UnknownSubMap);
        };
        self.order.retain(|&o| o != id);
        for other in self.sub_maps.values_mut() {
            if other.hide_if_visible == Some(id) {
                other.hide_if_visible = None;
            }
        }
        self.needs_synch = true;
        self.bump();
        Ok(sub.data)
    }

    pub fn move_sub_map(&mut self, id: SubMapId, origin: TilePoint) -> Result<(), CompositeError> {
        let Some(sub) = self.sub_maps.get_mut(id) else {
            return Err(CompositeError::UnknownSubMap);
        };
        sub.origin = origin;
        self.needs_synch = true;
        self.bump();
        Ok(())
    }

    pub fn set_sub_map_level(&mut self, id: SubMapId, level: i32) -> Result<(), CompositeError> {
        assert!(level >= 0, "sub-map level must not be negative");
        let Some(sub) = self.sub_maps.get_mut(id) else {
            return Err(CompositeError::UnknownSubMap);
        };
        sub.level = level;
        self.needs_synch = true;
        self.bump();
        Ok(())
    }

    /// Swaps a sub-map's data in place, used when an asynchronous load
    /// replaces the placeholder it was added with.
    pub fn replace_sub_map_data(
        &mut self,
        id: SubMapId,
        data: Arc<MapData>,
    ) -> Result<(), CompositeError> {
        let Some(sub) = self.sub_maps.get_mut(id) else {
            return Err(CompositeError::UnknownSubMap);
        };
        sub.data = data;
        self.needs_synch = true;
        self.bump();
        Ok(())
    }

    pub fn set_sub_map_visible(&mut self, id: SubMapId, visible: bool) -> Result<(), CompositeError> {
        let Some(sub) = self.sub_maps.get_mut(id) else {
            return Err(CompositeError::UnknownSubMap);
        };
        sub.visible = visible;
        Ok(())
    }

    pub fn set_sub_map_hidden_during_drag(
        &mut self,
        id: SubMapId,
        hidden: bool,
    ) -> Result<(), CompositeError> {
        let Some(sub) = self.sub_maps.get_mut(id) else {
            return Err(CompositeError::UnknownSubMap);
        };
        sub.hidden_during_drag = hidden;
        Ok(())
    }

    /// Links a sub-map's quads to another sub-map's visibility: while
    /// `other` is visible, quads of `id` are skipped at draw. Used for
    /// ground-floor footprints that vanish when the full lot shows.
    pub fn set_sub_map_hide_if_visible(
        &mut self,
        id: SubMapId,
        other: Option<SubMapId>,
    ) -> Result<(), CompositeError> {
        if let Some(other) = other {
            if !self.sub_maps.contains_key(other) {
                return Err(CompositeError::UnknownSubMap);
            }
        }
        let Some(sub) = self.sub_maps.get_mut(id) else {
            return Err(CompositeError::UnknownSubMap);
        };
        sub.hide_if_visible = other;
        self.bump();
        Ok(())
    }

    /// Replaces the stacking order. Later handles render on top. Handles
    /// missing from `ordered` keep their relative order at the top.
    pub fn sort_sub_maps(&mut self, ordered: &[SubMapId]) {
        let mut new_order = Vec::with_capacity(self.order.len());
        for &id in ordered {
            if self.sub_maps.contains_key(id) && !new_order.contains(&id) {
                new_order.push(id);
            }
        }
        for &id in &self.order {
            if !new_order.contains(&id) {
                new_order.push(id);
            }
        }
        self.order = new_order;
        self.bump();
    }

    /// Restores document insertion order, used after late loads arrive.
    pub fn sort_sub_maps_by_lot_index(&mut self) {
        let mut order = std::mem::take(&mut self.order);
        order.sort_by_key(|&id| {
            self.sub_maps
                .get(id)
                .map(|s| s.lot_index)
                .unwrap_or(usize::MAX)
        });
        self.order = order;
        self.bump();
    }

    pub fn sub_map(&self, id: SubMapId) -> Option<&SubMap> {
        self.sub_maps.get(id)
    }

    /// Stacking order, bottom to top.
    pub fn sub_map_order(&self) -> &[SubMapId] {
        &self.order
    }

    pub fn sub_map_count(&self) -> usize {
        self.sub_maps.len()
    }

    pub fn is_level_visible(&self, level: i32) -> bool {
        self.group(level).map(|g| g.visible).unwrap_or(true)
    }

    pub fn set_level_visible(&mut self, level: i32, visible: bool) {
        debug_assert!(level >= 0 && (level as usize) < self.groups.len());
        if level >= 0 {
            if let Some(group) = self.groups.get_mut(level as usize) {
                group.visible = visible;
            }
        }
    }

    /// Recomputes each sub-map's group visibility from its level's
    /// visibility. Returns true when any flag changed.
    pub fn sync_lot_visibility(&mut self) -> bool {
        let mut changed = false;
        let visible: Vec<bool> = (0..=self.max_level)
            .map(|level| self.is_level_visible(level))
            .collect();
        for sub in self.sub_maps.values_mut() {
            let level = sub.level.clamp(0, self.max_level) as usize;
            let group_visible = visible.get(level).copied().unwrap_or(true);
            if sub.group_visible != group_visible {
                sub.group_visible = group_visible;
                changed = true;
            }
        }
        changed
    }

    pub fn set_layer_visible(&mut self, level: i32, suffix: &str, visible: bool) -> bool {
        if level < 0 {
            return false;
        }
        let Some(group) = self.groups.get_mut(level as usize) else {
            return false;
        };
        let Some(index) = group.name_to_index.get(suffix).copied() else {
            return false;
        };
        group.layer_visible[index] = visible;
        true
    }

    pub fn set_layer_opacity(&mut self, level: i32, suffix: &str, opacity: f32) -> bool {
        if level < 0 {
            return false;
        }
        let Some(group) = self.groups.get_mut(level as usize) else {
            return false;
        };
        let Some(index) = group.name_to_index.get(suffix).copied() else {
            return false;
        };
        group.layer_opacity[index] = opacity.clamp(0.0, 1.0);
        true
    }

    /// Rasterizes road geometry into the synthetic level-0 road layer,
    /// replacing whatever was generated before. `world_origin` is this
    /// map's cell origin in world squares.
    pub fn generate_road_layers(&mut self, world_origin: TilePoint, roads: &[Road]) {
        if roads.is_empty() {
            self.road_layer = None;
            self.bump();
            return;
        }
        let mut layer = TileLayer::new(ROAD_LAYER_NAME, self.root.width(), self.root.height());
        let to_local = TilePoint::new(-world_origin.x, -world_origin.y);
        for road in roads {
            layer.fill_rect(road.rect().translated(to_local), road.tile);
        }
        self.road_layer = Some(layer);
        self.bump();
    }

    pub fn road_layer(&self) -> Option<&TileLayer> {
        self.road_layer.as_ref()
    }

    /// Marks a set of squares on one level as suppressed: the draw pass
    /// keeps only the topmost quad of each suppressed square.
    pub fn set_suppression(&mut self, region: CellRegion, level: i32) {
        self.suppress_region = region;
        self.suppress_level = level;
    }

    pub fn clear_suppression(&mut self) {
        self.suppress_region = CellRegion::new();
    }

    pub fn suppression(&self) -> Option<(&CellRegion, i32)> {
        if self.suppress_region.is_empty() {
            return None;
        }
        Some((&self.suppress_region, self.suppress_level))
    }

    pub fn is_suppressed(&self, square: TilePoint, level: i32) -> bool {
        level == self.suppress_level && self.suppress_region.contains(square)
    }

    /// True when the named tileset belongs to this map or any sub-map.
    pub fn is_tileset_used(&self, name: &str) -> bool {
        self.root.has_tileset(name)
            || self
                .sub_maps
                .values()
                .any(|sub| sub.data.has_tileset(name))
    }

    /// Largest tile image footprint across all contributing maps.
    pub fn max_tile_size(&self) -> (u32, u32) {
        let mut size = self.root.max_tile_size();
        for sub in self.sub_maps.values() {
            let s = sub.data.max_tile_size();
            size = (size.0.max(s.0), size.1.max(s.1));
        }
        size
    }

    /// Union of the projected extents of every level's content. `origin`
    /// offsets this map's squares into world squares before projecting.
    pub fn bounding_rect(&self, projector: &Projector, origin: TilePoint) -> ScreenRectF {
        let mut out = ScreenRectF::default();
        for level in 0..=self.max_level {
            out = out.united(&self.level_bounding_rect(projector, origin, level));
        }
        out
    }

    /// Projected extent of one level's content; empty when nothing draws
    /// there.
    pub fn level_bounding_rect(
        &self,
        projector: &Projector,
        origin: TilePoint,
        level: i32,
    ) -> ScreenRectF {
        let mut content = TileRect::default();
        let root_present =
            level == 0 || self.root.layers().iter().any(|l| l.level() == level);
        if root_present {
            content = content.united(&self.root.bounds());
        }
        for sub in self.sub_maps.values() {
            if level >= sub.level && level <= sub.level + sub.data.max_level() {
                content = content.united(&sub.bounds());
            }
        }
        if content.is_empty() {
            return ScreenRectF::default();
        }
        projector.bounding_rect(content.translated(origin), level)
    }

    /// Room definitions flattened to composite-local squares, one source
    /// per building: the root first, then each sub-map in stacking order.
    pub(crate) fn room_sources(&self) -> Vec<(Vec<RoomDef>, TilePoint, i32)> {
        let mut sources = Vec::new();
        if !self.root.rooms().is_empty() {
            sources.push((self.root.rooms().to_vec(), TilePoint::new(0, 0), 0));
        }
        for &id in &self.order {
            let Some(sub) = self.sub_maps.get(id) else {
                continue;
            };
            if !sub.data.rooms().is_empty() {
                sources.push((sub.data.rooms().to_vec(), sub.origin, sub.level));
            }
        }
        sources
    }

    /// Lazy, non-mutating iterator over every tile contributing to one
    /// square of one level, bottom to top: root layers in declared order,
    /// the road layer, then each sub-map in stacking order.
    pub fn ordered_cells_at(&self, square: TilePoint, level: i32) -> CellStack<'_> {
        CellStack {
            map: self,
            square,
            level,
            stage: if level < 0 {
                CellStage::Done
            } else {
                CellStage::RootLayers { index: 0 }
            },
        }
    }
}

/// One entry of an ordered cell stack, carrying enough identity to resolve
/// visibility, opacity and suppression at draw time.
#[derive(Debug, Clone, Copy)]
pub struct CellEntry<'a> {
    pub tileset: &'a Tileset,
    pub tile_id: u32,
    /// Index into the level's [`LayerGroup`] table; synthetic layers use
    /// an out-of-table index and default to visible, full opacity.
    pub layer_index: usize,
    pub sub_map: Option<SubMapId>,
    pub hide_if_visible: Option<SubMapId>,
}

#[derive(Debug, Clone, Copy)]
enum CellStage {
    RootLayers { index: usize },
    Road,
    SubMaps { order_index: usize, layer_index: usize },
    Done,
}

/// See [`CompositeMap::ordered_cells_at`].
pub struct CellStack<'a> {
    map: &'a CompositeMap,
    square: TilePoint,
    level: i32,
    stage: CellStage,
}

impl<'a> Iterator for CellStack<'a> {
    type Item = CellEntry<'a>;

    fn next(&mut self) -> Option<CellEntry<'a>> {
        let map = self.map;
        loop {
            match self.stage {
                CellStage::RootLayers { index } => {
                    let Some(group) = map.group(self.level) else {
                        self.stage = CellStage::Road;
                        continue;
                    };
                    if index >= group.root_layers.len() {
                        self.stage = CellStage::Road;
                        continue;
                    }
                    self.stage = CellStage::RootLayers { index: index + 1 };
                    let layer = &map.root.layers()[group.root_layers[index]];
                    let Some(tile) = layer.cell(self.square.x, self.square.y) else {
                        continue;
                    };
                    let Some(tileset) = map.root.tileset(tile.tileset) else {
                        debug_assert!(false, "layer references missing tileset");
                        continue;
                    };
                    return Some(CellEntry {
                        tileset,
                        tile_id: tile.tile_id,
                        layer_index: index,
                        sub_map: None,
                        hide_if_visible: None,
                    });
                }
                CellStage::Road => {
                    self.stage = CellStage::SubMaps {
                        order_index: 0,
                        layer_index: 0,
                    };
                    if self.level != 0 {
                        continue;
                    }
                    let Some(road) = &map.road_layer else {
                        continue;
                    };
                    let Some(tile) = road.cell(self.square.x, self.square.y) else {
                        continue;
                    };
                    let Some(tileset) = map.root.tileset(tile.tileset) else {
                        debug_assert!(false, "road layer references missing tileset");
                        continue;
                    };
                    let layer_index = map
                        .group(0)
                        .map(|g| g.index_of(road.suffix()).unwrap_or(g.layer_count()))
                        .unwrap_or(0);
                    return Some(CellEntry {
                        tileset,
                        tile_id: tile.tile_id,
                        layer_index,
                        sub_map: None,
                        hide_if_visible: None,
                    });
                }
                CellStage::SubMaps {
                    order_index,
                    layer_index,
                } => {
                    if order_index >= map.order.len() {
                        self.stage = CellStage::Done;
                        continue;
                    }
                    let id = map.order[order_index];
                    let Some(sub) = map.sub_maps.get(id) else {
                        self.stage = CellStage::SubMaps {
                            order_index: order_index + 1,
                            layer_index: 0,
                        };
                        continue;
                    };
                    let local_level = self.level - sub.level;
                    let local = self.square - sub.origin;
                    if local_level < 0 || !sub.data.bounds().contains(local) {
                        self.stage = CellStage::SubMaps {
                            order_index: order_index + 1,
                            layer_index: 0,
                        };
                        continue;
                    }
                    let layers = sub.data.layers();
                    if layer_index >= layers.len() {
                        self.stage = CellStage::SubMaps {
                            order_index: order_index + 1,
                            layer_index: 0,
                        };
                        continue;
                    }
                    self.stage = CellStage::SubMaps {
                        order_index,
                        layer_index: layer_index + 1,
                    };
                    let layer = &layers[layer_index];
                    if layer.level() != local_level {
                        continue;
                    }
                    let Some(tile) = layer.cell(local.x, local.y) else {
                        continue;
                    };
                    let Some(tileset) = sub.data.tileset(tile.tileset) else {
                        debug_assert!(false, "sub-map layer references missing tileset");
                        continue;
                    };
                    let group_index = map
                        .group(self.level)
                        .map(|g| g.index_of(layer.suffix()).unwrap_or(g.layer_count()))
                        .unwrap_or(0);
                    return Some(CellEntry {
                        tileset,
                        tile_id: tile.tile_id,
                        layer_index: group_index,
                        sub_map: Some(id),
                        hide_if_visible: sub.hide_if_visible,
                    });
                }
                CellStage::Done => return None,
            }
        }
    }
}

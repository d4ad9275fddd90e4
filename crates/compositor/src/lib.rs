//! Compositor crate root.
//!
//! This module defines the public API (`SceneCompositor`, `MapSource`,
//! `TexturedQuadSurface`, the scene item types) and wires internal modules
//! around state compartments used by the flush pipeline.
//!
//! Internal architecture overview:
//! - `compositor_events`: ingests document-change notifications and turns
//!   them into pending update flags.
//! - `compositor_flush`: drains the pending flags in fixed order (level
//!   coverage, synch, bounds, lot visibility, paint, z-order).
//! - `compositor_draw`: plans, builds and submits quad runs per level.
//! - `scene_items`/`zorder`/`highlight`: item bookkeeping, draw-order
//!   assignment and current-level highlighting shared by the above.

use std::collections::BTreeSet;
use std::sync::Arc;

use atlas::TilesetTextureCache;
use batch::{BatchGrid, CELL_SQUARES};
use composite::{BuildingIndex, CompositeMap, MapData};
use projection::{MapGeometry, Projector, ScreenRectF, TilePoint, TileRect};
use slotmap::SlotMap;
use update_scheduler::{PendingFlags, UpdateScheduler};

/// How much the levels below the current one are dimmed while the
/// current-level highlight is on.
pub const DARKENING_FACTOR: f32 = 0.6;

/// Fixed z of road items, above every computed lot and object slot.
pub const ROAD_ITEM_Z: f64 = 20_000.0;

/// Fixed z of label items, above roads.
pub const LABEL_ITEM_Z: f64 = 20_010.0;

/// What the active interaction tool manipulates. The affected category is
/// stacked entirely above the other so hits during a drag stay unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolCategory {
    #[default]
    Neutral,
    AffectsLots,
    AffectsObjects,
}

/// Session display preferences mirrored into item visibility.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenePreferences {
    pub highlight_current_level: bool,
    pub show_objects: bool,
}

impl Default for ScenePreferences {
    fn default() -> Self {
        Self {
            highlight_current_level: false,
            show_objects: true,
        }
    }
}

/// Outcome of asking the map source for a lot's tile data.
#[derive(Debug, Clone)]
pub enum MapResponse {
    /// Data is available now. A source that failed to load a map answers
    /// with a placeholder here rather than an error.
    Ready(Arc<MapData>),
    /// The load is in flight; completion arrives later through
    /// [`SceneCompositor::map_loaded`] or [`SceneCompositor::map_failed`].
    Loading,
}

/// Loader collaborator for lot tile data, keyed by map path.
pub trait MapSource {
    fn request(&mut self, path: &str) -> MapResponse;
}

slotmap::new_key_type! {
    /// Weak handle to an overlay item in the scene.
    pub struct SceneItemId;
}

/// One overlay item above the tile layers.
#[derive(Debug, Clone)]
pub enum SceneItemKind {
    Object {
        level: i32,
        group_index: usize,
        tile_rect: TileRect,
    },
    SpawnPoint {
        level: i32,
        group_index: usize,
        square: TilePoint,
    },
    SubMap {
        lot_index: usize,
        sub_map: composite::SubMapId,
        path: String,
    },
    Road {
        rect: TileRect,
    },
    Label {
        name: String,
        anchor: TilePoint,
        level: i32,
    },
}

#[derive(Debug)]
pub struct SceneItem {
    kind: SceneItemKind,
    bounds: ScreenRectF,
    z: f64,
    visible: bool,
}

impl SceneItem {
    pub fn kind(&self) -> &SceneItemKind {
        &self.kind
    }

    pub fn bounds(&self) -> ScreenRectF {
        self.bounds
    }

    pub const fn z(&self) -> f64 {
        self.z
    }

    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    fn lot_index(&self) -> Option<usize> {
        match self.kind {
            SceneItemKind::SubMap { lot_index, .. } => Some(lot_index),
            _ => None,
        }
    }

    fn sub_map(&self) -> Option<composite::SubMapId> {
        match self.kind {
            SceneItemKind::SubMap { sub_map, .. } => Some(sub_map),
            _ => None,
        }
    }

    fn path(&self) -> Option<&str> {
        match &self.kind {
            SceneItemKind::SubMap { path, .. } => Some(path),
            _ => None,
        }
    }

    fn object_slot(&self) -> Option<(i32, usize)> {
        match self.kind {
            SceneItemKind::Object {
                level, group_index, ..
            }
            | SceneItemKind::SpawnPoint {
                level, group_index, ..
            } => Some((level, group_index)),
            _ => None,
        }
    }
}

/// Per-level handle the surrounding scene graph draws through: projected
/// bounds, a repaint flag and the level's assigned z.
#[derive(Debug)]
pub struct LevelItem {
    bounds: ScreenRectF,
    opacity: f32,
    dirty: bool,
    z: f64,
}

impl LevelItem {
    fn new() -> Self {
        Self {
            bounds: ScreenRectF::default(),
            opacity: 1.0,
            dirty: true,
            z: 0.0,
        }
    }

    pub fn bounds(&self) -> ScreenRectF {
        self.bounds
    }

    pub const fn opacity(&self) -> f32 {
        self.opacity
    }

    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub const fn z(&self) -> f64 {
        self.z
    }
}

/// One composite plus its per-level batch grids, offset into world squares.
/// The center slot is the edited map; the eight neighbors are read-only
/// context maps.
struct MapSlot {
    composite: CompositeMap,
    origin: TilePoint,
    grids: Vec<BatchGrid>,
}

impl MapSlot {
    fn new(composite: CompositeMap, origin: TilePoint) -> Self {
        let mut slot = Self {
            composite,
            origin,
            grids: Vec::new(),
        };
        slot.ensure_grids();
        slot
    }

    /// Extends the grid list to the composite's current level span.
    /// Returns true when new grids appeared.
    fn ensure_grids(&mut self) -> bool {
        let width = self.composite.root().width();
        let height = self.composite.root().height();
        let target = (self.composite.max_level() + 1) as usize;
        let grew = self.grids.len() < target;
        while self.grids.len() < target {
            self.grids
                .push(BatchGrid::new(width, height, self.grids.len() as i32));
        }
        grew
    }

    /// Drops every batch, buffers included, and starts the grids over.
    fn reset_grids(&mut self) {
        let levels = self.grids.len();
        let width = self.composite.root().width();
        let height = self.composite.root().height();
        self.grids.clear();
        for level in 0..levels {
            self.grids.push(BatchGrid::new(width, height, level as i32));
        }
    }

    fn invalidate_grids(&mut self) {
        for grid in &mut self.grids {
            grid.invalidate_all();
        }
    }
}

struct WorldState {
    center: MapSlot,
    adjacent: [Option<MapSlot>; 8],
}

impl WorldState {
    fn slots(&self) -> impl Iterator<Item = &MapSlot> {
        std::iter::once(&self.center).chain(self.adjacent.iter().flatten())
    }

    fn slots_mut(&mut self) -> impl Iterator<Item = &mut MapSlot> {
        std::iter::once(&mut self.center).chain(self.adjacent.iter_mut().flatten())
    }

    /// Slot array position for an adjacent map offset, both axes in
    /// {-1, 0, 1}. The center offset has no adjacent slot.
    fn adjacent_index(sx: i32, sy: i32) -> Option<usize> {
        if !(-1..=1).contains(&sx) || !(-1..=1).contains(&sy) || (sx == 0 && sy == 0) {
            return None;
        }
        let slot = ((sx + 1) + (sy + 1) * 3) as usize;
        Some(if slot < 4 { slot } else { slot - 1 })
    }
}

struct ViewState {
    projector: Projector,
    scene_rect: ScreenRectF,
    current_level: i32,
    active_tool: ToolCategory,
    preferences: ScenePreferences,
    highlight_pos: Option<TilePoint>,
}

struct ItemState {
    items: SlotMap<SceneItemId, SceneItem>,
    /// Lot items in document order, kept sorted by lot index.
    lots: Vec<SceneItemId>,
    /// Object and spawn-point items in document order.
    objects: Vec<SceneItemId>,
    levels: Vec<LevelItem>,
}

struct CacheState {
    textures: TilesetTextureCache,
    buildings: BuildingIndex,
}

/// A lot placement waiting for its map data to arrive.
struct PendingLoad {
    path: String,
    origin: TilePoint,
    level: i32,
    lot_index: usize,
}

struct LoadState {
    pending: Vec<PendingLoad>,
}

struct FlushState {
    scheduler: UpdateScheduler,
    queued_levels: BTreeSet<i32>,
}

/// Owns the 3x3 map slots, the overlay items and the deferred-update
/// machinery, and turns document changes into batched quad draws.
pub struct SceneCompositor {
    world_state: WorldState,
    view_state: ViewState,
    item_state: ItemState,
    cache_state: CacheState,
    load_state: LoadState,

    flush_state: FlushState,
}

impl SceneCompositor {
    pub fn new(root: Arc<MapData>, tile_width: u32, tile_height: u32, double_density: bool) -> Self {
        let composite = CompositeMap::new(root.clone());
        let geometry = MapGeometry {
            tile_width,
            tile_height,
            map_width: root.width(),
            map_height: root.height(),
        };
        let projector = Projector::new(geometry, composite.max_level(), double_density);
        let mut flush_state = FlushState {
            scheduler: UpdateScheduler::new(),
            queued_levels: BTreeSet::new(),
        };
        flush_state.scheduler.request_later(
            PendingFlags::ALL_GROUPS
                | PendingFlags::BOUNDS
                | PendingFlags::SYNCH
                | PendingFlags::Z_ORDER
                | PendingFlags::PAINT,
        );
        Self {
            world_state: WorldState {
                center: MapSlot::new(composite, TilePoint::new(0, 0)),
                adjacent: std::array::from_fn(|_| None),
            },
            view_state: ViewState {
                projector,
                scene_rect: ScreenRectF::default(),
                current_level: 0,
                active_tool: ToolCategory::default(),
                preferences: ScenePreferences::default(),
                highlight_pos: None,
            },
            item_state: ItemState {
                items: SlotMap::with_key(),
                lots: Vec::new(),
                objects: Vec::new(),
                levels: Vec::new(),
            },
            cache_state: CacheState {
                textures: TilesetTextureCache::new(),
                buildings: BuildingIndex::new(),
            },
            load_state: LoadState {
                pending: Vec::new(),
            },
            flush_state,
        }
    }

    /// The edited map's composite. Mutations go through the notification
    /// entry points, never through this.
    pub fn composite(&self) -> &CompositeMap {
        &self.world_state.center.composite
    }

    pub fn projector(&self) -> &Projector {
        &self.view_state.projector
    }

    pub fn scene_rect(&self) -> ScreenRectF {
        self.view_state.scene_rect
    }

    pub const fn current_level(&self) -> i32 {
        self.view_state.current_level
    }

    pub const fn active_tool(&self) -> ToolCategory {
        self.view_state.active_tool
    }

    pub const fn preferences(&self) -> ScenePreferences {
        self.view_state.preferences
    }

    pub fn level_item(&self, level: i32) -> Option<&LevelItem> {
        if level < 0 {
            return None;
        }
        self.item_state.levels.get(level as usize)
    }

    pub fn level_count(&self) -> usize {
        self.item_state.levels.len()
    }

    /// True when the level's content changed since it was last drawn.
    pub fn needs_repaint(&self, level: i32) -> bool {
        self.level_item(level).is_some_and(|item| item.dirty)
    }

    pub fn has_scheduled_flush(&self) -> bool {
        self.flush_state.scheduler.has_scheduled_flush()
    }

    pub fn pending_load_count(&self) -> usize {
        self.load_state.pending.len()
    }

    /// True when the named tileset is used by any slot's maps.
    pub fn is_tileset_used(&self, name: &str) -> bool {
        self.world_state
            .slots()
            .any(|slot| slot.composite.is_tileset_used(name))
    }

    fn request_later(&mut self, flags: PendingFlags) {
        self.flush_state.scheduler.request_later(flags);
    }

    fn queue_level(&mut self, level: i32) {
        self.flush_state.queued_levels.insert(level);
    }

    fn mark_all_levels_dirty(&mut self) {
        for item in &mut self.item_state.levels {
            item.dirty = true;
        }
    }
}

/// World-square origin of an adjacent slot at the given offset.
fn adjacent_origin(sx: i32, sy: i32) -> TilePoint {
    TilePoint::new(sx * CELL_SQUARES as i32, sy * CELL_SQUARES as i32)
}

mod scene_items;

mod zorder;

mod highlight;

mod compositor_events;

mod compositor_flush;

mod compositor_draw;

pub use compositor_draw::TexturedQuadSurface;

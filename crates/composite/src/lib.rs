//! Logical model of a composite map: tile data, nested sub-maps, ordered
//! cell stacks, and the room/building index.
//!
//! Nothing in this crate touches the GPU. The composite map produces, per
//! grid square and level, the ordered stack of tiles the batching layer
//! turns into quads, and it tracks structural change through a strictly
//! increasing change counter that consumers compare to invalidate caches.

use projection::{TilePoint, TileRect};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

mod composite;
pub use composite::{
    CellEntry, CellStack, CompositeError, CompositeMap, Road, SubMap, SubMapId,
};

mod buildings;
pub use buildings::{BuildingIndex, RoomId};

#[cfg(test)]
mod tests;

/// Normalized atlas coordinates of one tile image within its tileset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilesetError {
    ZeroTileSize,
    ZeroImageSize,
    PixelSizeMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for TilesetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TilesetError::ZeroTileSize => write!(f, "tileset tile size must be positive"),
            TilesetError::ZeroImageSize => write!(f, "tileset image size must be positive"),
            TilesetError::PixelSizeMismatch { expected, actual } => write!(
                f,
                "tileset pixel data is {actual} bytes, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for TilesetError {}

/// One source tileset: a named RGBA8 image divided into equal tiles.
///
/// The pixel buffer is shared; copies of a tileset embedded in map data
/// stay cheap. The change counter belongs to the provider side and is read
/// through [`TilesetResolver`] when deciding whether a GPU texture is stale.
#[derive(Debug, Clone)]
pub struct Tileset {
    name: Arc<str>,
    tile_width: u32,
    tile_height: u32,
    image_width: u32,
    image_height: u32,
    pixels: Arc<[u8]>,
    change_count: u64,
}

impl Tileset {
    pub fn new(
        name: &str,
        tile_width: u32,
        tile_height: u32,
        image_width: u32,
        image_height: u32,
        pixels: Arc<[u8]>,
    ) -> Result<Self, TilesetError> {
        if tile_width == 0 || tile_height == 0 {
            return Err(TilesetError::ZeroTileSize);
        }
        if image_width == 0 || image_height == 0 {
            return Err(TilesetError::ZeroImageSize);
        }
        let expected = image_width as usize * image_height as usize * 4;
        if pixels.len() != expected {
            return Err(TilesetError::PixelSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            name: Arc::from(name),
            tile_width,
            tile_height,
            image_width,
            image_height,
            pixels,
            change_count: 0,
        })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub const fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub const fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub const fn image_width(&self) -> u32 {
        self.image_width
    }

    pub const fn image_height(&self) -> u32 {
        self.image_height
    }

    pub fn pixels(&self) -> &Arc<[u8]> {
        &self.pixels
    }

    pub const fn change_count(&self) -> u64 {
        self.change_count
    }

    pub const fn columns(&self) -> u32 {
        self.image_width / self.tile_width
    }

    pub const fn rows(&self) -> u32 {
        self.image_height / self.tile_height
    }

    pub const fn tile_count(&self) -> u32 {
        self.columns() * self.rows()
    }

    /// Normalized atlas rectangle of `tile_id`, or `None` for ids past the
    /// end of the image grid.
    pub fn uv_rect(&self, tile_id: u32) -> Option<UvRect> {
        if self.columns() == 0 || tile_id >= self.tile_count() {
            return None;
        }
        let col = tile_id % self.columns();
        let row = tile_id / self.columns();
        let w = self.image_width as f32;
        let h = self.image_height as f32;
        Some(UvRect {
            u0: (col * self.tile_width) as f32 / w,
            v0: (row * self.tile_height) as f32 / h,
            u1: ((col + 1) * self.tile_width) as f32 / w,
            v1: ((row + 1) * self.tile_height) as f32 / h,
        })
    }
}

/// Resolves tileset identifiers to current tileset data. Implemented by
/// the hosting application's tile data provider.
pub trait TilesetResolver {
    fn resolve_tileset(&self, name: &str) -> Option<&Tileset>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilesetStoreError {
    UnknownTileset,
    PixelSizeMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for TilesetStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TilesetStoreError::UnknownTileset => write!(f, "tileset is not in the store"),
            TilesetStoreError::PixelSizeMismatch { expected, actual } => write!(
                f,
                "replacement pixel data is {actual} bytes, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for TilesetStoreError {}

/// Session-scoped tileset provider keyed by name.
#[derive(Debug, Default)]
pub struct TilesetStore {
    tilesets: HashMap<String, Tileset>,
}

impl TilesetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a tileset. A replacement keeps counting up from
    /// the previous change count so texture caches see the advance.
    pub fn insert(&mut self, mut tileset: Tileset) {
        let name = tileset.name.to_string();
        if let Some(existing) = self.tilesets.get(&name) {
            tileset.change_count = existing
                .change_count
                .checked_add(1)
                .expect("tileset change counter overflow");
        }
        self.tilesets.insert(name, tileset);
    }

    /// Swaps a tileset's pixel data in place and advances its change count.
    pub fn replace_pixels(
        &mut self,
        name: &str,
        pixels: Arc<[u8]>,
    ) -> Result<(), TilesetStoreError> {
        let Some(tileset) = self.tilesets.get_mut(name) else {
            return Err(TilesetStoreError::UnknownTileset);
        };
        let expected = tileset.image_width as usize * tileset.image_height as usize * 4;
        if pixels.len() != expected {
            return Err(TilesetStoreError::PixelSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        tileset.pixels = pixels;
        tileset.change_count = tileset
            .change_count
            .checked_add(1)
            .expect("tileset change counter overflow");
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tilesets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tilesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tilesets.is_empty()
    }
}

impl TilesetResolver for TilesetStore {
    fn resolve_tileset(&self, name: &str) -> Option<&Tileset> {
        self.tilesets.get(name)
    }
}

/// Reference to one tile: tileset index within the owning map's tileset
/// list plus the tile id within that tileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRef {
    pub tileset: u16,
    pub tile_id: u32,
}

impl TileRef {
    pub const fn new(tileset: u16, tile_id: u32) -> Self {
        Self { tileset, tile_id }
    }
}

/// Splits a layer name into its level prefix and base name, `"1_Walls"`
/// becoming `(1, "Walls")`. Names without a numeric prefix are level 0.
pub fn parse_layer_name(name: &str) -> (i32, &str) {
    match name.split_once('_') {
        Some((prefix, rest))
            if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) =>
        {
            match prefix.parse::<i32>() {
                Ok(level) => (level, rest),
                Err(_) => (0, name),
            }
        }
        _ => (0, name),
    }
}

/// One grid of tile references at a single level.
#[derive(Debug, Clone)]
pub struct TileLayer {
    name: String,
    level: i32,
    suffix_start: usize,
    width: u32,
    height: u32,
    cells: Box<[Option<TileRef>]>,
}

impl TileLayer {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        let (level, suffix) = parse_layer_name(name);
        let suffix_start = name.len() - suffix.len();
        Self {
            name: name.to_string(),
            level,
            suffix_start,
            width,
            height,
            cells: vec![None; width as usize * height as usize].into_boxed_slice(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base name without the level prefix.
    pub fn suffix(&self) -> &str {
        &self.name[self.suffix_start..]
    }

    pub const fn level(&self) -> i32 {
        self.level
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    const fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        Some(x as usize + y as usize * self.width as usize)
    }

    /// Tile at a local square, `None` when empty or out of bounds.
    pub fn cell(&self, x: i32, y: i32) -> Option<TileRef> {
        self.index(x, y).and_then(|i| self.cells[i])
    }

    pub fn set_cell(&mut self, x: i32, y: i32, tile: Option<TileRef>) {
        debug_assert!(
            self.index(x, y).is_some(),
            "cell ({x}, {y}) outside {}x{} layer",
            self.width,
            self.height
        );
        if let Some(i) = self.index(x, y) {
            self.cells[i] = tile;
        }
    }

    /// Fills the intersection of `rect` with the layer bounds.
    pub fn fill_rect(&mut self, rect: TileRect, tile: TileRef) {
        let x0 = rect.x.max(0);
        let y0 = rect.y.max(0);
        let x1 = rect.right().min(self.width as i32);
        let y1 = rect.bottom().min(self.height as i32);
        for y in y0..y1 {
            for x in x0..x1 {
                if let Some(i) = self.index(x, y) {
                    self.cells[i] = Some(tile);
                }
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }
}

/// Named room footprint inside a map, in map-local squares.
#[derive(Debug, Clone)]
pub struct RoomDef {
    pub name: String,
    pub level: i32,
    pub rects: Vec<TileRect>,
}

/// Immutable tile content of one map: dimensions, tilesets, layers, rooms.
///
/// A placeholder stands in for data that failed to load or has not loaded
/// yet; it keeps the requested footprint and carries no layers, so callers
/// never need a null path mid-pipeline.
#[derive(Debug, Clone)]
pub struct MapData {
    width: u32,
    height: u32,
    tilesets: Vec<Tileset>,
    layers: Vec<TileLayer>,
    rooms: Vec<RoomDef>,
    placeholder: bool,
}

impl MapData {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tilesets: Vec::new(),
            layers: Vec::new(),
            rooms: Vec::new(),
            placeholder: false,
        }
    }

    /// Fixed-size stand-in with zero layers.
    pub fn placeholder(width: u32, height: u32) -> Self {
        Self {
            placeholder: true,
            ..Self::new(width, height)
        }
    }

    pub const fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn bounds(&self) -> TileRect {
        TileRect::new(0, 0, self.width as i32, self.height as i32)
    }

    pub fn add_tileset(&mut self, tileset: Tileset) -> u16 {
        assert!(
            self.tilesets.len() < u16::MAX as usize,
            "tileset list overflow"
        );
        self.tilesets.push(tileset);
        (self.tilesets.len() - 1) as u16
    }

    pub fn tileset(&self, index: u16) -> Option<&Tileset> {
        self.tilesets.get(index as usize)
    }

    pub fn tilesets(&self) -> &[Tileset] {
        &self.tilesets
    }

    pub fn has_tileset(&self, name: &str) -> bool {
        self.tilesets.iter().any(|t| t.name.as_ref() == name)
    }

    /// Appends a layer. Layers must match the map's footprint.
    pub fn add_layer(&mut self, layer: TileLayer) -> usize {
        assert_eq!(
            (layer.width, layer.height),
            (self.width, self.height),
            "layer {} does not match map size",
            layer.name
        );
        self.layers.push(layer);
        self.layers.len() - 1
    }

    pub fn layers(&self) -> &[TileLayer] {
        &self.layers
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut TileLayer> {
        self.layers.get_mut(index)
    }

    pub fn add_room(&mut self, room: RoomDef) {
        self.rooms.push(room);
    }

    pub fn rooms(&self) -> &[RoomDef] {
        &self.rooms
    }

    /// Highest level any layer occupies; 0 for layerless maps.
    pub fn max_level(&self) -> i32 {
        self.layers.iter().map(TileLayer::level).max().unwrap_or(0)
    }

    /// Largest tile image footprint across the map's tilesets, in pixels
    /// at normal density. Drives the draw-margin growth of exposed rects.
    pub fn max_tile_size(&self) -> (u32, u32) {
        self.tilesets.iter().fold((0, 0), |(w, h), t| {
            (w.max(t.tile_width), h.max(t.tile_height))
        })
    }
}

/// Set of grid squares, used for suppression and room footprints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellRegion {
    squares: HashSet<TilePoint>,
}

impl CellRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rects(rects: &[TileRect]) -> Self {
        let mut region = Self::new();
        for rect in rects {
            region.insert_rect(*rect);
        }
        region
    }

    pub fn insert(&mut self, square: TilePoint) {
        self.squares.insert(square);
    }

    pub fn insert_rect(&mut self, rect: TileRect) {
        self.squares.extend(rect.squares());
    }

    pub fn contains(&self, square: TilePoint) -> bool {
        self.squares.contains(&square)
    }

    pub fn union_with(&mut self, other: &CellRegion) {
        self.squares.extend(other.squares.iter().copied());
    }

    pub fn subtract(&mut self, other: &CellRegion) {
        for square in &other.squares {
            self.squares.remove(square);
        }
    }

    pub fn translated(&self, by: TilePoint) -> CellRegion {
        CellRegion {
            squares: self.squares.iter().map(|&s| s + by).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.squares.is_empty()
    }

    pub fn len(&self) -> usize {
        self.squares.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = TilePoint> + '_ {
        self.squares.iter().copied()
    }

    pub fn bounding_rect(&self) -> TileRect {
        let mut iter = self.squares.iter();
        let Some(first) = iter.next() else {
            return TileRect::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for s in iter {
            min_x = min_x.min(s.x);
            min_y = min_y.min(s.y);
            max_x = max_x.max(s.x);
            max_y = max_y.max(s.y);
        }
        TileRect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }
}

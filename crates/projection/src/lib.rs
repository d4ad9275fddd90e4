//! Isometric projection between the tile grid and screen space.
//!
//! Coordinate spaces:
//! - Grid space: integer squares `(x, y)` per level, fractional points for
//!   drag previews. One level is a full floor; level `n + 1` sits three tile
//!   rows above level `n` on screen.
//! - Screen space: pixels. The projector is a pure value over the map
//!   geometry; it holds no mutable state and is safe to copy into draw passes.
//!
//! [`scan`] converts an exposed screen rectangle, mapped back into grid
//! space, into the exact set of covered squares.

pub mod scan;

/// Screen rows (in tile heights) that one level rises above the one below.
pub const LEVEL_STEP_TILES: i32 = 3;

/// Integer grid square coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TilePoint {
    pub x: i32,
    pub y: i32,
}

impl TilePoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn to_f64(self) -> TilePointF {
        TilePointF {
            x: self.x as f64,
            y: self.y as f64,
        }
    }
}

impl std::ops::Add for TilePoint {
    type Output = TilePoint;

    fn add(self, rhs: TilePoint) -> TilePoint {
        TilePoint::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for TilePoint {
    type Output = TilePoint;

    fn sub(self, rhs: TilePoint) -> TilePoint {
        TilePoint::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Fractional grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TilePointF {
    pub x: f64,
    pub y: f64,
}

impl TilePointF {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Containing integer square (floor on both axes).
    pub fn floor(self) -> TilePoint {
        TilePoint::new(self.x.floor() as i32, self.y.floor() as i32)
    }
}

/// Axis-aligned rectangle of grid squares. `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl TileRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub const fn contains(&self, point: TilePoint) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    pub const fn translated(&self, by: TilePoint) -> TileRect {
        TileRect::new(self.x + by.x, self.y + by.y, self.width, self.height)
    }

    pub fn intersects(&self, other: &TileRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Smallest rectangle containing both. An empty operand contributes
    /// nothing.
    pub fn united(&self, other: &TileRect) -> TileRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        TileRect::new(x, y, right - x, bottom - y)
    }

    pub fn squares(&self) -> impl Iterator<Item = TilePoint> + '_ {
        (self.y..self.bottom())
            .flat_map(move |y| (self.x..self.right()).map(move |x| TilePoint::new(x, y)))
    }
}

/// Integer screen-pixel rectangle. `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }
}

/// Fractional screen point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPointF {
    pub x: f64,
    pub y: f64,
}

impl ScreenPointF {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Fractional screen rectangle, used for exposed areas and scene bounds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenRectF {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRectF {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn right(&self) -> f64 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub const fn top_left(&self) -> ScreenPointF {
        ScreenPointF::new(self.x, self.y)
    }

    pub const fn top_right(&self) -> ScreenPointF {
        ScreenPointF::new(self.right(), self.y)
    }

    pub const fn bottom_left(&self) -> ScreenPointF {
        ScreenPointF::new(self.x, self.bottom())
    }

    pub const fn bottom_right(&self) -> ScreenPointF {
        ScreenPointF::new(self.right(), self.bottom())
    }

    pub fn contains(&self, point: ScreenPointF) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    /// Grows the rectangle by the given margins on each side.
    pub fn adjusted(&self, left: f64, top: f64, right: f64, bottom: f64) -> ScreenRectF {
        ScreenRectF::new(
            self.x - left,
            self.y - top,
            self.width + left + right,
            self.height + top + bottom,
        )
    }

    pub fn intersects(&self, other: &ScreenRectF) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn united(&self, other: &ScreenRectF) -> ScreenRectF {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        ScreenRectF::new(x, y, right - x, bottom - y)
    }
}

/// Tile and map dimensions the projector is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapGeometry {
    /// Width of one grid diamond in pixels at normal density.
    pub tile_width: u32,
    /// Height of one grid diamond in pixels at normal density.
    pub tile_height: u32,
    /// Map width in squares.
    pub map_width: u32,
    /// Map height in squares. Fixes the horizontal screen origin.
    pub map_height: u32,
}

impl Default for MapGeometry {
    fn default() -> Self {
        Self {
            tile_width: 64,
            tile_height: 32,
            map_width: 300,
            map_height: 300,
        }
    }
}

/// Maps grid coordinates to screen pixels for a given level.
///
/// `max_level` shifts every level's vertical origin so the topmost level
/// starts at screen y ≥ 0; raise it before drawing anything placed above
/// the current maximum. Double density scales every output by two.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projector {
    geometry: MapGeometry,
    max_level: i32,
    double_density: bool,
}

impl Projector {
    pub fn new(geometry: MapGeometry, max_level: i32, double_density: bool) -> Self {
        assert!(geometry.tile_width > 0, "tile width must be positive");
        assert!(geometry.tile_height > 0, "tile height must be positive");
        assert!(max_level >= 0, "max level must not be negative");
        Self {
            geometry,
            max_level,
            double_density,
        }
    }

    pub const fn geometry(&self) -> MapGeometry {
        self.geometry
    }

    pub const fn max_level(&self) -> i32 {
        self.max_level
    }

    pub fn set_max_level(&mut self, max_level: i32) {
        assert!(max_level >= 0, "max level must not be negative");
        self.max_level = max_level;
    }

    pub const fn is_double_density(&self) -> bool {
        self.double_density
    }

    /// Density multiplier applied to every pixel output.
    pub const fn scale(&self) -> u32 {
        if self.double_density { 2 } else { 1 }
    }

    /// Effective diamond width in pixels, density applied.
    pub const fn tile_width(&self) -> u32 {
        self.geometry.tile_width * self.scale()
    }

    /// Effective diamond height in pixels, density applied.
    pub const fn tile_height(&self) -> u32 {
        self.geometry.tile_height * self.scale()
    }

    const fn origin_x(&self) -> f64 {
        (self.geometry.map_height * self.tile_width() / 2) as f64
    }

    const fn level_offset_y(&self, level: i32) -> f64 {
        ((self.max_level - level) * LEVEL_STEP_TILES) as f64 * self.tile_height() as f64
    }

    /// Projects a fractional grid point on a level to screen pixels.
    ///
    /// The result is the top corner of the square's diamond; the diamond
    /// spans half a tile width to each side and one tile height downward.
    pub fn tile_to_screen(&self, tile: TilePointF, level: i32) -> ScreenPointF {
        let half_w = self.tile_width() as f64 / 2.0;
        let half_h = self.tile_height() as f64 / 2.0;
        ScreenPointF::new(
            self.origin_x() + (tile.x - tile.y) * half_w,
            (tile.x + tile.y) * half_h + self.level_offset_y(level),
        )
    }

    /// Exact inverse of [`tile_to_screen`](Self::tile_to_screen) up to
    /// floating rounding.
    pub fn screen_to_tile(&self, screen: ScreenPointF, level: i32) -> TilePointF {
        let half_w = self.tile_width() as f64 / 2.0;
        let half_h = self.tile_height() as f64 / 2.0;
        let diff = (screen.x - self.origin_x()) / half_w;
        let sum = (screen.y - self.level_offset_y(level)) / half_h;
        TilePointF::new((sum + diff) / 2.0, (sum - diff) / 2.0)
    }

    /// Screen bounds of a grid rectangle on a level.
    ///
    /// Covers the diamonds themselves; tile images taller than the diamond
    /// extend above this and are accounted for by the caller's draw margins.
    pub fn bounding_rect(&self, rect: TileRect, level: i32) -> ScreenRectF {
        let top = self.tile_to_screen(TilePoint::new(rect.x, rect.y).to_f64(), level);
        let left = self.tile_to_screen(TilePoint::new(rect.x, rect.bottom()).to_f64(), level);
        let right = self.tile_to_screen(TilePoint::new(rect.right(), rect.y).to_f64(), level);
        let bottom = self.tile_to_screen(TilePoint::new(rect.right(), rect.bottom()).to_f64(), level);
        ScreenRectF::new(left.x, top.y, right.x - left.x, bottom.y - top.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projector() -> Projector {
        Projector::new(MapGeometry::default(), 0, false)
    }

    #[test]
    fn projects_unit_steps_along_the_diamond_axes() {
        let p = projector();
        let origin = p.tile_to_screen(TilePointF::new(0.0, 0.0), 0);
        let east = p.tile_to_screen(TilePointF::new(1.0, 0.0), 0);
        let south = p.tile_to_screen(TilePointF::new(0.0, 1.0), 0);

        assert_eq!(east.x - origin.x, 32.0);
        assert_eq!(east.y - origin.y, 16.0);
        assert_eq!(south.x - origin.x, -32.0);
        assert_eq!(south.y - origin.y, 16.0);
    }

    #[test]
    fn screen_to_tile_inverts_tile_to_screen() {
        let p = Projector::new(MapGeometry::default(), 3, false);
        for &(x, y, level) in &[
            (0.0, 0.0, 0),
            (10.5, 3.25, 0),
            (299.0, 299.0, 3),
            (-12.0, 40.75, 2),
        ] {
            let screen = p.tile_to_screen(TilePointF::new(x, y), level);
            let tile = p.screen_to_tile(screen, level);
            assert!((tile.x - x).abs() < 1e-9, "x mismatch at ({x}, {y})");
            assert!((tile.y - y).abs() < 1e-9, "y mismatch at ({x}, {y})");
        }
    }

    #[test]
    fn higher_levels_rise_three_tile_heights() {
        let p = Projector::new(MapGeometry::default(), 2, false);
        let ground = p.tile_to_screen(TilePointF::new(5.0, 5.0), 0);
        let upper = p.tile_to_screen(TilePointF::new(5.0, 5.0), 1);
        assert_eq!(ground.y - upper.y, 3.0 * 32.0);
        assert_eq!(ground.x, upper.x);
    }

    #[test]
    fn raising_max_level_pushes_lower_levels_down() {
        let mut p = Projector::new(MapGeometry::default(), 0, false);
        let before = p.tile_to_screen(TilePointF::new(0.0, 0.0), 0);
        p.set_max_level(2);
        let after = p.tile_to_screen(TilePointF::new(0.0, 0.0), 0);
        assert_eq!(after.y - before.y, 2.0 * 3.0 * 32.0);
        // the new top level sits where level 0 used to
        let top = p.tile_to_screen(TilePointF::new(0.0, 0.0), 2);
        assert_eq!(top.y, before.y);
    }

    #[test]
    fn double_density_scales_all_outputs() {
        let normal = projector();
        let double = Projector::new(MapGeometry::default(), 0, true);
        let a = normal.tile_to_screen(TilePointF::new(7.0, 2.0), 0);
        let b = double.tile_to_screen(TilePointF::new(7.0, 2.0), 0);
        assert_eq!(b.x, a.x * 2.0);
        assert_eq!(b.y, a.y * 2.0);

        let round_trip = double.screen_to_tile(b, 0);
        assert!((round_trip.x - 7.0).abs() < 1e-9);
        assert!((round_trip.y - 2.0).abs() < 1e-9);
    }

    #[test]
    fn bounding_rect_contains_every_corner_diamond() {
        let p = projector();
        let rect = TileRect::new(10, 20, 5, 3);
        let bounds = p.bounding_rect(rect, 0);

        for corner in [
            TilePoint::new(rect.x, rect.y),
            TilePoint::new(rect.right(), rect.y),
            TilePoint::new(rect.x, rect.bottom()),
            TilePoint::new(rect.right(), rect.bottom()),
        ] {
            let s = p.tile_to_screen(corner.to_f64(), 0);
            assert!(s.x >= bounds.x && s.x <= bounds.right());
            assert!(s.y >= bounds.y && s.y <= bounds.bottom());
        }
        assert_eq!(bounds.width, (5 + 3) as f64 * 32.0);
        assert_eq!(bounds.height, (5 + 3) as f64 * 16.0);
    }

    #[test]
    fn tile_rect_union_ignores_empty_operands() {
        let a = TileRect::new(1, 1, 4, 4);
        let empty = TileRect::default();
        assert_eq!(a.united(&empty), a);
        assert_eq!(empty.united(&a), a);
        let b = TileRect::new(-2, 3, 2, 10);
        let u = a.united(&b);
        assert_eq!(u, TileRect::new(-2, 1, 7, 12));
    }
}

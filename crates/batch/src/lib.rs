//! Spatial batching of composite-map tiles into GPU quad buffers.
//!
//! The map is carved into fixed 10x10-square batches. A gather pass walks
//! the squares an exposed screen rect touches, asks the composite for each
//! square's ordered cell stack, and appends one quad per contributing tile
//! while keeping every square's quads contiguous. A build pass uploads the
//! quads as vertex/index buffers; a plan pass turns the exposed squares
//! into back-to-front draw runs with the per-quad skip rules applied.
//!
//! Visibility, opacity and suppression are resolved at plan time, not at
//! gather time, so toggling a layer or hovering a room never forces a
//! regather. Only the composite's change counter does that.

use composite::UvRect;
use projection::ScreenRectF;
use std::sync::Arc;

mod batch;
pub use batch::{BatchBuildError, TileBatch};

mod grid;
pub use grid::{BatchGrid, DrawPlan, QuadRun, QuadSurface};


/// Squares along one edge of a batch.
pub const BATCH_SQUARES: u32 = 10;
/// Batches along one edge of a full map cell.
pub const BATCHES_PER_CELL: u32 = 30;
/// Squares along one edge of a full map cell.
pub const CELL_SQUARES: u32 = BATCH_SQUARES * BATCHES_PER_CELL;
/// Squares covered by one batch.
pub const SQUARES_PER_BATCH: usize = (BATCH_SQUARES * BATCH_SQUARES) as usize;

/// One corner of an uploaded quad: screen position plus atlas coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    pub x: f32,
    pub y: f32,
    pub u: f32,
    pub v: f32,
}

/// One gathered tile quad with the identity the plan pass needs to apply
/// visibility, opacity and suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct TileQuad {
    /// Screen rect of the tile image, level offset and density applied.
    pub rect: ScreenRectF,
    pub uv: UvRect,
    /// Texture bind key, resolved by the draw surface.
    pub tileset: Arc<str>,
    /// Slot in the level's layer group table.
    pub layer_index: usize,
    pub sub_map: Option<composite::SubMapId>,
    pub hide_if_visible: Option<composite::SubMapId>,
}

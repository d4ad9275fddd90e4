//! Lazily created batch grid over one composite map level, with the
//! gather/build/plan passes and the draw-time skip rules.

use crate::{BATCH_SQUARES, TileBatch};
use bitvec::prelude::{BitVec, Lsb0};
use composite::CompositeMap;
use projection::scan::{GridQuad, covered_squares};
use projection::{Projector, ScreenPointF, ScreenRectF, TilePoint, TilePointF};
use std::sync::Arc;

/// One contiguous run of drawable quads within a single batch, sharing a
/// texture and opacity.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadRun {
    pub batch: usize,
    pub tileset: Arc<str>,
    pub opacity: f32,
    pub first_quad: usize,
    pub quad_count: usize,
}

/// Back-to-front draw runs produced by [`BatchGrid::plan_draw`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawPlan {
    runs: Vec<QuadRun>,
}

impl DrawPlan {
    pub fn runs(&self) -> &[QuadRun] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn quad_count(&self) -> usize {
        self.runs.iter().map(|run| run.quad_count).sum()
    }

    /// Whether the plan draws a particular quad of a particular batch.
    pub fn covers(&self, batch: usize, quad: usize) -> bool {
        self.runs.iter().any(|run| {
            run.batch == batch && quad >= run.first_quad && quad < run.first_quad + run.quad_count
        })
    }

    fn push(&mut self, batch: usize, tileset: &Arc<str>, opacity: f32, quad: usize) {
        if let Some(last) = self.runs.last_mut() {
            if last.batch == batch
                && last.first_quad + last.quad_count == quad
                && last.tileset == *tileset
                && last.opacity == opacity
            {
                last.quad_count += 1;
                return;
            }
        }
        self.runs.push(QuadRun {
            batch,
            tileset: tileset.clone(),
            opacity,
            first_quad: quad,
            quad_count: 1,
        });
    }
}

/// Draw surface adapter: binds buffers and textures, issues indexed quad
/// draws. The caller has already applied the scene's affine transform.
///
/// `draw_quads` receives quad units; each quad is six indices starting at
/// `first_quad * 6`, with the vertex buffer bound at offset zero.
pub trait QuadSurface {
    fn bind_batch(&mut self, vertex: &wgpu::Buffer, index: &wgpu::Buffer);
    /// Returns false when the tileset's texture is unavailable; the runs
    /// that need it are skipped.
    fn bind_tileset(&mut self, name: &str) -> bool;
    fn set_opacity(&mut self, opacity: f32);
    fn draw_quads(&mut self, first_quad: usize, quad_count: usize);
}

/// Grid of lazily created [`TileBatch`]es covering one level of one
/// composite map, invalidated as a whole when the map's change counter
/// advances.
#[derive(Debug)]
pub struct BatchGrid {
    level: i32,
    cols: u32,
    width_squares: u32,
    height_squares: u32,
    batches: Vec<Option<TileBatch>>,
    cached_change_count: Option<u64>,
    needs_full_rebuild: bool,
}

impl BatchGrid {
    pub fn new(width_squares: u32, height_squares: u32, level: i32) -> Self {
        let cols = width_squares.div_ceil(BATCH_SQUARES);
        let rows = height_squares.div_ceil(BATCH_SQUARES);
        Self {
            level,
            cols,
            width_squares,
            height_squares,
            batches: (0..(cols * rows) as usize).map(|_| None).collect(),
            cached_change_count: None,
            needs_full_rebuild: false,
        }
    }

    pub const fn level(&self) -> i32 {
        self.level
    }

    pub fn batch_slot_count(&self) -> usize {
        self.batches.len()
    }

    pub fn created_batch_count(&self) -> usize {
        self.batches.iter().flatten().count()
    }

    pub fn batch(&self, index: usize) -> Option<&TileBatch> {
        self.batches.get(index).and_then(Option::as_ref)
    }

    /// Batch slot covering a map-local square, `None` outside the grid.
    pub fn batch_index(&self, square: TilePoint) -> Option<usize> {
        if square.x < 0
            || square.y < 0
            || square.x >= self.width_squares as i32
            || square.y >= self.height_squares as i32
        {
            return None;
        }
        let col = square.x as u32 / BATCH_SQUARES;
        let row = square.y as u32 / BATCH_SQUARES;
        Some((col + row * self.cols) as usize)
    }

    /// Compares the composite's change counter against the one the grid
    /// last gathered under, invalidating everything when it moved.
    /// Returns true when an invalidation happened.
    pub fn prepare(&mut self, map: &CompositeMap) -> bool {
        let current = map.change_count();
        if self.cached_change_count == Some(current) {
            return false;
        }
        self.invalidate_all();
        self.cached_change_count = Some(current);
        true
    }

    /// Marks every existing batch ungathered without dropping its buffers.
    pub fn invalidate_all(&mut self) {
        for batch in self.batches.iter_mut().flatten() {
            batch.mark_ungathered();
        }
        self.needs_full_rebuild = true;
    }

    pub const fn needs_full_rebuild(&self) -> bool {
        self.needs_full_rebuild
    }

    fn batch_or_create(&mut self, index: usize) -> &mut TileBatch {
        let origin = TilePoint::new(
            (index as u32 % self.cols * BATCH_SQUARES) as i32,
            (index as u32 / self.cols * BATCH_SQUARES) as i32,
        );
        let level = self.level;
        self.batches[index].get_or_insert_with(|| TileBatch::new(origin, level))
    }

    /// Squares the exposed rect touches, grown by the draw margins so
    /// tile images hanging over their square are not clipped away.
    fn exposed_squares(
        &self,
        projector: &Projector,
        map_origin: TilePoint,
        exposed: &ScreenRectF,
        margins: (u32, u32),
    ) -> Vec<TilePoint> {
        let scale = projector.scale() as f64;
        let margin_w = margins.0 as f64 * scale;
        let margin_h = margins.1 as f64 * scale;
        let grown = exposed.adjusted(margin_w, margin_h, margin_w, margin_h);
        let to_local = |point: ScreenPointF| -> TilePointF {
            let tile = projector.screen_to_tile(point, self.level);
            TilePointF::new(
                tile.x - map_origin.x as f64,
                tile.y - map_origin.y as f64,
            )
        };
        let quad = GridQuad {
            top_left: to_local(grown.top_left()),
            top_right: to_local(grown.top_right()),
            bottom_left: to_local(grown.bottom_left()),
            bottom_right: to_local(grown.bottom_right()),
        };
        covered_squares(&quad, 0, self.height_squares as i32)
    }

    /// Gathers every not-yet-gathered batch the exposed rect touches,
    /// creating batches lazily. Returns the touched batch slots.
    pub fn gather_exposed(
        &mut self,
        map: &CompositeMap,
        projector: &Projector,
        map_origin: TilePoint,
        exposed: &ScreenRectF,
        margins: (u32, u32),
    ) -> Vec<usize> {
        self.prepare(map);
        let squares = self.exposed_squares(projector, map_origin, exposed, margins);
        let mut touched: BitVec<usize, Lsb0> = BitVec::repeat(false, self.batches.len());
        let mut out = Vec::new();
        for square in squares {
            let Some(index) = self.batch_index(square) else {
                continue;
            };
            let Some(mut slot) = touched.get_mut(index) else {
                continue;
            };
            if *slot {
                continue;
            }
            *slot = true;
            out.push(index);
            let batch = self.batch_or_create(index);
            if !batch.is_gathered() {
                batch.gather(map, projector, map_origin);
            }
        }
        self.needs_full_rebuild = false;
        out
    }

    /// Builds every gathered batch whose buffers are stale. A failed build
    /// is logged and leaves only that batch undrawable.
    pub fn build_gathered(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> usize {
        let mut built = 0;
        for batch in self.batches.iter_mut().flatten() {
            if !batch.is_gathered() || batch.is_created() {
                continue;
            }
            match batch.build(device, queue) {
                Ok(()) => built += 1,
                Err(err) => {
                    log::warn!(
                        "quad batch at {:?} level {} left undrawable: {err}",
                        batch.origin(),
                        batch.level(),
                    );
                }
            }
        }
        built
    }

    /// Gathers the exposed area, then walks its squares back to front and
    /// emits draw runs, applying the per-quad skip rules: suppressed
    /// squares keep only their topmost quad, quads whose hide-if-visible
    /// partner is showing are dropped, and so are quads of hidden lots and
    /// hidden layers.
    pub fn plan_draw(
        &mut self,
        map: &CompositeMap,
        projector: &Projector,
        map_origin: TilePoint,
        exposed: &ScreenRectF,
        margins: (u32, u32),
    ) -> DrawPlan {
        self.gather_exposed(map, projector, map_origin, exposed, margins);

        let mut squares = self.exposed_squares(projector, map_origin, exposed, margins);
        squares.sort_by_key(|square| (square.x + square.y, square.x));

        let mut plan = DrawPlan::default();
        let mut survivors: Vec<usize> = Vec::new();
        for square in squares {
            let Some(index) = self.batch_index(square) else {
                continue;
            };
            let Some(batch) = self.batches[index].as_ref() else {
                continue;
            };
            let Some((first, count)) = batch.square_range(square) else {
                continue;
            };

            survivors.clear();
            for quad_index in first..first + count {
                let quad = &batch.quads()[quad_index];
                if let Some(other) = quad.hide_if_visible {
                    if map
                        .sub_map(other)
                        .map(|s| s.is_lot_visible())
                        .unwrap_or(false)
                    {
                        continue;
                    }
                }
                if let Some(owner) = quad.sub_map {
                    let Some(sub) = map.sub_map(owner) else {
                        continue;
                    };
                    if !sub.is_lot_visible() {
                        continue;
                    }
                }
                if let Some(group) = map.group(self.level) {
                    if !group.is_layer_visible(quad.layer_index) {
                        continue;
                    }
                }
                survivors.push(quad_index);
            }
            if survivors.len() > 1 && map.is_suppressed(square, self.level) {
                survivors.drain(..survivors.len() - 1);
            }

            for &quad_index in &survivors {
                let quad = &batch.quads()[quad_index];
                let opacity = map
                    .group(self.level)
                    .map(|group| group.layer_opacity(quad.layer_index))
                    .unwrap_or(1.0);
                plan.push(index, &quad.tileset, opacity, quad_index);
            }
        }
        plan
    }

    /// Replays a plan onto a surface, binding each batch's buffers and
    /// each texture only when they change.
    pub fn submit_plan(&self, plan: &DrawPlan, surface: &mut dyn QuadSurface) {
        let mut bound_batch: Option<usize> = None;
        let mut bound_tileset: Option<Arc<str>> = None;
        let mut bound_opacity: Option<f32> = None;
        let mut failed: Vec<Arc<str>> = Vec::new();

        for run in plan.runs() {
            if failed.iter().any(|name| *name == run.tileset) {
                continue;
            }
            let Some(batch) = self.batch(run.batch) else {
                debug_assert!(false, "draw plan references a missing batch");
                continue;
            };
            debug_assert!(batch.is_created(), "drawing a batch that was never built");
            let (Some(vertex_buffer), Some(index_buffer)) =
                (batch.vertex_buffer(), batch.index_buffer())
            else {
                continue;
            };
            if bound_batch != Some(run.batch) {
                surface.bind_batch(vertex_buffer, index_buffer);
                bound_batch = Some(run.batch);
            }
            if bound_tileset.as_deref() != Some(run.tileset.as_ref()) {
                if !surface.bind_tileset(&run.tileset) {
                    failed.push(run.tileset.clone());
                    continue;
                }
                bound_tileset = Some(run.tileset.clone());
            }
            if bound_opacity != Some(run.opacity) {
                surface.set_opacity(run.opacity);
                bound_opacity = Some(run.opacity);
            }
            surface.draw_quads(run.first_quad, run.quad_count);
        }
    }
}

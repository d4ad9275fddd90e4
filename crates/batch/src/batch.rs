//! One 10x10-square quad batch and its GPU buffer pair.

use crate::{QuadVertex, SQUARES_PER_BATCH, TileQuad, BATCH_SQUARES};
use composite::CompositeMap;
use projection::{Projector, ScreenRectF, TilePoint};

/// Buffers start at this many quads and grow by powers of two.
const INITIAL_QUAD_CAPACITY: usize = 256;

const VERTICES_PER_QUAD: usize = 4;
const INDICES_PER_QUAD: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchBuildError {
    /// The quad list needs a buffer past the device's limit. The batch is
    /// left undrawable; siblings are unaffected.
    BufferTooLarge { required: u64, limit: u64 },
}

impl std::fmt::Display for BatchBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchBuildError::BufferTooLarge { required, limit } => write!(
                f,
                "quad buffer needs {required} bytes, device limit is {limit}"
            ),
        }
    }
}

impl std::error::Error for BatchBuildError {}

/// Quads of one fixed 10x10-square region at one level.
///
/// `gathered` means the quad list matches the composite; `created` means
/// the GPU buffers match the quad list. Ungathering keeps the buffers so a
/// later build can reuse their allocation.
#[derive(Debug)]
pub struct TileBatch {
    origin: TilePoint,
    level: i32,
    quads: Vec<TileQuad>,
    first: [i32; SQUARES_PER_BATCH],
    count: [u16; SQUARES_PER_BATCH],
    gathered: bool,
    created: bool,
    vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
    quad_capacity: usize,
}

impl TileBatch {
    pub fn new(origin: TilePoint, level: i32) -> Self {
        Self {
            origin,
            level,
            quads: Vec::new(),
            first: [-1; SQUARES_PER_BATCH],
            count: [0; SQUARES_PER_BATCH],
            gathered: false,
            created: false,
            vertex_buffer: None,
            index_buffer: None,
            quad_capacity: 0,
        }
    }

    /// First square of the batch's region, in map-local squares.
    pub const fn origin(&self) -> TilePoint {
        self.origin
    }

    pub const fn level(&self) -> i32 {
        self.level
    }

    pub const fn is_gathered(&self) -> bool {
        self.gathered
    }

    pub const fn is_created(&self) -> bool {
        self.created
    }

    /// Gathered and built; stale batches and batches whose build failed
    /// are skipped by the draw pass.
    pub const fn is_drawable(&self) -> bool {
        self.gathered && self.created
    }

    pub fn quads(&self) -> &[TileQuad] {
        &self.quads
    }

    pub fn vertex_buffer(&self) -> Option<&wgpu::Buffer> {
        self.vertex_buffer.as_ref()
    }

    pub fn index_buffer(&self) -> Option<&wgpu::Buffer> {
        self.index_buffer.as_ref()
    }

    fn slot(&self, square: TilePoint) -> Option<usize> {
        let dx = square.x - self.origin.x;
        let dy = square.y - self.origin.y;
        if dx < 0 || dy < 0 || dx >= BATCH_SQUARES as i32 || dy >= BATCH_SQUARES as i32 {
            return None;
        }
        Some(dx as usize + dy as usize * BATCH_SQUARES as usize)
    }

    /// Contiguous quad range of one square, `None` when the square is
    /// outside the batch or empty.
    pub fn square_range(&self, square: TilePoint) -> Option<(usize, usize)> {
        let slot = self.slot(square)?;
        debug_assert!(
            self.gathered || self.quads.is_empty(),
            "querying an ungathered batch"
        );
        if self.first[slot] < 0 {
            return None;
        }
        Some((self.first[slot] as usize, self.count[slot] as usize))
    }

    /// Clears the quad list and per-square table. The GPU buffers stay
    /// behind for reuse by the next build.
    pub fn mark_ungathered(&mut self) {
        self.quads.clear();
        self.first = [-1; SQUARES_PER_BATCH];
        self.count = [0; SQUARES_PER_BATCH];
        self.gathered = false;
    }

    /// Rebuilds the quad list from the composite's ordered cell stacks.
    ///
    /// Every contributing tile becomes a quad; visibility, opacity and
    /// suppression stay unresolved until plan time. `map_origin` offsets
    /// this map's squares into world squares before projecting.
    pub fn gather(&mut self, map: &CompositeMap, projector: &Projector, map_origin: TilePoint) {
        self.quads.clear();
        self.first = [-1; SQUARES_PER_BATCH];
        self.count = [0; SQUARES_PER_BATCH];

        let tw = projector.tile_width() as f64;
        let th = projector.tile_height() as f64;
        let scale = projector.scale() as f64;
        for dy in 0..BATCH_SQUARES as i32 {
            for dx in 0..BATCH_SQUARES as i32 {
                let square = TilePoint::new(self.origin.x + dx, self.origin.y + dy);
                let slot = dx as usize + dy as usize * BATCH_SQUARES as usize;
                let first = self.quads.len();
                for entry in map.ordered_cells_at(square, self.level) {
                    let Some(uv) = entry.tileset.uv_rect(entry.tile_id) else {
                        continue;
                    };
                    let base = projector.tile_to_screen((square + map_origin).to_f64(), self.level);
                    let image_w = entry.tileset.tile_width() as f64 * scale;
                    let image_h = entry.tileset.tile_height() as f64 * scale;
                    self.quads.push(TileQuad {
                        // bottom-aligned to the diamond, centered on its top corner
                        rect: ScreenRectF::new(
                            base.x - tw / 2.0,
                            base.y + th - image_h,
                            image_w,
                            image_h,
                        ),
                        uv,
                        tileset: entry.tileset.name().clone(),
                        layer_index: entry.layer_index,
                        sub_map: entry.sub_map,
                        hide_if_visible: entry.hide_if_visible,
                    });
                }
                let count = self.quads.len() - first;
                if count > 0 {
                    self.first[slot] = first as i32;
                    self.count[slot] = count as u16;
                }
            }
        }
        self.gathered = true;
        self.created = false;
    }

    /// Uploads the quad list, reallocating the buffer pair only when the
    /// quad count outgrows the current capacity. No-op when already built;
    /// an empty quad list builds to nothing.
    pub fn build(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<(), BatchBuildError> {
        if self.created {
            return Ok(());
        }
        if self.quads.is_empty() {
            self.created = true;
            return Ok(());
        }
        debug_assert!(self.gathered, "building a batch that was never gathered");

        let mut vertices = Vec::with_capacity(self.quads.len() * VERTICES_PER_QUAD);
        let mut indices: Vec<u32> = Vec::with_capacity(self.quads.len() * INDICES_PER_QUAD);
        for (i, quad) in self.quads.iter().enumerate() {
            let r = quad.rect;
            let uv = quad.uv;
            vertices.push(QuadVertex {
                x: r.x as f32,
                y: r.y as f32,
                u: uv.u0,
                v: uv.v0,
            });
            vertices.push(QuadVertex {
                x: r.right() as f32,
                y: r.y as f32,
                u: uv.u1,
                v: uv.v0,
            });
            vertices.push(QuadVertex {
                x: r.right() as f32,
                y: r.bottom() as f32,
                u: uv.u1,
                v: uv.v1,
            });
            vertices.push(QuadVertex {
                x: r.x as f32,
                y: r.bottom() as f32,
                u: uv.u0,
                v: uv.v1,
            });
            // two triangles per quad
            let base = (i * VERTICES_PER_QUAD) as u32;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        if self.quads.len() > self.quad_capacity || self.vertex_buffer.is_none() {
            let required = self.quads.len().max(INITIAL_QUAD_CAPACITY);
            let capacity = required
                .checked_next_power_of_two()
                .expect("quad capacity overflow");
            let capacity_u64 = u64::try_from(capacity).expect("quad capacity exceeds u64");
            let vertex_size = capacity_u64
                .checked_mul((VERTICES_PER_QUAD * std::mem::size_of::<QuadVertex>()) as u64)
                .expect("vertex buffer size overflow");
            let index_size = capacity_u64
                .checked_mul((INDICES_PER_QUAD * std::mem::size_of::<u32>()) as u64)
                .expect("index buffer size overflow");
            let limit = device.limits().max_buffer_size;
            if vertex_size > limit || index_size > limit {
                return Err(BatchBuildError::BufferTooLarge {
                    required: vertex_size.max(index_size),
                    limit,
                });
            }
            self.vertex_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("batch.quad_vertices"),
                size: vertex_size,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.index_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("batch.quad_indices"),
                size: index_size,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.quad_capacity = capacity;
        }

        if let (Some(vertex_buffer), Some(index_buffer)) =
            (&self.vertex_buffer, &self.index_buffer)
        {
            queue.write_buffer(vertex_buffer, 0, bytemuck::cast_slice(&vertices));
            queue.write_buffer(index_buffer, 0, bytemuck::cast_slice(&indices));
        }
        self.created = true;
        Ok(())
    }

    /// Buffer capacity in quads, grow-only across rebuilds.
    pub const fn quad_capacity(&self) -> usize {
        self.quad_capacity
    }
}

//! Per-level quad submission: plan draw runs for every slot, build stale
//! buffers, resolve tileset textures through the cache and replay the
//! runs onto the host surface.

use atlas::{ContextId, TilesetTextureCache};
use batch::QuadSurface;
use composite::TilesetResolver;
use projection::ScreenRectF;

use crate::{DARKENING_FACTOR, MapSlot, SceneCompositor};

/// Draw adapter the host implements. Buffers and textures are bound for
/// it; draws arrive in quad units with the scene's affine transform
/// already applied by the caller.
pub trait TexturedQuadSurface {
    fn bind_batch(&mut self, vertex: &wgpu::Buffer, index: &wgpu::Buffer);
    fn bind_texture(&mut self, view: &wgpu::TextureView);
    fn set_opacity(&mut self, opacity: f32);
    fn draw_quads(&mut self, first_quad: usize, quad_count: usize);
}

/// Resolves tileset names through the texture cache and folds the level's
/// display factor into run opacity. Runs whose tileset fails to resolve
/// are skipped.
struct CachedTextureSurface<'a> {
    inner: &'a mut dyn TexturedQuadSurface,
    textures: &'a mut TilesetTextureCache,
    context: ContextId,
    resolver: &'a dyn TilesetResolver,
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    factor: f32,
}

impl QuadSurface for CachedTextureSurface<'_> {
    fn bind_batch(&mut self, vertex: &wgpu::Buffer, index: &wgpu::Buffer) {
        self.inner.bind_batch(vertex, index);
    }

    fn bind_tileset(&mut self, name: &str) -> bool {
        match self
            .textures
            .get(self.context, name, self.resolver, self.device, self.queue)
        {
            Some(texture) => {
                self.inner.bind_texture(texture.view());
                true
            }
            None => false,
        }
    }

    fn set_opacity(&mut self, opacity: f32) {
        self.inner.set_opacity(opacity * self.factor);
    }

    fn draw_quads(&mut self, first_quad: usize, quad_count: usize) {
        self.inner.draw_quads(first_quad, quad_count);
    }
}

impl SceneCompositor {
    /// Draws one level of all nine slots into the surface and clears the
    /// level's repaint flag. Hidden levels, and levels above the current
    /// one while highlighting, draw nothing. Returns the number of quads
    /// planned; runs whose textures are unavailable are skipped after
    /// planning.
    pub fn draw_level(
        &mut self,
        level: i32,
        exposed: &ScreenRectF,
        context: ContextId,
        resolver: &dyn TilesetResolver,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface: &mut dyn TexturedQuadSurface,
    ) -> usize {
        if level < 0 {
            return 0;
        }
        let Self {
            world_state,
            view_state,
            item_state,
            cache_state,
            ..
        } = self;
        if !world_state.center.composite.is_level_visible(level) {
            return 0;
        }
        let highlight = view_state.preferences.highlight_current_level;
        if highlight && level > view_state.current_level {
            return 0;
        }
        let Some(level_item) = item_state.levels.get_mut(level as usize) else {
            return 0;
        };
        let mut factor = level_item.opacity;
        if highlight && level < view_state.current_level {
            factor *= 1.0 - DARKENING_FACTOR;
        }

        let mut planned = 0;
        for slot in world_state.slots_mut() {
            let MapSlot {
                composite,
                origin,
                grids,
            } = slot;
            let Some(grid) = grids.get_mut(level as usize) else {
                continue;
            };
            let margins = composite.max_tile_size();
            let plan = grid.plan_draw(composite, &view_state.projector, *origin, exposed, margins);
            if plan.is_empty() {
                continue;
            }
            grid.build_gathered(device, queue);
            let mut bound = CachedTextureSurface {
                inner: &mut *surface,
                textures: &mut cache_state.textures,
                context,
                resolver,
                device,
                queue,
                factor,
            };
            grid.submit_plan(&plan, &mut bound);
            planned += plan.quad_count();
        }
        level_item.dirty = false;
        planned
    }
}

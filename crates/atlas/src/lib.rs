//! Per-context GPU texture cache for tileset images.
//!
//! Textures are keyed by rendering context and tileset name. A cached
//! texture is reused until the provider's change counter moves past the
//! one it was uploaded at; unresolvable names are remembered and skipped
//! without asking the provider again until [`tileset_added`] clears them.
//! Destroying a context drops everything created under it immediately.
//!
//! [`tileset_added`]: TilesetTextureCache::tileset_added

use composite::{Tileset, TilesetResolver};
use std::collections::{HashMap, HashSet};


/// Identity of one GPU rendering context. The hosting application assigns
/// these; the cache never invents them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

/// One uploaded tileset image plus the provider change count it mirrors.
#[derive(Debug)]
pub struct TilesetTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    change_count: u64,
}

impl TilesetTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub const fn change_count(&self) -> u64 {
        self.change_count
    }
}

#[derive(Debug, Default)]
struct ContextTextures {
    textures: HashMap<String, TilesetTexture>,
    missing: HashSet<String>,
}

/// Session-scoped cache of tileset textures across rendering contexts.
#[derive(Debug, Default)]
pub struct TilesetTextureCache {
    contexts: HashMap<ContextId, ContextTextures>,
}

impl TilesetTextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current texture for a tileset under one context,
    /// uploading or re-uploading as needed. `None` means the tileset is
    /// unresolvable or does not fit the device; both are logged and the
    /// caller draws without it.
    pub fn get(
        &mut self,
        context: ContextId,
        name: &str,
        resolver: &dyn TilesetResolver,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Option<&TilesetTexture> {
        let entry = self.contexts.entry(context).or_default();
        if entry.missing.contains(name) {
            return None;
        }
        let Some(tileset) = resolver.resolve_tileset(name) else {
            entry.missing.insert(name.to_string());
            log::warn!("tileset {name} is unresolvable, drawing without it");
            return None;
        };

        let cached = entry.textures.get(name).map(TilesetTexture::change_count);
        if cached == Some(tileset.change_count()) {
            return entry.textures.get(name);
        }

        let limit = device.limits().max_texture_dimension_2d;
        if tileset.image_width() > limit || tileset.image_height() > limit {
            entry.missing.insert(name.to_string());
            log::warn!(
                "tileset {name} is {}x{}, past the device texture limit {limit}",
                tileset.image_width(),
                tileset.image_height(),
            );
            return None;
        }

        log::debug!(
            "uploading tileset {name} ({}x{}, change {})",
            tileset.image_width(),
            tileset.image_height(),
            tileset.change_count(),
        );
        let texture = upload_tileset(device, queue, tileset);
        entry.missing.remove(name);
        entry.textures.insert(name.to_string(), texture);
        entry.textures.get(name)
    }

    /// Forgets that a name was unresolvable so the next `get` retries.
    pub fn tileset_added(&mut self, name: &str) {
        for entry in self.contexts.values_mut() {
            entry.missing.remove(name);
        }
    }

    /// Drops the tileset's textures under every context.
    pub fn tileset_removed(&mut self, name: &str) {
        for entry in self.contexts.values_mut() {
            entry.textures.remove(name);
            entry.missing.remove(name);
        }
    }

    /// Releases everything created under a context. Must run synchronously
    /// with the context teardown notification; the GPU objects are invalid
    /// the moment the context is gone.
    pub fn context_destroyed(&mut self, context: ContextId) {
        if self.contexts.remove(&context).is_some() {
            log::debug!("dropped tileset textures of context {}", context.value());
        }
    }

    pub fn texture_count(&self, context: ContextId) -> usize {
        self.contexts
            .get(&context)
            .map(|entry| entry.textures.len())
            .unwrap_or(0)
    }

    pub fn is_missing(&self, context: ContextId, name: &str) -> bool {
        self.contexts
            .get(&context)
            .map(|entry| entry.missing.contains(name))
            .unwrap_or(false)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}

fn upload_tileset(device: &wgpu::Device, queue: &wgpu::Queue, tileset: &Tileset) -> TilesetTexture {
    let size = wgpu::Extent3d {
        width: tileset.image_width(),
        height: tileset.image_height(),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("atlas.tileset_image"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        tileset.pixels(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(tileset.image_width() * 4),
            rows_per_image: Some(tileset.image_height()),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("atlas.tileset_image_view"),
        ..Default::default()
    });
    TilesetTexture {
        texture,
        view,
        change_count: tileset.change_count(),
    }
}

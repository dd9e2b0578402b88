//! Stochastic sampling seeds.
//!
//! One independent random `u32` per lightmap texel, generated host-side and
//! uploaded once as an immutable R32Uint texture. The field's lifecycle is
//! tied to the lightmap resolution: it is created at session start and
//! regenerated only on a resolution change (which also resets the frame
//! index and clears accumulation — a stale partial average combined with a
//! fresh random stream is statistically invalid).
//!
//! Generation is a SplitMix32 stream keyed by the session seed. The hand
//! rolled generator is deliberate: the same algorithm is mirrored by the WGSL
//! kernel's hashing and reproduced by the CPU executor, so for a given
//! `(seed, width, height)` the field is bit-reproducible without a GPU.

use crate::error::{BakeError, BakeResult};
use crate::gpu::GpuContext;

/// One SplitMix32 step. Advances `state` and returns the next word.
#[inline]
pub fn splitmix32(state: &mut u32) -> u32 {
    *state = state.wrapping_add(0x9E37_79B9);
    let mut z = *state;
    z = (z ^ (z >> 16)).wrapping_mul(0x21F0_AAAD);
    z = (z ^ (z >> 15)).wrapping_mul(0x735A_2D97);
    z ^ (z >> 15)
}

/// Generate the `width * height` per-texel seed values for `seed`.
/// Deterministic: the same inputs always produce the same field.
pub fn generate_seeds(width: u32, height: u32, seed: u32) -> Vec<u32> {
    let mut state = seed;
    let count = width as usize * height as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(splitmix32(&mut state));
    }
    out
}

/// GPU-resident seed field: an immutable R32Uint texture, read-only to the
/// sampling kernel.
pub struct SeedField {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    seed: u32,
}

impl SeedField {
    pub fn new(ctx: &GpuContext, width: u32, height: u32, seed: u32) -> BakeResult<Self> {
        if width == 0 || height == 0 {
            return Err(BakeError::init("seed field resolution must be positive"));
        }

        let values = generate_seeds(width, height, seed);

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("seed-field"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&values),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        for _ in 0..2 {
            if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
                return Err(BakeError::init(format!("seed field allocation failed: {e}")));
            }
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            texture,
            view,
            width,
            height,
            seed,
        })
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }
}

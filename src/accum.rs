//! Double-buffered accumulation targets.
//!
//! Owns the ping-pong pair of R32Float accumulation textures, the
//! externally sampled publish texture, and the padded readback buffer used
//! to export CPU snapshots. The protocol per pass: render into
//! `write target` (reading the other), encode the publish copies in the same
//! submission (queue ordering guarantees they observe the completed pass),
//! wait for completion, then `swap()`. The publish texture and the CPU
//! snapshot therefore always reflect a fully completed pass.
//!
//! wgpu zero-initializes new textures, so the first pass reads a defined
//! all-zero previous estimate.

use std::sync::mpsc;
use std::time::Duration;

use crate::error::{BakeError, BakeResult};
use crate::gpu::{align_copy_bpr, GpuContext};

pub const ACCUM_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Ping-pong accumulation pair plus publish slot and readback staging.
pub struct AccumulationBuffers {
    resolution: u32,
    textures: [wgpu::Texture; 2],
    views: [wgpu::TextureView; 2],
    publish_texture: wgpu::Texture,
    publish_view: wgpu::TextureView,
    readback_buf: wgpu::Buffer,
    padded_bpr: u32,
    write_index: usize,
    publish_encoded: bool,
}

impl AccumulationBuffers {
    pub fn new(ctx: &GpuContext, resolution: u32) -> BakeResult<Self> {
        if resolution == 0 {
            return Err(BakeError::init("accumulation resolution must be positive"));
        }

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let size = wgpu::Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: 1,
        };

        let accum_desc = wgpu::TextureDescriptor {
            label: None,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ACCUM_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        };

        let textures = [
            ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("lightmap-accum-0"),
                ..accum_desc.clone()
            }),
            ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("lightmap-accum-1"),
                ..accum_desc.clone()
            }),
        ];
        let views = [
            textures[0].create_view(&wgpu::TextureViewDescriptor::default()),
            textures[1].create_view(&wgpu::TextureViewDescriptor::default()),
        ];

        let publish_texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lightmap-publish"),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ..accum_desc
        });
        let publish_view = publish_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_bpr = align_copy_bpr(resolution * 4);
        let readback_buf = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lightmap-readback"),
            size: padded_bpr as u64 * resolution as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        for _ in 0..2 {
            if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
                return Err(BakeError::init(format!(
                    "accumulation buffer allocation failed: {e}"
                )));
            }
        }

        Ok(Self {
            resolution,
            textures,
            views,
            publish_texture,
            publish_view,
            readback_buf,
            padded_bpr,
            write_index: 0,
            publish_encoded: false,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// The currently inactive target, rendered into this pass.
    pub fn write_view(&self) -> &wgpu::TextureView {
        &self.views[self.write_index]
    }

    /// The stable target holding the estimate after the previous pass.
    pub fn read_view(&self) -> &wgpu::TextureView {
        &self.views[1 - self.write_index]
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Consumer-facing published texture (always a fully completed pass).
    pub fn publish_view(&self) -> &wgpu::TextureView {
        &self.publish_view
    }

    /// Encode the publish copies for the pass being rendered: write target →
    /// publish texture, and write target → readback staging. Must be encoded
    /// after the sampling pass in the same submission.
    pub fn encode_publish(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let size = wgpu::Extent3d {
            width: self.resolution,
            height: self.resolution,
            depth_or_array_layers: 1,
        };
        let src = wgpu::ImageCopyTexture {
            texture: &self.textures[self.write_index],
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        };
        encoder.copy_texture_to_texture(
            src,
            wgpu::ImageCopyTexture {
                texture: &self.publish_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            size,
        );
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.textures[self.write_index],
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bpr),
                    rows_per_image: Some(self.resolution),
                },
            },
            size,
        );
        self.publish_encoded = true;
    }

    /// Map the readback staging buffer and return the depadded texel data of
    /// the just-published pass. Waits for GPU completion with a bounded
    /// timeout; a timeout classifies as a pass failure rather than hanging.
    pub fn read_snapshot(&self, ctx: &GpuContext, timeout: Duration) -> BakeResult<Vec<f32>> {
        let slice = self.readback_buf.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        ctx.device.poll(wgpu::Maintain::Wait);

        match rx.recv_timeout(timeout) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(BakeError::readback(format!("map_async failed: {e:?}")));
            }
            Err(_) => {
                self.readback_buf.unmap();
                return Err(BakeError::pass(format!(
                    "timed out after {timeout:?} waiting for pass completion"
                )));
            }
        }

        let data = slice.get_mapped_range();
        let res = self.resolution as usize;
        let src_stride = self.padded_bpr as usize;
        let mut out = vec![0.0f32; res * res];
        for y in 0..res {
            let row = &data[y * src_stride..y * src_stride + res * 4];
            out[y * res..(y + 1) * res].copy_from_slice(bytemuck::cast_slice(row));
        }
        drop(data);
        self.readback_buf.unmap();

        Ok(out)
    }

    /// Exchange read/write roles. Must only be called after the publish for
    /// the completed pass was encoded and waited on.
    pub fn swap(&mut self) {
        debug_assert!(
            self.publish_encoded,
            "swap() before publish() for the same pass"
        );
        self.write_index = 1 - self.write_index;
        self.publish_encoded = false;
    }
}

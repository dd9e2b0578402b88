//! Pass execution backends.
//!
//! The scheduler drives an abstract `PassExecutor`: one backend renders
//! passes on the GPU, the other evaluates the identical algorithm on the CPU.
//! The CPU backend exists so the engine's determinism and convergence
//! properties are testable on machines without an adapter, and mirrors the
//! GPU backend pass for pass.

use std::sync::Arc;
use std::time::Duration;

use wgpu::util::DeviceExt;

use crate::accel::{CpuBvh, GeometryAccel};
use crate::accum::AccumulationBuffers;
use crate::error::{BakeError, BakeResult};
use crate::gpu::GpuContext;
use crate::pass::LightmapPass;
use crate::publish::SnapshotSlot;
use crate::sampler::{generate_seeds, SeedField};
use crate::trace::{self, TexelSurface};

/// Bounded wait applied to every per-pass GPU completion.
pub const PASS_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// One sampling-pass backend. The scheduler calls the three operations in
/// strict order per iteration: `run_pass` (encode, submit, wait for
/// completion), `publish` (expose the completed estimate), `swap` (exchange
/// read/write roles). Retrying a pass re-invokes `run_pass` with the same
/// frame index; implementations must make that idempotent.
pub trait PassExecutor: Send {
    fn run_pass(&mut self, frame_index: u32) -> BakeResult<()>;
    fn publish(&mut self, frame_index: u32) -> BakeResult<()>;
    fn swap(&mut self);
    fn resolution(&self) -> u32;
}

// ---------- GPU backend ----------

/// Production backend: wgpu compute passes with readback publication.
pub struct GpuPassExecutor {
    ctx: Arc<GpuContext>,
    accum: AccumulationBuffers,
    pass: LightmapPass,
    slot: Arc<SnapshotSlot>,
    // Pending snapshot read back by `run_pass`, published in `publish`.
    pending: Option<Vec<f32>>,
    // Kept alive for the session; the pass holds views/bindings into them.
    _seeds: SeedField,
    _surface_buf: wgpu::Buffer,
}

impl GpuPassExecutor {
    pub fn new(
        ctx: Arc<GpuContext>,
        accel: &GeometryAccel,
        surface_table: &[TexelSurface],
        resolution: u32,
        seed: u32,
        slot: Arc<SnapshotSlot>,
    ) -> BakeResult<Self> {
        let seeds = SeedField::new(&ctx, resolution, resolution, seed)?;
        let accum = AccumulationBuffers::new(&ctx, resolution)?;

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let surface_buf = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("lm-surface-table"),
                contents: bytemuck::cast_slice(surface_table),
                usage: wgpu::BufferUsages::STORAGE,
            });
        if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(BakeError::init(format!(
                "surface table allocation failed: {e}"
            )));
        }

        let pass = LightmapPass::new(&ctx, accel, &seeds, &surface_buf, &accum)?;

        Ok(Self {
            ctx,
            accum,
            pass,
            slot,
            pending: None,
            _seeds: seeds,
            _surface_buf: surface_buf,
        })
    }
}

impl PassExecutor for GpuPassExecutor {
    fn run_pass(&mut self, frame_index: u32) -> BakeResult<()> {
        self.pending = None;

        self.ctx
            .device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.ctx
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lm-pass-encoder"),
            });
        self.pass
            .encode(&self.ctx, &mut encoder, frame_index, self.accum.write_index());
        self.accum.encode_publish(&mut encoder);
        self.ctx.queue.submit([encoder.finish()]);

        for _ in 0..2 {
            if let Some(e) = pollster::block_on(self.ctx.device.pop_error_scope()) {
                return Err(BakeError::pass(format!("pass submission failed: {e}")));
            }
        }

        // Blocking wait for completion: total ordering of passes, no
        // overlapping writes into accumulation state.
        let data = self.accum.read_snapshot(&self.ctx, PASS_WAIT_TIMEOUT)?;
        if data.iter().any(|v| !v.is_finite()) {
            return Err(BakeError::pass("pass produced non-finite texel values"));
        }
        self.pending = Some(data);
        Ok(())
    }

    fn publish(&mut self, frame_index: u32) -> BakeResult<()> {
        let data = self
            .pending
            .take()
            .ok_or_else(|| BakeError::pass("publish without a completed pass"))?;
        let res = self.accum.resolution();
        self.slot.publish(frame_index as u64 + 1, res, res, data);
        Ok(())
    }

    fn swap(&mut self) {
        self.accum.swap();
    }

    fn resolution(&self) -> u32 {
        self.accum.resolution()
    }
}

// ---------- CPU backend ----------

/// Test/reference backend: same algorithm, host memory ping-pong.
pub struct CpuPassExecutor {
    bvh: Arc<CpuBvh>,
    surface_table: Vec<TexelSurface>,
    seeds: Vec<u32>,
    front: Vec<f32>,
    back: Vec<f32>,
    slot: Arc<SnapshotSlot>,
    resolution: u32,
    pending: bool,
}

impl CpuPassExecutor {
    pub fn new(
        bvh: Arc<CpuBvh>,
        surface_table: Vec<TexelSurface>,
        resolution: u32,
        seed: u32,
        slot: Arc<SnapshotSlot>,
    ) -> BakeResult<Self> {
        let texel_count = resolution as usize * resolution as usize;
        if surface_table.len() != texel_count {
            return Err(BakeError::init(format!(
                "surface table size {} does not match resolution {}",
                surface_table.len(),
                resolution
            )));
        }
        Ok(Self {
            bvh,
            surface_table,
            seeds: generate_seeds(resolution, resolution, seed),
            front: vec![0.0; texel_count],
            back: vec![0.0; texel_count],
            slot,
            resolution,
            pending: false,
        })
    }

    /// The stable estimate after the last swapped pass.
    pub fn read_target(&self) -> &[f32] {
        &self.front
    }
}

impl PassExecutor for CpuPassExecutor {
    fn run_pass(&mut self, frame_index: u32) -> BakeResult<()> {
        // front is the read target, back the write target.
        trace::evaluate_pass(
            &self.bvh,
            &self.surface_table,
            &self.seeds,
            &self.front,
            &mut self.back,
            frame_index,
        );
        self.pending = true;
        Ok(())
    }

    fn publish(&mut self, frame_index: u32) -> BakeResult<()> {
        if !self.pending {
            return Err(BakeError::pass("publish without a completed pass"));
        }
        self.slot.publish(
            frame_index as u64 + 1,
            self.resolution,
            self.resolution,
            self.back.clone(),
        );
        Ok(())
    }

    fn swap(&mut self) {
        debug_assert!(self.pending, "swap() before publish() for the same pass");
        std::mem::swap(&mut self.front, &mut self.back);
        self.pending = false;
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }
}

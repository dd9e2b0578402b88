//! lumabake: asynchronous progressive lightmap baking.
//!
//! A background thread refines a lightmap by Monte Carlo integration, one
//! stochastic sampling pass at a time, against a static triangle scene. Each
//! pass traces one cosine-weighted hemisphere ray per texel through a BVH and
//! folds the result into a running mean, so the estimate sharpens with every
//! pass while consumers on other threads read complete, versioned snapshots
//! at any time.
//!
//! Quick start:
//!
//! ```no_run
//! use lumabake::{BakeConfig, GpuContext, IndexData, LightmapBaker, MeshCpu, Vertex};
//!
//! # fn main() -> lumabake::BakeResult<()> {
//! let ctx = GpuContext::new()?;
//! let mesh = MeshCpu::new(
//!     vec![
//!         Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
//!         Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
//!         Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
//!     ],
//!     IndexData::U16(vec![0, 1, 2]),
//! )?;
//!
//! let mut baker = LightmapBaker::new(ctx, mesh, BakeConfig::default())?;
//! baker.start()?;
//! // ... render frames using baker.snapshot() ...
//! baker.stop();
//! # Ok(())
//! # }
//! ```

pub mod accel;
pub mod accum;
pub mod error;
pub mod executor;
pub mod gpu;
pub mod mesh;
pub mod pass;
pub mod publish;
pub mod sampler;
pub mod scheduler;
pub mod trace;

pub use accel::{BuildOptions, GeometryAccel};
pub use error::{BakeError, BakeResult};
pub use executor::{CpuPassExecutor, GpuPassExecutor, PassExecutor};
pub use gpu::GpuContext;
pub use mesh::{IndexData, MeshCpu, Vertex};
pub use publish::{LightmapSnapshot, SnapshotSlot};
pub use scheduler::{BakeScheduler, SchedulerConfig, SchedulerState};

use std::sync::Arc;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct BakeConfig {
    /// Square lightmap resolution in texels.
    pub resolution: u32,
    /// Session seed for the per-texel random streams. Same seed, same mesh,
    /// same resolution: bit-identical pass sequence.
    pub seed: u32,
    /// Scheduler retry policy.
    pub scheduler: SchedulerConfig,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            resolution: 1024,
            seed: 1,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// One baking session over a fixed mesh: owns the acceleration structure,
/// the publication slot, and the background scheduler.
///
/// The mesh is immutable for the session lifetime. The lightmap resolution
/// may change via [`LightmapBaker::resize`], which restarts accumulation
/// from pass zero.
pub struct LightmapBaker {
    ctx: Arc<GpuContext>,
    mesh: MeshCpu,
    accel: Arc<GeometryAccel>,
    slot: Arc<SnapshotSlot>,
    config: BakeConfig,
    scheduler: Option<BakeScheduler>,
}

impl LightmapBaker {
    /// Build the session resources. Synchronous; fails with
    /// `BakeError::Init` if validation or allocation fails.
    pub fn new(ctx: Arc<GpuContext>, mesh: MeshCpu, config: BakeConfig) -> BakeResult<Self> {
        if config.resolution == 0 {
            return Err(BakeError::init("lightmap resolution must be positive"));
        }
        let accel = GeometryAccel::build(&ctx, &mesh, &BuildOptions::default())?;
        let slot = Arc::new(SnapshotSlot::new(config.resolution, config.resolution));

        Ok(Self {
            ctx,
            mesh,
            accel,
            slot,
            config,
            scheduler: None,
        })
    }

    fn build_executor(
        &self,
        resolution: u32,
        slot: Arc<SnapshotSlot>,
    ) -> BakeResult<GpuPassExecutor> {
        let table = trace::build_surface_table(&self.mesh, resolution, resolution);
        GpuPassExecutor::new(
            self.ctx.clone(),
            &self.accel,
            &table,
            resolution,
            self.config.seed,
            slot,
        )
    }

    /// Start the background baking loop. Returns an error if it is already
    /// running or if per-resolution resources cannot be allocated.
    ///
    /// Each start opens a new accumulation run: publication restarts at
    /// version 0, so versions are only comparable within one run and never
    /// regress against snapshots of the run they belong to.
    pub fn start(&mut self) -> BakeResult<()> {
        if self.scheduler.as_ref().is_some_and(|s| s.is_running()) {
            return Err(BakeError::init("baking loop is already running"));
        }
        // The new run publishes into a fresh slot, swapped in only once the
        // loop is live. A failed start leaves the previous snapshot intact.
        let slot = Arc::new(SnapshotSlot::new(
            self.config.resolution,
            self.config.resolution,
        ));
        let executor = self.build_executor(self.config.resolution, slot.clone())?;
        let scheduler =
            BakeScheduler::spawn(Box::new(executor), self.config.scheduler.clone())?;
        self.slot = slot;
        self.scheduler = Some(scheduler);
        Ok(())
    }

    /// Signal stop and wait for the in-flight pass to finish. The last
    /// published snapshot stays readable. Idempotent.
    pub fn stop(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.stop();
        }
    }

    /// Change the lightmap resolution. All accumulation restarts from pass
    /// zero with a fresh seed field.
    ///
    /// Reallocation happens before anything is torn down; if it fails the
    /// error is `BakeError::Resize` and the session keeps its previous
    /// resolution, snapshot, and running state. A no-op when the resolution
    /// is unchanged.
    pub fn resize(&mut self, resolution: u32) -> BakeResult<()> {
        if resolution == self.config.resolution {
            return Ok(());
        }
        if resolution == 0 {
            return Err(BakeError::resize("lightmap resolution must be positive"));
        }

        let was_running = self
            .scheduler
            .as_ref()
            .is_some_and(|s| s.is_running());

        // Build, and if the session was running spawn, against a fresh slot
        // before touching any session state. Until the swap below consumers
        // keep reading the old slot and the old loop keeps publishing into
        // it, so a failure on either step leaves resolution, snapshot, and
        // running state exactly as they were.
        let slot = Arc::new(SnapshotSlot::new(resolution, resolution));
        let executor = self
            .build_executor(resolution, slot.clone())
            .map_err(|e| BakeError::resize(e.to_string()))?;
        let scheduler = if was_running {
            Some(
                BakeScheduler::spawn(Box::new(executor), self.config.scheduler.clone())
                    .map_err(|e| BakeError::resize(e.to_string()))?,
            )
        } else {
            None
        };

        self.stop();
        self.config.resolution = resolution;
        self.slot = slot;
        self.scheduler = scheduler;
        log::info!("lightmap resized to {resolution}x{resolution}, accumulation reset");
        Ok(())
    }

    /// Latest published snapshot. Never blocks on GPU work; before the first
    /// completed pass this is the zero-filled version-0 snapshot.
    pub fn snapshot(&self) -> LightmapSnapshot {
        self.slot.current()
    }

    /// The two most recent snapshots (latest first) for convergence
    /// diagnostics.
    pub fn snapshot_pair(&self) -> (LightmapSnapshot, Option<LightmapSnapshot>) {
        self.slot.snapshot_pair()
    }

    pub fn passes_completed(&self) -> u64 {
        self.scheduler
            .as_ref()
            .map_or(0, |s| s.passes_completed())
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler
            .as_ref()
            .map_or(SchedulerState::Idle, |s| s.state())
    }

    pub fn resolution(&self) -> u32 {
        self.config.resolution
    }

    pub fn mesh(&self) -> &MeshCpu {
        &self.mesh
    }
}

//! Geometry acceleration structure.
//!
//! A static spatial index over the scene triangles, built once per session:
//! the CPU constructs a median-split BVH and uploads the flattened nodes,
//! reordered triangle indices, and expanded triangles as immutable storage
//! buffers. Ray queries traverse it from the sampling kernel; there is no
//! rebuild operation — changed geometry requires a fresh session.

pub mod build;
pub mod types;

pub use build::{build_bvh, CpuBvh};
pub use types::{Aabb, BuildOptions, BuildStats, BvhNode, GpuTriangle, LEAF_FLAG};

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::error::{BakeError, BakeResult};
use crate::gpu::GpuContext;
use crate::mesh::MeshCpu;

/// Opaque handle to the built acceleration structure: the CPU BVH plus its
/// GPU-resident buffers. Immutable for the session lifetime.
pub struct GeometryAccel {
    cpu: CpuBvh,
    nodes_buf: wgpu::Buffer,
    tri_index_buf: wgpu::Buffer,
    triangles_buf: wgpu::Buffer,
}

impl GeometryAccel {
    /// Build the acceleration structure for `mesh`. Synchronous: returns only
    /// once the structure is fully resident. Allocation or validation
    /// failures surface as `BakeError::Init`.
    pub fn build(ctx: &GpuContext, mesh: &MeshCpu, options: &BuildOptions) -> BakeResult<Arc<Self>> {
        let triangles: Vec<GpuTriangle> = mesh
            .triangle_positions()
            .into_iter()
            .map(|(v0, v1, v2)| GpuTriangle::new(v0, v1, v2))
            .collect();

        let cpu = build_bvh(triangles, options)?;

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let nodes_buf = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("accel-bvh-nodes"),
                contents: bytemuck::cast_slice(&cpu.nodes),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let tri_index_buf = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("accel-tri-indices"),
                contents: bytemuck::cast_slice(&cpu.tri_indices),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let triangles_buf = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("accel-triangles"),
                contents: bytemuck::cast_slice(&cpu.triangles),
                usage: wgpu::BufferUsages::STORAGE,
            });

        for scope in ["validation", "out-of-memory"] {
            if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
                return Err(BakeError::init(format!(
                    "acceleration structure upload failed ({scope}): {e}"
                )));
            }
        }

        log::info!(
            "acceleration structure resident: {} triangles, {} nodes, {} bytes",
            cpu.triangle_count(),
            cpu.node_count(),
            cpu.build_stats.memory_usage_bytes
        );

        Ok(Arc::new(Self {
            cpu,
            nodes_buf,
            tri_index_buf,
            triangles_buf,
        }))
    }

    pub fn cpu(&self) -> &CpuBvh {
        &self.cpu
    }

    pub fn triangle_count(&self) -> u32 {
        self.cpu.triangle_count()
    }

    pub fn root_index(&self) -> u32 {
        self.cpu.root_index()
    }

    pub fn nodes_buffer(&self) -> &wgpu::Buffer {
        &self.nodes_buf
    }

    pub fn tri_index_buffer(&self) -> &wgpu::Buffer {
        &self.tri_index_buf
    }

    pub fn triangles_buffer(&self) -> &wgpu::Buffer {
        &self.triangles_buf
    }
}

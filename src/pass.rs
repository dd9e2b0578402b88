//! GPU sampling pass.
//!
//! One compute dispatch per pass, one thread per texel: trace a seeded
//! hemisphere ray against the BVH and blend the result into the previous
//! estimate. The WGSL kernel mirrors `trace.rs` exactly.

use bytemuck::{Pod, Zeroable};

use crate::accel::GeometryAccel;
use crate::accum::{AccumulationBuffers, ACCUM_FORMAT};
use crate::error::{BakeError, BakeResult};
use crate::gpu::GpuContext;
use crate::sampler::SeedField;

const WORKGROUP_SIZE: u32 = 8;

/// Per-pass uniforms, layout shared with the WGSL kernel.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct PassUniforms {
    pub width: u32,
    pub height: u32,
    pub frame_index: u32,
    pub bvh_root: u32,
}

/// Compute pipeline plus bind groups for one bake session. Bind groups for
/// both ping-pong orientations are prebuilt; `encode` selects by the current
/// write index.
pub struct LightmapPass {
    pipeline: wgpu::ComputePipeline,
    uniform_buf: wgpu::Buffer,
    bg_uniforms: wgpu::BindGroup,
    bg_scene: wgpu::BindGroup,
    bg_sampling: wgpu::BindGroup,
    bg_targets: [wgpu::BindGroup; 2],
    resolution: u32,
    bvh_root: u32,
}

impl LightmapPass {
    pub fn new(
        ctx: &GpuContext,
        accel: &GeometryAccel,
        seeds: &SeedField,
        surface_buf: &wgpu::Buffer,
        accum: &AccumulationBuffers,
    ) -> BakeResult<Self> {
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("lightmap-pass"),
                source: wgpu::ShaderSource::Wgsl(
                    include_str!("shaders/lightmap_pass.wgsl").into(),
                ),
            });

        let storage_ro = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bgl_uniforms = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("lm-bgl0-uniforms"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });
        let bgl_scene = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("lm-bgl1-scene"),
                entries: &[storage_ro(0), storage_ro(1), storage_ro(2)],
            });
        let bgl_sampling = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("lm-bgl2-sampling"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Uint,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    storage_ro(1),
                ],
            });
        let bgl_targets = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("lm-bgl3-targets"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: ACCUM_FORMAT,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("lm-pipeline-layout"),
                bind_group_layouts: &[&bgl_uniforms, &bgl_scene, &bgl_sampling, &bgl_targets],
                push_constant_ranges: &[],
            });
        let pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("lm-pass"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "main",
            });

        let uniform_buf = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lm-uniforms"),
            size: std::mem::size_of::<PassUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bg_uniforms = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lm-bg0"),
            layout: &bgl_uniforms,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buf.as_entire_binding(),
            }],
        });
        let bg_scene = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lm-bg1"),
            layout: &bgl_scene,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: accel.nodes_buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: accel.tri_index_buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: accel.triangles_buffer().as_entire_binding(),
                },
            ],
        });
        let bg_sampling = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lm-bg2"),
            layout: &bgl_sampling,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(seeds.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: surface_buf.as_entire_binding(),
                },
            ],
        });

        // One target bind group per ping-pong orientation: when texture i is
        // the write target, texture 1-i is read.
        let make_targets = |write_index: usize, label: &str| {
            let (read_view, write_view) = if write_index == 0 {
                (accum_view(accum, 1), accum_view(accum, 0))
            } else {
                (accum_view(accum, 0), accum_view(accum, 1))
            };
            ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bgl_targets,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(read_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(write_view),
                    },
                ],
            })
        };
        let bg_targets = [
            make_targets(0, "lm-bg3-write0"),
            make_targets(1, "lm-bg3-write1"),
        ];

        if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(BakeError::init(format!("pass pipeline creation failed: {e}")));
        }

        Ok(Self {
            pipeline,
            uniform_buf,
            bg_uniforms,
            bg_scene,
            bg_sampling,
            bg_targets,
            resolution: accum.resolution(),
            bvh_root: accel.root_index(),
        })
    }

    /// Encode one sampling pass for `frame_index`, writing into the target
    /// selected by `write_index`.
    pub fn encode(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        frame_index: u32,
        write_index: usize,
    ) {
        let uniforms = PassUniforms {
            width: self.resolution,
            height: self.resolution,
            frame_index,
            bvh_root: self.bvh_root,
        };
        ctx.queue
            .write_buffer(&self.uniform_buf, 0, bytemuck::bytes_of(&uniforms));

        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("lm-pass"),
            ..Default::default()
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, &self.bg_uniforms, &[]);
        cpass.set_bind_group(1, &self.bg_scene, &[]);
        cpass.set_bind_group(2, &self.bg_sampling, &[]);
        cpass.set_bind_group(3, &self.bg_targets[write_index], &[]);
        let groups = (self.resolution + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
        cpass.dispatch_workgroups(groups, groups, 1);
    }
}

fn accum_view(accum: &AccumulationBuffers, index: usize) -> &wgpu::TextureView {
    if index == accum.write_index() {
        accum.write_view()
    } else {
        accum.read_view()
    }
}

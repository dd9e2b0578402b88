//! Explicit GPU execution context.
//!
//! Every component takes a `GpuContext` rather than reaching for ambient
//! device/queue state, so a session owns its resources end to end and tests
//! can decide whether a device exists at all.

use std::sync::Arc;

use crate::error::{BakeError, BakeResult};

/// Device, queue, and adapter info bundled for explicit hand-off.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Create a headless context on the best available adapter.
    ///
    /// Returns `BakeError::Init` when no adapter is present or device
    /// creation fails, so callers can surface a clean initialization error
    /// instead of panicking.
    pub fn new() -> BakeResult<Arc<Self>> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| BakeError::init("no suitable GPU adapter"))?;

        let adapter_info = adapter.get_info();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                label: Some("lumabake-device"),
            },
            None,
        ))
        .map_err(|e| BakeError::init(format!("request_device failed: {e}")))?;

        log::info!(
            "GPU context ready: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        Ok(Arc::new(Self {
            device,
            queue,
            adapter_info,
        }))
    }

    /// Like [`GpuContext::new`] but returns `None` when no adapter exists.
    /// Used by tests that skip gracefully on GPU-less machines.
    pub fn try_new() -> Option<Arc<Self>> {
        Self::new().ok()
    }
}

/// Align to WebGPU's required bytes-per-row for texture copies.
#[inline]
pub fn align_copy_bpr(unpadded: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    ((unpadded + a - 1) / a) * a
}

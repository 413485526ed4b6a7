//! [`GpuDriver`] implementation on top of `wgpu`.
//!
//! The render context owns the presentation surface; the load context shares
//! the same device and object namespace but has no surface. Card passes are
//! recorded as draws are issued and replayed into a single render pass when
//! the card target is closed.

mod context;
mod namespace;
mod pipeline;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use tracing::{debug, info, warn};
use winit::dpi::PhysicalSize;

use crate::error::DriverError;
use crate::gpu::driver::{
    parse_version, BoxedContext, ContextId, ContextRole, GpuCapabilities, GpuDriver,
};

use context::{DeviceShared, SurfaceSlot, SurfaceState, WgpuContext};
use namespace::Namespace;
use pipeline::{CardPipeline, CompositePipeline};

/// Adapter names that identify CPU rasterisers.
const SOFTWARE_ADAPTERS: [&str; 4] = ["llvmpipe", "lavapipe", "swiftshader", "softpipe"];

#[derive(Clone, Copy, Debug)]
pub struct WgpuOptions {
    pub power_preference: wgpu::PowerPreference,
    /// Frames the presentation engine may queue; clamped to 1..=3.
    pub frame_latency: u32,
}

impl Default for WgpuOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::LowPower,
            frame_latency: 2,
        }
    }
}

pub struct WgpuDriver {
    instance: wgpu::Instance,
    surface: SurfaceSlot,
    options: WgpuOptions,
    device: Option<(ContextId, GpuCapabilities, Arc<DeviceShared>)>,
    next_id: u32,
}

impl WgpuDriver {
    /// Creates the instance and the presentation surface for `target`.
    ///
    /// Adapter and device selection are deferred until the render context is
    /// requested.
    pub fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        options: WgpuOptions,
    ) -> Result<Self, DriverError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });
        let surface = instance
            .create_surface(target)
            .context("failed to create rendering surface")?;
        Ok(Self {
            instance,
            surface: Arc::new(Mutex::new(Some(surface))),
            options,
            device: None,
            next_id: 1,
        })
    }

    fn allocate(&mut self) -> ContextId {
        let id = ContextId(self.next_id);
        self.next_id += 1;
        id
    }
}

fn capabilities(adapter: &wgpu::Adapter) -> GpuCapabilities {
    let info = adapter.get_info();
    let name = info.name.to_lowercase();
    let is_software = info.device_type == wgpu::DeviceType::Cpu
        || SOFTWARE_ADAPTERS.iter().any(|known| name.contains(known));
    GpuCapabilities {
        adapter_name: info.name.clone(),
        backend: format!("{:?}", info.backend),
        api_version: parse_version(&info.driver_info),
        extensions: flag_names(&format!("{:?}", adapter.features())),
        max_texture_dimension: adapter.limits().max_texture_dimension_2d,
        video_memory: None,
        is_software,
    }
}

/// Pulls `SCREAMING_CASE` flag names out of a bitflags debug listing.
fn flag_names(rendered: &str) -> Vec<String> {
    let mut names: Vec<String> = rendered
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| {
            token.len() > 1
                && token.contains('_')
                && token
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        })
        .map(str::to_owned)
        .collect();
    names.sort();
    names.dedup();
    names
}

impl GpuDriver for WgpuDriver {
    fn create_render_context(
        &mut self,
        surface_size: PhysicalSize<u32>,
    ) -> Result<BoxedContext, DriverError> {
        let slot = Arc::clone(&self.surface);
        let mut parked = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let surface = parked.as_ref().ok_or_else(|| {
            DriverError::Resource("the presentation surface is already owned by a context".into())
        })?;

        let adapter = pollster::block_on(self.instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: self.options.power_preference,
                compatible_surface: Some(surface),
                force_fallback_adapter: false,
            },
        ))
        .context("failed to find a suitable GPU adapter")?;
        let capabilities = capabilities(&adapter);
        debug!(
            name = %capabilities.adapter_name,
            backend = %capabilities.backend,
            is_software = capabilities.is_software,
            "selected GPU adapter"
        );

        let max = capabilities.max_texture_dimension;
        let width = surface_size.width.max(1);
        let height = surface_size.height.max(1);
        if width > max || height > max {
            return Err(DriverError::Resource(format!(
                "GPU max texture dimension is {max}, requested surface is {width}x{height}"
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("worldview device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let caps = surface.get_capabilities(&adapter);
        let Some(&first_format) = caps.formats.first() else {
            return Err(DriverError::Unsupported);
        };
        // The composite shader encodes the transfer function itself.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .unwrap_or_else(|| {
                warn!(
                    fallback = ?first_format,
                    "no non-sRGB surface format available; output will be double encoded"
                );
                first_format
            });
        let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            caps.present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        };
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let frame_latency = self.options.frame_latency.clamp(1, 3);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: frame_latency,
        };
        surface.configure(&device, &config);
        debug!(?format, ?present_mode, width, height, "configured surface");

        let card = CardPipeline::new(&device);
        let namespace = Namespace::new(&device, &queue, &card);
        let composite = CompositePipeline::new(&device, format);
        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("composite uniforms"),
            size: std::mem::size_of::<crate::gpu::uniforms::CompositeUniforms>()
                as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let shared = Arc::new(DeviceShared {
            device,
            queue,
            card,
            namespace: Mutex::new(namespace),
        });

        let Some(surface) = parked.take() else {
            return Err(DriverError::Unsupported);
        };
        let id = self.allocate();
        self.device = Some((id, capabilities.clone(), Arc::clone(&shared)));
        info!(%id, adapter = %capabilities.adapter_name, "created render context");
        Ok(Box::new(WgpuContext::new(
            id,
            ContextRole::Render,
            capabilities,
            shared,
            Some(SurfaceState {
                surface,
                slot: Arc::clone(&slot),
                config,
                composite,
                uniforms,
            }),
        )))
    }

    fn create_load_context(&mut self, share_with: ContextId) -> Result<BoxedContext, DriverError> {
        let (capabilities, shared) = match &self.device {
            Some((render, capabilities, shared)) if *render == share_with => {
                (capabilities.clone(), Arc::clone(shared))
            }
            _ => {
                return Err(DriverError::Resource(format!(
                    "{share_with} is not a live render context"
                )))
            }
        };
        let id = self.allocate();
        debug!(%id, %share_with, "created load context");
        Ok(Box::new(WgpuContext::new(
            id,
            ContextRole::Load,
            capabilities,
            shared,
            None,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_names_skip_wrapper_identifiers() {
        let rendered = "Features { features_wgpu: FeaturesWGPU(TEXTURE_BINDING_ARRAY | SHADER_F64), \
                        features_webgpu: FeaturesWebGPU(DEPTH_CLIP_CONTROL) }";
        assert_eq!(
            flag_names(rendered),
            vec!["DEPTH_CLIP_CONTROL", "SHADER_F64", "TEXTURE_BINDING_ARRAY"]
        );
        assert!(flag_names("Features { features_wgpu: FeaturesWGPU(0x0) }").is_empty());
    }
}

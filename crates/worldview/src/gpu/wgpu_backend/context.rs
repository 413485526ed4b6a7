use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};
use winit::dpi::PhysicalSize;

use crate::error::DriverError;
use crate::gpu::driver::{
    CardVertex, ContextId, ContextRole, DrawCall, GpuCapabilities, GpuContext, ImageView,
    TargetId, TextureId, VertexArrayId,
};
use crate::gpu::uniforms::CompositeUniforms;
use crate::types::{CardSize, Rgba};

use super::namespace::Namespace;
use super::pipeline::{CardPipeline, CompositePipeline};

/// Device state shared by the render and load contexts.
pub(crate) struct DeviceShared {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub card: CardPipeline,
    pub namespace: Mutex<Namespace>,
}

impl DeviceShared {
    pub fn namespace(&self) -> MutexGuard<'_, Namespace> {
        self.namespace.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where the presentation surface waits while no render context owns it.
pub(crate) type SurfaceSlot = Arc<Mutex<Option<wgpu::Surface<'static>>>>;

pub(crate) struct SurfaceState {
    pub surface: wgpu::Surface<'static>,
    /// Receives `surface` back when the context is released.
    pub slot: SurfaceSlot,
    pub config: wgpu::SurfaceConfiguration,
    pub composite: CompositePipeline,
    pub uniforms: wgpu::Buffer,
}

struct RecordedDraw {
    vertex_array: VertexArrayId,
    texture: Option<TextureId>,
    vertices: Range<u32>,
}

struct CardPass {
    target: TargetId,
    clear: Rgba,
    draws: Vec<RecordedDraw>,
}

pub(crate) struct WgpuContext {
    id: ContextId,
    role: ContextRole,
    capabilities: GpuCapabilities,
    shared: Option<Arc<DeviceShared>>,
    surface: Option<SurfaceState>,
    bound: Option<VertexArrayId>,
    pass: Option<CardPass>,
    frame: Option<wgpu::SurfaceTexture>,
}

impl WgpuContext {
    pub fn new(
        id: ContextId,
        role: ContextRole,
        capabilities: GpuCapabilities,
        shared: Arc<DeviceShared>,
        surface: Option<SurfaceState>,
    ) -> Self {
        Self {
            id,
            role,
            capabilities,
            shared: Some(shared),
            surface,
            bound: None,
            pass: None,
            frame: None,
        }
    }

    fn shared(&self) -> Result<&Arc<DeviceShared>, DriverError> {
        self.shared.as_ref().ok_or(DriverError::ContextLost)
    }

    fn surface(&self) -> Result<&SurfaceState, DriverError> {
        self.shared()?;
        self.surface.as_ref().ok_or(DriverError::Unsupported)
    }

    fn encode_card_pass(&self, pass: CardPass) -> Result<(), DriverError> {
        let shared = self.shared()?;
        let namespace = shared.namespace();
        let target = namespace
            .target(pass.target)
            .ok_or_else(|| DriverError::Resource(format!("unknown {}", pass.target)))?;

        let mut encoder = shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("card encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("card pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(pass.clear.r),
                            g: f64::from(pass.clear.g),
                            b: f64::from(pass.clear.b),
                            a: f64::from(pass.clear.a),
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(&shared.card.pipeline);
            render_pass.set_bind_group(0, &target.size_bind_group, &[]);

            for draw in &pass.draws {
                let Some(vertices) = namespace.vertex_array(draw.vertex_array) else {
                    warn!(id = %draw.vertex_array, "skipping draw with deleted vertex array");
                    continue;
                };
                let Some(texture) = namespace.texture_bind_group(draw.texture) else {
                    warn!(texture = ?draw.texture, "skipping draw with deleted texture");
                    continue;
                };
                let end = draw.vertices.end.min(vertices.vertices);
                if draw.vertices.start >= end {
                    continue;
                }
                render_pass.set_bind_group(1, texture, &[]);
                render_pass.set_vertex_buffer(0, vertices.buffer.slice(..));
                render_pass.draw(draw.vertices.start..end, 0..1);
            }
        }
        shared.queue.submit(std::iter::once(encoder.finish()));
        trace!(draws = pass.draws.len(), "card pass submitted");
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<wgpu::SurfaceTexture, DriverError> {
        let shared = self.shared()?.clone();
        let surface = self.surface.as_ref().ok_or(DriverError::Unsupported)?;
        match surface.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated; reconfiguring");
                surface.surface.configure(&shared.device, &surface.config);
                Err(DriverError::SurfaceLost)
            }
            Err(wgpu::SurfaceError::OutOfMemory) => Err(DriverError::OutOfMemory),
            Err(err) => {
                trace!(?err, "surface frame unavailable");
                Err(DriverError::SkipFrame)
            }
        }
    }
}

impl GpuContext for WgpuContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn role(&self) -> ContextRole {
        self.role
    }

    fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    fn is_released(&self) -> bool {
        self.shared.is_none()
    }

    fn create_vertex_array(
        &mut self,
        vertices: &[CardVertex],
    ) -> Result<VertexArrayId, DriverError> {
        let shared = self.shared()?;
        Ok(shared
            .namespace()
            .create_vertex_array(&shared.device, vertices))
    }

    fn delete_vertex_array(&mut self, id: VertexArrayId) -> Result<(), DriverError> {
        if self.shared()?.namespace().remove_vertex_array(id) {
            Ok(())
        } else {
            Err(DriverError::Resource(format!("unknown {id}")))
        }
    }

    fn upload_texture(&mut self, image: ImageView<'_>) -> Result<TextureId, DriverError> {
        let shared = self.shared()?;
        let max = self.capabilities.max_texture_dimension;
        if image.width > max || image.height > max {
            return Err(DriverError::Resource(format!(
                "{}x{} texture exceeds the {max}px limit",
                image.width, image.height
            )));
        }
        Ok(shared
            .namespace()
            .upload_texture(&shared.device, &shared.queue, &shared.card, image))
    }

    fn delete_texture(&mut self, id: TextureId) -> Result<(), DriverError> {
        if self.shared()?.namespace().remove_texture(id) {
            Ok(())
        } else {
            Err(DriverError::Resource(format!("unknown {id}")))
        }
    }

    fn create_offscreen_target(&mut self, size: CardSize) -> Result<TargetId, DriverError> {
        self.surface()?;
        let shared = self.shared()?;
        Ok(shared
            .namespace()
            .create_target(&shared.device, &shared.card, size))
    }

    fn delete_offscreen_target(&mut self, id: TargetId) -> Result<(), DriverError> {
        self.surface()?;
        self.shared()?.namespace().remove_target(id);
        Ok(())
    }

    fn bind_vertex_array(&mut self, id: Option<VertexArrayId>) -> Result<(), DriverError> {
        self.surface()?;
        self.bound = id;
        Ok(())
    }

    fn begin_offscreen(&mut self, target: TargetId, clear: Rgba) -> Result<(), DriverError> {
        self.surface()?;
        self.pass = Some(CardPass {
            target,
            clear,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), DriverError> {
        self.surface()?;
        let vertex_array = self.bound.ok_or_else(|| {
            DriverError::Resource("draw issued with no vertex array bound".into())
        })?;
        let pass = self
            .pass
            .as_mut()
            .ok_or_else(|| DriverError::Resource("draw outside of the card pass".into()))?;
        pass.draws.push(RecordedDraw {
            vertex_array,
            texture: call.texture,
            vertices: call.vertices.clone(),
        });
        Ok(())
    }

    fn end_offscreen(&mut self) -> Result<(), DriverError> {
        self.surface()?;
        match self.pass.take() {
            Some(pass) => self.encode_card_pass(pass),
            None => Err(DriverError::Resource("no card pass is open".into())),
        }
    }

    fn composite(
        &mut self,
        source: TargetId,
        uniforms: &CompositeUniforms,
    ) -> Result<(), DriverError> {
        self.surface()?;
        // A frame acquired but never presented is dropped here.
        self.frame = None;
        let frame = self.acquire_frame()?;
        // The composite pass binds its own pipeline and buffers.
        self.bound = None;

        let shared = self.shared()?;
        let surface = self.surface()?;
        let namespace = shared.namespace();
        let target = namespace
            .target(source)
            .ok_or_else(|| DriverError::Resource(format!("unknown {source}")))?;

        shared
            .queue
            .write_buffer(&surface.uniforms, 0, bytemuck::bytes_of(uniforms));
        let bind_group = shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite bind group"),
            layout: &surface.composite.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: surface.uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&target.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&surface.composite.sampler),
                },
            ],
        });

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("composite encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(&surface.composite.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        shared.queue.submit(std::iter::once(encoder.finish()));
        drop(namespace);
        self.frame = Some(frame);
        Ok(())
    }

    fn present(&mut self) -> Result<(), DriverError> {
        self.surface()?;
        let frame = self.frame.take().ok_or(DriverError::SkipFrame)?;
        frame.present();
        Ok(())
    }

    fn resize_surface(&mut self, size: PhysicalSize<u32>) -> Result<(), DriverError> {
        let shared = self.shared()?.clone();
        let surface = self.surface.as_mut().ok_or(DriverError::Unsupported)?;
        let max = self.capabilities.max_texture_dimension;
        if size.width > max || size.height > max {
            return Err(DriverError::Resource(format!(
                "{}x{} surface exceeds the {max}px limit",
                size.width, size.height
            )));
        }
        self.frame = None;
        surface.config.width = size.width.max(1);
        surface.config.height = size.height.max(1);
        surface.surface.configure(&shared.device, &surface.config);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        self.shared()?.queue.submit(std::iter::empty());
        Ok(())
    }

    fn release(&mut self) {
        if self.shared.is_none() {
            return;
        }
        self.pass = None;
        self.frame = None;
        if let Some(state) = self.surface.take() {
            let mut slot = state.slot.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(state.surface);
        }
        self.shared = None;
        debug!(id = %self.id, role = ?self.role, "released GPU context");
    }
}

//! Headless backend that records every GPU call instead of executing it.
//!
//! Useful for running the compositor without a display and for asserting on
//! exactly which calls a frame issued. Clones of a [`RecordingDriver`] share
//! one [`GpuLog`] and one set of injected faults, so a test can keep a clone
//! after handing the driver to the compositor.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use winit::dpi::PhysicalSize;

use crate::error::DriverError;
use crate::gpu::driver::{
    BoxedContext, CardVertex, ContextId, ContextRole, DrawCall, GpuCapabilities, GpuContext,
    GpuDriver, ImageView, TargetId, TextureId, VertexArrayId,
};
use crate::gpu::uniforms::CompositeUniforms;
use crate::types::{CardSize, Rgba};

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateContext {
        context: ContextId,
        role: ContextRole,
    },
    ReleaseContext {
        context: ContextId,
        role: ContextRole,
    },
    CreateVertexArray {
        context: ContextId,
        id: VertexArrayId,
        vertices: usize,
    },
    DeleteVertexArray {
        context: ContextId,
        id: VertexArrayId,
    },
    UploadTexture {
        context: ContextId,
        id: TextureId,
        width: u32,
        height: u32,
    },
    DeleteTexture {
        context: ContextId,
        id: TextureId,
    },
    CreateTarget {
        context: ContextId,
        id: TargetId,
        size: CardSize,
    },
    DeleteTarget {
        context: ContextId,
        id: TargetId,
    },
    BindVertexArray {
        context: ContextId,
        id: Option<VertexArrayId>,
    },
    BeginOffscreen {
        context: ContextId,
        target: TargetId,
        clear: Rgba,
    },
    Draw {
        context: ContextId,
        vertex_array: Option<VertexArrayId>,
        call: DrawCall,
    },
    EndOffscreen {
        context: ContextId,
    },
    Composite {
        context: ContextId,
        source: TargetId,
        uniforms: CompositeUniforms,
    },
    Present {
        context: ContextId,
    },
    ResizeSurface {
        context: ContextId,
        size: PhysicalSize<u32>,
    },
    Flush {
        context: ContextId,
    },
}

/// Ordered record of the calls every context issued.
#[derive(Debug, Default)]
pub struct GpuLog {
    calls: Vec<GpuCall>,
}

impl GpuLog {
    pub fn calls(&self) -> &[GpuCall] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn count(&self, predicate: impl Fn(&GpuCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    /// Uniform blocks of every composite, in frame order.
    pub fn composites(&self) -> Vec<CompositeUniforms> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                GpuCall::Composite { uniforms, .. } => Some(*uniforms),
                _ => None,
            })
            .collect()
    }

    pub fn presents(&self) -> usize {
        self.count(|call| matches!(call, GpuCall::Present { .. }))
    }

    fn push(&mut self, call: GpuCall) {
        self.calls.push(call);
    }
}

/// Failures a test can inject into the recording backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Faults {
    pub render_context: bool,
    pub load_context: bool,
    pub offscreen_target: bool,
    pub surface_resize: bool,
    /// Every composite reports a lost surface.
    pub surface_lost: bool,
}

#[derive(Default)]
struct Namespace {
    vertex_arrays: HashSet<VertexArrayId>,
    textures: HashSet<TextureId>,
    targets: HashSet<TargetId>,
}

struct Recorder {
    log: Arc<Mutex<GpuLog>>,
    faults: Arc<Mutex<Faults>>,
    namespace: Arc<Mutex<Namespace>>,
    next_id: Arc<AtomicU32>,
    surface_owner: Arc<Mutex<Option<ContextId>>>,
}

impl Recorder {
    fn record(&self, call: GpuCall) {
        lock(&self.log).push(call);
    }

    fn faults(&self) -> Faults {
        *lock(&self.faults)
    }

    fn allocate(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct RecordingDriver {
    log: Arc<Mutex<GpuLog>>,
    faults: Arc<Mutex<Faults>>,
    namespace: Arc<Mutex<Namespace>>,
    next_id: Arc<AtomicU32>,
    /// Render context currently holding the presentation surface.
    surface_owner: Arc<Mutex<Option<ContextId>>>,
    capabilities: GpuCapabilities,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(GpuLog::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
            namespace: Arc::new(Mutex::new(Namespace::default())),
            next_id: Arc::new(AtomicU32::new(1)),
            surface_owner: Arc::new(Mutex::new(None)),
            capabilities: Self::default_capabilities(),
        }
    }

    /// A capable hardware adapter with 2 GiB of video memory.
    pub fn default_capabilities() -> GpuCapabilities {
        GpuCapabilities {
            adapter_name: "Recording Adapter".into(),
            backend: "recording".into(),
            api_version: Some((4, 1)),
            extensions: Vec::new(),
            max_texture_dimension: 8192,
            video_memory: Some(2 << 30),
            is_software: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: GpuCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_faults(self, faults: Faults) -> Self {
        self.set_faults(faults);
        self
    }

    /// Replaces the injected faults; visible to contexts already created.
    pub fn set_faults(&self, faults: Faults) {
        *lock(&self.faults) = faults;
    }

    pub fn log(&self) -> MutexGuard<'_, GpuLog> {
        lock(&self.log)
    }

    pub fn calls(&self) -> Vec<GpuCall> {
        self.log().calls().to_vec()
    }

    /// Number of namespace objects that were created and never deleted.
    pub fn live_objects(&self) -> usize {
        let namespace = lock(&self.namespace);
        namespace.vertex_arrays.len() + namespace.textures.len() + namespace.targets.len()
    }

    fn recorder(&self) -> Recorder {
        Recorder {
            log: self.log.clone(),
            faults: self.faults.clone(),
            namespace: self.namespace.clone(),
            next_id: self.next_id.clone(),
            surface_owner: self.surface_owner.clone(),
        }
    }

    fn context(&self, role: ContextRole) -> RecordingContext {
        let recorder = self.recorder();
        let id = ContextId(recorder.allocate());
        recorder.record(GpuCall::CreateContext { context: id, role });
        RecordingContext {
            id,
            role,
            capabilities: self.capabilities.clone(),
            recorder,
            released: false,
            bound: None,
            offscreen: None,
            pending_present: false,
        }
    }
}

impl GpuDriver for RecordingDriver {
    fn create_render_context(
        &mut self,
        surface_size: PhysicalSize<u32>,
    ) -> Result<BoxedContext, DriverError> {
        if lock(&self.faults).render_context {
            return Err(DriverError::Resource(
                "injected render context failure".into(),
            ));
        }
        if let Some(owner) = *lock(&self.surface_owner) {
            return Err(DriverError::Resource(format!(
                "the presentation surface is already owned by {owner}"
            )));
        }
        let context = self.context(ContextRole::Render);
        *lock(&self.surface_owner) = Some(context.id);
        context.recorder.record(GpuCall::ResizeSurface {
            context: context.id,
            size: surface_size,
        });
        Ok(Box::new(context))
    }

    fn create_load_context(&mut self, _share_with: ContextId) -> Result<BoxedContext, DriverError> {
        if lock(&self.faults).load_context {
            return Err(DriverError::Resource("injected load context failure".into()));
        }
        Ok(Box::new(self.context(ContextRole::Load)))
    }
}

pub struct RecordingContext {
    id: ContextId,
    role: ContextRole,
    capabilities: GpuCapabilities,
    recorder: Recorder,
    released: bool,
    bound: Option<VertexArrayId>,
    offscreen: Option<TargetId>,
    pending_present: bool,
}

impl RecordingContext {
    fn live(&self) -> Result<(), DriverError> {
        if self.released {
            Err(DriverError::ContextLost)
        } else {
            Ok(())
        }
    }

    fn render_only(&self) -> Result<(), DriverError> {
        self.live()?;
        match self.role {
            ContextRole::Render => Ok(()),
            ContextRole::Load => Err(DriverError::Unsupported),
        }
    }
}

impl GpuContext for RecordingContext {
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
        self.released
    }

    fn create_vertex_array(
        &mut self,
        vertices: &[CardVertex],
    ) -> Result<VertexArrayId, DriverError> {
        self.live()?;
        let id = VertexArrayId(self.recorder.allocate());
        lock(&self.recorder.namespace).vertex_arrays.insert(id);
        self.recorder.record(GpuCall::CreateVertexArray {
            context: self.id,
            id,
            vertices: vertices.len(),
        });
        Ok(id)
    }

    fn delete_vertex_array(&mut self, id: VertexArrayId) -> Result<(), DriverError> {
        self.live()?;
        if !lock(&self.recorder.namespace).vertex_arrays.remove(&id) {
            return Err(DriverError::Resource(format!("unknown {id}")));
        }
        self.recorder.record(GpuCall::DeleteVertexArray {
            context: self.id,
            id,
        });
        Ok(())
    }

    fn upload_texture(&mut self, image: ImageView<'_>) -> Result<TextureId, DriverError> {
        self.live()?;
        let id = TextureId(self.recorder.allocate());
        lock(&self.recorder.namespace).textures.insert(id);
        self.recorder.record(GpuCall::UploadTexture {
            context: self.id,
            id,
            width: image.width,
            height: image.height,
        });
        Ok(id)
    }

    fn delete_texture(&mut self, id: TextureId) -> Result<(), DriverError> {
        self.live()?;
        if !lock(&self.recorder.namespace).textures.remove(&id) {
            return Err(DriverError::Resource(format!("unknown {id}")));
        }
        self.recorder.record(GpuCall::DeleteTexture {
            context: self.id,
            id,
        });
        Ok(())
    }

    fn create_offscreen_target(&mut self, size: CardSize) -> Result<TargetId, DriverError> {
        self.render_only()?;
        if self.recorder.faults().offscreen_target {
            return Err(DriverError::Resource(
                "injected offscreen target failure".into(),
            ));
        }
        let id = TargetId(self.recorder.allocate());
        lock(&self.recorder.namespace).targets.insert(id);
        self.recorder.record(GpuCall::CreateTarget {
            context: self.id,
            id,
            size,
        });
        Ok(id)
    }

    fn delete_offscreen_target(&mut self, id: TargetId) -> Result<(), DriverError> {
        self.render_only()?;
        lock(&self.recorder.namespace).targets.remove(&id);
        self.recorder.record(GpuCall::DeleteTarget {
            context: self.id,
            id,
        });
        Ok(())
    }

    fn bind_vertex_array(&mut self, id: Option<VertexArrayId>) -> Result<(), DriverError> {
        self.render_only()?;
        self.bound = id;
        self.recorder.record(GpuCall::BindVertexArray {
            context: self.id,
            id,
        });
        Ok(())
    }

    fn begin_offscreen(&mut self, target: TargetId, clear: Rgba) -> Result<(), DriverError> {
        self.render_only()?;
        self.offscreen = Some(target);
        self.recorder.record(GpuCall::BeginOffscreen {
            context: self.id,
            target,
            clear,
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), DriverError> {
        self.render_only()?;
        if self.offscreen.is_none() {
            return Err(DriverError::Resource("draw outside of the card pass".into()));
        }
        self.recorder.record(GpuCall::Draw {
            context: self.id,
            vertex_array: self.bound,
            call: call.clone(),
        });
        Ok(())
    }

    fn end_offscreen(&mut self) -> Result<(), DriverError> {
        self.render_only()?;
        self.offscreen = None;
        self.recorder.record(GpuCall::EndOffscreen { context: self.id });
        Ok(())
    }

    fn composite(
        &mut self,
        source: TargetId,
        uniforms: &CompositeUniforms,
    ) -> Result<(), DriverError> {
        self.render_only()?;
        if self.recorder.faults().surface_lost {
            return Err(DriverError::SurfaceLost);
        }
        // Compositing binds its own geometry.
        self.bound = None;
        self.pending_present = true;
        self.recorder.record(GpuCall::Composite {
            context: self.id,
            source,
            uniforms: *uniforms,
        });
        Ok(())
    }

    fn present(&mut self) -> Result<(), DriverError> {
        self.render_only()?;
        if !std::mem::take(&mut self.pending_present) {
            return Err(DriverError::SkipFrame);
        }
        self.recorder.record(GpuCall::Present { context: self.id });
        Ok(())
    }

    fn resize_surface(&mut self, size: PhysicalSize<u32>) -> Result<(), DriverError> {
        self.render_only()?;
        if self.recorder.faults().surface_resize {
            return Err(DriverError::Resource("injected surface resize failure".into()));
        }
        self.recorder.record(GpuCall::ResizeSurface {
            context: self.id,
            size,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DriverError> {
        self.live()?;
        self.recorder.record(GpuCall::Flush { context: self.id });
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        {
            let mut owner = lock(&self.recorder.surface_owner);
            if *owner == Some(self.id) {
                *owner = None;
            }
        }
        self.recorder.record(GpuCall::ReleaseContext {
            context: self.id,
            role: self.role,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_context_cannot_draw() {
        let mut driver = RecordingDriver::new();
        let render = driver
            .create_render_context(PhysicalSize::new(10, 10))
            .unwrap();
        let mut load = driver.create_load_context(render.id()).unwrap();
        assert!(matches!(
            load.draw(&DrawCall::untextured(0..3)),
            Err(DriverError::Unsupported)
        ));
    }

    #[test]
    fn objects_are_shared_between_contexts() {
        let mut driver = RecordingDriver::new();
        let mut render = driver
            .create_render_context(PhysicalSize::new(10, 10))
            .unwrap();
        let mut load = driver.create_load_context(render.id()).unwrap();
        let pixels = [255u8; 16];
        let texture = load.upload_texture(ImageView::new(2, 2, &pixels)).unwrap();
        assert_eq!(driver.live_objects(), 1);
        render.delete_texture(texture).unwrap();
        assert_eq!(driver.live_objects(), 0);
    }

    #[test]
    fn release_is_idempotent_and_blocks_further_calls() {
        let mut driver = RecordingDriver::new();
        let mut render = driver
            .create_render_context(PhysicalSize::new(10, 10))
            .unwrap();
        render.release();
        render.release();
        assert_eq!(
            driver
                .log()
                .count(|call| matches!(call, GpuCall::ReleaseContext { .. })),
            1
        );
        assert!(matches!(render.present(), Err(DriverError::ContextLost)));
    }

    #[test]
    fn surface_returns_to_the_driver_on_release() {
        let mut driver = RecordingDriver::new();
        let mut first = driver
            .create_render_context(PhysicalSize::new(10, 10))
            .unwrap();
        assert!(matches!(
            driver.create_render_context(PhysicalSize::new(10, 10)),
            Err(DriverError::Resource(_))
        ));
        first.release();
        let second = driver
            .create_render_context(PhysicalSize::new(10, 10))
            .unwrap();
        assert_ne!(second.id(), first.id());
    }

    #[test]
    fn injected_faults_apply_to_live_contexts() {
        let mut driver = RecordingDriver::new();
        let mut render = driver
            .create_render_context(PhysicalSize::new(10, 10))
            .unwrap();
        driver.set_faults(Faults {
            surface_resize: true,
            ..Faults::default()
        });
        assert!(render.resize_surface(PhysicalSize::new(20, 20)).is_err());
    }
}

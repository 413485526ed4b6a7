use tracing::{trace, warn};

use crate::error::DriverError;
use crate::gpu::driver::{ContextId, DrawCall, GpuContext, VertexArrayId};

/// Last vertex-array binding the compositor believes is current.
///
/// Lives as long as the render resources so that elision carries across
/// frames; [`StateGuard`] is the only way to mutate it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BindingCache {
    vertex_array: Option<VertexArrayId>,
}

impl BindingCache {
    pub fn vertex_array(&self) -> Option<VertexArrayId> {
        self.vertex_array
    }

    pub(crate) fn reset(&mut self) {
        self.vertex_array = None;
    }
}

/// Per-frame wrapper around the render context that skips redundant binds.
///
/// The guard borrows the context, so it can never outlive it. Code that
/// changes bindings behind the guard's back must call [`StateGuard::reset`]
/// so the next bind is issued for real.
pub struct StateGuard<'a> {
    context: &'a mut dyn GpuContext,
    cache: &'a mut BindingCache,
}

impl<'a> StateGuard<'a> {
    pub(crate) fn new(context: &'a mut dyn GpuContext, cache: &'a mut BindingCache) -> Self {
        Self { context, cache }
    }

    pub fn context_id(&self) -> ContextId {
        self.context.id()
    }

    pub fn bound_vertex_array(&self) -> Option<VertexArrayId> {
        self.cache.vertex_array
    }

    pub fn bind_vertex_array(&mut self, id: VertexArrayId) {
        if self.context.is_released() {
            return;
        }
        if self.cache.vertex_array != Some(id) {
            if let Err(err) = self.context.bind_vertex_array(Some(id)) {
                warn!(%id, ?err, "failed to bind vertex array");
            }
        } else {
            trace!(%id, "vertex array already bound");
        }
        self.cache.vertex_array = Some(id);
    }

    /// Forgets the cached binding without touching the GPU.
    pub fn reset(&mut self) {
        self.cache.reset();
    }

    pub fn draw(&mut self, call: &DrawCall) -> Result<(), DriverError> {
        if self.context.is_released() {
            return Err(DriverError::ContextLost);
        }
        self.context.draw(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::{ContextRole, GpuDriver};
    use crate::gpu::recording::{GpuCall, RecordingDriver};
    use winit::dpi::PhysicalSize;

    fn render_context(driver: &mut RecordingDriver) -> crate::gpu::driver::BoxedContext {
        driver
            .create_render_context(PhysicalSize::new(640, 480))
            .expect("render context")
    }

    fn bind_calls(driver: &RecordingDriver) -> usize {
        driver
            .calls()
            .iter()
            .filter(|call| matches!(call, GpuCall::BindVertexArray { .. }))
            .count()
    }

    #[test]
    fn repeated_binds_are_elided() {
        let mut driver = RecordingDriver::new();
        let mut context = render_context(&mut driver);
        let mut cache = BindingCache::default();
        let mut guard = StateGuard::new(context.as_mut(), &mut cache);

        guard.bind_vertex_array(VertexArrayId(7));
        guard.bind_vertex_array(VertexArrayId(7));
        assert_eq!(bind_calls(&driver), 1);

        guard.bind_vertex_array(VertexArrayId(8));
        assert_eq!(bind_calls(&driver), 2);
        assert_eq!(guard.bound_vertex_array(), Some(VertexArrayId(8)));
    }

    #[test]
    fn reset_forces_next_bind() {
        let mut driver = RecordingDriver::new();
        let mut context = render_context(&mut driver);
        let mut cache = BindingCache::default();
        {
            let mut guard = StateGuard::new(context.as_mut(), &mut cache);
            guard.bind_vertex_array(VertexArrayId(3));
            guard.reset();
            assert_eq!(guard.bound_vertex_array(), None);
            guard.bind_vertex_array(VertexArrayId(3));
        }
        assert_eq!(bind_calls(&driver), 2);
        assert_eq!(cache.vertex_array(), Some(VertexArrayId(3)));
    }

    #[test]
    fn cache_survives_across_guards() {
        let mut driver = RecordingDriver::new();
        let mut context = render_context(&mut driver);
        let mut cache = BindingCache::default();
        StateGuard::new(context.as_mut(), &mut cache).bind_vertex_array(VertexArrayId(1));
        StateGuard::new(context.as_mut(), &mut cache).bind_vertex_array(VertexArrayId(1));
        assert_eq!(bind_calls(&driver), 1);
        assert_eq!(context.role(), ContextRole::Render);
    }

    #[test]
    fn released_context_sees_no_calls() {
        let mut driver = RecordingDriver::new();
        let mut context = render_context(&mut driver);
        context.release();
        let before = driver.calls().len();

        let mut cache = BindingCache::default();
        let mut guard = StateGuard::new(context.as_mut(), &mut cache);
        guard.bind_vertex_array(VertexArrayId(1));
        assert!(guard.draw(&DrawCall::untextured(0..6)).is_err());
        assert_eq!(driver.calls().len(), before);
    }
}

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::CompositorError;
use crate::gpu::driver::{BoxedContext, CardVertex, ImageView, TextureId, VertexArrayId};

pub(crate) struct LoadSide {
    context: BoxedContext,
    textures: Vec<TextureId>,
    vertex_arrays: Vec<VertexArrayId>,
}

/// Uploads card assets through the load context.
///
/// Handles are cheap to clone and may be used from any thread while the
/// frame clock renders. Every object created through a handle is tracked and
/// freed when the compositor is torn down. After teardown every call fails
/// with [`CompositorError::TornDown`].
#[derive(Clone, Default)]
pub struct LoadHandle {
    side: Arc<Mutex<Option<LoadSide>>>,
}

impl LoadHandle {
    fn lock(&self) -> MutexGuard<'_, Option<LoadSide>> {
        self.side.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn install(&self, context: BoxedContext) {
        *self.lock() = Some(LoadSide {
            context,
            textures: Vec::new(),
            vertex_arrays: Vec::new(),
        });
    }

    pub fn is_available(&self) -> bool {
        self.lock().is_some()
    }

    pub fn upload_texture(&self, image: ImageView<'_>) -> Result<TextureId, CompositorError> {
        if image.width == 0 || image.height == 0 || image.pixels.len() != image.expected_len() {
            return Err(CompositorError::InvalidParameter(format!(
                "{}x{} RGBA image needs {} bytes, got {}",
                image.width,
                image.height,
                image.expected_len(),
                image.pixels.len()
            )));
        }
        let mut guard = self.lock();
        let side = guard.as_mut().ok_or(CompositorError::TornDown)?;
        let id = side
            .context
            .upload_texture(image)
            .map_err(|err| CompositorError::ResourceCreation(err.to_string()))?;
        side.textures.push(id);
        flush(side);
        debug!(%id, width = image.width, height = image.height, "uploaded card texture");
        Ok(id)
    }

    pub fn upload_vertices(&self, vertices: &[CardVertex]) -> Result<VertexArrayId, CompositorError> {
        if vertices.is_empty() {
            return Err(CompositorError::InvalidParameter(
                "vertex array must contain at least one vertex".into(),
            ));
        }
        let mut guard = self.lock();
        let side = guard.as_mut().ok_or(CompositorError::TornDown)?;
        let id = side
            .context
            .create_vertex_array(vertices)
            .map_err(|err| CompositorError::ResourceCreation(err.to_string()))?;
        side.vertex_arrays.push(id);
        flush(side);
        debug!(%id, vertices = vertices.len(), "uploaded card geometry");
        Ok(id)
    }

    pub fn delete_texture(&self, id: TextureId) -> Result<(), CompositorError> {
        let mut guard = self.lock();
        let side = guard.as_mut().ok_or(CompositorError::TornDown)?;
        let Some(index) = side.textures.iter().position(|known| *known == id) else {
            return Err(CompositorError::InvalidParameter(format!(
                "{id} was not uploaded through this loader"
            )));
        };
        side.textures.swap_remove(index);
        side.context
            .delete_texture(id)
            .map_err(|err| CompositorError::ResourceCreation(err.to_string()))
    }

    pub fn delete_vertex_array(&self, id: VertexArrayId) -> Result<(), CompositorError> {
        let mut guard = self.lock();
        let side = guard.as_mut().ok_or(CompositorError::TornDown)?;
        let Some(index) = side.vertex_arrays.iter().position(|known| *known == id) else {
            return Err(CompositorError::InvalidParameter(format!(
                "{id} was not uploaded through this loader"
            )));
        };
        side.vertex_arrays.swap_remove(index);
        side.context
            .delete_vertex_array(id)
            .map_err(|err| CompositorError::ResourceCreation(err.to_string()))
    }

    /// Frees every tracked object, then the load context itself.
    pub(crate) fn release(&self) {
        let Some(mut side) = self.lock().take() else {
            return;
        };
        for id in side.vertex_arrays.drain(..) {
            if let Err(err) = side.context.delete_vertex_array(id) {
                warn!(%id, ?err, "failed to delete vertex array during teardown");
            }
        }
        for id in side.textures.drain(..) {
            if let Err(err) = side.context.delete_texture(id) {
                warn!(%id, ?err, "failed to delete texture during teardown");
            }
        }
        side.context.release();
    }
}

fn flush(side: &mut LoadSide) {
    if let Err(err) = side.context.flush() {
        warn!(?err, "failed to flush load context");
    }
}

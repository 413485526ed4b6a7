//! GPU access for the compositor.
//!
//! - `driver` defines the context/driver traits the compositor renders
//!   through, plus the plain data passed across them (ids, vertices, draw
//!   calls, capabilities).
//! - `state_guard` caches the vertex-array binding of one context so repeated
//!   binds inside a frame never reach the driver.
//! - `uniforms` is the `#[repr(C)]` block consumed by the composite shader.
//! - `wgpu_backend` drives a real surface; `recording` logs every call
//!   in memory and can inject failures, which is what the tests run against.

pub mod driver;
pub mod recording;
pub mod state_guard;
pub mod uniforms;
pub mod wgpu_backend;

pub use driver::{
    BoxedContext, BoxedDriver, CardVertex, ContextId, ContextRole, DrawCall, GpuCapabilities,
    GpuContext, GpuDriver, ImageView, TargetId, TextureId, VertexArrayId,
};
pub use recording::{Faults, GpuCall, GpuLog, RecordingDriver};
pub use state_guard::{BindingCache, StateGuard};
pub use uniforms::CompositeUniforms;
pub use wgpu_backend::{WgpuDriver, WgpuOptions};

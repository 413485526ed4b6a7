use std::fmt;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use winit::dpi::PhysicalSize;

use crate::error::DriverError;
use crate::gpu::uniforms::CompositeUniforms;
use crate::types::{CardSize, Rgba};

macro_rules! gpu_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

gpu_id!(
    /// Identifies one GPU context created by a driver.
    ContextId
);
gpu_id!(
    /// Geometry object holding card vertices.
    VertexArrayId
);
gpu_id!(TextureId);
gpu_id!(
    /// Offscreen color target the card pass renders into.
    TargetId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    /// Draws the card, composites and presents. Owned by the frame clock.
    Render,
    /// Uploads textures and geometry concurrently with rendering.
    Load,
}

/// Card-space vertex: position in card pixels, texture coordinates and tint.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CardVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

impl CardVertex {
    pub fn new(position: [f32; 2], uv: [f32; 2], color: Rgba) -> Self {
        Self {
            position,
            uv,
            color: color.to_array(),
        }
    }

    /// Two triangles covering `[x, y, width, height]` with the full texture.
    pub fn quad(x: f32, y: f32, width: f32, height: f32, color: Rgba) -> [CardVertex; 6] {
        let (x1, y1) = (x + width, y + height);
        [
            Self::new([x, y], [0.0, 0.0], color),
            Self::new([x1, y], [1.0, 0.0], color),
            Self::new([x, y1], [0.0, 1.0], color),
            Self::new([x, y1], [0.0, 1.0], color),
            Self::new([x1, y], [1.0, 0.0], color),
            Self::new([x1, y1], [1.0, 1.0], color),
        ]
    }
}

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

impl<'a> ImageView<'a> {
    pub fn new(width: u32, height: u32, pixels: &'a [u8]) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// One draw issued by the card provider against the bound vertex array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCall {
    /// `None` draws with vertex colors only.
    pub texture: Option<TextureId>,
    pub vertices: Range<u32>,
}

impl DrawCall {
    pub fn textured(texture: TextureId, vertices: Range<u32>) -> Self {
        Self {
            texture: Some(texture),
            vertices,
        }
    }

    pub fn untextured(vertices: Range<u32>) -> Self {
        Self {
            texture: None,
            vertices,
        }
    }
}

/// What a render context reports about the hardware behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub adapter_name: String,
    pub backend: String,
    /// `(major, minor)` of the driver API, when the backend reports one.
    pub api_version: Option<(u32, u32)>,
    pub extensions: Vec<String>,
    pub max_texture_dimension: u32,
    /// Dedicated video memory in bytes, if known.
    pub video_memory: Option<u64>,
    pub is_software: bool,
}

impl GpuCapabilities {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions
            .iter()
            .any(|extension| extension.eq_ignore_ascii_case(name))
    }
}

/// Extracts the first `major.minor` pair from a free-form driver string.
pub fn parse_version(text: &str) -> Option<(u32, u32)> {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if !bytes[index].is_ascii_digit() {
            index += 1;
            continue;
        }
        let start = index;
        while index < bytes.len() && bytes[index].is_ascii_digit() {
            index += 1;
        }
        if index + 1 < bytes.len() && bytes[index] == b'.' && bytes[index + 1].is_ascii_digit() {
            let major = text[start..index].parse().ok()?;
            let minor_start = index + 1;
            let mut minor_end = minor_start;
            while minor_end < bytes.len() && bytes[minor_end].is_ascii_digit() {
                minor_end += 1;
            }
            let minor = text[minor_start..minor_end].parse().ok()?;
            return Some((major, minor));
        }
    }
    None
}

/// A GPU context: either the render context or the load context.
///
/// Contexts created by the same driver share one object namespace, so a
/// texture uploaded through the load context can be drawn by the render
/// context. Every method on a released context returns
/// [`DriverError::ContextLost`] without touching the GPU.
pub trait GpuContext: Send {
    fn id(&self) -> ContextId;
    fn role(&self) -> ContextRole;
    fn capabilities(&self) -> &GpuCapabilities;
    fn is_released(&self) -> bool;

    fn create_vertex_array(&mut self, vertices: &[CardVertex])
        -> Result<VertexArrayId, DriverError>;
    fn delete_vertex_array(&mut self, id: VertexArrayId) -> Result<(), DriverError>;
    fn upload_texture(&mut self, image: ImageView<'_>) -> Result<TextureId, DriverError>;
    fn delete_texture(&mut self, id: TextureId) -> Result<(), DriverError>;
    fn create_offscreen_target(&mut self, size: CardSize) -> Result<TargetId, DriverError>;
    fn delete_offscreen_target(&mut self, id: TargetId) -> Result<(), DriverError>;

    fn bind_vertex_array(&mut self, id: Option<VertexArrayId>) -> Result<(), DriverError>;
    fn begin_offscreen(&mut self, target: TargetId, clear: Rgba) -> Result<(), DriverError>;
    fn draw(&mut self, call: &DrawCall) -> Result<(), DriverError>;
    fn end_offscreen(&mut self) -> Result<(), DriverError>;

    /// Runs the image chain over `source` into the next surface frame.
    fn composite(
        &mut self,
        source: TargetId,
        uniforms: &CompositeUniforms,
    ) -> Result<(), DriverError>;
    fn present(&mut self) -> Result<(), DriverError>;
    fn resize_surface(&mut self, size: PhysicalSize<u32>) -> Result<(), DriverError>;

    /// Makes prior uploads visible to other contexts in the namespace.
    fn flush(&mut self) -> Result<(), DriverError>;

    /// Frees the context. Idempotent.
    fn release(&mut self);
}

pub type BoxedContext = Box<dyn GpuContext>;

/// Creates the two contexts the compositor runs on.
pub trait GpuDriver: Send {
    fn create_render_context(
        &mut self,
        surface_size: PhysicalSize<u32>,
    ) -> Result<BoxedContext, DriverError>;

    /// Creates a load context sharing its namespace with `share_with`.
    fn create_load_context(&mut self, share_with: ContextId) -> Result<BoxedContext, DriverError>;
}

pub type BoxedDriver = Box<dyn GpuDriver>;

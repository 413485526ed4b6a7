use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::gpu::driver::{CardVertex, ImageView, TargetId, TextureId, VertexArrayId};
use crate::types::CardSize;

use super::pipeline::{CardPipeline, CARD_FORMAT};

pub(crate) struct TextureEntry {
    pub _texture: wgpu::Texture,
    pub bind_group: wgpu::BindGroup,
}

pub(crate) struct VertexArrayEntry {
    pub buffer: wgpu::Buffer,
    pub vertices: u32,
}

pub(crate) struct TargetEntry {
    pub _texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size_bind_group: wgpu::BindGroup,
    pub _size_buffer: wgpu::Buffer,
}

/// Objects visible to every context created from one device.
pub(crate) struct Namespace {
    next_id: u32,
    textures: HashMap<TextureId, TextureEntry>,
    vertex_arrays: HashMap<VertexArrayId, VertexArrayEntry>,
    targets: HashMap<TargetId, TargetEntry>,
    /// 1x1 white texture bound for untextured draws.
    white: wgpu::BindGroup,
}

fn rgba_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    image: ImageView<'_>,
) -> wgpu::Texture {
    let size = wgpu::Extent3d {
        width: image.width,
        height: image.height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        image.pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * image.width),
            rows_per_image: Some(image.height),
        },
        size,
    );
    texture
}

fn texture_bind_group(
    device: &wgpu::Device,
    pipeline: &CardPipeline,
    texture: &wgpu::Texture,
) -> wgpu::BindGroup {
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("card texture bind group"),
        layout: &pipeline.texture_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&pipeline.sampler),
            },
        ],
    })
}

impl Namespace {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, pipeline: &CardPipeline) -> Self {
        let white = rgba_texture(
            device,
            queue,
            "white texture",
            ImageView::new(1, 1, &[255, 255, 255, 255]),
        );
        Self {
            next_id: 1,
            textures: HashMap::new(),
            vertex_arrays: HashMap::new(),
            targets: HashMap::new(),
            white: texture_bind_group(device, pipeline, &white),
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn upload_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pipeline: &CardPipeline,
        image: ImageView<'_>,
    ) -> TextureId {
        let id = TextureId(self.allocate());
        let texture = rgba_texture(device, queue, "card texture", image);
        let bind_group = texture_bind_group(device, pipeline, &texture);
        self.textures.insert(
            id,
            TextureEntry {
                _texture: texture,
                bind_group,
            },
        );
        id
    }

    pub fn create_vertex_array(
        &mut self,
        device: &wgpu::Device,
        vertices: &[CardVertex],
    ) -> VertexArrayId {
        let id = VertexArrayId(self.allocate());
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("card vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        self.vertex_arrays.insert(
            id,
            VertexArrayEntry {
                buffer,
                vertices: vertices.len() as u32,
            },
        );
        id
    }

    pub fn create_target(
        &mut self,
        device: &wgpu::Device,
        pipeline: &CardPipeline,
        size: CardSize,
    ) -> TargetId {
        let id = TargetId(self.allocate());
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen card target"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CARD_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let size_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("card size uniforms"),
            contents: bytemuck::cast_slice(&[size.width as f32, size.height as f32, 0.0, 0.0]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let size_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("card size bind group"),
            layout: &pipeline.target_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: size_buffer.as_entire_binding(),
            }],
        });
        self.targets.insert(
            id,
            TargetEntry {
                _texture: texture,
                view,
                size_bind_group,
                _size_buffer: size_buffer,
            },
        );
        id
    }

    pub fn texture_bind_group(&self, id: Option<TextureId>) -> Option<&wgpu::BindGroup> {
        match id {
            Some(id) => self.textures.get(&id).map(|entry| &entry.bind_group),
            None => Some(&self.white),
        }
    }

    pub fn vertex_array(&self, id: VertexArrayId) -> Option<&VertexArrayEntry> {
        self.vertex_arrays.get(&id)
    }

    pub fn target(&self, id: TargetId) -> Option<&TargetEntry> {
        self.targets.get(&id)
    }

    pub fn remove_texture(&mut self, id: TextureId) -> bool {
        self.textures.remove(&id).is_some()
    }

    pub fn remove_vertex_array(&mut self, id: VertexArrayId) -> bool {
        self.vertex_arrays.remove(&id).is_some()
    }

    pub fn remove_target(&mut self, id: TargetId) -> bool {
        self.targets.remove(&id).is_some()
    }
}

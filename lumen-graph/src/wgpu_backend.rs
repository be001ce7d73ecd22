use crate::access::BarrierBits;
use crate::desc::{BufferDesc, BufferUsage, ResolvedTextureDesc, TextureFormat, TextureUsage};
use crate::resources::GpuBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub native: wgpu::TextureFormat,
    pub sample_type: wgpu::TextureSampleType,
    pub bytes_per_texel: u32,
}

const FORMAT_TABLE: [(TextureFormat, FormatInfo); 5] = [
    (
        TextureFormat::Rgba16F,
        FormatInfo {
            native: wgpu::TextureFormat::Rgba16Float,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            bytes_per_texel: 8,
        },
    ),
    (
        TextureFormat::Rgba8,
        FormatInfo {
            native: wgpu::TextureFormat::Rgba8Unorm,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            bytes_per_texel: 4,
        },
    ),
    (
        TextureFormat::R32Ui,
        FormatInfo {
            native: wgpu::TextureFormat::R32Uint,
            sample_type: wgpu::TextureSampleType::Uint,
            bytes_per_texel: 4,
        },
    ),
    (
        TextureFormat::R32F,
        FormatInfo {
            native: wgpu::TextureFormat::R32Float,
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            bytes_per_texel: 4,
        },
    ),
    (
        TextureFormat::Depth32F,
        FormatInfo {
            native: wgpu::TextureFormat::Depth32Float,
            sample_type: wgpu::TextureSampleType::Depth,
            bytes_per_texel: 4,
        },
    ),
];

pub fn format_info(format: TextureFormat) -> FormatInfo {
    FORMAT_TABLE
        .iter()
        .find(|(entry, _)| *entry == format)
        .map(|(_, info)| *info)
        .unwrap_or(FORMAT_TABLE[0].1)
}

fn texture_usages(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
    if usage.intersects(TextureUsage::COLOR_ATTACH | TextureUsage::DEPTH_ATTACH) {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::IMAGE) {
        usages |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    usages
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut usages = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::STORAGE) {
        usages |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        usages |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        usages |= wgpu::BufferUsages::INDIRECT;
    }
    if usage.contains(BufferUsage::UPLOAD) {
        usages |= wgpu::BufferUsages::COPY_DST;
    }
    if usage.contains(BufferUsage::READBACK) {
        usages |= wgpu::BufferUsages::COPY_SRC;
    }
    usages
}

pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub desc: ResolvedTextureDesc,
}

pub struct WgpuBuffer {
    pub buffer: wgpu::Buffer,
    pub desc: BufferDesc,
}

/// wgpu device plus the encoder all passes of a frame record into.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    encoder: Option<wgpu::CommandEncoder>,
    barriers_issued: u64,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            encoder: None,
            barriers_issued: 0,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Graph Encoder"),
            })
        })
    }

    pub fn finish(&mut self) -> Option<wgpu::CommandBuffer> {
        self.encoder.take().map(|encoder| encoder.finish())
    }

    pub fn barriers_issued(&self) -> u64 {
        self.barriers_issued
    }
}

impl GpuBackend for WgpuBackend {
    type Texture = WgpuTexture;
    type Buffer = WgpuBuffer;

    fn create_texture(&mut self, label: &str, desc: &ResolvedTextureDesc) -> WgpuTexture {
        let info = format_info(desc.format);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers,
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: info.native,
            usage: texture_usages(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(if desc.layers > 1 {
                wgpu::TextureViewDimension::D2Array
            } else {
                wgpu::TextureViewDimension::D2
            }),
            ..Default::default()
        });
        log::debug!("created texture '{label}' {desc}");
        WgpuTexture {
            texture,
            view,
            desc: *desc,
        }
    }

    fn destroy_texture(&mut self, texture: WgpuTexture) {
        texture.texture.destroy();
    }

    fn create_buffer(&mut self, label: &str, desc: &BufferDesc) -> WgpuBuffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: desc.size.max(4).next_multiple_of(4),
            usage: buffer_usages(desc.usage),
            mapped_at_creation: false,
        });
        log::debug!("created buffer '{label}' {desc}");
        WgpuBuffer {
            buffer,
            desc: *desc,
        }
    }

    fn destroy_buffer(&mut self, buffer: WgpuBuffer) {
        buffer.buffer.destroy();
    }

    // wgpu inserts its own transitions from usage tracking, so the computed
    // scopes are only recorded.
    fn memory_barrier(&mut self, bits: BarrierBits) {
        self.barriers_issued += 1;
        log::trace!("memory barrier {bits:?}");
    }
}

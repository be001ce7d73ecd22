//! wgpu implementation of the pass command seam, plus the window surface.

mod present;

pub use present::Presenter;

use crate::commands::{
    Bind, BlendMode, CompareFunction, Dispatch, DrawBatch, FrameCommands, LoadOp, Program,
    ProgramDesc,
};
use lumen_graph::{
    BarrierBits, BufferDesc, GpuBackend, ResolvedTextureDesc, WgpuBackend, WgpuBuffer, WgpuTexture,
    format_info,
};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("failed to create the window surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("no suitable adapter: {0}")]
    RequestAdapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to open the device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("the surface reports no supported formats")]
    NoSurfaceFormat,
}

enum Pipeline {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

struct CachedProgram {
    pipeline: Pipeline,
    layout: wgpu::BindGroupLayout,
}

/// Per-device state behind [`FrameCommands`]: the frame encoder, one
/// pipeline per [`Program`], the material texture array and shared samplers.
pub struct WgpuFrame {
    backend: WgpuBackend,
    programs: HashMap<Program, CachedProgram>,
    material_array: wgpu::Texture,
    material_view: wgpu::TextureView,
    material_layer_size: u32,
    material_layers: u32,
    linear_sampler: wgpu::Sampler,
    blank_depth: wgpu::TextureView,
    readback: wgpu::Buffer,
}

impl WgpuFrame {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, layer_size: u32, layers: u32) -> Self {
        let layer_size = layer_size.max(1);
        let layers = layers.max(1);
        let material_array = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Material Textures"),
            size: wgpu::Extent3d {
                width: layer_size,
                height: layer_size,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let material_view = material_array.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Material Textures View"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let blank = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Blank Depth"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let blank_depth = blank.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Blank Depth Clear"),
        });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blank Depth Clear"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &blank_depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        queue.submit(std::iter::once(encoder.finish()));

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pick Readback"),
            size: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            backend: WgpuBackend::new(device, queue),
            programs: HashMap::new(),
            material_array,
            material_view,
            material_layer_size: layer_size,
            material_layers: layers,
            linear_sampler,
            blank_depth,
            readback,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        self.backend.device()
    }

    pub fn queue(&self) -> &wgpu::Queue {
        self.backend.queue()
    }

    /// The encoder this frame's passes record into.
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.backend.encoder()
    }

    pub fn barriers_issued(&self) -> u64 {
        self.backend.barriers_issued()
    }

    /// Submits everything recorded since the last submit.
    pub fn submit(&mut self) {
        if let Some(commands) = self.backend.finish() {
            self.backend.queue().submit(std::iter::once(commands));
        }
    }

    fn ensure_program(&mut self, program: Program, bindings: &[Bind<'_, Self>], targets: Targets) {
        if self.programs.contains_key(&program) {
            return;
        }
        let desc = program.desc();
        let device = self.backend.device();
        let visibility = if program.is_compute() {
            wgpu::ShaderStages::COMPUTE
        } else {
            wgpu::ShaderStages::VERTEX_FRAGMENT
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(desc.label),
            entries: &layout_entries(bindings, visibility),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.sources.concat().into()),
        });

        let pipeline = match desc.compute {
            Some(entry) => Pipeline::Compute(device.create_compute_pipeline(
                &wgpu::ComputePipelineDescriptor {
                    label: Some(desc.label),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    cache: None,
                },
            )),
            None => Pipeline::Render(render_pipeline(device, &desc, &pipeline_layout, &module, &targets)),
        };
        log::debug!("built pipeline '{}'", desc.label);
        self.programs.insert(program, CachedProgram { pipeline, layout });
    }

    fn bind_group(&self, program: Program, bindings: &[Bind<'_, Self>]) -> Option<wgpu::BindGroup> {
        let cached = self.programs.get(&program)?;
        let device = self.backend.device();
        let uniforms: Vec<Option<wgpu::Buffer>> = bindings
            .iter()
            .map(|binding| match binding {
                Bind::Uniform(bytes) => Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Pass Uniform"),
                    contents: bytes,
                    usage: wgpu::BufferUsages::UNIFORM,
                })),
                _ => None,
            })
            .collect();

        let mut entries = Vec::with_capacity(bindings.len() + 1);
        let mut slot = 0;
        for (binding, uniform) in bindings.iter().zip(&uniforms) {
            let resource = match (binding, uniform) {
                (Bind::Texture(texture), _) => wgpu::BindingResource::TextureView(&texture.view),
                (Bind::Buffer(buffer) | Bind::BufferRw(buffer), _) => buffer.buffer.as_entire_binding(),
                (Bind::Uniform(_), Some(buffer)) => buffer.as_entire_binding(),
                (Bind::Uniform(_), None) => return None,
                (Bind::LinearSampler, _) => wgpu::BindingResource::Sampler(&self.linear_sampler),
                (Bind::BlankDepth, _) => wgpu::BindingResource::TextureView(&self.blank_depth),
                (Bind::MaterialTextures, _) => {
                    entries.push(wgpu::BindGroupEntry {
                        binding: slot,
                        resource: wgpu::BindingResource::TextureView(&self.material_view),
                    });
                    slot += 1;
                    wgpu::BindingResource::Sampler(&self.linear_sampler)
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot,
                resource,
            });
            slot += 1;
        }

        Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.desc().label),
            layout: &cached.layout,
            entries: &entries,
        }))
    }
}

/// Attachment formats a render pipeline is built for.
#[derive(Default)]
struct Targets {
    color: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
}

fn layout_entries(bindings: &[Bind<'_, WgpuFrame>], visibility: wgpu::ShaderStages) -> Vec<wgpu::BindGroupLayoutEntry> {
    let texture = |sample_type, view_dimension| wgpu::BindingType::Texture {
        sample_type,
        view_dimension,
        multisampled: false,
    };
    let storage = |read_only| wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Storage { read_only },
        has_dynamic_offset: false,
        min_binding_size: None,
    };
    let filtering = wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering);

    let mut types = Vec::with_capacity(bindings.len() + 1);
    for binding in bindings {
        match binding {
            Bind::Texture(texture_ref) => {
                let dimension = if texture_ref.desc.layers > 1 {
                    wgpu::TextureViewDimension::D2Array
                } else {
                    wgpu::TextureViewDimension::D2
                };
                types.push(texture(format_info(texture_ref.desc.format).sample_type, dimension));
            }
            Bind::Buffer(_) => types.push(storage(true)),
            Bind::BufferRw(_) => types.push(storage(false)),
            Bind::Uniform(_) => types.push(wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            }),
            Bind::LinearSampler => types.push(filtering),
            Bind::MaterialTextures => {
                types.push(texture(
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2Array,
                ));
                types.push(filtering);
            }
            Bind::BlankDepth => types.push(texture(wgpu::TextureSampleType::Depth, wgpu::TextureViewDimension::D2)),
        }
    }

    types
        .into_iter()
        .enumerate()
        .map(|(slot, ty)| wgpu::BindGroupLayoutEntry {
            binding: slot as u32,
            visibility,
            ty,
            count: None,
        })
        .collect()
}

fn compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn render_pipeline(
    device: &wgpu::Device,
    desc: &ProgramDesc,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    targets: &Targets,
) -> wgpu::RenderPipeline {
    let blend = match desc.blend {
        BlendMode::Replace => None,
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
    };
    let color_targets: Vec<Option<wgpu::ColorTargetState>> = targets
        .color
        .iter()
        .map(|format| {
            Some(wgpu::ColorTargetState {
                format: *format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();
    let depth_stencil = targets.depth.map(|format| {
        let (write, compare) = desc
            .depth
            .map(|depth| (depth.write, compare_function(depth.compare)))
            .unwrap_or((false, wgpu::CompareFunction::Always));
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: write,
            depth_compare: compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: desc.vertex,
            buffers: &[],
            compilation_options: Default::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: desc.cull_back_faces.then_some(wgpu::Face::Back),
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: desc.fragment.map(|entry| wgpu::FragmentState {
            module,
            entry_point: Some(entry),
            targets: &color_targets,
            compilation_options: Default::default(),
        }),
        multiview: None,
        cache: None,
    })
}

fn color_load(load: LoadOp) -> wgpu::LoadOp<wgpu::Color> {
    match load {
        LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        }),
        LoadOp::Load => wgpu::LoadOp::Load,
    }
}

fn depth_load(load: LoadOp) -> wgpu::LoadOp<f32> {
    match load {
        LoadOp::Clear([depth, ..]) => wgpu::LoadOp::Clear(depth),
        LoadOp::Load => wgpu::LoadOp::Load,
    }
}

impl GpuBackend for WgpuFrame {
    type Texture = WgpuTexture;
    type Buffer = WgpuBuffer;

    fn create_texture(&mut self, label: &str, desc: &ResolvedTextureDesc) -> WgpuTexture {
        self.backend.create_texture(label, desc)
    }

    fn destroy_texture(&mut self, texture: WgpuTexture) {
        self.backend.destroy_texture(texture);
    }

    fn create_buffer(&mut self, label: &str, desc: &BufferDesc) -> WgpuBuffer {
        self.backend.create_buffer(label, desc)
    }

    fn destroy_buffer(&mut self, buffer: WgpuBuffer) {
        self.backend.destroy_buffer(buffer);
    }

    fn memory_barrier(&mut self, bits: BarrierBits) {
        self.backend.memory_barrier(bits);
    }
}

impl FrameCommands for WgpuFrame {
    fn upload(&mut self, buffer: &WgpuBuffer, offset: u64, bytes: &[u8]) {
        self.backend.queue().write_buffer(&buffer.buffer, offset, bytes);
    }

    fn draw(&mut self, batch: DrawBatch<'_, Self>) {
        let targets = Targets {
            color: batch
                .color
                .iter()
                .map(|attachment| format_info(attachment.texture.desc.format).native)
                .collect(),
            depth: batch
                .depth
                .as_ref()
                .map(|attachment| format_info(attachment.texture.desc.format).native),
        };
        self.ensure_program(batch.program, &batch.bindings, targets);
        let Some(bind_group) = self.bind_group(batch.program, &batch.bindings) else {
            log::error!("'{}': could not bind {:?}", batch.label, batch.program);
            return;
        };
        let Some(CachedProgram {
            pipeline: Pipeline::Render(pipeline),
            ..
        }) = self.programs.get(&batch.program)
        else {
            log::error!("'{}': {:?} is not a render program", batch.label, batch.program);
            return;
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = batch
            .color
            .iter()
            .map(|attachment| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.texture.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load(attachment.load),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = batch.depth.as_ref().map(|attachment| wgpu::RenderPassDepthStencilAttachment {
            view: &attachment.texture.view,
            depth_ops: Some(wgpu::Operations {
                load: depth_load(attachment.load),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let mut pass = self.backend.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(batch.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if let Some(viewport) = batch.viewport {
            pass.set_viewport(viewport.x, viewport.y, viewport.width, viewport.height, 0.0, 1.0);
        }
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(batch.vertices, batch.instances);
    }

    fn dispatch(&mut self, dispatch: Dispatch<'_, Self>) {
        self.ensure_program(dispatch.program, &dispatch.bindings, Targets::default());
        let Some(bind_group) = self.bind_group(dispatch.program, &dispatch.bindings) else {
            log::error!("'{}': could not bind {:?}", dispatch.label, dispatch.program);
            return;
        };
        let Some(CachedProgram {
            pipeline: Pipeline::Compute(pipeline),
            ..
        }) = self.programs.get(&dispatch.program)
        else {
            log::error!("'{}': {:?} is not a compute program", dispatch.label, dispatch.program);
            return;
        };
        let [x, y, z] = dispatch.groups;
        if x == 0 || y == 0 || z == 0 {
            return;
        }

        let mut pass = self.backend.encoder().begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(dispatch.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, z);
    }

    fn upload_texture_layer(&mut self, layer: u32, size: u32, pixels: &[u8]) {
        if layer >= self.material_layers || size != self.material_layer_size {
            log::warn!(
                "texture layer {layer} ({size}px) does not fit the {}x{}px material array",
                self.material_layers,
                self.material_layer_size
            );
            return;
        }
        if pixels.len() as u64 != 4 * size as u64 * size as u64 {
            log::warn!("texture layer {layer}: expected {size}x{size} RGBA8, got {} bytes", pixels.len());
            return;
        }
        self.backend.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.material_array,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size),
                rows_per_image: Some(size),
            },
            wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
        );
    }

    fn read_id(&mut self, texture: &WgpuTexture, x: u32, y: u32) -> Option<u32> {
        if x >= texture.desc.width || y >= texture.desc.height {
            return None;
        }
        let device = self.backend.device();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Pick Readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        self.backend.queue().submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..4);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = device.poll(wgpu::PollType::Wait);
        if let Err(error) = receiver.recv().ok()? {
            log::warn!("pick readback failed: {error}");
            return None;
        }
        let id = {
            let data = slice.get_mapped_range();
            u32::from_le_bytes([data[0], data[1], data[2], data[3]])
        };
        self.readback.unmap();
        Some(id)
    }
}

/// Window surface plus the frame state rendering into it.
pub struct Gpu {
    pub surface: wgpu::Surface<'static>,
    pub surface_config: wgpu::SurfaceConfiguration,
    pub frame: WgpuFrame,
}

impl Gpu {
    pub async fn new_async(
        window: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
        layer_size: u32,
        layers: u32,
    ) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;
        log::info!("using adapter {:?}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Lumen Device"),
                memory_hints: wgpu::MemoryHints::default(),
                required_features: wgpu::Features::default(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                trace: wgpu::Trace::Off,
            })
            .await?;

        let capabilities = surface.get_capabilities(&adapter);
        // Tonemapping applies gamma itself.
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or(GpuError::NoSurfaceFormat)?;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: capabilities
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        Ok(Self {
            surface,
            surface_config,
            frame: WgpuFrame::new(device, queue, layer_size, layers),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(self.frame.device(), &self.surface_config);
    }
}

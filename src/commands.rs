//! The command vocabulary passes record GPU work with.

use lumen_graph::{GpuBackend, HeadlessBackend};
use std::ops::Range;

/// Every pipeline the renderer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Program {
    ShadowDepth,
    DepthPrepass,
    LightCluster,
    ForwardMrt,
    PickIds,
    BloomExtract,
    BloomBlurH,
    BloomBlurV,
    Tonemap,
    TonemapBloom,
    SelectionOutline,
}

impl Program {
    pub const ALL: [Program; 11] = [
        Program::ShadowDepth,
        Program::DepthPrepass,
        Program::LightCluster,
        Program::ForwardMrt,
        Program::PickIds,
        Program::BloomExtract,
        Program::BloomBlurH,
        Program::BloomBlurV,
        Program::Tonemap,
        Program::TonemapBloom,
        Program::SelectionOutline,
    ];

    pub fn is_compute(self) -> bool {
        matches!(self, Program::LightCluster)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Less,
    LessEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub write: bool,
    pub compare: CompareFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Replace,
    Alpha,
}

/// Static description of a program: its WGSL module and fixed-function state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramDesc {
    pub label: &'static str,
    /// WGSL chunks, concatenated in order into one module.
    pub sources: &'static [&'static str],
    pub vertex: Option<&'static str>,
    pub fragment: Option<&'static str>,
    pub compute: Option<&'static str>,
    pub depth: Option<DepthState>,
    pub blend: BlendMode,
    pub cull_back_faces: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

pub struct Attachment<'a, B: GpuBackend> {
    pub texture: &'a B::Texture,
    pub load: LoadOp,
}

impl<'a, B: GpuBackend> Attachment<'a, B> {
    pub fn clear(texture: &'a B::Texture, color: [f32; 4]) -> Self {
        Self {
            texture,
            load: LoadOp::Clear(color),
        }
    }

    pub fn load(texture: &'a B::Texture) -> Self {
        Self {
            texture,
            load: LoadOp::Load,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One binding slot. Slots are numbered in order within group 0.
pub enum Bind<'a, B: GpuBackend> {
    Texture(&'a B::Texture),
    /// Read-only storage buffer.
    Buffer(&'a B::Buffer),
    /// Read-write storage buffer.
    BufferRw(&'a B::Buffer),
    Uniform(&'a [u8]),
    LinearSampler,
    /// The material texture array followed by its sampler (two slots).
    MaterialTextures,
    /// A 1x1 depth texture cleared to the far plane.
    BlankDepth,
}

pub struct DrawBatch<'a, B: GpuBackend> {
    pub label: &'a str,
    pub program: Program,
    pub color: Vec<Attachment<'a, B>>,
    pub depth: Option<Attachment<'a, B>>,
    pub viewport: Option<Viewport>,
    pub bindings: Vec<Bind<'a, B>>,
    pub vertices: Range<u32>,
    pub instances: Range<u32>,
}

pub struct Dispatch<'a, B: GpuBackend> {
    pub label: &'a str,
    pub program: Program,
    pub bindings: Vec<Bind<'a, B>>,
    pub groups: [u32; 3],
}

/// GPU work a pass can record on top of resource creation.
pub trait FrameCommands: GpuBackend + Sized {
    fn upload(&mut self, buffer: &Self::Buffer, offset: u64, bytes: &[u8]);
    fn draw(&mut self, batch: DrawBatch<'_, Self>);
    fn dispatch(&mut self, dispatch: Dispatch<'_, Self>);
    /// Writes one `size`x`size` RGBA8 layer of the material texture array.
    fn upload_texture_layer(&mut self, layer: u32, size: u32, pixels: &[u8]);
    /// Reads one texel of an `R32Ui` texture, once the frame has been submitted.
    fn read_id(&mut self, texture: &Self::Texture, x: u32, y: u32) -> Option<u32>;
}

fn headless_binding(binding: &Bind<'_, HeadlessBackend>) -> String {
    match binding {
        Bind::Texture(texture) => texture.label.clone(),
        Bind::Buffer(buffer) => buffer.label.clone(),
        Bind::BufferRw(buffer) => format!("{} rw", buffer.label),
        Bind::Uniform(bytes) => format!("uniform {}", bytes.len()),
        Bind::LinearSampler => "sampler".to_string(),
        Bind::MaterialTextures => "material textures".to_string(),
        Bind::BlankDepth => "blank depth".to_string(),
    }
}

impl FrameCommands for HeadlessBackend {
    fn upload(&mut self, buffer: &Self::Buffer, offset: u64, bytes: &[u8]) {
        self.record(format!("upload {} {} bytes at {offset}", buffer.label, bytes.len()));
    }

    fn draw(&mut self, batch: DrawBatch<'_, Self>) {
        let targets: Vec<&str> = batch
            .color
            .iter()
            .chain(batch.depth.iter())
            .map(|attachment| attachment.texture.label.as_str())
            .collect();
        let bindings: Vec<String> = batch.bindings.iter().map(headless_binding).collect();
        self.record(format!(
            "draw {} {:?} targets [{}] bindings [{}] vertices {:?} instances {:?}",
            batch.label,
            batch.program,
            targets.join(", "),
            bindings.join(", "),
            batch.vertices,
            batch.instances
        ));
    }

    fn dispatch(&mut self, dispatch: Dispatch<'_, Self>) {
        let bindings: Vec<String> = dispatch.bindings.iter().map(headless_binding).collect();
        self.record(format!(
            "dispatch {} {:?} bindings [{}] groups {:?}",
            dispatch.label,
            dispatch.program,
            bindings.join(", "),
            dispatch.groups
        ));
    }

    fn upload_texture_layer(&mut self, layer: u32, size: u32, pixels: &[u8]) {
        self.record(format!("upload layer {layer} {size}x{size} {} bytes", pixels.len()));
    }

    fn read_id(&mut self, _texture: &Self::Texture, _x: u32, _y: u32) -> Option<u32> {
        None
    }
}

use super::shader_common::{FRAME_WGSL, FULLSCREEN_WGSL};
use super::{FrameData, FrameResource};
use crate::commands::{Attachment, Bind, BlendMode, DrawBatch, FrameCommands, Program, ProgramDesc};
use lumen_graph::{Access, Extent, RenderGraph, TextureDesc, TextureFormat, TextureUsage};

const TONEMAP_COMMON: &str = "
@group(0) @binding(1)
var hdr_color: texture_2d<f32>;

@group(0) @binding(2)
var hdr_emissive: texture_2d<f32>;

fn aces(color: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return clamp((color * (a * color + b)) / (color * (c * color + d) + e), vec3<f32>(0.0), vec3<f32>(1.0));
}

fn finish(hdr: vec3<f32>) -> vec4<f32> {
    let mapped = aces(hdr * frame.tonemap.x);
    let gamma = max(frame.tonemap.y, 0.0001);
    return vec4<f32>(pow(mapped, vec3<f32>(1.0 / gamma)), 1.0);
}
";

const TONEMAP_SHADER: &str = "
@group(0) @binding(3)
var linear_sampler: sampler;

@fragment
fn tonemap_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let hdr = textureSample(hdr_color, linear_sampler, in.uv).rgb
        + textureSample(hdr_emissive, linear_sampler, in.uv).rgb;
    return finish(hdr);
}
";

const TONEMAP_BLOOM_SHADER: &str = "
@group(0) @binding(3)
var bloom: texture_2d<f32>;

@group(0) @binding(4)
var linear_sampler: sampler;

@fragment
fn tonemap_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let hdr = textureSample(hdr_color, linear_sampler, in.uv).rgb
        + textureSample(hdr_emissive, linear_sampler, in.uv).rgb
        + textureSample(bloom, linear_sampler, in.uv).rgb * frame.tonemap.z;
    return finish(hdr);
}
";

pub const PROGRAM: ProgramDesc = ProgramDesc {
    label: "Tonemap",
    sources: &[FRAME_WGSL, FULLSCREEN_WGSL, TONEMAP_COMMON, TONEMAP_SHADER],
    vertex: Some("fullscreen_main"),
    fragment: Some("tonemap_main"),
    compute: None,
    depth: None,
    blend: BlendMode::Replace,
    cull_back_faces: false,
};

pub const BLOOM_PROGRAM: ProgramDesc = ProgramDesc {
    label: "Tonemap Bloom",
    sources: &[FRAME_WGSL, FULLSCREEN_WGSL, TONEMAP_COMMON, TONEMAP_BLOOM_SHADER],
    ..PROGRAM
};

pub fn ldr_desc() -> TextureDesc {
    TextureDesc::new(
        Extent::FULL_FRAMEBUFFER,
        TextureFormat::Rgba8,
        TextureUsage::COLOR_ATTACH | TextureUsage::SAMPLED,
    )
}

/// ACES filmic curve with exposure, applied to lit plus emissive colour and
/// optionally the blurred bloom.
pub struct TonemapPass {
    pub bloom: bool,
}

impl TonemapPass {
    pub const NAME: &'static str = "Tonemap";

    pub fn new(bloom: bool) -> Self {
        Self { bloom }
    }

    pub fn setup<B: FrameCommands + 'static>(&self, graph: &mut RenderGraph<B, FrameData>) {
        let bloom = self.bloom;
        graph.add_pass(
            Self::NAME,
            move |builder| {
                builder.read_texture(FrameResource::HdrColor, Access::SAMPLED_READ);
                builder.read_texture(FrameResource::HdrEmissive, Access::SAMPLED_READ);
                if bloom {
                    builder.read_texture(FrameResource::BloomBlur, Access::SAMPLED_READ);
                }
                builder.create_texture(FrameResource::LdrColor, ldr_desc(), Access::COLOR_WRITE);
            },
            move |ctx| {
                let frame = ctx.user;
                let target = ctx.texture(FrameResource::LdrColor);
                let mut bindings = vec![
                    Bind::Uniform(frame.uniform_bytes()),
                    Bind::Texture(ctx.texture(FrameResource::HdrColor)),
                    Bind::Texture(ctx.texture(FrameResource::HdrEmissive)),
                ];
                if bloom {
                    bindings.push(Bind::Texture(ctx.texture(FrameResource::BloomBlur)));
                }
                bindings.push(Bind::LinearSampler);
                ctx.backend.draw(DrawBatch {
                    label: Self::NAME,
                    program: if bloom { Program::TonemapBloom } else { Program::Tonemap },
                    color: vec![Attachment::clear(target, [0.0, 0.0, 0.0, 1.0])],
                    depth: None,
                    viewport: None,
                    bindings,
                    vertices: 0..3,
                    instances: 0..1,
                });
            },
        );
    }
}

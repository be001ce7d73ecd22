use super::shader_common::{FRAME_WGSL, FULLSCREEN_WGSL, PassUniform};
use super::{FrameData, FrameResource};
use crate::commands::{Attachment, Bind, BlendMode, DrawBatch, FrameCommands, Program, ProgramDesc};
use crate::pass_configs::BloomConfig;
use lumen_graph::{Access, Extent, RenderGraph, TextureDesc, TextureFormat, TextureUsage};

const EXTRACT_SHADER: &str = "
@group(0) @binding(1)
var hdr_color: texture_2d<f32>;

@group(0) @binding(2)
var hdr_emissive: texture_2d<f32>;

@group(0) @binding(3)
var linear_sampler: sampler;

@fragment
fn extract_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let color = textureSample(hdr_color, linear_sampler, in.uv).rgb
        + textureSample(hdr_emissive, linear_sampler, in.uv).rgb;
    let brightness = max(color.r, max(color.g, color.b));
    let contribution = max(brightness - frame.tonemap.w, 0.0) / max(brightness, 0.0001);
    return vec4<f32>(color * contribution, 1.0);
}
";

const BLUR_SHADER: &str = "
@group(0) @binding(1)
var<uniform> blur: PassParams;

@group(0) @binding(2)
var source: texture_2d<f32>;

@group(0) @binding(3)
var linear_sampler: sampler;

@fragment
fn blur_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / vec2<f32>(textureDimensions(source));
    let spread = blur.params.xy * texel * max(blur.params.z * 0.25, 0.0);
    let weights = array<f32, 5>(0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216);

    var result = textureSample(source, linear_sampler, in.uv).rgb * weights[0];
    for (var i = 1; i < 5; i = i + 1) {
        let offset = spread * f32(i);
        result = result + textureSample(source, linear_sampler, in.uv + offset).rgb * weights[i];
        result = result + textureSample(source, linear_sampler, in.uv - offset).rgb * weights[i];
    }
    return vec4<f32>(result, 1.0);
}
";

pub const EXTRACT_PROGRAM: ProgramDesc = ProgramDesc {
    label: "Bloom Extract",
    sources: &[FRAME_WGSL, FULLSCREEN_WGSL, EXTRACT_SHADER],
    vertex: Some("fullscreen_main"),
    fragment: Some("extract_main"),
    compute: None,
    depth: None,
    blend: BlendMode::Replace,
    cull_back_faces: false,
};

pub const BLUR_H_PROGRAM: ProgramDesc = ProgramDesc {
    label: "Bloom Blur Horizontal",
    sources: &[FRAME_WGSL, FULLSCREEN_WGSL, BLUR_SHADER],
    vertex: Some("fullscreen_main"),
    fragment: Some("blur_main"),
    compute: None,
    depth: None,
    blend: BlendMode::Replace,
    cull_back_faces: false,
};

pub const BLUR_V_PROGRAM: ProgramDesc = ProgramDesc {
    label: "Bloom Blur Vertical",
    ..BLUR_H_PROGRAM
};

/// Half-resolution colour target shared by every bloom stage.
pub fn bloom_desc() -> TextureDesc {
    TextureDesc::new(
        Extent::Framebuffer { divisor: 2 },
        TextureFormat::Rgba16F,
        TextureUsage::COLOR_ATTACH | TextureUsage::SAMPLED,
    )
}

/// Bright-pass extract followed by a separable blur. The blurred result has
/// the same descriptor as the extract target and reuses its memory.
pub struct PostFilters {
    pub config: BloomConfig,
}

impl PostFilters {
    pub const EXTRACT: &'static str = "Bloom.Extract";
    pub const BLUR_H: &'static str = "Bloom.BlurH";
    pub const BLUR_V: &'static str = "Bloom.BlurV";

    pub fn new(config: BloomConfig) -> Self {
        Self { config }
    }

    pub fn setup<B: FrameCommands + 'static>(&self, graph: &mut RenderGraph<B, FrameData>) {
        graph.add_pass(
            Self::EXTRACT,
            |builder| {
                builder.read_texture(FrameResource::HdrColor, Access::SAMPLED_READ);
                builder.read_texture(FrameResource::HdrEmissive, Access::SAMPLED_READ);
                builder.create_texture(FrameResource::BloomExtract, bloom_desc(), Access::COLOR_WRITE);
            },
            |ctx| {
                let frame = ctx.user;
                let color = ctx.texture(FrameResource::HdrColor);
                let emissive = ctx.texture(FrameResource::HdrEmissive);
                let target = ctx.texture(FrameResource::BloomExtract);
                ctx.backend.draw(DrawBatch {
                    label: Self::EXTRACT,
                    program: Program::BloomExtract,
                    color: vec![Attachment::clear(target, [0.0; 4])],
                    depth: None,
                    viewport: None,
                    bindings: vec![
                        Bind::Uniform(frame.uniform_bytes()),
                        Bind::Texture(color),
                        Bind::Texture(emissive),
                        Bind::LinearSampler,
                    ],
                    vertices: 0..3,
                    instances: 0..1,
                });
            },
        );

        let radius = self.config.radius;
        blur_pass(
            graph,
            Self::BLUR_H,
            Program::BloomBlurH,
            (FrameResource::BloomExtract, FrameResource::BloomBlurH),
            [1.0, 0.0, radius, 0.0],
        );
        blur_pass(
            graph,
            Self::BLUR_V,
            Program::BloomBlurV,
            (FrameResource::BloomBlurH, FrameResource::BloomBlur),
            [0.0, 1.0, radius, 0.0],
        );
    }
}

fn blur_pass<B: FrameCommands + 'static>(
    graph: &mut RenderGraph<B, FrameData>,
    name: &'static str,
    program: Program,
    (source, target): (FrameResource, FrameResource),
    params: [f32; 4],
) {
    graph.add_pass(
        name,
        move |builder| {
            builder.read_texture(source, Access::SAMPLED_READ);
            builder.create_texture(target, bloom_desc(), Access::COLOR_WRITE);
        },
        move |ctx| {
            let frame = ctx.user;
            let input = ctx.texture(source);
            let output = ctx.texture(target);
            let uniform = PassUniform {
                params,
                ..Default::default()
            };
            ctx.backend.draw(DrawBatch {
                label: name,
                program,
                color: vec![Attachment::clear(output, [0.0; 4])],
                depth: None,
                viewport: None,
                bindings: vec![
                    Bind::Uniform(frame.uniform_bytes()),
                    Bind::Uniform(bytemuck::bytes_of(&uniform)),
                    Bind::Texture(input),
                    Bind::LinearSampler,
                ],
                vertices: 0..3,
                instances: 0..1,
            });
        },
    );
}

use super::shader_common::{FRAME_WGSL, FULLSCREEN_WGSL};
use super::{FrameData, FrameResource};
use crate::commands::{Attachment, Bind, BlendMode, DrawBatch, FrameCommands, Program, ProgramDesc};
use lumen_graph::{Access, RenderGraph};

const SELECTION_SHADER: &str = "
@group(0) @binding(1)
var pick_ids: texture_2d<u32>;

@group(0) @binding(2)
var<storage, read> instances: array<Instance>;

fn id_at(texel: vec2<i32>, size: vec2<i32>) -> u32 {
    return textureLoad(pick_ids, clamp(texel, vec2<i32>(0), size - vec2<i32>(1)), 0).r;
}

@fragment
fn selection_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let selected = frame.params.x;
    if (selected >= frame.counts.y) {
        discard;
    }
    let instance = instances[selected];
    if ((instance.flags & 1u) == 0u) {
        discard;
    }

    let size = vec2<i32>(textureDimensions(pick_ids));
    let texel = vec2<i32>(in.position.xy);
    if (id_at(texel, size) == instance.id) {
        discard;
    }

    let thickness = i32(clamp(frame.params.y, 1u, 8u));
    var edge = false;
    for (var y = -thickness; y <= thickness; y = y + 1) {
        for (var x = -thickness; x <= thickness; x = x + 1) {
            if (id_at(texel + vec2<i32>(x, y), size) == instance.id) {
                edge = true;
            }
        }
    }
    if (!edge) {
        discard;
    }
    return frame.selection_color;
}
";

pub const PROGRAM: ProgramDesc = ProgramDesc {
    label: "Selection Outline",
    sources: &[FRAME_WGSL, FULLSCREEN_WGSL, SELECTION_SHADER],
    vertex: Some("fullscreen_main"),
    fragment: Some("selection_main"),
    compute: None,
    depth: None,
    blend: BlendMode::Alpha,
    cull_back_faces: false,
};

/// Outlines the selected instance on the tonemapped image using the pick ids.
pub struct SelectionPass;

impl SelectionPass {
    pub const NAME: &'static str = "Selection.Outline";

    pub fn setup<B: FrameCommands + 'static>(&self, graph: &mut RenderGraph<B, FrameData>) {
        graph.add_pass(
            Self::NAME,
            |builder| {
                builder.read_texture(FrameResource::PickIds, Access::SAMPLED_READ);
                builder.read_buffer(FrameResource::SceneInstances, Access::SSBO_READ);
                builder.write_texture(FrameResource::LdrColor, Access::COLOR_WRITE);
            },
            |ctx| {
                let frame = ctx.user;
                let ids = ctx.texture(FrameResource::PickIds);
                let instances = ctx.buffer(FrameResource::SceneInstances);
                let target = ctx.texture(FrameResource::LdrColor);
                ctx.backend.draw(DrawBatch {
                    label: Self::NAME,
                    program: Program::SelectionOutline,
                    color: vec![Attachment::load(target)],
                    depth: None,
                    viewport: None,
                    bindings: vec![
                        Bind::Uniform(frame.uniform_bytes()),
                        Bind::Texture(ids),
                        Bind::Buffer(instances),
                    ],
                    vertices: 0..3,
                    instances: 0..1,
                });
            },
        );
    }
}

use super::shader_common::{FRAME_WGSL, MESH_WGSL};
use super::{FrameData, FrameResource};
use crate::commands::{
    Attachment, Bind, BlendMode, CompareFunction, DepthState, DrawBatch, FrameCommands, Program,
    ProgramDesc,
};
use lumen_graph::{Access, Extent, RenderGraph, TextureDesc, TextureFormat, TextureUsage};

const PICK_SHADER: &str = "
@group(0) @binding(1)
var<storage, read> instances: array<Instance>;

struct PickVertex {
    @builtin(position) position: vec4<f32>,
    @location(0) @interpolate(flat) id: u32,
};

@vertex
fn pick_vertex(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> PickVertex {
    let instance = instances[instance_index];
    let vertex = mesh_vertex(instance.mesh, vertex_index);
    var out: PickVertex;
    out.position = frame.view_projection * instance.model * vec4<f32>(vertex.position, 1.0);
    out.id = instance.id;
    return out;
}

@fragment
fn pick_fragment(in: PickVertex) -> @location(0) u32 {
    return in.id;
}
";

pub const PROGRAM: ProgramDesc = ProgramDesc {
    label: "Pick Ids",
    sources: &[FRAME_WGSL, MESH_WGSL, PICK_SHADER],
    vertex: Some("pick_vertex"),
    fragment: Some("pick_fragment"),
    compute: None,
    depth: Some(DepthState {
        write: true,
        compare: CompareFunction::Less,
    }),
    blend: BlendMode::Replace,
    cull_back_faces: true,
};

/// Writes the pick id of the closest instance per pixel. Zero is background.
pub struct PickPass;

impl PickPass {
    pub const NAME: &'static str = "Pick";

    pub fn ids_desc() -> TextureDesc {
        TextureDesc::new(
            Extent::FULL_FRAMEBUFFER,
            TextureFormat::R32Ui,
            TextureUsage::COLOR_ATTACH | TextureUsage::SAMPLED,
        )
    }

    pub fn depth_desc() -> TextureDesc {
        TextureDesc::new(Extent::FULL_FRAMEBUFFER, TextureFormat::Depth32F, TextureUsage::DEPTH_ATTACH)
    }

    pub fn setup<B: FrameCommands + 'static>(&self, graph: &mut RenderGraph<B, FrameData>) {
        graph.add_pass(
            Self::NAME,
            |builder| {
                builder.create_texture(FrameResource::PickIds, Self::ids_desc(), Access::COLOR_WRITE);
                builder.create_texture(FrameResource::PickDepth, Self::depth_desc(), Access::DEPTH_WRITE);
                builder.read_buffer(FrameResource::SceneInstances, Access::SSBO_READ);
            },
            |ctx| {
                let frame = ctx.user;
                let ids = ctx.texture(FrameResource::PickIds);
                let depth = ctx.texture(FrameResource::PickDepth);
                let instances = ctx.buffer(FrameResource::SceneInstances);
                ctx.backend.draw(DrawBatch {
                    label: Self::NAME,
                    program: Program::PickIds,
                    color: vec![Attachment::clear(ids, [0.0; 4])],
                    depth: Some(Attachment::clear(depth, [1.0; 4])),
                    viewport: None,
                    bindings: vec![Bind::Uniform(frame.uniform_bytes()), Bind::Buffer(instances)],
                    vertices: 0..36,
                    instances: 0..frame.instance_count,
                });
            },
        );
    }
}

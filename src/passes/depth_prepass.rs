use super::shader_common::{FRAME_WGSL, MESH_WGSL};
use super::{FrameData, FrameResource};
use crate::commands::{
    Attachment, Bind, BlendMode, CompareFunction, DepthState, DrawBatch, FrameCommands, Program,
    ProgramDesc,
};
use lumen_graph::{Access, Extent, RenderGraph, TextureDesc, TextureFormat, TextureUsage};

/// Vertex transform shared with the forward pass so both produce identical depth.
pub const SCENE_VERTEX_WGSL: &str = "
@group(0) @binding(1)
var<storage, read> instances: array<Instance>;

struct SceneVertex {
    @invariant @builtin(position) position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) @interpolate(flat) instance: u32,
};

@vertex
fn scene_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> SceneVertex {
    let instance = instances[instance_index];
    let vertex = mesh_vertex(instance.mesh, vertex_index);
    let world = instance.model * vec4<f32>(vertex.position, 1.0);
    var out: SceneVertex;
    out.position = frame.view_projection * world;
    out.world_position = world.xyz;
    out.normal = normalize((instance.normal * vec4<f32>(vertex.normal, 0.0)).xyz);
    out.uv = vertex.uv;
    out.instance = instance_index;
    return out;
}
";

pub const PROGRAM: ProgramDesc = ProgramDesc {
    label: "Depth Prepass",
    sources: &[FRAME_WGSL, MESH_WGSL, SCENE_VERTEX_WGSL],
    vertex: Some("scene_main"),
    fragment: None,
    compute: None,
    depth: Some(DepthState {
        write: true,
        compare: CompareFunction::Less,
    }),
    blend: BlendMode::Replace,
    cull_back_faces: true,
};

pub struct DepthPrepass;

impl DepthPrepass {
    pub const NAME: &'static str = "Depth.Prepass";

    pub fn depth_desc() -> TextureDesc {
        TextureDesc::new(
            Extent::FULL_FRAMEBUFFER,
            TextureFormat::Depth32F,
            TextureUsage::DEPTH_ATTACH | TextureUsage::SAMPLED,
        )
    }

    pub fn setup<B: FrameCommands + 'static>(&self, graph: &mut RenderGraph<B, FrameData>) {
        graph.add_pass(
            Self::NAME,
            |builder| {
                builder.create_texture(FrameResource::DepthPre, Self::depth_desc(), Access::DEPTH_WRITE);
                builder.read_buffer(FrameResource::SceneInstances, Access::SSBO_READ);
            },
            |ctx| {
                let frame = ctx.user;
                let depth = ctx.texture(FrameResource::DepthPre);
                let instances = ctx.buffer(FrameResource::SceneInstances);
                ctx.backend.draw(DrawBatch {
                    label: Self::NAME,
                    program: Program::DepthPrepass,
                    color: Vec::new(),
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

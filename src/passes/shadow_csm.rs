use super::shader_common::{FRAME_WGSL, MESH_WGSL, PassUniform};
use super::{FrameData, FrameResource};
use crate::commands::{
    Attachment, Bind, BlendMode, CompareFunction, DepthState, DrawBatch, FrameCommands, Program,
    ProgramDesc, Viewport,
};
use crate::pass_configs::ShadowConfig;
use crate::scene::Camera;
use lumen_graph::{Access, RenderGraph, TextureDesc, TextureFormat, TextureUsage};
use nalgebra_glm as glm;

pub const MAX_CASCADES: usize = 4;

const SHADOW_SHADER: &str = "
@group(0) @binding(1)
var<uniform> cascade: PassParams;

@group(0) @binding(2)
var<storage, read> instances: array<Instance>;

@vertex
fn shadow_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> @builtin(position) vec4<f32> {
    let instance = instances[instance_index];
    let vertex = mesh_vertex(instance.mesh, vertex_index);
    return cascade.matrix * instance.model * vec4<f32>(vertex.position, 1.0);
}
";

pub const PROGRAM: ProgramDesc = ProgramDesc {
    label: "Shadow Depth",
    sources: &[FRAME_WGSL, MESH_WGSL, SHADOW_SHADER],
    vertex: Some("shadow_main"),
    fragment: None,
    compute: None,
    depth: Some(DepthState {
        write: true,
        compare: CompareFunction::Less,
    }),
    blend: BlendMode::Replace,
    cull_back_faces: false,
};

/// Light-space matrices and far distances of each cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cascades {
    pub view_projection: [glm::Mat4; MAX_CASCADES],
    pub splits: [f32; MAX_CASCADES],
    pub count: u32,
}

impl Default for Cascades {
    fn default() -> Self {
        Self {
            view_projection: [glm::Mat4::identity(); MAX_CASCADES],
            splits: [0.0; MAX_CASCADES],
            count: 0,
        }
    }
}

/// Splits the view frustum between a uniform and a logarithmic distribution
/// and fits an orthographic light volume around each slice.
pub fn cascades(camera: &Camera, aspect_ratio: f32, sun: glm::Vec3, config: &ShadowConfig) -> Cascades {
    let count = config.cascade_count.clamp(1, MAX_CASCADES as u32);
    let near = camera.near.max(0.01);
    let far = config.distance.min(camera.far).max(near + 0.01);
    let inverse_view = glm::inverse(&camera.view());
    let tan_half_fov = (camera.fov.to_radians() * 0.5).tan();
    let up = if sun.y.abs() > 0.99 {
        glm::Vec3::z()
    } else {
        glm::Vec3::y()
    };

    let mut result = Cascades {
        count,
        ..Default::default()
    };
    let mut previous = near;
    for cascade in 0..count as usize {
        let fraction = (cascade + 1) as f32 / count as f32;
        let uniform = near + (far - near) * fraction;
        let logarithmic = near * (far / near).powf(fraction);
        let split = config.split_lambda * logarithmic + (1.0 - config.split_lambda) * uniform;

        let mut corners = Vec::with_capacity(8);
        for distance in [previous, split] {
            let half_height = distance * tan_half_fov;
            let half_width = half_height * aspect_ratio;
            for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let corner = inverse_view * glm::vec4(x * half_width, y * half_height, -distance, 1.0);
                corners.push(corner.xyz());
            }
        }
        let center = corners.iter().fold(glm::Vec3::zeros(), |sum, corner| sum + corner) / 8.0;
        let radius = corners
            .iter()
            .map(|corner| glm::distance(corner, &center))
            .fold(0.0_f32, f32::max)
            .ceil()
            .max(1.0);

        let eye = center - sun * radius * 2.0;
        let view = glm::look_at_rh(&eye, &center, &up);
        let projection = glm::ortho_rh_zo(-radius, radius, -radius, radius, 0.0, radius * 4.0);
        result.view_projection[cascade] = projection * view;
        result.splits[cascade] = split;
        previous = split;
    }
    result
}

/// Renders each cascade into one quadrant of a 2x2 depth atlas.
pub struct ShadowCsmPass {
    pub config: ShadowConfig,
}

impl ShadowCsmPass {
    pub const NAME: &'static str = "Shadow.CSM";

    pub fn new(config: ShadowConfig) -> Self {
        Self { config }
    }

    pub fn atlas_desc(&self) -> TextureDesc {
        let size = self.config.resolution.max(1) * 2;
        TextureDesc::explicit(
            size,
            size,
            TextureFormat::Depth32F,
            TextureUsage::DEPTH_ATTACH | TextureUsage::SAMPLED,
        )
    }

    pub fn setup<B: FrameCommands + 'static>(&self, graph: &mut RenderGraph<B, FrameData>) {
        let atlas_desc = self.atlas_desc();
        let resolution = self.config.resolution.max(1);
        graph.add_pass(
            Self::NAME,
            move |builder| {
                builder.create_texture(FrameResource::ShadowAtlas, atlas_desc, Access::DEPTH_WRITE);
                builder.read_buffer(FrameResource::SceneInstances, Access::SSBO_READ);
            },
            move |ctx| {
                let frame = ctx.user;
                let atlas = ctx.texture(FrameResource::ShadowAtlas);
                let instances = ctx.buffer(FrameResource::SceneInstances);
                let count = frame.uniform.params[2].min(MAX_CASCADES as u32);
                for cascade in 0..count {
                    let uniform = PassUniform {
                        matrix: frame.uniform.cascade_view_projection[cascade as usize],
                        params: [cascade as f32, 0.0, 0.0, 0.0],
                    };
                    let depth = if cascade == 0 {
                        Attachment::clear(atlas, [1.0; 4])
                    } else {
                        Attachment::load(atlas)
                    };
                    ctx.backend.draw(DrawBatch {
                        label: Self::NAME,
                        program: Program::ShadowDepth,
                        color: Vec::new(),
                        depth: Some(depth),
                        viewport: Some(Viewport {
                            x: (cascade % 2 * resolution) as f32,
                            y: (cascade / 2 * resolution) as f32,
                            width: resolution as f32,
                            height: resolution as f32,
                        }),
                        bindings: vec![
                            Bind::Uniform(frame.uniform_bytes()),
                            Bind::Uniform(bytemuck::bytes_of(&uniform)),
                            Bind::Buffer(instances),
                        ],
                        vertices: 0..36,
                        instances: 0..frame.instance_count,
                    });
                }
            },
        );
    }
}

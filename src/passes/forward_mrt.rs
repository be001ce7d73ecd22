use super::depth_prepass::SCENE_VERTEX_WGSL;
use super::shader_common::{FRAME_WGSL, MESH_WGSL};
use super::{FrameData, FrameResource};
use crate::commands::{
    Attachment, Bind, BlendMode, CompareFunction, DepthState, DrawBatch, FrameCommands, Program,
    ProgramDesc,
};
use crate::material::MATERIAL_VM_WGSL;
use lumen_graph::{Access, Extent, RenderGraph, TextureDesc, TextureFormat, TextureUsage};

const FORWARD_SHADER: &str = "
@group(0) @binding(2)
var<storage, read> lights: array<Light>;

@group(0) @binding(3)
var<storage, read> light_grid: array<u32>;

@group(0) @binding(4)
var<storage, read> material_headers: array<MaterialHeader>;

@group(0) @binding(5)
var<storage, read> material_nodes: array<MaterialNode>;

@group(0) @binding(6)
var material_textures: texture_2d_array<f32>;

@group(0) @binding(7)
var material_sampler: sampler;

@group(0) @binding(8)
var shadow_atlas: texture_depth_2d;

struct ForwardOutput {
    @location(0) color: vec4<f32>,
    @location(1) emissive: vec4<f32>,
};

const PI: f32 = 3.14159265;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * d * d, 0.0001);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let k = (roughness + 1.0) * (roughness + 1.0) / 8.0;
    return (n_dot_v / (n_dot_v * (1.0 - k) + k)) * (n_dot_l / (n_dot_l * (1.0 - k) + k));
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (vec3<f32>(1.0) - f0) * pow(1.0 - cos_theta, 5.0);
}

fn shadow_factor(world_position: vec3<f32>) -> f32 {
    let cascade_count = min(frame.params.z, 4u);
    if (cascade_count == 0u) {
        return 1.0;
    }
    let view_distance = -(frame.view * vec4<f32>(world_position, 1.0)).z;
    var cascade = cascade_count - 1u;
    for (var i = 0u; i < cascade_count; i = i + 1u) {
        if (view_distance <= frame.cascade_splits[i]) {
            cascade = i;
            break;
        }
    }
    let clip = frame.cascade_view_projection[cascade] * vec4<f32>(world_position, 1.0);
    let ndc = clip.xyz / clip.w;
    if (any(abs(ndc.xy) > vec2<f32>(1.0)) || ndc.z > 1.0) {
        return 1.0;
    }
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    let quadrant = vec2<f32>(f32(cascade % 2u), f32(cascade / 2u));
    let atlas_size = vec2<i32>(textureDimensions(shadow_atlas));
    let texel = vec2<i32>((quadrant + uv) * 0.5 * vec2<f32>(atlas_size));
    let stored = textureLoad(shadow_atlas, clamp(texel, vec2<i32>(0), atlas_size - vec2<i32>(1)), 0);
    return select(0.0, 1.0, ndc.z - 0.002 <= stored);
}

fn shade_light(
    light: Light,
    index: u32,
    surface: Surface,
    position: vec3<f32>,
    view_dir: vec3<f32>,
    f0: vec3<f32>,
    roughness: f32,
) -> vec3<f32> {
    var to_light = normalize(-light.position.xyz);
    var attenuation = 1.0;
    if (light.position.w != 0.0) {
        let offset = light.position.xyz - position;
        let light_distance = length(offset);
        to_light = offset / max(light_distance, 0.0001);
        let ratio = light_distance / max(light.params.x, 0.0001);
        let falloff = clamp(1.0 - ratio * ratio * ratio * ratio, 0.0, 1.0);
        attenuation = falloff * falloff / (light_distance * light_distance + 1.0);
    }
    if (index == frame.params.w) {
        attenuation = attenuation * shadow_factor(position);
    }

    let n = surface.normal;
    let n_dot_l = max(dot(n, to_light), 0.0);
    let n_dot_v = max(dot(n, view_dir), 0.0001);
    let half_vector = normalize(view_dir + to_light);
    let fresnel = fresnel_schlick(max(dot(half_vector, view_dir), 0.0), f0);
    let specular = distribution_ggx(max(dot(n, half_vector), 0.0), roughness)
        * geometry_smith(n_dot_v, n_dot_l, roughness)
        * fresnel / max(4.0 * n_dot_v * n_dot_l, 0.0001);
    let diffuse = (vec3<f32>(1.0) - fresnel) * (1.0 - surface.metallic) * surface.base_color.rgb / PI;
    return (diffuse + specular) * light.color.rgb * light.color.w * n_dot_l * attenuation;
}

@fragment
fn forward_main(in: SceneVertex) -> ForwardOutput {
    let instance = instances[in.instance];
    let view_dir = normalize(frame.camera_position.xyz - in.world_position);
    let surface = evaluate_material(instance.material, in.uv, normalize(in.normal), view_dir);
    if (surface.alpha_mode == 1u && surface.alpha < surface.alpha_cutoff) {
        discard;
    }

    let roughness = clamp(surface.roughness, 0.04, 1.0);
    let f0 = mix(vec3<f32>(0.04), surface.base_color.rgb, surface.metallic);
    let tiles = frame.counts.zw;
    let tile = min(vec2<u32>(in.position.xy) / LIGHT_TILE_SIZE, tiles - vec2<u32>(1u));
    let mask = light_grid[tile.y * tiles.x + tile.x];

    var color = surface.base_color.rgb * 0.03 * surface.ao;
    let count = min(frame.counts.x, 32u);
    for (var i = 0u; i < count; i = i + 1u) {
        if ((mask & (1u << i)) != 0u) {
            color = color + shade_light(lights[i], i, surface, in.world_position, view_dir, f0, roughness);
        }
    }

    var out: ForwardOutput;
    out.color = vec4<f32>(color, surface.alpha);
    out.emissive = vec4<f32>(surface.emissive, 1.0);
    return out;
}
";

pub const PROGRAM: ProgramDesc = ProgramDesc {
    label: "Forward MRT",
    sources: &[FRAME_WGSL, MESH_WGSL, SCENE_VERTEX_WGSL, MATERIAL_VM_WGSL, FORWARD_SHADER],
    vertex: Some("scene_main"),
    fragment: Some("forward_main"),
    compute: None,
    depth: Some(DepthState {
        write: false,
        compare: CompareFunction::LessEqual,
    }),
    blend: BlendMode::Replace,
    cull_back_faces: true,
};

pub fn hdr_desc() -> TextureDesc {
    TextureDesc::new(
        Extent::FULL_FRAMEBUFFER,
        TextureFormat::Rgba16F,
        TextureUsage::COLOR_ATTACH | TextureUsage::SAMPLED,
    )
}

/// Shades every instance through the material VM into lit colour and
/// emissive targets, depth-tested against the pre-pass.
pub struct ForwardMrtPass {
    pub shadows: bool,
}

impl ForwardMrtPass {
    pub const NAME: &'static str = "Forward.MRT";

    pub fn new(shadows: bool) -> Self {
        Self { shadows }
    }

    pub fn setup<B: FrameCommands + 'static>(&self, graph: &mut RenderGraph<B, FrameData>) {
        let shadows = self.shadows;
        graph.add_pass(
            Self::NAME,
            move |builder| {
                if shadows {
                    builder.read_texture(FrameResource::ShadowAtlas, Access::SAMPLED_READ);
                }
                builder.write_texture(FrameResource::DepthPre, Access::DEPTH_WRITE);
                builder.read_buffer(FrameResource::LightGrid, Access::SSBO_READ);
                builder.read_buffer(FrameResource::SceneLights, Access::SSBO_READ);
                builder.read_buffer(FrameResource::SceneInstances, Access::SSBO_READ);
                builder.read_buffer(FrameResource::MaterialHeaders, Access::SSBO_READ);
                builder.read_buffer(FrameResource::MaterialNodes, Access::SSBO_READ);
                builder.create_texture(FrameResource::HdrColor, hdr_desc(), Access::COLOR_WRITE);
                builder.create_texture(FrameResource::HdrEmissive, hdr_desc(), Access::COLOR_WRITE);
            },
            move |ctx| {
                let frame = ctx.user;
                let shadow = if shadows {
                    Bind::Texture(ctx.texture(FrameResource::ShadowAtlas))
                } else {
                    Bind::BlankDepth
                };
                let color = ctx.texture(FrameResource::HdrColor);
                let emissive = ctx.texture(FrameResource::HdrEmissive);
                let depth = ctx.texture(FrameResource::DepthPre);
                let bindings = vec![
                    Bind::Uniform(frame.uniform_bytes()),
                    Bind::Buffer(ctx.buffer(FrameResource::SceneInstances)),
                    Bind::Buffer(ctx.buffer(FrameResource::SceneLights)),
                    Bind::Buffer(ctx.buffer(FrameResource::LightGrid)),
                    Bind::Buffer(ctx.buffer(FrameResource::MaterialHeaders)),
                    Bind::Buffer(ctx.buffer(FrameResource::MaterialNodes)),
                    Bind::MaterialTextures,
                    shadow,
                ];
                ctx.backend.draw(DrawBatch {
                    label: Self::NAME,
                    program: Program::ForwardMrt,
                    color: vec![
                        Attachment::clear(color, [0.0, 0.0, 0.0, 1.0]),
                        Attachment::clear(emissive, [0.0; 4]),
                    ],
                    depth: Some(Attachment::load(depth)),
                    viewport: None,
                    bindings,
                    vertices: 0..36,
                    instances: 0..frame.instance_count,
                });
            },
        );
    }
}

use super::shader_common::{FRAME_WGSL, LIGHT_TILE_SIZE};
use super::{FrameData, FrameResource};
use crate::commands::{Bind, BlendMode, Dispatch, FrameCommands, Program, ProgramDesc};
use crate::scene::MAX_LIGHTS;
use lumen_graph::{Access, BufferDesc, RenderGraph};

const WORKGROUP_SIZE: u32 = 64;

// One mask bit per light.
const _: () = assert!(MAX_LIGHTS <= 32);

const CLUSTER_SHADER: &str = "
@group(0) @binding(1)
var depth_texture: texture_depth_2d;

@group(0) @binding(2)
var<storage, read> lights: array<Light>;

@group(0) @binding(3)
var<storage, read_write> light_grid: array<u32>;

fn view_distance(depth: f32) -> f32 {
    let view = frame.inverse_projection * vec4<f32>(0.0, 0.0, depth, 1.0);
    return -view.z / view.w;
}

@compute @workgroup_size(64)
fn cluster_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let tiles_x = frame.counts.z;
    let tiles_y = frame.counts.w;
    let tile = id.x;
    if (tile >= tiles_x * tiles_y) {
        return;
    }

    let origin = vec2<u32>(tile % tiles_x, tile / tiles_x) * LIGHT_TILE_SIZE;
    let size = textureDimensions(depth_texture);
    var min_depth = 1.0;
    var max_depth = 0.0;
    for (var y = 0u; y < LIGHT_TILE_SIZE; y = y + 1u) {
        for (var x = 0u; x < LIGHT_TILE_SIZE; x = x + 1u) {
            let texel = origin + vec2<u32>(x, y);
            if (texel.x < size.x && texel.y < size.y) {
                let depth = textureLoad(depth_texture, vec2<i32>(texel), 0);
                min_depth = min(min_depth, depth);
                max_depth = max(max_depth, depth);
            }
        }
    }
    let near_distance = view_distance(min_depth);
    let far_distance = view_distance(max(min_depth, max_depth));

    let tile_start = vec2<f32>(origin) * frame.viewport.zw * 2.0 - 1.0;
    let tile_end = vec2<f32>(origin + vec2<u32>(LIGHT_TILE_SIZE)) * frame.viewport.zw * 2.0 - 1.0;
    let ndc_min = vec2<f32>(tile_start.x, -tile_end.y);
    let ndc_max = vec2<f32>(tile_end.x, -tile_start.y);
    let scale = vec2<f32>(frame.projection[0][0], frame.projection[1][1]);

    var mask = 0u;
    let count = min(frame.counts.x, 32u);
    for (var i = 0u; i < count; i = i + 1u) {
        let light = lights[i];
        var visible = true;
        if (light.position.w != 0.0) {
            let radius = light.params.x;
            let view_position = (frame.view * vec4<f32>(light.position.xyz, 1.0)).xyz;
            let light_distance = -view_position.z;
            if (light_distance + radius < near_distance || light_distance - radius > far_distance) {
                visible = false;
            } else if (light_distance - radius > 0.1) {
                let clip = frame.projection * vec4<f32>(view_position, 1.0);
                let center = clip.xy / clip.w;
                let extent = scale * radius / (light_distance - radius);
                visible = all(center + extent >= ndc_min) && all(center - extent <= ndc_max);
            }
        }
        if (visible) {
            mask = mask | (1u << i);
        }
    }
    light_grid[tile] = mask;
}
";

pub const PROGRAM: ProgramDesc = ProgramDesc {
    label: "Light Cluster",
    sources: &[FRAME_WGSL, CLUSTER_SHADER],
    vertex: None,
    fragment: None,
    compute: Some("cluster_main"),
    depth: None,
    blend: BlendMode::Replace,
    cull_back_faces: false,
};

/// Tiles needed to cover a framebuffer.
pub fn light_tiles(width: u32, height: u32) -> (u32, u32) {
    (
        width.max(1).div_ceil(LIGHT_TILE_SIZE),
        height.max(1).div_ceil(LIGHT_TILE_SIZE),
    )
}

/// Bins lights into screen tiles: one bit per light in a u32 mask per tile.
pub struct LightClusterPass {
    pub tiles: (u32, u32),
}

impl LightClusterPass {
    pub const NAME: &'static str = "Light.Cluster";

    pub fn new(tiles: (u32, u32)) -> Self {
        Self { tiles }
    }

    pub fn grid_desc(&self) -> BufferDesc {
        BufferDesc::storage(self.tiles.0 as u64 * self.tiles.1 as u64 * 4)
    }

    pub fn setup<B: FrameCommands + 'static>(&self, graph: &mut RenderGraph<B, FrameData>) {
        let grid_desc = self.grid_desc();
        let tile_count = self.tiles.0 * self.tiles.1;
        graph.add_pass(
            Self::NAME,
            move |builder| {
                builder.read_texture(FrameResource::DepthPre, Access::SAMPLED_READ);
                builder.read_buffer(FrameResource::SceneLights, Access::SSBO_READ);
                builder.create_buffer(FrameResource::LightGrid, grid_desc, Access::SSBO_WRITE);
            },
            move |ctx| {
                let frame = ctx.user;
                let depth = ctx.texture(FrameResource::DepthPre);
                let lights = ctx.buffer(FrameResource::SceneLights);
                let grid = ctx.buffer(FrameResource::LightGrid);
                ctx.backend.dispatch(Dispatch {
                    label: Self::NAME,
                    program: Program::LightCluster,
                    bindings: vec![
                        Bind::Uniform(frame.uniform_bytes()),
                        Bind::Texture(depth),
                        Bind::Buffer(lights),
                        Bind::BufferRw(grid),
                    ],
                    groups: [tile_count.div_ceil(WORKGROUP_SIZE), 1, 1],
                });
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_cover_partial_edges() {
        assert_eq!(light_tiles(1280, 720), (80, 45));
        assert_eq!(light_tiles(1281, 721), (81, 46));
        assert_eq!(light_tiles(0, 0), (1, 1));
        assert_eq!(LightClusterPass::new((80, 45)).grid_desc().size, 80 * 45 * 4);
    }
}

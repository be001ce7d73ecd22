/// Per-frame constants shared by every program at binding 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniform {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    /// width, height, 1 / width, 1 / height
    pub viewport: [f32; 4],
    pub cascade_view_projection: [[[f32; 4]; 4]; 4],
    /// Far view distance of each cascade.
    pub cascade_splits: [f32; 4],
    /// lights, instances, light tiles x, light tiles y
    pub counts: [u32; 4],
    /// exposure, gamma, bloom intensity, bloom threshold
    pub tonemap: [f32; 4],
    pub selection_color: [f32; 4],
    /// selected instance, outline thickness, cascade count, shadow light
    pub params: [u32; 4],
}

impl Default for FrameUniform {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

/// Per-draw constants for passes that issue several draws with one program.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniform {
    pub matrix: [[f32; 4]; 4],
    pub params: [f32; 4],
}

pub const NO_INDEX: u32 = u32::MAX;

/// Side of a light culling tile in pixels.
pub const LIGHT_TILE_SIZE: u32 = 16;

pub const FRAME_WGSL: &str = "
struct Frame {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    camera_position: vec4<f32>,
    viewport: vec4<f32>,
    cascade_view_projection: array<mat4x4<f32>, 4>,
    cascade_splits: vec4<f32>,
    counts: vec4<u32>,
    tonemap: vec4<f32>,
    selection_color: vec4<f32>,
    params: vec4<u32>,
};

struct PassParams {
    matrix: mat4x4<f32>,
    params: vec4<f32>,
};

struct Instance {
    model: mat4x4<f32>,
    normal: mat4x4<f32>,
    material: u32,
    mesh: u32,
    id: u32,
    flags: u32,
};

struct Light {
    position: vec4<f32>,
    color: vec4<f32>,
    params: vec4<f32>,
};

const LIGHT_TILE_SIZE: u32 = 16u;

@group(0) @binding(0)
var<uniform> frame: Frame;
";

/// Procedural cube and plane, indexed by `@builtin(vertex_index)`.
pub const MESH_WGSL: &str = "
struct MeshVertex {
    position: vec3<f32>,
    normal: vec3<f32>,
    uv: vec2<f32>,
};

fn mesh_vertex(mesh: u32, vertex_index: u32) -> MeshVertex {
    var normals = array<vec3<f32>, 6>(
        vec3<f32>(1.0, 0.0, 0.0),
        vec3<f32>(-1.0, 0.0, 0.0),
        vec3<f32>(0.0, 1.0, 0.0),
        vec3<f32>(0.0, -1.0, 0.0),
        vec3<f32>(0.0, 0.0, 1.0),
        vec3<f32>(0.0, 0.0, -1.0),
    );
    var tangents = array<vec3<f32>, 6>(
        vec3<f32>(0.0, 0.0, -1.0),
        vec3<f32>(0.0, 0.0, 1.0),
        vec3<f32>(1.0, 0.0, 0.0),
        vec3<f32>(1.0, 0.0, 0.0),
        vec3<f32>(1.0, 0.0, 0.0),
        vec3<f32>(-1.0, 0.0, 0.0),
    );
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 1.0),
    );

    var out: MeshVertex;
    out.position = vec3<f32>(0.0);
    out.normal = vec3<f32>(0.0, 1.0, 0.0);
    out.uv = vec2<f32>(0.0);

    var face = vertex_index / 6u;
    var extrude = 0.5;
    if (mesh == 1u) {
        if (vertex_index >= 6u) {
            return out;
        }
        face = 2u;
        extrude = 0.0;
    }
    let n = normals[face];
    let t = tangents[face];
    let b = cross(n, t);
    let corner = corners[vertex_index % 6u];
    out.position = n * extrude + t * (corner.x - 0.5) + b * (corner.y - 0.5);
    out.normal = n;
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}
";

/// Fullscreen triangle with uv in [0, 1], y down.
pub const FULLSCREEN_WGSL: &str = "
struct FullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn fullscreen_main(@builtin(vertex_index) vertex_index: u32) -> FullscreenOutput {
    var out: FullscreenOutput;
    let x = f32((vertex_index & 1u) << 2u);
    let y = f32((vertex_index & 2u) << 1u);
    out.position = vec4<f32>(x - 1.0, 1.0 - y, 0.0, 1.0);
    out.uv = vec2<f32>(x * 0.5, y * 0.5);
    return out;
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts_match_wgsl() {
        assert_eq!(std::mem::size_of::<FrameUniform>(), 624);
        assert_eq!(std::mem::size_of::<FrameUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<PassUniform>(), 80);
    }
}

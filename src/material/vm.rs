use super::compiler::{INVALID_TEXTURE, MAX_REGS, MatOp, MatVmHeader, MatVmNode};
use nalgebra_glm as glm;

/// Interpolated inputs that seed the builtin registers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmInputs {
    pub uv: glm::Vec2,
    pub normal: glm::Vec3,
    pub view_dir: glm::Vec3,
}

impl Default for VmInputs {
    fn default() -> Self {
        Self {
            uv: glm::vec2(0.0, 0.0),
            normal: glm::vec3(0.0, 0.0, 1.0),
            view_dir: glm::vec3(0.0, 0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surface {
    pub base_color: glm::Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
    pub normal: glm::Vec3,
    pub emissive: glm::Vec3,
    pub alpha: f32,
}

impl Surface {
    /// Shading used for materials that failed to compile.
    pub fn fallback(normal: glm::Vec3) -> Self {
        Self {
            base_color: glm::vec4(0.5, 0.5, 0.5, 1.0),
            metallic: 0.0,
            roughness: 1.0,
            ao: 1.0,
            normal,
            emissive: glm::Vec3::zeros(),
            alpha: 1.0,
        }
    }
}

/// CPU interpreter for compiled materials with the same semantics as the
/// WGSL one in [`MATERIAL_VM_WGSL`].
pub struct MaterialVm;

impl MaterialVm {
    /// Runs `header`'s program out of the flattened `nodes` table. `sample`
    /// receives a texture array layer and a uv.
    pub fn evaluate(
        header: &MatVmHeader,
        nodes: &[MatVmNode],
        inputs: VmInputs,
        mut sample: impl FnMut(u32, glm::Vec2) -> glm::Vec4,
    ) -> Surface {
        if header.is_fallback() {
            return Surface::fallback(inputs.normal);
        }

        let mut regs = [glm::Vec4::zeros(); MAX_REGS as usize];
        regs[0] = glm::vec4(inputs.uv.x, inputs.uv.y, 0.0, 0.0);
        regs[1] = glm::vec4(inputs.normal.x, inputs.normal.y, inputs.normal.z, 0.0);
        regs[2] = glm::vec4(inputs.view_dir.x, inputs.view_dir.y, inputs.view_dir.z, 0.0);

        let start = header.node_offset as usize;
        let end = (start + header.node_count as usize).min(nodes.len());
        let reg = |index: u32| (index as usize).min(MAX_REGS as usize - 1);

        for node in nodes.get(start..end).unwrap_or_default() {
            let a = regs[reg(node.src[0])];
            let b = regs[reg(node.src[1])];
            let c = regs[reg(node.src[2])];
            let Some(op) = node.op() else {
                continue;
            };
            let result = match op {
                MatOp::Const4 => glm::make_vec4(&node.imm),
                MatOp::Add => a + b,
                MatOp::Sub => a - b,
                MatOp::Mul => a.component_mul(&b),
                MatOp::Div => glm::vec4(
                    safe_div(a.x, b.x),
                    safe_div(a.y, b.y),
                    safe_div(a.z, b.z),
                    safe_div(a.w, b.w),
                ),
                MatOp::Lerp => a + (b - a).component_mul(&c),
                MatOp::Dot3 => {
                    let dot = glm::dot(&a.xyz(), &b.xyz());
                    glm::vec4(dot, dot, dot, dot)
                }
                MatOp::Normalize3 => {
                    let length = glm::length(&a.xyz());
                    if length > 0.0 {
                        let n = a.xyz() / length;
                        glm::vec4(n.x, n.y, n.z, a.w)
                    } else {
                        a
                    }
                }
                MatOp::Saturate => a.map(|x| x.clamp(0.0, 1.0)),
                MatOp::OneMinus => a.map(|x| 1.0 - x),
                MatOp::Pow => glm::vec4(
                    a.x.max(0.0).powf(b.x),
                    a.y.max(0.0).powf(b.y),
                    a.z.max(0.0).powf(b.z),
                    a.w.max(0.0).powf(b.w),
                ),
                MatOp::Min => glm::min2(&a, &b),
                MatOp::Max => glm::max2(&a, &b),
                MatOp::Swizzle => {
                    let lane = |index: u32| a[((node.aux >> (index * 2)) & 3) as usize];
                    glm::vec4(lane(0), lane(1), lane(2), lane(3))
                }
                MatOp::Split => {
                    for lane in 0..4 {
                        regs[reg(node.dst + lane)] = glm::Vec4::repeat(a[lane as usize]);
                    }
                    continue;
                }
                MatOp::Append => glm::vec4(a.x, b.x, c.x, 1.0),
                MatOp::TexSample => {
                    let layer = if node.aux == INVALID_TEXTURE { 0 } else { node.aux };
                    sample(layer, a.xy())
                }
            };
            regs[reg(node.dst)] = result;
        }

        let mra = regs[reg(header.mra_reg)];
        let normal = regs[reg(header.normal_reg)].xyz();
        let normal = if glm::length(&normal) > 0.0 {
            glm::normalize(&normal)
        } else {
            inputs.normal
        };
        Surface {
            base_color: regs[reg(header.base_color_reg)],
            metallic: mra.x,
            roughness: mra.y,
            ao: mra.z,
            normal,
            emissive: regs[reg(header.emissive_reg)].xyz(),
            alpha: regs[reg(header.alpha_reg)].x,
        }
    }
}

fn safe_div(a: f32, b: f32) -> f32 {
    if b == 0.0 { 0.0 } else { a / b }
}

/// Shader side of the interpreter. The including module declares
/// `material_headers`, `material_nodes`, `material_textures` and
/// `material_sampler`.
pub const MATERIAL_VM_WGSL: &str = "
struct MaterialHeader {
    node_offset: u32,
    node_count: u32,
    reg_count: u32,
    base_color_reg: u32,
    mra_reg: u32,
    normal_reg: u32,
    emissive_reg: u32,
    alpha_reg: u32,
    alpha_mode: u32,
    alpha_cutoff: f32,
    flags: u32,
    pad: u32,
};

struct MaterialNode {
    op: u32,
    dst: u32,
    src0: u32,
    src1: u32,
    src2: u32,
    aux: u32,
    pad0: u32,
    pad1: u32,
    imm: vec4<f32>,
};

struct Surface {
    base_color: vec4<f32>,
    normal: vec3<f32>,
    metallic: f32,
    emissive: vec3<f32>,
    roughness: f32,
    ao: f32,
    alpha: f32,
    alpha_mode: u32,
    alpha_cutoff: f32,
};

fn safe_div(a: vec4<f32>, b: vec4<f32>) -> vec4<f32> {
    return select(a / b, vec4<f32>(0.0), b == vec4<f32>(0.0));
}

fn evaluate_material(index: u32, uv: vec2<f32>, normal: vec3<f32>, view_dir: vec3<f32>) -> Surface {
    let header = material_headers[index];
    var surface: Surface;
    surface.base_color = vec4<f32>(0.5, 0.5, 0.5, 1.0);
    surface.normal = normal;
    surface.metallic = 0.0;
    surface.roughness = 1.0;
    surface.ao = 1.0;
    surface.emissive = vec3<f32>(0.0);
    surface.alpha = 1.0;
    surface.alpha_mode = 0u;
    surface.alpha_cutoff = 0.5;
    if ((header.flags & 1u) != 0u) {
        return surface;
    }

    var regs: array<vec4<f32>, 32>;
    regs[0] = vec4<f32>(uv, 0.0, 0.0);
    regs[1] = vec4<f32>(normal, 0.0);
    regs[2] = vec4<f32>(view_dir, 0.0);

    for (var i = 0u; i < header.node_count; i = i + 1u) {
        let node = material_nodes[header.node_offset + i];
        let a = regs[min(node.src0, 31u)];
        let b = regs[min(node.src1, 31u)];
        let c = regs[min(node.src2, 31u)];
        let dst = min(node.dst, 31u);
        if (node.op == 14u) {
            regs[dst] = vec4<f32>(a.x);
            regs[min(dst + 1u, 31u)] = vec4<f32>(a.y);
            regs[min(dst + 2u, 31u)] = vec4<f32>(a.z);
            regs[min(dst + 3u, 31u)] = vec4<f32>(a.w);
        } else {
            var result = vec4<f32>(0.0);
            switch node.op {
                case 0u: { result = node.imm; }
                case 1u: { result = a + b; }
                case 2u: { result = a - b; }
                case 3u: { result = a * b; }
                case 4u: { result = safe_div(a, b); }
                case 5u: { result = a + (b - a) * c; }
                case 6u: { result = vec4<f32>(dot(a.xyz, b.xyz)); }
                case 7u: {
                    let length3 = length(a.xyz);
                    result = select(a, vec4<f32>(a.xyz / length3, a.w), length3 > 0.0);
                }
                case 8u: { result = clamp(a, vec4<f32>(0.0), vec4<f32>(1.0)); }
                case 9u: { result = vec4<f32>(1.0) - a; }
                case 10u: { result = pow(max(a, vec4<f32>(0.0)), b); }
                case 11u: { result = min(a, b); }
                case 12u: { result = max(a, b); }
                case 13u: {
                    result = vec4<f32>(
                        a[node.aux & 3u],
                        a[(node.aux >> 2u) & 3u],
                        a[(node.aux >> 4u) & 3u],
                        a[(node.aux >> 6u) & 3u],
                    );
                }
                case 15u: { result = vec4<f32>(a.x, b.x, c.x, 1.0); }
                case 16u: {
                    let layer = select(node.aux, 0u, node.aux == 0xffffffffu);
                    result = textureSampleLevel(material_textures, material_sampler, a.xy, layer, 0.0);
                }
                default: {}
            }
            regs[dst] = result;
        }
    }

    let mra = regs[min(header.mra_reg, 31u)];
    let n = regs[min(header.normal_reg, 31u)].xyz;
    surface.base_color = regs[min(header.base_color_reg, 31u)];
    surface.metallic = mra.x;
    surface.roughness = mra.y;
    surface.ao = mra.z;
    surface.normal = select(normal, normalize(n), length(n) > 0.0);
    surface.emissive = regs[min(header.emissive_reg, 31u)].xyz;
    surface.alpha = regs[min(header.alpha_reg, 31u)].x;
    surface.alpha_mode = header.alpha_mode;
    surface.alpha_cutoff = header.alpha_cutoff;
    return surface;
}
";

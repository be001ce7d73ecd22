use super::graph::{
    ColorSpace, MaterialGraph, MaterialNode, NodeId, PinDefault, SURFACE_ALPHA, SURFACE_AO,
    SURFACE_BASE_COLOR, SURFACE_EMISSIVE, SURFACE_METALLIC, SURFACE_NORMAL, SURFACE_ROUGHNESS,
};
use bytemuck::{Pod, Zeroable};
use std::collections::BTreeMap;

/// Register file size of the interpreter.
pub const MAX_REGS: u32 = 32;
/// Instruction limit per material.
pub const MAX_NODES: usize = 64;
/// Registers below this hold the builtins.
pub const FIRST_FREE_REG: u32 = 3;
/// `TexSample` aux value for a texture that could not be resolved.
pub const INVALID_TEXTURE: u32 = u32::MAX;

pub const HEADER_FLAG_FALLBACK: u32 = 1;

/// Instruction set. The discriminants are decoded by the shader interpreter,
/// so the order must never change.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatOp {
    Const4 = 0,
    Add,
    Sub,
    Mul,
    Div,
    Lerp,
    Dot3,
    Normalize3,
    Saturate,
    OneMinus,
    Pow,
    Min,
    Max,
    Swizzle,
    Split,
    Append,
    TexSample,
}

impl MatOp {
    const ALL: [MatOp; 17] = [
        MatOp::Const4,
        MatOp::Add,
        MatOp::Sub,
        MatOp::Mul,
        MatOp::Div,
        MatOp::Lerp,
        MatOp::Dot3,
        MatOp::Normalize3,
        MatOp::Saturate,
        MatOp::OneMinus,
        MatOp::Pow,
        MatOp::Min,
        MatOp::Max,
        MatOp::Swizzle,
        MatOp::Split,
        MatOp::Append,
        MatOp::TexSample,
    ];

    pub fn from_u32(op: u32) -> Option<MatOp> {
        Self::ALL.get(op as usize).copied()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct MatVmNode {
    pub op: u32,
    pub dst: u32,
    pub src: [u32; 3],
    pub aux: u32,
    pub _pad: [u32; 2],
    pub imm: [f32; 4],
}

impl MatVmNode {
    pub fn op(&self) -> Option<MatOp> {
        MatOp::from_u32(self.op)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct MatVmHeader {
    pub node_offset: u32,
    pub node_count: u32,
    pub reg_count: u32,
    pub base_color_reg: u32,
    /// metallic, roughness and ao packed into x, y and z.
    pub mra_reg: u32,
    pub normal_reg: u32,
    pub emissive_reg: u32,
    pub alpha_reg: u32,
    pub alpha_mode: u32,
    pub alpha_cutoff: f32,
    pub flags: u32,
    pub _pad: u32,
}

impl MatVmHeader {
    /// Header for a material without a usable program.
    pub fn fallback() -> Self {
        Self {
            flags: HEADER_FLAG_FALLBACK,
            alpha_cutoff: 0.5,
            ..Self::default()
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.flags & HEADER_FLAG_FALLBACK != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureBinding {
    pub path: String,
    pub color_space: ColorSpace,
}

/// Compiled program. `TexSample` aux values index `textures` until the
/// material system rewrites them to texture array layers.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMaterial {
    pub header: MatVmHeader,
    pub nodes: Vec<MatVmNode>,
    pub textures: Vec<TextureBinding>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MaterialCompileError {
    #[error("material has no SurfaceOutput node")]
    MissingSurfaceOutput,

    #[error("material has {count} SurfaceOutput nodes, expected exactly one")]
    MultipleSurfaceOutputs { count: usize },

    #[error("{node} ({label}) feeds into itself through a link cycle")]
    Cycle { node: NodeId, label: &'static str },

    #[error("input {pin} of {node} is linked to missing {missing}")]
    DanglingLink { node: NodeId, pin: u8, missing: NodeId },

    #[error("link into input {pin} of {node} does not match any pin")]
    InvalidPin { node: NodeId, pin: u8 },

    #[error("material needs more than {max} registers")]
    RegisterOverflow { max: u32 },

    /// Raised as soon as the nesting depth passes the limit, before the
    /// recursion can exhaust the stack. Every nested node emits at least one
    /// instruction. The count check after compiling is a backstop, since the
    /// register file fills up first.
    #[error("material compiles to {count} instructions, the limit is {max}")]
    InstructionOverflow { count: usize, max: usize },
}

pub type CompileResult<T> = std::result::Result<T, MaterialCompileError>;

/// Lowers a material graph to register-machine code. Every node compiles at
/// most once; its output registers are cached and shared by all consumers.
#[derive(Debug, Default)]
pub struct MaterialGraphCompiler {
    code: Vec<MatVmNode>,
    // `None` while the node is being compiled.
    outputs: BTreeMap<NodeId, Option<[u32; 4]>>,
    next_reg: u32,
    textures: Vec<TextureBinding>,
    depth: usize,
}

impl MaterialGraphCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&mut self, graph: &MaterialGraph) -> CompileResult<CompiledMaterial> {
        self.code.clear();
        self.outputs.clear();
        self.textures.clear();
        self.next_reg = FIRST_FREE_REG;
        self.depth = 0;

        let sink = match graph.surface_outputs().as_slice() {
            [] => return Err(MaterialCompileError::MissingSurfaceOutput),
            [sink] => *sink,
            sinks => {
                return Err(MaterialCompileError::MultipleSurfaceOutputs { count: sinks.len() });
            }
        };
        check_links(graph)?;

        let base_color_reg = self.input_reg(graph, sink, SURFACE_BASE_COLOR)?;
        let metallic = self.input_reg(graph, sink, SURFACE_METALLIC)?;
        let roughness = self.input_reg(graph, sink, SURFACE_ROUGHNESS)?;
        let normal_reg = self.input_reg(graph, sink, SURFACE_NORMAL)?;
        let ao = self.input_reg(graph, sink, SURFACE_AO)?;
        let emissive_reg = self.input_reg(graph, sink, SURFACE_EMISSIVE)?;
        let alpha_reg = self.input_reg(graph, sink, SURFACE_ALPHA)?;

        let mra_reg = self.alloc_reg()?;
        self.emit(MatOp::Append, mra_reg, [metallic, roughness, ao], 0, [0.0; 4]);

        if self.code.len() > MAX_NODES {
            return Err(MaterialCompileError::InstructionOverflow {
                count: self.code.len(),
                max: MAX_NODES,
            });
        }

        let header = MatVmHeader {
            node_offset: 0,
            node_count: self.code.len() as u32,
            reg_count: self.next_reg,
            base_color_reg,
            mra_reg,
            normal_reg,
            emissive_reg,
            alpha_reg,
            alpha_mode: graph.alpha_mode.as_u32(),
            alpha_cutoff: graph.alpha_cutoff,
            flags: 0,
            _pad: 0,
        };
        Ok(CompiledMaterial {
            header,
            nodes: std::mem::take(&mut self.code),
            textures: std::mem::take(&mut self.textures),
        })
    }

    fn alloc_reg(&mut self) -> CompileResult<u32> {
        self.alloc_regs(1)
    }

    fn alloc_regs(&mut self, count: u32) -> CompileResult<u32> {
        if self.next_reg + count > MAX_REGS {
            return Err(MaterialCompileError::RegisterOverflow { max: MAX_REGS });
        }
        let first = self.next_reg;
        self.next_reg += count;
        Ok(first)
    }

    fn emit(&mut self, op: MatOp, dst: u32, src: [u32; 3], aux: u32, imm: [f32; 4]) {
        self.code.push(MatVmNode {
            op: op as u32,
            dst,
            src,
            aux,
            _pad: [0; 2],
            imm,
        });
    }

    fn constant(&mut self, imm: [f32; 4]) -> CompileResult<u32> {
        let dst = self.alloc_reg()?;
        self.emit(MatOp::Const4, dst, [0; 3], 0, imm);
        Ok(dst)
    }

    /// Register holding the value of `node`'s input `pin`. Unconnected pins
    /// get their authored default as a constant, or a builtin register.
    fn input_reg(&mut self, graph: &MaterialGraph, node: NodeId, pin: u8) -> CompileResult<u32> {
        if let Some(output) = graph.link(node, pin) {
            let registers = self.compile_node(graph, output.node)?;
            return Ok(registers[output.pin as usize]);
        }
        let default = graph
            .node(node)
            .and_then(|node| node.pin_default(pin))
            .ok_or(MaterialCompileError::InvalidPin { node, pin })?;
        match default {
            PinDefault::Builtin(builtin) => Ok(builtin.register()),
            PinDefault::Value(value) => self.constant(value),
        }
    }

    fn compile_node(&mut self, graph: &MaterialGraph, id: NodeId) -> CompileResult<[u32; 4]> {
        if self.depth >= MAX_NODES {
            return Err(MaterialCompileError::InstructionOverflow {
                count: self.depth + 1,
                max: MAX_NODES,
            });
        }
        self.depth += 1;
        let registers = self.lower_node(graph, id);
        self.depth -= 1;
        registers
    }

    fn lower_node(&mut self, graph: &MaterialGraph, id: NodeId) -> CompileResult<[u32; 4]> {
        let node = graph
            .node(id)
            .ok_or(MaterialCompileError::InvalidPin { node: id, pin: 0 })?;
        match self.outputs.get(&id) {
            Some(Some(registers)) => return Ok(*registers),
            Some(None) => {
                return Err(MaterialCompileError::Cycle {
                    node: id,
                    label: node.kind.label(),
                });
            }
            None => {}
        }
        self.outputs.insert(id, None);

        let registers = match &node.kind {
            MaterialNode::ConstFloat(value) => [self.constant([*value; 4])?; 4],
            MaterialNode::ConstColor(color) => [self.constant(*color)?; 4],
            MaterialNode::Uv0 => [0; 4],
            MaterialNode::NormalWs => [1; 4],
            MaterialNode::ViewDirWs => [2; 4],
            MaterialNode::TextureSample { path, color_space } => {
                let uv = self.input_reg(graph, id, 0)?;
                let binding = TextureBinding {
                    path: path.clone(),
                    color_space: *color_space,
                };
                let slot = match self.textures.iter().position(|existing| *existing == binding) {
                    Some(slot) => slot,
                    None => {
                        self.textures.push(binding);
                        self.textures.len() - 1
                    }
                };
                let dst = self.alloc_reg()?;
                self.emit(MatOp::TexSample, dst, [uv, 0, 0], slot as u32, [0.0; 4]);
                [dst; 4]
            }
            MaterialNode::Add => self.operation(graph, id, MatOp::Add, 2, 0)?,
            MaterialNode::Sub => self.operation(graph, id, MatOp::Sub, 2, 0)?,
            MaterialNode::Mul => self.operation(graph, id, MatOp::Mul, 2, 0)?,
            MaterialNode::Div => self.operation(graph, id, MatOp::Div, 2, 0)?,
            MaterialNode::Min => self.operation(graph, id, MatOp::Min, 2, 0)?,
            MaterialNode::Max => self.operation(graph, id, MatOp::Max, 2, 0)?,
            MaterialNode::Lerp => self.operation(graph, id, MatOp::Lerp, 3, 0)?,
            MaterialNode::Dot => self.operation(graph, id, MatOp::Dot3, 2, 0)?,
            MaterialNode::Normalize => self.operation(graph, id, MatOp::Normalize3, 1, 0)?,
            MaterialNode::Saturate => self.operation(graph, id, MatOp::Saturate, 1, 0)?,
            MaterialNode::OneMinus => self.operation(graph, id, MatOp::OneMinus, 1, 0)?,
            MaterialNode::Power => self.operation(graph, id, MatOp::Pow, 2, 0)?,
            MaterialNode::Append => self.operation(graph, id, MatOp::Append, 3, 0)?,
            MaterialNode::Swizzle { lanes } => {
                let packed = lanes
                    .iter()
                    .enumerate()
                    .fold(0u32, |packed, (index, lane)| packed | (u32::from(*lane) & 3) << (index * 2));
                self.operation(graph, id, MatOp::Swizzle, 1, packed)?
            }
            MaterialNode::Split => {
                let input = self.input_reg(graph, id, 0)?;
                let first = self.alloc_regs(4)?;
                self.emit(MatOp::Split, first, [input, 0, 0], 0, [0.0; 4]);
                [first, first + 1, first + 2, first + 3]
            }
            MaterialNode::SurfaceOutput => {
                return Err(MaterialCompileError::InvalidPin { node: id, pin: 0 });
            }
        };

        self.outputs.insert(id, Some(registers));
        Ok(registers)
    }

    fn operation(
        &mut self,
        graph: &MaterialGraph,
        id: NodeId,
        op: MatOp,
        arity: u8,
        aux: u32,
    ) -> CompileResult<[u32; 4]> {
        let mut src = [0; 3];
        for pin in 0..arity {
            src[pin as usize] = self.input_reg(graph, id, pin)?;
        }
        let dst = self.alloc_reg()?;
        self.emit(op, dst, src, aux, [0.0; 4]);
        Ok([dst; 4])
    }
}

/// Compiles with a throwaway compiler.
pub fn compile(graph: &MaterialGraph) -> CompileResult<CompiledMaterial> {
    MaterialGraphCompiler::new().compile(graph)
}

fn check_links(graph: &MaterialGraph) -> CompileResult<()> {
    for (input, output) in graph.links() {
        let Some(target) = graph.node(input.node) else {
            return Err(MaterialCompileError::InvalidPin {
                node: input.node,
                pin: input.pin,
            });
        };
        if input.pin as usize >= target.kind.inputs().len() {
            return Err(MaterialCompileError::InvalidPin {
                node: input.node,
                pin: input.pin,
            });
        }
        let Some(source) = graph.node(output.node) else {
            return Err(MaterialCompileError::DanglingLink {
                node: input.node,
                pin: input.pin,
                missing: output.node,
            });
        };
        if output.pin >= source.kind.output_count() {
            return Err(MaterialCompileError::InvalidPin {
                node: input.node,
                pin: input.pin,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::graph::Builtin;

    fn surface() -> (MaterialGraph, NodeId) {
        let mut graph = MaterialGraph::new();
        let output = graph.add(MaterialNode::SurfaceOutput);
        (graph, output)
    }

    fn defining(compiled: &CompiledMaterial, register: u32) -> &MatVmNode {
        compiled
            .nodes
            .iter()
            .find(|node| node.dst == register)
            .unwrap_or_else(|| panic!("no instruction writes r{register}"))
    }

    #[test]
    fn unconnected_roughness_gets_its_authored_default() {
        let (mut graph, output) = surface();
        let metallic = graph.add(MaterialNode::ConstFloat(0.5));
        graph.connect(metallic, 0, output, SURFACE_METALLIC);

        let compiled = compile(&graph).unwrap();
        let pack = defining(&compiled, compiled.header.mra_reg);
        assert_eq!(pack.op(), Some(MatOp::Append));

        let roughness = defining(&compiled, pack.src[1]);
        assert_eq!(roughness.op(), Some(MatOp::Const4));
        assert_eq!(roughness.imm, [0.5; 4]);

        let metallic = defining(&compiled, pack.src[0]);
        assert_eq!(metallic.imm, [0.5; 4]);
    }

    #[test]
    fn normal_defaults_to_the_builtin_register() {
        let (graph, _) = surface();
        let compiled = compile(&graph).unwrap();
        assert_eq!(compiled.header.normal_reg, Builtin::NormalWs.register());
        assert!(compiled.nodes.iter().all(|node| node.dst >= FIRST_FREE_REG));
    }

    #[test]
    fn shared_nodes_compile_once() {
        let (mut graph, output) = surface();
        let color = graph.add(MaterialNode::ConstColor([1.0, 0.5, 0.25, 1.0]));
        let tint = graph.add(MaterialNode::Mul);
        graph.connect(color, 0, tint, 0);
        graph.connect(color, 0, tint, 1);
        graph.connect(tint, 0, output, SURFACE_BASE_COLOR);
        graph.connect(tint, 0, output, SURFACE_EMISSIVE);

        let compiled = compile(&graph).unwrap();
        let muls = compiled
            .nodes
            .iter()
            .filter(|node| node.op() == Some(MatOp::Mul))
            .count();
        let colors = compiled
            .nodes
            .iter()
            .filter(|node| node.imm == [1.0, 0.5, 0.25, 1.0])
            .count();
        assert_eq!(muls, 1);
        assert_eq!(colors, 1);
        assert_eq!(compiled.header.base_color_reg, compiled.header.emissive_reg);
    }

    #[test]
    fn split_allocates_four_consecutive_registers() {
        let (mut graph, output) = surface();
        let color = graph.add(MaterialNode::ConstColor([0.1, 0.2, 0.3, 0.4]));
        let split = graph.add(MaterialNode::Split);
        graph.connect(color, 0, split, 0);
        graph.connect(split, 1, output, SURFACE_METALLIC);
        graph.connect(split, 3, output, SURFACE_ALPHA);

        let compiled = compile(&graph).unwrap();
        let split = compiled
            .nodes
            .iter()
            .find(|node| node.op() == Some(MatOp::Split))
            .unwrap();
        assert_eq!(compiled.header.alpha_reg, split.dst + 3);
        let pack = defining(&compiled, compiled.header.mra_reg);
        assert_eq!(pack.src[0], split.dst + 1);
    }

    #[test]
    fn textures_are_deduplicated_per_material() {
        let (mut graph, output) = surface();
        let albedo = graph.add(MaterialNode::TextureSample {
            path: "bricks.png".into(),
            color_space: ColorSpace::Srgb,
        });
        let again = graph.add(MaterialNode::TextureSample {
            path: "bricks.png".into(),
            color_space: ColorSpace::Srgb,
        });
        let mask = graph.add(MaterialNode::TextureSample {
            path: "bricks.png".into(),
            color_space: ColorSpace::Linear,
        });
        graph.connect(albedo, 0, output, SURFACE_BASE_COLOR);
        graph.connect(again, 0, output, SURFACE_EMISSIVE);
        graph.connect(mask, 0, output, SURFACE_ALPHA);

        let compiled = compile(&graph).unwrap();
        assert_eq!(compiled.textures.len(), 2);
        let samples: Vec<u32> = compiled
            .nodes
            .iter()
            .filter(|node| node.op() == Some(MatOp::TexSample))
            .map(|node| node.aux)
            .collect();
        assert_eq!(samples, vec![0, 0, 1]);
        assert!(
            compiled
                .nodes
                .iter()
                .filter(|node| node.op() == Some(MatOp::TexSample))
                .all(|node| node.src[0] == Builtin::Uv0.register())
        );
    }

    #[test]
    fn missing_and_duplicate_sinks_are_errors() {
        let graph = MaterialGraph::new();
        assert_eq!(compile(&graph), Err(MaterialCompileError::MissingSurfaceOutput));

        let (mut graph, _) = surface();
        graph.add(MaterialNode::SurfaceOutput);
        assert_eq!(
            compile(&graph),
            Err(MaterialCompileError::MultipleSurfaceOutputs { count: 2 })
        );
    }

    #[test]
    fn link_cycles_are_reported() {
        let (mut graph, output) = surface();
        let a = graph.add(MaterialNode::Add);
        let b = graph.add(MaterialNode::Saturate);
        graph.connect(a, 0, b, 0);
        graph.connect(b, 0, a, 0);
        graph.connect(b, 0, output, SURFACE_BASE_COLOR);

        let error = compile(&graph).unwrap_err();
        assert!(matches!(error, MaterialCompileError::Cycle { .. }));
        assert!(error.to_string().contains("link cycle"));
    }

    #[test]
    fn links_to_missing_nodes_and_pins_are_reported() {
        let (mut graph, output) = surface();
        graph.connect(NodeId(42), 0, output, SURFACE_BASE_COLOR);
        assert!(matches!(
            compile(&graph),
            Err(MaterialCompileError::DanglingLink { missing: NodeId(42), .. })
        ));

        let (mut graph, output) = surface();
        let constant = graph.add(MaterialNode::ConstFloat(1.0));
        graph.connect(constant, 2, output, SURFACE_AO);
        assert!(matches!(compile(&graph), Err(MaterialCompileError::InvalidPin { .. })));
    }

    #[test]
    fn register_overflow_is_an_error_not_a_crash() {
        let (mut graph, output) = surface();
        let mut previous = graph.add(MaterialNode::ConstFloat(0.0));
        for _ in 0..MAX_REGS {
            let next = graph.add(MaterialNode::OneMinus);
            graph.connect(previous, 0, next, 0);
            previous = next;
        }
        graph.connect(previous, 0, output, SURFACE_METALLIC);

        assert_eq!(
            compile(&graph),
            Err(MaterialCompileError::RegisterOverflow { max: MAX_REGS })
        );
    }

    #[test]
    fn deep_chains_stop_at_the_instruction_limit() {
        let (mut graph, output) = surface();
        let mut previous = graph.add(MaterialNode::ConstFloat(0.0));
        for _ in 0..10_000 {
            let next = graph.add(MaterialNode::OneMinus);
            graph.connect(previous, 0, next, 0);
            previous = next;
        }
        graph.connect(previous, 0, output, SURFACE_METALLIC);

        let mut compiler = MaterialGraphCompiler::new();
        assert_eq!(
            compiler.compile(&graph),
            Err(MaterialCompileError::InstructionOverflow {
                count: MAX_NODES + 1,
                max: MAX_NODES,
            })
        );

        let (mut shallow, output) = surface();
        let one = shallow.add(MaterialNode::ConstFloat(1.0));
        shallow.connect(one, 0, output, SURFACE_METALLIC);
        assert_eq!(compiler.compile(&shallow), compile(&shallow));
    }

    #[test]
    fn compilation_is_byte_identical_across_runs() {
        let (mut graph, output) = surface();
        let uv = graph.add(MaterialNode::Uv0);
        let swizzle = graph.add(MaterialNode::Swizzle { lanes: [1, 0, 0, 3] });
        let lerp = graph.add(MaterialNode::Lerp);
        graph.connect(uv, 0, swizzle, 0);
        graph.connect(swizzle, 0, lerp, 2);
        graph.set_value(lerp, 0, [1.0, 0.0, 0.0, 1.0]);
        graph.connect(lerp, 0, output, SURFACE_BASE_COLOR);

        let mut compiler = MaterialGraphCompiler::new();
        let first = compiler.compile(&graph).unwrap();
        let second = compiler.compile(&graph).unwrap();
        assert_eq!(
            bytemuck::cast_slice::<MatVmNode, u8>(&first.nodes),
            bytemuck::cast_slice::<MatVmNode, u8>(&second.nodes)
        );
        assert_eq!(bytemuck::bytes_of(&first.header), bytemuck::bytes_of(&second.header));

        let swizzle = first
            .nodes
            .iter()
            .find(|node| node.op() == Some(MatOp::Swizzle))
            .unwrap();
        assert_eq!(swizzle.aux, 1 | 3 << 6);
    }

    #[test]
    fn gpu_records_have_the_interpreter_layout() {
        assert_eq!(std::mem::size_of::<MatVmNode>(), 48);
        assert_eq!(std::mem::size_of::<MatVmHeader>(), 48);
        assert_eq!(MatOp::TexSample as u32, 16);
        assert_eq!(MatOp::from_u32(14), Some(MatOp::Split));
        assert_eq!(MatOp::from_u32(17), None);
    }
}

//! Node-based materials compiled to a register VM.

mod compiler;
mod graph;
mod system;
mod vm;

pub use compiler::{
    CompileResult, CompiledMaterial, FIRST_FREE_REG, HEADER_FLAG_FALLBACK, INVALID_TEXTURE,
    MAX_NODES, MAX_REGS, MatOp, MatVmHeader, MatVmNode, MaterialCompileError,
    MaterialGraphCompiler, TextureBinding, compile,
};
pub use graph::*;
pub use system::{MaterialId, MaterialSystem, TextureResolver};
pub use vm::{MATERIAL_VM_WGSL, MaterialVm, Surface, VmInputs};

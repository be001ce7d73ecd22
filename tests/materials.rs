use lumen_core::material::{
    MAX_NODES, MAX_REGS, MaterialCompileError, MaterialGraph, MaterialGraphCompiler, MaterialNode,
    MaterialVm, SURFACE_BASE_COLOR, SURFACE_ROUGHNESS, VmInputs, compile,
};
use nalgebra_glm as glm;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Step {
    Add(f32),
    Sub(f32),
    Mul(f32),
    Min(f32),
    Max(f32),
}

impl Step {
    fn node(self) -> (MaterialNode, f32) {
        match self {
            Step::Add(value) => (MaterialNode::Add, value),
            Step::Sub(value) => (MaterialNode::Sub, value),
            Step::Mul(value) => (MaterialNode::Mul, value),
            Step::Min(value) => (MaterialNode::Min, value),
            Step::Max(value) => (MaterialNode::Max, value),
        }
    }

    fn apply(self, accumulator: f32) -> f32 {
        match self {
            Step::Add(value) => accumulator + value,
            Step::Sub(value) => accumulator - value,
            Step::Mul(value) => accumulator * value,
            Step::Min(value) => accumulator.min(value),
            Step::Max(value) => accumulator.max(value),
        }
    }
}

fn step() -> impl Strategy<Value = Step> {
    let value = -4.0f32..4.0;
    prop_oneof![
        value.clone().prop_map(Step::Add),
        value.clone().prop_map(Step::Sub),
        value.clone().prop_map(Step::Mul),
        value.clone().prop_map(Step::Min),
        value.prop_map(Step::Max),
    ]
}

/// A chain `((start op v0) op v1) ...` feeding one surface input.
fn chain(start: f32, steps: &[Step], pin: u8) -> MaterialGraph {
    let mut graph = MaterialGraph::new();
    let output = graph.add(MaterialNode::SurfaceOutput);
    let mut previous = graph.add(MaterialNode::ConstFloat(start));
    for step in steps {
        let (kind, value) = step.node();
        let node = graph.add(kind);
        let operand = graph.add(MaterialNode::ConstFloat(value));
        graph.connect(previous, 0, node, 0);
        graph.connect(operand, 0, node, 1);
        previous = node;
    }
    graph.connect(previous, 0, output, pin);
    graph
}

fn close(actual: f32, expected: f32) -> bool {
    (actual - expected).abs() <= 1e-4 * expected.abs().max(1.0)
}

proptest! {
    #[test]
    fn interpreter_matches_direct_evaluation(
        start in -4.0f32..4.0,
        steps in prop::collection::vec(step(), 0..8),
    ) {
        let expected = steps.iter().fold(start, |accumulator, step| step.apply(accumulator));
        let compiled = compile(&chain(start, &steps, SURFACE_BASE_COLOR)).unwrap();
        let surface = MaterialVm::evaluate(
            &compiled.header,
            &compiled.nodes,
            VmInputs::default(),
            |_, _| glm::Vec4::zeros(),
        );

        for lane in 0..4 {
            prop_assert!(
                close(surface.base_color[lane], expected),
                "lane {} is {}, expected {}",
                lane,
                surface.base_color[lane],
                expected
            );
        }
        prop_assert!(close(surface.roughness, 0.5));
    }

    #[test]
    fn long_chains_fail_cleanly_instead_of_overflowing(
        steps in prop::collection::vec(step(), 0..40),
    ) {
        match compile(&chain(1.0, &steps, SURFACE_ROUGHNESS)) {
            Ok(compiled) => {
                prop_assert!(compiled.header.reg_count <= MAX_REGS);
                prop_assert_eq!(compiled.header.node_count as usize, compiled.nodes.len());
                for node in &compiled.nodes {
                    prop_assert!(node.dst < MAX_REGS);
                }
            }
            Err(error) => {
                let expected = matches!(
                    error,
                    MaterialCompileError::RegisterOverflow { .. }
                        | MaterialCompileError::InstructionOverflow { .. }
                );
                prop_assert!(expected, "unexpected error {}", error);
            }
        }
    }

    #[test]
    fn a_reused_compiler_matches_a_fresh_one(
        first in prop::collection::vec(step(), 0..8),
        second in prop::collection::vec(step(), 0..8),
    ) {
        let mut compiler = MaterialGraphCompiler::new();
        compiler.compile(&chain(0.25, &first, SURFACE_BASE_COLOR)).unwrap();
        let reused = compiler.compile(&chain(0.75, &second, SURFACE_BASE_COLOR)).unwrap();
        let fresh = compile(&chain(0.75, &second, SURFACE_BASE_COLOR)).unwrap();
        prop_assert_eq!(reused, fresh);
    }
}

#[test]
fn very_long_chains_report_an_error_instead_of_exhausting_the_stack() {
    let steps = vec![Step::Add(0.5); 5_000];
    match compile(&chain(1.0, &steps, SURFACE_ROUGHNESS)) {
        Err(MaterialCompileError::InstructionOverflow { max, .. }) => assert_eq!(max, MAX_NODES),
        other => panic!("expected an instruction overflow, got {other:?}"),
    }
}

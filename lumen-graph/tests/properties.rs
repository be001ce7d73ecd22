use lumen_graph::{
    Access, BarrierBits, FrameExtents, HeadlessBackend, RenderGraph, RenderGraphConfig,
    RenderGraphError, RenderPassContext, RgResources, TextureDesc, TextureFormat, TextureUsage,
};
use proptest::prelude::*;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

const RESOURCES: usize = 3;

#[derive(Debug, Clone)]
struct PassSpec {
    uses: Vec<(usize, bool)>,
    after: Option<usize>,
}

impl PassSpec {
    /// Per-resource access after merging, true meaning write.
    fn merged(&self) -> Vec<(usize, bool)> {
        let mut merged: Vec<(usize, bool)> = Vec::new();
        for &(resource, write) in &self.uses {
            match merged.iter_mut().find(|(existing, _)| *existing == resource) {
                Some((_, merged_write)) => *merged_write |= write,
                None => merged.push((resource, write)),
            }
        }
        merged
    }
}

fn pass_spec(count: usize) -> impl Strategy<Value = PassSpec> {
    (
        prop::collection::vec((0..RESOURCES, any::<bool>()), 0..4),
        prop::option::weighted(0.3, 0..count),
    )
        .prop_map(|(uses, after)| PassSpec { uses, after })
}

fn arbitrary_program() -> impl Strategy<Value = Vec<PassSpec>> {
    (1usize..=8).prop_flat_map(|count| prop::collection::vec(pass_spec(count), count))
}

fn resource_name(resource: usize) -> String {
    format!("R{resource}")
}

fn pass_name(index: usize) -> String {
    format!("P{index}")
}

/// Ordering constraints a correct scheduler has to honour, in declaration
/// indices.
fn expected_edges(program: &[PassSpec]) -> BTreeSet<(usize, usize)> {
    let mut edges = BTreeSet::new();
    let mut last_writer: HashMap<usize, usize> = HashMap::new();
    let mut last_access: HashMap<usize, usize> = HashMap::new();
    for (index, pass) in program.iter().enumerate() {
        for (resource, write) in pass.merged() {
            if write {
                if let Some(&previous) = last_access.get(&resource) {
                    edges.insert((previous, index));
                }
                last_writer.insert(resource, index);
            } else if let Some(&writer) = last_writer.get(&resource) {
                edges.insert((writer, index));
            }
            last_access.insert(resource, index);
        }
        if let Some(after) = pass.after {
            edges.insert((after, index));
        }
    }
    edges
}

/// Kahn's algorithm picking the smallest ready index, or `None` on a cycle.
fn reference_order(count: usize, edges: &BTreeSet<(usize, usize)>) -> Option<Vec<usize>> {
    let mut in_degree = vec![0usize; count];
    for &(_, to) in edges {
        in_degree[to] += 1;
    }
    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|&index| in_degree[index] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::new();
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &(from, to) in edges {
            if from == index && from != to {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    ready.push(Reverse(to));
                }
            }
        }
    }
    (order.len() == count).then_some(order)
}

fn run(program: &[PassSpec]) -> Result<(Vec<String>, Vec<BarrierBits>), RenderGraphError> {
    let mut graph: RenderGraph<HeadlessBackend> =
        RenderGraph::with_config(RenderGraphConfig::default().validation(false));
    let mut resources = RgResources::new();
    let mut backend = HeadlessBackend::new();

    for (index, pass) in program.iter().enumerate() {
        let pass = pass.clone();
        graph.add_pass(
            pass_name(index),
            move |builder| {
                let desc = TextureDesc::explicit(
                    128,
                    128,
                    TextureFormat::Rgba8,
                    TextureUsage::COLOR_ATTACH | TextureUsage::SAMPLED,
                );
                for &(resource, write) in &pass.uses {
                    let name = resource_name(resource);
                    builder.declare_texture(&name, desc);
                    if write {
                        builder.write_texture(&name, Access::COLOR_WRITE);
                    } else {
                        builder.read_texture(&name, Access::SAMPLED_READ);
                    }
                }
                if let Some(after) = pass.after {
                    builder.depend_on(pass_name(after));
                }
            },
            |_| {},
        );
    }

    let frame = RenderPassContext::new(FrameExtents::uniform(256, 256), 1);
    let report = graph.try_execute(&frame, &(), &mut resources, &mut backend)?;
    Ok((
        report.schedule().into_iter().map(str::to_string).collect(),
        report.passes.iter().map(|pass| pass.barriers).collect(),
    ))
}

proptest! {
    #[test]
    fn schedule_respects_every_access_constraint(program in arbitrary_program()) {
        let edges = expected_edges(&program);
        let expected = reference_order(program.len(), &edges);

        match (run(&program), expected) {
            (Ok((schedule, _)), Some(order)) => {
                let position: HashMap<&str, usize> = schedule
                    .iter()
                    .enumerate()
                    .map(|(position, name)| (name.as_str(), position))
                    .collect();
                for &(from, to) in &edges {
                    prop_assert!(
                        position[pass_name(from).as_str()] < position[pass_name(to).as_str()],
                        "{} must run before {} in {:?}",
                        pass_name(from),
                        pass_name(to),
                        schedule
                    );
                }
                let expected: Vec<String> = order.into_iter().map(pass_name).collect();
                prop_assert_eq!(schedule, expected);
            }
            (Err(RenderGraphError::CyclicDependency { passes }), None) => {
                prop_assert!(!passes.is_empty());
            }
            (result, expected) => {
                prop_assert!(false, "scheduler returned {:?}, reference order {:?}", result, expected);
            }
        }
    }

    #[test]
    fn scheduling_is_deterministic(program in arbitrary_program()) {
        let first = run(&program);
        let second = run(&program);
        match (first, second) {
            (Ok(first), Ok(second)) => {
                prop_assert_eq!(first, second);
            }
            (Err(first), Err(second)) => {
                prop_assert_eq!(first.to_string(), second.to_string());
            }
            (first, second) => {
                prop_assert!(false, "runs disagree: {:?} vs {:?}", first, second);
            }
        }
    }
}

use crate::access::{Access, BarrierBits};
use crate::resources::RgHandle;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use std::fmt::Write;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    UnusedResource {
        resource: String,
    },
    /// Read during the frame but written by no pass. Tolerated, since the
    /// contents may come from an earlier frame or an upload outside the graph.
    NeverWritten {
        resource: String,
    },
    UsageMismatch {
        pass: String,
        resource: String,
        access: Access,
        declared: String,
    },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnusedResource { resource } => {
                write!(f, "'{resource}' is declared but no pass uses it")
            }
            Self::NeverWritten { resource } => {
                write!(f, "'{resource}' is read but never written this frame")
            }
            Self::UsageMismatch {
                pass,
                resource,
                access,
                declared,
            } => write!(
                f,
                "pass '{pass}' requests {access:?} on '{resource}' but its usage is {declared}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyKind {
    Texture(String),
    Buffer(String),
    Explicit,
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Texture(name) | Self::Buffer(name) => f.write_str(name),
            Self::Explicit => f.write_str("explicit"),
        }
    }
}

/// Edge between two passes, by declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: usize,
    pub to: usize,
    pub kind: DependencyKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledPass {
    pub name: String,
    pub declaration_order: usize,
    pub barriers: BarrierBits,
    pub cpu_time: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture,
    Buffer,
    ExternalBuffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub name: String,
    pub kind: ResourceKind,
    /// Positions in the scheduled order.
    pub first: usize,
    pub last: usize,
    pub first_pass: String,
    pub last_pass: String,
    pub description: String,
    pub handle: RgHandle,
}

impl ResourceLifetime {
    pub fn overlaps(&self, other: &ResourceLifetime) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

/// What one call to `execute` scheduled, bound and issued.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    pub passes: Vec<ScheduledPass>,
    pub edges: Vec<DependencyEdge>,
    pub lifetimes: Vec<ResourceLifetime>,
    pub warnings: Vec<ValidationWarning>,
}

impl FrameReport {
    pub fn schedule(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name.as_str()).collect()
    }

    pub fn position(&self, pass: &str) -> Option<usize> {
        self.passes.iter().position(|scheduled| scheduled.name == pass)
    }

    pub fn barriers_before(&self, pass: &str) -> BarrierBits {
        self.passes
            .iter()
            .find(|scheduled| scheduled.name == pass)
            .map(|scheduled| scheduled.barriers)
            .unwrap_or_default()
    }

    pub fn lifetime(&self, resource: &str) -> Option<&ResourceLifetime> {
        self.lifetimes.iter().find(|lifetime| lifetime.name == resource)
    }

    pub fn handle(&self, resource: &str) -> RgHandle {
        self.lifetime(resource)
            .map(|lifetime| lifetime.handle)
            .unwrap_or(RgHandle::INVALID)
    }

    pub fn total_cpu_time(&self) -> Duration {
        self.passes.iter().filter_map(|pass| pass.cpu_time).sum()
    }

    /// Schedule and dependency edges in Graphviz form.
    pub fn to_dot(&self) -> String {
        let mut graph = DiGraph::<String, String>::new();
        let mut by_declaration = std::collections::HashMap::new();
        for (position, pass) in self.passes.iter().enumerate() {
            let node = graph.add_node(format!("{position}: {}", pass.name));
            by_declaration.insert(pass.declaration_order, node);
        }
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (by_declaration.get(&edge.from), by_declaration.get(&edge.to)) {
                graph.add_edge(from, to, edge.kind.to_string());
            }
        }
        let mut dot = String::from("digraph RenderGraph {\n    rankdir=LR;\n");
        let _ = write!(dot, "{}", Dot::with_config(&graph, &[Config::GraphContentOnly]));
        dot.push_str("}\n");
        dot
    }

    pub fn lifetime_report(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "frame {} resource lifetimes", self.frame_index);
        for lifetime in &self.lifetimes {
            let _ = writeln!(
                report,
                "  {:<20} {:<16} [{}..{}] {} -> {} {}",
                lifetime.name,
                lifetime.description,
                lifetime.first,
                lifetime.last,
                lifetime.first_pass,
                lifetime.last_pass,
                lifetime.handle,
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> FrameReport {
        FrameReport {
            frame_index: 7,
            passes: vec![
                ScheduledPass {
                    name: "gbuffer".into(),
                    declaration_order: 0,
                    barriers: BarrierBits::empty(),
                    cpu_time: None,
                },
                ScheduledPass {
                    name: "lighting".into(),
                    declaration_order: 1,
                    barriers: BarrierBits::TEXTURE_FETCH,
                    cpu_time: None,
                },
            ],
            edges: vec![DependencyEdge {
                from: 0,
                to: 1,
                kind: DependencyKind::Texture("GBuffer.Albedo".into()),
            }],
            lifetimes: vec![ResourceLifetime {
                name: "GBuffer.Albedo".into(),
                kind: ResourceKind::Texture,
                first: 0,
                last: 1,
                first_pass: "gbuffer".into(),
                last_pass: "lighting".into(),
                description: "64x64 Rgba8".into(),
                handle: RgHandle { index: 0, generation: 1 },
            }],
            warnings: Vec::new(),
        }
    }

    #[test]
    fn dot_lists_passes_and_resource_edges() {
        let dot = report().to_dot();
        assert!(dot.starts_with("digraph RenderGraph {"));
        assert!(dot.contains("0: gbuffer"));
        assert!(dot.contains("1: lighting"));
        assert!(dot.contains("GBuffer.Albedo"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn lifetime_report_names_owning_passes() {
        let text = report().lifetime_report();
        assert!(text.contains("frame 7"));
        assert!(text.contains("GBuffer.Albedo"));
        assert!(text.contains("gbuffer -> lighting"));
        assert!(text.contains("64x64 Rgba8"));
    }
}

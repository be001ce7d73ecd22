use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ColorSpace {
    #[default]
    Srgb,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

impl AlphaMode {
    pub fn as_u32(self) -> u32 {
        match self {
            AlphaMode::Opaque => 0,
            AlphaMode::Mask => 1,
            AlphaMode::Blend => 2,
        }
    }
}

/// Per-fragment values the interpreter provides without instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Uv0,
    NormalWs,
    ViewDirWs,
}

impl Builtin {
    pub fn register(self) -> u32 {
        match self {
            Builtin::Uv0 => 0,
            Builtin::NormalWs => 1,
            Builtin::ViewDirWs => 2,
        }
    }
}

/// What an unconnected input pin evaluates to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PinDefault {
    Value([f32; 4]),
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinInfo {
    pub name: &'static str,
    pub default: PinDefault,
}

const fn value(name: &'static str, x: f32) -> PinInfo {
    PinInfo {
        name,
        default: PinDefault::Value([x, x, x, x]),
    }
}

const fn color(name: &'static str, rgba: [f32; 4]) -> PinInfo {
    PinInfo {
        name,
        default: PinDefault::Value(rgba),
    }
}

const fn builtin(name: &'static str, builtin: Builtin) -> PinInfo {
    PinInfo {
        name,
        default: PinDefault::Builtin(builtin),
    }
}

const NO_INPUTS: [PinInfo; 0] = [];
const UNARY: [PinInfo; 1] = [value("in", 0.0)];
const BINARY: [PinInfo; 2] = [value("a", 0.0), value("b", 0.0)];
const DIVIDE: [PinInfo; 2] = [value("a", 0.0), value("b", 1.0)];
const MULTIPLY: [PinInfo; 2] = [value("a", 1.0), value("b", 1.0)];
const LERP: [PinInfo; 3] = [value("a", 0.0), value("b", 1.0), value("t", 0.5)];
const POWER: [PinInfo; 2] = [value("base", 0.0), value("exponent", 1.0)];
const APPEND: [PinInfo; 3] = [value("x", 0.0), value("y", 0.0), value("z", 0.0)];
const TEXTURE_SAMPLE: [PinInfo; 1] = [builtin("uv", Builtin::Uv0)];
const NORMALIZE: [PinInfo; 1] = [builtin("in", Builtin::NormalWs)];

pub const SURFACE_BASE_COLOR: u8 = 0;
pub const SURFACE_METALLIC: u8 = 1;
pub const SURFACE_ROUGHNESS: u8 = 2;
pub const SURFACE_NORMAL: u8 = 3;
pub const SURFACE_AO: u8 = 4;
pub const SURFACE_EMISSIVE: u8 = 5;
pub const SURFACE_ALPHA: u8 = 6;

const SURFACE_OUTPUT: [PinInfo; 7] = [
    color("baseColor", [0.8, 0.8, 0.8, 1.0]),
    value("metallic", 0.0),
    value("roughness", 0.5),
    builtin("normalWS", Builtin::NormalWs),
    value("ao", 1.0),
    color("emissive", [0.0, 0.0, 0.0, 0.0]),
    value("alpha", 1.0),
];

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialNode {
    ConstFloat(f32),
    ConstColor([f32; 4]),
    Uv0,
    NormalWs,
    ViewDirWs,
    TextureSample { path: String, color_space: ColorSpace },
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Lerp,
    Dot,
    Normalize,
    Saturate,
    OneMinus,
    Power,
    /// Lane indices 0..=3 for x, y, z, w of the result.
    Swizzle { lanes: [u8; 4] },
    Split,
    Append,
    SurfaceOutput,
}

impl MaterialNode {
    pub fn inputs(&self) -> &'static [PinInfo] {
        match self {
            MaterialNode::ConstFloat(_)
            | MaterialNode::ConstColor(_)
            | MaterialNode::Uv0
            | MaterialNode::NormalWs
            | MaterialNode::ViewDirWs => &NO_INPUTS,
            MaterialNode::TextureSample { .. } => &TEXTURE_SAMPLE,
            MaterialNode::Add | MaterialNode::Sub | MaterialNode::Min | MaterialNode::Max | MaterialNode::Dot => {
                &BINARY
            }
            MaterialNode::Mul => &MULTIPLY,
            MaterialNode::Div => &DIVIDE,
            MaterialNode::Lerp => &LERP,
            MaterialNode::Normalize => &NORMALIZE,
            MaterialNode::Saturate | MaterialNode::OneMinus | MaterialNode::Swizzle { .. } | MaterialNode::Split => {
                &UNARY
            }
            MaterialNode::Power => &POWER,
            MaterialNode::Append => &APPEND,
            MaterialNode::SurfaceOutput => &SURFACE_OUTPUT,
        }
    }

    pub fn output_count(&self) -> u8 {
        match self {
            MaterialNode::SurfaceOutput => 0,
            MaterialNode::Split => 4,
            _ => 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MaterialNode::ConstFloat(_) => "ConstFloat",
            MaterialNode::ConstColor(_) => "ConstColor",
            MaterialNode::Uv0 => "UV0",
            MaterialNode::NormalWs => "NormalWS",
            MaterialNode::ViewDirWs => "ViewDirWS",
            MaterialNode::TextureSample { .. } => "TextureSample",
            MaterialNode::Add => "Add",
            MaterialNode::Sub => "Sub",
            MaterialNode::Mul => "Mul",
            MaterialNode::Div => "Div",
            MaterialNode::Min => "Min",
            MaterialNode::Max => "Max",
            MaterialNode::Lerp => "Lerp",
            MaterialNode::Dot => "Dot",
            MaterialNode::Normalize => "Normalize",
            MaterialNode::Saturate => "Saturate",
            MaterialNode::OneMinus => "OneMinus",
            MaterialNode::Power => "Power",
            MaterialNode::Swizzle { .. } => "Swizzle",
            MaterialNode::Split => "Split",
            MaterialNode::Append => "Append",
            MaterialNode::SurfaceOutput => "SurfaceOutput",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: MaterialNode,
    /// Authored values for unconnected pins, overriding the pin's default.
    pub values: BTreeMap<u8, [f32; 4]>,
}

impl Node {
    /// Value an unconnected pin evaluates to.
    pub fn pin_default(&self, pin: u8) -> Option<PinDefault> {
        let info = self.kind.inputs().get(pin as usize)?;
        Some(match self.values.get(&pin) {
            Some(value) => PinDefault::Value(*value),
            None => info.default,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputPin {
    pub node: NodeId,
    pub pin: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputPin {
    pub node: NodeId,
    pub pin: u8,
}

/// Authoring-side material node graph. Every input has at most one link.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialGraph {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeMap<InputPin, OutputPin>,
    next_id: u32,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
}

impl Default for MaterialGraph {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            next_id: 0,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
        }
    }
}

impl MaterialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: MaterialNode) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                values: BTreeMap::new(),
            },
        );
        id
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.links
            .retain(|input, output| input.node != id && output.node != id);
        self.nodes.remove(&id)
    }

    pub fn set_value(&mut self, node: NodeId, pin: u8, value: [f32; 4]) {
        if let Some(node) = self.nodes.get_mut(&node) {
            node.values.insert(pin, value);
        }
    }

    /// Links `from`'s output pin into `to`'s input pin, replacing any link
    /// already feeding that input.
    pub fn connect(&mut self, from: NodeId, output: u8, to: NodeId, input: u8) {
        self.links.insert(
            InputPin { node: to, pin: input },
            OutputPin {
                node: from,
                pin: output,
            },
        );
    }

    pub fn disconnect(&mut self, to: NodeId, input: u8) -> Option<OutputPin> {
        self.links.remove(&InputPin { node: to, pin: input })
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn link(&self, to: NodeId, input: u8) -> Option<OutputPin> {
        self.links.get(&InputPin { node: to, pin: input }).copied()
    }

    pub fn links(&self) -> impl Iterator<Item = (InputPin, OutputPin)> + '_ {
        self.links.iter().map(|(input, output)| (*input, *output))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every `SurfaceOutput` node in id order.
    pub fn surface_outputs(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.kind == MaterialNode::SurfaceOutput)
            .map(|(id, _)| *id)
            .collect()
    }

    /// A constant surface: base colour, metallic and roughness wired into
    /// a fresh `SurfaceOutput`.
    pub fn constant(base_color: [f32; 4], metallic: f32, roughness: f32) -> Self {
        let mut graph = Self::new();
        let output = graph.add(MaterialNode::SurfaceOutput);
        let color = graph.add(MaterialNode::ConstColor(base_color));
        graph.connect(color, 0, output, SURFACE_BASE_COLOR);
        graph.set_value(output, SURFACE_METALLIC, [metallic; 4]);
        graph.set_value(output, SURFACE_ROUGHNESS, [roughness; 4]);
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SURFACE_BASE_COLOR, PinDefault::Value([0.8, 0.8, 0.8, 1.0]))]
    #[case(SURFACE_METALLIC, PinDefault::Value([0.0; 4]))]
    #[case(SURFACE_ROUGHNESS, PinDefault::Value([0.5; 4]))]
    #[case(SURFACE_NORMAL, PinDefault::Builtin(Builtin::NormalWs))]
    #[case(SURFACE_AO, PinDefault::Value([1.0; 4]))]
    #[case(SURFACE_EMISSIVE, PinDefault::Value([0.0; 4]))]
    #[case(SURFACE_ALPHA, PinDefault::Value([1.0; 4]))]
    fn surface_output_defaults(#[case] pin: u8, #[case] expected: PinDefault) {
        let mut graph = MaterialGraph::new();
        let output = graph.add(MaterialNode::SurfaceOutput);
        assert_eq!(graph.node(output).unwrap().pin_default(pin), Some(expected));
    }

    #[test]
    fn authored_values_override_defaults() {
        let mut graph = MaterialGraph::new();
        let output = graph.add(MaterialNode::SurfaceOutput);
        graph.set_value(output, SURFACE_ROUGHNESS, [0.9; 4]);
        assert_eq!(
            graph.node(output).unwrap().pin_default(SURFACE_ROUGHNESS),
            Some(PinDefault::Value([0.9; 4]))
        );
        assert_eq!(graph.node(output).unwrap().pin_default(7), None);
    }

    #[test]
    fn removing_a_node_drops_its_links() {
        let mut graph = MaterialGraph::new();
        let output = graph.add(MaterialNode::SurfaceOutput);
        let constant = graph.add(MaterialNode::ConstFloat(1.0));
        graph.connect(constant, 0, output, SURFACE_METALLIC);
        graph.remove(constant);
        assert_eq!(graph.link(output, SURFACE_METALLIC), None);
        assert_eq!(graph.links().count(), 0);
    }

    #[test]
    fn connecting_twice_replaces_the_link() {
        let mut graph = MaterialGraph::new();
        let output = graph.add(MaterialNode::SurfaceOutput);
        let first = graph.add(MaterialNode::ConstFloat(0.1));
        let second = graph.add(MaterialNode::ConstFloat(0.2));
        graph.connect(first, 0, output, SURFACE_ALPHA);
        graph.connect(second, 0, output, SURFACE_ALPHA);
        assert_eq!(
            graph.link(output, SURFACE_ALPHA),
            Some(OutputPin { node: second, pin: 0 })
        );
    }
}

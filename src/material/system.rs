use super::compiler::{
    CompiledMaterial, INVALID_TEXTURE, MatOp, MatVmHeader, MatVmNode, MaterialGraphCompiler,
};
use super::graph::{ColorSpace, MaterialGraph};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MaterialId(pub u32);

/// Maps a texture reference to a texture array layer, or `INVALID_TEXTURE`.
pub trait TextureResolver {
    fn resolve(&mut self, path: &str, color_space: ColorSpace) -> u32;
}

struct MaterialEntry {
    name: String,
    graph: Arc<MaterialGraph>,
    revision: u64,
    compiled_revision: Option<u64>,
    program: Option<CompiledMaterial>,
    error: Option<String>,
}

/// Owns the authored material graphs and the flattened GPU tables built
/// from their compiled programs.
pub struct MaterialSystem {
    entries: Vec<MaterialEntry>,
    compiler: MaterialGraphCompiler,
    headers: Vec<MatVmHeader>,
    nodes: Vec<MatVmNode>,
    version: u64,
    stale: bool,
}

impl Default for MaterialSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialSystem {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            compiler: MaterialGraphCompiler::new(),
            headers: Vec::new(),
            nodes: Vec::new(),
            version: 0,
            stale: false,
        }
    }

    pub fn create(&mut self, name: impl Into<String>, graph: MaterialGraph) -> MaterialId {
        self.entries.push(MaterialEntry {
            name: name.into(),
            graph: Arc::new(graph),
            revision: 1,
            compiled_revision: None,
            program: None,
            error: None,
        });
        MaterialId(self.entries.len() as u32 - 1)
    }

    /// Replaces the authored graph. The compiler picks the new snapshot up on
    /// the next `sync`.
    pub fn update(&mut self, id: MaterialId, graph: MaterialGraph) {
        if let Some(entry) = self.entries.get_mut(id.0 as usize) {
            entry.graph = Arc::new(graph);
            entry.revision += 1;
        }
    }

    /// Immutable snapshot of the current graph, for editors to copy and modify.
    pub fn snapshot(&self, id: MaterialId) -> Option<Arc<MaterialGraph>> {
        self.entries.get(id.0 as usize).map(|entry| entry.graph.clone())
    }

    pub fn find(&self, name: &str) -> Option<MaterialId> {
        self.entries
            .iter()
            .position(|entry| entry.name == name)
            .map(|index| MaterialId(index as u32))
    }

    pub fn name(&self, id: MaterialId) -> Option<&str> {
        self.entries.get(id.0 as usize).map(|entry| entry.name.as_str())
    }

    /// Message of the last failed compile, cleared by a successful one.
    pub fn error(&self, id: MaterialId) -> Option<&str> {
        self.entries.get(id.0 as usize)?.error.as_deref()
    }

    pub fn program(&self, id: MaterialId) -> Option<&CompiledMaterial> {
        self.entries.get(id.0 as usize)?.program.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bumped whenever the flattened tables change.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn headers(&self) -> &[MatVmHeader] {
        &self.headers
    }

    pub fn nodes(&self) -> &[MatVmNode] {
        &self.nodes
    }

    /// Forces the next `sync` to rebuild the tables, for when texture
    /// resolution changed underneath compiled programs.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Recompiles materials whose graph changed and rebuilds the tables.
    /// Returns whether the tables changed.
    pub fn sync(&mut self, textures: &mut impl TextureResolver) -> bool {
        let mut dirty = std::mem::take(&mut self.stale) || self.headers.len() != self.entries.len();
        for entry in &mut self.entries {
            if entry.compiled_revision == Some(entry.revision) {
                continue;
            }
            let snapshot = entry.graph.clone();
            match self.compiler.compile(&snapshot) {
                Ok(program) => {
                    log::debug!(
                        "compiled material '{}': {} instructions, {} registers",
                        entry.name,
                        program.nodes.len(),
                        program.header.reg_count
                    );
                    entry.program = Some(program);
                    entry.error = None;
                }
                Err(error) => {
                    log::warn!("material '{}' failed to compile: {error}", entry.name);
                    entry.program = None;
                    entry.error = Some(error.to_string());
                }
            }
            entry.compiled_revision = Some(entry.revision);
            dirty = true;
        }

        if dirty {
            self.flatten(textures);
            self.version += 1;
        }
        dirty
    }

    fn flatten(&mut self, textures: &mut impl TextureResolver) {
        self.headers.clear();
        self.nodes.clear();
        for entry in &self.entries {
            let Some(program) = &entry.program else {
                self.headers.push(MatVmHeader::fallback());
                continue;
            };
            let layers: Vec<u32> = program
                .textures
                .iter()
                .map(|binding| textures.resolve(&binding.path, binding.color_space))
                .collect();

            let mut header = program.header;
            header.node_offset = self.nodes.len() as u32;
            self.headers.push(header);
            self.nodes.extend(program.nodes.iter().map(|node| {
                let mut node = *node;
                if node.op() == Some(MatOp::TexSample) {
                    node.aux = layers.get(node.aux as usize).copied().unwrap_or(INVALID_TEXTURE);
                }
                node
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::graph::{MaterialNode, SURFACE_BASE_COLOR};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Layers {
        layers: HashMap<(String, ColorSpace), u32>,
    }

    impl TextureResolver for Layers {
        fn resolve(&mut self, path: &str, color_space: ColorSpace) -> u32 {
            if path.starts_with("missing") {
                return INVALID_TEXTURE;
            }
            let next = self.layers.len() as u32 + 1;
            *self
                .layers
                .entry((path.to_string(), color_space))
                .or_insert(next)
        }
    }

    fn textured(path: &str) -> MaterialGraph {
        let mut graph = MaterialGraph::new();
        let output = graph.add(MaterialNode::SurfaceOutput);
        let texture = graph.add(MaterialNode::TextureSample {
            path: path.to_string(),
            color_space: ColorSpace::Srgb,
        });
        graph.connect(texture, 0, output, SURFACE_BASE_COLOR);
        graph
    }

    fn sample_layers(system: &MaterialSystem) -> Vec<u32> {
        system
            .nodes()
            .iter()
            .filter(|node| node.op() == Some(MatOp::TexSample))
            .map(|node| node.aux)
            .collect()
    }

    #[test]
    fn tables_are_flattened_with_offsets() {
        let mut system = MaterialSystem::new();
        let mut layers = Layers::default();
        let red = system.create("red", MaterialGraph::constant([1.0, 0.0, 0.0, 1.0], 0.0, 0.4));
        let bricks = system.create("bricks", textured("bricks.png"));

        assert!(system.sync(&mut layers));
        let headers = system.headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[red.0 as usize].node_offset, 0);
        assert_eq!(
            headers[bricks.0 as usize].node_offset,
            headers[red.0 as usize].node_count
        );
        assert_eq!(
            system.nodes().len() as u32,
            headers.iter().map(|header| header.node_count).sum::<u32>()
        );
        assert_eq!(sample_layers(&system), vec![1]);
    }

    #[test]
    fn only_dirty_materials_recompile() {
        let mut system = MaterialSystem::new();
        let mut layers = Layers::default();
        let id = system.create("red", MaterialGraph::constant([1.0, 0.0, 0.0, 1.0], 0.0, 0.4));
        system.sync(&mut layers);
        let version = system.version();

        assert!(!system.sync(&mut layers));
        assert_eq!(system.version(), version);

        system.update(id, MaterialGraph::constant([0.0, 1.0, 0.0, 1.0], 1.0, 0.2));
        assert!(system.sync(&mut layers));
        assert_eq!(system.version(), version + 1);
        assert_eq!(system.nodes()[0].imm, [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn failed_materials_get_a_fallback_header_and_an_error() {
        let mut system = MaterialSystem::new();
        let mut layers = Layers::default();
        let broken = system.create("broken", MaterialGraph::new());
        let fine = system.create("fine", MaterialGraph::constant([1.0; 4], 0.0, 0.5));
        system.sync(&mut layers);

        assert!(system.headers()[broken.0 as usize].is_fallback());
        assert!(system.error(broken).unwrap().contains("SurfaceOutput"));
        assert!(system.program(broken).is_none());
        assert!(!system.headers()[fine.0 as usize].is_fallback());
        assert_eq!(system.headers()[fine.0 as usize].node_offset, 0);

        system.update(broken, MaterialGraph::constant([0.2; 4], 0.0, 0.5));
        system.sync(&mut layers);
        assert_eq!(system.error(broken), None);
        assert!(!system.headers()[broken.0 as usize].is_fallback());
    }

    #[test]
    fn unresolved_textures_keep_the_invalid_sentinel() {
        let mut system = MaterialSystem::new();
        let mut layers = Layers::default();
        system.create("missing", textured("missing.png"));
        system.sync(&mut layers);
        assert_eq!(sample_layers(&system), vec![INVALID_TEXTURE]);
    }

    #[test]
    fn invalidate_reflattens_without_recompiling() {
        let mut system = MaterialSystem::new();
        let mut layers = Layers::default();
        system.create("crate", textured("crate.png"));
        assert!(system.sync(&mut layers));
        assert!(!system.sync(&mut layers));

        system.invalidate();
        let version = system.version();
        assert!(system.sync(&mut layers));
        assert_eq!(system.version(), version + 1);
        assert!(!system.sync(&mut layers));
    }

    #[test]
    fn snapshots_are_immutable() {
        let mut system = MaterialSystem::new();
        let id = system.create("red", MaterialGraph::constant([1.0, 0.0, 0.0, 1.0], 0.0, 0.4));
        let before = system.snapshot(id).unwrap();
        system.update(id, MaterialGraph::new());
        assert_eq!(before.node_count(), 2);
        assert_eq!(system.snapshot(id).unwrap().node_count(), 0);
        assert_eq!(system.find("red"), Some(id));
    }
}

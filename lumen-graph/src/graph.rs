use crate::access::{Access, BarrierBits, buffer_barrier, texture_barrier};
use crate::blackboard::{RenderResourceBlackboard, RgBufferRef, RgTextureRef};
use crate::builder::{PassUses, RenderPassBuilder};
use crate::context::RenderPassContext;
use crate::desc::{BufferDesc, ResolvedTextureDesc};
use crate::report::{
    DependencyEdge, DependencyKind, FrameReport, ResourceKind, ResourceLifetime, ScheduledPass,
    ValidationWarning,
};
use crate::resources::{GpuBackend, RgHandle, RgResources};
use crate::{RenderGraphError, Result};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

type DeclareFn = Box<dyn FnOnce(&mut RenderPassBuilder<'_>)>;
type ExecuteFn<B, C> = Box<dyn FnOnce(&mut PassContext<'_, B, C>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderGraphConfig {
    /// Warn about unused, never written and usage-mismatched resources.
    pub validation: bool,
    pub aliasing: bool,
    pub profiling: bool,
}

impl Default for RenderGraphConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            aliasing: true,
            profiling: false,
        }
    }
}

impl RenderGraphConfig {
    pub fn validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    pub fn aliasing(mut self, enabled: bool) -> Self {
        self.aliasing = enabled;
        self
    }

    pub fn profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }
}

/// Everything an execute callback may touch.
pub struct PassContext<'a, B: GpuBackend, C = ()> {
    pub pass_name: &'a str,
    pub frame: &'a RenderPassContext,
    pub user: &'a C,
    pub blackboard: &'a RenderResourceBlackboard,
    pub resources: &'a RgResources<B>,
    pub backend: &'a mut B,
    uses: &'a PassUses,
}

impl<'a, B: GpuBackend, C> PassContext<'a, B, C> {
    pub fn texture_handle(&self, name: impl AsRef<str>) -> RgHandle {
        let name = name.as_ref();
        let texture = self.blackboard.get_texture(name);
        if !self.uses.textures.iter().any(|(used, _)| *used == texture) {
            panic!("pass '{}' did not declare texture '{name}'", self.pass_name);
        }
        self.blackboard.texture_handle(texture)
    }

    pub fn texture(&self, name: impl AsRef<str>) -> &'a B::Texture {
        let handle = self.texture_handle(name);
        self.resources.tex(handle)
    }

    pub fn texture_size(&self, name: impl AsRef<str>) -> (u32, u32) {
        let handle = self.texture_handle(name);
        self.resources
            .tex_desc(handle)
            .map(|desc| (desc.width, desc.height))
            .unwrap_or((0, 0))
    }

    pub fn buffer_handle(&self, name: impl AsRef<str>) -> RgHandle {
        let name = name.as_ref();
        let buffer = self.blackboard.get_buffer(name);
        if !self.uses.buffers.iter().any(|(used, _)| *used == buffer) {
            panic!("pass '{}' did not declare buffer '{name}'", self.pass_name);
        }
        self.blackboard.buffer_handle(buffer)
    }

    pub fn buffer(&self, name: impl AsRef<str>) -> &'a B::Buffer {
        let handle = self.buffer_handle(name);
        self.resources.buf(handle)
    }

    pub fn buffer_desc(&self, name: impl AsRef<str>) -> BufferDesc {
        let buffer = self.blackboard.get_buffer(name.as_ref());
        *self.blackboard.buffer_desc(buffer)
    }
}

struct PassNode<B: GpuBackend, C> {
    name: String,
    declare: Option<DeclareFn>,
    execute: Option<ExecuteFn<B, C>>,
    uses: PassUses,
}

struct AliasEntry {
    desc: ResolvedTextureDesc,
    handle: RgHandle,
    frame: u64,
}

#[derive(Clone, Copy)]
struct Span {
    first: usize,
    last: usize,
}

/// Per-frame pass graph. Passes are added every frame, then `execute`
/// declares, schedules, binds and runs them in one go.
pub struct RenderGraph<B: GpuBackend, C = ()> {
    passes: Vec<PassNode<B, C>>,
    blackboard: RenderResourceBlackboard,
    external_buffers: Vec<(String, BufferDesc, RgHandle)>,
    alias_pool: Vec<AliasEntry>,
    config: RenderGraphConfig,
}

impl<B: GpuBackend, C> RenderGraph<B, C> {
    pub fn new() -> Self {
        Self::with_config(RenderGraphConfig::default())
    }

    pub fn with_config(config: RenderGraphConfig) -> Self {
        Self {
            passes: Vec::new(),
            blackboard: RenderResourceBlackboard::new(),
            external_buffers: Vec::new(),
            alias_pool: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> RenderGraphConfig {
        self.config
    }

    pub fn set_config(&mut self, config: RenderGraphConfig) {
        self.config = config;
    }

    pub fn enable_validation(&mut self, enabled: bool) {
        self.config.validation = enabled;
    }

    pub fn enable_aliasing(&mut self, enabled: bool) {
        self.config.aliasing = enabled;
    }

    pub fn enable_profiling(&mut self, enabled: bool) {
        self.config.profiling = enabled;
    }

    /// Resources bound during the last `execute`. Handles stay valid until
    /// the next frame starts reusing them.
    pub fn blackboard(&self) -> &RenderResourceBlackboard {
        &self.blackboard
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn add_pass<D, E>(&mut self, name: impl Into<String>, declare: D, execute: E)
    where
        D: FnOnce(&mut RenderPassBuilder<'_>) + 'static,
        E: FnOnce(&mut PassContext<'_, B, C>) + 'static,
    {
        let name = name.into();
        assert!(
            !self.passes.iter().any(|pass| pass.name == name),
            "pass '{name}' added twice in one frame"
        );
        self.passes.push(PassNode {
            name,
            declare: Some(Box::new(declare)),
            execute: Some(Box::new(execute)),
            uses: PassUses::default(),
        });
    }

    /// Binds a buffer owned outside the pool under `name` for the next frame.
    pub fn bind_external_buffer(&mut self, name: impl Into<String>, desc: BufferDesc, handle: RgHandle) {
        let name = name.into();
        self.external_buffers.retain(|(existing, _, _)| *existing != name);
        self.external_buffers.push((name, desc, handle));
    }

    pub fn execute(
        &mut self,
        frame: &RenderPassContext,
        user: &C,
        resources: &mut RgResources<B>,
        backend: &mut B,
    ) -> FrameReport {
        match self.try_execute(frame, user, resources, backend) {
            Ok(report) => report,
            Err(error) => panic!("{error}"),
        }
    }

    pub fn try_execute(
        &mut self,
        frame: &RenderPassContext,
        user: &C,
        resources: &mut RgResources<B>,
        backend: &mut B,
    ) -> Result<FrameReport> {
        let mut passes = std::mem::take(&mut self.passes);
        resources.begin_frame(frame.frame_index);

        self.blackboard.reset();
        for (name, desc, handle) in &self.external_buffers {
            self.blackboard.bind_external_buffer(name, *desc, *handle);
        }
        for pass in &mut passes {
            if let Some(declare) = pass.declare.take() {
                let mut builder = RenderPassBuilder::new(&pass.name, &mut self.blackboard, &mut pass.uses);
                declare(&mut builder);
            }
        }

        let warnings = if self.config.validation {
            validate(&passes, &self.blackboard)
        } else {
            Vec::new()
        };
        for warning in &warnings {
            log::warn!("render graph: {warning}");
        }

        let dependencies = build_dependencies(&passes, &self.blackboard)?;
        let order = topological_order(&passes, &dependencies)?;
        let (texture_spans, buffer_spans) = compute_lifetimes(&passes, &order, &self.blackboard);

        self.prune_alias_pool(resources);

        let mut active_textures: Vec<RgTextureRef> = Vec::new();
        let mut active_buffers: Vec<RgBufferRef> = Vec::new();
        let mut texture_state: Vec<Option<Access>> = vec![None; self.blackboard.texture_count()];
        let mut buffer_state: Vec<Option<Access>> = vec![None; self.blackboard.buffer_count()];
        let mut scheduled = Vec::with_capacity(order.len());

        for (position, &pass_index) in order.iter().enumerate() {
            self.retire(position, &texture_spans, &buffer_spans, &mut active_textures, &mut active_buffers, resources, frame.frame_index);

            let pass = &mut passes[pass_index];
            for &(texture, _) in &pass.uses.textures {
                if self.blackboard.try_texture_handle(texture).is_none() {
                    let desc = self.blackboard.texture_desc(texture).resolve(&frame.extents);
                    let handle = self.resolve_texture(texture, &desc, resources, backend);
                    self.blackboard.set_texture_handle(texture, handle);
                    active_textures.push(texture);
                }
            }
            for &(buffer, _) in &pass.uses.buffers {
                if self.blackboard.is_external_buffer(buffer) {
                    continue;
                }
                if self.blackboard.try_buffer_handle(buffer).is_none() {
                    let desc = *self.blackboard.buffer_desc(buffer);
                    let name = self.blackboard.buffer_name(buffer).to_string();
                    let handle = resources.acquire_buf(backend, &name, &desc);
                    self.blackboard.set_buffer_handle(buffer, handle);
                    active_buffers.push(buffer);
                }
            }

            let mut barriers = BarrierBits::empty();
            for &(texture, access) in &pass.uses.textures {
                if let Some(previous) = texture_state[texture.slot()] {
                    barriers |= texture_barrier(previous, access);
                }
            }
            for &(buffer, access) in &pass.uses.buffers {
                if let Some(previous) = buffer_state[buffer.slot()] {
                    barriers |= buffer_barrier(previous, access);
                }
            }
            if !barriers.is_empty() {
                log::trace!("barrier before '{}': {barriers:?}", pass.name);
                backend.memory_barrier(barriers);
            }

            let started = self.config.profiling.then(web_time::Instant::now);
            if let Some(execute) = pass.execute.take() {
                let mut context = PassContext {
                    pass_name: &pass.name,
                    frame,
                    user,
                    blackboard: &self.blackboard,
                    resources: &*resources,
                    backend: &mut *backend,
                    uses: &pass.uses,
                };
                execute(&mut context);
            }
            let cpu_time = started.map(|started| started.elapsed());

            for &(texture, access) in &pass.uses.textures {
                texture_state[texture.slot()] = Some(access);
            }
            for &(buffer, access) in &pass.uses.buffers {
                buffer_state[buffer.slot()] = Some(access);
            }

            scheduled.push(ScheduledPass {
                name: pass.name.clone(),
                declaration_order: pass_index,
                barriers,
                cpu_time,
            });
        }

        let lifetimes = self.describe_lifetimes(&passes, &order, &texture_spans, &buffer_spans, frame);
        self.end_frame(active_textures, active_buffers, resources, frame.frame_index);

        let edges = dependencies
            .edge_indices()
            .filter_map(|edge| {
                let (from, to) = dependencies.edge_endpoints(edge)?;
                Some(DependencyEdge {
                    from: from.index(),
                    to: to.index(),
                    kind: dependencies[edge].clone(),
                })
            })
            .collect();

        log::debug!(
            "frame {}: executed {} passes, {} textures, {} buffers",
            frame.frame_index,
            scheduled.len(),
            self.blackboard.texture_count(),
            self.blackboard.buffer_count()
        );

        Ok(FrameReport {
            frame_index: frame.frame_index,
            passes: scheduled,
            edges,
            lifetimes,
            warnings,
        })
    }

    fn resolve_texture(
        &mut self,
        texture: RgTextureRef,
        desc: &ResolvedTextureDesc,
        resources: &mut RgResources<B>,
        backend: &mut B,
    ) -> RgHandle {
        let name = self.blackboard.texture_name(texture).to_string();
        if self.config.aliasing
            && let Some(position) = self.alias_pool.iter().position(|entry| entry.desc == *desc)
        {
            let entry = self.alias_pool.remove(position);
            let handle = resources.reuse_tex(entry.handle, &name);
            log::trace!("alias: '{name}' takes {} as {handle}", entry.handle);
            return handle;
        }
        resources.acquire_tex(backend, &name, desc)
    }

    #[allow(clippy::too_many_arguments)]
    fn retire(
        &mut self,
        position: usize,
        texture_spans: &[Option<Span>],
        buffer_spans: &[Option<Span>],
        active_textures: &mut Vec<RgTextureRef>,
        active_buffers: &mut Vec<RgBufferRef>,
        resources: &mut RgResources<B>,
        frame: u64,
    ) {
        if !self.config.aliasing {
            return;
        }
        let ended = |span: Option<Span>| span.is_some_and(|span| span.last < position);

        let mut index = 0;
        while index < active_textures.len() {
            let texture = active_textures[index];
            if ended(texture_spans[texture.slot()]) {
                active_textures.remove(index);
                let handle = self.blackboard.texture_handle(texture);
                if let Some(desc) = resources.tex_desc(handle).copied() {
                    self.alias_pool.push(AliasEntry { desc, handle, frame });
                }
            } else {
                index += 1;
            }
        }

        let mut index = 0;
        while index < active_buffers.len() {
            let buffer = active_buffers[index];
            if ended(buffer_spans[buffer.slot()]) {
                active_buffers.remove(index);
                resources.release_buf(self.blackboard.buffer_handle(buffer));
            } else {
                index += 1;
            }
        }
    }

    fn prune_alias_pool(&mut self, resources: &mut RgResources<B>) {
        if !self.config.aliasing {
            for entry in self.alias_pool.drain(..) {
                if resources.is_tex_valid(entry.handle) {
                    resources.release_tex(entry.handle);
                }
            }
            return;
        }
        self.alias_pool
            .retain(|entry| resources.is_tex_valid(entry.handle));
    }

    fn end_frame(
        &mut self,
        active_textures: Vec<RgTextureRef>,
        active_buffers: Vec<RgBufferRef>,
        resources: &mut RgResources<B>,
        frame: u64,
    ) {
        // Entries carried from an earlier frame and not claimed this frame
        // go back to the pool so gc can reclaim them.
        let mut index = 0;
        while index < self.alias_pool.len() {
            if self.alias_pool[index].frame < frame {
                let entry = self.alias_pool.remove(index);
                resources.release_tex(entry.handle);
            } else {
                index += 1;
            }
        }

        for texture in active_textures {
            let handle = self.blackboard.texture_handle(texture);
            if self.config.aliasing {
                if let Some(desc) = resources.tex_desc(handle).copied() {
                    self.alias_pool.push(AliasEntry { desc, handle, frame });
                }
            } else {
                resources.release_tex(handle);
            }
        }
        for buffer in active_buffers {
            resources.release_buf(self.blackboard.buffer_handle(buffer));
        }
    }

    fn describe_lifetimes(
        &self,
        passes: &[PassNode<B, C>],
        order: &[usize],
        texture_spans: &[Option<Span>],
        buffer_spans: &[Option<Span>],
        frame: &RenderPassContext,
    ) -> Vec<ResourceLifetime> {
        let pass_name = |position: usize| passes[order[position]].name.clone();
        let mut lifetimes = Vec::new();
        for texture in self.blackboard.textures() {
            let Some(span) = texture_spans[texture.slot()] else {
                continue;
            };
            let handle = self.blackboard.texture_handle(texture);
            lifetimes.push(ResourceLifetime {
                name: self.blackboard.texture_name(texture).to_string(),
                kind: ResourceKind::Texture,
                first: span.first,
                last: span.last,
                first_pass: pass_name(span.first),
                last_pass: pass_name(span.last),
                description: self
                    .blackboard
                    .texture_desc(texture)
                    .resolve(&frame.extents)
                    .to_string(),
                handle,
            });
        }
        for buffer in self.blackboard.buffers() {
            let Some(span) = buffer_spans[buffer.slot()] else {
                continue;
            };
            let external = self.blackboard.is_external_buffer(buffer);
            lifetimes.push(ResourceLifetime {
                name: self.blackboard.buffer_name(buffer).to_string(),
                kind: if external {
                    ResourceKind::ExternalBuffer
                } else {
                    ResourceKind::Buffer
                },
                first: span.first,
                last: span.last,
                first_pass: pass_name(span.first),
                last_pass: pass_name(span.last),
                description: self.blackboard.buffer_desc(buffer).to_string(),
                handle: self.blackboard.buffer_handle(buffer),
            });
        }
        lifetimes
    }
}

impl<B: GpuBackend, C> Default for RenderGraph<B, C> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum ResourceKey {
    Texture(RgTextureRef),
    Buffer(RgBufferRef),
}

fn build_dependencies<B: GpuBackend, C>(
    passes: &[PassNode<B, C>],
    blackboard: &RenderResourceBlackboard,
) -> Result<DiGraph<usize, DependencyKind>> {
    let mut graph = DiGraph::with_capacity(passes.len(), passes.len() * 2);
    let nodes: Vec<NodeIndex> = (0..passes.len()).map(|index| graph.add_node(index)).collect();

    let mut last_writer: HashMap<ResourceKey, usize> = HashMap::new();
    let mut last_access: HashMap<ResourceKey, usize> = HashMap::new();

    let connect = |graph: &mut DiGraph<usize, DependencyKind>, from: usize, to: usize, kind: DependencyKind| {
        if from != to && graph.find_edge(nodes[from], nodes[to]).is_none() {
            graph.add_edge(nodes[from], nodes[to], kind);
        }
    };

    for (index, pass) in passes.iter().enumerate() {
        let uses = pass
            .uses
            .textures
            .iter()
            .map(|&(texture, access)| (ResourceKey::Texture(texture), access))
            .chain(
                pass.uses
                    .buffers
                    .iter()
                    .map(|&(buffer, access)| (ResourceKey::Buffer(buffer), access)),
            );
        for (key, access) in uses {
            let kind = || match key {
                ResourceKey::Texture(texture) => {
                    DependencyKind::Texture(blackboard.texture_name(texture).to_string())
                }
                ResourceKey::Buffer(buffer) => {
                    DependencyKind::Buffer(blackboard.buffer_name(buffer).to_string())
                }
            };
            if access.is_write() {
                if let Some(&previous) = last_access.get(&key) {
                    connect(&mut graph, previous, index, kind());
                }
                last_writer.insert(key, index);
            } else if let Some(&writer) = last_writer.get(&key) {
                connect(&mut graph, writer, index, kind());
            }
            last_access.insert(key, index);
        }
    }

    let by_name: HashMap<&str, usize> = passes
        .iter()
        .enumerate()
        .map(|(index, pass)| (pass.name.as_str(), index))
        .collect();
    for (index, pass) in passes.iter().enumerate() {
        for dependency in &pass.uses.after {
            let Some(&from) = by_name.get(dependency.as_str()) else {
                return Err(RenderGraphError::UnknownDependency {
                    pass: pass.name.clone(),
                    dependency: dependency.clone(),
                });
            };
            if from == index {
                graph.add_edge(nodes[index], nodes[index], DependencyKind::Explicit);
            } else {
                connect(&mut graph, from, index, DependencyKind::Explicit);
            }
        }
    }

    Ok(graph)
}

/// Kahn's algorithm, always taking the ready pass declared first.
fn topological_order<B: GpuBackend, C>(
    passes: &[PassNode<B, C>],
    graph: &DiGraph<usize, DependencyKind>,
) -> Result<Vec<usize>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|node| graph.neighbors_directed(node, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse(index))
        .collect();

    let mut order = Vec::with_capacity(passes.len());
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for next in graph.neighbors_directed(NodeIndex::new(index), Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }

    if order.len() != passes.len() {
        let mut cycle: Vec<String> = petgraph::algo::tarjan_scc(graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || graph.find_edge(component[0], component[0]).is_some()
            })
            .flatten()
            .map(|node| passes[node.index()].name.clone())
            .collect();
        cycle.sort();
        return Err(RenderGraphError::CyclicDependency {
            passes: cycle.join(", "),
        });
    }
    Ok(order)
}

fn compute_lifetimes<B: GpuBackend, C>(
    passes: &[PassNode<B, C>],
    order: &[usize],
    blackboard: &RenderResourceBlackboard,
) -> (Vec<Option<Span>>, Vec<Option<Span>>) {
    let mut textures: Vec<Option<Span>> = vec![None; blackboard.texture_count()];
    let mut buffers: Vec<Option<Span>> = vec![None; blackboard.buffer_count()];
    let touch = |span: &mut Option<Span>, position: usize| match span {
        Some(span) => span.last = position,
        None => {
            *span = Some(Span {
                first: position,
                last: position,
            })
        }
    };
    for (position, &pass_index) in order.iter().enumerate() {
        let uses = &passes[pass_index].uses;
        for &(texture, _) in &uses.textures {
            touch(&mut textures[texture.slot()], position);
        }
        for &(buffer, _) in &uses.buffers {
            touch(&mut buffers[buffer.slot()], position);
        }
    }
    (textures, buffers)
}

fn validate<B: GpuBackend, C>(
    passes: &[PassNode<B, C>],
    blackboard: &RenderResourceBlackboard,
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let mut texture_access = vec![Access::empty(); blackboard.texture_count()];
    let mut texture_used = vec![false; blackboard.texture_count()];
    let mut buffer_access = vec![Access::empty(); blackboard.buffer_count()];
    let mut buffer_used = vec![false; blackboard.buffer_count()];
    for pass in passes {
        for &(texture, access) in &pass.uses.textures {
            texture_access[texture.slot()] |= access;
            texture_used[texture.slot()] = true;
        }
        for &(buffer, access) in &pass.uses.buffers {
            buffer_access[buffer.slot()] |= access;
            buffer_used[buffer.slot()] = true;
        }
    }

    for texture in blackboard.textures() {
        let resource = blackboard.texture_name(texture).to_string();
        if !texture_used[texture.slot()] {
            warnings.push(ValidationWarning::UnusedResource { resource });
        } else if !texture_access[texture.slot()].is_write() {
            warnings.push(ValidationWarning::NeverWritten { resource });
        }
    }
    for buffer in blackboard.buffers() {
        let external = blackboard.is_external_buffer(buffer);
        let resource = blackboard.buffer_name(buffer).to_string();
        if !buffer_used[buffer.slot()] {
            warnings.push(ValidationWarning::UnusedResource { resource });
        } else if !external && !buffer_access[buffer.slot()].is_write() {
            warnings.push(ValidationWarning::NeverWritten { resource });
        }
    }

    for pass in passes {
        for &(texture, access) in &pass.uses.textures {
            let declared = blackboard.texture_desc(texture).usage;
            if !declared.contains(access.required_texture_usage()) {
                warnings.push(ValidationWarning::UsageMismatch {
                    pass: pass.name.clone(),
                    resource: blackboard.texture_name(texture).to_string(),
                    access,
                    declared: format!("{declared:?}"),
                });
            }
        }
        for &(buffer, access) in &pass.uses.buffers {
            let declared = blackboard.buffer_desc(buffer).usage;
            if !declared.contains(access.required_buffer_usage()) {
                warnings.push(ValidationWarning::UsageMismatch {
                    pass: pass.name.clone(),
                    resource: blackboard.buffer_name(buffer).to_string(),
                    access,
                    declared: format!("{declared:?}"),
                });
            }
        }
    }

    warnings
}

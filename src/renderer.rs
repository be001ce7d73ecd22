//! Per-frame orchestration: streams textures, keeps the material tables and
//! scene buffers current, builds the pass graph and runs it.

use crate::commands::FrameCommands;
use crate::material::MaterialSystem;
use crate::pass_configs::{PassConfigs, RendererConfig};
use crate::passes::light_cluster::light_tiles;
use crate::passes::shader_common::NO_INDEX;
use crate::passes::shadow_csm::{Cascades, cascades};
use crate::passes::{
    DepthPrepass, ForwardMrtPass, FrameData, FrameResource, FrameUniform, LightClusterPass, PickPass,
    PostFilters, SelectionPass, ShadowCsmPass, TonemapPass,
};
use crate::scene::{INSTANCE_FLAG_SELECTED, Light, MAX_LIGHTS, World};
use crate::textures::TextureLoader;
use lumen_graph::{
    BufferDesc, FrameExtents, FrameReport, RenderGraph, RenderPassContext, RgHandle, RgResources,
};

/// Smallest size an external buffer is created with.
const MIN_EXTERNAL_SIZE: u64 = 256;

/// Storage buffer owned by the renderer and bound into every frame's graph.
#[derive(Debug, Clone, Copy)]
struct ExternalBuffer {
    resource: FrameResource,
    handle: RgHandle,
    desc: BufferDesc,
}

impl ExternalBuffer {
    fn new(resource: FrameResource) -> Self {
        Self {
            resource,
            handle: RgHandle::INVALID,
            desc: BufferDesc::storage(0),
        }
    }
}

const INSTANCES: usize = 0;
const LIGHTS: usize = 1;
const HEADERS: usize = 2;
const NODES: usize = 3;

pub struct Renderer<B: FrameCommands + 'static> {
    config: RendererConfig,
    passes: PassConfigs,
    graph: RenderGraph<B, FrameData>,
    resources: RgResources<B>,
    materials: MaterialSystem,
    textures: TextureLoader,
    externals: [ExternalBuffer; 4],
    uploaded_materials: Option<u64>,
    frame_index: u64,
    last_report: Option<FrameReport>,
}

impl<B: FrameCommands + 'static> Renderer<B> {
    pub fn new(config: RendererConfig, passes: PassConfigs) -> Self {
        Self {
            graph: RenderGraph::with_config(config.graph),
            resources: RgResources::new(),
            materials: MaterialSystem::new(),
            textures: TextureLoader::new(config.texture_layer_size, config.texture_capacity),
            externals: [
                ExternalBuffer::new(FrameResource::SceneInstances),
                ExternalBuffer::new(FrameResource::SceneLights),
                ExternalBuffer::new(FrameResource::MaterialHeaders),
                ExternalBuffer::new(FrameResource::MaterialNodes),
            ],
            uploaded_materials: None,
            frame_index: 0,
            last_report: None,
            config,
            passes,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn passes(&self) -> &PassConfigs {
        &self.passes
    }

    pub fn passes_mut(&mut self) -> &mut PassConfigs {
        &mut self.passes
    }

    pub fn materials(&self) -> &MaterialSystem {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut MaterialSystem {
        &mut self.materials
    }

    pub fn textures(&self) -> &TextureLoader {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut TextureLoader {
        &mut self.textures
    }

    pub fn resources(&self) -> &RgResources<B> {
        &self.resources
    }

    /// Frames rendered so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }

    /// The tonemapped image of the last frame, valid until the next `render`.
    pub fn output(&self) -> Option<&B::Texture> {
        self.last_texture(FrameResource::LdrColor)
    }

    /// Pick id under a pixel of the last frame. Zero is background.
    pub fn pick(&self, backend: &mut B, x: u32, y: u32) -> Option<u32> {
        let texture = self.last_texture(FrameResource::PickIds)?;
        backend.read_id(texture, x, y)
    }

    fn last_texture(&self, resource: FrameResource) -> Option<&B::Texture> {
        let handle = self.last_report.as_ref()?.handle(resource.name());
        self.resources.try_tex(handle).ok()
    }

    /// Renders `world` at `size` and returns what the graph did.
    pub fn render(&mut self, backend: &mut B, world: &World, size: (u32, u32)) -> &FrameReport {
        self.frame_index += 1;
        let size = (size.0.max(1), size.1.max(1));

        let pumped = self.textures.pump(&mut *backend, self.config.texture_upload_budget);
        if pumped.failed > 0 {
            self.materials.invalidate();
        }
        self.materials.sync(&mut self.textures);

        let instances = world.renderables();
        let lights = world.light_records();
        self.upload_scene(backend, &instances, &lights);

        let selected = instances
            .iter()
            .position(|instance| instance.flags & INSTANCE_FLAG_SELECTED != 0)
            .map_or(NO_INDEX, |index| index as u32);
        let shadow_light = shadow_light(world);
        let shadows = self.passes.shadow.enabled && shadow_light.is_some();

        let camera = &world.camera;
        let aspect_ratio = size.0 as f32 / size.1 as f32;
        let view = camera.view();
        let projection = camera.projection(aspect_ratio);
        let context = RenderPassContext::new(FrameExtents::uniform(size.0, size.1), self.frame_index)
            .with_camera(view, projection, camera.position);

        let cascades = match (shadows, world.sun()) {
            (true, Some(sun)) => cascades(camera, aspect_ratio, sun, &self.passes.shadow),
            _ => Cascades::default(),
        };
        let tiles = light_tiles(size.0, size.1);
        let frame = FrameData {
            uniform: frame_uniform(
                &context,
                &cascades,
                &self.passes,
                [lights.len() as u32, instances.len() as u32, tiles.0, tiles.1],
                [
                    selected,
                    self.passes.selection.thickness,
                    cascades.count,
                    shadow_light.filter(|_| shadows).unwrap_or(NO_INDEX),
                ],
            ),
            configs: self.passes,
            instance_count: instances.len() as u32,
            light_count: lights.len() as u32,
            light_tiles: tiles,
        };

        self.setup_passes(shadows, tiles);
        let report = self
            .graph
            .execute(&context, &frame, &mut self.resources, backend);

        if self.config.gc_interval > 0 && self.frame_index % self.config.gc_interval == 0 {
            self.resources.gc(backend, self.config.keep_frames);
        }
        self.last_report.insert(report)
    }

    fn setup_passes(&mut self, shadows: bool, tiles: (u32, u32)) {
        let passes = self.passes;
        let picking = passes.picking.enabled;
        let graph = &mut self.graph;

        if shadows {
            ShadowCsmPass::new(passes.shadow).setup(graph);
        }
        DepthPrepass.setup(graph);
        LightClusterPass::new(tiles).setup(graph);
        ForwardMrtPass::new(shadows).setup(graph);
        if picking {
            PickPass.setup(graph);
        }
        if passes.bloom.enabled {
            PostFilters::new(passes.bloom).setup(graph);
        }
        TonemapPass::new(passes.bloom.enabled).setup(graph);
        if picking && passes.selection.enabled {
            SelectionPass.setup(graph);
        }
    }

    fn upload_scene(
        &mut self,
        backend: &mut B,
        instances: &[crate::scene::InstanceRecord],
        lights: &[crate::scene::LightRecord],
    ) {
        let graph = &mut self.graph;
        let resources = &mut self.resources;
        upload_external(&mut self.externals[INSTANCES], bytemuck::cast_slice(instances), graph, resources, backend);
        upload_external(&mut self.externals[LIGHTS], bytemuck::cast_slice(lights), graph, resources, backend);

        let version = self.materials.version();
        let grown = ensure_capacity(
            &mut self.externals[HEADERS],
            std::mem::size_of_val(self.materials.headers()) as u64,
            graph,
            resources,
            backend,
        ) | ensure_capacity(
            &mut self.externals[NODES],
            std::mem::size_of_val(self.materials.nodes()) as u64,
            graph,
            resources,
            backend,
        );
        if grown || self.uploaded_materials != Some(version) {
            write_external(&self.externals[HEADERS], bytemuck::cast_slice(self.materials.headers()), resources, backend);
            write_external(&self.externals[NODES], bytemuck::cast_slice(self.materials.nodes()), resources, backend);
            self.uploaded_materials = Some(version);
            log::debug!(
                "uploaded material tables v{version}: {} headers, {} nodes",
                self.materials.headers().len(),
                self.materials.nodes().len()
            );
        }
    }

    /// Destroys every object the renderer created. The renderer stays usable.
    pub fn release(&mut self, backend: &mut B) {
        for external in &mut self.externals {
            if let Some(buffer) = self.resources.forget_import(external.handle) {
                backend.destroy_buffer(buffer);
            }
            *external = ExternalBuffer::new(external.resource);
        }
        self.resources.clear(backend);
        self.graph = RenderGraph::with_config(self.config.graph);
        self.uploaded_materials = None;
        self.last_report = None;
    }
}

/// Index of the light whose shadows are rendered, among the shaded lights.
fn shadow_light(world: &World) -> Option<u32> {
    world
        .lights
        .iter()
        .take(MAX_LIGHTS)
        .position(|light| matches!(light, Light::Directional { .. }))
        .map(|index| index as u32)
}

fn frame_uniform(
    context: &RenderPassContext,
    cascades: &Cascades,
    passes: &PassConfigs,
    counts: [u32; 4],
    params: [u32; 4],
) -> FrameUniform {
    let (width, height) = context.viewport_size();
    let (width, height) = (width.max(1) as f32, height.max(1) as f32);
    let position = context.camera_position;
    let mut uniform = FrameUniform {
        view: context.view.into(),
        projection: context.projection.into(),
        view_projection: context.view_projection.into(),
        inverse_projection: nalgebra_glm::inverse(&context.projection).into(),
        camera_position: [position.x, position.y, position.z, 1.0],
        viewport: [width, height, 1.0 / width, 1.0 / height],
        cascade_splits: cascades.splits,
        counts,
        tonemap: [
            passes.tonemap.exposure,
            passes.tonemap.gamma,
            passes.bloom.intensity,
            passes.bloom.threshold,
        ],
        selection_color: passes.selection.outline_color,
        params,
        ..Default::default()
    };
    for (slot, matrix) in uniform
        .cascade_view_projection
        .iter_mut()
        .zip(cascades.view_projection.iter())
    {
        *slot = (*matrix).into();
    }
    uniform
}

/// Makes sure `external` holds at least `required` bytes, replacing the
/// buffer with a larger one when it does not. Returns whether it was replaced.
fn ensure_capacity<B: FrameCommands + 'static>(
    external: &mut ExternalBuffer,
    required: u64,
    graph: &mut RenderGraph<B, FrameData>,
    resources: &mut RgResources<B>,
    backend: &mut B,
) -> bool {
    let required = required.max(MIN_EXTERNAL_SIZE);
    if resources.is_buf_valid(external.handle) && external.desc.size >= required {
        return false;
    }
    if let Some(previous) = resources.forget_import(external.handle) {
        backend.destroy_buffer(previous);
    }
    let name = external.resource.name();
    let desc = BufferDesc::storage(required.next_power_of_two());
    let buffer = backend.create_buffer(name, &desc);
    external.handle = resources.import_buffer(name, buffer, desc);
    external.desc = desc;
    graph.bind_external_buffer(name, desc, external.handle);
    log::debug!("external buffer '{name}' now {} bytes", desc.size);
    true
}

fn write_external<B: FrameCommands>(
    external: &ExternalBuffer,
    bytes: &[u8],
    resources: &RgResources<B>,
    backend: &mut B,
) {
    if bytes.is_empty() {
        return;
    }
    match resources.try_buf(external.handle) {
        Ok(buffer) => backend.upload(buffer, 0, bytes),
        Err(error) => log::error!("cannot upload '{}': {error}", external.resource),
    }
}

fn upload_external<B: FrameCommands + 'static>(
    external: &mut ExternalBuffer,
    bytes: &[u8],
    graph: &mut RenderGraph<B, FrameData>,
    resources: &mut RgResources<B>,
    backend: &mut B,
) {
    ensure_capacity(external, bytes.len() as u64, graph, resources, backend);
    write_external(external, bytes, resources, backend);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Camera;
    use lumen_graph::HeadlessBackend;
    use nalgebra_glm as glm;

    fn renderer() -> Renderer<HeadlessBackend> {
        let config = RendererConfig {
            graph: RendererConfig::default().graph.validation(true),
            ..Default::default()
        };
        Renderer::new(config, PassConfigs::default())
    }

    #[test]
    fn external_buffers_start_at_the_minimum_size() {
        let mut backend = HeadlessBackend::new();
        let mut renderer = renderer();
        let world = World::new(Camera::looking_at(glm::vec3(0.0, 1.0, 5.0), glm::Vec3::zeros()));
        renderer.render(&mut backend, &world, (64, 64));

        for external in &renderer.externals {
            assert_eq!(external.desc.size, MIN_EXTERNAL_SIZE);
            assert!(renderer.resources.is_buf_valid(external.handle));
        }
    }

    #[test]
    fn shadow_light_is_the_first_directional_light() {
        let mut world = World::new(Camera::looking_at(glm::vec3(0.0, 1.0, 5.0), glm::Vec3::zeros()));
        assert_eq!(shadow_light(&world), None);
        world.lights.push(Light::Point {
            position: glm::vec3(0.0, 2.0, 0.0),
            color: glm::vec3(1.0, 1.0, 1.0),
            intensity: 4.0,
            radius: 5.0,
        });
        world.lights.push(Light::Directional {
            direction: glm::vec3(0.0, -1.0, 0.0),
            color: glm::vec3(1.0, 1.0, 1.0),
            intensity: 2.0,
        });
        assert_eq!(shadow_light(&world), Some(1));
    }

    #[test]
    fn uniform_carries_counts_and_tonemap_settings() {
        let context = RenderPassContext::new(FrameExtents::uniform(200, 100), 1);
        let passes = PassConfigs::default();
        let uniform = frame_uniform(&context, &Cascades::default(), &passes, [3, 5, 13, 7], [NO_INDEX, 2, 0, NO_INDEX]);

        assert_eq!(uniform.viewport, [200.0, 100.0, 0.005, 0.01]);
        assert_eq!(uniform.counts, [3, 5, 13, 7]);
        assert_eq!(uniform.tonemap[0], passes.tonemap.exposure);
        assert_eq!(uniform.tonemap[3], passes.bloom.threshold);
        assert_eq!(uniform.params[0], NO_INDEX);
    }
}

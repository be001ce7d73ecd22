use lumen_core::material::MaterialGraph;
use lumen_core::pass_configs::{PassConfigs, RendererConfig};
use lumen_core::passes::bloom::PostFilters;
use lumen_core::passes::{
    DepthPrepass, ForwardMrtPass, FrameResource, LightClusterPass, PickPass, SelectionPass,
    ShadowCsmPass, TonemapPass,
};
use lumen_core::renderer::Renderer;
use lumen_core::scene::{Camera, InstanceRecord, Light, Mesh, Transform, World};
use lumen_graph::HeadlessBackend;
use nalgebra_glm as glm;
use rstest::rstest;

const SIZE: (u32, u32) = (320, 240);

struct Harness {
    renderer: Renderer<HeadlessBackend>,
    backend: HeadlessBackend,
    world: World,
}

impl Harness {
    fn new(passes: PassConfigs) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = RendererConfig {
            graph: RendererConfig::default().graph.validation(true),
            ..Default::default()
        };
        let mut renderer = Renderer::new(config, passes);
        let world = World::demo(renderer.materials_mut());
        Self {
            renderer,
            backend: HeadlessBackend::new(),
            world,
        }
    }

    fn render(&mut self) -> Vec<String> {
        self.renderer.render(&mut self.backend, &self.world, SIZE);
        self.backend.take_log()
    }

    fn schedule(&self) -> Vec<String> {
        self.renderer
            .last_report()
            .map(|report| report.schedule().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn position(&self, pass: &str) -> usize {
        self.renderer
            .last_report()
            .and_then(|report| report.position(pass))
            .unwrap_or_else(|| panic!("'{pass}' was not scheduled"))
    }
}

fn draw_line<'a>(log: &'a [String], pass: &str) -> &'a str {
    let prefix = format!("draw {pass} ");
    log.iter()
        .find(|line| line.starts_with(&prefix))
        .map(String::as_str)
        .unwrap_or_else(|| panic!("no draw recorded for '{pass}'"))
}

#[test]
fn full_frame_runs_every_pass_in_dependency_order() {
    let mut harness = Harness::new(PassConfigs::default());
    harness.render();

    let schedule = harness.schedule();
    assert_eq!(schedule.len(), 10, "{schedule:?}");
    assert_eq!(schedule[0], ShadowCsmPass::NAME);

    let order = |pass: &str| harness.position(pass);
    assert!(order(ShadowCsmPass::NAME) < order(ForwardMrtPass::NAME));
    assert!(order(DepthPrepass::NAME) < order(LightClusterPass::NAME));
    assert!(order(LightClusterPass::NAME) < order(ForwardMrtPass::NAME));
    assert!(order(ForwardMrtPass::NAME) < order(PostFilters::EXTRACT));
    assert!(order(PostFilters::EXTRACT) < order(PostFilters::BLUR_H));
    assert!(order(PostFilters::BLUR_H) < order(PostFilters::BLUR_V));
    assert!(order(PostFilters::BLUR_V) < order(TonemapPass::NAME));
    assert!(order(PickPass::NAME) < order(SelectionPass::NAME));
    assert!(order(TonemapPass::NAME) < order(SelectionPass::NAME));

    let report = harness.renderer.last_report().unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn bloom_blur_reuses_the_extract_target() {
    let mut harness = Harness::new(PassConfigs::default());
    harness.render();

    let report = harness.renderer.last_report().unwrap();
    let extract = report.handle(FrameResource::BloomExtract.name());
    let blur = report.handle(FrameResource::BloomBlur.name());
    assert!(!extract.is_invalid());
    assert_eq!(extract.index, blur.index);
    assert_ne!(report.handle(FrameResource::BloomBlurH.name()).index, extract.index);
}

#[test]
fn disabling_bloom_removes_its_passes() {
    let mut passes = PassConfigs::default();
    passes.bloom.enabled = false;
    let mut harness = Harness::new(passes);
    let log = harness.render();

    let schedule = harness.schedule();
    assert!(!schedule.iter().any(|pass| pass.starts_with("Bloom")), "{schedule:?}");
    let tonemap = draw_line(&log, TonemapPass::NAME);
    assert!(!tonemap.contains("TonemapBloom"), "{tonemap}");
    assert!(
        harness.renderer.last_report().unwrap().lifetime(FrameResource::BloomExtract.name()).is_none()
    );
}

#[rstest]
#[case::disabled_in_config(false, true)]
#[case::no_directional_light(true, false)]
fn forward_samples_blank_depth_without_shadows(#[case] enabled: bool, #[case] sun: bool) {
    let mut passes = PassConfigs::default();
    passes.shadow.enabled = enabled;
    let mut harness = Harness::new(passes);
    if !sun {
        harness
            .world
            .lights
            .retain(|light| !matches!(light, Light::Directional { .. }));
    }
    let log = harness.render();

    assert!(!harness.schedule().iter().any(|pass| pass == ShadowCsmPass::NAME));
    assert!(draw_line(&log, ForwardMrtPass::NAME).contains("blank depth"));
}

#[test]
fn forward_samples_the_shadow_atlas_when_shadows_run() {
    let mut harness = Harness::new(PassConfigs::default());
    let log = harness.render();
    let forward = draw_line(&log, ForwardMrtPass::NAME);
    assert!(!forward.contains("blank depth"), "{forward}");
}

#[test]
fn picking_off_drops_pick_and_selection() {
    let mut passes = PassConfigs::default();
    passes.picking.enabled = false;
    let mut harness = Harness::new(passes);
    harness.render();

    let schedule = harness.schedule();
    assert!(!schedule.iter().any(|pass| pass == PickPass::NAME));
    assert!(!schedule.iter().any(|pass| pass == SelectionPass::NAME));
    assert!(harness.renderer.output().is_some());
}

#[test]
fn steady_state_frames_allocate_nothing() {
    let mut harness = Harness::new(PassConfigs::default());
    harness.render();
    harness.render();
    let textures = harness.backend.textures_created();
    let buffers = harness.backend.buffers_created();

    for _ in 0..4 {
        harness.render();
    }
    assert_eq!(harness.backend.textures_created(), textures);
    assert_eq!(harness.backend.buffers_created(), buffers);
    assert_eq!(harness.renderer.frame_index(), 6);
}

#[test]
fn resizing_allocates_new_framebuffer_targets() {
    let mut harness = Harness::new(PassConfigs::default());
    harness.render();
    harness.render();
    let textures = harness.backend.textures_created();

    harness.renderer.render(&mut harness.backend, &harness.world, (640, 480));
    assert!(harness.backend.textures_created() > textures);

    let output = harness.renderer.output().unwrap();
    assert_eq!((output.desc.width, output.desc.height), (640, 480));
}

#[test]
fn instance_buffer_grows_with_the_scene() {
    let mut harness = Harness::new(PassConfigs::default());
    let material = harness.renderer.materials().find("red plastic").unwrap();
    for index in 0..200 {
        let position = glm::vec3((index % 20) as f32, 0.5, (index / 20) as f32);
        harness
            .world
            .spawn(format!("Cube {index}"), Transform::at(position), Mesh::Cube, material);
    }
    let log = harness.render();

    let bytes = harness.world.renderables().len() * std::mem::size_of::<InstanceRecord>();
    let upload = format!("upload Scene.Instances {bytes} bytes at 0");
    assert!(log.contains(&upload), "{log:?}");
    let pick = draw_line(&log, PickPass::NAME);
    assert!(pick.ends_with(&format!("instances 0..{}", harness.world.renderables().len())), "{pick}");
}

#[test]
fn material_tables_upload_only_when_they_change() {
    let mut harness = Harness::new(PassConfigs::default());
    let uploads = |log: &[String]| {
        log.iter()
            .filter(|line| line.starts_with("upload Material.Headers"))
            .count()
    };

    assert_eq!(uploads(&harness.render()), 1);
    assert_eq!(uploads(&harness.render()), 0);

    let red = harness.renderer.materials().find("red plastic").unwrap();
    harness
        .renderer
        .materials_mut()
        .update(red, MaterialGraph::constant([0.1, 0.1, 0.8, 1.0], 0.0, 0.3));
    assert_eq!(uploads(&harness.render()), 1);
}

#[test]
fn broken_material_falls_back_without_stopping_the_frame() {
    let mut harness = Harness::new(PassConfigs::default());
    let broken = harness.renderer.materials_mut().create("broken", MaterialGraph::new());
    harness
        .world
        .spawn("Broken Cube", Transform::at(glm::vec3(0.0, 3.0, 0.0)), Mesh::Cube, broken);
    harness.render();

    let materials = harness.renderer.materials();
    assert!(materials.headers()[broken.0 as usize].is_fallback());
    assert!(materials.error(broken).is_some());
    assert_eq!(harness.schedule().len(), 10);
}

#[test]
fn selection_outline_reads_pick_ids() {
    let mut harness = Harness::new(PassConfigs::default());
    harness.world.select_pick_id(2);
    let log = harness.render();

    let outline = draw_line(&log, SelectionPass::NAME);
    assert!(outline.contains("Pick.Ids"), "{outline}");
    assert!(outline.contains("LDR.Color"), "{outline}");
}

#[test]
fn empty_world_still_produces_an_image() {
    let mut harness = Harness::new(PassConfigs::default());
    harness.world = World::new(Camera::looking_at(glm::vec3(0.0, 1.0, 4.0), glm::Vec3::zeros()));
    harness.render();

    assert!(harness.renderer.output().is_some());
    assert_eq!(harness.renderer.pick(&mut harness.backend, 10, 10), None);
}

use lumen_graph::{
    Access, BarrierBits, BufferDesc, BufferUsage, Extent, FrameExtents, FrameReport,
    HeadlessBackend, PassContext, RenderGraph, RenderGraphConfig, RenderGraphError, RenderPassContext,
    RgResources, TextureDesc, TextureFormat, TextureUsage, ValidationWarning,
};
use std::cell::RefCell;
use std::rc::Rc;

struct Harness {
    graph: RenderGraph<HeadlessBackend>,
    resources: RgResources<HeadlessBackend>,
    backend: HeadlessBackend,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(RenderGraphConfig::default().validation(true))
    }

    fn with_config(config: RenderGraphConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            graph: RenderGraph::with_config(config),
            resources: RgResources::new(),
            backend: HeadlessBackend::new(),
        }
    }

    fn run(&mut self, frame_index: u64) -> FrameReport {
        let frame = RenderPassContext::new(FrameExtents::uniform(1024, 768), frame_index);
        self.graph
            .execute(&frame, &(), &mut self.resources, &mut self.backend)
    }
}

fn color(width: u32, height: u32, format: TextureFormat) -> TextureDesc {
    TextureDesc::explicit(
        width,
        height,
        format,
        TextureUsage::COLOR_ATTACH | TextureUsage::SAMPLED,
    )
}

fn noop(_: &mut PassContext<'_, HeadlessBackend>) {}

fn record(
    name: &'static str,
    order: &Rc<RefCell<Vec<&'static str>>>,
) -> impl FnOnce(&mut PassContext<'_, HeadlessBackend>) + 'static {
    let order = order.clone();
    move |_| order.borrow_mut().push(name)
}

#[test]
fn reader_runs_after_writer_with_texture_fetch_barrier() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_texture("X", color(1024, 768, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "B",
        |builder| {
            builder.read_texture("X", Access::SAMPLED_READ);
        },
        noop,
    );

    let report = harness.run(1);

    assert_eq!(report.schedule(), vec!["A", "B"]);
    assert!(report.barriers_before("B").contains(BarrierBits::TEXTURE_FETCH));
    assert!(report.barriers_before("A").is_empty());
    assert_eq!(harness.backend.barriers().len(), 1);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn non_overlapping_equal_resources_share_a_slot() {
    let mut harness = Harness::new();
    let mut handles = Vec::new();

    for frame in 1..=3 {
        harness.graph.add_pass(
            "A",
            |builder| {
                builder.create_texture("X", color(512, 512, TextureFormat::Rgba16F), Access::COLOR_WRITE);
            },
            noop,
        );
        harness.graph.add_pass(
            "B",
            |builder| {
                builder.create_texture("Y", color(512, 512, TextureFormat::Rgba16F), Access::COLOR_WRITE);
            },
            noop,
        );
        let report = harness.run(frame);
        handles.push((report.handle("X"), report.handle("Y")));
    }

    for (x, y) in &handles {
        assert_eq!(x.index, y.index);
        assert_ne!(x.generation, y.generation);
    }
    assert_eq!(handles[0].0.index, handles[2].1.index);
    assert_eq!(harness.backend.textures_created(), 1);
}

#[test]
fn overlapping_resources_never_share_a_slot() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_texture("X", color(256, 256, TextureFormat::Rgba16F), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "B",
        |builder| {
            builder.read_texture("X", Access::SAMPLED_READ);
            builder.create_texture("Y", color(256, 256, TextureFormat::Rgba16F), Access::COLOR_WRITE);
        },
        noop,
    );

    let report = harness.run(1);
    let x = report.lifetime("X").unwrap();
    let y = report.lifetime("Y").unwrap();

    assert!(x.overlaps(y));
    assert_ne!(x.handle.index, y.handle.index);
    assert_eq!(harness.backend.textures_created(), 2);
}

#[test]
fn different_resolved_descriptors_do_not_alias() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_texture("X", color(256, 256, TextureFormat::Rgba16F), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "B",
        |builder| {
            builder.create_texture("Y", color(256, 256, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );

    let report = harness.run(1);
    assert_ne!(report.handle("X").index, report.handle("Y").index);
}

#[test]
fn aliased_away_handle_is_detected_as_stale() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_texture("X", color(64, 64, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "B",
        |builder| {
            builder.create_texture("Y", color(64, 64, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );

    let report = harness.run(1);

    assert!(matches!(
        harness.resources.try_tex(report.handle("X")),
        Err(RenderGraphError::StaleHandle { .. })
    ));
    assert!(harness.resources.try_tex(report.handle("Y")).is_ok());
}

#[test]
fn disabled_aliasing_gives_every_resource_its_own_slot() {
    let mut harness = Harness::with_config(RenderGraphConfig::default().aliasing(false));
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_texture("X", color(64, 64, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "B",
        |builder| {
            builder.create_texture("Y", color(64, 64, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );

    let report = harness.run(1);
    assert_ne!(report.handle("X").index, report.handle("Y").index);
    assert_eq!(harness.resources.texture_stats().alive, 0);
}

#[test]
#[should_panic(expected = "before any pass declared it")]
fn reading_before_the_declaring_pass_is_fatal() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "B",
        |builder| {
            builder.read_texture("X", Access::SAMPLED_READ);
        },
        noop,
    );
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.write_texture("X", Access::COLOR_WRITE);
        },
        noop,
    );
    harness.run(1);
}

#[test]
#[should_panic(expected = "descriptor mismatch")]
fn conflicting_redeclaration_is_fatal() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_texture("X", color(64, 64, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "B",
        |builder| {
            builder.create_texture("X", color(64, 64, TextureFormat::R32F), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.run(1);
}

#[test]
fn explicit_cycle_is_reported_with_its_passes() {
    let mut harness = Harness::new();
    harness.graph.add_pass("A", |builder| builder.depend_on("B"), noop);
    harness.graph.add_pass("B", |builder| builder.depend_on("A"), noop);
    harness.graph.add_pass("C", |_| {}, noop);

    let frame = RenderPassContext::new(FrameExtents::uniform(64, 64), 1);
    let result = harness
        .graph
        .try_execute(&frame, &(), &mut harness.resources, &mut harness.backend);

    match result {
        Err(RenderGraphError::CyclicDependency { passes }) => assert_eq!(passes, "A, B"),
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
#[should_panic(expected = "dependency cycle")]
fn cycle_is_fatal_through_execute() {
    let mut harness = Harness::new();
    harness.graph.add_pass("A", |builder| builder.depend_on("A"), noop);
    harness.run(1);
}

#[test]
fn explicit_dependency_reorders_independent_passes() {
    let mut harness = Harness::new();
    harness.graph.add_pass("A", |builder| builder.depend_on("C"), noop);
    harness.graph.add_pass("B", |_| {}, noop);
    harness.graph.add_pass("C", |_| {}, noop);

    let report = harness.run(1);
    assert_eq!(report.schedule(), vec!["B", "C", "A"]);
}

#[test]
fn independent_passes_keep_declaration_order() {
    let mut harness = Harness::new();
    for name in ["shadow", "prepass", "cluster", "forward"] {
        harness.graph.add_pass(name, |_| {}, noop);
    }
    let report = harness.run(1);
    assert_eq!(report.schedule(), vec!["shadow", "prepass", "cluster", "forward"]);
}

#[test]
fn writer_waits_for_earlier_readers() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut harness = Harness::new();

    harness.graph.add_pass(
        "write",
        |builder| {
            builder.create_texture("X", color(32, 32, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        record("write", &order),
    );
    harness.graph.add_pass(
        "read",
        |builder| {
            builder.read_texture("X", Access::SAMPLED_READ);
        },
        record("read", &order),
    );
    harness.graph.add_pass(
        "overwrite",
        |builder| {
            builder.write_texture("X", Access::COLOR_WRITE);
        },
        record("overwrite", &order),
    );

    let report = harness.run(1);

    assert_eq!(*order.borrow(), vec!["write", "read", "overwrite"]);
    assert!(report.edges.iter().any(|edge| edge.from == 1 && edge.to == 2));
    assert_eq!(report.barriers_before("overwrite"), BarrierBits::empty());
}

#[test]
fn storage_buffer_feeding_a_uniform_read_needs_both_scopes() {
    let mut harness = Harness::new();
    let desc = BufferDesc::new(256, BufferUsage::STORAGE | BufferUsage::UNIFORM);
    harness.graph.add_pass(
        "produce",
        move |builder| {
            builder.create_buffer("Params", desc, Access::SSBO_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "consume",
        |builder| {
            builder.read_buffer("Params", Access::UBO_READ);
        },
        noop,
    );

    let report = harness.run(1);
    assert_eq!(
        report.barriers_before("consume"),
        BarrierBits::SHADER_STORAGE | BarrierBits::UNIFORM
    );
    assert_eq!(harness.resources.buffer_stats().alive, 0);
}

#[test]
fn transient_buffers_alias_through_the_pool() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_buffer("G1", BufferDesc::storage(1024), Access::SSBO_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "B",
        |builder| {
            builder.read_buffer("G1", Access::SSBO_READ);
        },
        noop,
    );
    harness.graph.add_pass(
        "C",
        |builder| {
            builder.create_buffer("G2", BufferDesc::storage(1024), Access::SSBO_WRITE);
        },
        noop,
    );

    let report = harness.run(1);
    assert_eq!(report.handle("G1").index, report.handle("G2").index);
    assert_eq!(harness.backend.buffers_created(), 1);
}

#[test]
fn external_buffers_are_visible_and_survive_the_frame() {
    let mut harness = Harness::new();
    let desc = BufferDesc::new(4096, BufferUsage::STORAGE | BufferUsage::UPLOAD);
    let lights = {
        use lumen_graph::GpuBackend;
        let buffer = harness.backend.create_buffer("Scene.Lights", &desc);
        harness.resources.import_buffer("Scene.Lights", buffer, desc)
    };
    harness.graph.bind_external_buffer("Scene.Lights", desc, lights);

    let seen = Rc::new(RefCell::new(None));
    let captured = seen.clone();
    harness.graph.add_pass(
        "cluster",
        |builder| {
            builder.read_buffer("Scene.Lights", Access::SSBO_READ);
        },
        move |context| {
            *captured.borrow_mut() = Some(context.buffer("Scene.Lights").label.clone());
        },
    );

    let report = harness.run(1);

    assert_eq!(seen.borrow().as_deref(), Some("Scene.Lights"));
    assert!(harness.resources.is_buf_valid(lights));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
#[should_panic(expected = "did not declare texture")]
fn execute_cannot_reach_undeclared_resources() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_texture("X", color(8, 8, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.graph.add_pass(
        "B",
        |_| {},
        |context| {
            context.texture("X");
        },
    );
    harness.run(1);
}

#[test]
fn read_without_writer_only_warns() {
    let mut harness = Harness::new();
    let executed = Rc::new(RefCell::new(false));
    let flag = executed.clone();
    harness.graph.add_pass(
        "taa",
        |builder| {
            builder.declare_texture("History", color(64, 64, TextureFormat::Rgba16F));
            builder.read_texture("History", Access::SAMPLED_READ);
        },
        move |_| *flag.borrow_mut() = true,
    );

    let report = harness.run(1);

    assert!(*executed.borrow());
    assert_eq!(
        report.warnings,
        vec![ValidationWarning::NeverWritten {
            resource: "History".into()
        }]
    );
}

#[test]
fn validation_reports_unused_and_mismatched_usage() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.declare_texture("Unused", color(8, 8, TextureFormat::Rgba8));
            builder.create_texture(
                "SampledOnly",
                TextureDesc::new(Extent::Viewport, TextureFormat::Rgba8, TextureUsage::SAMPLED),
                Access::COLOR_WRITE,
            );
        },
        noop,
    );

    let report = harness.run(1);

    assert!(report.warnings.contains(&ValidationWarning::UnusedResource {
        resource: "Unused".into()
    }));
    assert!(report.warnings.iter().any(|warning| matches!(
        warning,
        ValidationWarning::UsageMismatch { pass, resource, .. } if pass == "A" && resource == "SampledOnly"
    )));
}

#[test]
fn validation_is_silent_when_disabled() {
    let mut harness = Harness::with_config(RenderGraphConfig::default().validation(false));
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.declare_texture("Unused", color(8, 8, TextureFormat::Rgba8));
        },
        noop,
    );
    assert!(harness.run(1).warnings.is_empty());
}

#[test]
fn unclaimed_alias_entries_are_reclaimed_by_gc() {
    let mut harness = Harness::new();
    harness.graph.add_pass(
        "A",
        |builder| {
            builder.create_texture("X", color(128, 128, TextureFormat::Rgba8), Access::COLOR_WRITE);
        },
        noop,
    );
    harness.run(1);
    assert_eq!(harness.resources.texture_stats().alive, 1);

    harness.run(2);
    assert_eq!(harness.resources.texture_stats().alive, 0);

    for frame in 3..=10 {
        harness.run(frame);
    }
    assert_eq!(harness.resources.gc(&mut harness.backend, 3), 1);
    assert_eq!(harness.backend.textures_destroyed(), 1);
}

#[test]
fn relative_extents_follow_the_frame() {
    let mut harness = Harness::new();
    for (frame, size) in [(1, 800), (2, 400)] {
        harness.graph.add_pass(
            "bloom",
            |builder| {
                builder.create_texture(
                    "Bloom.Half",
                    TextureDesc::new(
                        Extent::Framebuffer { divisor: 2 },
                        TextureFormat::Rgba16F,
                        TextureUsage::COLOR_ATTACH,
                    ),
                    Access::COLOR_WRITE,
                );
            },
            noop,
        );
        let context = RenderPassContext::new(FrameExtents::uniform(size, size), frame);
        let report = harness
            .graph
            .execute(&context, &(), &mut harness.resources, &mut harness.backend);
        let expected = format!("{}x{} Rgba16F", size / 2, size / 2);
        assert_eq!(report.lifetime("Bloom.Half").unwrap().description, expected);
    }
    assert_eq!(harness.backend.textures_created(), 2);
}

#[test]
fn profiling_records_pass_times() {
    let mut harness = Harness::with_config(RenderGraphConfig::default().profiling(true));
    harness.graph.add_pass("A", |_| {}, noop);
    let report = harness.run(1);
    assert!(report.passes[0].cpu_time.is_some());
}

#[test]
fn user_data_and_frame_reach_execute() {
    let mut graph: RenderGraph<HeadlessBackend, u32> = RenderGraph::new();
    let mut resources = RgResources::new();
    let mut backend = HeadlessBackend::new();
    let seen = Rc::new(RefCell::new((0, 0)));
    let captured = seen.clone();
    graph.add_pass(
        "A",
        |_| {},
        move |context| *captured.borrow_mut() = (*context.user, context.frame.frame_index),
    );

    let frame = RenderPassContext::new(FrameExtents::uniform(16, 16), 42);
    graph.execute(&frame, &7, &mut resources, &mut backend);

    assert_eq!(*seen.borrow(), (7, 42));
}

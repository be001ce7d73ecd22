pub mod commands;
pub mod gpu;
pub mod material;
pub mod pass_configs;
pub mod passes;
pub mod renderer;
pub mod scene;
pub mod textures;

use gpu::{Gpu, Presenter, WgpuFrame};
use pass_configs::{PassConfigs, RendererConfig};
use renderer::Renderer;
use scene::World;
use std::collections::HashSet;
use std::sync::Arc;
use web_time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

/// Units per second.
const CAMERA_SPEED: f32 = 4.0;
/// Radians per pixel of mouse drag.
const CAMERA_SENSITIVITY: f32 = 0.004;

#[derive(Default)]
pub struct App {
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    presenter: Option<Presenter>,
    renderer: Option<Renderer<WgpuFrame>>,
    world: Option<World>,
    keys_held: HashSet<KeyCode>,
    rotating: bool,
    cursor: Option<(f64, f64)>,
    last_render_time: Option<Instant>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes().with_title("Lumen");
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(error) => {
                log::error!("failed to create window: {error}");
                event_loop.exit();
                return;
            }
        };

        let config = RendererConfig::default();
        let size = window.inner_size();
        let gpu = match pollster::block_on(Gpu::new_async(
            window.clone(),
            size.width,
            size.height,
            config.texture_layer_size,
            config.texture_capacity,
        )) {
            Ok(gpu) => gpu,
            Err(error) => {
                log::error!("failed to initialize the gpu: {error}");
                event_loop.exit();
                return;
            }
        };

        let presenter = Presenter::new(gpu.frame.device(), gpu.surface_config.format);
        let mut renderer = Renderer::new(config, PassConfigs::default());
        let world = World::demo(renderer.materials_mut());
        log::info!(
            "scene ready: {} materials, surface {}x{} {:?}",
            renderer.materials().len(),
            gpu.surface_config.width,
            gpu.surface_config.height,
            gpu.surface_config.format
        );

        self.window = Some(window);
        self.gpu = Some(gpu);
        self.presenter = Some(presenter);
        self.renderer = Some(renderer);
        self.world = Some(world);
        self.last_render_time = Some(Instant::now());
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    winit::event::KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state,
                        repeat,
                        ..
                    },
                ..
            } => {
                if state == ElementState::Released {
                    self.keys_held.remove(&key_code);
                    return;
                }
                self.keys_held.insert(key_code);
                if !repeat {
                    self.key_pressed(event_loop, key_code);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => match (button, state) {
                (MouseButton::Right, _) => self.rotating = state == ElementState::Pressed,
                (MouseButton::Left, ElementState::Pressed) => self.pick(),
                _ => {}
            },
            WindowEvent::CursorMoved { position, .. } => {
                let position = (position.x, position.y);
                if let (true, Some(last), Some(world)) = (self.rotating, self.cursor, self.world.as_mut()) {
                    let dx = (position.0 - last.0) as f32;
                    let dy = (position.1 - last.1) as f32;
                    world
                        .camera
                        .rotate(dx * CAMERA_SENSITIVITY, -dy * CAMERA_SENSITIVITY);
                }
                self.cursor = Some(position);
            }
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::Resized(size) => {
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.update_camera();
                self.redraw();
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let (Some(renderer), Some(gpu)) = (self.renderer.as_mut(), self.gpu.as_mut()) {
            renderer.release(&mut gpu.frame);
        }
    }
}

impl App {
    fn key_pressed(&mut self, event_loop: &ActiveEventLoop, key_code: KeyCode) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let passes = renderer.passes_mut();
        match key_code {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::KeyB => {
                passes.bloom.enabled = !passes.bloom.enabled;
                log::info!("bloom {}", on_off(passes.bloom.enabled));
            }
            KeyCode::KeyO => {
                passes.selection.enabled = !passes.selection.enabled;
                log::info!("selection outline {}", on_off(passes.selection.enabled));
            }
            KeyCode::KeyH => {
                passes.shadow.enabled = !passes.shadow.enabled;
                log::info!("shadows {}", on_off(passes.shadow.enabled));
            }
            KeyCode::KeyP => {
                if let Some(report) = renderer.last_report() {
                    log::info!("frame {}\n{}", report.frame_index, report.lifetime_report());
                    log::info!("\n{}", report.to_dot());
                }
            }
            _ => {}
        }
    }

    fn update_camera(&mut self) {
        let now = Instant::now();
        let delta = self
            .last_render_time
            .replace(now)
            .map_or(0.0, |last| (now - last).as_secs_f32());
        let Some(world) = self.world.as_mut() else {
            return;
        };

        let axis = |positive: KeyCode, negative: KeyCode| {
            self.keys_held.contains(&positive) as i32 as f32 - self.keys_held.contains(&negative) as i32 as f32
        };
        let forward = axis(KeyCode::KeyW, KeyCode::KeyS);
        let right = axis(KeyCode::KeyD, KeyCode::KeyA);
        let up = axis(KeyCode::KeyE, KeyCode::KeyQ);
        let step = CAMERA_SPEED * delta;
        world.camera.translate(forward * step, right * step, up * step);
    }

    fn pick(&mut self) {
        let (Some(gpu), Some(renderer), Some(world), Some((x, y))) = (
            self.gpu.as_mut(),
            self.renderer.as_ref(),
            self.world.as_mut(),
            self.cursor,
        ) else {
            return;
        };
        if !renderer.passes().picking.enabled {
            return;
        }
        gpu.frame.submit();
        let Some(id) = renderer.pick(&mut gpu.frame, x as u32, y as u32) else {
            return;
        };
        match world.select_pick_id(id) {
            Some(entity) => {
                let name = world.entity(entity).map_or("", |entity| entity.name.as_str());
                log::info!("selected '{name}' (pick id {id})");
            }
            None => log::info!("selection cleared"),
        }
    }

    fn redraw(&mut self) {
        let (Some(gpu), Some(presenter), Some(renderer), Some(world)) = (
            self.gpu.as_mut(),
            self.presenter.as_ref(),
            self.renderer.as_mut(),
            self.world.as_ref(),
        ) else {
            return;
        };

        let size = gpu.size();
        renderer.render(&mut gpu.frame, world, size);

        let surface_texture = match gpu.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                gpu.surface.configure(gpu.frame.device(), &gpu.surface_config);
                gpu.frame.submit();
                return;
            }
            Err(error) => {
                log::warn!("failed to acquire surface texture: {error}");
                gpu.frame.submit();
                return;
            }
        };
        let surface_view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        if let Some(output) = renderer.output() {
            let device = gpu.frame.device().clone();
            presenter.present(&device, gpu.frame.encoder(), &output.view, &surface_view);
        }
        gpu.frame.submit();
        surface_texture.present();
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use radiance_core::init_tracing;
use radiance_math::Camera;
use radiance_platform::{framebuffer_size, ResizeFlag};
use radiance_render::gltf_loader::load_gltf;
use radiance_render::{DrawPasses, FrameInput, RenderSize, Renderer, SceneAssets, SceneModel};
use radiance_render_vk::{EngineConfig, VkRenderer};
use tracing::{error, info, warn};

use radiance_platform::winit::{
    application::ApplicationHandler,
    dpi::{PhysicalPosition, PhysicalSize},
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use serde::Deserialize;

const ORBIT_SPEED: f32 = 0.005;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, default_value = "radiance.toml")]
    config: PathBuf,
    /// glTF scene to render
    #[arg(long)]
    model: Option<PathBuf>,
    /// glTF mesh for the skybox (defaults to a unit cube)
    #[arg(long)]
    skybox_model: Option<PathBuf>,
    /// Equirectangular HDR environment
    #[arg(long)]
    environment: Option<PathBuf>,
    /// Enable the validation layers
    #[arg(long)]
    validation: bool,
    #[arg(long)]
    no_scene: bool,
    #[arg(long)]
    no_skybox: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct AssetConfig {
    #[serde(default)]
    model: Option<PathBuf>,
    #[serde(default)]
    skybox_model: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct ViewCfg {
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
}

impl Default for ViewCfg {
    fn default() -> Self {
        ViewCfg {
            clear_color: default_clear(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

#[derive(Debug, Deserialize, Clone, Default)]
struct AppConfig {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    assets: AssetConfig,
    #[serde(default)]
    view: ViewCfg,
}

impl AppConfig {
    fn apply_args(&mut self, args: &Args) {
        if let Some(m) = &args.model {
            self.assets.model = Some(m.clone());
        }
        if let Some(m) = &args.skybox_model {
            self.assets.skybox_model = Some(m.clone());
        }
        if let Some(env) = &args.environment {
            self.engine.environment.hdr_path = env.clone();
        }
        if args.validation {
            self.engine.enable_validation = true;
        }
        if args.no_scene {
            self.engine.passes.scene = false;
        }
        if args.no_skybox {
            self.engine.passes.skybox = false;
        }
    }
}

/// A missing file means defaults; anything unreadable or malformed is fatal.
fn load_cfg(path: &Path) -> Result<AppConfig> {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppConfig>(&s)
            .with_context(|| format!("parsing {}", path.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("{} not found, using defaults", path.display());
            Ok(AppConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn load_assets(cfg: &AssetConfig) -> Result<SceneAssets> {
    let scene = match &cfg.model {
        Some(path) => load_gltf(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            warn!("no model configured, drawing a unit cube");
            let mut cube = SceneModel::unit_cube();
            cube.flip_winding();
            cube
        }
    };
    let skybox = match &cfg.skybox_model {
        Some(path) => load_gltf(path).with_context(|| format!("loading {}", path.display()))?,
        None => SceneModel::unit_cube(),
    };
    Ok(SceneAssets { scene, skybox })
}

fn toggle(passes: DrawPasses, key: KeyCode) -> Option<DrawPasses> {
    let flag = match key {
        KeyCode::Digit1 => DrawPasses::SCENE,
        KeyCode::Digit2 => DrawPasses::SKYBOX,
        _ => return None,
    };
    Some(passes ^ flag)
}

struct App {
    cfg: AppConfig,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    failure: Option<anyhow::Error>,
    resize: ResizeFlag,
    camera: Camera,
    passes: DrawPasses,

    exiting: bool,
    paused: bool,
    dragging: bool,
    cursor: Option<PhysicalPosition<f64>>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppConfig) -> Self {
        let passes = cfg.engine.passes();
        App {
            cfg,
            window: None,
            renderer: None,
            failure: None,
            resize: ResizeFlag::new(),
            camera: Camera::default(),
            passes,
            exiting: false,
            paused: false,
            dragging: false,
            cursor: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title("radiance")
            .with_inner_size(PhysicalSize::new(self.cfg.engine.width, self.cfg.engine.height));
        let window = event_loop.create_window(attrs).context("create_window")?;

        let (w, h) = framebuffer_size(&window);
        self.camera.set_viewport(w, h);
        let size = RenderSize {
            width: w.max(1),
            height: h.max(1),
        };

        let assets = load_assets(&self.cfg.assets)?;
        let mut renderer = VkRenderer::new(&window, &window, size, &self.cfg.engine, assets)?;
        renderer.set_clear_color(self.cfg.view.clear_color);

        info!(
            "swapchain {}x{} with {} images, environment {} mips",
            renderer.swapchain_extent().width,
            renderer.swapchain_extent().height,
            renderer.swapchain_image_count(),
            renderer.environment_mip_levels()
        );

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // Renderer before window: the surface borrows the window's handles.
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return Ok(());
        };

        let (w, h) = framebuffer_size(window);
        if self.resize.take() {
            renderer.resize(RenderSize {
                width: w,
                height: h,
            })?;
        }
        self.paused = w == 0 || h == 0;
        if self.paused {
            return Ok(());
        }

        renderer.render(&FrameInput {
            view: self.camera.view(),
            proj: self.camera.proj(),
        })?;

        self.frames = self.frames.saturating_add(1);
        let elapsed = self.last_fps_instant.elapsed();
        if elapsed >= Duration::from_secs(1) {
            info!("fps: {:.1}", self.frames as f64 / elapsed.as_secs_f64());
            self.frames = 0;
            self.last_fps_instant = Instant::now();
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.resize.raise();
                self.camera.set_viewport(new_size.width, new_size.height);
                let now_paused = new_size.width == 0 || new_size.height == 0;
                if self.paused != now_paused {
                    info!(
                        "Resized → {}x{} (paused={})",
                        new_size.width, new_size.height, now_paused
                    );
                }
                self.paused = now_paused;
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.dragging = state == ElementState::Pressed;
            }

            WindowEvent::CursorMoved { position, .. } => {
                if let (true, Some(last)) = (self.dragging, self.cursor) {
                    self.camera.orbit(
                        (position.x - last.x) as f32 * ORBIT_SPEED,
                        (position.y - last.y) as f32 * ORBIT_SPEED,
                    );
                }
                self.cursor = Some(position);
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => (p.y / 40.0) as f32,
                };
                self.camera.zoom(steps);
            }

            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    if code == KeyCode::Escape {
                        self.shutdown(event_loop);
                    } else if let Some(passes) = toggle(self.passes, code) {
                        self.passes = passes;
                        info!("draw passes: {passes:?}");
                        if let Some(r) = &mut self.renderer {
                            r.set_draw_passes(passes);
                        }
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused && !self.resize.is_raised() {
            // Minimized: sleep until the window system wakes us.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config)?;
    cfg.apply_args(&args);

    let event_loop = EventLoop::new().context("creating event loop")?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app).context("event loop")?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// =============================================================================
// FRAME SYNC RENDERER - Vulkan swapchain lifecycle and frame pacing
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Application (camera, model, FPS, shader watcher)               │
// │    └── FrameSynchronizer (acquire/submit/present, rebuilds)     │
// │          ├── VulkanRenderer: FrameBackend                       │
// │          │     └── SwapchainGeneration (swapchain, targets,     │
// │          │           descriptor sets, command buffers, sync)    │
// │          └── PlatformHost: SurfaceHost (winit, pumped by hand)  │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Pump window events without blocking
// 2. Update camera and model from input and time
// 3. Wait for the slot's previous submission
// 4. Acquire an image and write its uniforms
// 5. Submit the image's pre-recorded commands and present
// 6. Rebuild the swapchain generation if it went stale
//
// =============================================================================

mod backend;
mod camera;
mod config;
mod frame;
mod model;
mod renderer;
mod shader_watch;
mod window;

use anyhow::{bail, Context, Result};
use backend::shader::ShaderSet;
use backend::VulkanDevice;
use camera::Camera;
use config::Config;
use frame::{FrameStatus, FrameSynchronizer};
use model::Model;
use renderer::VulkanRenderer;
use shader_watch::ShaderWatcher;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use window::{PlatformHost, WindowState};
use winit::event_loop::EventLoop;
use winit::window::Window;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frame sync renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let mut event_loop = EventLoop::new()?;
    let mut state = WindowState::new(&config.window);

    let window = wait_for_window(&mut event_loop, &mut state)?;
    let mut app = Application::new(config, window)?;

    loop {
        let mut host = PlatformHost {
            event_loop: &mut event_loop,
            state: &mut state,
        };
        host.pump(Some(Duration::ZERO))?;
        if host.state.close_requested() {
            break;
        }

        app.frame(&mut host)?;
    }

    log::info!("Presented {} frames", app.sync.frames_presented());
    Ok(())
}

/// Log to stderr, or to `debug.log_file` when `debug.log_to_file` is set.
/// `RUST_LOG` overrides the configured level.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level()).parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Failed to open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

/// Pump events until `resumed` has created the window.
fn wait_for_window(event_loop: &mut EventLoop<()>, state: &mut WindowState) -> Result<Arc<Window>> {
    loop {
        let mut host = PlatformHost {
            event_loop: &mut *event_loop,
            state: &mut *state,
        };
        host.pump(Some(Duration::from_millis(10)))?;

        if let Some(window) = host.state.window() {
            return Ok(window);
        }
        if host.state.close_requested() {
            bail!("Event loop closed before a window was created");
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer must go before the device.
struct Application {
    sync: FrameSynchronizer,
    renderer: VulkanRenderer,
    device: Arc<VulkanDevice>,
    window: Arc<Window>,
    camera: Camera,
    model: Model,
    shader_watcher: Option<ShaderWatcher>,
    shaders: ShaderSet,
    config: Config,

    // FPS tracking
    start_time: Instant,
    last_frame_time: Instant,
    last_fps_update: Instant,
    frame_count: u32,
}

impl Application {
    fn new(config: Config, window: Arc<Window>) -> Result<Self> {
        let device = VulkanDevice::new(window.as_ref(), &config.window.title, config.debug.validation_layers)
            .context("Failed to initialize Vulkan")?;

        let camera = Camera::new(&config.camera);
        let renderer = VulkanRenderer::new(&device, &config, camera.lens())?;

        let shaders = ShaderSet {
            vertex: config.assets.vertex_shader.clone(),
            fragment: config.assets.fragment_shader.clone(),
        };
        let shader_watcher = if config.debug.hot_reload_shaders {
            match ShaderWatcher::new(&shaders.directories()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let now = Instant::now();
        Ok(Self {
            sync: FrameSynchronizer::new(),
            renderer,
            device,
            window,
            camera,
            model: Model::new(),
            shader_watcher,
            shaders,
            config,
            start_time: now,
            last_frame_time: now,
            last_fps_update: now,
            frame_count: 0,
        })
    }

    fn frame(&mut self, host: &mut PlatformHost) -> Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        // ─────────────────────────────────────────────────────────────────────
        // Scene update
        // ─────────────────────────────────────────────────────────────────────
        self.camera.advance(host.state.movement(), dt);
        if let Some(cursor) = host.state.take_cursor() {
            self.camera.look(cursor);
        }
        self.model.update(now.duration_since(self.start_time).as_secs_f32());
        self.renderer.set_scene(self.camera.view(), self.model.uniform());

        if let Some(watcher) = self.shader_watcher.as_mut() {
            if watcher.poll_changed() {
                // Rebuild tears the pipeline down first, so only valid binaries may trigger it
                match self.shaders.validate() {
                    Ok(()) => {
                        log::info!("Shaders changed on disk, rebuilding pipeline");
                        self.sync.request_rebuild();
                    }
                    Err(e) => log::warn!("Ignoring shader change: {:#}", e),
                }
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // Render
        // ─────────────────────────────────────────────────────────────────────
        let status = self.sync.render_frame(&mut self.renderer, host)?;
        if status == FrameStatus::Presented {
            self.update_fps(host.state.is_fullscreen());
        }

        Ok(())
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self, fullscreen: bool) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();

        // Update title every second
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            let mode = if fullscreen { "fullscreen" } else { "windowed" };
            self.window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) [{}]",
                self.config.window.title,
                fps,
                1000.0 / fps.max(f32::EPSILON),
                mode
            ));

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle: {:#}", e);
        }
    }
}

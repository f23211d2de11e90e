// Window host
//
// winit drives `WindowState` through `ApplicationHandler`, but the loop is
// pumped by hand: `pump_app_events` with a zero timeout between frames, and
// with no timeout while a minimized window needs to block until restored.

use anyhow::{anyhow, Result};
use ash::vk;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Fullscreen, Window, WindowId},
};

use crate::camera::Movement;
use crate::config::WindowConfig;
use crate::frame::SurfaceHost;

pub fn extent_of(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

pub fn movement_from(pressed: &HashSet<KeyCode>) -> Movement {
    Movement {
        forward: pressed.contains(&KeyCode::KeyW),
        back: pressed.contains(&KeyCode::KeyS),
        left: pressed.contains(&KeyCode::KeyA),
        right: pressed.contains(&KeyCode::KeyD),
    }
}

/// Window plus the input and lifecycle flags the frame loop reads.
pub struct WindowState {
    title: String,
    initial_size: PhysicalSize<u32>,
    start_fullscreen: bool,
    window: Option<Arc<Window>>,
    fullscreen: bool,
    close_requested: bool,
    resized: bool,
    pressed: HashSet<KeyCode>,
    cursor: Option<(f64, f64)>,
    error: Option<anyhow::Error>,
}

impl WindowState {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            title: config.title.clone(),
            initial_size: PhysicalSize::new(config.width, config.height),
            start_fullscreen: config.fullscreen,
            window: None,
            fullscreen: config.fullscreen,
            close_requested: false,
            resized: false,
            pressed: HashSet::new(),
            cursor: None,
            error: None,
        }
    }

    pub fn window(&self) -> Option<Arc<Window>> {
        self.window.clone()
    }

    /// Error raised inside an event callback, which cannot return one.
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn movement(&self) -> Movement {
        movement_from(&self.pressed)
    }

    /// Latest cursor position since the last call.
    pub fn take_cursor(&mut self) -> Option<(f64, f64)> {
        self.cursor.take()
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.fullscreen = !self.fullscreen;

            if self.fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.resized = true;
        }
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut attributes = Window::default_attributes()
            .with_title(&self.title)
            .with_inner_size(self.initial_size);
        if self.start_fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        match event_loop.create_window(attributes) {
            Ok(window) => self.window = Some(Arc::new(window)),
            Err(e) => {
                self.error = Some(anyhow!("Failed to create window: {}", e));
                self.close_requested = true;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }

            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = Some((position.x, position.y));
            }

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };

                match event.state {
                    ElementState::Pressed => {
                        if !event.repeat {
                            match key {
                                KeyCode::Escape => {
                                    log::info!("ESC pressed, exiting...");
                                    self.close_requested = true;
                                    event_loop.exit();
                                }
                                KeyCode::F11 => self.toggle_fullscreen(),
                                _ => {}
                            }
                        }
                        self.pressed.insert(key);
                    }
                    ElementState::Released => {
                        self.pressed.remove(&key);
                    }
                }
            }

            WindowEvent::Focused(false) => self.pressed.clear(),

            _ => {}
        }
    }
}

/// The event loop and window state, seen by the frame loop as a `SurfaceHost`.
pub struct PlatformHost<'a> {
    pub event_loop: &'a mut EventLoop<()>,
    pub state: &'a mut WindowState,
}

impl PlatformHost<'_> {
    /// Dispatch pending events, waiting at most `timeout` (None blocks).
    pub fn pump(&mut self, timeout: Option<Duration>) -> Result<()> {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut *self.state) {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
        match self.state.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl SurfaceHost for PlatformHost<'_> {
    fn framebuffer_size(&self) -> vk::Extent2D {
        self.state
            .window
            .as_ref()
            .map_or(vk::Extent2D::default(), |window| extent_of(window.inner_size()))
    }

    fn wait_events(&mut self) {
        if let Err(e) = self.pump(None) {
            log::error!("{:#}", e);
            self.state.close_requested = true;
        }
    }

    fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_reads_wasd() {
        let pressed: HashSet<KeyCode> = [KeyCode::KeyW, KeyCode::KeyD].into_iter().collect();
        let movement = movement_from(&pressed);
        assert!(movement.forward && movement.right);
        assert!(!movement.back && !movement.left);
    }

    #[test]
    fn test_other_keys_do_not_move() {
        let pressed: HashSet<KeyCode> = [KeyCode::Space, KeyCode::ArrowUp].into_iter().collect();
        let movement = movement_from(&pressed);
        assert!(!(movement.forward || movement.back || movement.left || movement.right));
    }

    #[test]
    fn test_minimized_size_is_zero_extent() {
        let extent = extent_of(PhysicalSize::new(0, 0));
        assert!(crate::frame::is_zero_sized(extent));
    }

    #[test]
    fn test_new_state_has_no_pending_flags() {
        let mut state = WindowState::new(&WindowConfig::default());
        assert!(!state.close_requested());
        assert!(state.take_cursor().is_none());
        assert!(state.window().is_none());
    }
}

//! Window, event loop and frame driver.
//!
//! Implement [`App`] and hand it to [`Engine::run`]. Every frame the engine
//! calls `update` with the elapsed time and the current [`InputState`], then
//! `display` with the [`Renderer`], then presents.
//!
//! ```no_run
//! use thistle::prelude::*;
//!
//! struct Demo;
//!
//! impl App for Demo {}
//!
//! fn main() -> anyhow::Result<()> {
//!     Engine::new(EngineConfig::default().with_title("Demo"), Demo).run()
//! }
//! ```

use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalSize},
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gfx::backend::{check_gpu_error, Gpu, WgpuBackend};
use crate::gfx::rendering::Renderer;
use crate::input::InputState;
use crate::logging::init_logging;

/// Application hooks called by the [`Engine`]. All of them default to doing nothing.
pub trait App {
    /// Called once after the window and device exist. Create resources here.
    /// An error stops the engine.
    fn init(&mut self, _gpu: &Gpu) -> anyhow::Result<()> {
        Ok(())
    }

    /// Per-frame logic, `dt` in seconds.
    fn update(&mut self, _dt: f32, _input: &InputState) {}

    /// Per-frame drawing.
    fn display(&mut self, _renderer: &mut Renderer, _dt: f32) {}

    /// The drawable area changed size, in physical pixels.
    fn resize(&mut self, _width: u32, _height: u32) {}

    /// The window is about to close.
    fn close(&mut self) {}

    /// Raw key transition, before it reaches the [`InputState`].
    fn key(&mut self, _key: KeyCode, _state: ElementState) {}

    /// Raw mouse button transition, before it reaches the [`InputState`].
    fn mouse_button(&mut self, _button: MouseButton, _state: ElementState) {}
}

/// Owns the window and drives an [`App`].
pub struct Engine<A: App> {
    config: EngineConfig,
    app: A,
}

impl<A: App> Engine<A> {
    pub fn new(config: EngineConfig, app: A) -> Self {
        Self { config, app }
    }

    /// Opens the window and runs until it closes.
    ///
    /// # Errors
    /// Fails when the event loop, window or graphics context cannot be
    /// created, or when [`App::init`] fails.
    pub fn run(self) -> anyhow::Result<()> {
        init_logging(&self.config.logging);

        let event_loop = EventLoop::new().map_err(EngineError::from)?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let mut state = EngineState {
            config: self.config,
            app: self.app,
            window: None,
            renderer: None,
            input: InputState::new(),
            last_frame: Instant::now(),
            error: None,
        };
        event_loop.run_app(&mut state).map_err(EngineError::from)?;

        match state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct EngineState<A: App> {
    config: EngineConfig,
    app: A,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    input: InputState,
    last_frame: Instant,
    error: Option<anyhow::Error>,
}

impl<A: App> EngineState<A> {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height))
            .with_resizable(self.config.resizable);
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|e| EngineError::Context(format!("window: {e}")))?,
        );

        let PhysicalSize { width, height } = window.inner_size();
        let backend = pollster::block_on(WgpuBackend::new(
            window.clone(),
            width,
            height,
            self.config.vsync,
        ))?;
        let gpu: Gpu = Rc::new(backend);

        self.app.init(&gpu)?;
        check_gpu_error(&*gpu, "application init");

        self.renderer = Some(Renderer::with_config(&gpu, &self.config));
        self.window = Some(window);
        self.last_frame = Instant::now();
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.error = Some(err);
        event_loop.exit();
    }

    fn frame(&mut self) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.app.update(dt, &self.input);
        self.input.end_frame();
        self.app.display(renderer, dt);

        let gpu = renderer.gpu();
        gpu.present();
        check_gpu_error(&**gpu, "frame");
    }
}

impl<A: App> ApplicationHandler for EngineState<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.start(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        self.input.handle_window_event(&event);

        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.app.key(code, event.state);
                    if code == KeyCode::Escape && event.state == ElementState::Pressed {
                        self.app.close();
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.app.mouse_button(button, state);
            }
            WindowEvent::Resized(PhysicalSize { width, height }) => {
                if let Some(renderer) = self.renderer.as_ref() {
                    renderer.gpu().resize(width, height);
                }
                if width > 0 && height > 0 {
                    self.app.resize(width, height);
                }
            }
            WindowEvent::CloseRequested => {
                self.app.close();
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => self.frame(),
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

//! Application runner and event loop.

use crate::app::{FrameInfo, LanternApp};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::window::WindowState;
use anyhow::Context as _;
use lantern_gpu::{DeviceContextBuilder, FrameEngine};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

/// Run an application with the given config.
///
/// Returns the first fatal error raised while creating or rendering.
pub fn run_app<A: LanternApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    // A subscriber may already be installed by the caller.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    info!("Starting {}", config.title);

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A>::new(config);
    event_loop
        .run_app(&mut runner)
        .context("event loop terminated abnormally")?;

    match runner.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct AppState<A> {
    ctx: AppContext,
    app: A,
}

struct AppRunner<A: LanternApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    error: Option<anyhow::Error>,
    frame_times: Vec<f32>,
}

impl<A: LanternApp> AppRunner<A> {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: None,
            error: None,
            frame_times: Vec::with_capacity(120),
        }
    }

    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let attributes = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("failed to create window")?,
        );

        let device = Arc::new(
            DeviceContextBuilder::new()
                .app_name(&self.config.title)
                .validation(self.config.validation)
                .build(&*window)?,
        );

        let window = WindowState::new(window);
        let engine = FrameEngine::new(
            Arc::clone(&device),
            &window,
            self.config.frame_engine_config(),
        )?;

        let mut ctx = AppContext::new(engine, device, window);
        let app = A::init(&mut ctx)?;
        info!("Application initialized");

        Ok(AppState { ctx, app })
    }

    fn render_frame(state: &mut AppState<A>) -> anyhow::Result<f32> {
        let now = Instant::now();
        let dt = now.duration_since(state.ctx.last_frame_time).as_secs_f32();
        state.ctx.last_frame_time = now;

        state.app.update(&state.ctx, dt);

        let info = FrameInfo {
            dt,
            time: state.ctx.elapsed(),
            frame_number: state.ctx.frame_count(),
        };

        let AppContext { engine, window, .. } = &mut state.ctx;
        let Some(mut frame) = engine.begin_frame(&mut *window)? else {
            return Ok(dt);
        };
        state.app.render(&info, &mut frame)?;
        frame.end(window)?;

        Ok(dt)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("Fatal error: {e:#}");
        if self.error.is_none() {
            self.error = Some(e);
        }
        self.cleanup();
        event_loop.exit();
    }

    fn cleanup(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };
        if let Err(e) = state.ctx.device.wait_idle() {
            warn!("wait_idle failed during cleanup: {e}");
        }
        state.app.cleanup(&mut state.ctx);

        if !self.frame_times.is_empty() {
            let avg = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
            info!(
                "Average frame time: {:.2}ms ({:.1} FPS) over the last {} frames",
                avg * 1000.0,
                1.0 / avg,
                self.frame_times.len()
            );
        }
        info!(frames = state.ctx.frame_count(), "Application shut down");
    }

    fn record_frame_time(&mut self, dt: f32) {
        if self.frame_times.len() == self.frame_times.capacity() {
            self.frame_times.remove(0);
        }
        self.frame_times.push(dt);
    }
}

impl<A: LanternApp> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match self.create_state(event_loop) {
            Ok(state) => {
                state.ctx.window.request_redraw();
                self.state = Some(state);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        if state.app.on_event(&event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.cleanup();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                state.ctx.window.mark_resized();
                if let Err(e) = state.app.on_resize(&mut state.ctx, size.width, size.height) {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::RedrawRequested => {
                let start = Instant::now();
                match Self::render_frame(state) {
                    Ok(dt) => {
                        state.ctx.window.request_redraw();
                        self.record_frame_time(dt);
                    }
                    Err(e) => {
                        self.fail(event_loop, e);
                        return;
                    }
                }

                if let Some(budget) = self.config.target_frame_time() {
                    let elapsed = start.elapsed();
                    if elapsed < budget {
                        std::thread::sleep(budget - elapsed);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.cleanup();
    }
}

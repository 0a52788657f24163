use anyhow::{anyhow, Result};
use pixels::{Pixels, SurfaceTexture};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use syncc_core::{Scene, Surface};
use syncc_render::SceneRenderer;
use syncc_timing::Clock;
use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Fullscreen, Window, WindowId},
};

const FALLBACK_REFRESH_HZ: f64 = 60.0;
const WINDOW_WAIT: Duration = Duration::from_secs(5);

/// Window-side state driven by winit callbacks.
struct WindowState {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    renderer: Option<SceneRenderer>,
    font: Option<PathBuf>,
    refresh_rate: Option<f64>,
    keys: VecDeque<String>,
    abort_key: String,
    failure: Option<anyhow::Error>,
}

impl WindowState {
    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| anyhow!("no monitor available"))?;

        self.refresh_rate = monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let attributes = Window::default_attributes()
            .with_title("syncc")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))))
            .with_resizable(false);
        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();

        info!(
            width = size.width,
            height = size.height,
            scale_factor = window.scale_factor(),
            refresh_hz = ?self.refresh_rate,
            "subject window open"
        );

        let texture = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
        self.pixels = Some(Pixels::new(size.width, size.height, texture)?);

        let renderer = SceneRenderer::new(size.width, size.height)?;
        self.renderer = Some(match &self.font {
            Some(path) => renderer.with_font_file(path)?,
            None => renderer,
        });

        window.set_cursor_visible(false);
        self.window = Some(window);
        Ok(())
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(size.width, size.height) {
                warn!("failed to resize surface: {e}");
            }
            if let Err(e) = pixels.resize_buffer(size.width, size.height) {
                warn!("failed to resize buffer: {e}");
            }
        }
        if let Some(renderer) = &mut self.renderer {
            if let Err(e) = renderer.resize(size.width, size.height) {
                warn!("failed to resize renderer: {e}");
            }
        }
        debug!(width = size.width, height = size.height, "display resized");
    }

    fn present(&mut self, scene: &Scene) -> Result<()> {
        let (Some(pixels), Some(renderer)) = (&mut self.pixels, &mut self.renderer) else {
            return Err(anyhow!("window is not open"));
        };
        renderer.render(scene, pixels.frame_mut())?;
        pixels.render()?;
        Ok(())
    }
}

/// Key name as the procedure configures it: named keys in lowercase,
/// characters as typed, lowercased.
fn key_name(key: &Key) -> Option<String> {
    match key {
        Key::Named(NamedKey::Escape) => Some("escape".into()),
        Key::Named(NamedKey::Space) => Some("space".into()),
        Key::Named(NamedKey::Enter) => Some("return".into()),
        Key::Character(s) => Some(s.to_lowercase()),
        _ => None,
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                error!("failed to create window and surface: {e}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            // Closing the subject window ends the session like the abort key.
            WindowEvent::CloseRequested => self.keys.push_back(self.abort_key.clone()),
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                if let Some(name) = key_name(&event.logical_key) {
                    self.keys.push_back(name);
                }
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(size) = self.window.as_ref().map(|w| w.inner_size()) {
                    self.handle_resize(size);
                }
            }
            _ => {}
        }
    }
}

/// Fullscreen subject display. The event loop is pumped from the
/// procedure's own thread on every flip and key poll, so `flip` returns
/// once the frame has been handed to the compositor.
pub struct WindowSurface<C: Clock> {
    event_loop: EventLoop<()>,
    state: WindowState,
    clock: C,
    period: f64,
    last_flip: Option<f64>,
    render_failed: bool,
}

impl<C: Clock> WindowSurface<C> {
    pub fn open(clock: C, abort_key: &str, font: Option<PathBuf>) -> Result<Self> {
        let mut surface = Self {
            event_loop: EventLoop::new()?,
            state: WindowState {
                window: None,
                pixels: None,
                renderer: None,
                font,
                refresh_rate: None,
                keys: VecDeque::new(),
                abort_key: abort_key.to_string(),
                failure: None,
            },
            clock,
            period: 1.0 / FALLBACK_REFRESH_HZ,
            last_flip: None,
            render_failed: false,
        };

        let deadline = surface.clock.now() + WINDOW_WAIT.as_secs_f64();
        while surface.state.window.is_none() {
            if let PumpStatus::Exit(code) = surface.pump(Some(Duration::from_millis(10))) {
                return Err(surface
                    .state
                    .failure
                    .take()
                    .unwrap_or_else(|| anyhow!("event loop exited with code {code}")));
            }
            if surface.clock.now() > deadline {
                return Err(anyhow!("window did not open within {WINDOW_WAIT:?}"));
            }
        }

        if let Some(hz) = surface.state.refresh_rate.filter(|hz| *hz > 0.0) {
            surface.period = 1.0 / hz;
        } else {
            warn!("monitor refresh rate unknown, assuming {FALLBACK_REFRESH_HZ} Hz");
        }
        Ok(surface)
    }

    pub fn refresh_period(&self) -> f64 {
        self.period
    }

    fn pump(&mut self, timeout: Option<Duration>) -> PumpStatus {
        self.event_loop.pump_app_events(timeout, &mut self.state)
    }
}

impl<C: Clock> Surface for WindowSurface<C> {
    fn next_flip_time(&self) -> f64 {
        let now = self.clock.now();
        match self.last_flip {
            None => now + self.period,
            Some(last) => {
                let mut next = last + self.period;
                while next <= now {
                    next += self.period;
                }
                next
            }
        }
    }

    fn flip(&mut self, scene: &Scene) -> f64 {
        let predicted = self.next_flip_time();
        if let PumpStatus::Exit(_) = self.pump(Some(Duration::ZERO)) {
            self.state.keys.push_back(self.state.abort_key.clone());
        }
        match self.state.present(scene) {
            Ok(()) => self.render_failed = false,
            Err(e) => {
                if !self.render_failed {
                    error!("frame presentation failed: {e}");
                }
                self.render_failed = true;
                // Keep the refresh cadence even without a picture.
                self.clock.sleep_until(predicted);
            }
        }
        let at = self.clock.now();
        self.last_flip = Some(at);
        at
    }

    fn poll_keys(&mut self) -> Vec<String> {
        if let PumpStatus::Exit(_) = self.pump(Some(Duration::ZERO)) {
            self.state.keys.push_back(self.state.abort_key.clone());
        }
        self.state.keys.drain(..).collect()
    }

    fn cue(&mut self) {
        info!(target: "researcher", "cue: signal the dyad");
    }
}

impl<C: Clock> Drop for WindowSurface<C> {
    fn drop(&mut self) {
        if let Some(window) = &self.state.window {
            window.set_cursor_visible(true);
        }
    }
}

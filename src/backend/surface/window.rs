// Window surface - winit window + glutin OpenGL context
//
// The winit event loop is pumped manually (at most once per frame) instead of
// handing control to `run_app`, so the frame loop owns the thread and events
// are drained through `poll_event` like any other surface.

use super::{Bootstrap, Surface, SurfaceConfig, SurfaceError, SurfaceEvent};
use crate::backend::gl::GlowDevice;
use glutin::config::{Config, ConfigTemplateBuilder};
use glutin::context::{
    ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentContext, PossiblyCurrentContext,
    Version,
};
use glutin::display::{Display, GetGlDisplay};
use glutin::prelude::*;
use glutin::surface::{self as gl_surface, SurfaceAttributesBuilder, SwapInterval};
use glutin_winit::DisplayBuilder;
use raw_window_handle::HasWindowHandle;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::Duration;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

/// How long each startup pump may wait for the window to appear
const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(16);

// =============================================================================
// EVENT PUMP
// =============================================================================

/// winit handler: creates the window on first resume, queues window events
struct EventPump {
    attributes: Option<WindowAttributes>,
    created: Option<(Window, Config)>,
    failure: Option<String>,
    pending: VecDeque<SurfaceEvent>,
}

impl EventPump {
    fn new(attributes: WindowAttributes) -> Self {
        Self {
            attributes: Some(attributes),
            created: None,
            failure: None,
            pending: VecDeque::new(),
        }
    }
}

impl ApplicationHandler for EventPump {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attributes) = self.attributes.take() else {
            return;
        };

        let template = ConfigTemplateBuilder::new().with_alpha_size(8);
        let display_builder = DisplayBuilder::new().with_window_attributes(Some(attributes));

        match display_builder.build(event_loop, template, pick_config) {
            Ok((Some(window), config)) => self.created = Some((window, config)),
            Ok((None, _)) => self.failure = Some("no window was created".to_string()),
            Err(e) => self.failure = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let event = match event {
            WindowEvent::CloseRequested => SurfaceEvent::Closed,
            WindowEvent::Resized(size) => SurfaceEvent::Resized {
                width: size.width,
                height: size.height,
            },
            _ => SurfaceEvent::Other,
        };
        self.pending.push_back(event);
    }
}

/// Prefer the config with the most samples
fn pick_config(configs: Box<dyn Iterator<Item = Config> + '_>) -> Config {
    configs
        .reduce(|best, config| {
            if config.num_samples() > best.num_samples() {
                config
            } else {
                best
            }
        })
        // glutin reports an error before calling the picker when nothing matches
        .expect("config picker called with no configs")
}

// =============================================================================
// SURFACE
// =============================================================================

enum ContextSlot {
    NotCurrent(NotCurrentContext),
    Current(PossiblyCurrentContext),
    Empty,
}

/// Field order matters for Drop: GL objects go before the window, the window
/// before the event loop.
pub struct WindowSurface {
    context: ContextSlot,
    gl_surface: gl_surface::Surface<gl_surface::WindowSurface>,
    display: Display,
    window: Window,
    pump: EventPump,
    event_loop: EventLoop<()>,
    vertical_sync: bool,
    bootstrap: Bootstrap,
    pumped_this_frame: bool,
}

impl WindowSurface {
    pub fn open(config: &SurfaceConfig) -> Result<Self, SurfaceError> {
        log::info!("Opening window: {}x{} ({})", config.width, config.height, config.title);

        let creation = |e: &dyn std::fmt::Display| SurfaceError::Creation(e.to_string());

        let mut event_loop = EventLoop::new().map_err(|e| creation(&e))?;
        let attributes = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));
        let mut pump = EventPump::new(attributes);

        // Window creation happens inside the first `resumed` callback
        let (window, gl_config) = loop {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(STARTUP_PUMP_TIMEOUT), &mut pump)
            {
                return Err(SurfaceError::Creation(format!(
                    "event loop exited during startup (code {})",
                    code
                )));
            }
            if let Some(reason) = pump.failure.take() {
                return Err(SurfaceError::Creation(reason));
            }
            if let Some(created) = pump.created.take() {
                break created;
            }
        };

        let raw_window_handle = window
            .window_handle()
            .map_err(|e| creation(&e))?
            .as_raw();
        let display = gl_config.display();

        let context_attributes = ContextAttributesBuilder::new()
            .with_profile(GlProfile::Core)
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .build(Some(raw_window_handle));
        let context = unsafe { display.create_context(&gl_config, &context_attributes) }
            .map_err(|e| creation(&e))?;

        let size = window.inner_size();
        let (Some(width), Some(height)) =
            (NonZeroU32::new(size.width), NonZeroU32::new(size.height))
        else {
            return Err(SurfaceError::Creation(format!(
                "window has zero size {}x{}",
                size.width, size.height
            )));
        };
        let surface_attributes = SurfaceAttributesBuilder::<gl_surface::WindowSurface>::new()
            .build(raw_window_handle, width, height);
        let gl_surface = unsafe { display.create_window_surface(&gl_config, &surface_attributes) }
            .map_err(|e| creation(&e))?;

        Ok(Self {
            context: ContextSlot::NotCurrent(context),
            gl_surface,
            display,
            window,
            pump,
            event_loop,
            vertical_sync: config.vertical_sync,
            bootstrap: Bootstrap::Opened,
            pumped_this_frame: false,
        })
    }

    fn current_context(&self) -> Result<&PossiblyCurrentContext, SurfaceError> {
        match &self.context {
            ContextSlot::Current(context) => Ok(context),
            _ => Err(SurfaceError::OutOfOrder("GL context is not current")),
        }
    }

    fn resize_gl_surface(&self, width: u32, height: u32) {
        let (Some(width), Some(height)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
            // Minimized
            return;
        };
        if let Ok(context) = self.current_context() {
            self.gl_surface.resize(context, width, height);
        }
    }
}

impl Surface for WindowSurface {
    type Driver = GlowDevice;

    fn activate(&mut self) -> Result<(), SurfaceError> {
        self.bootstrap.activate()?;

        let slot = std::mem::replace(&mut self.context, ContextSlot::Empty);
        let ContextSlot::NotCurrent(context) = slot else {
            return Err(SurfaceError::OutOfOrder("GL context was already made current"));
        };
        let context = context
            .make_current(&self.gl_surface)
            .map_err(|e| SurfaceError::Creation(format!("make_current failed: {}", e)))?;

        let interval = if self.vertical_sync {
            SwapInterval::Wait(NonZeroU32::MIN)
        } else {
            SwapInterval::DontWait
        };
        if let Err(e) = self.gl_surface.set_swap_interval(&context, interval) {
            log::warn!("Failed to set swap interval {:?}: {}", interval, e);
        }

        self.context = ContextSlot::Current(context);
        Ok(())
    }

    fn bind_driver(&mut self) -> Result<GlowDevice, SurfaceError> {
        self.bootstrap.bind_driver()?;
        self.current_context()?;

        // A null entry point means the context never became usable
        if self.display.get_proc_address(c"glGetString").is_null() {
            return Err(SurfaceError::DriverBind(
                "glGetString entry point is missing".to_string(),
            ));
        }

        let gl = unsafe {
            glow::Context::from_loader_function_cstr(|symbol| self.display.get_proc_address(symbol))
        };
        unsafe { GlowDevice::new(gl) }.map_err(|e| SurfaceError::DriverBind(e.to_string()))
    }

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        if self.pump.pending.is_empty() && !self.pumped_this_frame {
            self.pumped_this_frame = true;
            let status = self
                .event_loop
                .pump_app_events(Some(Duration::ZERO), &mut self.pump);
            if let PumpStatus::Exit(code) = status {
                log::debug!("Event loop exited with code {}", code);
                self.pump.pending.push_back(SurfaceEvent::Closed);
            }
        }

        let event = self.pump.pending.pop_front()?;
        if let SurfaceEvent::Resized { width, height } = event {
            self.resize_gl_surface(width, height);
        }
        Some(event)
    }

    fn present(&mut self) -> Result<(), SurfaceError> {
        self.bootstrap.require_driver()?;
        self.pumped_this_frame = false;
        let context = self.current_context()?;
        self.gl_surface
            .swap_buffers(context)
            .map_err(|e| SurfaceError::Present(e.to_string()))
    }

    fn size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }
}

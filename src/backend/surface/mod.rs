// Surface bootstrap - where frames end up
//
// Every surface goes through the same startup order:
//   open -> activate -> bind_driver -> (poll_event / present)*
// Out-of-order calls fail with `SurfaceError::OutOfOrder` instead of silently
// handing out a driver bound to the wrong context.

mod headless;
mod window;

pub use headless::HeadlessSurface;
pub use window::WindowSurface;

use crate::backend::device::GpuInterface;
use thiserror::Error;

/// Settings needed to open a surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub vertical_sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Closed,
    Resized { width: u32, height: u32 },
    Other,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("failed to create surface: {0}")]
    Creation(String),

    #[error("failed to bind graphics driver: {0}")]
    DriverBind(String),

    #[error("surface used out of order: {0}")]
    OutOfOrder(&'static str),

    #[error("failed to present frame: {0}")]
    Present(String),
}

/// A rendering target plus the platform event source attached to it
pub trait Surface {
    /// GPU Interface handed out by `bind_driver`
    type Driver: GpuInterface;

    /// Make this surface the current rendering target of the calling thread
    fn activate(&mut self) -> Result<(), SurfaceError>;

    /// Load the driver entry points. Exactly once, after `activate`.
    fn bind_driver(&mut self) -> Result<Self::Driver, SurfaceError>;

    /// Next pending event, `None` once the queue is drained
    fn poll_event(&mut self) -> Option<SurfaceEvent>;

    /// Show the finished frame; blocks for vertical sync when enabled
    fn present(&mut self) -> Result<(), SurfaceError>;

    /// Current drawable size in pixels
    fn size(&self) -> (u32, u32);

    fn set_title(&mut self, _title: &str) {}
}

/// Startup order shared by all surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bootstrap {
    Opened,
    Active,
    DriverBound,
}

impl Bootstrap {
    pub(crate) fn activate(&mut self) -> Result<(), SurfaceError> {
        match self {
            Bootstrap::Opened => {
                *self = Bootstrap::Active;
                Ok(())
            }
            _ => Err(SurfaceError::OutOfOrder("surface is already active")),
        }
    }

    pub(crate) fn bind_driver(&mut self) -> Result<(), SurfaceError> {
        match self {
            Bootstrap::Active => {
                *self = Bootstrap::DriverBound;
                Ok(())
            }
            Bootstrap::Opened => Err(SurfaceError::OutOfOrder(
                "bind_driver called before activate",
            )),
            Bootstrap::DriverBound => Err(SurfaceError::OutOfOrder("driver is already bound")),
        }
    }

    pub(crate) fn require_driver(&self) -> Result<(), SurfaceError> {
        match self {
            Bootstrap::DriverBound => Ok(()),
            _ => Err(SurfaceError::OutOfOrder("present called before the driver was bound")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_enforces_order() {
        let mut state = Bootstrap::Opened;
        assert!(matches!(state.bind_driver(), Err(SurfaceError::OutOfOrder(_))));
        assert!(state.require_driver().is_err());

        state.activate().unwrap();
        assert!(matches!(state.activate(), Err(SurfaceError::OutOfOrder(_))));

        state.bind_driver().unwrap();
        assert!(state.require_driver().is_ok());
        assert!(matches!(state.bind_driver(), Err(SurfaceError::OutOfOrder(_))));
    }
}

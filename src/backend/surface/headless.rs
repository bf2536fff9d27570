// Headless surface - no window, scripted events, software driver
//
// Used for CI runs and tests. `present` never blocks: there is no display to
// synchronise with.

use super::{Bootstrap, Surface, SurfaceConfig, SurfaceError, SurfaceEvent};
use crate::backend::software::SoftwareDevice;
use std::collections::VecDeque;

pub struct HeadlessSurface {
    width: u32,
    height: u32,
    bootstrap: Bootstrap,
    pending: VecDeque<SurfaceEvent>,
    frames_presented: u64,
    close_after: Option<u64>,
    close_sent: bool,
}

impl HeadlessSurface {
    pub fn open(config: &SurfaceConfig) -> Result<Self, SurfaceError> {
        if config.width == 0 || config.height == 0 {
            return Err(SurfaceError::Creation(format!(
                "invalid surface size {}x{}",
                config.width, config.height
            )));
        }

        log::info!(
            "Opening headless surface: {}x{} ({})",
            config.width,
            config.height,
            config.title
        );

        Ok(Self {
            width: config.width,
            height: config.height,
            bootstrap: Bootstrap::Opened,
            pending: VecDeque::new(),
            frames_presented: 0,
            close_after: None,
            close_sent: false,
        })
    }

    /// Deliver `Closed` once `frames` frames have been presented
    #[cfg(test)]
    pub fn close_after(mut self, frames: u64) -> Self {
        self.close_after = Some(frames);
        self
    }

    /// Queue an event for the next drain
    #[cfg(test)]
    pub fn push_event(&mut self, event: SurfaceEvent) {
        self.pending.push_back(event);
    }

    #[cfg(test)]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

impl Surface for HeadlessSurface {
    type Driver = SoftwareDevice;

    fn activate(&mut self) -> Result<(), SurfaceError> {
        self.bootstrap.activate()
    }

    fn bind_driver(&mut self) -> Result<SoftwareDevice, SurfaceError> {
        self.bootstrap.bind_driver()?;
        Ok(SoftwareDevice::new(self.width, self.height))
    }

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        if !self.close_sent && self.close_after.is_some_and(|n| self.frames_presented >= n) {
            self.close_sent = true;
            self.pending.push_back(SurfaceEvent::Closed);
        }

        let event = self.pending.pop_front()?;
        if let SurfaceEvent::Resized { width, height } = event {
            self.width = width;
            self.height = height;
        }
        Some(event)
    }

    fn present(&mut self) -> Result<(), SurfaceError> {
        self.bootstrap.require_driver()?;
        self.frames_presented += 1;
        Ok(())
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_title(&mut self, title: &str) {
        log::trace!("Headless title: {}", title);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32) -> SurfaceConfig {
        SurfaceConfig {
            width,
            height,
            title: "test".to_string(),
            vertical_sync: true,
        }
    }

    #[test]
    fn fresh_surface_reports_no_close() {
        for (width, height) in [(1, 1), (800, 600), (1920, 1080), (3, 7)] {
            let mut surface = HeadlessSurface::open(&config(width, height)).unwrap();
            while let Some(event) = surface.poll_event() {
                assert_ne!(event, SurfaceEvent::Closed);
            }
            assert_eq!(surface.size(), (width, height));
        }
    }

    #[test]
    fn zero_size_is_a_creation_error() {
        assert!(matches!(
            HeadlessSurface::open(&config(0, 600)),
            Err(SurfaceError::Creation(_))
        ));
    }

    #[test]
    fn events_drain_one_at_a_time() {
        let mut surface = HeadlessSurface::open(&config(8, 8)).unwrap();
        surface.push_event(SurfaceEvent::Other);
        surface.push_event(SurfaceEvent::Resized { width: 4, height: 2 });

        assert_eq!(surface.poll_event(), Some(SurfaceEvent::Other));
        assert_eq!(surface.poll_event(), Some(SurfaceEvent::Resized { width: 4, height: 2 }));
        assert_eq!(surface.poll_event(), None);
        assert_eq!(surface.size(), (4, 2));
    }

    #[test]
    fn driver_binds_once_after_activation() {
        let mut surface = HeadlessSurface::open(&config(8, 8)).unwrap();
        assert!(surface.bind_driver().is_err());
        surface.activate().unwrap();
        let gpu = surface.bind_driver().unwrap();
        assert_eq!(gpu.framebuffer_size(), (8, 8));
        assert!(matches!(surface.bind_driver(), Err(SurfaceError::OutOfOrder(_))));
    }

    #[test]
    fn close_is_scripted_after_frames() {
        let mut surface = HeadlessSurface::open(&config(8, 8)).unwrap().close_after(2);
        surface.activate().unwrap();
        surface.bind_driver().unwrap();

        assert_eq!(surface.poll_event(), None);
        surface.present().unwrap();
        assert_eq!(surface.poll_event(), None);
        surface.present().unwrap();
        assert_eq!(surface.poll_event(), Some(SurfaceEvent::Closed));
        assert_eq!(surface.poll_event(), None);
    }

    #[test]
    fn present_requires_bound_driver() {
        let mut surface = HeadlessSurface::open(&config(8, 8)).unwrap();
        assert!(matches!(surface.present(), Err(SurfaceError::OutOfOrder(_))));
    }
}

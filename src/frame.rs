// Frame loop
//
// One tick: drain events, clear, bind, draw the triangle, unbind, present.
// Driver errors inside a tick are logged and reported, never fatal. Only a
// failed present ends the loop with an error.

use crate::backend::binding::{FrameContext, FrameReport};
use crate::backend::buffer::GeometryBuffer;
use crate::backend::device::{AttribLocation, GpuError, GpuInterface, Primitive};
use crate::backend::shader::Program;
use crate::backend::surface::{Surface, SurfaceError, SurfaceEvent};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Terminal: no further frames are drawn or presented
    Closing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameOptions {
    pub clear_color: [f32; 4],
    /// Stop after this many presented frames
    pub max_frames: Option<u64>,
    pub show_fps: bool,
    /// Base window title for the FPS read-out
    pub title: String,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames: None,
            show_fps: false,
            title: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames_presented: u64,
    pub driver_errors: usize,
}

pub struct FrameLoop {
    program: Program,
    geometry: GeometryBuffer,
    position: AttribLocation,
    options: FrameOptions,
    state: LoopState,
    frames_presented: u64,
    driver_errors: usize,
    fps: FpsCounter,
}

impl FrameLoop {
    pub fn new(
        program: Program,
        geometry: GeometryBuffer,
        position: AttribLocation,
        options: FrameOptions,
    ) -> Self {
        Self {
            program,
            geometry,
            position,
            options,
            state: LoopState::Running,
            frames_presented: 0,
            driver_errors: 0,
            fps: FpsCounter::new(Instant::now()),
        }
    }

    pub fn summary(&self) -> LoopSummary {
        LoopSummary {
            frames_presented: self.frames_presented,
            driver_errors: self.driver_errors,
        }
    }

    // =========================================================================
    // TICK
    // =========================================================================

    pub fn tick<S, G>(&mut self, surface: &mut S, gpu: &mut G) -> Result<FrameReport, SurfaceError>
    where
        S: Surface + ?Sized,
        G: GpuInterface + ?Sized,
    {
        if self.state == LoopState::Closing {
            return Ok(FrameReport::default());
        }

        let mut resize = None;
        while let Some(event) = surface.poll_event() {
            match event {
                SurfaceEvent::Closed => {
                    log::info!("Surface closed");
                    self.state = LoopState::Closing;
                }
                SurfaceEvent::Resized { width, height } if width == 0 || height == 0 => {
                    log::debug!("Ignoring zero-sized resize (minimized)");
                }
                SurfaceEvent::Resized { width, height } => {
                    log::debug!("Surface resized: {}x{}", width, height);
                    resize = Some((width, height));
                }
                SurfaceEvent::Other => {}
            }
        }

        if self.state == LoopState::Closing {
            return Ok(FrameReport::default());
        }

        let mut frame = FrameContext::new(gpu);
        if let Some((width, height)) = resize {
            frame.viewport(width, height);
        }
        frame.clear(self.options.clear_color);
        frame.use_program(&self.program);
        frame.bind_buffer(&self.geometry);
        frame.enable_attribute(self.position, self.geometry.layout());
        frame.draw(Primitive::Triangles, 0, self.geometry.vertex_count());
        let report = frame.finish();

        if !report.drew {
            log::debug!("Frame {} presented without a draw", self.frames_presented);
        }

        surface.present()?;
        self.frames_presented += 1;
        self.driver_errors += report.errors.len();

        if self.options.show_fps {
            if let Some(sample) = self.fps.record(Instant::now()) {
                surface.set_title(&sample.title(&self.options.title));
            }
        }

        if self
            .options
            .max_frames
            .is_some_and(|max| self.frames_presented >= max)
        {
            log::info!("Reached frame limit ({} frames)", self.frames_presented);
            self.state = LoopState::Closing;
        }

        Ok(report)
    }

    /// Tick until the loop is closing
    pub fn run<S, G>(&mut self, surface: &mut S, gpu: &mut G) -> Result<LoopSummary, SurfaceError>
    where
        S: Surface + ?Sized,
        G: GpuInterface + ?Sized,
    {
        log::info!("Entering frame loop");
        while self.state == LoopState::Running {
            self.tick(surface, gpu)?;
        }

        let summary = self.summary();
        log::info!(
            "Frame loop finished: {} frames presented, {} driver errors",
            summary.frames_presented,
            summary.driver_errors
        );
        Ok(summary)
    }

    /// Release the program, then the geometry. Both are attempted; the first
    /// failure is returned.
    pub fn shutdown<G: GpuInterface + ?Sized>(self, gpu: &mut G) -> Result<(), GpuError> {
        log::info!("Releasing GPU resources");
        let program = self.program.release(gpu);
        let geometry = self.geometry.release(gpu);
        program.and(geometry)
    }
}

// =============================================================================
// FPS TRACKING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct FpsSample {
    fps: f32,
    frame_ms: f32,
}

impl FpsSample {
    fn title(&self, base: &str) -> String {
        format!("{} - {:.0} FPS ({:.2}ms)", base, self.fps, self.frame_ms)
    }
}

/// Produces one sample per elapsed second
#[derive(Debug)]
struct FpsCounter {
    frame_count: u32,
    last_update: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            last_update: now,
            last_frame: now,
        }
    }

    fn record(&mut self, now: Instant) -> Option<FpsSample> {
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_update).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let sample = FpsSample {
            fps: self.frame_count as f32 / elapsed,
            frame_ms: frame_time * 1000.0,
        };
        self.frame_count = 0;
        self.last_update = now;
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::TRIANGLE;
    use crate::backend::device::ErrorCode;
    use crate::backend::shader::{build_program, TRIANGLE_FRAG, TRIANGLE_VERT};
    use crate::backend::software::raster::Viewport;
    use crate::backend::software::{ObjectCounts, SoftwareDevice};
    use crate::backend::surface::{HeadlessSurface, SurfaceConfig};
    use glam::Vec4;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const GREEN: Vec4 = Vec4::new(0.0, 1.0, 0.0, 1.0);

    fn surface(width: u32, height: u32) -> HeadlessSurface {
        HeadlessSurface::open(&SurfaceConfig {
            width,
            height,
            title: "test".to_string(),
            vertical_sync: false,
        })
        .unwrap()
    }

    fn bootstrap(
        surface: &mut HeadlessSurface,
        options: FrameOptions,
    ) -> (SoftwareDevice, FrameLoop) {
        surface.activate().unwrap();
        let mut gpu = surface.bind_driver().unwrap();
        let mut program = build_program(&mut gpu, TRIANGLE_VERT, TRIANGLE_FRAG).unwrap();
        let position = program.resolve_attribute(&mut gpu, "position").unwrap();
        let geometry = GeometryBuffer::from_points(&mut gpu, &TRIANGLE).unwrap();
        (gpu, FrameLoop::new(program, geometry, position, options))
    }

    #[test]
    fn tick_leaves_neutral_binding_state() {
        let mut surface = surface(32, 32);
        let (mut gpu, mut frames) = bootstrap(&mut surface, FrameOptions::default());

        for _ in 0..3 {
            let report = frames.tick(&mut surface, &mut gpu).unwrap();
            assert!(report.errors.is_empty());
            assert!(gpu.enabled_attributes().is_empty());
            assert_eq!(gpu.array_buffer_binding(), None);
        }
        assert_eq!(surface.frames_presented(), 3);
    }

    #[test]
    fn triangle_is_drawn_green_over_clear_color() {
        let mut surface = surface(64, 64);
        let options = FrameOptions {
            clear_color: [0.1, 0.2, 0.3, 1.0],
            ..FrameOptions::default()
        };
        let (mut gpu, mut frames) = bootstrap(&mut surface, options);

        let report = frames.tick(&mut surface, &mut gpu).unwrap();
        assert_eq!(report, FrameReport { errors: vec![], drew: true });

        assert_eq!(gpu.draw_count(), 1);
        let draw = gpu.last_draw().unwrap();
        assert_eq!(draw.primitive, Primitive::Triangles);
        assert_eq!(draw.count, 3);
        assert_eq!(draw.color, GREEN);
        assert_eq!(
            draw.positions,
            vec![
                Vec4::new(0.0, 0.5, 0.0, 1.0),
                Vec4::new(-0.5, -0.5, 0.0, 1.0),
                Vec4::new(0.5, -0.5, 0.0, 1.0),
            ]
        );

        // Centroid (0, -1/6) lands at window (32, 26.7)
        assert_eq!(gpu.pixel(32, 26), Some(GREEN));
        assert_eq!(gpu.pixel(0, 0), Some(Vec4::new(0.1, 0.2, 0.3, 1.0)));
        assert_eq!(gpu.pixel(63, 63), Some(Vec4::new(0.1, 0.2, 0.3, 1.0)));
    }

    #[test]
    fn resize_sets_viewport_only() {
        let mut surface = surface(800, 600);
        let (mut gpu, mut frames) = bootstrap(&mut surface, FrameOptions::default());
        let buffer = frames.geometry.handle();
        let before = gpu.buffer_contents(buffer).map(<[u8]>::to_vec);

        surface.push_event(SurfaceEvent::Resized { width: 400, height: 300 });
        frames.tick(&mut surface, &mut gpu).unwrap();

        assert_eq!(
            gpu.current_viewport(),
            Viewport {
                x: 0,
                y: 0,
                width: 400,
                height: 300
            }
        );
        assert_eq!(gpu.buffer_contents(buffer).map(<[u8]>::to_vec), before);
        assert_eq!(gpu.current_program(), Some(frames.program.handle()));
        assert!(gpu.program_link_status(frames.program.handle()));
    }

    #[test]
    fn zero_sized_resize_is_skipped() {
        let mut surface = surface(32, 32);
        let (mut gpu, mut frames) = bootstrap(&mut surface, FrameOptions::default());

        surface.push_event(SurfaceEvent::Resized { width: 0, height: 0 });
        let report = frames.tick(&mut surface, &mut gpu).unwrap();

        assert!(report.errors.is_empty());
        assert_eq!(gpu.current_viewport().width, 32);
    }

    #[test]
    fn closed_ends_loop_without_drawing() {
        let mut surface = surface(32, 32);
        let (mut gpu, mut frames) = bootstrap(&mut surface, FrameOptions::default());

        surface.push_event(SurfaceEvent::Other);
        surface.push_event(SurfaceEvent::Closed);
        let report = frames.tick(&mut surface, &mut gpu).unwrap();

        assert_eq!(report, FrameReport::default());
        assert_eq!(frames.state, LoopState::Closing);
        assert_eq!(gpu.draw_count(), 0);
        assert_eq!(surface.frames_presented(), 0);
    }

    #[test]
    fn driver_errors_are_reported_and_loop_continues() {
        let mut surface = surface(32, 32);
        let (mut gpu, frames) = bootstrap(&mut surface, FrameOptions::default());
        let FrameLoop { program, geometry, options, .. } = frames;
        let mut frames = FrameLoop::new(program, geometry, AttribLocation(20), options);

        let report = frames.tick(&mut surface, &mut gpu).unwrap();
        assert_eq!(
            report.errors.first(),
            Some(&GpuError::Driver {
                operation: "enable vertex attribute",
                code: ErrorCode::INVALID_VALUE,
            })
        );
        assert_eq!(frames.state, LoopState::Running);
        assert_eq!(frames.frames_presented, 1);
    }

    #[test]
    fn run_stops_at_frame_limit() {
        let mut surface = surface(16, 16);
        let options = FrameOptions {
            max_frames: Some(5),
            ..FrameOptions::default()
        };
        let (mut gpu, mut frames) = bootstrap(&mut surface, options);

        let summary = frames.run(&mut surface, &mut gpu).unwrap();
        assert_eq!(
            summary,
            LoopSummary {
                frames_presented: 5,
                driver_errors: 0
            }
        );
        assert_eq!(gpu.draw_count(), 5);
    }

    #[test]
    fn run_stops_when_surface_closes() {
        let mut surface = surface(16, 16).close_after(2);
        let (mut gpu, mut frames) = bootstrap(&mut surface, FrameOptions::default());

        let summary = frames.run(&mut surface, &mut gpu).unwrap();
        assert_eq!(summary.frames_presented, 2);
        assert_eq!(frames.state, LoopState::Closing);
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut surface = surface(16, 16);
        let (mut gpu, frames) = bootstrap(&mut surface, FrameOptions::default());

        frames.shutdown(&mut gpu).unwrap();
        assert_eq!(gpu.live_objects(), ObjectCounts::default());
    }

    #[test]
    fn fps_samples_once_per_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        for frame in 1..100 {
            assert_eq!(counter.record(start + Duration::from_millis(frame * 10)), None);
        }
        let sample = counter.record(start + Duration::from_millis(1000)).unwrap();
        assert_eq!(sample.fps.round(), 100.0);
        assert_eq!(sample.title("OpenGL Triangle"), "OpenGL Triangle - 100 FPS (10.00ms)");
    }
}

// =============================================================================
// APPLICATION - startup sequence and frame loop wiring
// =============================================================================
//
// Startup order: open surface -> activate -> bind driver -> build program ->
// resolve `position` -> upload triangle -> frame loop -> release. Any startup
// failure is fatal and comes back as an error chain for `main` to report.

use crate::backend::buffer::{GeometryBuffer, TRIANGLE};
use crate::backend::device::GpuInterface;
use crate::backend::shader::{build_program, Program, TRIANGLE_FRAG, TRIANGLE_VERT};
use crate::backend::surface::{HeadlessSurface, Surface, SurfaceConfig, WindowSurface};
use crate::config::{Backend, Config};
use crate::frame::{FrameLoop, FrameOptions, LoopSummary};
use anyhow::{Context, Result};

/// Name of the vertex input the triangle is fed through
const POSITION_ATTRIBUTE: &str = "position";

pub fn run(config: &Config) -> Result<LoopSummary> {
    let surface_config = SurfaceConfig {
        width: config.window.width,
        height: config.window.height,
        title: config.window.title.clone(),
        vertical_sync: config.graphics.vertical_sync,
    };

    match config.backend() {
        Backend::OpenGl => {
            let surface = WindowSurface::open(&surface_config).context("Failed to open window")?;
            run_on(surface, config, TRIANGLE_VERT, TRIANGLE_FRAG)
        }
        Backend::Software => {
            let surface = HeadlessSurface::open(&surface_config)
                .context("Failed to open headless surface")?;
            run_on(surface, config, TRIANGLE_VERT, TRIANGLE_FRAG)
        }
    }
}

fn run_on<S: Surface>(
    mut surface: S,
    config: &Config,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<LoopSummary> {
    surface.activate().context("Failed to activate surface")?;
    let (width, height) = surface.size();
    log::info!("Surface ready: {}x{}", width, height);
    // Declared after the surface so the driver is dropped while its context lives
    let mut gpu = surface.bind_driver().context("Failed to bind graphics driver")?;

    let mut program = build_program(&mut gpu, vertex_source, fragment_source)
        .context("Failed to build shader program")?;

    let position = match program.resolve_attribute(&mut gpu, POSITION_ATTRIBUTE) {
        Ok(location) => location,
        Err(e) => {
            release_after_failure(program, &mut gpu);
            return Err(e).context("Failed to resolve vertex attribute");
        }
    };

    let geometry = match GeometryBuffer::from_points(&mut gpu, &TRIANGLE) {
        Ok(geometry) => geometry,
        Err(e) => {
            release_after_failure(program, &mut gpu);
            return Err(e).context("Failed to upload triangle geometry");
        }
    };

    let options = FrameOptions {
        clear_color: config.graphics.clear_color,
        max_frames: config.max_frames(),
        show_fps: config.debug.show_fps,
        title: config.window.title.clone(),
    };
    let mut frames = FrameLoop::new(program, geometry, position, options);
    let summary = frames.run(&mut surface, &mut gpu);

    if let Err(e) = frames.shutdown(&mut gpu) {
        log::warn!("Failed to release GPU resources: {}", e);
    }

    summary.context("Frame loop failed")
}

/// Startup already failed; a release error is only worth a warning
fn release_after_failure<G: GpuInterface>(program: Program, gpu: &mut G) {
    if let Err(e) = program.release(gpu) {
        log::warn!("Failed to release shader program: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareDevice;

    fn software_config(extra: &str) -> Config {
        let content = format!(
            "[graphics]\nbackend = \"software\"\n[window]\nwidth = 32\nheight = 32\n{}",
            extra
        );
        Config::from_toml_str(&content).unwrap()
    }

    fn headless(config: &Config) -> HeadlessSurface {
        HeadlessSurface::open(&SurfaceConfig {
            width: config.window.width,
            height: config.window.height,
            title: config.window.title.clone(),
            vertical_sync: false,
        })
        .unwrap()
    }

    #[test]
    fn software_backend_runs_to_frame_limit() {
        let config = software_config("[run]\nmax_frames = 4\n");
        let summary = run(&config).unwrap();
        assert_eq!(summary.frames_presented, 4);
        assert_eq!(summary.driver_errors, 0);
    }

    #[test]
    fn user_close_ends_run() {
        let config = software_config("[run]\nmax_frames = 100\n");
        let surface = headless(&config).close_after(2);
        let summary = run_on(surface, &config, TRIANGLE_VERT, TRIANGLE_FRAG).unwrap();
        assert_eq!(summary.frames_presented, 2);
    }

    #[test]
    fn compile_failure_is_fatal() {
        let config = software_config("");
        let broken = "#version 330 core\nout vec4 fragColor;\nvoid main() {\n    fragColor = 1.0;\n}\n";
        let err = run_on(headless(&config), &config, TRIANGLE_VERT, broken).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.starts_with("Failed to build shader program"), "{}", message);
        assert!(message.contains("fragment stage"), "{}", message);
    }

    #[test]
    fn missing_position_input_is_fatal() {
        let config = software_config("");
        let vertex = "#version 330 core\nlayout (location = 0) in vec2 corner;\nvoid main() {\n    gl_Position = vec4(corner, 0.0, 1.0);\n}\n";
        let err = run_on(headless(&config), &config, vertex, TRIANGLE_FRAG).unwrap_err();
        assert!(format!("{:#}", err).contains("'position'"), "{:#}", err);
    }

    #[test]
    fn failed_release_after_failure_only_warns() {
        let mut gpu = SoftwareDevice::new(4, 4);
        let program = build_program(&mut gpu, TRIANGLE_VERT, TRIANGLE_FRAG).unwrap();
        gpu.delete_program(program.handle());

        release_after_failure(program, &mut gpu);
        // The release error was consumed, nothing is left on the flag
        assert_eq!(gpu.last_error(), None);
    }
}

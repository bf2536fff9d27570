// =============================================================================
// GL TRIANGLE - minimal programmable rasterization pipeline
// =============================================================================
//
// Opens a surface, builds a two-stage shader program from embedded GLSL,
// uploads one triangle and redraws it every frame until the window closes.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  app::run (startup order, fatal errors)                         │
// │    └── Surface (winit + glutin window, or headless)             │
// │          └── GPU Interface (glow driver, or software driver)    │
// │                ├── Shader Program Builder                       │
// │                ├── Geometry Buffer                              │
// │                └── Frame Loop (per-frame binding scope)         │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Drain surface events (close, resize)
// 2. Clear to the background color
// 3. Bind program + buffer, enable the position attribute
// 4. Draw 3 vertices as triangles
// 5. Disable the attribute, unbind the buffer
// 6. Present
//
// Exit code is 0 on a normal close and -1 on any fatal startup error.
//
// =============================================================================

mod app;
mod backend;
mod config;
mod frame;

use config::{Config, CONFIG_PATH};
use std::fs::OpenOptions;
use std::io::Write;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() {
    // Load configuration from config.toml; the outcome is logged once the
    // logger exists
    let (config, outcome) = Config::load();

    init_logging(&config);
    outcome.report(CONFIG_PATH);
    log::debug!("Config: {:?}", config);
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{}, backend: {}, vsync: {}",
        config.window.width,
        config.window.height,
        config.graphics.backend,
        config.graphics.vertical_sync
    );

    match app::run(&config) {
        Ok(summary) => {
            log::info!("Exiting after {} frames", summary.frames_presented);
        }
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(-1);
        }
    }
}

/// Initialize logging, optionally into a log file instead of stderr.
/// `RUST_LOG` overrides the configured level.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== {} Log ===", config.window.title);
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!(
                    "Failed to open log file {:?}: {}. Logging to stderr.",
                    config.debug.log_file, e
                );
            }
        }
    }

    builder.init();
}

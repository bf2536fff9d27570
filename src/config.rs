// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional. A missing file means defaults; a file that cannot
// be read or parsed is reported and replaced by defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Configuration file read at startup, relative to the working directory
pub const CONFIG_PATH: &str = "config.toml";

/// Frames the headless backend renders when `run.max_frames` is not set
pub const HEADLESS_DEFAULT_FRAMES: u64 = 120;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub run: RunConfig,
}

/// Window settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "OpenGL Triangle".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub backend: String,
    pub vertical_sync: bool,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: "opengl".to_string(),
            vertical_sync: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "renderer.log".to_string(),
            show_fps: false,
        }
    }
}

/// Run limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this many frames; unset runs until the window closes
    pub max_frames: Option<u64>,
}

/// Which surface + driver pair to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    OpenGl,
    Software,
}

/// How `Config::load` obtained its values.
/// Logged by `report` once logging is up, since loading happens before that.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded,
    NotFound,
    Invalid(anyhow::Error),
}

impl LoadOutcome {
    pub fn report(&self, path: &str) {
        match self {
            LoadOutcome::Loaded => log::info!("Loaded configuration from {:?}", path),
            LoadOutcome::NotFound => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            LoadOutcome::Invalid(e) => {
                log::warn!("Failed to load {}: {:#}. Using defaults.", path, e)
            }
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> (Self, LoadOutcome) {
        Self::load_from_path(CONFIG_PATH)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> (Self, LoadOutcome) {
        let path = path.as_ref();

        if !path.exists() {
            return (Config::default(), LoadOutcome::NotFound);
        }

        match Self::read(path) {
            Ok(config) => (config, LoadOutcome::Loaded),
            Err(e) => (Config::default(), LoadOutcome::Invalid(e)),
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the configured backend
    pub fn backend(&self) -> Backend {
        match self.graphics.backend.to_lowercase().as_str() {
            "opengl" | "gl" => Backend::OpenGl,
            "software" | "headless" => Backend::Software,
            _ => {
                log::warn!(
                    "Unknown backend '{}', defaulting to opengl",
                    self.graphics.backend
                );
                Backend::OpenGl
            }
        }
    }

    /// Frame limit for the chosen backend
    pub fn max_frames(&self) -> Option<u64> {
        match self.backend() {
            Backend::Software => self.run.max_frames.or(Some(HEADLESS_DEFAULT_FRAMES)),
            Backend::OpenGl => self.run.max_frames,
        }
    }

    /// Log level filter, `info` when the configured name is not recognised
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            eprintln!(
                "Unknown log level '{}', using info",
                self.debug.log_level
            );
            log::LevelFilter::Info
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.window.title, "OpenGL Triangle");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.backend(), Backend::OpenGl);
        assert_eq!(config.max_frames(), None);
    }

    #[test]
    fn missing_sections_and_keys_use_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 400

            [graphics]
            backend = "software"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 400);
        assert_eq!(config.window.height, 600);
        assert!(config.graphics.vertical_sync);
        assert_eq!(config.debug, DebugConfig::default());
        assert_eq!(config.backend(), Backend::Software);
        assert_eq!(config.max_frames(), Some(HEADLESS_DEFAULT_FRAMES));
    }

    #[test]
    fn explicit_frame_limit_wins() {
        let config = Config::from_toml_str("[run]\nmax_frames = 3\n").unwrap();
        assert_eq!(config.max_frames(), Some(3));
    }

    #[test]
    fn unknown_backend_falls_back_to_opengl() {
        let config = Config::from_toml_str("[graphics]\nbackend = \"metal\"\n").unwrap();
        assert_eq!(config.backend(), Backend::OpenGl);
    }

    #[test]
    fn log_level_parses_names() {
        let mut config = Config::default();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
        config.debug.log_level = "TRACE".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Trace);
        config.debug.log_level = "loud".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml_str("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn missing_file_is_defaults() {
        let (config, outcome) = Config::load_from_path("does/not/exist/config.toml");
        assert_eq!(config, Config::default());
        assert!(matches!(outcome, LoadOutcome::NotFound));
    }

    #[test]
    fn unreadable_file_keeps_the_error_for_reporting() {
        let path = std::env::temp_dir()
            .join(format!("gl-triangle-{}-bad.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (config, outcome) = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config, Config::default());
        match outcome {
            LoadOutcome::Invalid(e) => {
                let message = format!("{:#}", e);
                assert!(message.starts_with("Failed to parse config file"), "{}", message);
            }
            other => panic!("expected a parse failure, got {:?}", other),
        }
    }

    #[test]
    fn valid_file_is_loaded() {
        let path = std::env::temp_dir()
            .join(format!("gl-triangle-{}-good.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = 320\n").unwrap();

        let (config, outcome) = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 320);
        assert!(matches!(outcome, LoadOutcome::Loaded));
    }
}

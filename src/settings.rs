//! Application settings using Figment
//!
//! Settings are layered, later layers overriding earlier ones:
//! 1. Built-in defaults
//! 2. `beamline.toml` (or the file passed on the command line)
//! 3. Environment variables prefixed with `BEAMLINE_`
//!
//! These settings describe the installation (where the project, the
//! configuration files and the log directory live). Alignment parameters and
//! persisted results are kept in the sectioned configuration store instead,
//! see [`crate::store`].
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! BEAMLINE_PROJECT_DIR=/opt/beamline
//! BEAMLINE_LOG__LEVEL=debug
//! BEAMLINE_COMPENSATION__MAX_ATTEMPTS=5
//! ```
//!
//! # Example
//!
//! ```no_run
//! use beamline_control::settings::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load_from("beamline.toml")?;
//!     println!("Config dir: {}", settings.config_dir.display());
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DeviceError};

/// Top-level application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Installation root; analysis scripts live in `scripts/<Device>` below it
    pub project_dir: PathBuf,
    /// Directory holding both configuration files
    pub config_dir: PathBuf,
    /// Main configuration file (persisted alignment results)
    pub config_file: PathBuf,
    /// Alignment settings file (scan parameters, script names)
    pub alignment_settings_file: PathBuf,
    /// Logging
    #[serde(default)]
    pub log: LogSettings,
    /// Script launcher
    #[serde(default)]
    pub post_processing: PostProcessingSettings,
    /// Crystal flip compensation loop
    #[serde(default)]
    pub compensation: CompensationSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Directory for rolling log files and alignment result folders
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
    /// Number of rotated log files kept
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
    /// Emit JSON lines on the console instead of plain text
    #[serde(default)]
    pub json: bool,
}

/// External script configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostProcessingSettings {
    /// Interpreter used to launch analysis scripts
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

/// Bounded retry budget for the flipped-orientation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationSettings {
    /// Maximum compensation attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("config")
}

fn default_config_file() -> PathBuf {
    PathBuf::from("beamline_config.toml")
}

fn default_alignment_file() -> PathBuf {
    PathBuf::from("alignment_settings.toml")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("LogFiles")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_prefix() -> String {
    "beamline".to_string()
}

fn default_max_log_files() -> usize {
    3
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            config_dir: default_config_dir(),
            config_file: default_config_file(),
            alignment_settings_file: default_alignment_file(),
            log: LogSettings::default(),
            post_processing: PostProcessingSettings::default(),
            compensation: CompensationSettings::default(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            level: default_log_level(),
            file_prefix: default_log_prefix(),
            max_files: default_max_log_files(),
            json: false,
        }
    }
}

impl Default for PostProcessingSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
        }
    }
}

impl Default for CompensationSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// ============================================================================
// Loading and Validation
// ============================================================================

impl Settings {
    /// Load from `beamline.toml` in the working directory.
    pub fn load() -> AppResult<Self> {
        Self::load_from("beamline.toml")
    }

    /// Load from `path`. A missing file leaves the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BEAMLINE_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(DeviceError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            )));
        }

        if self.log.max_files == 0 {
            return Err(DeviceError::Configuration(
                "log.max_files must be at least 1".to_string(),
            ));
        }

        if self.compensation.max_attempts == 0 {
            return Err(DeviceError::Configuration(
                "compensation.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.post_processing.interpreter.trim().is_empty() {
            return Err(DeviceError::Configuration(
                "post_processing.interpreter must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory the configuration files are resolved against.
    ///
    /// Relative paths are taken relative to `project_dir`.
    pub fn config_base(&self) -> PathBuf {
        self.resolve(&self.config_dir)
    }

    /// Directory for log files and alignment result folders.
    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.log.directory)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.compensation.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beamline.toml");
        fs::write(
            &path,
            r#"
project_dir = "/opt/beamline"
config_dir = "cfg"
config_file = "main.toml"
alignment_settings_file = "align.toml"

[log]
level = "debug"

[compensation]
max_attempts = 5
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.log.level, "debug");
        assert_eq!(settings.log.max_files, 3);
        assert_eq!(settings.compensation.max_attempts, 5);
        assert_eq!(settings.config_base(), PathBuf::from("/opt/beamline/cfg"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let dir = tempdir().unwrap();
        std::env::set_var("BEAMLINE_COMPENSATION__MAX_ATTEMPTS", "7");
        let result = Settings::load_from(dir.path().join("absent.toml"));
        std::env::remove_var("BEAMLINE_COMPENSATION__MAX_ATTEMPTS");
        assert_eq!(result.unwrap().compensation.max_attempts, 7);
    }

    #[test]
    #[serial]
    fn test_invalid_log_level_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beamline.toml");
        fs::write(&path, "[log]\nlevel = \"chatty\"\n").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(DeviceError::Configuration(_))
        ));
    }
}

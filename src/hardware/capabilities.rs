//! Collaborator contracts consumed by the device modules.
//!
//! Each trait describes one concern the devices depend on but do not own:
//! motor drivers, the hexapod, the scanning helpers, result files, the
//! sectioned configuration store and the post-processing script runner.
//!
//! Motion collaborators report integer status codes where `0` means success,
//! matching what the motion controllers return over their vendor interfaces.
//! Everything else reports through [`AppResult`].
//!
//! All methods are synchronous. A device operation is a blocking, sequential
//! procedure and its collaborators are expected to block until the hardware
//! settles.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DeviceError};

// =============================================================================
// Motion
// =============================================================================

/// Single-axis stepper motor driver.
pub trait Motor: Send {
    /// Opens the driver connection.
    fn connect(&mut self) -> i32;
    /// Closes the driver connection.
    fn disconnect(&mut self) -> i32;
    /// Runs the driver calibration routine.
    fn calibrate(&mut self) -> i32;
    /// Drives the axis to its reference position.
    fn go_home(&mut self) -> i32;
    /// Moves to an absolute position in user units.
    fn move_to(&mut self, position: f64) -> i32;
    /// Current position in user units.
    fn position_user_units(&self) -> f64;
}

/// One of the six hexapod degrees of freedom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HexapodAxis {
    /// Translation along X.
    X,
    /// Translation along Y.
    Y,
    /// Translation along Z.
    Z,
    /// Rotation about X.
    U,
    /// Rotation about Y.
    V,
    /// Rotation about Z.
    W,
}

impl HexapodAxis {
    /// All axes in tuple order.
    pub const ALL: [HexapodAxis; 6] = [Self::X, Self::Y, Self::Z, Self::U, Self::V, Self::W];

    /// Index understood by the scanning collaborator (`X = 1` .. `W = 6`).
    pub fn scan_index(self) -> i32 {
        match self {
            Self::X => 1,
            Self::Y => 2,
            Self::Z => 3,
            Self::U => 4,
            Self::V => 5,
            Self::W => 6,
        }
    }

    /// Axis letter.
    pub fn letter(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::Y => "Y",
            Self::Z => "Z",
            Self::U => "U",
            Self::V => "V",
            Self::W => "W",
        }
    }
}

impl fmt::Display for HexapodAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// Six-axis hexapod target tuple.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HexapodCoordinate {
    /// X translation.
    pub x: f64,
    /// Y translation.
    pub y: f64,
    /// Z translation.
    pub z: f64,
    /// Rotation about X.
    pub u: f64,
    /// Rotation about Y.
    pub v: f64,
    /// Rotation about Z.
    pub w: f64,
}

impl HexapodCoordinate {
    /// Builds a tuple from its six components.
    pub const fn new(x: f64, y: f64, z: f64, u: f64, v: f64, w: f64) -> Self {
        Self { x, y, z, u, v, w }
    }

    /// Component for `axis`.
    pub fn get(&self, axis: HexapodAxis) -> f64 {
        match axis {
            HexapodAxis::X => self.x,
            HexapodAxis::Y => self.y,
            HexapodAxis::Z => self.z,
            HexapodAxis::U => self.u,
            HexapodAxis::V => self.v,
            HexapodAxis::W => self.w,
        }
    }

    /// Overwrites the component for `axis`.
    pub fn set(&mut self, axis: HexapodAxis, value: f64) {
        match axis {
            HexapodAxis::X => self.x = value,
            HexapodAxis::Y => self.y = value,
            HexapodAxis::Z => self.z = value,
            HexapodAxis::U => self.u = value,
            HexapodAxis::V => self.v = value,
            HexapodAxis::W => self.w = value,
        }
    }
}

/// Six-axis parallel positioner.
///
/// The hexapod keeps a cached target tuple. Setters only change the cache;
/// [`Hexapod::set_position_absolute`] sends the whole tuple in one move.
pub trait Hexapod: Send {
    /// Opens the controller connection for a positioner group.
    fn connect(&mut self, timeout_s: i32, group: &str) -> i32;
    /// Closes the controller connection.
    fn disconnect(&mut self) -> i32;
    /// Runs the homing sequence.
    fn go_home(&mut self) -> i32;
    /// Sends the cached target tuple as one absolute move.
    fn set_position_absolute(&mut self) -> i32;
    /// Cached target tuple.
    fn coordinates(&self) -> HexapodCoordinate;
    /// Replaces the whole cached target tuple.
    fn set_coordinates(&mut self, target: HexapodCoordinate);
    /// Actual position read back from the controller.
    fn position(&self, axis: HexapodAxis) -> f64;

    /// Cached target for one axis.
    fn coordinate(&self, axis: HexapodAxis) -> f64 {
        self.coordinates().get(axis)
    }

    /// Changes one axis of the cached target tuple.
    fn set_coordinate(&mut self, axis: HexapodAxis, value: f64) {
        let mut target = self.coordinates();
        target.set(axis, value);
        self.set_coordinates(target);
    }
}

// =============================================================================
// Scanning
// =============================================================================

/// Acquisition sweep configuration for one scanning collaborator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    /// Distance between acquisition points.
    pub step_size: f64,
    /// Total distance covered by the sweep.
    pub range: f64,
    /// Integration time per point in seconds.
    pub duration_acquisition: f64,
    /// Raw data log written by the acquisition.
    pub data_log_filename: PathBuf,
    /// Truncate the data log before acquiring.
    pub erase_csv_content: bool,
}

/// Runs acquisition sweeps over one motion axis.
pub trait Scanning: Send {
    /// Stores the sweep configuration used by the next scan.
    fn setup_alignment_parameters(&mut self, parameters: &ScanParameters);
    /// Selects the hexapod axis to sweep. Stepper scanners ignore this.
    fn set_axis_to_scan(&mut self, axis: HexapodAxis);
    /// Absolute sweep around the configured start.
    fn scan(&mut self) -> bool;
    /// Sweep relative to the current position.
    fn scan_relative(&mut self) -> bool;
    /// Aborts any sweep in progress.
    fn stop(&mut self) -> bool;
    /// Position tolerance check used when a move reports failure.
    fn check_reaching_position(&self, current: f64, target: f64) -> bool;
}

// =============================================================================
// Results and persistence
// =============================================================================

/// Result-file access for the post-processing round trip.
pub trait Sensors: Send {
    /// Truncates a result file so a stale value can never be read back.
    fn flush_csv(&mut self, path: &Path) -> AppResult<()>;
    /// Reads the single numeric result a script wrote to `path`.
    fn read_csv_result(&self, path: &Path) -> AppResult<f64>;
    /// Root directory of the installation (scripts live below it).
    fn project_directory(&self) -> &Path;
}

/// The two files the devices read from and persist into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigFile {
    /// Persisted alignment results and fixed positions.
    Main,
    /// Scan parameters, script names and result file names.
    AlignmentSettings,
}

/// Sectioned key/value store holding settings and persisted results.
pub trait Configuration: Send {
    /// Directory both configuration files live in.
    fn base_path(&self) -> &Path;
    /// File name of the main configuration file.
    fn config_filename(&self) -> &Path;
    /// File name of the alignment settings file.
    fn alignment_settings_filename(&self) -> &Path;
    /// Directory alignment result folders are created under.
    fn log_files_directory(&self) -> PathBuf;
    /// Reads a raw value as text.
    fn read_raw(&self, file: &Path, section: &str, key: &str) -> AppResult<String>;
    /// Writes a value. Returns `0` on failure and non-zero on success.
    fn write(&mut self, value: &str, section: &str, key: &str, file: &Path) -> i32;

    /// File name for one of the two well-known files.
    fn filename(&self, file: ConfigFile) -> PathBuf {
        match file {
            ConfigFile::Main => self.config_filename().to_path_buf(),
            ConfigFile::AlignmentSettings => self.alignment_settings_filename().to_path_buf(),
        }
    }

    /// Reads a string value.
    fn read_string(&self, file: ConfigFile, section: &str, key: &str) -> AppResult<String> {
        self.read_raw(&self.filename(file), section, key)
    }

    /// Reads a floating point value.
    fn read_float(&self, file: ConfigFile, section: &str, key: &str) -> AppResult<f64> {
        let raw = self.read_string(file, section, key)?;
        raw.trim()
            .parse()
            .map_err(|_| invalid_value(section, key, &raw, "a number"))
    }

    /// Reads an integer value.
    fn read_int(&self, file: ConfigFile, section: &str, key: &str) -> AppResult<i64> {
        let raw = self.read_string(file, section, key)?;
        raw.trim()
            .parse()
            .map_err(|_| invalid_value(section, key, &raw, "an integer"))
    }

    /// Reads a boolean value. Accepts `true`/`false` and `1`/`0`.
    fn read_bool(&self, file: ConfigFile, section: &str, key: &str) -> AppResult<bool> {
        let raw = self.read_string(file, section, key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(invalid_value(section, key, &raw, "a boolean")),
        }
    }

    /// Reads a path value.
    fn read_path(&self, file: ConfigFile, section: &str, key: &str) -> AppResult<PathBuf> {
        self.read_string(file, section, key).map(PathBuf::from)
    }
}

fn invalid_value(section: &str, key: &str, raw: &str, expected: &str) -> DeviceError {
    DeviceError::Configuration(format!(
        "{section}/{key} = '{raw}' is not {expected}"
    ))
}

/// Launches external analysis scripts.
pub trait PostProcessing: Send {
    /// Runs `script` with positional `args` and blocks until it exits.
    fn execute_script(&mut self, script: &Path, args: &[String]) -> AppResult<()>;
}

//! Custom error types for the beam-line control core.
//!
//! This module defines the primary error type, `DeviceError`, shared by every
//! device module. Using the `thiserror` crate, it gives the guards and the
//! orchestration routines one consistent way to report what went wrong.
//!
//! ## Error Hierarchy
//!
//! The first eight variants mirror the failure classes a device can hit while
//! running an operation:
//!
//! - **`Connection`**: a stepper or hexapod refused to connect or calibrate.
//! - **`Disconnect`**: a stepper did not disconnect cleanly. The FSM treats
//!   this as best-effort when resetting from `Error`.
//! - **`Motion`**: a move returned a non-zero status and the position
//!   tolerance check did not rescue it.
//! - **`Scan`**: the scanning collaborator reported a failed acquisition.
//! - **`PostProcessing`**: an analysis script could not be launched or exited
//!   with a failure status.
//! - **`ResultRead`**: a result file was missing, empty or did not hold a
//!   number.
//! - **`Persistence`**: the configuration store rejected an alignment result
//!   (write status `0`).
//! - **`Convergence`**: a closed-loop check stayed outside its threshold.
//!
//! The remaining variants cover setup problems (bad settings, I/O, TOML and
//! CSV parsing) and operations submitted in a state that does not accept them.
//!
//! Through `#[from]`, the I/O and parsing errors convert with the `?` operator.

use std::path::PathBuf;

use thiserror::Error;

use crate::fsm::State;

/// Convenience alias for results using the device error type.
pub type AppResult<T> = std::result::Result<T, DeviceError>;

/// Every failure the control core can report.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Connect or calibrate returned a non-zero status.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Disconnect returned a non-zero status.
    #[error("Disconnect error: {0}")]
    Disconnect(String),

    /// A move failed or did not reach its target.
    #[error("Motion error: {0}")]
    Motion(String),

    /// Acquisition scan failed.
    #[error("Scan error: {0}")]
    Scan(String),

    /// External analysis step failed.
    #[error("Post-processing error: {0}")]
    PostProcessing(String),

    /// A result file could not be turned into a value.
    #[error("Failed to read result from {path}: {reason}")]
    ResultRead {
        /// Result file that was read.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The configuration store returned write status 0.
    #[error("Failed to persist {section}/{key}")]
    Persistence {
        /// Section written to.
        section: String,
        /// Key written to.
        key: String,
    },

    /// A closed-loop correction did not settle.
    #[error("Convergence error: {0}")]
    Convergence(String),

    /// Missing or invalid setting.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Event submitted in a state that rejects it.
    #[error("Event {event} is not accepted in state {state}")]
    NotAdmitted {
        /// State the device was in.
        state: State,
        /// Debug rendering of the event.
        event: String,
    },

    /// Application settings failed to load.
    #[error("Settings error: {0}")]
    Settings(#[from] figment::Error),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid TOML.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A configuration file could not be serialized back.
    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    /// A result file is not valid CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Logging could not be initialised.
    #[error("Logging initialisation error: {0}")]
    LogInit(String),
}

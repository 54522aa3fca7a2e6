//! Collaborator contracts and their implementations.
//!
//! - `capabilities` - the traits the devices are written against
//! - `csv_sensors` - result files on disk
//! - `script_runner` - interpreter-launched analysis scripts
//! - `mock` - simulated collaborators for tests and dry runs

pub mod capabilities;
pub mod csv_sensors;
pub mod mock;
pub mod script_runner;

pub use capabilities::{
    ConfigFile, Configuration, Hexapod, HexapodAxis, HexapodCoordinate, Motor, PostProcessing,
    ScanParameters, Scanning, Sensors,
};
pub use csv_sensors::CsvSensors;
pub use script_runner::ScriptRunner;

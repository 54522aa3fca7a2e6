//! Mock Hardware Implementations
//!
//! Provides simulated collaborators for testing without physical hardware.
//! Every mock is a cheap, cloneable handle around shared state, so a test can
//! hand one clone to a device and keep another to script return codes and
//! inspect the calls afterwards.
//!
//! # Available Mocks
//!
//! - `MockMotor` - stepper driver with scripted status codes and a move log
//! - `MockHexapod` - six-axis positioner with a cached target tuple
//! - `MockScanner` - scanning helper recording parameters and axis selection
//! - `MockSensors` - result files served from memory, keyed by file name
//! - `MockConfiguration` - in-memory sectioned store with write capture
//! - `MockPostProcessing` - script runner recording every invocation
//! - `SimulatedHardware` - [`HardwareProvider`] handing out the mocks above

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{AppResult, DeviceError};
use crate::factory::{HardwareProvider, StepperAxis};
use crate::hardware::capabilities::{
    ConfigFile, Configuration, Hexapod, HexapodAxis, HexapodCoordinate, Motor, PostProcessing,
    ScanParameters, Scanning, Sensors,
};
use crate::store::flatten_sections;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockMotor - Simulated Stepper Driver
// =============================================================================

#[derive(Debug, Default)]
struct MotorState {
    connect_status: i32,
    disconnect_status: i32,
    calibrate_status: i32,
    home_status: i32,
    move_status: i32,
    position: f64,
    moves: Vec<f64>,
    connects: u32,
    disconnects: u32,
    homes: u32,
}

/// Mock stepper motor.
///
/// All status codes default to `0` (success). A successful move updates the
/// reported position; a failed one leaves it where it was.
///
/// # Example
///
/// ```rust,ignore
/// let motor = MockMotor::new();
/// let mut boxed: Box<dyn Motor> = Box::new(motor.clone());
/// boxed.move_to(12.5);
/// assert_eq!(motor.moves(), vec![12.5]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockMotor {
    state: Arc<Mutex<MotorState>>,
}

impl MockMotor {
    /// Create a motor at position 0.0 that accepts every command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned by `connect`.
    pub fn set_connect_status(&self, status: i32) {
        lock(&self.state).connect_status = status;
    }

    /// Status returned by `disconnect`.
    pub fn set_disconnect_status(&self, status: i32) {
        lock(&self.state).disconnect_status = status;
    }

    /// Status returned by `calibrate`.
    pub fn set_calibrate_status(&self, status: i32) {
        lock(&self.state).calibrate_status = status;
    }

    /// Status returned by `go_home`.
    pub fn set_home_status(&self, status: i32) {
        lock(&self.state).home_status = status;
    }

    /// Status returned by `move_to`.
    pub fn set_move_status(&self, status: i32) {
        lock(&self.state).move_status = status;
    }

    /// Overrides the reported position.
    pub fn set_position(&self, position: f64) {
        lock(&self.state).position = position;
    }

    /// Every target passed to `move_to`, in order.
    pub fn moves(&self) -> Vec<f64> {
        lock(&self.state).moves.clone()
    }

    /// Number of `connect` calls.
    pub fn connect_calls(&self) -> u32 {
        lock(&self.state).connects
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_calls(&self) -> u32 {
        lock(&self.state).disconnects
    }

    /// Number of `go_home` calls.
    pub fn home_calls(&self) -> u32 {
        lock(&self.state).homes
    }
}

impl Motor for MockMotor {
    fn connect(&mut self) -> i32 {
        let mut state = lock(&self.state);
        state.connects += 1;
        state.connect_status
    }

    fn disconnect(&mut self) -> i32 {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        state.disconnect_status
    }

    fn calibrate(&mut self) -> i32 {
        lock(&self.state).calibrate_status
    }

    fn go_home(&mut self) -> i32 {
        let mut state = lock(&self.state);
        state.homes += 1;
        if state.home_status == 0 {
            state.position = 0.0;
        }
        state.home_status
    }

    fn move_to(&mut self, position: f64) -> i32 {
        let mut state = lock(&self.state);
        state.moves.push(position);
        if state.move_status == 0 {
            state.position = position;
        }
        state.move_status
    }

    fn position_user_units(&self) -> f64 {
        lock(&self.state).position
    }
}

// =============================================================================
// MockHexapod - Simulated Six-Axis Positioner
// =============================================================================

#[derive(Debug, Default)]
struct HexapodState {
    target: HexapodCoordinate,
    actual: HexapodCoordinate,
    connect_status: i32,
    disconnect_status: i32,
    home_status: i32,
    move_status: i32,
    sent: Vec<HexapodCoordinate>,
    connects: u32,
    homes: u32,
}

/// Mock hexapod.
///
/// Records every tuple sent with `set_position_absolute`. A successful move
/// copies the cached target into the read-back position.
#[derive(Clone, Debug, Default)]
pub struct MockHexapod {
    state: Arc<Mutex<HexapodState>>,
}

impl MockHexapod {
    /// Create a hexapod at the origin that accepts every command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned by `connect`.
    pub fn set_connect_status(&self, status: i32) {
        lock(&self.state).connect_status = status;
    }

    /// Status returned by `disconnect`.
    pub fn set_disconnect_status(&self, status: i32) {
        lock(&self.state).disconnect_status = status;
    }

    /// Status returned by `go_home`.
    pub fn set_home_status(&self, status: i32) {
        lock(&self.state).home_status = status;
    }

    /// Status returned by `set_position_absolute`.
    pub fn set_move_status(&self, status: i32) {
        lock(&self.state).move_status = status;
    }

    /// Every tuple sent, in order.
    pub fn sent(&self) -> Vec<HexapodCoordinate> {
        lock(&self.state).sent.clone()
    }

    /// Number of `connect` calls.
    pub fn connect_calls(&self) -> u32 {
        lock(&self.state).connects
    }

    /// Number of `go_home` calls.
    pub fn home_calls(&self) -> u32 {
        lock(&self.state).homes
    }
}

impl Hexapod for MockHexapod {
    fn connect(&mut self, _timeout_s: i32, _group: &str) -> i32 {
        let mut state = lock(&self.state);
        state.connects += 1;
        state.connect_status
    }

    fn disconnect(&mut self) -> i32 {
        lock(&self.state).disconnect_status
    }

    fn go_home(&mut self) -> i32 {
        let mut state = lock(&self.state);
        state.homes += 1;
        if state.home_status == 0 {
            state.actual = HexapodCoordinate::default();
        }
        state.home_status
    }

    fn set_position_absolute(&mut self) -> i32 {
        let mut state = lock(&self.state);
        let target = state.target;
        state.sent.push(target);
        if state.move_status == 0 {
            state.actual = target;
        }
        state.move_status
    }

    fn coordinates(&self) -> HexapodCoordinate {
        lock(&self.state).target
    }

    fn set_coordinates(&mut self, target: HexapodCoordinate) {
        lock(&self.state).target = target;
    }

    fn position(&self, axis: HexapodAxis) -> f64 {
        lock(&self.state).actual.get(axis)
    }
}

// =============================================================================
// MockScanner - Simulated Scanning Helper
// =============================================================================

#[derive(Debug)]
struct ScannerState {
    parameters: Vec<ScanParameters>,
    axes: Vec<HexapodAxis>,
    scan_results: VecDeque<bool>,
    default_scan_result: bool,
    stop_result: bool,
    reach_result: bool,
    scans: u32,
    relative_scans: u32,
    stops: u32,
}

impl Default for ScannerState {
    fn default() -> Self {
        Self {
            parameters: Vec::new(),
            axes: Vec::new(),
            scan_results: VecDeque::new(),
            default_scan_result: true,
            stop_result: true,
            reach_result: false,
            scans: 0,
            relative_scans: 0,
            stops: 0,
        }
    }
}

/// Mock scanning helper.
///
/// Scans succeed unless results were queued with [`MockScanner::queue_scan_results`]
/// or the default was changed. The reach check fails unless enabled.
#[derive(Clone, Debug, Default)]
pub struct MockScanner {
    state: Arc<Mutex<ScannerState>>,
}

impl MockScanner {
    /// Create a scanner whose scans always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Results returned by the next scans, in order. Once drained the default applies.
    pub fn queue_scan_results(&self, results: impl IntoIterator<Item = bool>) {
        lock(&self.state).scan_results.extend(results);
    }

    /// Result returned by scans once the queue is empty.
    pub fn set_default_scan_result(&self, ok: bool) {
        lock(&self.state).default_scan_result = ok;
    }

    /// Result returned by `stop`.
    pub fn set_stop_result(&self, ok: bool) {
        lock(&self.state).stop_result = ok;
    }

    /// Result returned by the position tolerance check.
    pub fn set_reach_result(&self, ok: bool) {
        lock(&self.state).reach_result = ok;
    }

    /// Every parameter set passed in, in order.
    pub fn parameters(&self) -> Vec<ScanParameters> {
        lock(&self.state).parameters.clone()
    }

    /// Every axis selected, in order.
    pub fn axes(&self) -> Vec<HexapodAxis> {
        lock(&self.state).axes.clone()
    }

    /// Number of absolute scans.
    pub fn scan_calls(&self) -> u32 {
        lock(&self.state).scans
    }

    /// Number of relative scans.
    pub fn relative_scan_calls(&self) -> u32 {
        lock(&self.state).relative_scans
    }

    /// Number of `stop` calls.
    pub fn stop_calls(&self) -> u32 {
        lock(&self.state).stops
    }

    fn next_result(state: &mut ScannerState) -> bool {
        state
            .scan_results
            .pop_front()
            .unwrap_or(state.default_scan_result)
    }
}

impl Scanning for MockScanner {
    fn setup_alignment_parameters(&mut self, parameters: &ScanParameters) {
        lock(&self.state).parameters.push(parameters.clone());
    }

    fn set_axis_to_scan(&mut self, axis: HexapodAxis) {
        lock(&self.state).axes.push(axis);
    }

    fn scan(&mut self) -> bool {
        let mut state = lock(&self.state);
        state.scans += 1;
        Self::next_result(&mut state)
    }

    fn scan_relative(&mut self) -> bool {
        let mut state = lock(&self.state);
        state.relative_scans += 1;
        Self::next_result(&mut state)
    }

    fn stop(&mut self) -> bool {
        let mut state = lock(&self.state);
        state.stops += 1;
        state.stop_result
    }

    fn check_reaching_position(&self, _current: f64, _target: f64) -> bool {
        lock(&self.state).reach_result
    }
}

// =============================================================================
// MockSensors - In-Memory Result Files
// =============================================================================

#[derive(Debug, Default)]
struct SensorState {
    queued: HashMap<String, VecDeque<f64>>,
    last: HashMap<String, f64>,
    unreadable: HashSet<String>,
    flushed: Vec<PathBuf>,
    reads: Vec<PathBuf>,
}

/// Mock result-file access.
///
/// Values are keyed by file name (the last path component), so tests do not
/// need to know the directory layout. Queued values are served in order and
/// the last one served keeps being returned. Unknown files read as `0.0`.
#[derive(Clone, Debug)]
pub struct MockSensors {
    project_dir: PathBuf,
    state: Arc<Mutex<SensorState>>,
}

impl Default for MockSensors {
    fn default() -> Self {
        Self::new("/opt/beamline")
    }
}

impl MockSensors {
    /// Create sensors rooted at `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            state: Arc::new(Mutex::new(SensorState::default())),
        }
    }

    /// Queue values returned when `file_name` is read.
    pub fn push_results(&self, file_name: &str, values: impl IntoIterator<Item = f64>) {
        lock(&self.state)
            .queued
            .entry(file_name.to_string())
            .or_default()
            .extend(values);
    }

    /// Make every read of `file_name` fail.
    pub fn fail_reads_for(&self, file_name: &str) {
        lock(&self.state).unreadable.insert(file_name.to_string());
    }

    /// Every path flushed, in order.
    pub fn flushed(&self) -> Vec<PathBuf> {
        lock(&self.state).flushed.clone()
    }

    /// Every path read, in order.
    pub fn reads(&self) -> Vec<PathBuf> {
        lock(&self.state).reads.clone()
    }
}

fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Sensors for MockSensors {
    fn flush_csv(&mut self, path: &Path) -> AppResult<()> {
        lock(&self.state).flushed.push(path.to_path_buf());
        Ok(())
    }

    fn read_csv_result(&self, path: &Path) -> AppResult<f64> {
        let key = file_key(path);
        let mut state = lock(&self.state);
        state.reads.push(path.to_path_buf());
        if state.unreadable.contains(&key) {
            return Err(DeviceError::ResultRead {
                path: path.to_path_buf(),
                reason: "file is empty".to_string(),
            });
        }
        let next = state.queued.get_mut(&key).and_then(VecDeque::pop_front);
        let value = match next {
            Some(value) => {
                state.last.insert(key, value);
                value
            }
            None => state.last.get(&key).copied().unwrap_or(0.0),
        };
        debug!(path = %path.display(), value, "mock result read");
        Ok(value)
    }

    fn project_directory(&self) -> &Path {
        &self.project_dir
    }
}

// =============================================================================
// MockConfiguration - In-Memory Sectioned Store
// =============================================================================

type ValueKey = (PathBuf, String, String);

#[derive(Debug)]
struct ConfigState {
    values: HashMap<ValueKey, String>,
    write_status: i32,
    writes: Vec<(String, String, String)>,
}

/// Mock configuration store.
///
/// Writes land in the same map reads come from, so a value persisted by one
/// step is visible to the next.
#[derive(Clone, Debug)]
pub struct MockConfiguration {
    base_path: PathBuf,
    config_filename: PathBuf,
    alignment_filename: PathBuf,
    log_dir: PathBuf,
    state: Arc<Mutex<ConfigState>>,
}

impl Default for MockConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConfiguration {
    /// Create an empty store whose writes succeed.
    pub fn new() -> Self {
        Self {
            base_path: PathBuf::from("/opt/beamline/config"),
            config_filename: PathBuf::from("beamline_config.toml"),
            alignment_filename: PathBuf::from("alignment_settings.toml"),
            log_dir: PathBuf::from("/opt/beamline/LogFiles"),
            state: Arc::new(Mutex::new(ConfigState {
                values: HashMap::new(),
                write_status: 1,
                writes: Vec::new(),
            })),
        }
    }

    /// Loads every `[section] key = value` from a TOML document into `file`.
    pub fn with_toml(self, file: ConfigFile, document: &str) -> AppResult<Self> {
        let name = self.filename(file);
        let table: toml::Table = document.parse()?;
        {
            let mut state = lock(&self.state);
            for (section, key, value) in flatten_sections(&table) {
                state.values.insert((name.clone(), section, key), value);
            }
        }
        Ok(self)
    }

    /// Sets a single value.
    pub fn set(&self, file: ConfigFile, section: &str, key: &str, value: impl ToString) {
        let name = self.filename(file);
        lock(&self.state).values.insert(
            (name, section.to_string(), key.to_string()),
            value.to_string(),
        );
    }

    /// Current value, if any.
    pub fn value(&self, file: ConfigFile, section: &str, key: &str) -> Option<String> {
        let name = self.filename(file);
        lock(&self.state)
            .values
            .get(&(name, section.to_string(), key.to_string()))
            .cloned()
    }

    /// Status returned by `write`. `0` makes every write fail.
    pub fn set_write_status(&self, status: i32) {
        lock(&self.state).write_status = status;
    }

    /// Every accepted write as `(section, key, value)`, in order.
    pub fn writes(&self) -> Vec<(String, String, String)> {
        lock(&self.state).writes.clone()
    }
}

impl Configuration for MockConfiguration {
    fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn config_filename(&self) -> &Path {
        &self.config_filename
    }

    fn alignment_settings_filename(&self) -> &Path {
        &self.alignment_filename
    }

    fn log_files_directory(&self) -> PathBuf {
        self.log_dir.clone()
    }

    fn read_raw(&self, file: &Path, section: &str, key: &str) -> AppResult<String> {
        lock(&self.state)
            .values
            .get(&(file.to_path_buf(), section.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| {
                DeviceError::Configuration(format!(
                    "missing {section}/{key} in {}",
                    file.display()
                ))
            })
    }

    fn write(&mut self, value: &str, section: &str, key: &str, file: &Path) -> i32 {
        let mut state = lock(&self.state);
        if state.write_status == 0 {
            return 0;
        }
        state.values.insert(
            (file.to_path_buf(), section.to_string(), key.to_string()),
            value.to_string(),
        );
        state
            .writes
            .push((section.to_string(), key.to_string(), value.to_string()));
        state.write_status
    }
}

// =============================================================================
// MockPostProcessing - Recorded Script Runs
// =============================================================================

#[derive(Debug, Default)]
struct ScriptState {
    calls: Vec<(PathBuf, Vec<String>)>,
    failing: bool,
}

/// Mock script runner.
#[derive(Clone, Debug, Default)]
pub struct MockPostProcessing {
    state: Arc<Mutex<ScriptState>>,
}

impl MockPostProcessing {
    /// Create a runner whose scripts all succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every script run fail.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Every `(script, args)` run, in order.
    pub fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        lock(&self.state).calls.clone()
    }
}

impl PostProcessing for MockPostProcessing {
    fn execute_script(&mut self, script: &Path, args: &[String]) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.calls.push((script.to_path_buf(), args.to_vec()));
        if state.failing {
            return Err(DeviceError::PostProcessing(format!(
                "{} exited with status 1",
                script.display()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// SimulatedHardware - Provider of Mock Motion Collaborators
// =============================================================================

/// Hands out mock motion collaborators and keeps a handle to each one.
///
/// Asking twice for the same stepper returns clones sharing one state, so the
/// handle retrieved with [`SimulatedHardware::motor`] observes every command
/// the device sends.
#[derive(Clone, Debug)]
pub struct SimulatedHardware {
    motors: HashMap<StepperAxis, MockMotor>,
    scanners: HashMap<StepperAxis, MockScanner>,
    hexapod: MockHexapod,
    hexapod_scanner: MockScanner,
}

impl SimulatedHardware {
    /// Create a provider with a motor and scanner for every stepper axis.
    ///
    /// Clones of the provider share every collaborator.
    pub fn new() -> Self {
        Self {
            motors: StepperAxis::ALL
                .into_iter()
                .map(|axis| (axis, MockMotor::new()))
                .collect(),
            scanners: StepperAxis::ALL
                .into_iter()
                .map(|axis| (axis, MockScanner::new()))
                .collect(),
            hexapod: MockHexapod::new(),
            hexapod_scanner: MockScanner::new(),
        }
    }

    /// Handle to the mock motor for `axis`.
    pub fn motor(&mut self, axis: StepperAxis) -> MockMotor {
        self.motors.entry(axis).or_default().clone()
    }

    /// Handle to the mock scanner for `axis`.
    pub fn scanner(&mut self, axis: StepperAxis) -> MockScanner {
        self.scanners.entry(axis).or_default().clone()
    }

    /// Handle to the mock hexapod.
    pub fn hexapod_handle(&self) -> MockHexapod {
        self.hexapod.clone()
    }

    /// Handle to the mock hexapod scanner.
    pub fn hexapod_scanner_handle(&self) -> MockScanner {
        self.hexapod_scanner.clone()
    }
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareProvider for SimulatedHardware {
    fn stepper(&mut self, axis: StepperAxis) -> AppResult<Box<dyn Motor>> {
        Ok(Box::new(self.motor(axis)))
    }

    fn stepper_scanner(&mut self, axis: StepperAxis) -> AppResult<Box<dyn Scanning>> {
        Ok(Box::new(self.scanner(axis)))
    }

    fn hexapod(&mut self) -> AppResult<Box<dyn Hexapod>> {
        Ok(Box::new(self.hexapod.clone()))
    }

    fn hexapod_scanner(&mut self) -> AppResult<Box<dyn Scanning>> {
        Ok(Box::new(self.hexapod_scanner.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_failed_move_keeps_position() {
        let motor = MockMotor::new();
        let mut driver: Box<dyn Motor> = Box::new(motor.clone());
        assert_eq!(driver.move_to(3.0), 0);
        motor.set_move_status(7);
        assert_eq!(driver.move_to(9.0), 7);
        assert_eq!(driver.position_user_units(), 3.0);
        assert_eq!(motor.moves(), vec![3.0, 9.0]);
    }

    #[test]
    fn test_hexapod_sends_cached_tuple() {
        let hexapod = MockHexapod::new();
        let mut driver: Box<dyn Hexapod> = Box::new(hexapod.clone());
        driver.set_coordinate(HexapodAxis::Y, 1.5);
        assert_eq!(driver.position(HexapodAxis::Y), 0.0);
        assert_eq!(driver.set_position_absolute(), 0);
        assert_eq!(driver.position(HexapodAxis::Y), 1.5);
        assert_eq!(hexapod.sent().len(), 1);
    }

    #[test]
    fn test_sensor_last_value_sticks() {
        let sensors = MockSensors::default();
        sensors.push_results("y.csv", [1.0, 2.0]);
        let path = Path::new("/tmp/results/y.csv");
        assert_eq!(sensors.read_csv_result(path).ok(), Some(1.0));
        assert_eq!(sensors.read_csv_result(path).ok(), Some(2.0));
        assert_eq!(sensors.read_csv_result(path).ok(), Some(2.0));
        assert_eq!(sensors.read_csv_result(Path::new("other.csv")).ok(), Some(0.0));
    }

    #[test]
    fn test_configuration_write_then_read() {
        let mut config = MockConfiguration::new();
        let file = config.filename(ConfigFile::Main);
        assert_ne!(config.write("4.25", "SEC", "KEY", &file), 0);
        assert_eq!(config.read_float(ConfigFile::Main, "SEC", "KEY").ok(), Some(4.25));

        config.set_write_status(0);
        assert_eq!(config.write("1.0", "SEC", "KEY", &file), 0);
        assert_eq!(config.read_float(ConfigFile::Main, "SEC", "KEY").ok(), Some(4.25));
    }

    #[test]
    fn test_configuration_loads_toml() {
        let config = MockConfiguration::new()
            .with_toml(ConfigFile::AlignmentSettings, "[SCAN]\nSTEP_SIZE = 0.5\nERASE = true\n");
        let config = match config {
            Ok(config) => config,
            Err(err) => panic!("toml should parse: {err}"),
        };
        assert_eq!(
            config.read_float(ConfigFile::AlignmentSettings, "SCAN", "STEP_SIZE").ok(),
            Some(0.5)
        );
        assert_eq!(
            config.read_bool(ConfigFile::AlignmentSettings, "SCAN", "ERASE").ok(),
            Some(true)
        );
        assert!(config.read_float(ConfigFile::Main, "SCAN", "STEP_SIZE").is_err());
    }

    #[test]
    fn test_simulated_hardware_shares_handles() {
        let mut sim = SimulatedHardware::new();
        let handle = sim.motor(StepperAxis::CrystalRotational);
        let mut boxed = match sim.stepper(StepperAxis::CrystalRotational) {
            Ok(boxed) => boxed,
            Err(err) => panic!("provider failed: {err}"),
        };
        boxed.move_to(180.0);
        assert_eq!(handle.moves(), vec![180.0]);
    }
}

//! The crystal's six-axis hexapod with its scanner.

use std::fmt;

use tracing::{debug, warn};

use crate::devices::stage::motor_status;
use crate::error::{AppResult, DeviceError};
use crate::hardware::capabilities::{Hexapod, HexapodAxis, HexapodCoordinate, ScanParameters, Scanning};

/// Connection timeout passed to the hexapod, in seconds.
pub const CONNECT_TIMEOUT_S: i32 = 10;

/// Positioner group the hexapod connects to.
pub const GROUP: &str = "HEXAPOD";

/// Hexapod, its scanner and the cached target tuple.
///
/// The target lives in the hexapod driver itself; [`HexapodStage::move_to_target`]
/// sends whatever tuple is cached there.
pub struct HexapodStage {
    hexapod: Box<dyn Hexapod>,
    scanner: Box<dyn Scanning>,
}

impl fmt::Debug for HexapodStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HexapodStage")
            .field("target", &self.hexapod.coordinates())
            .finish_non_exhaustive()
    }
}

impl HexapodStage {
    /// Stage driving `hexapod`, scanning with `scanner`.
    pub fn new(hexapod: Box<dyn Hexapod>, scanner: Box<dyn Scanning>) -> Self {
        Self { hexapod, scanner }
    }

    /// Connects. The outcome is logged only; the hexapod controller keeps its
    /// own session and does not gate the device.
    pub fn connect(&mut self) {
        let status = self.hexapod.connect(CONNECT_TIMEOUT_S, GROUP);
        if status != 0 {
            warn!(status, "hexapod connect returned non-zero status");
        }
    }

    /// Disconnects without checking the outcome.
    pub fn disconnect(&mut self) {
        let status = self.hexapod.disconnect();
        debug!(status, "hexapod disconnected");
    }

    /// Homes the hexapod.
    pub fn go_home(&mut self) -> AppResult<()> {
        motor_status(self.hexapod.go_home(), "hexapod home")
    }

    /// Cached target tuple.
    pub fn target(&self) -> HexapodCoordinate {
        self.hexapod.coordinates()
    }

    /// Replaces the cached target tuple.
    pub fn set_target(&mut self, target: HexapodCoordinate) {
        self.hexapod.set_coordinates(target);
    }

    /// One component of the cached target.
    pub fn coordinate(&self, axis: HexapodAxis) -> f64 {
        self.hexapod.coordinate(axis)
    }

    /// Sets one component of the cached target.
    pub fn set_coordinate(&mut self, axis: HexapodAxis, value: f64) {
        self.hexapod.set_coordinate(axis, value);
    }

    /// Sends the cached target tuple.
    pub fn move_to_target(&mut self) -> AppResult<()> {
        let target = self.target();
        debug!(?target, "moving hexapod");
        motor_status(self.hexapod.set_position_absolute(), "hexapod absolute move")
    }

    /// Sets `axis` to `target` and moves. A failed move is accepted when the
    /// read-back position passes the scanner's tolerance check.
    pub fn move_axis_within_tolerance(&mut self, axis: HexapodAxis, target: f64) -> AppResult<()> {
        self.set_coordinate(axis, target);
        match self.move_to_target() {
            Ok(()) => Ok(()),
            Err(err) => {
                let current = self.hexapod.position(axis);
                if self.scanner.check_reaching_position(current, target) {
                    warn!(%axis, current, target, "hexapod move reported failure but position is within tolerance");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Selects the scanned axis.
    pub fn set_scan_axis(&mut self, axis: HexapodAxis) {
        self.scanner.set_axis_to_scan(axis);
    }

    /// Selects the scanned axis and its parameters.
    pub fn configure_scan(&mut self, axis: HexapodAxis, parameters: &ScanParameters) {
        self.scanner.set_axis_to_scan(axis);
        self.scanner.setup_alignment_parameters(parameters);
    }

    /// Runs one absolute scan.
    pub fn scan(&mut self) -> AppResult<()> {
        if self.scanner.scan() {
            Ok(())
        } else {
            Err(DeviceError::Scan("hexapod scan failed".to_string()))
        }
    }

    /// Runs one scan relative to the current position.
    pub fn scan_relative(&mut self) -> AppResult<()> {
        if self.scanner.scan_relative() {
            Ok(())
        } else {
            Err(DeviceError::Scan("hexapod relative scan failed".to_string()))
        }
    }

    /// Stops the scanner.
    pub fn stop(&mut self) -> AppResult<()> {
        if self.scanner.stop() {
            Ok(())
        } else {
            Err(DeviceError::Scan("hexapod scanner did not stop".to_string()))
        }
    }
}

//! Closed-loop correction of the flip-check Y offset.

use tracing::info;

use super::actions::CrystalActions;
use crate::error::{AppResult, DeviceError};
use crate::error_recovery::Recoverable;

/// Outcome of one fine Y alignment in the flipped orientation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlipMeasurement {
    /// Y center found at 180°.
    pub flipped: f64,
    /// `flipped` minus the stored 0° center.
    pub delta: f64,
}

/// Compensates the crystal's Y offset between the 0° and 180° orientations.
///
/// Each attempt shifts the last measured Y center against its delta,
/// re-aligns and measures again. The attempt succeeds once the delta is
/// within threshold. Only a delta left outside the threshold is worth
/// another attempt; a hardware or script failure ends the correction.
pub struct FlipCompensation<'a> {
    actions: &'a mut CrystalActions,
    measured: FlipMeasurement,
    threshold: f64,
    attempts: u32,
}

impl<'a> FlipCompensation<'a> {
    /// Correction starting from a flip measurement outside the threshold.
    pub fn new(
        actions: &'a mut CrystalActions,
        measured: FlipMeasurement,
        threshold: f64,
    ) -> Self {
        Self {
            actions,
            measured,
            threshold,
            attempts: 0,
        }
    }

    /// Most recent flip measurement.
    pub fn measured(&self) -> FlipMeasurement {
        self.measured
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Recoverable for FlipCompensation<'_> {
    fn recover(&mut self) -> AppResult<()> {
        self.attempts += 1;
        let measured = self.actions.compensate_and_realign(self.measured)?;
        self.measured = measured;
        if measured.delta.abs() <= self.threshold {
            info!(
                attempt = self.attempts,
                delta = measured.delta,
                "flip compensation converged"
            );
            Ok(())
        } else {
            Err(DeviceError::Convergence(format!(
                "flip delta {} still exceeds {}",
                measured.delta, self.threshold
            )))
        }
    }
}

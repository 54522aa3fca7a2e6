//! Guards and alignment procedures of the crystal stage.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::compensation::{FlipCompensation, FlipMeasurement};
use super::hexapod::HexapodStage;
use super::sections::{
    alignment_key, BENDING, BRAGG, FLIPPED, MEASUREMENTS, STORED, X_AXIS, YW_AXES, Y_AXIS, Y_FINE,
    Z_AXIS,
};
use super::{CrystalAxis, CrystalChannel, CrystalOperation, Measurement};
use crate::devices::context::{arg, path_arg, AlignmentContext, ScanKeys};
use crate::devices::stage::StepperStage;
use crate::devices::sweep::Sweep;
use crate::error::{AppResult, DeviceError};
use crate::error_recovery::{handle_recoverable_error, RetryPolicy};
use crate::fsm::DeviceActions;
use crate::hardware::capabilities::HexapodAxis;

/// X coordinate used while sweeping W during the Y alignment, unless the
/// settings override it.
pub const DEFAULT_X_START_OFFSET: f64 = -10.0;

/// Stepper angle of the flipped orientation.
pub const FLIPPED_ANGLE: f64 = 180.0;

/// Scan keys of the Y alignment's relative Y scans.
pub const Y_SCAN_KEYS: ScanKeys = ScanKeys {
    step_size: "STEP_SIZE_Y",
    range: "RANGE_Y",
    duration: "DURATION_ACQUISITION",
    data_log: "DATA_LOG_FILENAME_Y_SCAN",
    erase: "ERASE_CSV_CONTENT",
};

/// Files and values shared by the two half sweeps of the fine Y alignment.
struct FineSweep {
    script: PathBuf,
    data_log: String,
    y_result: PathBuf,
    steps: String,
    fully_opened_beam: String,
    w: f64,
}

/// Hexapod, stepper and alignment collaborators of the crystal.
pub struct CrystalActions {
    hexapod: HexapodStage,
    stepper: StepperStage,
    context: AlignmentContext,
    retry: RetryPolicy,
}

impl fmt::Debug for CrystalActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrystalActions")
            .field("hexapod", &self.hexapod)
            .field("stepper", &self.stepper)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CrystalActions {
    /// Actions driving `hexapod` and `stepper`; the flip compensation is
    /// bounded by `retry`.
    pub fn new(
        hexapod: HexapodStage,
        stepper: StepperStage,
        context: AlignmentContext,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            hexapod,
            stepper,
            context,
            retry,
        }
    }

    /// The hexapod stage.
    pub fn hexapod(&self) -> &HexapodStage {
        &self.hexapod
    }

    /// The hexapod stage, for presetting targets.
    pub fn hexapod_mut(&mut self) -> &mut HexapodStage {
        &mut self.hexapod
    }

    /// The rotational stepper stage.
    pub fn stepper(&self) -> &StepperStage {
        &self.stepper
    }

    /// The rotational stepper stage, for presetting targets.
    pub fn stepper_mut(&mut self) -> &mut StepperStage {
        &mut self.stepper
    }

    /// Configuration, scripts and result files.
    pub fn context(&self) -> &AlignmentContext {
        &self.context
    }

    /// Compensation retry budget.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Stored hexapod alignment coordinate for `axis`.
    pub fn stored_alignment(&self, axis: HexapodAxis) -> AppResult<f64> {
        self.context.stored(STORED, &alignment_key(axis))
    }

    fn persist_alignment(&mut self, axis: HexapodAxis, value: f64) -> AppResult<()> {
        self.context.persist(STORED, &alignment_key(axis), value)
    }

    fn x_start_offset(&self) -> f64 {
        self.context
            .setting(Y_AXIS, "X_START_OFFSET")
            .unwrap_or(DEFAULT_X_START_OFFSET)
    }

    /// Moves the hexapod and the stepper; both must succeed.
    pub(crate) fn move_both(&mut self) -> AppResult<()> {
        let hexapod = self.hexapod.move_to_target();
        let stepper = self.stepper.move_to_setpoint();
        hexapod.and(stepper)
    }

    // =========================================================================
    // Coarse alignments
    // =========================================================================

    /// Finds the X center with one X scan from the current target.
    pub fn search_x(&mut self) -> AppResult<()> {
        info!("searching crystal x alignment");
        self.hexapod.set_scan_axis(HexapodAxis::X);
        if let Err(err) = self.move_both() {
            warn!(error = %err, "initial move before x scan failed, scanning anyway");
        }
        self.hexapod.scan()?;

        let result = self
            .context
            .fresh_result_file(X_AXIS, "FILENAME_TO_X_ALIGNMENT_POSITION")?;
        let script = self.context.script(X_AXIS, "SCRIPT_NAME")?;
        let data_log = self.context.setting_text(X_AXIS, "DATA_LOG_FILENAME")?;
        self.context
            .run_script(&script, vec![data_log, path_arg(&result)])?;

        let x = self.context.read_result(&result)?;
        self.persist_alignment(HexapodAxis::X, x)?;
        self.hexapod.set_coordinate(HexapodAxis::X, x);
        self.hexapod.move_to_target()
    }

    /// Finds the Z center with one Z scan from the current target.
    pub fn search_z(&mut self) -> AppResult<()> {
        info!("searching crystal z alignment");
        self.move_both()?;
        self.hexapod.scan()?;

        let result = self
            .context
            .fresh_result_file(Z_AXIS, "FILENAME_TO_Z_ALIGNMENT_POSITION")?;
        let script = self.context.script(Z_AXIS, "SCRIPT_NAME")?;
        let data_log = self.context.setting_text(Z_AXIS, "DATA_LOG_FILENAME")?;
        self.context
            .run_script(&script, vec![data_log, path_arg(&result)])?;

        let z = self.context.read_result(&result)?;
        self.persist_alignment(HexapodAxis::Z, z)?;
        self.hexapod.set_coordinate(HexapodAxis::Z, z);
        self.hexapod.move_to_target()
    }

    /// Sweeps W and, at each angle, re-centers X and records a relative Y
    /// scan. The offset script fits the Y slopes and writes the W and X
    /// alignment positions.
    pub fn search_y(&mut self) -> AppResult<()> {
        info!("searching crystal y alignment");
        let y0 = self.hexapod.coordinate(HexapodAxis::Y);
        let w0 = self.hexapod.coordinate(HexapodAxis::W);
        self.move_both()?;

        let script = self.context.script(Y_AXIS, "SCRIPT_NAME_OFFSET")?;
        let slopes = self.context.fresh_result_file(Y_AXIS, "FILENAME_TO_Y_SLOPES")?;
        let w_result = self
            .context
            .fresh_result_file(Y_AXIS, "FILENAME_TO_W_ALIGNMENT_POSITION")?;
        let x_result = self
            .context
            .fresh_result_file(Y_AXIS, "FILENAME_TO_X_ALIGNMENT_POSITION")?;
        let x_parameters = self.context.scan_parameters(X_AXIS, ScanKeys::STANDARD)?;
        let y_parameters = self.context.scan_parameters(Y_AXIS, Y_SCAN_KEYS)?;
        let data_log = self.context.setting_text(Y_AXIS, "DATA_LOG_FILENAME_Y_SCAN")?;
        let x_start = self.x_start_offset();

        let sweep = Sweep::over(
            self.context.setting(Y_AXIS, "RANGE_W")?,
            self.context.setting(Y_AXIS, "STEP_SIZE_W")?,
        )?;
        for offset in sweep {
            self.hexapod.set_coordinate(HexapodAxis::X, x_start);
            self.hexapod
                .move_axis_within_tolerance(HexapodAxis::W, w0 + offset)?;

            self.hexapod.configure_scan(HexapodAxis::X, &x_parameters);
            if let Err(err) = self.search_x() {
                warn!(w = w0 + offset, error = %err, "x re-centering failed during y alignment");
            }

            self.hexapod.configure_scan(HexapodAxis::Y, &y_parameters);
            self.hexapod.scan_relative()?;

            let target = self.hexapod.target();
            self.context.run_script(
                &script,
                vec![
                    data_log.clone(),
                    path_arg(&slopes),
                    arg(target.w),
                    arg(target.x),
                    arg(target.y),
                    path_arg(&w_result),
                    path_arg(&x_result),
                ],
            )?;
            self.hexapod.set_coordinate(HexapodAxis::Y, y0);
        }

        let w = self.context.read_result(&w_result)?;
        let x = self.context.read_result(&x_result)?;
        debug!(w, x, "crystal y alignment results");
        self.hexapod.set_coordinate(HexapodAxis::W, w);
        self.hexapod.set_coordinate(HexapodAxis::X, x);
        self.persist_alignment(HexapodAxis::W, w)?;
        self.persist_alignment(HexapodAxis::X, x)?;
        self.hexapod.move_to_target()
    }

    /// Sweeps Y and records a W scan at each point. Fails when the spread of
    /// the fitted slopes exceeds the configured threshold.
    pub fn search_yw(&mut self) -> AppResult<()> {
        info!("searching crystal y/w alignment");
        let y0 = self.hexapod.coordinate(HexapodAxis::Y);
        let w0 = self.hexapod.coordinate(HexapodAxis::W);
        self.move_both()?;

        let script = self.context.script(YW_AXES, "SCRIPT_NAME")?;
        let y_result = self
            .context
            .fresh_result_file(YW_AXES, "FILENAME_TO_Y_ALIGNMENT_POSITION")?;
        let deviation = self
            .context
            .fresh_result_file(YW_AXES, "FILENAME_TO_STANDARD_DEVIATION_RESULT")?;
        let slopes = self
            .context
            .fresh_result_file(YW_AXES, "FILENAME_TO_SLOPESFILE")?;
        let data_log = self.context.setting_text(YW_AXES, "DATA_LOG_FILENAME")?;

        let sweep = Sweep::over(
            self.context.setting(YW_AXES, "RANGE_SCAN_HXP_Y")?,
            self.context.setting(YW_AXES, "STEP_SIZE_SCAN_HXP_Y")?,
        )?;
        for offset in sweep {
            self.hexapod
                .move_axis_within_tolerance(HexapodAxis::Y, y0 + offset)?;
            self.hexapod.scan()?;
            self.context.run_script(
                &script,
                vec![
                    arg(self.hexapod.coordinate(HexapodAxis::Y)),
                    data_log.clone(),
                    path_arg(&y_result),
                    path_arg(&deviation),
                    path_arg(&slopes),
                ],
            )?;
            self.hexapod.set_coordinate(HexapodAxis::W, w0);
        }

        let y = self.context.read_result(&y_result)?;
        self.hexapod.set_coordinate(HexapodAxis::Y, y);
        self.persist_alignment(HexapodAxis::Y, y)?;

        let spread = self.context.read_result(&deviation)?;
        let threshold = self.context.setting(YW_AXES, "THRESHOLD_STD_DEVIATION")?;
        if spread > threshold {
            return Err(DeviceError::Convergence(format!(
                "slope standard deviation {spread} exceeds {threshold}"
            )));
        }
        self.hexapod.move_to_target()
    }

    /// Scans W around the Bragg condition and moves to the peak.
    pub fn search_bragg_peak(&mut self) -> AppResult<()> {
        info!("searching crystal bragg peak");
        self.move_both()?;
        self.hexapod.scan()?;

        let result = self
            .context
            .fresh_result_file(BRAGG, "FILENAME_TO_BRAGG_ANGLE")?;
        let script = self.context.script(BRAGG, "SCRIPT_NAME")?;
        let data_log = self.context.setting_text(BRAGG, "DATA_LOG_FILENAME")?;
        self.context
            .run_script(&script, vec![data_log, path_arg(&result)])?;

        let angle = self.context.read_result(&result)?;
        self.persist_alignment(HexapodAxis::W, angle)?;
        self.hexapod.set_coordinate(HexapodAxis::W, angle);
        self.move_both()
    }

    // =========================================================================
    // Fine Y alignment and flip check
    // =========================================================================

    fn fine_half_sweep(
        &mut self,
        plan: &FineSweep,
        sweep: Sweep,
        start: f64,
        direction: f64,
        edge_result: &Path,
    ) -> AppResult<f64> {
        for offset in sweep {
            self.hexapod
                .move_axis_within_tolerance(HexapodAxis::Y, start + direction * offset)?;
            self.hexapod.scan()?;
            self.context.run_script(
                &plan.script,
                vec![
                    arg(self.hexapod.coordinate(HexapodAxis::Y)),
                    plan.data_log.clone(),
                    path_arg(&plan.y_result),
                    path_arg(edge_result),
                    plan.steps.clone(),
                    plan.fully_opened_beam.clone(),
                ],
            )?;
            self.hexapod.set_coordinate(HexapodAxis::W, plan.w);
        }
        self.context.read_result(&plan.y_result)
    }

    /// Locates both crystal edges along Y with W scans and centers Y between
    /// them.
    ///
    /// A first W scan measures the fully opened beam. The entry edge is then
    /// searched upward from half a crystal width below the current Y, and the
    /// exit edge downward from half a width above it.
    pub fn search_y_fine(&mut self) -> AppResult<()> {
        info!("searching crystal fine y alignment");
        let y0 = self.hexapod.coordinate(HexapodAxis::Y);
        let w0 = self.hexapod.coordinate(HexapodAxis::W);
        self.move_both()?;

        let beam_script = self
            .context
            .script(Y_FINE, "SCRIPT_NAME_FULLY_OPENED_BEAM")?;
        let script = self.context.script(Y_FINE, "SCRIPT_NAME")?;
        let y_result = self
            .context
            .fresh_result_file(YW_AXES, "FILENAME_TO_Y_ALIGNMENT_POSITION")?;
        let y_in = self.context.fresh_result_file(Y_FINE, "FILENAME_TO_Yin")?;
        let y_out = self.context.fresh_result_file(Y_FINE, "FILENAME_TO_Yout")?;
        let beam = self
            .context
            .fresh_result_file(Y_FINE, "FILENAME_TO_FULLY_OPENED_BEAM")?;
        let data_log = self.context.setting_text(Y_FINE, "DATA_LOG_FILENAME")?;

        self.hexapod.scan()?;
        self.context
            .run_script(&beam_script, vec![data_log.clone(), path_arg(&beam)])?;
        let fully_opened_beam = self.context.read_result(&beam)?;

        let width = self.context.setting(Y_FINE, "CRYSTAL_WIDTH")?;
        let sweep = Sweep::over(
            self.context.setting(Y_FINE, "RANGE_SCAN_HXP_Y")?,
            self.context.setting(Y_FINE, "STEP_SIZE_SCAN_HXP_Y")?,
        )?;
        let plan = FineSweep {
            script,
            data_log,
            y_result: y_result.clone(),
            steps: sweep.len().to_string(),
            fully_opened_beam: arg(fully_opened_beam),
            w: w0,
        };

        let lower = y0 - width / 2.0;
        self.hexapod.set_coordinate(HexapodAxis::Y, lower);
        self.hexapod.set_coordinate(HexapodAxis::W, w0);
        if let Err(err) = self.hexapod.move_to_target() {
            warn!(y = lower, error = %err, "move to entry edge start failed");
        }
        let entry = self.fine_half_sweep(&plan, sweep, lower, 1.0, &y_in)?;
        self.context.flush(&y_result)?;

        let upper = lower + width;
        self.hexapod.set_coordinate(HexapodAxis::Y, upper);
        self.hexapod.set_coordinate(HexapodAxis::W, w0);
        self.move_both()?;
        let exit = self.fine_half_sweep(&plan, sweep, upper, -1.0, &y_out)?;

        let y = (entry + exit) / 2.0;
        debug!(entry, exit, y, "crystal fine y alignment");
        self.hexapod.set_coordinate(HexapodAxis::Y, y);
        self.persist_alignment(HexapodAxis::Y, y)?;
        self.hexapod.move_to_target()
    }

    /// Runs the fine Y alignment at the flipped W target and returns the new
    /// Y center together with how far it moved from the stored one.
    pub(crate) fn measure_flip_delta(&mut self) -> AppResult<FlipMeasurement> {
        let reference = self.stored_alignment(HexapodAxis::Y)?;
        let w = self.stored_alignment(HexapodAxis::W)?
            - self.context.setting(Y_FINE, "OFFSET_FROM_BRAGG_ANGLE")?;
        self.hexapod.set_coordinate(HexapodAxis::W, w);
        self.search_y_fine()?;
        let flipped = self.stored_alignment(HexapodAxis::Y)?;
        let delta = flipped - reference;
        info!(reference, flipped, delta, "flip check measured");
        Ok(FlipMeasurement { flipped, delta })
    }

    /// Threshold on the flip delta.
    pub(crate) fn flip_threshold(&self) -> AppResult<f64> {
        self.context.setting(FLIPPED, "THRESHOLD")
    }

    /// Re-checks the Y alignment with the crystal flipped.
    ///
    /// Within the threshold nothing else happens. Otherwise the stage is
    /// compensated and re-aligned until the delta falls inside the threshold
    /// or the retry budget runs out.
    pub fn check_flipped(&mut self) -> AppResult<()> {
        info!("checking crystal alignment in flipped orientation");
        let measured = self.measure_flip_delta()?;
        let threshold = self.flip_threshold()?;
        if measured.delta.abs() <= threshold {
            info!(delta = measured.delta, threshold, "crystal aligned in flipped orientation");
            return Ok(());
        }
        warn!(delta = measured.delta, threshold, "flip delta outside threshold, compensating");
        let policy = self.retry.clone();
        let mut compensation = FlipCompensation::new(self, measured, threshold);
        handle_recoverable_error(&mut compensation, &policy)
    }

    /// One compensation pass: offset the measured flipped Y center by its
    /// delta, re-align X and fine Y at 0°, flip back to 180° and measure
    /// again.
    ///
    /// The offset is taken from `measured`, never from the cached hexapod
    /// coordinate, so a pass always starts from one measured center.
    pub(crate) fn compensate_and_realign(
        &mut self,
        measured: FlipMeasurement,
    ) -> AppResult<FlipMeasurement> {
        let y = measured.flipped - measured.delta;
        info!(delta = measured.delta, y, "compensating crystal y");
        self.hexapod.set_coordinate(HexapodAxis::Y, y);
        self.stepper.set_setpoint(0.0);
        self.move_both()?;

        let x_parameters = self.context.scan_parameters(X_AXIS, ScanKeys::STANDARD)?;
        self.hexapod.configure_scan(HexapodAxis::X, &x_parameters);
        self.search_x()?;

        let fine_parameters = self.context.scan_parameters(Y_FINE, ScanKeys::STANDARD)?;
        self.hexapod.configure_scan(HexapodAxis::W, &fine_parameters);
        self.search_y_fine()?;

        self.stepper.set_setpoint(FLIPPED_ANGLE);
        self.move_both()?;
        self.measure_flip_delta()
    }

    // =========================================================================
    // Measurements
    // =========================================================================

    /// Sweeps Y (Z for torsion), scans W at each point and persists the
    /// angle the measurement script computes.
    pub fn measure(&mut self, measurement: Measurement) -> AppResult<()> {
        let section = measurement.section();
        let axis = measurement.sweep_axis();
        info!(%measurement, "crystal measurement");
        let base = self.hexapod.coordinate(axis);
        let w0 = self.hexapod.coordinate(HexapodAxis::W);
        self.move_both()?;

        let script = self.context.measurement_script(section, "SCRIPT_NAME")?;
        let result = self
            .context
            .fresh_result_file(section, measurement.result_key())?;
        let peaks = self.context.fresh_result_file(section, "FILENAME_TO_PEAKS")?;
        let data_log = self.context.setting_text(section, "DATA_LOG_FILENAME")?;
        let width = self.context.setting(Y_FINE, "CRYSTAL_WIDTH")?;
        let (range_key, step_key) = measurement.sweep_keys();
        let range = self.context.setting(section, range_key)?;
        let sweep = Sweep::over(range, self.context.setting(section, step_key)?)?;
        let extra = match measurement {
            Measurement::Bending => None,
            Measurement::Miscut => Some(path_arg(
                &self.context.result_file(BENDING, "FILENAME_TO_PEAKS")?,
            )),
            Measurement::Torsion => Some(arg(self.hexapod.coordinate(HexapodAxis::Y))),
        };

        for offset in sweep {
            self.hexapod.move_axis_within_tolerance(axis, base + offset)?;
            self.hexapod.scan()?;
            let mut args = vec![
                arg(self.hexapod.coordinate(axis)),
                data_log.clone(),
                path_arg(&result),
                path_arg(&peaks),
                arg(range),
                arg(width),
            ];
            args.extend(extra.clone());
            self.context.run_script(&script, args)?;
            self.hexapod.set_coordinate(HexapodAxis::W, w0);
        }

        let angle = self.context.read_result(&result)?;
        self.context
            .persist(MEASUREMENTS, measurement.stored_key(), angle)
    }
}

impl DeviceActions for CrystalActions {
    type Axis = CrystalAxis;
    type Channel = CrystalChannel;
    type Operation = CrystalOperation;

    fn connect(&mut self) -> AppResult<()> {
        info!("connecting crystal");
        self.hexapod.connect();
        self.stepper.connect()
    }

    fn disconnect(&mut self) -> AppResult<()> {
        info!("disconnecting crystal");
        let stepper = self.stepper.disconnect();
        self.hexapod.disconnect();
        stepper
    }

    fn go_home(&mut self) -> AppResult<()> {
        info!("homing crystal");
        let hexapod = self.hexapod.go_home();
        let stepper = self.stepper.go_home();
        hexapod.and(stepper)
    }

    fn stop(&mut self) -> AppResult<()> {
        let hexapod = self.hexapod.stop();
        let stepper = self.stepper.stop();
        hexapod.and(stepper)
    }

    fn move_axis(&mut self, axis: CrystalAxis) -> AppResult<()> {
        match axis {
            CrystalAxis::Hexapod => self.hexapod.move_to_target(),
            CrystalAxis::Stepper => self.stepper.move_to_setpoint(),
            CrystalAxis::Both => self.move_both(),
        }
    }

    fn start_scan(&mut self, channel: CrystalChannel) -> AppResult<()> {
        match channel {
            CrystalChannel::Hexapod => self.hexapod.scan(),
            CrystalChannel::Stepper => self.stepper.scan(),
        }
    }

    fn run_operation(&mut self, operation: CrystalOperation) -> AppResult<()> {
        match operation {
            CrystalOperation::XAxisAlignment | CrystalOperation::XAxisFineAlignment => {
                self.search_x()
            }
            CrystalOperation::YAxisAlignment => self.search_y(),
            CrystalOperation::ZAxisAlignment => self.search_z(),
            CrystalOperation::YWAxesAlignment => self.search_yw(),
            CrystalOperation::BraggPeakSearch => self.search_bragg_peak(),
            CrystalOperation::YAxisFineAlignment => self.search_y_fine(),
            CrystalOperation::CheckFlippedOrientation => self.check_flipped(),
            CrystalOperation::BendingAngleMeasurement => self.measure(Measurement::Bending),
            CrystalOperation::MiscutAngleMeasurement => self.measure(Measurement::Miscut),
            CrystalOperation::TorsionAngleMeasurement => self.measure(Measurement::Torsion),
        }
    }
}

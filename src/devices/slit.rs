//! Slit: a linear and a rotational stepper stage.
//!
//! The alignment walks the rotational axis across an offset window around its
//! start position. At each angle the linear axis is scanned and the analysis
//! script folds the scan into the running linear center, rotational center and
//! FWHM result files. The linear axis returns to its start after every point.

use tracing::info;

use crate::devices::context::{arg, path_arg, AlignmentContext, ScanKeys};
use crate::devices::stage::StepperStage;
use crate::devices::sweep::Sweep;
use crate::devices::{DeviceController, DeviceKind};
use crate::error::AppResult;
use crate::fsm::{DeviceActions, Event, StateMachine};
use crate::hardware::capabilities::ScanParameters;

const LINEAR: &str = "Linear_Alignment_SLIT_STAGE_LINEAR";
const ROTATIONAL: &str = "Rotational_Alignment_SLIT_STAGE_ROTATIONAL";
const STORED_LINEAR: &str = "SLIT_STAGE_LINEAR";
const STORED_ROTATIONAL: &str = "SLIT_STAGE_ROTATIONAL";

/// Movable axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlitAxis {
    /// Linear stepper.
    Linear,
    /// Rotational stepper.
    Rotational,
    /// Both steppers; each move must succeed.
    Both,
}

/// Scan channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlitChannel {
    /// Linear scanner.
    Linear,
    /// Rotational scanner.
    Rotational,
}

/// Composite operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlitOperation {
    /// Find (optionally) and move to the slit centers.
    Align,
}

/// Guards and alignment procedure of the slit.
pub struct SlitActions {
    linear: StepperStage,
    rotational: StepperStage,
    context: AlignmentContext,
    center_linear: f64,
    center_rotational: f64,
    align_device: bool,
}

impl std::fmt::Debug for SlitActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlitActions")
            .field("linear", &self.linear)
            .field("rotational", &self.rotational)
            .field("center_linear", &self.center_linear)
            .field("center_rotational", &self.center_rotational)
            .field("align_device", &self.align_device)
            .finish_non_exhaustive()
    }
}

impl SlitActions {
    /// Actions with the centers loaded from the stored alignment.
    pub fn new(
        linear: StepperStage,
        rotational: StepperStage,
        context: AlignmentContext,
    ) -> AppResult<Self> {
        let center_linear = context.stored(STORED_LINEAR, "ALIGNMENT_POSITION")?;
        let center_rotational = context.stored(STORED_ROTATIONAL, "ALIGNMENT_POSITION")?;
        Ok(Self {
            linear,
            rotational,
            context,
            center_linear,
            center_rotational,
            align_device: true,
        })
    }

    /// Linear stage.
    pub fn linear(&self) -> &StepperStage {
        &self.linear
    }

    /// Linear stage, for presetting targets.
    pub fn linear_mut(&mut self) -> &mut StepperStage {
        &mut self.linear
    }

    /// Rotational stage.
    pub fn rotational(&self) -> &StepperStage {
        &self.rotational
    }

    /// Rotational stage, for presetting targets.
    pub fn rotational_mut(&mut self) -> &mut StepperStage {
        &mut self.rotational
    }

    /// Current `(linear, rotational)` centers.
    pub fn centers(&self) -> (f64, f64) {
        (self.center_linear, self.center_rotational)
    }

    /// Whether the next alignment searches for the centers.
    pub fn set_align_device(&mut self, align_device: bool) {
        self.align_device = align_device;
    }

    fn move_both(&mut self) -> AppResult<()> {
        let linear = self.linear.move_to_setpoint();
        let rotational = self.rotational.move_to_setpoint();
        linear.and(rotational)
    }

    fn find_centers(&mut self) -> AppResult<()> {
        let initial_linear = self.linear.setpoint();
        let initial_rotational = self.rotational.setpoint();
        self.move_both()?;

        let script = self.context.script(LINEAR, "SCRIPT_NAME")?;
        let linear_result = self
            .context
            .fresh_result_file(LINEAR, "FILENAME_LINEAR_ALIGNMENT_POSITION")?;
        let rotational_result = self
            .context
            .fresh_result_file(ROTATIONAL, "FILENAME_ROTATIONAL_ALIGNMENT_POSITION")?;
        let fwhm = self.context.fresh_result_file(ROTATIONAL, "FILENAME_FWHM")?;
        let data_log = self.context.setting_text(LINEAR, "DATA_LOG_FILENAME")?;

        let sweep = Sweep::new(
            self.context.setting(ROTATIONAL, "START_OFFSET")?,
            self.context.setting(ROTATIONAL, "STOP_OFFSET")?,
            self.context.setting(ROTATIONAL, "STEP_SIZE")?,
        )?;
        for offset in sweep {
            self.rotational
                .move_within_tolerance(initial_rotational + offset)?;
            self.linear.scan()?;
            self.context.run_script(
                &script,
                vec![
                    arg(self.rotational.position()),
                    data_log.clone(),
                    path_arg(&linear_result),
                    path_arg(&rotational_result),
                    path_arg(&fwhm),
                ],
            )?;
            self.linear.set_setpoint(initial_linear);
            self.linear.move_to_setpoint()?;
        }

        self.center_linear = self.context.read_result(&linear_result)?;
        self.context
            .persist(STORED_LINEAR, "ALIGNMENT_POSITION", self.center_linear)?;
        self.center_rotational = self.context.read_result(&rotational_result)?;
        self.context
            .persist(STORED_ROTATIONAL, "ALIGNMENT_POSITION", self.center_rotational)?;
        Ok(())
    }

    /// Finds the centers when enabled, then moves both axes there.
    pub fn align(&mut self) -> AppResult<()> {
        info!(align_device = self.align_device, "aligning slit");
        if self.align_device {
            self.find_centers()?;
        }
        self.linear.set_setpoint(self.center_linear);
        self.rotational.set_setpoint(self.center_rotational);
        self.move_both()
    }

    /// Presets the alignment: start positions and linear scanner.
    pub fn prepare_alignment(&mut self, align_device: bool) -> AppResult<()> {
        self.align_device = align_device;
        let rotational = self.context.setting(ROTATIONAL, "START_POSITION")?;
        let linear = self.context.setting(LINEAR, "START_POSITION")?;
        let parameters = self.context.scan_parameters(LINEAR, ScanKeys::STANDARD)?;
        self.rotational.set_setpoint(rotational);
        self.linear.set_setpoint(linear);
        self.linear.configure_scan(&parameters);
        Ok(())
    }

    /// Presets both axes at 0.
    pub fn park(&mut self) {
        self.linear.set_setpoint(0.0);
        self.rotational.set_setpoint(0.0);
    }
}

impl DeviceActions for SlitActions {
    type Axis = SlitAxis;
    type Channel = SlitChannel;
    type Operation = SlitOperation;

    fn connect(&mut self) -> AppResult<()> {
        info!("connecting slit");
        let linear = self.linear.connect();
        let rotational = self.rotational.connect();
        linear.and(rotational)
    }

    fn disconnect(&mut self) -> AppResult<()> {
        info!("disconnecting slit");
        let linear = self.linear.disconnect();
        let rotational = self.rotational.disconnect();
        linear.and(rotational)
    }

    fn go_home(&mut self) -> AppResult<()> {
        info!("homing slit");
        let linear = self.linear.go_home();
        let rotational = self.rotational.go_home();
        linear.and(rotational)
    }

    fn stop(&mut self) -> AppResult<()> {
        let linear = self.linear.stop();
        let rotational = self.rotational.stop();
        linear.and(rotational)
    }

    fn move_axis(&mut self, axis: SlitAxis) -> AppResult<()> {
        match axis {
            SlitAxis::Linear => self.linear.move_to_setpoint(),
            SlitAxis::Rotational => self.rotational.move_to_setpoint(),
            SlitAxis::Both => self.move_both(),
        }
    }

    fn start_scan(&mut self, channel: SlitChannel) -> AppResult<()> {
        match channel {
            SlitChannel::Linear => self.linear.scan(),
            SlitChannel::Rotational => self.rotational.scan(),
        }
    }

    fn run_operation(&mut self, operation: SlitOperation) -> AppResult<()> {
        match operation {
            SlitOperation::Align => self.align(),
        }
    }
}

/// Controller façade for the slit.
#[derive(Debug)]
pub struct SlitController {
    machine: StateMachine<SlitActions>,
}

impl SlitController {
    /// Controller in `NotInitialized`.
    pub fn new(actions: SlitActions) -> Self {
        Self {
            machine: StateMachine::new(actions),
        }
    }

    /// Position reported by the linear stepper.
    pub fn position_stepper_linear(&self) -> f64 {
        self.machine.actions().linear().position()
    }

    /// Position reported by the rotational stepper.
    pub fn position_stepper_rotational(&self) -> f64 {
        self.machine.actions().rotational().position()
    }

    /// Moves the linear stepper to `position`.
    pub fn move_to_position_stepper_linear(&mut self, position: f64) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.linear_mut().set_setpoint(position);
                Ok(())
            },
            Event::MoveAxis(SlitAxis::Linear),
        )
    }

    /// Moves the rotational stepper to `position`.
    pub fn move_to_position_stepper_rotational(&mut self, position: f64) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.rotational_mut().set_setpoint(position);
                Ok(())
            },
            Event::MoveAxis(SlitAxis::Rotational),
        )
    }

    /// Configures the linear scanner and scans.
    pub fn scan_stepper_linear(&mut self, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.linear_mut().configure_scan(parameters);
                Ok(())
            },
            Event::StartScan(SlitChannel::Linear),
        )
    }

    /// Configures the rotational scanner and scans.
    pub fn scan_stepper_rotational(&mut self, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.rotational_mut().configure_scan(parameters);
                Ok(())
            },
            Event::StartScan(SlitChannel::Rotational),
        )
    }

    /// Aligns the slit, searching for the centers when asked.
    pub fn align_slit(&mut self, align_device: bool) -> bool {
        self.prepare_and_dispatch(
            |a| a.prepare_alignment(align_device),
            Event::CompositeOperation(SlitOperation::Align),
        )
    }

    fn park(&mut self) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.park();
                Ok(())
            },
            Event::MoveAxis(SlitAxis::Both),
        )
    }

    /// Parks both axes at 0 for source/sensor alignment.
    pub fn align_source_with_sensor(&mut self) -> bool {
        self.park()
    }

    /// Parks both axes at 0 for the monochromator alignment.
    pub fn align_monochromator(&mut self) -> bool {
        self.park()
    }

    /// Parks both axes at 0 for the monochromator Bragg peak search.
    pub fn search_monochromator_bragg_peak(&mut self) -> bool {
        self.park()
    }
}

impl DeviceController for SlitController {
    type Actions = SlitActions;
    const KIND: DeviceKind = DeviceKind::Slit;

    fn machine(&self) -> &StateMachine<SlitActions> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<SlitActions> {
        &mut self.machine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceStatus;
    use crate::error::DeviceError;
    use crate::hardware::capabilities::ConfigFile;
    use crate::hardware::mock::{
        MockConfiguration, MockMotor, MockPostProcessing, MockScanner, MockSensors,
    };

    struct Rig {
        controller: SlitController,
        linear: MockMotor,
        rotational: MockMotor,
        linear_scanner: MockScanner,
        config: MockConfiguration,
        sensors: MockSensors,
        scripts: MockPostProcessing,
    }

    fn rig() -> Rig {
        let config = MockConfiguration::new();
        config.set(ConfigFile::Main, STORED_LINEAR, "ALIGNMENT_POSITION", 1.5);
        config.set(ConfigFile::Main, STORED_ROTATIONAL, "ALIGNMENT_POSITION", -0.5);
        let settings = [
            (LINEAR, "START_POSITION", "2"),
            (LINEAR, "SCRIPT_NAME", "slit.py"),
            (LINEAR, "FILENAME_LINEAR_ALIGNMENT_POSITION", "linear.csv"),
            (LINEAR, "STEP_SIZE", "0.05"),
            (LINEAR, "RANGE", "1"),
            (LINEAR, "DURATION_ACQUISITION", "1"),
            (LINEAR, "DATA_LOG_FILENAME", "slit_log.csv"),
            (LINEAR, "ERASE_CSV_CONTENT", "false"),
            (ROTATIONAL, "START_POSITION", "10"),
            (ROTATIONAL, "START_OFFSET", "-2"),
            (ROTATIONAL, "STOP_OFFSET", "2"),
            (ROTATIONAL, "STEP_SIZE", "2"),
            (ROTATIONAL, "FILENAME_ROTATIONAL_ALIGNMENT_POSITION", "rotational.csv"),
            (ROTATIONAL, "FILENAME_FWHM", "fwhm.csv"),
        ];
        for (section, key, value) in settings {
            config.set(ConfigFile::AlignmentSettings, section, key, value);
        }

        let linear = MockMotor::new();
        let rotational = MockMotor::new();
        let linear_scanner = MockScanner::new();
        let sensors = MockSensors::default();
        let scripts = MockPostProcessing::new();
        let context = AlignmentContext::new(
            DeviceKind::Slit,
            Box::new(config.clone()),
            Box::new(sensors.clone()),
            Box::new(scripts.clone()),
        );
        let actions = SlitActions::new(
            StepperStage::new(
                "linear",
                Box::new(linear.clone()),
                Box::new(linear_scanner.clone()),
            ),
            StepperStage::new("rotational", Box::new(rotational.clone()), Box::new(MockScanner::new())),
            context,
        )
        .unwrap();
        Rig {
            controller: SlitController::new(actions),
            linear,
            rotational,
            linear_scanner,
            config,
            sensors,
            scripts,
        }
    }

    #[test]
    fn test_alignment_sweeps_rotational_window() {
        let mut rig = rig();
        rig.sensors.push_results("linear.csv", [2.25]);
        rig.sensors.push_results("rotational.csv", [10.5]);
        assert!(rig.controller.start());
        assert!(rig.controller.align_slit(true));

        assert_eq!(rig.rotational.moves(), vec![10.0, 8.0, 10.0, 12.0, 10.5]);
        assert_eq!(rig.linear.moves(), vec![2.0, 2.0, 2.0, 2.0, 2.25]);
        assert_eq!(rig.linear_scanner.scan_calls(), 3);

        let calls = rig.scripts.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1[0], "8");
        assert_eq!(calls[0].1[1], "slit_log.csv");
        assert_eq!(calls[0].1.len(), 5);

        assert_eq!(
            rig.config
                .value(ConfigFile::Main, STORED_ROTATIONAL, "ALIGNMENT_POSITION")
                .as_deref(),
            Some("10.5")
        );
        assert_eq!(rig.controller.machine().actions().centers(), (2.25, 10.5));
    }

    #[test]
    fn test_without_alignment_moves_to_stored_centers() {
        let mut rig = rig();
        rig.controller.start();
        assert!(rig.controller.align_slit(false));
        assert_eq!(rig.linear.moves(), vec![1.5]);
        assert_eq!(rig.rotational.moves(), vec![-0.5]);
        assert!(rig.sensors.flushed().is_empty());
    }

    #[test]
    fn test_unreachable_rotation_aborts_sweep() {
        let mut rig = rig();
        rig.controller.start();
        rig.rotational.set_move_status(3);
        assert!(!rig.controller.align_slit(true));
        assert_eq!(rig.controller.status(), DeviceStatus::Error);
        assert!(matches!(
            rig.controller.last_error(),
            Some(DeviceError::Motion(_))
        ));
        assert!(rig.scripts.calls().is_empty());
    }

    #[test]
    fn test_park_moves_both_axes_to_zero() {
        let mut rig = rig();
        rig.controller.start();
        assert!(rig.controller.search_monochromator_bragg_peak());
        assert_eq!(rig.linear.moves(), vec![0.0]);
        assert_eq!(rig.rotational.moves(), vec![0.0]);
        assert_eq!(rig.controller.position_stepper_rotational(), 0.0);
    }
}

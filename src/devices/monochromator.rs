//! Monochromator: a linear and a rotational stepper stage.
//!
//! The alignment first finds the crystal center along the linear axis, then
//! walks the linear axis across a window around that center and records an
//! omega (rotational) scan at each point. The analysis script accumulates the
//! slopes and writes the final linear and rotational centers, which are
//! persisted as `MONOCHROMATOR_STAGE_{LINEAR,ROTATIONAL}/ALIGNMENT_POSITION`.

use tracing::info;

use crate::devices::context::{arg, path_arg, AlignmentContext, ScanKeys};
use crate::devices::stage::StepperStage;
use crate::devices::sweep::Sweep;
use crate::devices::{DeviceController, DeviceKind};
use crate::error::AppResult;
use crate::fsm::{DeviceActions, Event, StateMachine};
use crate::hardware::capabilities::ScanParameters;

const LINEAR_FIRST: &str = "1st_Linear_Alignment_MONOCHROMATOR_STAGE_LINEAR";
const LINEAR_SECOND: &str = "2nd_Linear_Alignment_MONOCHROMATOR_STAGE_LINEAR";
const ROTATIONAL_SECOND: &str = "2nd_Linear_Alignment_MONOCHROMATOR_STAGE_ROTATIONAL";
const BRAGG: &str = "Bragg_Peak_Search_MONOCHROMATOR_STAGE_ROTATIONAL";
const STORED_LINEAR: &str = "MONOCHROMATOR_STAGE_LINEAR";
const STORED_ROTATIONAL: &str = "MONOCHROMATOR_STAGE_ROTATIONAL";

/// Movable axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonochromatorAxis {
    /// Linear stepper.
    Linear,
    /// Rotational stepper.
    Rotational,
    /// Both steppers; each move must succeed.
    Both,
}

/// Scan channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonochromatorChannel {
    /// Linear scanner.
    Linear,
    /// Rotational scanner.
    Rotational,
}

/// Composite operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonochromatorOperation {
    /// Find (optionally) and move to the linear and rotational centers.
    Align,
    /// Find the Bragg peak on the rotational axis.
    SearchBraggPeak,
}

/// Guards and alignment procedures of the monochromator.
pub struct MonochromatorActions {
    linear: StepperStage,
    rotational: StepperStage,
    context: AlignmentContext,
    center_linear: f64,
    center_rotational: f64,
    search_center: bool,
}

impl std::fmt::Debug for MonochromatorActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonochromatorActions")
            .field("linear", &self.linear)
            .field("rotational", &self.rotational)
            .field("center_linear", &self.center_linear)
            .field("center_rotational", &self.center_rotational)
            .finish_non_exhaustive()
    }
}

impl MonochromatorActions {
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
            search_center: true,
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

    /// Configuration, scripts and result files.
    pub fn context(&self) -> &AlignmentContext {
        &self.context
    }

    /// Current `(linear, rotational)` centers.
    pub fn centers(&self) -> (f64, f64) {
        (self.center_linear, self.center_rotational)
    }

    /// Whether the next alignment searches for the centers.
    pub fn set_search_center(&mut self, search_center: bool) {
        self.search_center = search_center;
    }

    fn move_both(&mut self) -> AppResult<()> {
        let linear = self.linear.move_to_setpoint();
        let rotational = self.rotational.move_to_setpoint();
        linear.and(rotational)
    }

    fn find_centers(&mut self) -> AppResult<()> {
        self.linear.move_to_setpoint()?;

        let x_result = self
            .context
            .fresh_result_file(LINEAR_FIRST, "FILENAME_TO_X_ALIGNMENT_POSITION")?;
        let omega_result = self
            .context
            .fresh_result_file(ROTATIONAL_SECOND, "FILENAME_TO_OMEGA_ALIGNMENT_POSITION")?;
        let slopes = self
            .context
            .fresh_result_file(ROTATIONAL_SECOND, "FILENAME_TO_SLOPES")?;

        let linear_script = self.context.script(LINEAR_FIRST, "SCRIPT_NAME")?;
        let linear_log = self.context.setting_text(LINEAR_FIRST, "DATA_LOG_FILENAME")?;
        let rotational_script = self.context.script(ROTATIONAL_SECOND, "SCRIPT_NAME")?;
        let rotational_log = self.context.setting_text(LINEAR_SECOND, "DATA_LOG_FILENAME")?;

        self.linear.scan()?;
        self.context
            .run_script(&linear_script, vec![linear_log, path_arg(&x_result)])?;
        let center = self.context.read_result(&x_result)?;
        info!(center, "monochromator linear center found");

        let sweep = Sweep::new(
            self.context.setting(LINEAR_SECOND, "START_OFFSET")?,
            self.context.setting(LINEAR_SECOND, "RANGE")?,
            self.context.setting(LINEAR_SECOND, "STEP_SIZE")?,
        )?;
        for offset in sweep {
            let position = center + offset;
            self.linear.move_within_tolerance(position)?;
            self.rotational.scan()?;
            self.context.run_script(
                &rotational_script,
                vec![
                    arg(position),
                    rotational_log.clone(),
                    path_arg(&slopes),
                    path_arg(&x_result),
                    path_arg(&omega_result),
                ],
            )?;
            self.rotational.set_setpoint(0.0);
            self.rotational.move_to_setpoint()?;
        }

        self.center_linear = self.context.read_result(&x_result)?;
        self.context
            .persist(STORED_LINEAR, "ALIGNMENT_POSITION", self.center_linear)?;
        self.center_rotational = self.context.read_result(&omega_result)?;
        self.context
            .persist(STORED_ROTATIONAL, "ALIGNMENT_POSITION", self.center_rotational)?;
        Ok(())
    }

    /// Finds the centers when enabled, then moves both axes there.
    pub fn align(&mut self) -> AppResult<()> {
        info!(search_center = self.search_center, "aligning monochromator");
        if self.search_center {
            self.find_centers()?;
        }
        self.linear.set_setpoint(self.center_linear);
        self.rotational.set_setpoint(self.center_rotational);
        self.move_both()
    }

    /// Scans the rotational axis from its setpoint and moves to the Bragg peak.
    pub fn search_bragg_peak(&mut self) -> AppResult<()> {
        info!("searching monochromator bragg peak");
        self.rotational.move_to_setpoint()?;
        self.rotational.scan()?;

        let result = self
            .context
            .fresh_result_file(BRAGG, "FILENAME_TO_ALIGNMENT_POSITION")?;
        let script = self.context.script(BRAGG, "SCRIPT_NAME")?;
        let data_log = self.context.setting_text(BRAGG, "DATA_LOG_FILENAME")?;
        self.context
            .run_script(&script, vec![data_log, path_arg(&result)])?;

        let angle = self.context.read_result(&result)?;
        self.context
            .persist(STORED_ROTATIONAL, "BRAGG_PEAK_ANGLE", angle)?;
        self.rotational.set_setpoint(angle);
        self.rotational.move_to_setpoint()
    }

    /// Presets the alignment: linear start position and both scanners.
    pub fn prepare_alignment(&mut self, search_center: bool) -> AppResult<()> {
        self.search_center = search_center;
        let start = self.context.setting(LINEAR_FIRST, "START_POSITION")?;
        let linear = self.context.scan_parameters(LINEAR_FIRST, ScanKeys::STANDARD)?;
        let rotational = self
            .context
            .scan_parameters(ROTATIONAL_SECOND, ScanKeys::STANDARD)?;
        self.linear.set_setpoint(start);
        self.linear.configure_scan(&linear);
        self.rotational.configure_scan(&rotational);
        Ok(())
    }

    /// Presets the Bragg peak search: stored theta and rotational scanner.
    pub fn prepare_bragg_peak_search(&mut self) -> AppResult<()> {
        let theta = self.context.stored(STORED_ROTATIONAL, "THETA")?;
        let parameters = self.context.scan_parameters(BRAGG, ScanKeys::STANDARD)?;
        self.rotational.set_setpoint(theta);
        self.rotational.configure_scan(&parameters);
        Ok(())
    }
}

impl DeviceActions for MonochromatorActions {
    type Axis = MonochromatorAxis;
    type Channel = MonochromatorChannel;
    type Operation = MonochromatorOperation;

    fn connect(&mut self) -> AppResult<()> {
        info!("connecting monochromator");
        let linear = self.linear.connect();
        let rotational = self.rotational.connect();
        linear.and(rotational)
    }

    fn disconnect(&mut self) -> AppResult<()> {
        info!("disconnecting monochromator");
        let linear = self.linear.disconnect();
        let rotational = self.rotational.disconnect();
        linear.and(rotational)
    }

    fn go_home(&mut self) -> AppResult<()> {
        info!("homing monochromator");
        let linear = self.linear.go_home();
        let rotational = self.rotational.go_home();
        linear.and(rotational)
    }

    fn stop(&mut self) -> AppResult<()> {
        let linear = self.linear.stop();
        let rotational = self.rotational.stop();
        linear.and(rotational)
    }

    fn move_axis(&mut self, axis: MonochromatorAxis) -> AppResult<()> {
        match axis {
            MonochromatorAxis::Linear => self.linear.move_to_setpoint(),
            MonochromatorAxis::Rotational => self.rotational.move_to_setpoint(),
            MonochromatorAxis::Both => self.move_both(),
        }
    }

    fn start_scan(&mut self, channel: MonochromatorChannel) -> AppResult<()> {
        match channel {
            MonochromatorChannel::Linear => self.linear.scan(),
            MonochromatorChannel::Rotational => self.rotational.scan(),
        }
    }

    fn run_operation(&mut self, operation: MonochromatorOperation) -> AppResult<()> {
        match operation {
            MonochromatorOperation::Align => self.align(),
            MonochromatorOperation::SearchBraggPeak => self.search_bragg_peak(),
        }
    }
}

/// Controller façade for the monochromator.
#[derive(Debug)]
pub struct MonochromatorController {
    machine: StateMachine<MonochromatorActions>,
}

impl MonochromatorController {
    /// Controller in `NotInitialized`.
    pub fn new(actions: MonochromatorActions) -> Self {
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
            Event::MoveAxis(MonochromatorAxis::Linear),
        )
    }

    /// Moves the rotational stepper to `position`.
    pub fn move_to_position_stepper_rotational(&mut self, position: f64) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.rotational_mut().set_setpoint(position);
                Ok(())
            },
            Event::MoveAxis(MonochromatorAxis::Rotational),
        )
    }

    /// Configures the linear scanner and scans.
    pub fn scan_stepper_linear(&mut self, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.linear_mut().configure_scan(parameters);
                Ok(())
            },
            Event::StartScan(MonochromatorChannel::Linear),
        )
    }

    /// Configures the rotational scanner and scans.
    pub fn scan_stepper_rotational(&mut self, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.rotational_mut().configure_scan(parameters);
                Ok(())
            },
            Event::StartScan(MonochromatorChannel::Rotational),
        )
    }

    /// Parks both axes at 0.
    pub fn align_source_with_sensor(&mut self) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.linear_mut().set_setpoint(0.0);
                a.rotational_mut().set_setpoint(0.0);
                Ok(())
            },
            Event::MoveAxis(MonochromatorAxis::Both),
        )
    }

    /// Aligns the monochromator, searching for the centers when asked.
    pub fn align_monochromator(&mut self, search_center: bool) -> bool {
        self.prepare_and_dispatch(
            |a| a.prepare_alignment(search_center),
            Event::CompositeOperation(MonochromatorOperation::Align),
        )
    }

    /// Finds the Bragg peak starting from the stored theta.
    pub fn search_monochromator_bragg_peak(&mut self) -> bool {
        self.prepare_and_dispatch(
            MonochromatorActions::prepare_bragg_peak_search,
            Event::CompositeOperation(MonochromatorOperation::SearchBraggPeak),
        )
    }
}

impl DeviceController for MonochromatorController {
    type Actions = MonochromatorActions;
    const KIND: DeviceKind = DeviceKind::Monochromator;

    fn machine(&self) -> &StateMachine<MonochromatorActions> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<MonochromatorActions> {
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
        controller: MonochromatorController,
        linear: MockMotor,
        rotational: MockMotor,
        rotational_scanner: MockScanner,
        config: MockConfiguration,
        sensors: MockSensors,
        scripts: MockPostProcessing,
    }

    fn scan_section(config: &MockConfiguration, section: &str) {
        for (key, value) in [
            ("STEP_SIZE", "0.1"),
            ("RANGE", "1"),
            ("DURATION_ACQUISITION", "1"),
            ("DATA_LOG_FILENAME", "log.csv"),
            ("ERASE_CSV_CONTENT", "true"),
        ] {
            config.set(ConfigFile::AlignmentSettings, section, key, value);
        }
    }

    fn rig() -> Rig {
        let config = MockConfiguration::new();
        config.set(ConfigFile::Main, STORED_LINEAR, "ALIGNMENT_POSITION", 10.0);
        config.set(ConfigFile::Main, STORED_ROTATIONAL, "ALIGNMENT_POSITION", 0.5);
        config.set(ConfigFile::Main, STORED_ROTATIONAL, "THETA", 14.0);
        for section in [LINEAR_FIRST, ROTATIONAL_SECOND, BRAGG] {
            scan_section(&config, section);
        }
        let settings = [
            (LINEAR_FIRST, "START_POSITION", "5"),
            (LINEAR_FIRST, "SCRIPT_NAME", "linear.py"),
            (LINEAR_FIRST, "FILENAME_TO_X_ALIGNMENT_POSITION", "x.csv"),
            (LINEAR_SECOND, "START_OFFSET", "-1"),
            (LINEAR_SECOND, "RANGE", "1"),
            (LINEAR_SECOND, "STEP_SIZE", "0.5"),
            (LINEAR_SECOND, "DATA_LOG_FILENAME", "x_omega.csv"),
            (ROTATIONAL_SECOND, "SCRIPT_NAME", "omega.py"),
            (ROTATIONAL_SECOND, "FILENAME_TO_OMEGA_ALIGNMENT_POSITION", "omega.csv"),
            (ROTATIONAL_SECOND, "FILENAME_TO_SLOPES", "slopes.csv"),
            (BRAGG, "SCRIPT_NAME", "bragg.py"),
            (BRAGG, "FILENAME_TO_ALIGNMENT_POSITION", "bragg.csv"),
        ];
        for (section, key, value) in settings {
            config.set(ConfigFile::AlignmentSettings, section, key, value);
        }

        let linear = MockMotor::new();
        let rotational = MockMotor::new();
        let rotational_scanner = MockScanner::new();
        let sensors = MockSensors::default();
        let scripts = MockPostProcessing::new();
        let context = AlignmentContext::new(
            DeviceKind::Monochromator,
            Box::new(config.clone()),
            Box::new(sensors.clone()),
            Box::new(scripts.clone()),
        );
        let actions = MonochromatorActions::new(
            StepperStage::new("linear", Box::new(linear.clone()), Box::new(MockScanner::new())),
            StepperStage::new(
                "rotational",
                Box::new(rotational.clone()),
                Box::new(rotational_scanner.clone()),
            ),
            context,
        )
        .unwrap();
        Rig {
            controller: MonochromatorController::new(actions),
            linear,
            rotational,
            rotational_scanner,
            config,
            sensors,
            scripts,
        }
    }

    #[test]
    fn test_move_linear_reports_position() {
        let mut rig = rig();
        assert!(rig.controller.start());
        assert!(rig.controller.move_to_position_stepper_linear(12.5));
        assert_eq!(rig.controller.status(), DeviceStatus::Connected);
        assert_eq!(rig.controller.position_stepper_linear(), 12.5);
    }

    #[test]
    fn test_alignment_sweeps_inclusive_window() {
        let mut rig = rig();
        rig.sensors.push_results("x.csv", [20.0, 20.25]);
        rig.sensors.push_results("omega.csv", [0.75]);
        assert!(rig.controller.start());
        assert!(rig.controller.align_monochromator(true));

        // Start position, five sweep points around 20.0, final center.
        assert_eq!(rig.linear.moves(), vec![5.0, 19.0, 19.5, 20.0, 20.5, 21.0, 20.25]);
        assert_eq!(rig.rotational_scanner.scan_calls(), 5);
        assert_eq!(rig.scripts.calls().len(), 6);
        assert_eq!(rig.sensors.flushed().len(), 3);
        assert_eq!(rig.rotational.moves().last(), Some(&0.75));
        assert_eq!(
            rig.config
                .value(ConfigFile::Main, STORED_LINEAR, "ALIGNMENT_POSITION")
                .as_deref(),
            Some("20.25")
        );
        assert_eq!(rig.controller.machine().actions().centers(), (20.25, 0.75));
    }

    #[test]
    fn test_alignment_without_search_moves_to_stored_centers() {
        let mut rig = rig();
        rig.controller.start();
        assert!(rig.controller.align_monochromator(false));
        assert_eq!(rig.linear.moves(), vec![10.0]);
        assert_eq!(rig.rotational.moves(), vec![0.5]);
        assert!(rig.scripts.calls().is_empty());
    }

    #[test]
    fn test_final_move_requires_both_axes() {
        let mut rig = rig();
        rig.controller.start();
        rig.rotational.set_move_status(2);
        assert!(!rig.controller.align_monochromator(false));
        assert_eq!(rig.controller.status(), DeviceStatus::Error);
    }

    #[test]
    fn test_bragg_peak_persists_angle() {
        let mut rig = rig();
        rig.sensors.push_results("bragg.csv", [14.125]);
        rig.controller.start();
        assert!(rig.controller.search_monochromator_bragg_peak());
        assert_eq!(rig.rotational.moves(), vec![14.0, 14.125]);
        assert_eq!(
            rig.config
                .value(ConfigFile::Main, STORED_ROTATIONAL, "BRAGG_PEAK_ANGLE")
                .as_deref(),
            Some("14.125")
        );
    }

    #[test]
    fn test_persistence_failure_fails_alignment() {
        let mut rig = rig();
        rig.config.set_write_status(0);
        rig.controller.start();
        assert!(!rig.controller.align_monochromator(true));
        assert!(matches!(
            rig.controller.last_error(),
            Some(DeviceError::Persistence { .. })
        ));
    }

    #[test]
    fn test_operations_rejected_before_start() {
        let mut rig = rig();
        assert!(!rig.controller.align_monochromator(false));
        assert_eq!(rig.controller.status(), DeviceStatus::NotInitialized);
        assert!(rig.linear.moves().is_empty());
    }
}

//! Autocollimator stage: one rotational stepper and its scanner.

use tracing::info;

use crate::devices::stage::StepperStage;
use crate::devices::{DeviceController, DeviceKind};
use crate::error::AppResult;
use crate::fsm::{DeviceActions, Event, StateMachine};
use crate::hardware::capabilities::ScanParameters;

/// Movable axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutocollimatorAxis {
    /// The rotational stepper.
    Stepper,
}

/// Scan channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutocollimatorChannel {
    /// The stepper scanner.
    Stepper,
}

/// The autocollimator has no composite operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutocollimatorOperation {}

/// Guards for the autocollimator stage.
#[derive(Debug)]
pub struct AutocollimatorActions {
    stage: StepperStage,
}

impl AutocollimatorActions {
    /// Actions driving `stage`.
    pub fn new(stage: StepperStage) -> Self {
        Self { stage }
    }

    /// The stepper stage.
    pub fn stage(&self) -> &StepperStage {
        &self.stage
    }

    /// The stepper stage, for presetting targets.
    pub fn stage_mut(&mut self) -> &mut StepperStage {
        &mut self.stage
    }
}

impl DeviceActions for AutocollimatorActions {
    type Axis = AutocollimatorAxis;
    type Channel = AutocollimatorChannel;
    type Operation = AutocollimatorOperation;

    fn connect(&mut self) -> AppResult<()> {
        info!("connecting autocollimator");
        self.stage.connect()
    }

    fn disconnect(&mut self) -> AppResult<()> {
        info!("disconnecting autocollimator");
        self.stage.disconnect()
    }

    fn go_home(&mut self) -> AppResult<()> {
        info!("homing autocollimator");
        self.stage.go_home()
    }

    fn stop(&mut self) -> AppResult<()> {
        self.stage.stop()
    }

    fn move_axis(&mut self, axis: AutocollimatorAxis) -> AppResult<()> {
        match axis {
            AutocollimatorAxis::Stepper => self.stage.move_to_setpoint(),
        }
    }

    fn start_scan(&mut self, channel: AutocollimatorChannel) -> AppResult<()> {
        match channel {
            AutocollimatorChannel::Stepper => self.stage.scan(),
        }
    }

    fn run_operation(&mut self, operation: AutocollimatorOperation) -> AppResult<()> {
        match operation {}
    }
}

/// Controller façade for the autocollimator stage.
#[derive(Debug)]
pub struct AutocollimatorController {
    machine: StateMachine<AutocollimatorActions>,
}

impl AutocollimatorController {
    /// Controller in `NotInitialized`.
    pub fn new(actions: AutocollimatorActions) -> Self {
        Self {
            machine: StateMachine::new(actions),
        }
    }

    /// Position reported by the stepper.
    pub fn position_stepper(&self) -> f64 {
        self.machine.actions().stage().position()
    }

    /// Moves the stepper to `position`.
    pub fn move_to_position_stepper(&mut self, position: f64) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.stage_mut().set_setpoint(position);
                Ok(())
            },
            Event::MoveAxis(AutocollimatorAxis::Stepper),
        )
    }

    /// Configures the scanner and scans.
    pub fn scan_stepper(&mut self, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.stage_mut().configure_scan(parameters);
                Ok(())
            },
            Event::StartScan(AutocollimatorChannel::Stepper),
        )
    }

    /// Parks the stage at 0 for source/sensor alignment.
    pub fn align_source_with_sensor(&mut self) -> bool {
        self.move_to_position_stepper(0.0)
    }

    /// Parks the stage at 0 for the monochromator Bragg peak search.
    pub fn setup_monochromator_bragg_peak_search(&mut self) -> bool {
        self.move_to_position_stepper(0.0)
    }

    /// Parks the stage at 0 for the crystal Bragg peak search.
    pub fn setup_for_crystal_bragg_peak_search(&mut self) -> bool {
        self.move_to_position_stepper(0.0)
    }
}

impl DeviceController for AutocollimatorController {
    type Actions = AutocollimatorActions;
    const KIND: DeviceKind = DeviceKind::Autocollimator;

    fn machine(&self) -> &StateMachine<AutocollimatorActions> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<AutocollimatorActions> {
        &mut self.machine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceStatus;
    use crate::hardware::mock::{MockMotor, MockScanner};

    fn controller() -> (AutocollimatorController, MockMotor, MockScanner) {
        let motor = MockMotor::new();
        let scanner = MockScanner::new();
        let stage = StepperStage::new(
            "autocollimator",
            Box::new(motor.clone()),
            Box::new(scanner.clone()),
        );
        (
            AutocollimatorController::new(AutocollimatorActions::new(stage)),
            motor,
            scanner,
        )
    }

    #[test]
    fn test_lifecycle() {
        let (mut controller, motor, _) = controller();
        assert_eq!(controller.fsm_state(), "Not Initialized");
        assert!(controller.start());
        assert!(controller.go_home());
        assert_eq!(controller.status(), DeviceStatus::Home);
        assert!(controller.move_to_position_stepper(3.5));
        assert_eq!(controller.position_stepper(), 3.5);
        assert!(controller.disconnect());
        assert_eq!(motor.disconnect_calls(), 1);
    }

    #[test]
    fn test_setup_moves_to_zero() {
        let (mut controller, motor, _) = controller();
        controller.start();
        assert!(controller.setup_for_crystal_bragg_peak_search());
        assert_eq!(motor.moves(), vec![0.0]);
    }

    #[test]
    fn test_scan_failure_ends_in_error() {
        let (mut controller, _, scanner) = controller();
        controller.start();
        scanner.set_default_scan_result(false);
        assert!(!controller.scan_stepper(&ScanParameters::default()));
        assert_eq!(controller.status(), DeviceStatus::Error);
        assert_eq!(scanner.parameters().len(), 1);
    }
}

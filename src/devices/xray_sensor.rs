//! X-ray sensor stage: one rotational stepper and its scanner.
//!
//! For the crystal Bragg peak search the sensor is parked at the stored
//! `X-RAY_SENSOR/2THETA` angle.

use tracing::info;

use crate::devices::stage::StepperStage;
use crate::devices::{DeviceController, DeviceKind};
use crate::error::AppResult;
use crate::fsm::{DeviceActions, Event, StateMachine};
use crate::hardware::capabilities::{ConfigFile, Configuration, ScanParameters};

/// Movable axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XRaySensorAxis {
    /// The rotational stepper.
    Stepper,
}

/// Scan channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XRaySensorChannel {
    /// The stepper scanner.
    Stepper,
}

/// The sensor stage has no composite operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XRaySensorOperation {}

/// Guards for the X-ray sensor stage.
pub struct XRaySensorActions {
    stage: StepperStage,
    configuration: Box<dyn Configuration>,
}

impl std::fmt::Debug for XRaySensorActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XRaySensorActions")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl XRaySensorActions {
    /// Actions driving `stage`.
    pub fn new(stage: StepperStage, configuration: Box<dyn Configuration>) -> Self {
        Self {
            stage,
            configuration,
        }
    }

    /// The stepper stage.
    pub fn stage(&self) -> &StepperStage {
        &self.stage
    }

    /// The stepper stage, for presetting targets.
    pub fn stage_mut(&mut self) -> &mut StepperStage {
        &mut self.stage
    }

    /// Stored 2θ angle of the sensor.
    pub fn two_theta(&self) -> AppResult<f64> {
        self.configuration
            .read_float(ConfigFile::Main, "X-RAY_SENSOR", "2THETA")
    }
}

impl DeviceActions for XRaySensorActions {
    type Axis = XRaySensorAxis;
    type Channel = XRaySensorChannel;
    type Operation = XRaySensorOperation;

    fn connect(&mut self) -> AppResult<()> {
        info!("connecting x-ray sensor");
        self.stage.connect()
    }

    fn disconnect(&mut self) -> AppResult<()> {
        info!("disconnecting x-ray sensor");
        self.stage.disconnect()
    }

    fn go_home(&mut self) -> AppResult<()> {
        info!("homing x-ray sensor");
        self.stage.go_home()
    }

    fn stop(&mut self) -> AppResult<()> {
        self.stage.stop()
    }

    fn move_axis(&mut self, axis: XRaySensorAxis) -> AppResult<()> {
        match axis {
            XRaySensorAxis::Stepper => self.stage.move_to_setpoint(),
        }
    }

    fn start_scan(&mut self, channel: XRaySensorChannel) -> AppResult<()> {
        match channel {
            XRaySensorChannel::Stepper => self.stage.scan(),
        }
    }

    fn run_operation(&mut self, operation: XRaySensorOperation) -> AppResult<()> {
        match operation {}
    }
}

/// Controller façade for the X-ray sensor stage.
#[derive(Debug)]
pub struct XRaySensorController {
    machine: StateMachine<XRaySensorActions>,
}

impl XRaySensorController {
    /// Controller in `NotInitialized`.
    pub fn new(actions: XRaySensorActions) -> Self {
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
            Event::MoveAxis(XRaySensorAxis::Stepper),
        )
    }

    /// Configures the scanner and scans.
    pub fn scan_stepper(&mut self, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.stage_mut().configure_scan(parameters);
                Ok(())
            },
            Event::StartScan(XRaySensorChannel::Stepper),
        )
    }

    /// Parks the sensor at 0 facing the source.
    pub fn align_source_with_sensor(&mut self) -> bool {
        self.move_to_position_stepper(0.0)
    }

    /// Parks the sensor at 0 for the monochromator Bragg peak search.
    pub fn setup_monochromator_bragg_peak_search(&mut self) -> bool {
        self.move_to_position_stepper(0.0)
    }

    /// Moves the sensor to the stored 2θ angle.
    pub fn setup_for_crystal_bragg_peak_search(&mut self) -> bool {
        self.prepare_and_dispatch(
            |a| {
                let angle = a.two_theta()?;
                a.stage_mut().set_setpoint(angle);
                Ok(())
            },
            Event::MoveAxis(XRaySensorAxis::Stepper),
        )
    }
}

impl DeviceController for XRaySensorController {
    type Actions = XRaySensorActions;
    const KIND: DeviceKind = DeviceKind::XRaySensor;

    fn machine(&self) -> &StateMachine<XRaySensorActions> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<XRaySensorActions> {
        &mut self.machine
    }
}

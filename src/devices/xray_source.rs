//! X-ray source stage: one rotational stepper with a centering alignment.
//!
//! The alignment scans the source across the sensor, lets the analysis script
//! find the intensity center and persists it as
//! `X-RAY_SOURCE/ALIGNMENT_POSITION`. With the search disabled the stage just
//! returns to the stored center.

use tracing::{info, warn};

use crate::devices::context::{path_arg, AlignmentContext, ScanKeys};
use crate::devices::stage::StepperStage;
use crate::devices::{DeviceController, DeviceKind};
use crate::error::AppResult;
use crate::fsm::{DeviceActions, Event, StateMachine};
use crate::hardware::capabilities::ScanParameters;

const SETTINGS_SECTION: &str = "XRAY_SOURCE_STAGE_ROTATIONAL";
const STORED_SECTION: &str = "X-RAY_SOURCE";

/// Movable axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XRaySourceAxis {
    /// The rotational stepper.
    Stepper,
}

/// Scan channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XRaySourceChannel {
    /// The stepper scanner.
    Stepper,
}

/// Composite operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XRaySourceOperation {
    /// Find (optionally) and move to the source center.
    AlignSourceWithSensor,
}

/// Guards and alignment procedure of the X-ray source stage.
pub struct XRaySourceActions {
    stage: StepperStage,
    context: AlignmentContext,
    center: f64,
    search_center: bool,
}

impl std::fmt::Debug for XRaySourceActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XRaySourceActions")
            .field("stage", &self.stage)
            .field("center", &self.center)
            .field("search_center", &self.search_center)
            .finish_non_exhaustive()
    }
}

impl XRaySourceActions {
    /// Actions for `stage`, with the center loaded from the stored alignment.
    pub fn new(stage: StepperStage, context: AlignmentContext) -> AppResult<Self> {
        let center = context.stored(STORED_SECTION, "ALIGNMENT_POSITION")?;
        Ok(Self {
            stage,
            context,
            center,
            search_center: true,
        })
    }

    /// The stepper stage.
    pub fn stage(&self) -> &StepperStage {
        &self.stage
    }

    /// The stepper stage, for presetting targets.
    pub fn stage_mut(&mut self) -> &mut StepperStage {
        &mut self.stage
    }

    /// Configuration, scripts and result files.
    pub fn context(&self) -> &AlignmentContext {
        &self.context
    }

    /// Current center position.
    pub fn center(&self) -> f64 {
        self.center
    }

    /// Whether the next alignment searches for the center.
    pub fn set_search_center(&mut self, search_center: bool) {
        self.search_center = search_center;
    }

    /// Scan parameters for the centering scan.
    pub fn alignment_scan_parameters(&self) -> AppResult<ScanParameters> {
        self.context
            .scan_parameters(SETTINGS_SECTION, ScanKeys::STANDARD)
    }

    /// Stored 2θ angle of the source.
    pub fn two_theta(&self) -> AppResult<f64> {
        self.context.stored(STORED_SECTION, "2THETA")
    }

    fn find_center(&mut self) -> AppResult<()> {
        if let Err(err) = self.stage.go_home() {
            warn!(error = %err, "homing before source alignment failed, scanning from current position");
        }
        self.stage.scan()?;

        let result = self
            .context
            .fresh_result_file(SETTINGS_SECTION, "FILENAME_TO_ALIGNMENT_POSITION")?;
        let script = self.context.script(SETTINGS_SECTION, "SCRIPT_NAME")?;
        let data_log = self
            .context
            .setting_text(SETTINGS_SECTION, "DATA_LOG_FILENAME")?;
        self.context
            .run_script(&script, vec![data_log, path_arg(&result)])?;

        self.center = self.context.read_result(&result)?;
        self.context
            .persist(STORED_SECTION, "ALIGNMENT_POSITION", self.center)?;
        info!(center = self.center, "x-ray source center found");
        Ok(())
    }

    /// Finds the center when enabled, then moves there.
    pub fn align_source_with_sensor(&mut self) -> AppResult<()> {
        info!(search_center = self.search_center, "aligning x-ray source with sensor");
        if self.search_center {
            self.find_center()?;
        }
        self.stage.set_setpoint(self.center);
        self.stage.move_to_setpoint()
    }
}

impl DeviceActions for XRaySourceActions {
    type Axis = XRaySourceAxis;
    type Channel = XRaySourceChannel;
    type Operation = XRaySourceOperation;

    fn connect(&mut self) -> AppResult<()> {
        info!("connecting x-ray source");
        self.stage.connect()
    }

    fn disconnect(&mut self) -> AppResult<()> {
        info!("disconnecting x-ray source");
        self.stage.disconnect()
    }

    fn go_home(&mut self) -> AppResult<()> {
        info!("homing x-ray source");
        self.stage.go_home()
    }

    fn stop(&mut self) -> AppResult<()> {
        self.stage.stop()
    }

    fn move_axis(&mut self, axis: XRaySourceAxis) -> AppResult<()> {
        match axis {
            XRaySourceAxis::Stepper => self.stage.move_to_setpoint(),
        }
    }

    fn start_scan(&mut self, channel: XRaySourceChannel) -> AppResult<()> {
        match channel {
            XRaySourceChannel::Stepper => self.stage.scan(),
        }
    }

    fn run_operation(&mut self, operation: XRaySourceOperation) -> AppResult<()> {
        match operation {
            XRaySourceOperation::AlignSourceWithSensor => self.align_source_with_sensor(),
        }
    }
}

/// Controller façade for the X-ray source stage.
#[derive(Debug)]
pub struct XRaySourceController {
    machine: StateMachine<XRaySourceActions>,
}

impl XRaySourceController {
    /// Controller in `NotInitialized`.
    pub fn new(actions: XRaySourceActions) -> Self {
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
            Event::MoveAxis(XRaySourceAxis::Stepper),
        )
    }

    /// Configures the scanner and scans.
    pub fn scan_stepper(&mut self, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.stage_mut().configure_scan(parameters);
                Ok(())
            },
            Event::StartScan(XRaySourceChannel::Stepper),
        )
    }

    /// Centers the source on the sensor, searching for the center when asked.
    pub fn align_source_with_sensor(&mut self, search_center: bool) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.set_search_center(search_center);
                let parameters = a.alignment_scan_parameters()?;
                a.stage_mut().configure_scan(&parameters);
                Ok(())
            },
            Event::CompositeOperation(XRaySourceOperation::AlignSourceWithSensor),
        )
    }

    /// Moves the source to the stored 2θ angle.
    pub fn setup_monochromator_bragg_peak_search(&mut self) -> bool {
        self.move_to_two_theta()
    }

    /// Moves the source to the stored 2θ angle.
    pub fn setup_for_crystal_bragg_peak_search(&mut self) -> bool {
        self.move_to_two_theta()
    }

    fn move_to_two_theta(&mut self) -> bool {
        self.prepare_and_dispatch(
            |a| {
                let angle = a.two_theta()?;
                a.stage_mut().set_setpoint(angle);
                Ok(())
            },
            Event::MoveAxis(XRaySourceAxis::Stepper),
        )
    }
}

impl DeviceController for XRaySourceController {
    type Actions = XRaySourceActions;
    const KIND: DeviceKind = DeviceKind::XRaySource;

    fn machine(&self) -> &StateMachine<XRaySourceActions> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<XRaySourceActions> {
        &mut self.machine
    }
}

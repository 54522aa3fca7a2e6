//! The six beam-line devices.
//!
//! Each device module provides:
//!
//! - its axis, scan channel and composite operation identifiers
//! - an `Actions` type implementing [`DeviceActions`] (guards and alignment
//!   procedures)
//! - a `Controller` façade implementing [`DeviceController`], which presets
//!   targets and parameters and then drives the two-phase dispatch
//!
//! Shared building blocks live alongside: [`sweep`] for inclusive offset
//! sweeps, [`layout`] for script and result paths, [`context`] for the
//! configuration/script/result round trip and [`stage`] for stepper stages.

pub mod autocollimator;
pub mod context;
pub mod crystal;
pub mod layout;
pub mod monochromator;
pub mod slit;
pub mod stage;
pub mod sweep;
pub mod xray_sensor;
pub mod xray_source;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{AppResult, DeviceError};
use crate::fsm::{DeviceActions, DeviceEvent, Event, State, StateMachine};

pub use layout::DeviceKind;

/// Device status reported to callers, with stable numeric codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceStatus {
    /// No state reported yet.
    NotDefined = 0,
    /// Not connected.
    NotInitialized = 1,
    /// Connected and idle.
    Connected = 2,
    /// Homed and idle.
    Home = 3,
    /// Operation admitted, not yet executed.
    InMotion = 4,
    /// Last operation failed.
    Error = 5,
}

impl DeviceStatus {
    /// Numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Display string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDefined => "Not Defined",
            Self::NotInitialized => "Not Initialized",
            Self::Connected => "Connected",
            Self::Home => "Home",
            Self::InMotion => "In Motion",
            Self::Error => "Error",
        }
    }
}

impl From<State> for DeviceStatus {
    fn from(state: State) -> Self {
        match state {
            State::NotInitialized => Self::NotInitialized,
            State::Connected => Self::Connected,
            State::Home => Self::Home,
            State::InMotion => Self::InMotion,
            State::Error => Self::Error,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle surface shared by every device controller.
///
/// Implementors only expose their state machine; the lifecycle operations are
/// provided. Every operation returns `true` when the device ended in the
/// state the operation aims for. The error behind a `false` is available from
/// [`DeviceController::last_error`].
pub trait DeviceController {
    /// Guards and procedures of this device.
    type Actions: DeviceActions;

    /// Which device this is.
    const KIND: DeviceKind;

    /// The device's state machine.
    fn machine(&self) -> &StateMachine<Self::Actions>;

    /// The device's state machine, mutably.
    fn machine_mut(&mut self) -> &mut StateMachine<Self::Actions>;

    /// Connects from `NotInitialized` or `Error`.
    fn start(&mut self) -> bool {
        let machine = self.machine_mut();
        if matches!(machine.state(), State::NotInitialized | State::Error) {
            machine.process(Event::Initialize);
        }
        machine.state() == State::Connected
    }

    /// Releases the hardware from any state but `NotInitialized`.
    fn disconnect(&mut self) -> bool {
        let machine = self.machine_mut();
        if machine.state() != State::NotInitialized {
            machine.process(Event::Disconnect);
        }
        machine.state() == State::NotInitialized
    }

    /// Homes every axis.
    fn go_home(&mut self) -> bool {
        self.machine_mut().admit_then_execute(Event::SetupHome) == State::Home
    }

    /// Stops scanning. Only an admitted operation can be stopped; an idle
    /// connected device stays connected and reports success.
    fn stop(&mut self) -> bool {
        let machine = self.machine_mut();
        machine.process(Event::StopMovement);
        machine.state() == State::Connected
    }

    /// Current status.
    fn status(&self) -> DeviceStatus {
        DeviceStatus::from(self.machine().state())
    }

    /// Current status as a display string.
    fn fsm_state(&self) -> &'static str {
        let status = self.status();
        debug!(device = %Self::KIND, state = status.as_str(), "fsm state");
        status.as_str()
    }

    /// Error behind the most recent failed or rejected operation.
    fn last_error(&self) -> Option<&DeviceError> {
        self.machine().last_error()
    }

    /// Admits and executes `event`; `true` when the device is `Connected` after.
    fn dispatch(&mut self, event: DeviceEvent<Self::Actions>) -> bool {
        self.machine_mut().admit_then_execute(event) == State::Connected
    }

    /// Runs `prepare` on the actions, then dispatches `event`.
    ///
    /// A failing `prepare` (typically a missing setting) skips the dispatch.
    fn prepare_and_dispatch<F>(&mut self, prepare: F, event: DeviceEvent<Self::Actions>) -> bool
    where
        Self: Sized,
        F: FnOnce(&mut Self::Actions) -> AppResult<()>,
    {
        let machine = self.machine_mut();
        if let Err(err) = prepare(machine.actions_mut()) {
            error!(device = %Self::KIND, ?event, error = %err, "failed to prepare operation");
            machine.record_error(err);
            return false;
        }
        self.dispatch(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::autocollimator::{AutocollimatorActions, AutocollimatorController};
    use crate::devices::stage::StepperStage;
    use crate::hardware::mock::{MockMotor, MockScanner};
    use tracing_test::traced_test;

    #[test]
    fn test_status_codes() {
        assert_eq!(DeviceStatus::NotDefined.code(), 0);
        assert_eq!(DeviceStatus::from(State::Error).code(), 5);
        assert_eq!(DeviceStatus::from(State::InMotion).as_str(), "In Motion");
    }

    #[test]
    fn test_every_state_has_a_status() {
        for state in State::ALL {
            assert_eq!(DeviceStatus::from(state).as_str(), state.as_str());
        }
    }

    fn autocollimator() -> AutocollimatorController {
        let stage = StepperStage::new(
            "rotational",
            Box::new(MockMotor::new()),
            Box::new(MockScanner::new()),
        );
        AutocollimatorController::new(AutocollimatorActions::new(stage))
    }

    #[test]
    #[traced_test]
    fn test_idle_stop_is_logged_as_rejected() {
        let mut device = autocollimator();
        assert!(device.start());
        assert!(device.stop());
        assert_eq!(device.status(), DeviceStatus::Connected);
        assert!(logs_contain("event rejected"));
    }

    #[test]
    #[traced_test]
    fn test_operation_before_start_is_rejected() {
        let mut device = autocollimator();
        assert!(!device.move_to_position_stepper(1.0));
        assert_eq!(device.status(), DeviceStatus::NotInitialized);
        assert!(matches!(
            device.last_error(),
            Some(DeviceError::NotAdmitted { .. })
        ));
        assert!(logs_contain("event rejected"));
    }

    #[test]
    fn test_disconnect_from_error_resets() {
        let motor = MockMotor::new();
        let stage = StepperStage::new("rotational", Box::new(motor.clone()), Box::new(MockScanner::new()));
        let mut device = AutocollimatorController::new(AutocollimatorActions::new(stage));
        assert!(device.start());
        motor.set_home_status(1);
        assert!(!device.go_home());
        assert_eq!(device.status(), DeviceStatus::Error);
        motor.set_disconnect_status(1);
        assert!(device.disconnect());
        assert_eq!(device.status(), DeviceStatus::NotInitialized);
    }
}

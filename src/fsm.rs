//! Device state machine.
//!
//! Every device runs the same five-state machine. Operations are submitted as
//! [`Event`]s; the pure [`transition`] table decides what a submission does in
//! the current [`State`], and [`StateMachine`] applies that decision, running
//! the matching guard on the device's [`DeviceActions`] at most once.
//!
//! Motion-class operations use a two-phase protocol. The first submission
//! admits the event (`Connected`/`Home` to `InMotion`, no guard). The second
//! submission executes it: the guard runs and its outcome picks the success
//! or the `Error` state. [`StateMachine::admit_then_execute`] performs both.
//!
//! ```text
//!  NotInitialized --Initialize[connect]--> Connected | Error
//!  Connected/Home --SetupHome|MoveAxis|StartScan|Composite--> InMotion
//!  Connected/Home --Disconnect[disconnect]--> NotInitialized | Error
//!  InMotion --SetupHome[go_home]--> Home | Error
//!  InMotion --MoveAxis|StartScan|Composite|StopMovement[guard]--> Connected | Error
//!  Error --Initialize[connect]--> Connected | Error
//!  Error --Disconnect[best effort]--> NotInitialized
//! ```
//!
//! Every other pair is rejected: the state is kept and no guard runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{AppResult, DeviceError};

/// Lifecycle state shared by every device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Not connected to its hardware.
    #[default]
    NotInitialized,
    /// Connected and idle.
    Connected,
    /// Homed and idle.
    Home,
    /// An admitted operation is waiting to execute.
    InMotion,
    /// The last guard failed.
    Error,
}

impl State {
    /// All states, for exhaustive checks.
    pub const ALL: [State; 5] = [
        Self::NotInitialized,
        Self::Connected,
        Self::Home,
        Self::InMotion,
        Self::Error,
    ];

    /// Human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotInitialized => "Not Initialized",
            Self::Connected => "Connected",
            Self::Home => "Home",
            Self::InMotion => "In Motion",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation submitted to a device, parameterised by its axis, scan channel
/// and composite operation identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event<A, C, O> {
    /// Connect and calibrate.
    Initialize,
    /// Release the hardware.
    Disconnect,
    /// Home every axis.
    SetupHome,
    /// Abort scanning.
    StopMovement,
    /// Move one axis (or all of them) to its preset target.
    MoveAxis(A),
    /// Run an acquisition scan on one channel.
    StartScan(C),
    /// Run a multi-step alignment or measurement.
    CompositeOperation(O),
}

/// Payload-free discriminant of [`Event`], used by the transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`Event::Initialize`].
    Initialize,
    /// See [`Event::Disconnect`].
    Disconnect,
    /// See [`Event::SetupHome`].
    SetupHome,
    /// See [`Event::StopMovement`].
    StopMovement,
    /// See [`Event::MoveAxis`].
    MoveAxis,
    /// See [`Event::StartScan`].
    StartScan,
    /// See [`Event::CompositeOperation`].
    CompositeOperation,
}

impl EventKind {
    /// All kinds, for exhaustive checks.
    pub const ALL: [EventKind; 7] = [
        Self::Initialize,
        Self::Disconnect,
        Self::SetupHome,
        Self::StopMovement,
        Self::MoveAxis,
        Self::StartScan,
        Self::CompositeOperation,
    ];
}

impl<A, C, O> Event<A, C, O> {
    /// Discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Initialize => EventKind::Initialize,
            Self::Disconnect => EventKind::Disconnect,
            Self::SetupHome => EventKind::SetupHome,
            Self::StopMovement => EventKind::StopMovement,
            Self::MoveAxis(_) => EventKind::MoveAxis,
            Self::StartScan(_) => EventKind::StartScan,
            Self::CompositeOperation(_) => EventKind::CompositeOperation,
        }
    }
}

/// What a submission does in a given state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Move to the state without running a guard.
    Admit(State),
    /// Run the guard; its outcome selects one of the two states.
    Guarded {
        /// Target when the guard succeeds.
        on_ok: State,
        /// Target when the guard fails.
        on_err: State,
    },
    /// Run the guard and move to the state whatever it returns.
    BestEffort(State),
    /// Keep the current state; no guard runs.
    Rejected,
}

/// The transition table.
pub fn transition(state: State, kind: EventKind) -> Transition {
    use EventKind as K;
    use State as S;

    match (state, kind) {
        (S::NotInitialized, K::Initialize) | (S::Error, K::Initialize) => Transition::Guarded {
            on_ok: S::Connected,
            on_err: S::Error,
        },
        (S::NotInitialized, _) => Transition::Rejected,

        (S::Connected | S::Home, K::SetupHome | K::MoveAxis | K::StartScan | K::CompositeOperation) => {
            Transition::Admit(S::InMotion)
        }
        (S::Connected | S::Home, K::Disconnect) => Transition::Guarded {
            on_ok: S::NotInitialized,
            on_err: S::Error,
        },
        (S::Connected | S::Home, K::Initialize | K::StopMovement) => Transition::Rejected,

        (S::InMotion, K::SetupHome) => Transition::Guarded {
            on_ok: S::Home,
            on_err: S::Error,
        },
        (S::InMotion, K::MoveAxis | K::StartScan | K::CompositeOperation | K::StopMovement) => {
            Transition::Guarded {
                on_ok: S::Connected,
                on_err: S::Error,
            }
        }
        (S::InMotion, K::Initialize | K::Disconnect) => Transition::Rejected,

        (S::Error, K::Disconnect) => Transition::BestEffort(S::NotInitialized),
        (S::Error, _) => Transition::Rejected,
    }
}

/// Guards and side effects of one device.
///
/// Each method is the guard for the event of the same name. `Ok(())` selects
/// the success state, `Err` moves the device to `Error`.
pub trait DeviceActions {
    /// Axis identifier carried by `MoveAxis`.
    type Axis: Copy + fmt::Debug;
    /// Scan channel identifier carried by `StartScan`.
    type Channel: Copy + fmt::Debug;
    /// Composite operation identifier carried by `CompositeOperation`.
    type Operation: Copy + fmt::Debug;

    /// Guard for `Initialize`.
    fn connect(&mut self) -> AppResult<()>;
    /// Guard for `Disconnect`.
    fn disconnect(&mut self) -> AppResult<()>;
    /// Guard for `SetupHome`.
    fn go_home(&mut self) -> AppResult<()>;
    /// Guard for `StopMovement`.
    fn stop(&mut self) -> AppResult<()>;
    /// Guard for `MoveAxis`.
    fn move_axis(&mut self, axis: Self::Axis) -> AppResult<()>;
    /// Guard for `StartScan`.
    fn start_scan(&mut self, channel: Self::Channel) -> AppResult<()>;
    /// Guard for `CompositeOperation`.
    fn run_operation(&mut self, operation: Self::Operation) -> AppResult<()>;
}

/// Event type of the device whose actions are `D`.
pub type DeviceEvent<D> =
    Event<<D as DeviceActions>::Axis, <D as DeviceActions>::Channel, <D as DeviceActions>::Operation>;

/// Result of one submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Admitted without a guard.
    Admitted,
    /// Guard ran and succeeded.
    Passed,
    /// Guard ran and failed; the device is in `Error`.
    Failed,
    /// Best-effort guard ran; its outcome was ignored.
    Reset,
    /// Not accepted in the current state.
    Rejected,
}

/// State machine driving one device's actions.
#[derive(Debug)]
pub struct StateMachine<D: DeviceActions> {
    state: State,
    actions: D,
    last_error: Option<DeviceError>,
}

impl<D: DeviceActions> StateMachine<D> {
    /// Machine in `NotInitialized`.
    pub fn new(actions: D) -> Self {
        Self {
            state: State::NotInitialized,
            actions,
            last_error: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The device's actions.
    pub fn actions(&self) -> &D {
        &self.actions
    }

    /// The device's actions, for presetting targets and parameters.
    pub fn actions_mut(&mut self) -> &mut D {
        &mut self.actions
    }

    /// Error reported by the most recent failed guard or rejected submission.
    pub fn last_error(&self) -> Option<&DeviceError> {
        self.last_error.as_ref()
    }

    /// Records an error raised while preparing a submission.
    pub fn record_error(&mut self, err: DeviceError) {
        self.last_error = Some(err);
    }

    fn run_guard(&mut self, event: DeviceEvent<D>) -> AppResult<()> {
        match event {
            Event::Initialize => self.actions.connect(),
            Event::Disconnect => self.actions.disconnect(),
            Event::SetupHome => self.actions.go_home(),
            Event::StopMovement => self.actions.stop(),
            Event::MoveAxis(axis) => self.actions.move_axis(axis),
            Event::StartScan(channel) => self.actions.start_scan(channel),
            Event::CompositeOperation(operation) => self.actions.run_operation(operation),
        }
    }

    fn enter(&mut self, next: State, event: &DeviceEvent<D>) {
        debug!(from = %self.state, to = %next, ?event, "transition");
        self.state = next;
    }

    /// Submits one event.
    pub fn process(&mut self, event: DeviceEvent<D>) -> Dispatch {
        match transition(self.state, event.kind()) {
            Transition::Admit(next) => {
                self.enter(next, &event);
                Dispatch::Admitted
            }
            Transition::Guarded { on_ok, on_err } => {
                info!(state = %self.state, ?event, "executing");
                match self.run_guard(event) {
                    Ok(()) => {
                        self.enter(on_ok, &event);
                        Dispatch::Passed
                    }
                    Err(err) => {
                        error!(state = %self.state, ?event, error = %err, "guard failed");
                        self.last_error = Some(err);
                        self.enter(on_err, &event);
                        Dispatch::Failed
                    }
                }
            }
            Transition::BestEffort(next) => {
                if let Err(err) = self.run_guard(event) {
                    warn!(?event, error = %err, "ignoring failure while resetting");
                }
                self.enter(next, &event);
                Dispatch::Reset
            }
            Transition::Rejected => {
                warn!(state = %self.state, ?event, "event rejected");
                self.last_error = Some(DeviceError::NotAdmitted {
                    state: self.state,
                    event: format!("{event:?}"),
                });
                Dispatch::Rejected
            }
        }
    }

    /// Admits `event` and then executes it.
    ///
    /// The execution submission is only made when the first one was an
    /// admission, so the guard runs at most once per call.
    pub fn admit_then_execute(&mut self, event: DeviceEvent<D>) -> State {
        if self.process(event) == Dispatch::Admitted {
            self.process(event);
        }
        self.state
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Guard-counting actions with scripted outcomes.
    #[derive(Debug, Default)]
    pub(crate) struct CountingActions {
        pub calls: Vec<&'static str>,
        pub fail: Vec<&'static str>,
    }

    impl CountingActions {
        fn guard(&mut self, name: &'static str) -> AppResult<()> {
            self.calls.push(name);
            if self.fail.contains(&name) {
                Err(DeviceError::Motion(format!("{name} failed")))
            } else {
                Ok(())
            }
        }
    }

    impl DeviceActions for CountingActions {
        type Axis = u8;
        type Channel = u8;
        type Operation = u8;

        fn connect(&mut self) -> AppResult<()> {
            self.guard("connect")
        }
        fn disconnect(&mut self) -> AppResult<()> {
            self.guard("disconnect")
        }
        fn go_home(&mut self) -> AppResult<()> {
            self.guard("go_home")
        }
        fn stop(&mut self) -> AppResult<()> {
            self.guard("stop")
        }
        fn move_axis(&mut self, _axis: u8) -> AppResult<()> {
            self.guard("move_axis")
        }
        fn start_scan(&mut self, _channel: u8) -> AppResult<()> {
            self.guard("start_scan")
        }
        fn run_operation(&mut self, _operation: u8) -> AppResult<()> {
            self.guard("run_operation")
        }
    }

    type TestEvent = Event<u8, u8, u8>;

    fn sample(kind: EventKind) -> TestEvent {
        match kind {
            EventKind::Initialize => Event::Initialize,
            EventKind::Disconnect => Event::Disconnect,
            EventKind::SetupHome => Event::SetupHome,
            EventKind::StopMovement => Event::StopMovement,
            EventKind::MoveAxis => Event::MoveAxis(0),
            EventKind::StartScan => Event::StartScan(0),
            EventKind::CompositeOperation => Event::CompositeOperation(0),
        }
    }

    fn machine_in(state: State, fail: Vec<&'static str>) -> StateMachine<CountingActions> {
        let mut machine = StateMachine::new(CountingActions {
            calls: Vec::new(),
            fail,
        });
        machine.state = state;
        machine
    }

    #[test]
    fn test_table_targets_stay_inside_state_set() {
        for state in State::ALL {
            for kind in EventKind::ALL {
                match transition(state, kind) {
                    Transition::Admit(next) | Transition::BestEffort(next) => {
                        assert!(State::ALL.contains(&next))
                    }
                    Transition::Guarded { on_ok, on_err } => {
                        assert_ne!(on_ok, on_err, "{state:?} {kind:?}");
                        assert_eq!(on_err, State::Error);
                    }
                    Transition::Rejected => {}
                }
            }
        }
    }

    #[test]
    fn test_admission_only_from_idle_states() {
        for kind in [
            EventKind::SetupHome,
            EventKind::MoveAxis,
            EventKind::StartScan,
            EventKind::CompositeOperation,
        ] {
            for state in State::ALL {
                let admitted = matches!(transition(state, kind), Transition::Admit(State::InMotion));
                assert_eq!(
                    admitted,
                    matches!(state, State::Connected | State::Home),
                    "{state:?} {kind:?}"
                );
            }
        }
    }

    #[test]
    fn test_guard_runs_exactly_once_per_execution() {
        for state in State::ALL {
            for kind in EventKind::ALL {
                let mut machine = machine_in(state, vec![]);
                machine.process(sample(kind));
                let expected = match transition(state, kind) {
                    Transition::Guarded { .. } | Transition::BestEffort(_) => 1,
                    Transition::Admit(_) | Transition::Rejected => 0,
                };
                assert_eq!(machine.actions().calls.len(), expected, "{state:?} {kind:?}");
            }
        }
    }

    #[test]
    fn test_guard_outcome_selects_exclusive_target() {
        let mut ok = machine_in(State::InMotion, vec![]);
        assert_eq!(ok.process(Event::MoveAxis(1)), Dispatch::Passed);
        assert_eq!(ok.state(), State::Connected);

        let mut bad = machine_in(State::InMotion, vec!["move_axis"]);
        assert_eq!(bad.process(Event::MoveAxis(1)), Dispatch::Failed);
        assert_eq!(bad.state(), State::Error);
        assert!(matches!(bad.last_error(), Some(DeviceError::Motion(_))));
    }

    #[test]
    fn test_rejected_keeps_state() {
        let mut machine = machine_in(State::NotInitialized, vec![]);
        assert_eq!(machine.process(Event::SetupHome), Dispatch::Rejected);
        assert_eq!(machine.state(), State::NotInitialized);
        assert!(machine.actions().calls.is_empty());
        assert!(matches!(
            machine.last_error(),
            Some(DeviceError::NotAdmitted { .. })
        ));
    }

    #[test]
    fn test_error_recovery_paths() {
        let mut reconnect = machine_in(State::Error, vec![]);
        reconnect.process(Event::Initialize);
        assert_eq!(reconnect.state(), State::Connected);

        let mut reset = machine_in(State::Error, vec!["disconnect"]);
        assert_eq!(reset.process(Event::Disconnect), Dispatch::Reset);
        assert_eq!(reset.state(), State::NotInitialized);
    }

    #[test]
    fn test_admit_then_execute_home() {
        let mut machine = machine_in(State::Connected, vec![]);
        assert_eq!(machine.admit_then_execute(Event::SetupHome), State::Home);
        assert_eq!(machine.actions().calls, vec!["go_home"]);

        assert_eq!(machine.admit_then_execute(Event::MoveAxis(0)), State::Connected);
        assert_eq!(machine.actions().calls, vec!["go_home", "move_axis"]);
    }

    #[test]
    fn test_admit_then_execute_does_nothing_when_not_connected() {
        let mut machine = machine_in(State::NotInitialized, vec![]);
        assert_eq!(
            machine.admit_then_execute(Event::CompositeOperation(3)),
            State::NotInitialized
        );
        assert!(machine.actions().calls.is_empty());
    }

    #[test]
    fn test_admit_then_execute_from_in_motion_runs_guard_once() {
        let mut machine = machine_in(State::InMotion, vec![]);
        assert_eq!(machine.admit_then_execute(Event::StartScan(0)), State::Connected);
        assert_eq!(machine.actions().calls, vec!["start_scan"]);
    }

    #[test]
    fn test_stop_from_idle_is_rejected() {
        let mut machine = machine_in(State::Connected, vec![]);
        assert_eq!(machine.process(Event::StopMovement), Dispatch::Rejected);
        assert_eq!(machine.state(), State::Connected);
    }
}

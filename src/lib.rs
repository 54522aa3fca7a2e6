//! Device control for the motorized stages of an X-ray crystal
//! characterisation beam line.
//!
//! Six devices are driven through the same life cycle: a crystal stage
//! (hexapod plus rotational stepper), a monochromator, a slit, an
//! autocollimator, an X-ray sensor and an X-ray source. Each device pairs
//! an `Actions` type, holding its hardware collaborators and alignment
//! procedures, with a `Controller` façade that dispatches every request
//! through the shared five-state machine in [`fsm`].
//!
//! # Modules
//!
//! - [`fsm`] - states, events, the transition table and the state machine
//! - [`devices`] - the six devices and the building blocks they share
//! - [`hardware`] - collaborator traits, file and script backends, mocks
//! - [`factory`] - builds the devices from [`settings::Settings`]
//! - [`store`] - TOML-backed sectioned configuration store
//! - [`settings`], [`logging`], [`error`], [`error_recovery`] - ambient setup

pub mod devices;
pub mod error;
pub mod error_recovery;
pub mod factory;
pub mod fsm;
pub mod hardware;
pub mod logging;
pub mod settings;
pub mod store;

pub use devices::{DeviceController, DeviceStatus};
pub use error::{AppResult, DeviceError};
pub use factory::{Beamline, DeviceFactory, DeviceSnapshot, HardwareProvider, StepperAxis};
pub use fsm::{Event, State, StateMachine};
pub use settings::Settings;

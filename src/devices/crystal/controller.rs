//! Controller façade for the crystal stage.
//!
//! Every alignment starts from a preset: a hexapod target assembled from the
//! procedure's start positions and the stored alignment, a stepper angle, the
//! scanned axis and its scan parameters. [`Preset`] describes each one as
//! data so the controller methods stay one line each.

use tracing::debug;

use super::actions::{CrystalActions, FLIPPED_ANGLE, Y_SCAN_KEYS};
use super::sections::{
    start_key, BENDING, BRAGG, MISCUT, TORSION, X_AXIS, YW_AXES, Y_AXIS, Y_FINE, Z_AXIS,
};
use super::{CrystalAxis, CrystalChannel, CrystalOperation};
use crate::devices::context::ScanKeys;
use crate::devices::layout::DeviceKind;
use crate::devices::DeviceController;
use crate::error::AppResult;
use crate::fsm::{Event, StateMachine};
use crate::hardware::capabilities::{HexapodAxis, HexapodCoordinate, ScanParameters};

/// Hexapod target used when centering the source on the sensor.
pub const SOURCE_ALIGNMENT_TARGET: HexapodCoordinate =
    HexapodCoordinate::new(17.0, 0.0, 0.0, 0.0, 0.0, 0.0);

// =============================================================================
// Presets
// =============================================================================

/// Where one component of the preset hexapod target comes from.
#[derive(Clone, Copy, Debug)]
enum Origin {
    /// `START_POSITION_HXP_<axis>` of a settings section.
    Start(&'static str),
    /// The stored alignment coordinate of the axis.
    Aligned,
    /// An arbitrary settings key.
    Setting(&'static str, &'static str),
}

/// Where the preset stepper angle comes from.
#[derive(Clone, Copy, Debug)]
enum StepperOrigin {
    /// `START_POSITION_STEPPER` of a settings section.
    Setting(&'static str),
    Fixed(f64),
}

/// Start condition of one composite operation.
#[derive(Clone, Copy, Debug)]
struct Preset {
    /// Origins in `HexapodAxis::ALL` order.
    target: [Origin; 6],
    /// `OFFSET_FROM_BRAGG_ANGLE` of a section, added to W with the given sign.
    w_offset: Option<(&'static str, f64)>,
    stepper: StepperOrigin,
    scan_axis: HexapodAxis,
    scan_section: &'static str,
    scan_keys: ScanKeys,
}

use Origin::{Aligned, Setting, Start};

/// Target shared by the fine Y alignment, the flip check and the bending and
/// miscut measurements.
const ALIGNED_CRYSTAL: [Origin; 6] = [
    Aligned,
    Aligned,
    Aligned,
    Start(X_AXIS),
    Start(X_AXIS),
    Aligned,
];

fn preset(operation: CrystalOperation) -> Preset {
    let base = Preset {
        target: ALIGNED_CRYSTAL,
        w_offset: None,
        stepper: StepperOrigin::Setting(X_AXIS),
        scan_axis: HexapodAxis::W,
        scan_section: X_AXIS,
        scan_keys: ScanKeys::STANDARD,
    };
    match operation {
        CrystalOperation::XAxisAlignment => Preset {
            target: [Start(X_AXIS); 6],
            scan_axis: HexapodAxis::X,
            ..base
        },
        CrystalOperation::YAxisAlignment => Preset {
            target: [
                Aligned,
                Start(Y_AXIS),
                Aligned,
                Start(Y_AXIS),
                Start(Y_AXIS),
                Start(Y_AXIS),
            ],
            stepper: StepperOrigin::Setting(Y_AXIS),
            scan_axis: HexapodAxis::Y,
            scan_section: Y_AXIS,
            scan_keys: Y_SCAN_KEYS,
            ..base
        },
        CrystalOperation::ZAxisAlignment => Preset {
            target: [
                Aligned,
                Start(X_AXIS),
                Start(X_AXIS),
                Start(X_AXIS),
                Start(X_AXIS),
                Start(Z_AXIS),
            ],
            scan_axis: HexapodAxis::Z,
            scan_section: Z_AXIS,
            ..base
        },
        CrystalOperation::YWAxesAlignment => Preset {
            target: [
                Aligned,
                Setting(YW_AXES, "START_POSITION_SCAN_HXP_Y"),
                Aligned,
                Start(X_AXIS),
                Start(X_AXIS),
                Start(YW_AXES),
            ],
            scan_section: YW_AXES,
            ..base
        },
        CrystalOperation::XAxisFineAlignment => Preset {
            target: [
                Start(X_AXIS),
                Aligned,
                Aligned,
                Start(X_AXIS),
                Start(X_AXIS),
                Aligned,
            ],
            scan_axis: HexapodAxis::X,
            ..base
        },
        CrystalOperation::BraggPeakSearch => Preset {
            target: [
                Aligned,
                Aligned,
                Aligned,
                Start(X_AXIS),
                Start(X_AXIS),
                Start(BRAGG),
            ],
            scan_section: BRAGG,
            ..base
        },
        CrystalOperation::YAxisFineAlignment => Preset {
            w_offset: Some((Y_FINE, -1.0)),
            scan_section: Y_FINE,
            ..base
        },
        CrystalOperation::CheckFlippedOrientation => Preset {
            w_offset: Some((Y_FINE, -1.0)),
            stepper: StepperOrigin::Fixed(FLIPPED_ANGLE),
            scan_section: Y_FINE,
            ..base
        },
        CrystalOperation::BendingAngleMeasurement => Preset {
            w_offset: Some((BENDING, 1.0)),
            scan_section: BENDING,
            ..base
        },
        CrystalOperation::MiscutAngleMeasurement => Preset {
            w_offset: Some((MISCUT, 1.0)),
            stepper: StepperOrigin::Setting(MISCUT),
            scan_section: MISCUT,
            ..base
        },
        CrystalOperation::TorsionAngleMeasurement => Preset {
            target: [
                Aligned,
                Start(TORSION),
                Start(TORSION),
                Start(X_AXIS),
                Start(X_AXIS),
                Aligned,
            ],
            w_offset: Some((TORSION, 1.0)),
            stepper: StepperOrigin::Setting(TORSION),
            scan_section: TORSION,
            ..base
        },
    }
}

impl Preset {
    fn resolve(&self, actions: &CrystalActions) -> AppResult<(HexapodCoordinate, f64)> {
        let context = actions.context();
        let mut target = HexapodCoordinate::default();
        for (axis, origin) in HexapodAxis::ALL.into_iter().zip(self.target) {
            let value = match origin {
                Start(section) => context.setting(section, &start_key(axis))?,
                Aligned => actions.stored_alignment(axis)?,
                Setting(section, key) => context.setting(section, key)?,
            };
            target.set(axis, value);
        }
        if let Some((section, sign)) = self.w_offset {
            target.w += sign * context.setting(section, "OFFSET_FROM_BRAGG_ANGLE")?;
        }
        let stepper = match self.stepper {
            StepperOrigin::Setting(section) => context.setting(section, "START_POSITION_STEPPER")?,
            StepperOrigin::Fixed(angle) => angle,
        };
        Ok((target, stepper))
    }

    fn apply(&self, actions: &mut CrystalActions) -> AppResult<()> {
        let (target, stepper) = self.resolve(actions)?;
        let parameters = actions
            .context()
            .scan_parameters(self.scan_section, self.scan_keys)?;
        debug!(?target, stepper, axis = %self.scan_axis, "crystal preset");
        actions.hexapod_mut().set_target(target);
        actions.stepper_mut().set_setpoint(stepper);
        actions
            .hexapod_mut()
            .configure_scan(self.scan_axis, &parameters);
        Ok(())
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Controller façade for the crystal stage.
#[derive(Debug)]
pub struct CrystalController {
    machine: StateMachine<CrystalActions>,
}

impl CrystalController {
    /// Controller in `NotInitialized`.
    pub fn new(actions: CrystalActions) -> Self {
        Self {
            machine: StateMachine::new(actions),
        }
    }

    /// Position reported by the rotational stepper.
    pub fn position_stepper(&self) -> f64 {
        self.machine.actions().stepper().position()
    }

    /// Cached hexapod coordinate of `axis`.
    pub fn position(&self, axis: HexapodAxis) -> f64 {
        self.machine.actions().hexapod().coordinate(axis)
    }

    /// Cached hexapod X.
    pub fn position_x(&self) -> f64 {
        self.position(HexapodAxis::X)
    }

    /// Cached hexapod Y.
    pub fn position_y(&self) -> f64 {
        self.position(HexapodAxis::Y)
    }

    /// Cached hexapod Z.
    pub fn position_z(&self) -> f64 {
        self.position(HexapodAxis::Z)
    }

    /// Cached hexapod U.
    pub fn position_u(&self) -> f64 {
        self.position(HexapodAxis::U)
    }

    /// Cached hexapod V.
    pub fn position_v(&self) -> f64 {
        self.position(HexapodAxis::V)
    }

    /// Cached hexapod W.
    pub fn position_w(&self) -> f64 {
        self.position(HexapodAxis::W)
    }

    /// Moves the hexapod to `target`.
    pub fn move_to_abs_position(&mut self, target: HexapodCoordinate) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.hexapod_mut().set_target(target);
                Ok(())
            },
            Event::MoveAxis(CrystalAxis::Hexapod),
        )
    }

    /// Moves the rotational stepper to `position`.
    pub fn move_to_position_stepper(&mut self, position: f64) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.stepper_mut().set_setpoint(position);
                Ok(())
            },
            Event::MoveAxis(CrystalAxis::Stepper),
        )
    }

    /// Scans the hexapod along `axis`.
    pub fn scan_hexapod(&mut self, axis: HexapodAxis, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.hexapod_mut().configure_scan(axis, parameters);
                Ok(())
            },
            Event::StartScan(CrystalChannel::Hexapod),
        )
    }

    /// Configures the stepper scanner and scans.
    pub fn scan_stepper(&mut self, parameters: &ScanParameters) -> bool {
        self.prepare_and_dispatch(
            |a| {
                a.stepper_mut().configure_scan(parameters);
                Ok(())
            },
            Event::StartScan(CrystalChannel::Stepper),
        )
    }

    /// Moves the hexapod out of the beam.
    pub fn align_source_with_sensor(&mut self) -> bool {
        self.move_to_abs_position(SOURCE_ALIGNMENT_TARGET)
    }

    /// Presets `operation`'s start condition and runs it.
    pub fn run_operation(&mut self, operation: CrystalOperation) -> bool {
        let preset = preset(operation);
        self.prepare_and_dispatch(
            |a| preset.apply(a),
            Event::CompositeOperation(operation),
        )
    }

    /// Coarse X alignment from the stored start coordinate.
    pub fn x_axis_alignment(&mut self) -> bool {
        self.run_operation(CrystalOperation::XAxisAlignment)
    }

    /// Y alignment: W sweep with an X re-centering at each step.
    pub fn y_axis_alignment(&mut self) -> bool {
        self.run_operation(CrystalOperation::YAxisAlignment)
    }

    /// Coarse Z alignment.
    pub fn z_axis_alignment(&mut self) -> bool {
        self.run_operation(CrystalOperation::ZAxisAlignment)
    }

    /// Y sweep with a W scan at each step, checked against the std-dev
    /// threshold.
    pub fn yw_axes_alignment(&mut self) -> bool {
        self.run_operation(CrystalOperation::YWAxesAlignment)
    }

    /// X alignment starting from the stored Y, Z and W alignment.
    pub fn x_axis_fine_alignment(&mut self) -> bool {
        self.run_operation(CrystalOperation::XAxisFineAlignment)
    }

    /// W scan for the Bragg peak.
    pub fn bragg_peak_search(&mut self) -> bool {
        self.run_operation(CrystalOperation::BraggPeakSearch)
    }

    /// Edge-to-edge fine Y alignment at 0°.
    pub fn y_axis_fine_alignment(&mut self) -> bool {
        self.run_operation(CrystalOperation::YAxisFineAlignment)
    }

    /// Fine Y alignment at 180°, compensated until both orientations agree.
    pub fn check_alignment_in_flipped_orientation(&mut self) -> bool {
        self.run_operation(CrystalOperation::CheckFlippedOrientation)
    }

    /// Bending angle from a Y sweep.
    pub fn bending_angle_measurement(&mut self) -> bool {
        self.run_operation(CrystalOperation::BendingAngleMeasurement)
    }

    /// Miscut angle. With `repeat_bending` the bending measurement it reuses
    /// is taken again first.
    pub fn miscut_angle_measurement(&mut self, repeat_bending: bool) -> bool {
        if repeat_bending && !self.bending_angle_measurement() {
            return false;
        }
        self.run_operation(CrystalOperation::MiscutAngleMeasurement)
    }

    /// Torsion angle from a Z sweep.
    pub fn torsion_angle_measurement(&mut self) -> bool {
        self.run_operation(CrystalOperation::TorsionAngleMeasurement)
    }
}

impl DeviceController for CrystalController {
    type Actions = CrystalActions;
    const KIND: DeviceKind = DeviceKind::Crystal;

    fn machine(&self) -> &StateMachine<CrystalActions> {
        &self.machine
    }

    fn machine_mut(&mut self) -> &mut StateMachine<CrystalActions> {
        &mut self.machine
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::devices::context::AlignmentContext;
    use crate::devices::crystal::hexapod::HexapodStage;
    use crate::devices::crystal::sections::STORED;
    use crate::devices::stage::StepperStage;
    use crate::devices::DeviceStatus;
    use crate::error::DeviceError;
    use crate::error_recovery::RetryPolicy;
    use crate::hardware::capabilities::ConfigFile;
    use crate::hardware::mock::{
        MockConfiguration, MockHexapod, MockMotor, MockPostProcessing, MockScanner, MockSensors,
    };

    const MAIN: &str = include_str!("../../../config/beamline_config.toml");
    const ALIGNMENT: &str = include_str!("../../../config/alignment_settings.toml");
    const Y_RESULT: &str = "crystal_y_alignment_position.csv";
    /// Hexapod moves of one fine Y alignment with the shipped settings.
    const FINE_Y_MOVES: usize = 10;

    struct Rig {
        controller: CrystalController,
        hexapod: MockHexapod,
        hexapod_scanner: MockScanner,
        stepper: MockMotor,
        config: MockConfiguration,
        sensors: MockSensors,
        scripts: MockPostProcessing,
    }

    fn rig() -> Rig {
        let config = MockConfiguration::new()
            .with_toml(ConfigFile::Main, MAIN)
            .unwrap()
            .with_toml(ConfigFile::AlignmentSettings, ALIGNMENT)
            .unwrap();
        let hexapod = MockHexapod::new();
        let hexapod_scanner = MockScanner::new();
        let stepper = MockMotor::new();
        let sensors = MockSensors::default();
        let scripts = MockPostProcessing::new();
        let context = AlignmentContext::new(
            DeviceKind::Crystal,
            Box::new(config.clone()),
            Box::new(sensors.clone()),
            Box::new(scripts.clone()),
        );
        let actions = CrystalActions::new(
            HexapodStage::new(Box::new(hexapod.clone()), Box::new(hexapod_scanner.clone())),
            StepperStage::new("rotational", Box::new(stepper.clone()), Box::new(MockScanner::new())),
            context,
            RetryPolicy {
                max_attempts: 3,
                backoff_delay: Duration::ZERO,
            },
        );
        let mut controller = CrystalController::new(actions);
        assert!(controller.start());
        Rig {
            controller,
            hexapod,
            hexapod_scanner,
            stepper,
            config,
            sensors,
            scripts,
        }
    }

    fn stored_y(config: &MockConfiguration) -> Option<String> {
        config.value(ConfigFile::Main, STORED, "ALIGNMENT_POSITION_HXP_Y")
    }

    #[test]
    fn test_start_connects_and_calls_hexapod_once() {
        let rig = rig();
        assert_eq!(rig.controller.status(), DeviceStatus::Connected);
        assert_eq!(rig.hexapod.connect_calls(), 1);
    }

    #[test]
    fn test_hexapod_connect_failure_does_not_block_start() {
        let hexapod = MockHexapod::new();
        hexapod.set_connect_status(1);
        let context = AlignmentContext::new(
            DeviceKind::Crystal,
            Box::new(MockConfiguration::new()),
            Box::new(MockSensors::default()),
            Box::new(MockPostProcessing::new()),
        );
        let actions = CrystalActions::new(
            HexapodStage::new(Box::new(hexapod), Box::new(MockScanner::new())),
            StepperStage::new("rotational", Box::new(MockMotor::new()), Box::new(MockScanner::new())),
            context,
            RetryPolicy::default(),
        );
        let mut controller = CrystalController::new(actions);
        assert!(controller.start());
    }

    #[test]
    fn test_failing_home_ends_in_error() {
        let mut rig = rig();
        rig.hexapod.set_home_status(2);
        assert!(!rig.controller.go_home());
        assert_eq!(rig.controller.status(), DeviceStatus::Error);
        assert!(matches!(
            rig.controller.last_error(),
            Some(DeviceError::Motion(_))
        ));
    }

    #[test]
    fn test_align_source_with_sensor_moves_hexapod_out() {
        let mut rig = rig();
        assert!(rig.controller.align_source_with_sensor());
        assert_eq!(rig.hexapod.sent(), vec![SOURCE_ALIGNMENT_TARGET]);
        assert_eq!(rig.controller.position_x(), 17.0);
    }

    #[test]
    fn test_y_fine_preset_offsets_w_from_stored_bragg_angle() {
        let mut rig = rig();
        rig.sensors.push_results(Y_RESULT, [0.9, 1.1]);
        assert!(rig.controller.y_axis_fine_alignment());

        let first = rig.hexapod.sent()[0];
        assert_eq!(first.x, 0.0);
        assert_eq!(first.z, 0.0);
        assert!((first.w - (14.22 - 0.05)).abs() < 1e-9);
        assert_eq!(rig.hexapod_scanner.axes()[0], HexapodAxis::W);
        assert_eq!(stored_y(&rig.config).as_deref(), Some("1"));
    }

    #[test]
    fn test_missing_setting_skips_dispatch() {
        let context = AlignmentContext::new(
            DeviceKind::Crystal,
            Box::new(MockConfiguration::new()),
            Box::new(MockSensors::default()),
            Box::new(MockPostProcessing::new()),
        );
        let actions = CrystalActions::new(
            HexapodStage::new(Box::new(MockHexapod::new()), Box::new(MockScanner::new())),
            StepperStage::new("rotational", Box::new(MockMotor::new()), Box::new(MockScanner::new())),
            context,
            RetryPolicy::default(),
        );
        let mut controller = CrystalController::new(actions);
        assert!(controller.start());
        assert!(!controller.x_axis_alignment());
        assert_eq!(controller.status(), DeviceStatus::Connected);
        assert!(matches!(
            controller.last_error(),
            Some(DeviceError::Configuration(_))
        ));
    }

    #[test]
    fn test_flip_check_within_threshold_skips_compensation() {
        let mut rig = rig();
        rig.sensors.push_results(Y_RESULT, [1.002, 1.002]);

        assert!(rig.controller.check_alignment_in_flipped_orientation());
        assert_eq!(rig.controller.status(), DeviceStatus::Connected);
        assert!(rig.stepper.moves().iter().all(|&angle| angle == FLIPPED_ANGLE));
        assert_eq!(stored_y(&rig.config).as_deref(), Some("1.002"));
    }

    #[test]
    fn test_flip_compensation_converges() {
        let mut rig = rig();
        rig.sensors
            .push_results(Y_RESULT, [1.5, 1.5, 1.0, 1.0, 1.002, 1.002]);

        assert!(rig.controller.check_alignment_in_flipped_orientation());
        assert!(rig.stepper.moves().contains(&0.0));
        assert_eq!(stored_y(&rig.config).as_deref(), Some("1.002"));
    }

    #[test]
    fn test_flip_compensation_gives_up_after_budget() {
        let mut rig = rig();
        let mut reads = vec![1.5, 1.5];
        for _ in 0..3 {
            reads.extend([1.0, 1.0, 1.5, 1.5]);
        }
        rig.sensors.push_results(Y_RESULT, reads);

        assert!(!rig.controller.check_alignment_in_flipped_orientation());
        assert_eq!(rig.controller.status(), DeviceStatus::Error);
        assert!(matches!(
            rig.controller.last_error(),
            Some(DeviceError::Convergence(_))
        ));
        let y_reads = rig
            .sensors
            .reads()
            .iter()
            .filter(|path| path.ends_with(Y_RESULT))
            .count();
        assert_eq!(y_reads, 2 + 3 * 4);
    }

    #[test]
    fn test_scan_failure_during_compensation_ends_the_check() {
        let mut rig = rig();
        rig.sensors
            .push_results(Y_RESULT, [1.5, 1.5, 1.0, 1.0, 1.002, 1.002]);
        // The flipped fine Y alignment scans seven times; the eighth scan is
        // the X re-centering of the first compensation pass.
        let mut scans = vec![true; 7];
        scans.push(false);
        rig.hexapod_scanner.queue_scan_results(scans);

        assert!(!rig.controller.check_alignment_in_flipped_orientation());
        assert_eq!(rig.controller.status(), DeviceStatus::Error);
        assert!(matches!(
            rig.controller.last_error(),
            Some(DeviceError::Scan(_))
        ));
        assert_eq!(rig.hexapod_scanner.scan_calls(), 8);
        let sent = rig.hexapod.sent();
        assert_eq!(sent.len(), FINE_Y_MOVES + 2);
        assert_eq!(sent[FINE_Y_MOVES].y, 1.0);
        assert_eq!(sent[FINE_Y_MOVES + 1].y, 1.0);
        let y_reads = rig
            .sensors
            .reads()
            .iter()
            .filter(|path| path.ends_with(Y_RESULT))
            .count();
        assert_eq!(y_reads, 2);
    }

    #[test]
    fn test_miscut_repeats_bending_first() {
        let mut rig = rig();
        assert!(rig.controller.miscut_angle_measurement(true));
        let scripts: Vec<_> = rig
            .scripts
            .calls()
            .into_iter()
            .filter_map(|(script, _)| script.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(scripts.first().map(String::as_str), Some("MeasureBendingAngle.py"));
        assert_eq!(scripts.last().map(String::as_str), Some("MeasureMiscutAngle.py"));
    }

    #[test]
    fn test_miscut_stops_when_bending_fails() {
        let mut rig = rig();
        rig.hexapod_scanner.set_default_scan_result(false);
        assert!(!rig.controller.miscut_angle_measurement(true));
        assert!(rig.scripts.calls().is_empty());
    }
}

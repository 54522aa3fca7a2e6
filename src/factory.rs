//! Builds the beam line's device controllers from application settings.
//!
//! Motion hardware comes from a [`HardwareProvider`]; configuration, result
//! files and scripts are either the on-disk implementations or, for dry runs,
//! in-memory mocks seeded from the configuration files.

use std::fmt;
use std::fs;

use serde::Serialize;
use tracing::info;

use crate::devices::autocollimator::{AutocollimatorActions, AutocollimatorController};
use crate::devices::context::AlignmentContext;
use crate::devices::crystal::{CrystalActions, CrystalController, HexapodStage};
use crate::devices::layout::DeviceKind;
use crate::devices::monochromator::{MonochromatorActions, MonochromatorController};
use crate::devices::slit::{SlitActions, SlitController};
use crate::devices::stage::StepperStage;
use crate::devices::xray_sensor::{XRaySensorActions, XRaySensorController};
use crate::devices::xray_source::{XRaySourceActions, XRaySourceController};
use crate::devices::{DeviceController, DeviceStatus};
use crate::error::AppResult;
use crate::error_recovery::RetryPolicy;
use crate::hardware::capabilities::{
    ConfigFile, Configuration, Hexapod, Motor, PostProcessing, Scanning, Sensors,
};
use crate::hardware::mock::{MockConfiguration, MockPostProcessing, MockSensors};
use crate::hardware::{CsvSensors, ScriptRunner};
use crate::settings::Settings;
use crate::store::TomlConfiguration;

/// Stepper axes of the beam line, numbered as the motion controller
/// numbers them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepperAxis {
    MonochromatorLinear,
    MonochromatorRotational,
    SlitLinear,
    CrystalRotational,
    XRaySource,
    XRaySensor,
    Autocollimator,
    SlitRotational,
}

impl StepperAxis {
    /// All axes in controller order.
    pub const ALL: [StepperAxis; 8] = [
        Self::MonochromatorLinear,
        Self::MonochromatorRotational,
        Self::SlitLinear,
        Self::CrystalRotational,
        Self::XRaySource,
        Self::XRaySensor,
        Self::Autocollimator,
        Self::SlitRotational,
    ];

    /// Index on the motion controller.
    pub fn index(self) -> u8 {
        match self {
            Self::MonochromatorLinear => 0,
            Self::MonochromatorRotational => 1,
            Self::SlitLinear => 2,
            Self::CrystalRotational => 3,
            Self::XRaySource => 4,
            Self::XRaySensor => 5,
            Self::Autocollimator => 6,
            Self::SlitRotational => 7,
        }
    }

    /// Stage name used in logs.
    pub fn stage_name(self) -> &'static str {
        match self {
            Self::MonochromatorLinear | Self::SlitLinear => "linear",
            Self::MonochromatorRotational
            | Self::SlitRotational
            | Self::CrystalRotational
            | Self::XRaySource
            | Self::XRaySensor
            | Self::Autocollimator => "rotational",
        }
    }
}

impl fmt::Display for StepperAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (#{})", self.index())
    }
}

/// Source of motion collaborators.
pub trait HardwareProvider {
    /// Stepper driver for `axis`.
    fn stepper(&mut self, axis: StepperAxis) -> AppResult<Box<dyn Motor>>;
    /// Scanning helper bound to the stepper `axis`.
    fn stepper_scanner(&mut self, axis: StepperAxis) -> AppResult<Box<dyn Scanning>>;
    /// The crystal hexapod.
    fn hexapod(&mut self) -> AppResult<Box<dyn Hexapod>>;
    /// Scanning helper bound to the hexapod.
    fn hexapod_scanner(&mut self) -> AppResult<Box<dyn Scanning>>;
}

/// Configuration, sensors and scripts handed to every device.
enum Backend {
    Files,
    DryRun {
        configuration: MockConfiguration,
        sensors: MockSensors,
        scripts: MockPostProcessing,
    },
}

/// Builds controllers for the six devices.
pub struct DeviceFactory<P> {
    settings: Settings,
    provider: P,
    backend: Backend,
}

impl<P: HardwareProvider> DeviceFactory<P> {
    /// Factory writing results to the configured files and running the
    /// configured interpreter.
    pub fn new(settings: Settings, provider: P) -> Self {
        Self {
            settings,
            provider,
            backend: Backend::Files,
        }
    }

    /// Factory whose store, result files and scripts live in memory.
    ///
    /// The store is seeded from the configuration files so every setting
    /// resolves; nothing is written back.
    pub fn dry_run(settings: Settings, provider: P) -> AppResult<Self> {
        let base = settings.config_base();
        let main = fs::read_to_string(base.join(&settings.config_file))?;
        let alignment = fs::read_to_string(base.join(&settings.alignment_settings_file))?;
        let configuration = MockConfiguration::new()
            .with_toml(ConfigFile::Main, &main)?
            .with_toml(ConfigFile::AlignmentSettings, &alignment)?;
        let sensors = MockSensors::new(settings.project_dir.clone());
        info!(config = %base.display(), "dry run: results and scripts are simulated");
        Ok(Self {
            settings,
            provider,
            backend: Backend::DryRun {
                configuration,
                sensors,
                scripts: MockPostProcessing::new(),
            },
        })
    }

    /// Settings the factory was built from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn configuration(&self) -> Box<dyn Configuration> {
        match &self.backend {
            Backend::Files => Box::new(TomlConfiguration::new(
                self.settings.config_base(),
                self.settings.config_file.clone(),
                self.settings.alignment_settings_file.clone(),
                self.settings.log_dir(),
            )),
            Backend::DryRun { configuration, .. } => Box::new(configuration.clone()),
        }
    }

    fn sensors(&self) -> Box<dyn Sensors> {
        match &self.backend {
            Backend::Files => Box::new(CsvSensors::new(self.settings.project_dir.clone())),
            Backend::DryRun { sensors, .. } => Box::new(sensors.clone()),
        }
    }

    fn post_processing(&self) -> Box<dyn PostProcessing> {
        match &self.backend {
            Backend::Files => Box::new(ScriptRunner::new(
                self.settings.post_processing.interpreter.clone(),
            )),
            Backend::DryRun { scripts, .. } => Box::new(scripts.clone()),
        }
    }

    fn context(&self, device: DeviceKind) -> AlignmentContext {
        AlignmentContext::new(
            device,
            self.configuration(),
            self.sensors(),
            self.post_processing(),
        )
    }

    fn stage(&mut self, axis: StepperAxis) -> AppResult<StepperStage> {
        let motor = self.provider.stepper(axis)?;
        let scanner = self.provider.stepper_scanner(axis)?;
        Ok(StepperStage::new(axis.stage_name(), motor, scanner))
    }

    /// Crystal stage: hexapod plus rotational stepper.
    pub fn crystal(&mut self) -> AppResult<CrystalController> {
        let hexapod = HexapodStage::new(self.provider.hexapod()?, self.provider.hexapod_scanner()?);
        let stepper = self.stage(StepperAxis::CrystalRotational)?;
        let retry = RetryPolicy::from(&self.settings.compensation);
        let context = self.context(DeviceKind::Crystal);
        Ok(CrystalController::new(CrystalActions::new(
            hexapod, stepper, context, retry,
        )))
    }

    /// Monochromator: linear and rotational steppers.
    pub fn monochromator(&mut self) -> AppResult<MonochromatorController> {
        let linear = self.stage(StepperAxis::MonochromatorLinear)?;
        let rotational = self.stage(StepperAxis::MonochromatorRotational)?;
        let context = self.context(DeviceKind::Monochromator);
        Ok(MonochromatorController::new(MonochromatorActions::new(
            linear, rotational, context,
        )?))
    }

    /// Slit: linear and rotational steppers.
    pub fn slit(&mut self) -> AppResult<SlitController> {
        let linear = self.stage(StepperAxis::SlitLinear)?;
        let rotational = self.stage(StepperAxis::SlitRotational)?;
        let context = self.context(DeviceKind::Slit);
        Ok(SlitController::new(SlitActions::new(
            linear, rotational, context,
        )?))
    }

    /// Autocollimator stage.
    pub fn autocollimator(&mut self) -> AppResult<AutocollimatorController> {
        let stage = self.stage(StepperAxis::Autocollimator)?;
        Ok(AutocollimatorController::new(AutocollimatorActions::new(
            stage,
        )))
    }

    /// X-ray sensor stage, with the configuration for its 2θ setup.
    pub fn xray_sensor(&mut self) -> AppResult<XRaySensorController> {
        let stage = self.stage(StepperAxis::XRaySensor)?;
        let configuration = self.configuration();
        Ok(XRaySensorController::new(XRaySensorActions::new(
            stage,
            configuration,
        )))
    }

    /// X-ray source stage.
    pub fn xray_source(&mut self) -> AppResult<XRaySourceController> {
        let stage = self.stage(StepperAxis::XRaySource)?;
        let context = self.context(DeviceKind::XRaySource);
        Ok(XRaySourceController::new(XRaySourceActions::new(
            stage, context,
        )?))
    }

    /// All six devices.
    pub fn build(&mut self) -> AppResult<Beamline> {
        let beamline = Beamline {
            crystal: self.crystal()?,
            monochromator: self.monochromator()?,
            slit: self.slit()?,
            autocollimator: self.autocollimator()?,
            xray_sensor: self.xray_sensor()?,
            xray_source: self.xray_source()?,
        };
        info!("beam line devices built");
        Ok(beamline)
    }
}

/// Every device of the beam line.
#[derive(Debug)]
pub struct Beamline {
    /// Crystal stage.
    pub crystal: CrystalController,
    /// Monochromator.
    pub monochromator: MonochromatorController,
    /// Slit.
    pub slit: SlitController,
    /// Autocollimator stage.
    pub autocollimator: AutocollimatorController,
    /// X-ray sensor stage.
    pub xray_sensor: XRaySensorController,
    /// X-ray source stage.
    pub xray_source: XRaySourceController,
}

/// Status and axis positions of one device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    /// Which device.
    pub kind: DeviceKind,
    /// Its current status.
    pub status: DeviceStatus,
    /// `(axis, position)` pairs, steppers first, then the hexapod axes.
    pub positions: Vec<(&'static str, f64)>,
}

impl fmt::Display for DeviceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16} {:<16}", self.kind.to_string(), self.status.to_string())?;
        for (axis, position) in &self.positions {
            write!(f, " {axis}={position:.3}")?;
        }
        Ok(())
    }
}

impl Beamline {
    /// Status of each device.
    pub fn statuses(&self) -> Vec<(DeviceKind, DeviceStatus)> {
        vec![
            (DeviceKind::Crystal, self.crystal.status()),
            (DeviceKind::Monochromator, self.monochromator.status()),
            (DeviceKind::Slit, self.slit.status()),
            (DeviceKind::Autocollimator, self.autocollimator.status()),
            (DeviceKind::XRaySensor, self.xray_sensor.status()),
            (DeviceKind::XRaySource, self.xray_source.status()),
        ]
    }

    /// Status and positions of each device.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let crystal = &self.crystal;
        vec![
            DeviceSnapshot {
                kind: DeviceKind::Crystal,
                status: crystal.status(),
                positions: vec![
                    ("stepper", crystal.position_stepper()),
                    ("x", crystal.position_x()),
                    ("y", crystal.position_y()),
                    ("z", crystal.position_z()),
                    ("u", crystal.position_u()),
                    ("v", crystal.position_v()),
                    ("w", crystal.position_w()),
                ],
            },
            DeviceSnapshot {
                kind: DeviceKind::Monochromator,
                status: self.monochromator.status(),
                positions: vec![
                    ("linear", self.monochromator.position_stepper_linear()),
                    ("rotational", self.monochromator.position_stepper_rotational()),
                ],
            },
            DeviceSnapshot {
                kind: DeviceKind::Slit,
                status: self.slit.status(),
                positions: vec![
                    ("linear", self.slit.position_stepper_linear()),
                    ("rotational", self.slit.position_stepper_rotational()),
                ],
            },
            DeviceSnapshot {
                kind: DeviceKind::Autocollimator,
                status: self.autocollimator.status(),
                positions: vec![("stepper", self.autocollimator.position_stepper())],
            },
            DeviceSnapshot {
                kind: DeviceKind::XRaySensor,
                status: self.xray_sensor.status(),
                positions: vec![("stepper", self.xray_sensor.position_stepper())],
            },
            DeviceSnapshot {
                kind: DeviceKind::XRaySource,
                status: self.xray_source.status(),
                positions: vec![("stepper", self.xray_source.position_stepper())],
            },
        ]
    }

    /// Connects every device; `true` when all of them connected.
    pub fn start_all(&mut self) -> bool {
        let results = [
            self.crystal.start(),
            self.monochromator.start(),
            self.slit.start(),
            self.autocollimator.start(),
            self.xray_sensor.start(),
            self.xray_source.start(),
        ];
        results.iter().all(|&ok| ok)
    }

    /// Disconnects every device; `true` when all of them disconnected.
    pub fn disconnect_all(&mut self) -> bool {
        let results = [
            self.crystal.disconnect(),
            self.monochromator.disconnect(),
            self.slit.disconnect(),
            self.autocollimator.disconnect(),
            self.xray_sensor.disconnect(),
            self.xray_source.disconnect(),
        ];
        results.iter().all(|&ok| ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedHardware;
    use std::path::Path;
    use tempfile::tempdir;

    fn project(dir: &Path) -> Settings {
        let config = dir.join("config");
        fs::create_dir_all(&config).unwrap();
        fs::write(
            config.join("beamline_config.toml"),
            include_str!("../config/beamline_config.toml"),
        )
        .unwrap();
        fs::write(
            config.join("alignment_settings.toml"),
            include_str!("../config/alignment_settings.toml"),
        )
        .unwrap();
        Settings {
            project_dir: dir.to_path_buf(),
            ..Settings::default()
        }
    }

    #[test]
    fn test_axis_indices_are_distinct() {
        let mut indices: Vec<u8> = StepperAxis::ALL.iter().map(|a| a.index()).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_build_from_files_and_start() {
        let dir = tempdir().unwrap();
        let mut hardware = SimulatedHardware::new();
        let mut factory = DeviceFactory::new(project(dir.path()), hardware.clone());
        let mut beamline = factory.build().unwrap();
        assert!(beamline.start_all());
        assert!(beamline
            .statuses()
            .iter()
            .all(|(_, status)| *status == DeviceStatus::Connected));

        assert!(beamline.monochromator.move_to_position_stepper_linear(3.0));
        assert_eq!(hardware.motor(StepperAxis::MonochromatorLinear).moves(), vec![3.0]);
        assert!(beamline.disconnect_all());
    }

    #[test]
    fn test_snapshot_reports_positions() {
        let dir = tempdir().unwrap();
        let mut factory = DeviceFactory::new(project(dir.path()), SimulatedHardware::new());
        let mut beamline = factory.build().unwrap();
        assert!(beamline.start_all());
        assert!(beamline.monochromator.move_to_position_stepper_linear(3.0));
        assert!(beamline.crystal.align_source_with_sensor());

        let snapshot = beamline.snapshot();
        assert_eq!(
            snapshot.iter().map(|device| device.kind).collect::<Vec<_>>(),
            DeviceKind::ALL
        );
        assert!(snapshot
            .iter()
            .all(|device| device.status == DeviceStatus::Connected));

        let crystal = &snapshot[0];
        assert_eq!(crystal.positions.len(), 7);
        assert!(crystal.positions.contains(&("x", 17.0)));
        let monochromator = &snapshot[1];
        assert!(monochromator.positions.contains(&("linear", 3.0)));
        assert!(monochromator.to_string().contains("linear=3.000"));
        assert_eq!(snapshot[5].positions.len(), 1);
    }

    #[test]
    fn test_dry_run_persists_in_memory_only() {
        let dir = tempdir().unwrap();
        let settings = project(dir.path());
        let main = settings.config_base().join("beamline_config.toml");
        let before = fs::read_to_string(&main).unwrap();

        let mut factory = DeviceFactory::dry_run(settings, SimulatedHardware::new()).unwrap();
        let mut source = factory.xray_source().unwrap();
        assert!(source.start());
        assert!(source.align_source_with_sensor(true));
        assert_eq!(fs::read_to_string(&main).unwrap(), before);
    }

    #[test]
    fn test_missing_stored_center_fails_build() {
        let dir = tempdir().unwrap();
        let settings = project(dir.path());
        fs::write(settings.config_base().join("beamline_config.toml"), "").unwrap();
        let mut factory = DeviceFactory::new(settings, SimulatedHardware::new());
        assert!(factory.monochromator().is_err());
    }
}

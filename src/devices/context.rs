//! Configuration, result files and scripts shared by one device's alignments.
//!
//! Every alignment does the same round trip: look up a script and a result
//! file name in the alignment settings, truncate the result file, run the
//! script, read the value back and persist it in the main configuration file.
//! [`AlignmentContext`] bundles the three collaborators involved and the
//! device's [`DeviceLayout`] so each step is one call.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::devices::layout::{DeviceKind, DeviceLayout};
use crate::error::{AppResult, DeviceError};
use crate::hardware::capabilities::{
    ConfigFile, Configuration, PostProcessing, ScanParameters, Sensors,
};

/// Key names a section uses for its scan parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanKeys {
    /// Step size key.
    pub step_size: &'static str,
    /// Range key.
    pub range: &'static str,
    /// Acquisition time key.
    pub duration: &'static str,
    /// Data log file name key.
    pub data_log: &'static str,
    /// Erase flag key.
    pub erase: &'static str,
}

impl ScanKeys {
    /// Keys used by most sections.
    pub const STANDARD: ScanKeys = ScanKeys {
        step_size: "STEP_SIZE",
        range: "RANGE",
        duration: "DURATION_ACQUISITION",
        data_log: "DATA_LOG_FILENAME",
        erase: "ERASE_CSV_CONTENT",
    };
}

impl Default for ScanKeys {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Collaborators and paths used by one device's composite operations.
pub struct AlignmentContext {
    configuration: Box<dyn Configuration>,
    sensors: Box<dyn Sensors>,
    post_processing: Box<dyn PostProcessing>,
    layout: DeviceLayout,
}

impl AlignmentContext {
    /// Context for `device`. The layout is derived from the sensors' project
    /// directory and the configuration's log directory.
    pub fn new(
        device: DeviceKind,
        configuration: Box<dyn Configuration>,
        sensors: Box<dyn Sensors>,
        post_processing: Box<dyn PostProcessing>,
    ) -> Self {
        let layout = DeviceLayout::new(
            sensors.project_directory(),
            &configuration.log_files_directory(),
            device,
        );
        Self {
            configuration,
            sensors,
            post_processing,
            layout,
        }
    }

    /// Script and result directories.
    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    /// The configuration store.
    pub fn configuration(&self) -> &dyn Configuration {
        self.configuration.as_ref()
    }

    /// Number from the alignment settings file.
    pub fn setting(&self, section: &str, key: &str) -> AppResult<f64> {
        self.configuration
            .read_float(ConfigFile::AlignmentSettings, section, key)
    }

    /// Text from the alignment settings file.
    pub fn setting_text(&self, section: &str, key: &str) -> AppResult<String> {
        self.configuration
            .read_string(ConfigFile::AlignmentSettings, section, key)
    }

    /// Number from the main configuration file.
    pub fn stored(&self, section: &str, key: &str) -> AppResult<f64> {
        self.configuration.read_float(ConfigFile::Main, section, key)
    }

    /// Result file named by `section/key` in the alignment settings.
    pub fn result_file(&self, section: &str, key: &str) -> AppResult<PathBuf> {
        let name = self
            .configuration
            .read_path(ConfigFile::AlignmentSettings, section, key)?;
        Ok(self.layout.result(name))
    }

    /// Result file named by `section/key`, truncated so it holds no stale value.
    pub fn fresh_result_file(&mut self, section: &str, key: &str) -> AppResult<PathBuf> {
        let path = self.result_file(section, key)?;
        self.sensors.flush_csv(&path)?;
        Ok(path)
    }

    /// Truncates a result file.
    pub fn flush(&mut self, path: &Path) -> AppResult<()> {
        self.sensors.flush_csv(path)
    }

    /// Alignment script named by `section/key`.
    pub fn script(&self, section: &str, key: &str) -> AppResult<PathBuf> {
        let name = self
            .configuration
            .read_path(ConfigFile::AlignmentSettings, section, key)?;
        Ok(self.layout.script(name))
    }

    /// Measurement script named by `section/key`.
    pub fn measurement_script(&self, section: &str, key: &str) -> AppResult<PathBuf> {
        let name = self
            .configuration
            .read_path(ConfigFile::AlignmentSettings, section, key)?;
        Ok(self.layout.measurement_script(name))
    }

    /// Runs a post-processing script.
    pub fn run_script(&mut self, script: &Path, args: Vec<String>) -> AppResult<()> {
        self.post_processing.execute_script(script, &args)
    }

    /// Reads the value a script wrote.
    pub fn read_result(&self, path: &Path) -> AppResult<f64> {
        let value = self.sensors.read_csv_result(path)?;
        debug!(path = %path.display(), value, "alignment result");
        Ok(value)
    }

    /// Persists a computed value in the main configuration file.
    pub fn persist(&mut self, section: &str, key: &str, value: f64) -> AppResult<()> {
        let file = self.configuration.filename(ConfigFile::Main);
        let status = self
            .configuration
            .write(&value.to_string(), section, key, &file);
        if status == 0 {
            return Err(DeviceError::Persistence {
                section: section.to_string(),
                key: key.to_string(),
            });
        }
        info!(section, key, value, "persisted alignment result");
        Ok(())
    }

    /// Scan parameters from an alignment settings section.
    pub fn scan_parameters(&self, section: &str, keys: ScanKeys) -> AppResult<ScanParameters> {
        Ok(ScanParameters {
            step_size: self.setting(section, keys.step_size)?,
            range: self.setting(section, keys.range)?,
            duration_acquisition: self.setting(section, keys.duration)?,
            data_log_filename: PathBuf::from(self.setting_text(section, keys.data_log)?),
            erase_csv_content: self.configuration.read_bool(
                ConfigFile::AlignmentSettings,
                section,
                keys.erase,
            )?,
        })
    }
}

/// Formats a number for a script argument.
pub fn arg(value: f64) -> String {
    value.to_string()
}

/// Formats a path for a script argument.
pub fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockConfiguration, MockPostProcessing, MockSensors};

    fn context(config: &MockConfiguration) -> AlignmentContext {
        AlignmentContext::new(
            DeviceKind::XRaySource,
            Box::new(config.clone()),
            Box::new(MockSensors::new("/opt/beamline")),
            Box::new(MockPostProcessing::new()),
        )
    }

    #[test]
    fn test_result_file_lives_in_results_dir() {
        let config = MockConfiguration::new();
        config.set(ConfigFile::AlignmentSettings, "S", "FILE", "r.csv");
        let ctx = context(&config);
        assert_eq!(
            ctx.result_file("S", "FILE").unwrap(),
            PathBuf::from("/opt/beamline/LogFiles/XRaySourceAlignmentResults/r.csv")
        );
    }

    #[test]
    fn test_persist_failure_is_persistence_error() {
        let config = MockConfiguration::new();
        config.set_write_status(0);
        let mut ctx = context(&config);
        assert!(matches!(
            ctx.persist("X-RAY_SOURCE", "ALIGNMENT_POSITION", 1.0),
            Err(DeviceError::Persistence { .. })
        ));
    }

    #[test]
    fn test_scan_parameters_with_custom_keys() {
        let config = MockConfiguration::new();
        for (key, value) in [
            ("STEP_SIZE_Y", "0.01"),
            ("RANGE_Y", "0.5"),
            ("DURATION_ACQUISITION", "2"),
            ("DATA_LOG_FILENAME_Y_SCAN", "y.csv"),
            ("ERASE_CSV_CONTENT", "true"),
        ] {
            config.set(ConfigFile::AlignmentSettings, "Y", key, value);
        }
        let ctx = context(&config);
        let params = ctx
            .scan_parameters(
                "Y",
                ScanKeys {
                    step_size: "STEP_SIZE_Y",
                    range: "RANGE_Y",
                    data_log: "DATA_LOG_FILENAME_Y_SCAN",
                    ..ScanKeys::STANDARD
                },
            )
            .unwrap();
        assert_eq!(params.step_size, 0.01);
        assert_eq!(params.range, 0.5);
        assert_eq!(params.data_log_filename, PathBuf::from("y.csv"));
        assert!(params.erase_csv_content);
    }
}

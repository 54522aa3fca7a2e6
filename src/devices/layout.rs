//! Where each device finds its scripts and writes its results.
//!
//! ```text
//! <project>/scripts/<Device>/<script>
//! <project>/scripts/<Device>/Measurements/<script>
//! <log dir>/<Device>AlignmentResults/<result file>
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// The six instruments on the beam line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceKind {
    /// Crystal alignment stage (hexapod and rotational stepper).
    Crystal,
    /// Monochromator (linear and rotational stepper).
    Monochromator,
    /// Slit (linear and rotational stepper).
    Slit,
    /// Autocollimator stage.
    Autocollimator,
    /// X-ray sensor stage.
    XRaySensor,
    /// X-ray source stage.
    XRaySource,
}

impl DeviceKind {
    /// All devices.
    pub const ALL: [DeviceKind; 6] = [
        Self::Crystal,
        Self::Monochromator,
        Self::Slit,
        Self::Autocollimator,
        Self::XRaySensor,
        Self::XRaySource,
    ];

    /// Name used for directories.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Crystal => "Crystal",
            Self::Monochromator => "Monochromator",
            Self::Slit => "Slit",
            Self::Autocollimator => "Autocollimator",
            Self::XRaySensor => "XRaySensor",
            Self::XRaySource => "XRaySource",
        }
    }

    /// Name used for log targets and files (`crystal`, `xraySource`, ..).
    pub fn log_name(self) -> &'static str {
        match self {
            Self::Crystal => "crystal",
            Self::Monochromator => "monochromator",
            Self::Slit => "slit",
            Self::Autocollimator => "autocollimator",
            Self::XRaySensor => "xraySensor",
            Self::XRaySource => "xraySource",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Script and result directories of one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceLayout {
    scripts_dir: PathBuf,
    results_dir: PathBuf,
}

impl DeviceLayout {
    /// Layout for `device` in an installation rooted at `project_dir`.
    pub fn new(project_dir: &Path, log_dir: &Path, device: DeviceKind) -> Self {
        Self {
            scripts_dir: project_dir.join("scripts").join(device.dir_name()),
            results_dir: log_dir.join(format!("{}AlignmentResults", device.dir_name())),
        }
    }

    /// Directory holding the device's alignment scripts.
    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Directory the device's result files are written to.
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Path of an alignment script.
    pub fn script(&self, name: impl AsRef<Path>) -> PathBuf {
        self.scripts_dir.join(name)
    }

    /// Path of a measurement script.
    pub fn measurement_script(&self, name: impl AsRef<Path>) -> PathBuf {
        self.scripts_dir.join("Measurements").join(name)
    }

    /// Path of a result file.
    pub fn result(&self, name: impl AsRef<Path>) -> PathBuf {
        self.results_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = DeviceLayout::new(
            Path::new("/opt/beamline"),
            Path::new("/var/log/beamline"),
            DeviceKind::Crystal,
        );
        assert_eq!(
            layout.script("x.py"),
            PathBuf::from("/opt/beamline/scripts/Crystal/x.py")
        );
        assert_eq!(
            layout.measurement_script("bend.py"),
            PathBuf::from("/opt/beamline/scripts/Crystal/Measurements/bend.py")
        );
        assert_eq!(
            layout.result("x.csv"),
            PathBuf::from("/var/log/beamline/CrystalAlignmentResults/x.csv")
        );
    }
}

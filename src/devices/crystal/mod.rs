//! Crystal stage: a six-axis hexapod carrying the crystal on a rotational
//! stepper.
//!
//! The crystal is aligned in stages. Coarse X, Y, Z and Y/W searches locate
//! the crystal in the beam, the Bragg peak search finds the diffraction angle
//! and the fine Y alignment centers Y between the crystal edges. The flip
//! check repeats the fine Y alignment with the crystal rotated by 180° and
//! compensates until both orientations agree. Bending, miscut and torsion
//! measurements run on an aligned crystal.
//!
//! Results are persisted in the main configuration file under
//! `CRYSTAL_HXP/ALIGNMENT_POSITION_HXP_{X,Y,Z,W}` and
//! `CRYSTAL_MEASUREMENTS/{BENDING,MISCUT,TORSION}_ANGLE`.

pub mod actions;
pub mod compensation;
pub mod controller;
pub mod hexapod;

use std::fmt;

use crate::hardware::capabilities::HexapodAxis;

pub use actions::CrystalActions;
pub use controller::CrystalController;
pub use hexapod::HexapodStage;

/// Configuration sections read by the crystal procedures.
pub mod sections {
    use crate::hardware::capabilities::HexapodAxis;

    /// Coarse X alignment.
    pub const X_AXIS: &str = "xAxis_Alignment_CRYSTAL_STAGE";
    /// Coarse Y alignment.
    pub const Y_AXIS: &str = "yAxis_Alignment_CRYSTAL_STAGE";
    /// Coarse Z alignment.
    pub const Z_AXIS: &str = "zAxis_Alignment_CRYSTAL_STAGE";
    /// Y/W alignment.
    pub const YW_AXES: &str = "yWAxis_Alignment_CRYSTAL_STAGE";
    /// Bragg peak search.
    pub const BRAGG: &str = "Braggs_Peak_Search_CRYSTAL_STAGE";
    /// Fine Y alignment.
    pub const Y_FINE: &str = "yAxis_Fine_Alignment_CRYSTAL_STAGE";
    /// Flipped orientation check.
    pub const FLIPPED: &str = "checkAlignmentInFlippedOrientation_CRYSTAL_STAGE";
    /// Bending angle measurement.
    pub const BENDING: &str = "Bending_Angle_CRYSTAL_STAGE";
    /// Miscut angle measurement.
    pub const MISCUT: &str = "Miscut_Angle_CRYSTAL_STAGE";
    /// Torsion angle measurement.
    pub const TORSION: &str = "Torsion_Angle_CRYSTAL_STAGE";
    /// Stored hexapod alignment (main configuration file).
    pub const STORED: &str = "CRYSTAL_HXP";
    /// Stored measurement results (main configuration file).
    pub const MEASUREMENTS: &str = "CRYSTAL_MEASUREMENTS";

    /// `ALIGNMENT_POSITION_HXP_<axis>`.
    pub fn alignment_key(axis: HexapodAxis) -> String {
        format!("ALIGNMENT_POSITION_HXP_{}", axis.letter())
    }

    /// `START_POSITION_HXP_<axis>`.
    pub fn start_key(axis: HexapodAxis) -> String {
        format!("START_POSITION_HXP_{}", axis.letter())
    }
}

/// Movable axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrystalAxis {
    /// Full hexapod target tuple.
    Hexapod,
    /// Rotational stepper.
    Stepper,
    /// Hexapod and stepper; each move must succeed.
    Both,
}

/// Scan channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrystalChannel {
    /// Hexapod scanner, on the configured axis.
    Hexapod,
    /// Stepper scanner.
    Stepper,
}

/// Composite alignment and measurement operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrystalOperation {
    /// Coarse X alignment.
    XAxisAlignment,
    /// Coarse Y alignment (W sweep with X re-centering).
    YAxisAlignment,
    /// Coarse Z alignment.
    ZAxisAlignment,
    /// Y sweep of W scans.
    YWAxesAlignment,
    /// X alignment from the stored alignment coordinate.
    XAxisFineAlignment,
    /// W scan for the Bragg peak.
    BraggPeakSearch,
    /// Edge-to-edge Y centering.
    YAxisFineAlignment,
    /// Fine Y alignment in the flipped orientation, with compensation.
    CheckFlippedOrientation,
    /// Bending angle.
    BendingAngleMeasurement,
    /// Miscut angle.
    MiscutAngleMeasurement,
    /// Torsion angle.
    TorsionAngleMeasurement,
}

/// Crystal measurements that end in a persisted angle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measurement {
    /// Bending angle, swept along Y.
    Bending,
    /// Miscut angle, swept along Y, reusing the bending peaks.
    Miscut,
    /// Torsion angle, swept along Z.
    Torsion,
}

impl Measurement {
    /// Alignment settings section.
    pub fn section(self) -> &'static str {
        match self {
            Self::Bending => sections::BENDING,
            Self::Miscut => sections::MISCUT,
            Self::Torsion => sections::TORSION,
        }
    }

    /// Key of the result file name.
    pub fn result_key(self) -> &'static str {
        match self {
            Self::Bending => "FILENAME_TO_BENDING_ANGLE",
            Self::Miscut => "FILENAME_TO_MISCUT_ANGLE",
            Self::Torsion => "FILENAME_TO_TORSION_ANGLE",
        }
    }

    /// Key the angle is stored under.
    pub fn stored_key(self) -> &'static str {
        match self {
            Self::Bending => "BENDING_ANGLE",
            Self::Miscut => "MISCUT_ANGLE",
            Self::Torsion => "TORSION_ANGLE",
        }
    }

    /// Hexapod axis swept between W scans.
    pub fn sweep_axis(self) -> HexapodAxis {
        match self {
            Self::Bending | Self::Miscut => HexapodAxis::Y,
            Self::Torsion => HexapodAxis::Z,
        }
    }

    /// `(range, step)` keys of the sweep.
    pub fn sweep_keys(self) -> (&'static str, &'static str) {
        match self {
            Self::Bending | Self::Miscut => ("RANGE_SCAN_HXP_Y", "STEP_SIZE_SCAN_HXP_Y"),
            Self::Torsion => ("RANGE_SCAN_HXP_Z", "STEP_SIZE_SCAN_HXP_Z"),
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bending => "bending",
            Self::Miscut => "miscut",
            Self::Torsion => "torsion",
        })
    }
}

//! Inclusive offset sweeps.
//!
//! Alignment procedures step an axis across `[start, end]` in fixed
//! increments. Both ends are visited: a range of 1.0 with a step of 0.25
//! yields five points. The point count is computed once as an integer so
//! floating point accumulation never adds or drops the last point.

use crate::error::{AppResult, DeviceError};

const EPSILON: f64 = 1e-9;

/// Largest number of points a configured sweep may have.
pub const MAX_POINTS: usize = 100_000;

/// Inclusive arithmetic sequence `start, start + step, .., end`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sweep {
    start: f64,
    step: f64,
    count: usize,
}

impl Sweep {
    /// Sweep from `start` to `end` inclusive.
    ///
    /// `step` must be strictly positive and the sweep may not exceed
    /// [`MAX_POINTS`] points. An `end` below `start` gives an empty sweep.
    pub fn new(start: f64, end: f64, step: f64) -> AppResult<Self> {
        if !step.is_finite() || step <= 0.0 {
            return Err(DeviceError::Configuration(format!(
                "sweep step must be positive, got {step}"
            )));
        }
        if !start.is_finite() || !end.is_finite() {
            return Err(DeviceError::Configuration(format!(
                "sweep bounds must be finite, got [{start}, {end}]"
            )));
        }
        if end < start {
            return Ok(Self {
                start,
                step,
                count: 0,
            });
        }
        let intervals = ((end - start) / step + EPSILON).floor();
        if !intervals.is_finite() || intervals >= MAX_POINTS as f64 {
            return Err(DeviceError::Configuration(format!(
                "sweep over [{start}, {end}] with step {step} exceeds {MAX_POINTS} points"
            )));
        }
        Ok(Self {
            start,
            step,
            count: intervals as usize + 1,
        })
    }

    /// Sweep over `[0, range]`.
    pub fn over(range: f64, step: f64) -> AppResult<Self> {
        Self::new(0.0, range, step)
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no point is visited.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Point `index`, counted from the start.
    pub fn point(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }

    /// Iterates the points in order.
    pub fn iter(&self) -> SweepIter {
        SweepIter {
            sweep: *self,
            next: 0,
        }
    }
}

impl IntoIterator for Sweep {
    type Item = f64;
    type IntoIter = SweepIter;

    fn into_iter(self) -> SweepIter {
        self.iter()
    }
}

/// Iterator over a [`Sweep`].
#[derive(Clone, Debug)]
pub struct SweepIter {
    sweep: Sweep,
    next: usize,
}

impl Iterator for SweepIter {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.next >= self.sweep.count {
            return None;
        }
        let value = self.sweep.point(self.next);
        self.next += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sweep.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SweepIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inclusive_end() {
        let points: Vec<f64> = Sweep::over(1.0, 0.25).unwrap().into_iter().collect();
        assert_eq!(points, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_step_that_does_not_divide_range() {
        let sweep = Sweep::over(1.0, 0.3).unwrap();
        assert_eq!(sweep.len(), 4);
        assert!((sweep.point(3) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_float_noise_keeps_last_point() {
        // 0.1 * 3 is 0.30000000000000004 in binary floating point.
        assert_eq!(Sweep::new(0.0, 0.3, 0.1).unwrap().len(), 4);
    }

    #[test]
    fn test_negative_start() {
        let points: Vec<f64> = Sweep::new(-0.5, 0.5, 0.5).unwrap().iter().collect();
        assert_eq!(points, vec![-0.5, 0.0, 0.5]);
    }

    #[test]
    fn test_zero_range_visits_start_once() {
        assert_eq!(Sweep::over(0.0, 0.1).unwrap().len(), 1);
    }

    #[test]
    fn test_reversed_bounds_are_empty() {
        assert!(Sweep::new(1.0, 0.0, 0.1).unwrap().is_empty());
    }

    #[test]
    fn test_non_positive_step_is_rejected() {
        assert!(matches!(Sweep::over(1.0, 0.0), Err(DeviceError::Configuration(_))));
        assert!(Sweep::over(1.0, -0.1).is_err());
        assert!(Sweep::over(1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_tiny_step_is_rejected() {
        assert!(matches!(
            Sweep::over(1.0, 1e-300),
            Err(DeviceError::Configuration(_))
        ));
    }

    #[test]
    fn test_huge_range_is_rejected() {
        assert!(matches!(
            Sweep::new(-f64::MAX, f64::MAX, 1.0),
            Err(DeviceError::Configuration(_))
        ));
        assert!(Sweep::over(1e12, 0.5).is_err());
    }

    #[test]
    fn test_largest_allowed_sweep() {
        let limit = (MAX_POINTS - 1) as f64;
        assert_eq!(Sweep::over(limit, 1.0).unwrap().len(), MAX_POINTS);
        assert!(Sweep::over(limit + 1.0, 1.0).is_err());
    }
}

//! [`AnomalyMonitor`] – inertial instability classifier.
//!
//! Four predicates are evaluated against fixed thresholds:
//!
//! ```text
//! tilted_x    = |ax| > ax_max
//! tilted_y    = |ay| > ay_max
//! not_upright = |az| < az_min
//! rotating    = |gx| > gyro_max  ∨  |gy| > gyro_max  ∨  |gz| > gyro_max
//!
//! unstable    = (tilted_x ∨ tilted_y ∨ not_upright) ∧ rotating
//! ```
//!
//! Instability needs *both* an orientation anomaly and active rotation: a
//! bump rotates without tilting, and a parked car on a slope tilts without
//! rotating.
//!
//! The monitor has no side effects.  Recording an alert for a positive
//! verdict is the caller's job.
//!
//! # Example
//!
//! ```
//! use carbrain_kernel::anomaly::AnomalyMonitor;
//! use carbrain_types::InertialSample;
//!
//! let monitor = AnomalyMonitor::default();
//!
//! let level = InertialSample::new(0.0, 0.0, 9.8, 0.0, 0.0, 0.0);
//! assert!(!monitor.check(&level).is_unstable());
//!
//! let tipping = InertialSample::new(8.0, 0.0, 9.8, 6.0, 0.0, 0.0);
//! assert!(monitor.check(&tipping).is_unstable());
//! ```

use std::sync::{PoisonError, RwLock};

use carbrain_types::{AlertDetails, InertialSample};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Thresholds
// ────────────────────────────────────────────────────────────────────────────

/// Classification thresholds, in the sensor's native units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyThresholds {
    /// Maximum absolute X acceleration before the car counts as tilted.
    pub ax_max: f64,
    /// Maximum absolute Y acceleration before the car counts as tilted.
    pub ay_max: f64,
    /// Minimum absolute Z acceleration for the car to count as upright.
    pub az_min: f64,
    /// Maximum absolute angular rate on any axis before the car counts as
    /// rotating.
    pub gyro_max: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            ax_max: 7.0,
            ay_max: 7.0,
            az_min: 5.0,
            gyro_max: 5.0,
        }
    }
}

impl AnomalyThresholds {
    /// Evaluate the four predicates for `sample`.
    pub fn classify(&self, sample: &InertialSample) -> AnomalyVerdict {
        AnomalyVerdict {
            is_tilted_x: sample.ax.abs() > self.ax_max,
            is_tilted_y: sample.ay.abs() > self.ay_max,
            is_not_upright: sample.az.abs() < self.az_min,
            is_rotating: sample.gx.abs() > self.gyro_max
                || sample.gy.abs() > self.gyro_max
                || sample.gz.abs() > self.gyro_max,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Verdict
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnomalyVerdict {
    pub is_tilted_x: bool,
    pub is_tilted_y: bool,
    pub is_not_upright: bool,
    pub is_rotating: bool,
}

impl AnomalyVerdict {
    pub fn is_orientation_anomaly(&self) -> bool {
        self.is_tilted_x || self.is_tilted_y || self.is_not_upright
    }

    pub fn is_unstable(&self) -> bool {
        self.is_orientation_anomaly() && self.is_rotating
    }

    /// Human-readable alert message naming the predicates that fired.
    pub fn describe(&self) -> String {
        let reasons: Vec<&str> = [
            (self.is_tilted_x, "tilted on X"),
            (self.is_tilted_y, "tilted on Y"),
            (self.is_not_upright, "not upright"),
            (self.is_rotating, "rotating"),
        ]
        .into_iter()
        .filter_map(|(fired, label)| fired.then_some(label))
        .collect();
        if reasons.is_empty() {
            "stable".to_string()
        } else {
            format!("Instability detected: {}", reasons.join(", "))
        }
    }

    /// Combine the verdict with the raw readings for an alert record.
    pub fn details(&self, sample: &InertialSample) -> AlertDetails {
        AlertDetails {
            ax: sample.ax,
            ay: sample.ay,
            az: sample.az,
            gx: sample.gx,
            gy: sample.gy,
            gz: sample.gz,
            is_tilted_x: self.is_tilted_x,
            is_tilted_y: self.is_tilted_y,
            is_not_upright: self.is_not_upright,
            is_rotating: self.is_rotating,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AnomalyMonitor
// ────────────────────────────────────────────────────────────────────────────

/// Stateless classifier with a live, replaceable threshold set.
///
/// Threshold replacement is "latest write wins"; each call to
/// [`check`][Self::check] reads one consistent copy.
#[derive(Debug, Default)]
pub struct AnomalyMonitor {
    thresholds: RwLock<AnomalyThresholds>,
}

impl AnomalyMonitor {
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        Self {
            thresholds: RwLock::new(thresholds),
        }
    }

    /// Current thresholds.
    pub fn thresholds(&self) -> AnomalyThresholds {
        *self.thresholds.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the thresholds used by subsequent checks.
    pub fn set_thresholds(&self, thresholds: AnomalyThresholds) {
        *self.thresholds.write().unwrap_or_else(PoisonError::into_inner) = thresholds;
    }

    /// Restore the default thresholds.
    pub fn reset_thresholds(&self) {
        self.set_thresholds(AnomalyThresholds::default());
    }

    /// Classify `sample` against the current thresholds.
    pub fn check(&self, sample: &InertialSample) -> AnomalyVerdict {
        self.thresholds().classify(sample)
    }
}

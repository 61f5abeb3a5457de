//! Sensor snapshot types.

use serde::{Deserialize, Serialize};

use crate::CarError;

/// Instantaneous accelerometer + gyroscope reading (MPU6050 native units:
/// m/s² for acceleration, rad/s for angular rate).
/// Missing axes deserialise as `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InertialSample {
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
}

impl InertialSample {
    pub const fn new(ax: f64, ay: f64, az: f64, gx: f64, gy: f64, gz: f64) -> Self {
        Self { ax, ay, az, gx, gy, gz }
    }

    fn is_finite(&self) -> bool {
        [self.ax, self.ay, self.az, self.gx, self.gy, self.gz]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// A camera frame attached to a snapshot.
///
/// The raw `payload` is owned by the snapshot and never serialised into the
/// logs; only its metadata is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub available: bool,
    pub width: u32,
    pub height: u32,
    /// Pixel format reported by the camera, e.g. `"GRAY8"`, `"JPEG"`.
    pub format: String,
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
}

impl ImageRef {
    /// `true` when the frame is flagged available and carries bytes.
    pub fn has_payload(&self) -> bool {
        self.available && self.payload.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// One immutable bundle of sensor readings for a single decision cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub session_id: u64,
    pub step: u64,
    /// Device-side timestamp, passed through verbatim.
    pub timestamp: String,
    /// Ultrasonic distance to the nearest obstacle (cm).
    pub distance_cm: f64,
    pub light_raw: i32,
    pub light_dark: bool,
    pub inertial: Option<InertialSample>,
    pub image: Option<ImageRef>,
}

impl SensorSnapshot {
    /// Whether an image accompanies this snapshot (regardless of payload).
    pub fn image_available(&self) -> bool {
        self.image.as_ref().is_some_and(|img| img.available)
    }

    /// Reject snapshots whose mandatory readings are not usable numbers.
    ///
    /// Called by transports before a snapshot reaches the decision engine.
    pub fn validate(&self) -> Result<(), CarError> {
        if !self.distance_cm.is_finite() || self.distance_cm < 0.0 {
            return Err(CarError::InvalidSnapshot(format!(
                "distance_cm must be a non-negative number, got {}",
                self.distance_cm
            )));
        }
        if let Some(imu) = &self.inertial
            && !imu.is_finite()
        {
            return Err(CarError::InvalidSnapshot(
                "inertial sample contains a non-finite value".to_string(),
            ));
        }
        Ok(())
    }
}

//! Car-data request decoding.
//!
//! The vehicle posts one JSON document per decision cycle:
//!
//! ```json
//! {
//!   "session_id": 1, "step": 12, "timestamp": "2025-01-01T12:00:00",
//!   "sensors": {
//!     "distance_cm": 42.5, "light_raw": 310, "light_dark": false,
//!     "mpu6050": {"ax": 0.1, "ay": 0.0, "az": 9.8, "gx": 0.0, "gy": 0.0, "gz": 0.0}
//!   },
//!   "image": {"available": true, "width": 160, "height": 120,
//!             "format": "GRAY8", "data_base64": "..."}
//! }
//! ```
//!
//! Missing fields take the vehicle firmware's defaults (distance 400 cm,
//! light 500, format `GRAY8`).  A decoded request is validated before it is
//! handed to the engine.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use carbrain_types::{CarError, ImageRef, InertialSample, SensorSnapshot};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CarDataRequest {
    #[serde(default = "default_one")]
    pub session_id: u64,
    #[serde(default = "default_one")]
    pub step: u64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub sensors: SensorData,
    #[serde(default)]
    pub image: Option<ImageData>,
}

#[derive(Debug, Deserialize)]
pub struct SensorData {
    #[serde(default = "default_distance_cm")]
    pub distance_cm: f64,
    #[serde(default = "default_light_raw")]
    pub light_raw: i32,
    #[serde(default)]
    pub light_dark: bool,
    #[serde(default)]
    pub mpu6050: Option<InertialSample>,
}

impl Default for SensorData {
    fn default() -> Self {
        Self {
            distance_cm: default_distance_cm(),
            light_raw: default_light_raw(),
            light_dark: false,
            mpu6050: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub data_base64: Option<String>,
}

fn default_one() -> u64 {
    1
}
fn default_distance_cm() -> f64 {
    400.0
}
fn default_light_raw() -> i32 {
    500
}
fn default_format() -> String {
    "GRAY8".to_string()
}

impl CarDataRequest {
    /// Convert into a validated [`SensorSnapshot`], decoding the image
    /// payload.
    pub fn into_snapshot(self) -> Result<SensorSnapshot, CarError> {
        let image = self.image.map(ImageData::into_image_ref).transpose()?;
        let snapshot = SensorSnapshot {
            session_id: self.session_id,
            step: self.step,
            timestamp: self.timestamp,
            distance_cm: self.sensors.distance_cm,
            light_raw: self.sensors.light_raw,
            light_dark: self.sensors.light_dark,
            inertial: self.sensors.mpu6050,
            image,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

impl ImageData {
    fn into_image_ref(self) -> Result<ImageRef, CarError> {
        let payload = self
            .data_base64
            .filter(|d| !d.trim().is_empty())
            .map(|d| STANDARD.decode(d.trim()))
            .transpose()
            .map_err(|e| CarError::InvalidSnapshot(format!("image data_base64: {e}")))?;
        Ok(ImageRef {
            available: self.available,
            width: self.width,
            height: self.height,
            format: self.format,
            payload,
        })
    }
}

/// Decode one JSON car-data request into a snapshot.
pub fn parse_snapshot(json: &str) -> Result<SensorSnapshot, CarError> {
    let request: CarDataRequest =
        serde_json::from_str(json).map_err(|e| CarError::Serialization(e.to_string()))?;
    request.into_snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_takes_firmware_defaults() {
        let s = parse_snapshot("{}").unwrap();
        assert_eq!(s.session_id, 1);
        assert_eq!(s.step, 1);
        assert_eq!(s.distance_cm, 400.0);
        assert_eq!(s.light_raw, 500);
        assert!(!s.light_dark);
        assert!(s.inertial.is_none());
        assert!(s.image.is_none());
    }

    #[test]
    fn full_request_decodes() {
        let json = r#"{
            "session_id": 3, "step": 12, "timestamp": "t",
            "sensors": {"distance_cm": 35.0, "light_raw": 90, "light_dark": true,
                        "mpu6050": {"ax": 8.0, "ay": 0.0, "az": 9.8, "gx": 6.0, "gy": 0.0, "gz": 0.0}},
            "image": {"available": true, "width": 2, "height": 1, "data_base64": "AP8="}
        }"#;
        let s = parse_snapshot(json).unwrap();
        assert_eq!(s.step, 12);
        assert!(s.light_dark);
        assert_eq!(s.inertial.unwrap().gx, 6.0);
        let image = s.image.unwrap();
        assert_eq!(image.format, "GRAY8");
        assert_eq!(image.payload, Some(vec![0x00, 0xFF]));
        assert!(image.has_payload());
    }

    #[test]
    fn bad_base64_is_rejected() {
        let json = r#"{"image": {"available": true, "data_base64": "***"}}"#;
        assert!(matches!(
            parse_snapshot(json),
            Err(CarError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn negative_distance_is_rejected() {
        let json = r#"{"sensors": {"distance_cm": -1.0}}"#;
        assert!(matches!(
            parse_snapshot(json),
            Err(CarError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert!(matches!(
            parse_snapshot("{\"step\": -4}"),
            Err(CarError::Serialization(_))
        ));
        assert!(matches!(
            parse_snapshot("not json"),
            Err(CarError::Serialization(_))
        ));
    }
}

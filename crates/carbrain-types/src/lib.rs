//! `carbrain-types` – the shared data contract of the car brain.
//!
//! Every other crate speaks in these types:
//!
//! - [`command`] – the closed movement vocabulary ([`CommandKind`]) and the
//!   timed [`Command`] that is sent back to the vehicle.
//! - [`sensor`] – one immutable [`SensorSnapshot`] per decision cycle, with
//!   optional [`InertialSample`] and [`ImageRef`] attachments.
//! - [`records`] – the append-only log entries kept by the bounded history
//!   stores (commands, sensor metrics, LLM exchanges, anomaly alerts).

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod command;
pub mod records;
pub mod sensor;

pub use command::{Command, CommandKind, DEFAULT_DURATION_MS, UnknownCommand};
pub use records::{
    AlertDetails, AlertEntry, CommandLogEntry, EngineMode, LlmExchangeEntry, MetricsLogEntry,
    TokenCounts,
};
pub use sensor::{ImageRef, InertialSample, SensorSnapshot};

/// Global error type spanning configuration, provider, storage and input
/// validation failures.
///
/// The decision core itself never surfaces these to its caller; they appear
/// at the edges (configuration loading, snapshot decoding, image storage).
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum CarError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("LLM Provider Error: {0}")]
    Provider(String),

    #[error("Image Store Error: {0}")]
    ImageStore(String),

    #[error("Invalid Snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn car_error_display() {
        let err = CarError::InvalidSnapshot("distance_cm is NaN".to_string());
        assert!(err.to_string().contains("Invalid Snapshot"));
        assert!(err.to_string().contains("NaN"));

        let err2 = CarError::Config("bad toml".to_string());
        assert!(err2.to_string().starts_with("Configuration Error"));
    }

    #[test]
    fn car_error_serializes() {
        let err = CarError::Provider("timeout".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Provider"));
        assert!(json.contains("timeout"));
    }
}

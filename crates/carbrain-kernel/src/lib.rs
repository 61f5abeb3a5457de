//! `carbrain-kernel` – Safety rules
//!
//! The part of the car brain that does not think; it classifies and enforces.
//!
//! # Modules
//!
//! - [`anomaly`] – [`AnomalyMonitor`][anomaly::AnomalyMonitor]: classifies an
//!   inertial sample as stable or unstable (fall / tip-over) against a set of
//!   live, replaceable thresholds.
//! - [`vocabulary_guard`] – [`sanitize`][vocabulary_guard::sanitize]: turns an
//!   untrusted command/duration pair into a [`Command`][carbrain_types::Command]
//!   that is guaranteed to be inside the vocabulary with a positive duration.

pub mod anomaly;
pub mod vocabulary_guard;

pub use anomaly::{AnomalyMonitor, AnomalyThresholds, AnomalyVerdict};
pub use vocabulary_guard::{GuardedCommand, sanitize};

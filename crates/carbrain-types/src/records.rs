//! Log records kept by the bounded history stores.
//!
//! Each record is created exactly once, at decision time, and never mutated
//! afterwards.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Command, CommandKind, InertialSample, SensorSnapshot};

/// Which policy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineMode {
    /// No provider configured; the heuristic policy decides.
    Demo,
    /// A language-model provider is configured.
    Llm,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Demo => f.write_str("DEMO"),
            EngineMode::Llm => f.write_str("LLM"),
        }
    }
}

/// One issued command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub step: u64,
    pub command: CommandKind,
    pub duration_ms: u32,
    pub recorded_at: DateTime<Utc>,
}

impl CommandLogEntry {
    pub fn new(step: u64, command: Command) -> Self {
        Self {
            step,
            command: command.kind,
            duration_ms: command.duration_ms,
            recorded_at: Utc::now(),
        }
    }
}

/// One received sensor snapshot, minus the image bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsLogEntry {
    pub session_id: u64,
    pub step: u64,
    pub snapshot_timestamp: String,
    pub received_at: DateTime<Utc>,
    pub distance_cm: f64,
    pub light_raw: i32,
    pub light_dark: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inertial: Option<InertialSample>,
    pub image_available: bool,
}

impl MetricsLogEntry {
    pub fn from_snapshot(snapshot: &SensorSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id,
            step: snapshot.step,
            snapshot_timestamp: snapshot.timestamp.clone(),
            received_at: Utc::now(),
            distance_cm: snapshot.distance_cm,
            light_raw: snapshot.light_raw,
            light_dark: snapshot.light_dark,
            inertial: snapshot.inertial,
            image_available: snapshot.image_available(),
        }
    }
}

/// Token usage reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Full record of one policy consultation, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmExchangeEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: u64,
    pub step: u64,
    pub mode: EngineMode,
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub raw_response: Option<String>,
    /// Command after vocabulary enforcement.
    pub parsed_command: Option<CommandKind>,
    pub parsed_duration_ms: Option<u32>,
    /// `true` when the provider named a command outside the vocabulary and
    /// STOP was substituted.
    #[serde(default)]
    pub substituted: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub image_sent: bool,
    /// Data URL of the attached image; only kept when payload retention is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data_url: Option<String>,
    pub token_counts: Option<TokenCounts>,
}

impl LlmExchangeEntry {
    /// A blank exchange for `snapshot`, stamped now.  Callers fill in the
    /// fields that apply to the outcome.
    pub fn new(mode: EngineMode, snapshot: &SensorSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: snapshot.session_id,
            step: snapshot.step,
            mode,
            system_prompt: None,
            user_prompt: None,
            raw_response: None,
            parsed_command: None,
            parsed_duration_ms: None,
            substituted: false,
            latency_ms: None,
            error: None,
            image_sent: false,
            image_data_url: None,
            token_counts: None,
        }
    }
}

/// Raw readings and predicate outcomes behind an anomaly alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertDetails {
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    pub is_tilted_x: bool,
    pub is_tilted_y: bool,
    pub is_not_upright: bool,
    pub is_rotating: bool,
}

/// An instability (fall / tip-over) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: u64,
    pub step: u64,
    pub message: String,
    pub details: AlertDetails,
}

impl AlertEntry {
    pub fn new(snapshot: &SensorSnapshot, message: impl Into<String>, details: AlertDetails) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: snapshot.session_id,
            step: snapshot.step,
            message: message.into(),
            details,
        }
    }
}

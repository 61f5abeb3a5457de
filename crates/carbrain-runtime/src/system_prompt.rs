//! The live system instruction sent with every provider request.
//!
//! Operators may replace the instruction at runtime; the adapter reads it
//! fresh on every decision cycle.  Whatever the operator writes, the
//! [`RESPONSE_CONTRACT_HEADER`] section with the JSON Schema of the expected
//! reply is appended when the instruction is rendered, so the model is always
//! told what shape to answer in.

use std::sync::{PoisonError, RwLock};

use carbrain_types::CommandKind;
use schemars::{JsonSchema, schema_for};

/// Instruction used until an operator replaces it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are the controller of a small autonomous car.
Read the sensor data and choose the next movement.

Commands:
- FORWARD: drive forward
- BACKWARD: drive backward
- LEFT: turn left in place
- RIGHT: turn right in place
- STOP: stop

Answer with ONLY a JSON object, for example:
{\"command\": \"FORWARD\", \"duration_ms\": 3000}

Priorities, highest first:
1. Obstacle proximity: under 20 cm back away or stop, under 50 cm turn.
2. Darkness (Dark: YES): move in short steps.
3. Stability: if the inertial data shows a tilt or spin, STOP.

When unsure, STOP.";

/// Heading of the appended schema section.
pub const RESPONSE_CONTRACT_HEADER: &str = "## Response contract (JSON Schema)";

/// Shape the model is asked to answer in.  Only used for schema generation;
/// replies are parsed leniently by the adapter.
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DecisionReply {
    /// One of the five movement commands.
    command: CommandKind,
    /// How long to execute the command, in milliseconds.
    #[schemars(range(min = 1))]
    duration_ms: u32,
}

/// JSON Schema of the expected reply, serialised compactly.
pub fn response_contract() -> String {
    serde_json::to_string(&schema_for!(DecisionReply)).unwrap_or_default()
}

/// Process-wide, replaceable system instruction.  Latest write wins.
#[derive(Debug)]
pub struct SystemPrompt {
    current: RwLock<String>,
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl SystemPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(text.into()),
        }
    }

    /// The current instruction as the operator set it.
    pub fn get(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, text: impl Into<String>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = text.into();
    }

    pub fn reset(&self) {
        self.replace(DEFAULT_SYSTEM_PROMPT);
    }

    pub fn is_default(&self) -> bool {
        *self.current.read().unwrap_or_else(PoisonError::into_inner) == DEFAULT_SYSTEM_PROMPT
    }

    /// The instruction as sent to the provider: the current text followed by
    /// the response contract.
    pub fn render(&self) -> String {
        format!(
            "{}\n\n{}\n{}",
            self.get(),
            RESPONSE_CONTRACT_HEADER,
            response_contract()
        )
    }
}

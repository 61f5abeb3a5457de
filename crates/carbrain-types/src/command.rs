//! The movement vocabulary.
//!
//! [`CommandKind`] is a closed set: no producer of a [`Command`] may emit a
//! tag outside of it.  Untrusted text (for example a language-model reply) is
//! turned into a `CommandKind` through [`str::parse`], which fails with
//! [`UnknownCommand`] for anything outside the vocabulary.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Duration used whenever no explicit duration is available (ms).
pub const DEFAULT_DURATION_MS: u32 = 3000;

/// One of the five discrete movements the vehicle understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    Forward,
    Backward,
    /// Turn left in place.
    Left,
    /// Turn right in place.
    Right,
    Stop,
}

impl CommandKind {
    /// The full vocabulary in canonical order.
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Forward,
        CommandKind::Backward,
        CommandKind::Left,
        CommandKind::Right,
        CommandKind::Stop,
    ];

    /// Wire name of the command (`"FORWARD"`, `"STOP"`, ...).
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Forward => "FORWARD",
            CommandKind::Backward => "BACKWARD",
            CommandKind::Left => "LEFT",
            CommandKind::Right => "RIGHT",
            CommandKind::Stop => "STOP",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a command in the vocabulary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for CommandKind {
    type Err = UnknownCommand;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// A movement command together with how long to execute it.
///
/// Serialises as `{"command": "LEFT", "duration_ms": 1500}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "command")]
    pub kind: CommandKind,
    /// Always strictly positive.
    pub duration_ms: u32,
}

impl Command {
    pub const fn new(kind: CommandKind, duration_ms: u32) -> Self {
        Self { kind, duration_ms }
    }

    /// `STOP` for [`DEFAULT_DURATION_MS`]; the conservative answer to an
    /// unusable provider reply.
    pub const fn stop() -> Self {
        Self::new(CommandKind::Stop, DEFAULT_DURATION_MS)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}ms)", self.kind, self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_vocabulary_word() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.as_str().parse::<CommandKind>(), Ok(kind));
        }
    }

    #[test]
    fn parse_is_case_insensitive_and_trims() {
        assert_eq!(" left ".parse::<CommandKind>(), Ok(CommandKind::Left));
        assert_eq!("Backward".parse::<CommandKind>(), Ok(CommandKind::Backward));
    }

    #[test]
    fn unknown_word_is_rejected() {
        let err = "FLY".parse::<CommandKind>().unwrap_err();
        assert_eq!(err, UnknownCommand("FLY".to_string()));
        assert!("".parse::<CommandKind>().is_err());
        assert!("FORWARDS".parse::<CommandKind>().is_err());
    }

    #[test]
    fn command_serializes_with_wire_field_names() {
        let cmd = Command::new(CommandKind::Left, 1500);
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"command":"LEFT","duration_ms":1500}"#);
    }

    #[test]
    fn command_deserializes_from_wire_shape() {
        let cmd: Command = serde_json::from_str(r#"{"command":"STOP","duration_ms":3000}"#).unwrap();
        assert_eq!(cmd, Command::stop());
    }

    #[test]
    fn display_includes_duration() {
        assert_eq!(Command::new(CommandKind::Right, 1500).to_string(), "RIGHT (1500ms)");
    }
}

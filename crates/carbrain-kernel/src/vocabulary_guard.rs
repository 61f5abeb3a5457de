//! Vocabulary enforcement for untrusted command proposals.
//!
//! Whatever a policy proposes, the vehicle only ever receives a
//! [`CommandKind`] from the closed vocabulary and a strictly positive
//! duration.  Violations are corrected here, never reported as errors:
//!
//! | Proposal | Result |
//! |---|---|
//! | command missing | `STOP` |
//! | command outside the vocabulary | `STOP`, `substituted = true` |
//! | duration missing | [`DEFAULT_DURATION_MS`] |
//! | duration ≤ 0 or above `u32::MAX` | [`DEFAULT_DURATION_MS`], `duration_defaulted = true` |
//!
//! A substituted command keeps its (valid) duration.

use carbrain_types::{Command, CommandKind, DEFAULT_DURATION_MS};
use tracing::warn;

/// A proposal after enforcement, with flags describing what was corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardedCommand {
    pub command: Command,
    pub substituted: bool,
    pub duration_defaulted: bool,
}

/// Enforce the vocabulary and the duration invariant on a proposal.
pub fn sanitize(raw_command: Option<&str>, raw_duration: Option<i64>) -> GuardedCommand {
    let (kind, substituted) = match raw_command {
        None => (CommandKind::Stop, false),
        Some(text) => match text.parse::<CommandKind>() {
            Ok(kind) => (kind, false),
            Err(e) => {
                warn!(proposed = %text, error = %e, "out-of-vocabulary command; substituting STOP");
                (CommandKind::Stop, true)
            }
        },
    };

    let (duration_ms, duration_defaulted) = match raw_duration {
        None => (DEFAULT_DURATION_MS, false),
        Some(ms) => match u32::try_from(ms) {
            Ok(ms) if ms > 0 => (ms, false),
            _ => {
                warn!(proposed = ms, "duration out of range; using default");
                (DEFAULT_DURATION_MS, true)
            }
        },
    };

    GuardedCommand {
        command: Command::new(kind, duration_ms),
        substituted,
        duration_defaulted,
    }
}

//! Rule-based fallback controller.
//!
//! Rules are evaluated in order; the first match wins.
//!
//! | Condition | Command |
//! |---|---|
//! | `distance_cm < 20` | `BACKWARD` 1000 ms |
//! | `distance_cm < 50` | `LEFT` on even steps, `RIGHT` on odd steps, 1500 ms |
//! | `light_dark` | `FORWARD` 1000 ms |
//! | otherwise | `FORWARD` [`DEFAULT_DURATION_MS`] |
//!
//! Alternating the turn direction by step parity keeps the car from turning
//! into the same obstacle cycle after cycle.

use carbrain_types::{Command, CommandKind, DEFAULT_DURATION_MS, SensorSnapshot};

/// Below this distance the car backs away.
pub const BACKOFF_DISTANCE_CM: f64 = 20.0;
/// Below this distance the car turns away.
pub const TURN_DISTANCE_CM: f64 = 50.0;

const BACKOFF_MS: u32 = 1000;
const TURN_MS: u32 = 1500;
const DARK_FORWARD_MS: u32 = 1000;

/// Decide a command for `snapshot`.  Total and pure.
pub fn decide(snapshot: &SensorSnapshot) -> Command {
    if snapshot.distance_cm < BACKOFF_DISTANCE_CM {
        Command::new(CommandKind::Backward, BACKOFF_MS)
    } else if snapshot.distance_cm < TURN_DISTANCE_CM {
        let kind = if snapshot.step % 2 == 0 {
            CommandKind::Left
        } else {
            CommandKind::Right
        };
        Command::new(kind, TURN_MS)
    } else if snapshot.light_dark {
        Command::new(CommandKind::Forward, DARK_FORWARD_MS)
    } else {
        Command::new(CommandKind::Forward, DEFAULT_DURATION_MS)
    }
}

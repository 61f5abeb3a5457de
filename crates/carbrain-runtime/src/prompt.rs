//! Prompt compiler: sensor snapshot + recent commands → decision request text.
//!
//! Pure formatting.  Identical inputs produce identical text, so the layout
//! below is pinned by golden tests.
//!
//! ```text
//! Step 12 | Session 3
//! Time: 2025-01-01T12:00:00
//!
//! === SENSOR DATA ===
//! Distance to obstacle: 42.5 cm
//! Light level: 310 (Dark: NO)
//!
//! === INERTIAL (accelerometer / gyroscope) ===      (only with a sample)
//! Acceleration: X=0.12, Y=-0.05, Z=9.81 m/s²
//! Angular rate: X=0.00, Y=0.01, Z=0.00 rad/s
//!
//! === CAMERA IMAGE (160x120, GRAY8) ===             (only when available)
//! Image is available for analysis
//!
//! === RECENT COMMANDS ===                           (only with history)
//! Step 10: FORWARD (3000ms)
//! Step 11: LEFT (1500ms)
//!
//! Based on this sensor data, what should the car do next?
//! Respond with a JSON command.
//! ```

use std::fmt::Write as _;

use carbrain_types::{CommandLogEntry, ImageRef, SensorSnapshot};

/// How many trailing command-log entries are echoed into the prompt.
pub const HISTORY_WINDOW: usize = 5;

/// Output of [`compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPrompt<'a> {
    pub text: String,
    /// The snapshot's image, when one is flagged available.  Whether it is
    /// actually attached to the request is decided later.
    pub image: Option<&'a ImageRef>,
}

/// Render the decision request for `snapshot`.
///
/// Only the last [`HISTORY_WINDOW`] entries of `recent_commands` are used.
pub fn compile<'a>(
    snapshot: &'a SensorSnapshot,
    recent_commands: &[CommandLogEntry],
) -> CompiledPrompt<'a> {
    let mut text = String::with_capacity(512);

    // `write!` into a String cannot fail.
    let _ = writeln!(text, "Step {} | Session {}", snapshot.step, snapshot.session_id);
    let _ = writeln!(text, "Time: {}", snapshot.timestamp);
    text.push('\n');

    text.push_str("=== SENSOR DATA ===\n");
    let _ = writeln!(text, "Distance to obstacle: {:.1} cm", snapshot.distance_cm);
    let _ = writeln!(
        text,
        "Light level: {} (Dark: {})",
        snapshot.light_raw,
        if snapshot.light_dark { "YES" } else { "NO" }
    );

    if let Some(imu) = &snapshot.inertial {
        text.push('\n');
        text.push_str("=== INERTIAL (accelerometer / gyroscope) ===\n");
        let _ = writeln!(
            text,
            "Acceleration: X={:.2}, Y={:.2}, Z={:.2} m/s²",
            imu.ax, imu.ay, imu.az
        );
        let _ = writeln!(
            text,
            "Angular rate: X={:.2}, Y={:.2}, Z={:.2} rad/s",
            imu.gx, imu.gy, imu.gz
        );
    }

    let image = snapshot.image.as_ref().filter(|img| img.available);
    if let Some(img) = image {
        text.push('\n');
        let _ = writeln!(
            text,
            "=== CAMERA IMAGE ({}x{}, {}) ===",
            img.width, img.height, img.format
        );
        text.push_str("Image is available for analysis\n");
    }

    let skip = recent_commands.len().saturating_sub(HISTORY_WINDOW);
    let window = &recent_commands[skip..];
    if !window.is_empty() {
        text.push('\n');
        text.push_str("=== RECENT COMMANDS ===\n");
        for entry in window {
            let _ = writeln!(
                text,
                "Step {}: {} ({}ms)",
                entry.step, entry.command, entry.duration_ms
            );
        }
    }

    text.push('\n');
    text.push_str("Based on this sensor data, what should the car do next?\n");
    text.push_str("Respond with a JSON command.");

    CompiledPrompt { text, image }
}

//! Countdown derivation for the shared hackathon timer.
//!
//! The displayed countdown is a presentation-only value derived from the
//! project's `{end_time, timer_status}` fields by local wall-clock polling,
//! independently on every client. Nothing here is distributed.
//!
//! Pause semantics: `end_time` is a fixed timestamp and is never shifted
//! while paused, so the derivation must freeze the last computed display
//! instead of recomputing from the wall clock. Elapsed pause time therefore
//! shortens the effective remaining time once resumed.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::project::TimerStatus;

/// Display when no countdown is active
pub const ZERO_DISPLAY: &str = "00:00:00";

/// Terminal sentinel once the target time has passed
pub const TIME_UP: &str = "TIME IS UP!";

/// Cadence of the local derivation tick
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Countdown state machine for one view.
///
/// Holds the last rendered display so a paused timer can freeze rather
/// than recompute.
#[derive(Debug, Clone)]
pub struct Countdown {
    display: String,
}

impl Countdown {
    pub fn new() -> Self {
        Self {
            display: ZERO_DISPLAY.to_string(),
        }
    }

    /// The last rendered value
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Re-derive the display from the timer fields at `now`.
    ///
    /// - absent `end_time` or `stopped`: zero display
    /// - `paused`: frozen, wall clock ignored
    /// - `running`: remaining time as zero-padded `HH:MM:SS`, floor
    ///   division, sub-second remainder discarded; `TIME IS UP!` once the
    ///   target has passed
    pub fn tick(
        &mut self,
        end_time: Option<DateTime<Utc>>,
        status: TimerStatus,
        now: DateTime<Utc>,
    ) -> &str {
        match (end_time, status) {
            (None, _) | (_, TimerStatus::Stopped) => {
                self.display = ZERO_DISPLAY.to_string();
            }
            (_, TimerStatus::Paused) => {}
            (Some(end), TimerStatus::Running) => {
                let remaining_ms = (end - now).num_milliseconds();
                self.display = if remaining_ms <= 0 {
                    TIME_UP.to_string()
                } else {
                    format_remaining(remaining_ms)
                };
            }
        }
        &self.display
    }
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a positive remaining duration as zero-padded `HH:MM:SS`.
///
/// Hours are total hours, not capped at 99.
fn format_remaining(remaining_ms: i64) -> String {
    let hours = remaining_ms / (1000 * 60 * 60);
    let minutes = (remaining_ms % (1000 * 60 * 60)) / (1000 * 60);
    let seconds = (remaining_ms % (1000 * 60)) / 1000;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

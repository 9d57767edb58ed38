//! Phase scheduling math.
//!
//! Pure functions over timestamps and a [`PhaseDefinition`]. Everything is
//! expressed as `now - <absolute timestamp>`, which is what lets a pause be
//! undone by shifting timestamps. Internally all arithmetic is in milliseconds.

use chrono::{DateTime, Utc};

use crate::template::PhaseDefinition;

/// Where the clock stands relative to a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    /// The phase is still running and this instruction is current.
    Running { instruction_index: usize },
    /// The phase's duration has fully elapsed.
    Elapsed,
}

/// Milliseconds from `since` to `now`. Negative if `now` is earlier.
pub fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_milliseconds()
}

fn phase_duration_ms(phase: &PhaseDefinition) -> i64 {
    i64::try_from(phase.duration_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000)
}

/// Decide whether the phase is over, and if not, which instruction is current.
pub fn phase_status(phase: &PhaseDefinition, elapsed_ms: i64) -> PhaseStatus {
    if elapsed_ms >= phase_duration_ms(phase) {
        PhaseStatus::Elapsed
    } else {
        PhaseStatus::Running {
            instruction_index: instruction_index(phase, elapsed_ms),
        }
    }
}

/// `floor(elapsed / (duration / len))`, clamped to the last instruction.
///
/// Returns 0 for phases without instructions.
pub fn instruction_index(phase: &PhaseDefinition, elapsed_ms: i64) -> usize {
    let count = phase.instructions.len();
    let duration = phase_duration_ms(phase);
    if count == 0 || elapsed_ms <= 0 || duration <= 0 {
        return 0;
    }
    let index = (elapsed_ms as u128 * count as u128) / duration as u128;
    usize::try_from(index).unwrap_or(usize::MAX).min(count - 1)
}

/// The instruction text at `index`, falling back to `filler` for empty phases.
pub fn instruction_text<'a>(phase: &'a PhaseDefinition, index: usize, filler: &'a str) -> &'a str {
    match phase.instructions.last() {
        None => filler,
        Some(last) => phase
            .instructions
            .get(index)
            .map(String::as_str)
            .unwrap_or(last.as_str()),
    }
}

/// Percentage of the phase that has elapsed, in `[0, 100]`.
pub fn phase_progress(phase: &PhaseDefinition, elapsed_ms: i64) -> f64 {
    percent(elapsed_ms, phase_duration_ms(phase))
}

/// Percentage of the whole session that has elapsed, in `[0, 100]`.
pub fn session_progress(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    percent(elapsed_ms(start, now), elapsed_ms(start, end))
}

fn percent(part_ms: i64, whole_ms: i64) -> f64 {
    if whole_ms <= 0 {
        return 100.0;
    }
    (part_ms as f64 / whole_ms as f64 * 100.0).clamp(0.0, 100.0)
}

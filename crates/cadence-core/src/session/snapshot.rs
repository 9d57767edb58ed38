//! Read-only views of a session handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{Intensity, SessionId, SessionState, Termination, UserId};

/// One entry of a session's delivery log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GivenInstruction {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Full snapshot of a session at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub name: String,
    pub description: String,
    pub intensity: Intensity,
    pub state: SessionState,
    pub termination: Option<Termination>,
    pub planned_duration_secs: u64,

    /// Rebased by every resume, so these drift later than the wall-clock start.
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    /// Un-paused time since start.
    pub elapsed_secs: f64,
    pub remaining_secs: f64,

    pub current_phase_index: usize,
    pub current_phase: String,
    pub phase_count: usize,
    pub current_instruction_index: usize,
    pub phase_progress: f64,
    pub session_progress: f64,
    pub pause_started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Whether an interrupt token is armed. The token itself is never exposed.
    pub interrupt_token_set: bool,
    pub instructions_given: Vec<GivenInstruction>,
}

/// What a session amounted to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub name: String,
    pub intensity: Intensity,
    pub state: SessionState,
    pub termination: Option<Termination>,
    pub start_time: DateTime<Utc>,
    pub planned_duration_secs: u64,
    pub duration_actual_secs: f64,
    pub session_progress: f64,
    pub instructions_given_count: usize,
    pub phases_completed: usize,
    pub was_interrupted: bool,
}

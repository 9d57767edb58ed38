//! Per-session state and its transitions.
//!
//! A [`Session`] is only ever touched under its entry's mutex, by either the
//! session's timer task or a caller operation. Every method here runs inside
//! that critical section and either applies a transition fully or not at all.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::snapshot::{GivenInstruction, SessionInfo, SessionSummary};
use crate::error::{EngineError, Result};
use crate::scheduler::{self, PhaseStatus};
use crate::template::{PhaseDefinition, SessionTemplate};

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of the user who owns a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How strongly instructions are worded. Has no effect on timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Intensity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Intensity::Low),
            "medium" => Ok(Intensity::Medium),
            "high" => Ok(Intensity::High),
            other => Err(format!("unknown intensity '{other}' (expected low, medium or high)")),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Paused,
    Completed,
    Interrupted,
}

impl SessionState {
    /// `Completed` and `Interrupted` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Interrupted)
    }

    /// `Active` or `Paused`: counts toward the one-live-session-per-user limit.
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

/// Why a session reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The final phase elapsed.
    Completed,
    /// The owner ended it before the final phase elapsed.
    EndedEarly,
    /// The owner's interrupt token appeared in a message.
    Interrupted,
    /// The timer hit a structural fault and shut the session down.
    Failed,
}

/// Result of catching a session up to the current time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Still in the same phase.
    Unchanged,
    /// Time is frozen.
    Paused,
    /// Moved into a later phase.
    PhaseChanged { phase_index: usize, phase: String },
    /// The final phase elapsed during this call.
    Completed,
    /// Was already terminal before this call.
    Terminal,
}

/// One guided session for one user.
#[derive(Debug)]
pub(crate) struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub template: Arc<SessionTemplate>,
    pub intensity: Intensity,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub phase_start_time: DateTime<Utc>,
    pub current_phase_index: usize,
    pub current_instruction_index: usize,
    pub state: SessionState,
    pub pause_started_at: Option<DateTime<Utc>>,
    pub interrupt_token: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub termination: Option<Termination>,
    instructions_given: Vec<GivenInstruction>,
}

impl Session {
    pub fn new(
        id: SessionId,
        user_id: UserId,
        template: Arc<SessionTemplate>,
        intensity: Intensity,
        interrupt_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        template.validate()?;
        let total = i64::try_from(template.total_duration_secs()).map_err(|_| {
            EngineError::InvalidDuration(format!("template '{}' is too long", template.name))
        })?;

        Ok(Self {
            id,
            user_id,
            template,
            intensity,
            start_time: now,
            end_time: now + Duration::seconds(total),
            phase_start_time: now,
            current_phase_index: 0,
            current_instruction_index: 0,
            state: SessionState::Active,
            pause_started_at: None,
            interrupt_token: normalize_token(interrupt_token),
            finished_at: None,
            termination: None,
            instructions_given: Vec::new(),
        })
    }

    /// The phase the session is in, or the last one once past the end.
    pub fn current_phase(&self) -> &PhaseDefinition {
        let last = self.template.phases.len().saturating_sub(1);
        &self.template.phases[self.current_phase_index.min(last)]
    }

    /// The instant progress is measured at.
    ///
    /// Frozen at the pause start while paused, and at the finish once terminal.
    pub fn effective_now(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.state {
            SessionState::Active => now,
            SessionState::Paused => self.pause_started_at.unwrap_or(now),
            SessionState::Completed | SessionState::Interrupted => self.finished_at.unwrap_or(now),
        }
    }

    /// Catch the phase and instruction indices up to `now`.
    ///
    /// Crossing several phase boundaries in one call is fine: each new phase
    /// starts exactly where the previous one ended.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<Advance> {
        match self.state {
            SessionState::Paused => return Ok(Advance::Paused),
            SessionState::Completed | SessionState::Interrupted => return Ok(Advance::Terminal),
            SessionState::Active => {}
        }

        let starting_phase = self.current_phase_index;
        loop {
            let phase = self
                .template
                .phases
                .get(self.current_phase_index)
                .ok_or_else(|| {
                    EngineError::InvalidTemplate(format!(
                        "session {} points at missing phase {}",
                        self.id, self.current_phase_index
                    ))
                })?;

            let elapsed = scheduler::elapsed_ms(self.phase_start_time, now);
            match scheduler::phase_status(phase, elapsed) {
                PhaseStatus::Running { instruction_index } => {
                    self.current_instruction_index = instruction_index;
                    break;
                }
                PhaseStatus::Elapsed => {
                    let boundary = self.phase_start_time + Duration::seconds(phase.duration_secs as i64);
                    if self.current_phase_index + 1 >= self.template.phases.len() {
                        self.current_phase_index = self.template.phases.len();
                        self.current_instruction_index = 0;
                        self.finish(SessionState::Completed, Termination::Completed, boundary.min(now));
                        return Ok(Advance::Completed);
                    }
                    self.current_phase_index += 1;
                    self.current_instruction_index = 0;
                    self.phase_start_time = boundary;
                }
            }
        }

        if self.current_phase_index == starting_phase {
            Ok(Advance::Unchanged)
        } else {
            Ok(Advance::PhaseChanged {
                phase_index: self.current_phase_index,
                phase: self.current_phase().name.clone(),
            })
        }
    }

    /// Freeze the clock. Only an `Active` session can be paused.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            SessionState::Active => {
                self.state = SessionState::Paused;
                self.pause_started_at = Some(now);
                Ok(())
            }
            SessionState::Paused => Err(EngineError::NotActive(self.id.clone())),
            _ => Err(self.terminal_error()),
        }
    }

    /// Unfreeze the clock, shifting every absolute timestamp by the pause length.
    ///
    /// Returns how long the session was paused.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<Duration> {
        match self.state {
            SessionState::Paused => {}
            SessionState::Active => return Err(EngineError::NotPaused(self.id.clone())),
            _ => return Err(self.terminal_error()),
        }

        let paused_at = self.pause_started_at.unwrap_or(now);
        let paused_for = (now - paused_at).max(Duration::zero());

        self.start_time += paused_for;
        self.end_time += paused_for;
        self.phase_start_time += paused_for;
        self.pause_started_at = None;
        self.state = SessionState::Active;
        Ok(paused_for)
    }

    /// Interrupt the session if `message` contains the owner's token.
    ///
    /// Matching is a case-insensitive substring search. Returns whether the
    /// session was interrupted by this call.
    pub fn check_interrupt(&mut self, message: Option<&str>, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let (Some(message), Some(token)) = (message, self.interrupt_token.as_deref()) else {
            return false;
        };
        if message.is_empty() || !message.to_lowercase().contains(&token.to_lowercase()) {
            return false;
        }

        self.finish(SessionState::Interrupted, Termination::Interrupted, now);
        true
    }

    /// End the session on the owner's request. Terminal sessions are left as they are.
    pub fn end(&mut self, now: DateTime<Utc>) {
        if self.state.is_live() {
            self.finish(SessionState::Completed, Termination::EndedEarly, now);
        }
    }

    /// Force a safe terminal state after a structural fault.
    pub fn fail(&mut self, now: DateTime<Utc>) {
        if self.state.is_live() {
            self.finish(SessionState::Completed, Termination::Failed, now);
        }
    }

    pub fn set_interrupt_token(&mut self, token: Option<String>) {
        self.interrupt_token = normalize_token(token);
    }

    /// Append to the delivery log.
    pub fn record_instruction(&mut self, text: String, at: DateTime<Utc>) {
        self.instructions_given.push(GivenInstruction { text, at });
    }

    /// Raw text of the current instruction, before any wording is applied.
    pub fn current_instruction<'a>(&'a self, filler: &'a str) -> &'a str {
        scheduler::instruction_text(self.current_phase(), self.current_instruction_index, filler)
    }

    pub fn phase_progress(&self, now: DateTime<Utc>) -> f64 {
        if self.current_phase_index >= self.template.phases.len() {
            return 100.0;
        }
        let elapsed = scheduler::elapsed_ms(self.phase_start_time, self.effective_now(now));
        scheduler::phase_progress(self.current_phase(), elapsed)
    }

    pub fn session_progress(&self, now: DateTime<Utc>) -> f64 {
        scheduler::session_progress(self.start_time, self.end_time, self.effective_now(now))
    }

    /// How far through the phase list the session is, in `[0, 1]`.
    pub fn phase_position(&self) -> f64 {
        let last = self.template.phases.len().saturating_sub(1).max(1);
        (self.current_phase_index as f64 / last as f64).min(1.0)
    }

    /// Seconds of un-paused time since the session started.
    pub fn active_secs(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = scheduler::elapsed_ms(self.start_time, self.effective_now(now));
        elapsed.max(0) as f64 / 1000.0
    }

    pub fn phases_completed(&self) -> usize {
        self.current_phase_index.min(self.template.phases.len())
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionInfo {
        let effective = self.effective_now(now);
        SessionInfo {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            name: self.template.name.clone(),
            description: self.template.description.clone(),
            intensity: self.intensity,
            state: self.state,
            termination: self.termination,
            planned_duration_secs: self.template.total_duration_secs(),
            start_time: self.start_time,
            end_time: self.end_time,
            elapsed_secs: self.active_secs(now),
            remaining_secs: (scheduler::elapsed_ms(effective, self.end_time).max(0) as f64) / 1000.0,
            current_phase_index: self.current_phase_index,
            current_phase: self.current_phase().name.clone(),
            phase_count: self.template.phases.len(),
            current_instruction_index: self.current_instruction_index,
            phase_progress: self.phase_progress(now),
            session_progress: self.session_progress(now),
            pause_started_at: self.pause_started_at,
            finished_at: self.finished_at,
            interrupt_token_set: self.interrupt_token.is_some(),
            instructions_given: self.instructions_given.clone(),
        }
    }

    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            name: self.template.name.clone(),
            intensity: self.intensity,
            state: self.state,
            termination: self.termination,
            start_time: self.start_time,
            planned_duration_secs: self.template.total_duration_secs(),
            duration_actual_secs: self.active_secs(now),
            session_progress: self.session_progress(now),
            instructions_given_count: self.instructions_given.len(),
            phases_completed: self.phases_completed(),
            was_interrupted: self.state == SessionState::Interrupted,
        }
    }

    fn finish(&mut self, state: SessionState, termination: Termination, at: DateTime<Utc>) {
        // Finishing while paused ends the session at the moment time froze.
        let at = self.pause_started_at.take().unwrap_or(at);
        self.state = state;
        self.termination = Some(termination);
        self.finished_at = Some(at);
    }

    fn terminal_error(&self) -> EngineError {
        match self.state {
            SessionState::Interrupted => EngineError::SessionInterrupted(self.id.clone()),
            _ => EngineError::SessionTerminal(self.id.clone()),
        }
    }
}

fn normalize_token(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

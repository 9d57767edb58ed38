//! Engine - the boundary every front-end talks to.
//!
//! The engine owns everything that would otherwise be process-wide state:
//! the session registry, per-user preferences and interrupt tokens, the
//! template store and the event bus. Independent engines never share state.
//!
//! ```text
//!                  ┌────────────────────────────┐
//!                  │           Engine           │
//!                  ├────────────────────────────┤
//!   start_session ─┤  SessionRegistry           ├─ spawns ─▶ timer task per session
//!   next/pause/... ┤  preferences (per user)    │
//!                  │  TemplateStore · EventBus  ├─ emits ──▶ subscribers
//!                  └────────────────────────────┘
//! ```
//!
//! Operations are synchronous and return as soon as their critical section
//! ends. Timer tasks run on the tokio runtime captured when the engine was
//! built.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Duration;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event_bus::{EventBus, SessionEvent};
use crate::session::registry::{SessionEntry, SessionRegistry};
use crate::session::worker::{catch_up, spawn_session_timer};
use crate::session::{
    Intensity, Session, SessionId, SessionInfo, SessionState, SessionSummary, UserId,
};
use crate::template::{InMemoryTemplateStore, SessionTemplate, TemplateStore, TemplateSummary};
use crate::wording;

/// Where a new session's phases come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TemplateSource {
    /// A template from the store.
    Id(String),
    /// Caller-supplied phases.
    Custom(SessionTemplate),
    /// Any template from the store.
    Random,
}

/// Parameters for [`Engine::start_session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub user_id: UserId,
    pub template: TemplateSource,
    /// Falls back to the user's preference, then the template's default.
    #[serde(default)]
    pub intensity: Option<Intensity>,
    /// Falls back to the user's preference, then the template's own length.
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

impl StartRequest {
    pub fn new(user_id: impl Into<UserId>, template: TemplateSource) -> Self {
        Self {
            user_id: user_id.into(),
            template,
            intensity: None,
            duration_minutes: None,
        }
    }

    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = Some(intensity);
        self
    }

    pub fn with_duration_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }
}

/// What [`Engine::start_session`] hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub session_id: SessionId,
    pub name: String,
    pub description: String,
    pub duration_secs: u64,
    pub intensity: Intensity,
    pub initial_instruction: String,
    pub current_phase: String,
    pub interrupt_token_set: bool,
}

/// The instruction to show right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionUpdate {
    pub instruction: String,
    pub current_phase: String,
    pub phase_index: usize,
    pub phase_count: usize,
    pub instruction_index: usize,
    pub phase_progress: f64,
    pub session_progress: f64,
    pub paused: bool,
}

/// Outcome of polling a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NextInstruction {
    Instruction(InstructionUpdate),
    /// The message carried the owner's interrupt token. No instruction follows.
    Interrupted { session_id: SessionId },
    /// The final phase has elapsed.
    Completed { summary: SessionSummary },
}

/// Per-user defaults applied when a session starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub preferred_intensity: Option<Intensity>,
    #[serde(default)]
    pub preferred_duration_minutes: Option<u32>,
    #[serde(default)]
    pub interrupt_token: Option<String>,
}

/// Configuration for building an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    clock: Option<Arc<dyn Clock>>,
    templates: Option<Arc<dyn TemplateStore>>,
    event_bus: Option<Arc<EventBus>>,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom time source (tests drive a `ManualClock`).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn templates(mut self, templates: Arc<dyn TemplateStore>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Use an existing EventBus, e.g. one shared with other components.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Runtime that drives the timer tasks. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the Engine.
    ///
    /// Fails with `NoRuntime` when no runtime was given and none is running.
    pub fn build(self) -> Result<Engine> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| EngineError::NoRuntime)?,
        };

        Ok(Engine {
            config: self.config.unwrap_or_default(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            templates: self
                .templates
                .unwrap_or_else(|| Arc::new(InMemoryTemplateStore::with_defaults())),
            events: self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new())),
            runtime,
            registry: SessionRegistry::new(),
            preferences: RwLock::new(HashMap::new()),
        })
    }
}

/// The timed guided-session engine.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    templates: Arc<dyn TemplateStore>,
    events: Arc<EventBus>,
    runtime: Handle,
    registry: SessionRegistry,
    preferences: RwLock<HashMap<UserId, UserPreferences>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// An engine with default config, the wall clock and the built-in templates.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Number of sessions held, including retained terminal ones.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Start a session and its timer.
    ///
    /// Rejected with `UserAlreadyActive` while the user has an active or
    /// paused session.
    pub fn start_session(&self, request: StartRequest) -> Result<StartedSession> {
        let StartRequest {
            user_id,
            template,
            intensity,
            duration_minutes,
        } = request;
        let preferences = self.user_preferences(&user_id);

        let mut template = self.resolve_template(template)?;
        if let Some(minutes) = duration_minutes.or(preferences.preferred_duration_minutes) {
            template = template.rescaled(u64::from(minutes) * 60)?;
        }
        let intensity = intensity
            .or(preferences.preferred_intensity)
            .unwrap_or(template.intensity);

        // A live session that has actually run out should not block the new one.
        self.refresh_indexed(&user_id);

        let now = self.clock.now();
        let mut session = Session::new(
            SessionId::new(),
            user_id.clone(),
            Arc::new(template),
            intensity,
            preferences.interrupt_token,
            now,
        )?;
        let initial_instruction = self.phrase(&session);
        session.record_instruction(initial_instruction.clone(), now);

        let started = StartedSession {
            session_id: session.id.clone(),
            name: session.template.name.clone(),
            description: session.template.description.clone(),
            duration_secs: session.template.total_duration_secs(),
            intensity,
            initial_instruction,
            current_phase: session.current_phase().name.clone(),
            interrupt_token_set: session.interrupt_token.is_some(),
        };

        let entry = self.registry.insert_exclusive(session)?;
        let handle = spawn_session_timer(
            &self.runtime,
            entry.clone(),
            self.clock.clone(),
            self.events.clone(),
            self.config.tick_interval(),
        );
        entry.attach_worker(handle);

        log::info!(
            "Started session {} ({}) for user {}: {}s at {} intensity",
            started.session_id,
            started.name,
            user_id,
            started.duration_secs,
            intensity
        );
        self.events.emit(SessionEvent::Started {
            session_id: started.session_id.clone(),
            user_id,
            name: started.name.clone(),
            intensity,
            duration_secs: started.duration_secs,
        });
        Ok(started)
    }

    /// Poll for the current instruction.
    ///
    /// `message` is free text from the user. If it contains their interrupt
    /// token the session is interrupted before any instruction is computed.
    pub fn get_next_instruction(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        message: Option<&str>,
    ) -> Result<NextInstruction> {
        let entry = self.registry.get(session_id, user_id)?;
        let now = self.clock.now();
        let mut session = entry.lock();

        match session.state {
            SessionState::Interrupted => {
                return Err(EngineError::SessionInterrupted(session_id.clone()))
            }
            SessionState::Completed => {
                return Ok(NextInstruction::Completed {
                    summary: session.summary(now),
                })
            }
            SessionState::Active | SessionState::Paused => {}
        }

        let event = catch_up(&mut session, now);
        if session.state.is_terminal() {
            let summary = session.summary(now);
            drop(session);
            self.publish(event);
            self.finished(&entry);
            return Ok(NextInstruction::Completed { summary });
        }

        self.sync_interrupt_token(&mut session);
        if session.check_interrupt(message, now) {
            drop(session);
            self.publish(event);
            self.interrupted(&entry);
            return Ok(NextInstruction::Interrupted {
                session_id: session_id.clone(),
            });
        }

        let instruction = self.phrase(&session);
        let paused = session.state == SessionState::Paused;
        if !paused {
            session.record_instruction(instruction.clone(), now);
        }
        let update = InstructionUpdate {
            instruction,
            current_phase: session.current_phase().name.clone(),
            phase_index: session.current_phase_index,
            phase_count: session.template.phases.len(),
            instruction_index: session.current_instruction_index,
            phase_progress: session.phase_progress(now),
            session_progress: session.session_progress(now),
            paused,
        };
        drop(session);

        self.publish(event);
        Ok(NextInstruction::Instruction(update))
    }

    /// Freeze a session's clock.
    pub fn pause(&self, session_id: &SessionId, user_id: &UserId) -> Result<()> {
        let entry = self.registry.get(session_id, user_id)?;
        let now = self.clock.now();

        let (event, paused) = {
            let mut session = entry.lock();
            let event = catch_up(&mut session, now);
            (event, session.pause(now))
        };
        self.publish(event);
        paused?;

        log::info!("Paused session {}", session_id);
        self.events.emit(SessionEvent::Paused {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
        });
        Ok(())
    }

    /// Unfreeze a session. Progress picks up exactly where the pause left it.
    pub fn resume(&self, session_id: &SessionId, user_id: &UserId) -> Result<()> {
        let entry = self.registry.get(session_id, user_id)?;
        let now = self.clock.now();

        let paused_for = entry.lock().resume(now)?;
        let paused_secs = paused_for.num_milliseconds() as f64 / 1000.0;

        log::info!("Resumed session {} after {:.1}s", session_id, paused_secs);
        self.events.emit(SessionEvent::Resumed {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            paused_secs,
        });
        Ok(())
    }

    /// Stop a session, remove it, and report what it amounted to.
    ///
    /// A session that already finished keeps its outcome; a live one is
    /// marked as ended early.
    pub fn end_session(&self, session_id: &SessionId, user_id: &UserId) -> Result<SessionSummary> {
        let entry = self.registry.remove(session_id, user_id)?;
        entry.stop_worker();
        let now = self.clock.now();

        let (event, summary) = {
            let mut session = entry.lock();
            let event = catch_up(&mut session, now);
            session.end(now);
            (event, session.summary(now))
        };
        self.publish(event);

        log::info!(
            "Ended session {}: {:.1}s, {} instructions, {} phases, interrupted: {}",
            session_id,
            summary.duration_actual_secs,
            summary.instructions_given_count,
            summary.phases_completed,
            summary.was_interrupted
        );
        self.events.emit(SessionEvent::Ended {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// Full read snapshot. Works on terminal sessions too.
    pub fn get_session_info(&self, session_id: &SessionId, user_id: &UserId) -> Result<SessionInfo> {
        let entry = self.registry.get(session_id, user_id)?;
        let now = self.clock.now();

        let (event, info) = {
            let mut session = entry.lock();
            let event = catch_up(&mut session, now);
            self.sync_interrupt_token(&mut session);
            (event, session.snapshot(now))
        };
        self.publish(event);
        Ok(info)
    }

    /// Summaries of every session the engine still holds for a user, oldest first.
    pub fn list_active_sessions(&self, user_id: &UserId) -> Vec<SessionSummary> {
        let now = self.clock.now();
        let mut summaries: Vec<SessionSummary> = self
            .registry
            .list_for_user(user_id)
            .into_iter()
            .map(|entry| {
                let (event, summary) = {
                    let mut session = entry.lock();
                    let event = catch_up(&mut session, now);
                    (event, session.summary(now))
                };
                self.publish(event);
                summary
            })
            .collect();
        summaries.sort_by_key(|summary| summary.start_time);
        summaries
    }

    /// Set or clear (`None` or blank) a user's interrupt token.
    ///
    /// Applies to the user's live session immediately, and to later sessions.
    /// Sessions read the owner's token whenever a message is checked.
    pub fn set_interrupt_token(&self, user_id: &UserId, token: Option<String>) {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let armed = token.is_some();

        self.update_preferences(user_id, |prefs| prefs.interrupt_token = token);
        log::debug!("Interrupt token for {} {}", user_id, if armed { "set" } else { "cleared" });
    }

    /// Replace a user's preferences. The interrupt token is applied as by
    /// [`Engine::set_interrupt_token`].
    pub fn set_user_preferences(&self, user_id: &UserId, preferences: UserPreferences) {
        let token = preferences.interrupt_token.clone();
        self.update_preferences(user_id, |prefs| *prefs = preferences);
        self.set_interrupt_token(user_id, token);
    }

    pub fn user_preferences(&self, user_id: &UserId) -> UserPreferences {
        self.preferences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Templates a caller can start, ordered by id.
    pub fn available_templates(&self) -> Vec<TemplateSummary> {
        self.templates
            .list()
            .iter()
            .map(SessionTemplate::summary)
            .collect()
    }

    /// Forget terminal sessions that finished more than `older_than` ago.
    ///
    /// Returns how many were dropped.
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let cutoff = self.clock.now() - older_than;
        let purged = self.registry.purge_terminal(cutoff);
        for entry in &purged {
            entry.stop_worker();
        }
        if !purged.is_empty() {
            log::info!("Purged {} finished sessions", purged.len());
        }
        purged.len()
    }

    /// Stop every timer and drop all sessions.
    pub async fn shutdown(&self) {
        let entries = self.registry.drain();
        log::info!("Shutting down {} sessions", entries.len());
        for entry in entries {
            if let Some(handle) = entry.take_worker() {
                if let Err(e) = handle.await {
                    log::warn!("Timer for session {} ended abnormally: {}", entry.id, e);
                }
            }
        }
    }

    fn resolve_template(&self, source: TemplateSource) -> Result<SessionTemplate> {
        match source {
            TemplateSource::Id(id) => self
                .templates
                .get(&id)
                .ok_or(EngineError::TemplateNotFound(id)),
            TemplateSource::Custom(template) => {
                template.validate()?;
                Ok(template)
            }
            TemplateSource::Random => self
                .templates
                .list()
                .choose(&mut rand::thread_rng())
                .cloned()
                .ok_or_else(|| EngineError::TemplateNotFound("no templates available".to_string())),
        }
    }

    /// The current instruction, worded for the session's intensity.
    ///
    /// A phase without instructions speaks one of the template's
    /// encouragements, or the configured filler when there are none.
    fn phrase(&self, session: &Session) -> String {
        let mut rng = rand::thread_rng();
        let raw = if session.current_phase().instructions.is_empty() {
            session
                .template
                .encouragements
                .choose(&mut rng)
                .map(String::as_str)
                .unwrap_or(self.config.filler_instruction.as_str())
        } else {
            session.current_instruction(&self.config.filler_instruction)
        };
        wording::decorate(
            raw,
            session.intensity,
            session.phase_position(),
            &session.template.encouragements,
            self.config.encouragement_chance,
            self.config.modifier_chance,
            &mut rng,
        )
    }

    /// Bring a session's token in line with its owner's current one.
    ///
    /// Takes the preferences lock while the caller holds the session lock.
    fn sync_interrupt_token(&self, session: &mut Session) {
        let token = self.user_preferences(&session.user_id).interrupt_token;
        session.set_interrupt_token(token);
    }

    /// Catch the user's indexed session up so a finished one frees the slot.
    fn refresh_indexed(&self, user_id: &UserId) {
        if let Some(entry) = self.registry.indexed_for_user(user_id) {
            let event = catch_up(&mut entry.lock(), self.clock.now());
            self.publish(event);
        }
    }

    fn interrupted(&self, entry: &SessionEntry) {
        log::info!("Session {} interrupted by its owner's token", entry.id);
        self.finished(entry);
        self.events.emit(SessionEvent::Interrupted {
            session_id: entry.id.clone(),
            user_id: entry.user_id.clone(),
        });
    }

    fn finished(&self, entry: &SessionEntry) {
        entry.stop_worker();
        self.registry.release(entry);
    }

    fn publish(&self, event: Option<SessionEvent>) {
        if let Some(event) = event {
            self.events.emit(event);
        }
    }

    fn update_preferences(&self, user_id: &UserId, update: impl FnOnce(&mut UserPreferences)) {
        let mut preferences = self
            .preferences
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(preferences.entry(user_id.clone()).or_default());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for entry in self.registry.drain() {
            entry.stop_worker();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::session::Termination;
    use crate::template::PhaseDefinition;

    fn two_phase() -> SessionTemplate {
        SessionTemplate::new(
            "two",
            "Two phases",
            vec![
                PhaseDefinition::new("a", 10, ["a1", "a2"]),
                PhaseDefinition::new("b", 10, ["b1"]),
            ],
        )
        .with_encouragements(["Nice"])
    }

    fn engine_with_clock() -> (Engine, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = InMemoryTemplateStore::with_defaults();
        store.insert(two_phase()).unwrap();
        let engine = Engine::builder()
            .config(EngineConfig::default().plain().with_tick_interval_ms(3_600_000))
            .clock(Arc::new(clock.clone()))
            .templates(Arc::new(store))
            .build()
            .unwrap();
        (engine, clock)
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn start_two(engine: &Engine) -> StartedSession {
        engine
            .start_session(StartRequest::new("alice", TemplateSource::Id("two".to_string())))
            .unwrap()
    }

    fn instruction(outcome: NextInstruction) -> InstructionUpdate {
        match outcome {
            NextInstruction::Instruction(update) => update,
            other => panic!("expected an instruction, got {other:?}"),
        }
    }

    mod building {
        use super::*;

        #[test]
        fn build_without_runtime_fails() {
            let err = Engine::builder().build().err().unwrap();
            assert_eq!(err.kind(), ErrorKind::NoRuntime);
        }

        #[tokio::test]
        async fn defaults_use_builtin_templates() {
            let engine = Engine::new().unwrap();
            let ids: Vec<String> = engine.available_templates().into_iter().map(|t| t.id).collect();
            assert_eq!(ids, vec!["focus_reset", "guided_breathing", "progressive_relaxation"]);
        }
    }

    mod starting {
        use super::*;

        #[tokio::test]
        async fn returns_first_instruction() {
            let (engine, _clock) = engine_with_clock();
            let started = start_two(&engine);

            assert_eq!(started.name, "Two phases");
            assert_eq!(started.duration_secs, 20);
            assert_eq!(started.initial_instruction, "a1");
            assert_eq!(started.current_phase, "a");
            assert_eq!(started.intensity, Intensity::Medium);
            assert!(!started.interrupt_token_set);
        }

        #[tokio::test]
        async fn unknown_template_is_rejected() {
            let (engine, _clock) = engine_with_clock();
            let err = engine
                .start_session(StartRequest::new("alice", TemplateSource::Id("nope".to_string())))
                .err()
                .unwrap();
            assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
            assert_eq!(engine.session_count(), 0);
        }

        #[tokio::test]
        async fn custom_template_is_validated() {
            let (engine, _clock) = engine_with_clock();
            let bad = SessionTemplate::new("", "Empty", vec![]);
            let err = engine
                .start_session(StartRequest::new("alice", TemplateSource::Custom(bad)))
                .err()
                .unwrap();
            assert_eq!(err.kind(), ErrorKind::InvalidTemplate);
        }

        #[tokio::test]
        async fn zero_minutes_is_invalid_duration() {
            let (engine, _clock) = engine_with_clock();
            let request = StartRequest::new("alice", TemplateSource::Id("two".to_string()))
                .with_duration_minutes(0);
            let err = engine.start_session(request).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::InvalidDuration);
        }

        #[tokio::test]
        async fn random_picks_a_stored_template() {
            let (engine, _clock) = engine_with_clock();
            let started = engine
                .start_session(StartRequest::new("alice", TemplateSource::Random))
                .unwrap();
            let names: Vec<String> = engine.available_templates().into_iter().map(|t| t.name).collect();
            assert!(names.contains(&started.name));
        }

        #[tokio::test]
        async fn preferences_fill_missing_fields() {
            let (engine, _clock) = engine_with_clock();
            engine.set_user_preferences(
                &alice(),
                UserPreferences {
                    preferred_intensity: Some(Intensity::High),
                    preferred_duration_minutes: Some(1),
                    interrupt_token: Some("red".to_string()),
                },
            );

            let started = start_two(&engine);
            assert_eq!(started.intensity, Intensity::High);
            assert_eq!(started.duration_secs, 60);
            assert!(started.interrupt_token_set);
        }

        #[tokio::test]
        async fn request_overrides_preferences() {
            let (engine, _clock) = engine_with_clock();
            engine.set_user_preferences(
                &alice(),
                UserPreferences {
                    preferred_intensity: Some(Intensity::High),
                    ..Default::default()
                },
            );
            let started = engine
                .start_session(
                    StartRequest::new("alice", TemplateSource::Id("two".to_string()))
                        .with_intensity(Intensity::Low),
                )
                .unwrap();
            assert_eq!(started.intensity, Intensity::Low);
        }

        #[tokio::test]
        async fn expired_session_does_not_block_a_new_one() {
            let (engine, clock) = engine_with_clock();
            start_two(&engine);
            clock.advance_secs(30);

            assert!(engine
                .start_session(StartRequest::new("alice", TemplateSource::Id("two".to_string())))
                .is_ok());
        }

        #[tokio::test]
        async fn emits_started_event() {
            let (engine, _clock) = engine_with_clock();
            let mut rx = engine.subscribe();
            let started = start_two(&engine);

            let event = rx.recv().await.unwrap();
            assert_eq!(event.event_type(), "session:started");
            assert_eq!(event.session_id(), &started.session_id);
        }
    }

    mod polling {
        use super::*;

        #[tokio::test]
        async fn paused_poll_reports_without_logging() {
            let (engine, clock) = engine_with_clock();
            let started = start_two(&engine);
            engine.pause(&started.session_id, &alice()).unwrap();
            clock.advance_secs(50);

            let update = instruction(
                engine
                    .get_next_instruction(&started.session_id, &alice(), None)
                    .unwrap(),
            );
            assert!(update.paused);
            assert_eq!(update.instruction, "a1");
            assert_eq!(update.session_progress, 0.0);

            let info = engine.get_session_info(&started.session_id, &alice()).unwrap();
            assert_eq!(info.instructions_given.len(), 1);
        }

        #[tokio::test]
        async fn poll_records_delivery() {
            let (engine, clock) = engine_with_clock();
            let started = start_two(&engine);
            clock.advance_secs(6);
            engine
                .get_next_instruction(&started.session_id, &alice(), Some("hello"))
                .unwrap();

            let info = engine.get_session_info(&started.session_id, &alice()).unwrap();
            let texts: Vec<&str> = info.instructions_given.iter().map(|i| i.text.as_str()).collect();
            assert_eq!(texts, vec!["a1", "a2"]);
        }

        #[tokio::test]
        async fn completion_is_reported_on_poll() {
            let (engine, clock) = engine_with_clock();
            let started = start_two(&engine);
            clock.advance_secs(25);

            match engine
                .get_next_instruction(&started.session_id, &alice(), None)
                .unwrap()
            {
                NextInstruction::Completed { summary } => {
                    assert_eq!(summary.termination, Some(Termination::Completed));
                    assert_eq!(summary.phases_completed, 2);
                    assert_eq!(summary.duration_actual_secs, 20.0);
                }
                other => panic!("expected completion, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn empty_phase_yields_filler() {
            let (engine, _clock) = engine_with_clock();
            let quiet = SessionTemplate::new(
                "quiet",
                "Quiet",
                vec![PhaseDefinition::new("silence", 30, Vec::<String>::new())],
            );
            let started = engine
                .start_session(StartRequest::new("alice", TemplateSource::Custom(quiet)))
                .unwrap();
            assert_eq!(started.initial_instruction, engine.config().filler_instruction);
        }

        #[tokio::test]
        async fn empty_phase_speaks_an_encouragement() {
            let (engine, _clock) = engine_with_clock();
            let quiet = SessionTemplate::new(
                "quiet",
                "Quiet",
                vec![PhaseDefinition::new("silence", 30, Vec::<String>::new())],
            )
            .with_encouragements(["You're doing well"]);
            let started = engine
                .start_session(StartRequest::new("alice", TemplateSource::Custom(quiet)))
                .unwrap();
            assert_eq!(started.initial_instruction, "You're doing well");
        }

        #[tokio::test]
        async fn token_after_the_end_still_completes() {
            let (engine, clock) = engine_with_clock();
            engine.set_interrupt_token(&alice(), Some("stop".to_string()));
            let started = start_two(&engine);
            clock.advance_secs(30);

            match engine
                .get_next_instruction(&started.session_id, &alice(), Some("stop"))
                .unwrap()
            {
                NextInstruction::Completed { summary } => {
                    assert!(!summary.was_interrupted);
                    assert_eq!(summary.termination, Some(Termination::Completed));
                    assert_eq!(summary.duration_actual_secs, 20.0);
                    assert_eq!(summary.phases_completed, 2);
                }
                other => panic!("expected completion, got {other:?}"),
            }
        }
    }

    mod controls {
        use super::*;

        #[tokio::test]
        async fn pause_twice_is_not_active() {
            let (engine, _clock) = engine_with_clock();
            let started = start_two(&engine);
            engine.pause(&started.session_id, &alice()).unwrap();
            let err = engine.pause(&started.session_id, &alice()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotActive);
        }

        #[tokio::test]
        async fn resume_active_is_not_paused() {
            let (engine, _clock) = engine_with_clock();
            let started = start_two(&engine);
            let err = engine.resume(&started.session_id, &alice()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotPaused);
        }

        #[tokio::test]
        async fn pause_after_completion_is_terminal() {
            let (engine, clock) = engine_with_clock();
            let started = start_two(&engine);
            clock.advance_secs(40);
            let err = engine.pause(&started.session_id, &alice()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SessionTerminal);
        }

        #[tokio::test]
        async fn other_users_are_unauthorized() {
            let (engine, _clock) = engine_with_clock();
            let started = start_two(&engine);
            let mallory = UserId::from("mallory");

            for err in [
                engine.pause(&started.session_id, &mallory).unwrap_err(),
                engine.resume(&started.session_id, &mallory).unwrap_err(),
                engine.end_session(&started.session_id, &mallory).unwrap_err(),
                engine.get_session_info(&started.session_id, &mallory).unwrap_err(),
                engine
                    .get_next_instruction(&started.session_id, &mallory, None)
                    .unwrap_err(),
            ] {
                assert_eq!(err.kind(), ErrorKind::Unauthorized);
            }
            assert_eq!(engine.session_count(), 1);
        }

        #[tokio::test]
        async fn resume_emits_pause_length() {
            let (engine, clock) = engine_with_clock();
            let started = start_two(&engine);
            engine.pause(&started.session_id, &alice()).unwrap();
            let mut rx = engine.subscribe();
            clock.advance_secs(7);
            engine.resume(&started.session_id, &alice()).unwrap();

            match rx.recv().await.unwrap() {
                SessionEvent::Resumed { paused_secs, .. } => assert_eq!(paused_secs, 7.0),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    mod ending {
        use super::*;

        #[tokio::test]
        async fn end_removes_session_and_summarizes() {
            let (engine, clock) = engine_with_clock();
            let started = start_two(&engine);
            clock.advance_secs(12);

            let summary = engine.end_session(&started.session_id, &alice()).unwrap();
            assert_eq!(summary.termination, Some(Termination::EndedEarly));
            assert_eq!(summary.state, SessionState::Completed);
            assert_eq!(summary.phases_completed, 1);
            assert_eq!(summary.instructions_given_count, 1);
            assert!(!summary.was_interrupted);

            let err = engine.get_session_info(&started.session_id, &alice()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }

        #[tokio::test]
        async fn end_after_interrupt_reports_interrupt() {
            let (engine, _clock) = engine_with_clock();
            engine.set_interrupt_token(&alice(), Some("stop".to_string()));
            let started = start_two(&engine);
            engine
                .get_next_instruction(&started.session_id, &alice(), Some("stop"))
                .unwrap();

            let summary = engine.end_session(&started.session_id, &alice()).unwrap();
            assert!(summary.was_interrupted);
            assert_eq!(summary.termination, Some(Termination::Interrupted));
        }

        #[tokio::test]
        async fn purge_drops_old_finished_sessions() {
            let (engine, clock) = engine_with_clock();
            start_two(&engine);
            clock.advance_secs(30);
            engine.list_active_sessions(&alice());

            assert_eq!(engine.purge_finished(Duration::minutes(5)), 0);
            clock.advance_secs(600);
            assert_eq!(engine.purge_finished(Duration::minutes(5)), 1);
            assert_eq!(engine.session_count(), 0);
        }

        #[tokio::test]
        async fn shutdown_clears_everything() {
            let (engine, _clock) = engine_with_clock();
            start_two(&engine);
            engine.shutdown().await;
            assert_eq!(engine.session_count(), 0);
        }
    }

    mod tokens {
        use super::*;

        #[tokio::test]
        async fn token_set_mid_session_applies() {
            let (engine, _clock) = engine_with_clock();
            let started = start_two(&engine);
            engine.set_interrupt_token(&alice(), Some("  Banana ".to_string()));

            let outcome = engine
                .get_next_instruction(&started.session_id, &alice(), Some("BANANA split"))
                .unwrap();
            assert_eq!(
                outcome,
                NextInstruction::Interrupted {
                    session_id: started.session_id.clone()
                }
            );
        }

        #[tokio::test]
        async fn token_is_read_from_owner_at_check_time() {
            let (engine, _clock) = engine_with_clock();
            let started = start_two(&engine);
            // Recorded for the user only, as when set while the session was starting.
            engine.update_preferences(&alice(), |prefs| {
                prefs.interrupt_token = Some("stop".to_string())
            });

            let info = engine.get_session_info(&started.session_id, &alice()).unwrap();
            assert!(info.interrupt_token_set);
            let outcome = engine
                .get_next_instruction(&started.session_id, &alice(), Some("please stop"))
                .unwrap();
            assert_eq!(
                outcome,
                NextInstruction::Interrupted {
                    session_id: started.session_id.clone()
                }
            );
        }

        #[tokio::test]
        async fn cleared_token_no_longer_interrupts() {
            let (engine, _clock) = engine_with_clock();
            engine.set_interrupt_token(&alice(), Some("stop".to_string()));
            let started = start_two(&engine);
            engine.set_interrupt_token(&alice(), None);

            let update = instruction(
                engine
                    .get_next_instruction(&started.session_id, &alice(), Some("stop"))
                    .unwrap(),
            );
            assert_eq!(update.instruction, "a1");
        }

        #[tokio::test]
        async fn blank_token_clears() {
            let (engine, _clock) = engine_with_clock();
            engine.set_interrupt_token(&alice(), Some("stop".to_string()));
            engine.set_interrupt_token(&alice(), Some("   ".to_string()));
            assert_eq!(engine.user_preferences(&alice()).interrupt_token, None);

            let started = start_two(&engine);
            assert!(!started.interrupt_token_set);
        }

        #[tokio::test]
        async fn interrupt_frees_user_slot() {
            let (engine, _clock) = engine_with_clock();
            engine.set_interrupt_token(&alice(), Some("stop".to_string()));
            let started = start_two(&engine);
            engine
                .get_next_instruction(&started.session_id, &alice(), Some("stop"))
                .unwrap();

            assert!(engine
                .start_session(StartRequest::new("alice", TemplateSource::Id("two".to_string())))
                .is_ok());
        }
    }
}

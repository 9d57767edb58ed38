//! # cadence-core
//!
//! Timed multi-phase guided-session engine.
//!
//! Many users can each run one session at a time. A session walks through
//! the ordered, timed phases of a template, handing out one instruction at a
//! time; it can be paused and resumed without losing progress, and it stops
//! immediately when the user's interrupt token shows up in a message.
//!
//! ## Key Concepts
//!
//! - **Template**: ordered phases, each with a duration and instruction list
//! - **Session**: one user's run through a template, driven by its own timer task
//! - **Engine**: the owner of all sessions and the only entry point for callers
//! - **SessionEvent**: lifecycle notifications published on the [`EventBus`]
//!
//! ```no_run
//! use cadence_core::{Engine, NextInstruction, StartRequest, TemplateSource, UserId};
//!
//! # async fn run() -> cadence_core::Result<()> {
//! let engine = Engine::new()?;
//! let user = UserId::from("alice");
//! engine.set_interrupt_token(&user, Some("stop".to_string()));
//!
//! let started = engine.start_session(
//!     StartRequest::new(user.clone(), TemplateSource::Id("guided_breathing".into()))
//!         .with_duration_minutes(5),
//! )?;
//! println!("{}", started.initial_instruction);
//!
//! if let NextInstruction::Instruction(update) =
//!     engine.get_next_instruction(&started.session_id, &user, None)?
//! {
//!     println!("{} ({:.0}%)", update.instruction, update.session_progress);
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod scheduler;
pub mod session;
pub mod template;
pub mod wording;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{
    Engine, EngineBuilder, InstructionUpdate, NextInstruction, StartRequest, StartedSession,
    TemplateSource, UserPreferences,
};
pub use error::{EngineError, ErrorKind, Result};
pub use event_bus::{EventBus, SessionEvent};
pub use session::{
    GivenInstruction, Intensity, SessionId, SessionInfo, SessionState, SessionSummary,
    Termination, UserId,
};
pub use template::{
    InMemoryTemplateStore, PhaseDefinition, SessionTemplate, TemplateStore, TemplateSummary,
};

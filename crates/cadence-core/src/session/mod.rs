//! Guided sessions: state, registry and timers.
//!
//! A session is shared between its timer task and any number of caller
//! operations; the registry hands both the same entry.

pub(crate) mod registry;
mod snapshot;
mod state;
pub(crate) mod worker;

pub use snapshot::{GivenInstruction, SessionInfo, SessionSummary};
pub(crate) use state::Session;
pub use state::{Intensity, SessionId, SessionState, Termination, UserId};

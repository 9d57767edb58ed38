//! Session lifecycle broadcasting.
//!
//! Timer workers and caller operations publish [`SessionEvent`]s here; any
//! number of front-ends can subscribe. Nobody listening is not an error.
//!
//! # Example
//!
//! ```rust
//! use cadence_core::event_bus::{EventBus, SessionEvent};
//! use cadence_core::{SessionId, UserId};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.emit(SessionEvent::Paused {
//!     session_id: SessionId::from("s-1"),
//!     user_id: UserId::from("alice"),
//! });
//!
//! assert_eq!(rx.try_recv().unwrap().event_type(), "session:paused");
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::{Intensity, SessionId, SessionSummary, UserId};

/// Default channel capacity for the event bus.
/// Events beyond this capacity will cause slow subscribers to miss events (lag).
const DEFAULT_CAPACITY: usize = 1024;

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        session_id: SessionId,
        user_id: UserId,
        name: String,
        intensity: Intensity,
        duration_secs: u64,
    },
    PhaseChanged {
        session_id: SessionId,
        user_id: UserId,
        phase_index: usize,
        phase: String,
    },
    Paused {
        session_id: SessionId,
        user_id: UserId,
    },
    Resumed {
        session_id: SessionId,
        user_id: UserId,
        paused_secs: f64,
    },
    Interrupted {
        session_id: SessionId,
        user_id: UserId,
    },
    /// Reached a terminal state on its own: the final phase elapsed or the timer failed.
    Completed { summary: SessionSummary },
    /// Removed by its owner.
    Ended { summary: SessionSummary },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::Started { session_id, .. }
            | SessionEvent::PhaseChanged { session_id, .. }
            | SessionEvent::Paused { session_id, .. }
            | SessionEvent::Resumed { session_id, .. }
            | SessionEvent::Interrupted { session_id, .. } => session_id,
            SessionEvent::Completed { summary } | SessionEvent::Ended { summary } => {
                &summary.session_id
            }
        }
    }

    /// Event type identifier, e.g. `session:phase_changed`.
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Started { .. } => "session:started",
            SessionEvent::PhaseChanged { .. } => "session:phase_changed",
            SessionEvent::Paused { .. } => "session:paused",
            SessionEvent::Resumed { .. } => "session:resumed",
            SessionEvent::Interrupted { .. } => "session:interrupted",
            SessionEvent::Completed { .. } => "session:completed",
            SessionEvent::Ended { .. } => "session:ended",
        }
    }
}

/// A broadcast bus for session events.
///
/// Uses a tokio broadcast channel internally, allowing multiple consumers to
/// receive the same events concurrently.
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a new EventBus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new EventBus with specified capacity.
    ///
    /// The capacity determines how many events can be buffered before slow
    /// subscribers start missing events (experiencing lag).
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// If there are no subscribers, the event is dropped and 0 is returned.
    pub fn emit(&self, event: SessionEvent) -> usize {
        log::debug!("{} {}", event.event_type(), event.session_id());
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all events on this bus.
    ///
    /// Past events are not delivered to new subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Get the current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

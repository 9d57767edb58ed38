//! Per-session timer tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::registry::SessionEntry;
use super::state::{Advance, Session};
use crate::clock::Clock;
use crate::event_bus::{EventBus, SessionEvent};

/// Catch `session` up to `now` and describe what changed.
///
/// Shared by the timer task and by caller operations, so a poll never sees a
/// session the timer simply hasn't reached yet. A structural fault is logged
/// and the session is forced to a terminal state.
pub(crate) fn catch_up(session: &mut Session, now: DateTime<Utc>) -> Option<SessionEvent> {
    match session.advance(now) {
        Ok(Advance::PhaseChanged { phase_index, phase }) => {
            log::debug!("Session {} entered phase {} ({})", session.id, phase_index, phase);
            Some(SessionEvent::PhaseChanged {
                session_id: session.id.clone(),
                user_id: session.user_id.clone(),
                phase_index,
                phase,
            })
        }
        Ok(Advance::Completed) => {
            log::info!("Session {} completed", session.id);
            Some(SessionEvent::Completed {
                summary: session.summary(now),
            })
        }
        Ok(Advance::Unchanged | Advance::Paused | Advance::Terminal) => None,
        Err(e) => {
            log::error!("Session {} timer failed, shutting it down: {}", session.id, e);
            session.fail(now);
            Some(SessionEvent::Completed {
                summary: session.summary(now),
            })
        }
    }
}

/// Start the timer task for one session.
///
/// Wakes every `tick`, holds the session lock only while advancing, and exits
/// once the session is terminal or the entry's cancellation token fires.
pub(crate) fn spawn_session_timer(
    runtime: &Handle,
    entry: Arc<SessionEntry>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    tick: Duration,
) -> JoinHandle<()> {
    let cancel = entry.cancellation();
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("Timer for session {} cancelled", entry.id);
                    break;
                }
                _ = ticker.tick() => {}
            }

            let (event, finished) = {
                let mut session = entry.lock();
                let event = catch_up(&mut session, clock.now());
                (event, session.state.is_terminal())
            };

            if let Some(event) = event {
                events.emit(event);
            }
            if finished {
                log::debug!("Timer for session {} exiting", entry.id);
                break;
            }
        }
    })
}

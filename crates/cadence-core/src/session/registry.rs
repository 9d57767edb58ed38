//! The session registry.
//!
//! One mutex guards the id map and the per-user index together, so the
//! single-live-session check and the insert happen in one critical section.
//! Each session then has its own mutex, so unrelated sessions never contend.
//!
//! Lock order is always registry, then session. Timer workers hold an
//! `Arc<SessionEntry>` and only ever take the session lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::{Session, SessionId, UserId};
use crate::error::{EngineError, Result};

/// A registered session plus the handles needed to stop its timer.
pub(crate) struct SessionEntry {
    pub id: SessionId,
    pub user_id: UserId,
    session: Mutex<Session>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            id: session.id.clone(),
            user_id: session.user_id.clone(),
            session: Mutex::new(session),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Take the per-session lock.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn attach_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Signal the timer to exit. It notices on its next wake-up at the latest.
    pub fn stop_worker(&self) {
        self.cancel.cancel();
    }

    /// Signal the timer and take its join handle, if it was started.
    pub fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.stop_worker();
        self.worker.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn is_live(&self) -> bool {
        self.lock().state.is_live()
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Arc<SessionEntry>>,
    active_by_user: HashMap<UserId, SessionId>,
}

/// All sessions known to one engine, live or retained terminal.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `session` unless its user already has a live one.
    ///
    /// An index entry pointing at a session that has since finished, or was
    /// removed, is stale and gets replaced.
    pub fn insert_exclusive(&self, session: Session) -> Result<Arc<SessionEntry>> {
        let mut inner = self.inner();

        if let Some(existing) = inner.active_by_user.get(&session.user_id) {
            if let Some(entry) = inner.sessions.get(existing) {
                if entry.is_live() {
                    return Err(EngineError::UserAlreadyActive {
                        user_id: session.user_id.clone(),
                        existing: existing.clone(),
                    });
                }
            }
        }

        let entry = Arc::new(SessionEntry::new(session));
        inner
            .active_by_user
            .insert(entry.user_id.clone(), entry.id.clone());
        inner.sessions.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    /// Look up a session owned by `user_id`.
    pub fn get(&self, session_id: &SessionId, user_id: &UserId) -> Result<Arc<SessionEntry>> {
        let inner = self.inner();
        let entry = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| EngineError::NotFound(session_id.clone()))?;
        authorize(entry, user_id)?;
        Ok(entry.clone())
    }

    /// The session the per-user index points at, if any. May be stale.
    pub fn indexed_for_user(&self, user_id: &UserId) -> Option<Arc<SessionEntry>> {
        let inner = self.inner();
        let id = inner.active_by_user.get(user_id)?;
        inner.sessions.get(id).cloned()
    }

    /// Remove a session owned by `user_id`, freeing the user's slot.
    pub fn remove(&self, session_id: &SessionId, user_id: &UserId) -> Result<Arc<SessionEntry>> {
        let mut inner = self.inner();
        match inner.sessions.get(session_id) {
            None => return Err(EngineError::NotFound(session_id.clone())),
            Some(entry) => authorize(entry, user_id)?,
        }

        let entry = inner
            .sessions
            .remove(session_id)
            .ok_or_else(|| EngineError::NotFound(session_id.clone()))?;
        clear_index(&mut inner, &entry);
        Ok(entry)
    }

    /// Free the user's slot if it still points at `entry`. The session stays retained.
    pub fn release(&self, entry: &SessionEntry) {
        clear_index(&mut self.inner(), entry);
    }

    /// Every retained session of one user, live or terminal.
    pub fn list_for_user(&self, user_id: &UserId) -> Vec<Arc<SessionEntry>> {
        self.inner()
            .sessions
            .values()
            .filter(|entry| &entry.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Drop terminal sessions that finished at or before `cutoff`.
    pub fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Vec<Arc<SessionEntry>> {
        let mut inner = self.inner();
        let expired: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|entry| {
                let session = entry.lock();
                session.state.is_terminal()
                    && session.finished_at.map_or(true, |finished| finished <= cutoff)
            })
            .map(|entry| entry.id.clone())
            .collect();

        let mut purged = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = inner.sessions.remove(&id) {
                clear_index(&mut inner, &entry);
                purged.push(entry);
            }
        }
        purged
    }

    /// Every entry, for shutdown.
    pub fn drain(&self) -> Vec<Arc<SessionEntry>> {
        let mut inner = self.inner();
        inner.active_by_user.clear();
        inner.sessions.drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.inner().sessions.len()
    }
}

fn authorize(entry: &SessionEntry, user_id: &UserId) -> Result<()> {
    if &entry.user_id != user_id {
        return Err(EngineError::Unauthorized {
            session_id: entry.id.clone(),
            user_id: user_id.clone(),
        });
    }
    Ok(())
}

fn clear_index(inner: &mut Inner, entry: &SessionEntry) {
    if inner.active_by_user.get(&entry.user_id) == Some(&entry.id) {
        inner.active_by_user.remove(&entry.user_id);
    }
}

//! In-memory session registry behind the store lock.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::persist::RecordDir;
use crate::error::StoreError;
use crate::models::{AssistantState, Session, SessionId, SessionState};

/// Result of asking the store to begin an assistant transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The transition was recorded; the caller now owns carrying it out.
    Began,
    /// Nothing to do; the assistant is already in (or moving to) this state.
    Unchanged(AssistantState),
}

/// A session id and directory reserved for a create that has not reached the host yet.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: SessionId,
    pub name: String,
    pub dir: PathBuf,
}

#[derive(Debug, Default)]
struct Registry {
    sessions: BTreeMap<SessionId, Session>,
    /// Last id handed out; ids are never reused within one store lifetime.
    last_id: u32,
    /// Names held by in-flight creates.
    reserved: Vec<(SessionId, String)>,
}

impl Registry {
    fn name_taken(&self, name: &str, except: Option<&SessionId>) -> bool {
        self.sessions
            .values()
            .filter(|s| s.state.is_live() && Some(&s.id) != except)
            .any(|s| s.name.eq_ignore_ascii_case(name))
            || self
                .reserved
                .iter()
                .any(|(_, reserved)| reserved.eq_ignore_ascii_case(name))
    }

    fn get_mut(&mut self, id: &SessionId) -> Result<&mut Session, StoreError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// Durable registry of session metadata.
///
/// Every mutation takes the store lock for the in-memory change plus the record write,
/// never across terminal I/O.
#[derive(Debug)]
pub struct SessionStore {
    inner: Mutex<Registry>,
    records: RecordDir,
}

impl SessionStore {
    /// Open the store rooted at `base_dir`, loading persisted records.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let records = RecordDir::new(base_dir);
        let loaded = records.load_all()?;

        let mut registry = Registry::default();
        for record in loaded {
            if !record.state.is_live() {
                debug!(id = %record.id, "skipping terminated record");
                continue;
            }
            let session = Session::from_record(record);
            registry.sessions.insert(session.id.clone(), session);
        }
        let highest_record = registry.sessions.keys().map(SessionId::number).max().unwrap_or(0);
        registry.last_id = highest_record.max(records.highest_allocated()?);

        info!(
            sessions = registry.sessions.len(),
            base = %records.base().display(),
            "session store opened"
        );
        Ok(Self {
            inner: Mutex::new(registry),
            records,
        })
    }

    /// Allocate an id, validate the name and create the session directory.
    ///
    /// The name defaults to `session-<n>`. The reservation must be followed by either
    /// [`insert`](Self::insert) or [`discard`](Self::discard).
    pub fn prepare(&self, name: Option<&str>) -> Result<Reservation, StoreError> {
        let mut registry = self.inner.lock();
        let next = registry.last_id + 1;
        if next > SessionId::MAX {
            return Err(StoreError::Exhausted);
        }
        let id = SessionId::from_number(next);
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| format!("session-{next}"), ToString::to_string);
        if registry.name_taken(&name, None) {
            return Err(StoreError::DuplicateName(name));
        }

        let dir = self.records.prepare(&id)?;
        registry.last_id = next;
        registry.reserved.push((id.clone(), name.clone()));
        Ok(Reservation { id, name, dir })
    }

    /// Commit a prepared session once its host process exists.
    pub fn insert(&self, session: Session) -> Result<(), StoreError> {
        let mut registry = self.inner.lock();
        registry.reserved.retain(|(id, _)| id != &session.id);
        self.records.save(&session.to_record())?;
        info!(id = %session.id, name = %session.name, "session recorded");
        registry.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Drop a reservation whose host process could not be created.
    pub fn discard(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let mut registry = self.inner.lock();
        registry.reserved.retain(|(id, _)| id != &reservation.id);
        self.records.discard(&reservation.id)
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.inner.lock().sessions.get(id).cloned()
    }

    /// Resolve an operator reference: an id (`2`, `002`) or a name, case-insensitively.
    /// Terminated sessions never resolve.
    pub fn resolve(&self, reference: &str) -> Option<Session> {
        let registry = self.inner.lock();
        let by_id = SessionId::parse(reference).and_then(|id| registry.sessions.get(&id));
        by_id
            .or_else(|| {
                registry
                    .sessions
                    .values()
                    .find(|s| s.name.eq_ignore_ascii_case(reference.trim()))
            })
            .filter(|s| s.state.is_live())
            .cloned()
    }

    /// All live sessions, ordered by id.
    pub fn list(&self) -> Vec<Session> {
        self.inner
            .lock()
            .sessions
            .values()
            .filter(|s| s.state.is_live())
            .cloned()
            .collect()
    }

    /// Whether `id` is recorded or held by an in-flight create.
    pub fn is_known(&self, id: &SessionId) -> bool {
        let registry = self.inner.lock();
        registry.sessions.contains_key(id) || registry.reserved.iter().any(|(r, _)| r == id)
    }

    /// Most recently active session in `active` state.
    pub fn most_recent_active(&self) -> Option<SessionId> {
        self.inner
            .lock()
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Active)
            .max_by_key(|s| s.last_active_at)
            .map(|s| s.id.clone())
    }

    /// Sessions whose last activity is older than `cutoff`.
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<SessionId> {
        self.inner
            .lock()
            .sessions
            .values()
            .filter(|s| s.state.is_live() && s.last_active_at < cutoff)
            .map(|s| s.id.clone())
            .collect()
    }

    fn update<T>(
        &self,
        id: &SessionId,
        apply: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, StoreError> {
        let mut registry = self.inner.lock();
        let session = registry.get_mut(id)?;
        let out = apply(session);
        self.records.save(&session.to_record())?;
        Ok(out)
    }

    pub fn set_state(&self, id: &SessionId, state: SessionState) -> Result<Session, StoreError> {
        self.update(id, |s| {
            s.state = state;
            s.clone()
        })
    }

    /// Rename a session; names stay unique among live sessions.
    pub fn rename(&self, id: &SessionId, name: &str) -> Result<Session, StoreError> {
        let name = name.trim();
        let mut registry = self.inner.lock();
        if registry.name_taken(name, Some(id)) {
            return Err(StoreError::DuplicateName(name.to_string()));
        }
        let session = registry.get_mut(id)?;
        session.name = name.to_string();
        self.records.save(&session.to_record())?;
        Ok(session.clone())
    }

    pub fn set_working_dir(&self, id: &SessionId, dir: PathBuf) -> Result<Session, StoreError> {
        self.update(id, |s| {
            s.working_dir = dir;
            s.clone()
        })
    }

    /// Record a successful command execution.
    ///
    /// The record is rewritten without an fsync; only the activity timestamp changed.
    pub fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut registry = self.inner.lock();
        let session = registry.get_mut(id)?;
        session.last_active_at = Utc::now();
        self.records.save_unsynced(&session.to_record())
    }

    /// Remove a session for good: it becomes terminated and its record is deleted.
    pub fn remove(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let mut registry = self.inner.lock();
        let Some(mut session) = registry.sessions.remove(id) else {
            return Ok(None);
        };
        session.state = SessionState::Terminated;
        session.assistant = AssistantState::Stopped;
        self.records.remove(id)?;
        info!(id = %id, "session removed from store");
        Ok(Some(session))
    }

    /// Move the assistant to `starting` unless it is already up or stopping.
    pub fn begin_assistant_start(&self, id: &SessionId) -> Result<Transition, StoreError> {
        let mut registry = self.inner.lock();
        let session = registry.get_mut(id)?;
        match session.assistant {
            AssistantState::Stopped => {
                session.assistant = AssistantState::Starting;
                Ok(Transition::Began)
            }
            current => Ok(Transition::Unchanged(current)),
        }
    }

    /// Move the assistant to `stopping` unless it is already stopped or stopping.
    pub fn begin_assistant_stop(&self, id: &SessionId) -> Result<Transition, StoreError> {
        let mut registry = self.inner.lock();
        let session = registry.get_mut(id)?;
        match session.assistant {
            AssistantState::Starting | AssistantState::Running => {
                session.assistant = AssistantState::Stopping;
                Ok(Transition::Began)
            }
            current => Ok(Transition::Unchanged(current)),
        }
    }

    /// Set the assistant state directly; a removed session is ignored.
    pub fn set_assistant(&self, id: &SessionId, state: AssistantState) {
        if let Some(session) = self.inner.lock().sessions.get_mut(id) {
            session.assistant = state;
        }
    }
}

//! In-memory host used by tests.
//!
//! Records every call and tracks how many commands are in flight per session, so tests
//! can assert on serialisation and overlap.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CaptureProfile, HostHandle, SessionHost};
use crate::error::HostError;
use crate::models::SessionId;

#[derive(Debug, Default)]
struct FakeState {
    live: BTreeSet<SessionId>,
    created: Vec<SessionId>,
    sent: Vec<(SessionId, String)>,
    keys: Vec<(SessionId, Vec<String>)>,
    destroyed: Vec<SessionId>,
    in_flight: HashMap<SessionId, usize>,
    max_in_flight: HashMap<SessionId, usize>,
    global_in_flight: usize,
    max_global_in_flight: usize,
    unavailable: bool,
    last_profile: Option<CaptureProfile>,
}

/// Fake [`SessionHost`].
///
/// `send` replies `out: <command>` after `delay`. Commands starting with `slow` time out
/// with partial output.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
    delay: Duration,
    create_delay: Duration,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// `create` takes `delay` before the process exists.
    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Self::default()
        }
    }

    /// Simulate a host process created outside the bot.
    pub fn spawn_external(&self, id: &SessionId) {
        self.state.lock().live.insert(id.clone());
    }

    /// Simulate a host process dying on its own.
    pub fn kill_external(&self, id: &SessionId) {
        self.state.lock().live.remove(id);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn is_live(&self, id: &SessionId) -> bool {
        self.state.lock().live.contains(id)
    }

    pub fn created(&self) -> Vec<SessionId> {
        self.state.lock().created.clone()
    }

    /// Commands sent, in execution order.
    pub fn sent(&self) -> Vec<(SessionId, String)> {
        self.state.lock().sent.clone()
    }

    pub fn keys(&self) -> Vec<(SessionId, Vec<String>)> {
        self.state.lock().keys.clone()
    }

    pub fn destroyed(&self) -> Vec<SessionId> {
        self.state.lock().destroyed.clone()
    }

    /// Highest number of simultaneous commands seen on one session.
    pub fn max_in_flight(&self, id: &SessionId) -> usize {
        self.state.lock().max_in_flight.get(id).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous commands seen across all sessions.
    pub fn max_global_in_flight(&self) -> usize {
        self.state.lock().max_global_in_flight
    }

    pub fn last_profile(&self) -> Option<CaptureProfile> {
        self.state.lock().last_profile
    }

    fn check(&self, id: &SessionId) -> Result<(), HostError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(HostError::HostUnavailable("fake host is down".into()));
        }
        if state.live.contains(id) {
            Ok(())
        } else {
            Err(HostError::SessionNotFound(id.to_string()))
        }
    }
}

#[async_trait]
impl SessionHost for FakeHost {
    async fn create(&self, id: &SessionId, _working_dir: &Path) -> Result<HostHandle, HostError> {
        tokio::time::sleep(self.create_delay).await;
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(HostError::HostUnavailable("fake host is down".into()));
        }
        if !state.live.insert(id.clone()) {
            return Err(HostError::DuplicateSession(id.to_string()));
        }
        state.created.push(id.clone());
        Ok(HostHandle::new(id.clone(), format!("fake-{id}")))
    }

    async fn send(
        &self,
        id: &SessionId,
        command: &str,
        profile: &CaptureProfile,
    ) -> Result<String, HostError> {
        self.check(id)?;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.last_profile = Some(*profile);
            let count = state.in_flight.entry(id.clone()).or_default();
            *count += 1;
            let max = state.max_in_flight.entry(id.clone()).or_default();
            *max = (*max).max(*count);
            state.global_in_flight += 1;
            state.max_global_in_flight = state.max_global_in_flight.max(state.global_in_flight);
        }

        tokio::time::sleep(self.delay).await;

        let mut state = self.state.lock();
        if let Some(count) = state.in_flight.get_mut(id) {
            *count -= 1;
        }
        state.global_in_flight -= 1;
        state.sent.push((id.clone(), command.to_string()));

        if command.starts_with("slow") {
            return Err(HostError::Timeout {
                partial: format!("partial: {command}"),
                after: profile.hard_timeout,
            });
        }
        Ok(format!("out: {command}"))
    }

    async fn send_keys(&self, id: &SessionId, keys: &[String]) -> Result<(), HostError> {
        self.check(id)?;
        self.state.lock().keys.push((id.clone(), keys.to_vec()));
        Ok(())
    }

    async fn history(&self, id: &SessionId, lines: usize) -> Result<String, HostError> {
        self.check(id)?;
        let state = self.state.lock();
        let history: Vec<&str> = state
            .sent
            .iter()
            .filter(|(sid, _)| sid == id)
            .map(|(_, cmd)| cmd.as_str())
            .collect();
        let skip = history.len().saturating_sub(lines);
        Ok(history[skip..].join("\n"))
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(HostError::HostUnavailable("fake host is down".into()));
        }
        state.live.remove(id);
        state.destroyed.push(id.clone());
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<SessionId>, HostError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(HostError::HostUnavailable("fake host is down".into()));
        }
        Ok(state.live.iter().cloned().collect())
    }
}

//! Launcher stand-in for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::launcher::{AssistantHandle, AssistantLauncher, AssistantProbe};
use crate::error::{AssistantError, HostError};
use crate::models::SessionId;

#[derive(Debug, Default)]
pub struct FakeLauncher {
    spawns: AtomicUsize,
    failure: Option<String>,
    ignore_stop: bool,
    spawn_delay: Duration,
    probe_unavailable: AtomicBool,
    exits: Mutex<HashMap<SessionId, i32>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every spawn fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Stop keys have no effect.
    pub fn ignoring_stop() -> Self {
        Self {
            ignore_stop: true,
            ..Self::default()
        }
    }

    /// Spawns take `delay` before reporting ready.
    pub fn slow(delay: Duration) -> Self {
        Self {
            spawn_delay: delay,
            ..Self::default()
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Status probes fail as if the terminal host were down.
    pub fn set_probe_unavailable(&self, unavailable: bool) {
        self.probe_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the assistant in `session` exit with `code`.
    pub fn exit(&self, session: &SessionId, code: i32) {
        self.exits.lock().insert(session.clone(), code);
    }
}

#[async_trait]
impl AssistantLauncher for FakeLauncher {
    async fn spawn(
        &self,
        session: &SessionId,
        _working_dir: &Path,
    ) -> Result<AssistantHandle, AssistantError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.spawn_delay).await;
        if let Some(reason) = &self.failure {
            return Err(AssistantError::SpawnFailed(reason.clone()));
        }
        self.exits.lock().remove(session);
        Ok(AssistantHandle::new(session.clone(), "fake"))
    }

    async fn signal_stop(&self, handle: &AssistantHandle) -> Result<(), AssistantError> {
        if !self.ignore_stop {
            self.exits.lock().insert(handle.session().clone(), 0);
        }
        Ok(())
    }

    async fn probe_status(&self, handle: &AssistantHandle) -> Result<AssistantProbe, AssistantError> {
        if self.probe_unavailable.load(Ordering::SeqCst) {
            return Err(HostError::HostUnavailable("tmux is not running".to_string()).into());
        }
        Ok(self
            .exits
            .lock()
            .get(handle.session())
            .map_or(AssistantProbe::Running, |code| AssistantProbe::Exited(Some(*code))))
    }
}

//! Per-session assistant lifecycle: `stopped → starting → running → stopping → stopped`.
//!
//! Idempotency is decided at acceptance, under the store lock, by [`accept_start`] and
//! [`accept_stop`]. The slow part (spawning, waiting for exit) runs later on the
//! session's worker.
//!
//! [`accept_start`]: AssistantSupervisor::accept_start
//! [`accept_stop`]: AssistantSupervisor::accept_stop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use super::launcher::{AssistantHandle, AssistantLauncher, AssistantProbe};
use crate::error::BotError;
use crate::models::{AssistantState, Session, SessionId};
use crate::store::{SessionStore, Transition};

/// What a status check found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantStatus {
    pub state: AssistantState,
    /// Set when this check discovered that the process had exited.
    pub exited: Option<Option<i32>>,
}

/// Outcome of a stop request carried out on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The assistant ignored the stop keys and is still running.
    StillRunning,
}

pub struct AssistantSupervisor {
    store: Arc<SessionStore>,
    launcher: Arc<dyn AssistantLauncher>,
    handles: Mutex<HashMap<SessionId, AssistantHandle>>,
    stop_timeout: Duration,
    poll_interval: Duration,
}

impl AssistantSupervisor {
    pub fn new(
        store: Arc<SessionStore>,
        launcher: Arc<dyn AssistantLauncher>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            store,
            launcher,
            handles: Mutex::new(HashMap::new()),
            stop_timeout,
            poll_interval: Duration::from_millis(200),
        }
    }

    /// Record the move to `starting`, or report the state that makes the start a no-op.
    pub fn accept_start(&self, id: &SessionId) -> Result<Transition, BotError> {
        Ok(self.store.begin_assistant_start(id)?)
    }

    /// Record the move to `stopping`, or report the state that makes the stop a no-op.
    pub fn accept_stop(&self, id: &SessionId) -> Result<Transition, BotError> {
        Ok(self.store.begin_assistant_stop(id)?)
    }

    /// Spawn the assistant for a session already moved to `starting`.
    ///
    /// Failure leaves the state at `stopped`; nothing is retried.
    pub async fn start(&self, session: &Session) -> Result<(), BotError> {
        match self.launcher.spawn(&session.id, &session.working_dir).await {
            Ok(handle) => {
                self.handles.lock().insert(session.id.clone(), handle);
                self.store.set_assistant(&session.id, AssistantState::Running);
                info!(id = %session.id, "assistant running");
                Ok(())
            }
            Err(err) => {
                self.store.set_assistant(&session.id, AssistantState::Stopped);
                warn!(id = %session.id, error = %err, "assistant failed to start");
                Err(err.into())
            }
        }
    }

    /// Stop the assistant for a session already moved to `stopping`.
    pub async fn stop(&self, id: &SessionId) -> Result<StopOutcome, BotError> {
        let Some(handle) = self.handles.lock().get(id).cloned() else {
            self.store.set_assistant(id, AssistantState::Stopped);
            return Ok(StopOutcome::Stopped);
        };

        if let Err(err) = self.launcher.signal_stop(&handle).await {
            self.store.set_assistant(id, AssistantState::Running);
            return Err(err.into());
        }

        let deadline = Instant::now() + self.stop_timeout;
        loop {
            let probe = match self.launcher.probe_status(&handle).await {
                Ok(probe) => probe,
                Err(err) => {
                    self.store.set_assistant(id, AssistantState::Running);
                    warn!(%id, error = %err, "could not confirm the assistant stopped");
                    return Err(err.into());
                }
            };
            match probe {
                AssistantProbe::Exited(code) => {
                    self.handles.lock().remove(id);
                    self.store.set_assistant(id, AssistantState::Stopped);
                    info!(%id, ?code, "assistant stopped");
                    return Ok(StopOutcome::Stopped);
                }
                AssistantProbe::Running if Instant::now() >= deadline => {
                    self.store.set_assistant(id, AssistantState::Running);
                    warn!(%id, "assistant ignored stop keys");
                    return Ok(StopOutcome::StillRunning);
                }
                AssistantProbe::Running => sleep(self.poll_interval).await,
            }
        }
    }

    /// Probe a running assistant and fold an unexpected exit into `stopped`.
    pub async fn refresh(&self, id: &SessionId) -> Result<AssistantStatus, BotError> {
        let state = self
            .store
            .get(id)
            .map(|s| s.assistant)
            .ok_or_else(|| BotError::SessionNotFound(id.to_string()))?;
        let handle = self.handles.lock().get(id).cloned();

        let (AssistantState::Running, Some(handle)) = (state, handle) else {
            return Ok(AssistantStatus {
                state,
                exited: None,
            });
        };

        match self.launcher.probe_status(&handle).await? {
            AssistantProbe::Running => Ok(AssistantStatus {
                state,
                exited: None,
            }),
            AssistantProbe::Exited(code) => {
                self.handles.lock().remove(id);
                self.store.set_assistant(id, AssistantState::Stopped);
                info!(%id, ?code, "assistant exited on its own");
                Ok(AssistantStatus {
                    state: AssistantState::Stopped,
                    exited: Some(code),
                })
            }
        }
    }

    /// Drop the handle of a session that no longer exists.
    pub fn forget(&self, id: &SessionId) {
        self.handles.lock().remove(id);
    }
}

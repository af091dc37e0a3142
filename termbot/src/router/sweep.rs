//! Reconciliation against the host and idle reaping.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::Router;
use crate::error::BotError;
use crate::models::SessionId;

/// What one reconciliation pass found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Store sessions whose host process was gone; now terminated.
    pub terminated: Vec<SessionId>,
    /// Live host processes with no store entry. Reported, never destroyed.
    pub orphans: Vec<SessionId>,
}

impl Router {
    /// Bring the store in line with the live host processes.
    pub async fn reconcile(&self) -> Result<ReconcileReport, BotError> {
        let shared = &self.shared;
        // Sessions created while listing are not judged against this snapshot.
        let started = Utc::now();
        let live: BTreeSet<SessionId> = shared.host.list_live().await?.into_iter().collect();

        let mut report = ReconcileReport::default();
        for session in shared.store.list() {
            if live.contains(&session.id) || session.created_at >= started {
                continue;
            }
            match shared.terminate(&session.id, None) {
                Ok(()) => report.terminated.push(session.id),
                // Killed concurrently.
                Err(BotError::SessionNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        report.orphans = live
            .into_iter()
            .filter(|id| !shared.store.is_known(id))
            .collect();
        *shared.orphans.lock() = report.orphans.iter().cloned().collect();

        if !report.terminated.is_empty() || !report.orphans.is_empty() {
            info!(
                terminated = ?report.terminated,
                orphans = ?report.orphans,
                "reconciled sessions with host"
            );
        }
        Ok(report)
    }

    /// Terminate sessions idle longer than the configured timeout.
    ///
    /// Termination is queued behind any work already accepted for the session.
    pub fn reap_idle(&self) -> Vec<SessionId> {
        let Some(timeout) = self.shared.settings.idle_timeout else {
            return Vec::new();
        };
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };

        let mut reaped = Vec::new();
        for id in self.shared.store.idle_since(Utc::now() - timeout) {
            match self.shared.terminate(&id, None) {
                Ok(()) => {
                    info!(%id, "idle session reaped");
                    reaped.push(id);
                }
                Err(err) => warn!(%id, error = %err, "could not reap idle session"),
            }
        }
        reaped
    }
}

/// Run reconciliation and reaping every `period` until the runtime shuts down.
pub fn spawn_sweeper(router: Router, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; startup recovery already reconciled.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = router.reconcile().await {
                warn!(error = %err, "reconciliation failed");
            }
            router.reap_idle();
        }
    })
}

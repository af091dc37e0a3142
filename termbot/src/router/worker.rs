//! Per-session workers.
//!
//! Each session gets one unbounded queue drained by one task, so commands against a
//! session run strictly one at a time and replies come back in acceptance order.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn, Instrument};

use super::reply;
use super::Shared;
use crate::assistant::StopOutcome;
use crate::error::{BotError, HostError};
use crate::host::{shell_quote, typed_lines};
use crate::models::{AssistantState, Session, SessionId};
use crate::security::Verdict;

/// Work executed against one session.
#[derive(Debug)]
pub(super) enum JobKind {
    /// Raw shell command; authorised on the worker so denials keep their place in line.
    Command(String),
    Keys(Vec<String>),
    ChangeDir(PathBuf),
    AssistantStart,
    AssistantStop,
    /// Destroy the host process and retire the worker.
    Destroy,
}

#[derive(Debug)]
pub(super) struct Job {
    pub kind: JobKind,
    /// Session as it was when the job was accepted.
    pub session: Session,
    pub reply: Option<oneshot::Sender<String>>,
}

/// Sending side of a worker queue.
#[derive(Debug, Clone)]
pub(super) struct WorkerHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl WorkerHandle {
    /// Queue a job; hands it back if the worker has already exited.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|err| err.0)
    }
}

pub(super) fn spawn(shared: Arc<Shared>, id: SessionId) -> WorkerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let span = tracing::info_span!("worker", session = %id);

    tokio::spawn(
        async move {
            debug!("worker started");
            while let Some(job) = rx.recv().await {
                let retire = matches!(job.kind, JobKind::Destroy);
                let text = execute(&shared, &job.session, job.kind).await;
                if let Some(reply) = job.reply {
                    let _ = reply.send(text);
                }
                if retire {
                    break;
                }
            }
            debug!("worker stopped");
        }
        .instrument(span),
    );

    WorkerHandle { tx }
}

async fn execute(shared: &Shared, session: &Session, kind: JobKind) -> String {
    let id = &session.id;
    match kind {
        JobKind::Command(text) => run_command(shared, session, &text).await,

        JobKind::Keys(keys) => {
            // Arguments tmux does not know as key names are typed as text.
            for line in typed_lines(&keys) {
                if let Verdict::Deny(reason) = shared.policy.evaluate(&line) {
                    warn!(%id, "keys denied by security policy");
                    return reply::error(&BotError::SecurityDenied(reason));
                }
            }
            match shared.host.send_keys(id, &keys).await {
                Ok(()) => {
                    shared.touch(id);
                    format!("Sent keys: {}", keys.join(" "))
                }
                Err(err) => reply::error(&err.into()),
            }
        }

        JobKind::ChangeDir(dir) => {
            let line = format!("cd {}", shell_quote(&dir.to_string_lossy()));
            match shared.host.send(id, &line, &shared.settings.shell).await {
                Ok(_) => match shared.store.set_working_dir(id, dir.clone()) {
                    Ok(_) => {
                        info!(%id, dir = %dir.display(), "working directory changed");
                        format!("Working directory changed to: {}", dir.display())
                    }
                    Err(err) => reply::error(&err.into()),
                },
                Err(err) => reply::error(&err.into()),
            }
        }

        JobKind::AssistantStart => {
            // Pick up a working-directory change queued ahead of this job.
            let current = shared.store.get(id).unwrap_or_else(|| session.clone());
            match shared.supervisor.start(&current).await {
                Ok(()) => format!(
                    "Assistant started in session {}\nWorking directory: {}",
                    current.label(),
                    current.working_dir.display()
                ),
                Err(err) => reply::error(&err),
            }
        }

        JobKind::AssistantStop => match shared.supervisor.stop(id).await {
            Ok(StopOutcome::Stopped) => format!("Assistant stopped in session {}", session.label()),
            Ok(StopOutcome::StillRunning) => format!(
                "Assistant is still running in session {}. Send /keys C-c or retry /claude-stop.",
                session.label()
            ),
            Err(err) => reply::error(&err),
        },

        JobKind::Destroy => {
            shared.supervisor.forget(id);
            shared.workers.lock().remove(id);
            match shared.host.destroy(id).await {
                Ok(()) => format!("Session {} terminated", session.label()),
                Err(err) => {
                    warn!(%id, error = %err, "destroy failed");
                    reply::error(&err.into())
                }
            }
        }
    }
}

async fn run_command(shared: &Shared, session: &Session, text: &str) -> String {
    let id = &session.id;
    if let Verdict::Deny(reason) = shared.policy.evaluate(text) {
        warn!(%id, "command denied by security policy");
        return reply::error(&BotError::SecurityDenied(reason));
    }

    let assistant = match shared.supervisor.refresh(id).await {
        Ok(status) => status.state,
        // Already removed from the store; the command still runs as a shell command.
        Err(BotError::SessionNotFound(_)) => AssistantState::Stopped,
        Err(err) => return reply::error(&err),
    };
    let profile = if assistant == AssistantState::Running {
        &shared.settings.assistant
    } else {
        &shared.settings.shell
    };

    debug!(%id, command = %text, assistant = %assistant, "executing");
    match shared.host.send(id, text, profile).await {
        Ok(out) => {
            shared.touch(id);
            reply::output(&out)
        }
        Err(HostError::Timeout { partial, after }) => {
            warn!(%id, after_secs = after.as_secs(), "command timed out");
            reply::timed_out(&partial, after)
        }
        Err(err) => reply::error(&err.into()),
    }
}

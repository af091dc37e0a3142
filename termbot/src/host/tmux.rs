//! tmux-backed session host.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::capture::{extract_output, wait_for_quiescence};
use super::{CaptureProfile, HostHandle, SessionHost};
use crate::error::HostError;
use crate::models::SessionId;
use crate::process::{is_not_found, spawn_process, ProcessOptions, ProcessResult};

/// Bound on any single tmux invocation.
const TMUX_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin wrapper over the tmux command line.
#[derive(Debug, Clone)]
pub struct Tmux {
    binary: String,
    prefix: String,
}

/// How a failed tmux call should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    NoServer,
    NoSession,
    Duplicate,
    Other,
}

fn classify_failure(stderr: &str) -> Failure {
    let stderr = stderr.to_ascii_lowercase();
    if stderr.contains("no server running") || stderr.contains("error connecting to") {
        Failure::NoServer
    } else if stderr.contains("can't find session")
        || stderr.contains("session not found")
        || stderr.contains("can't find pane")
    {
        Failure::NoSession
    } else if stderr.contains("duplicate session") {
        Failure::Duplicate
    } else {
        Failure::Other
    }
}

impl Tmux {
    pub fn new(binary: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            prefix: prefix.into(),
        }
    }

    /// tmux session name for a session id.
    pub fn target(&self, id: &SessionId) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Reverse of [`target`](Self::target); `None` for sessions this bot does not own.
    pub fn id_from_target(&self, name: &str) -> Option<SessionId> {
        let rest = name.strip_prefix(&self.prefix)?;
        SessionId::parse(rest).filter(|id| id.as_str() == rest)
    }

    async fn run<I, S>(&self, args: I) -> Result<ProcessResult, HostError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = ProcessOptions::new(&self.binary)
            .args(args)
            .timeout(TMUX_CALL_TIMEOUT);
        debug!(command = %options.display(), "tmux");

        let result = spawn_process(options).await.map_err(|err| {
            if is_not_found(&err) {
                HostError::HostUnavailable(format!("{} is not installed", self.binary))
            } else {
                HostError::HostUnavailable(format!("{err:#}"))
            }
        })?;
        if result.timed_out {
            return Err(HostError::HostUnavailable(format!(
                "{} did not respond within {}s",
                self.binary,
                TMUX_CALL_TIMEOUT.as_secs()
            )));
        }
        Ok(result)
    }

    /// Run and turn a non-zero exit into a typed error for session `id`.
    async fn run_checked<I, S>(&self, id: &SessionId, args: I) -> Result<ProcessResult, HostError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let result = self.run(args).await?;
        if result.success() {
            return Ok(result);
        }
        let stderr = result.stderr_string();
        Err(match classify_failure(&stderr) {
            Failure::NoServer | Failure::NoSession => HostError::SessionNotFound(id.to_string()),
            Failure::Duplicate => HostError::DuplicateSession(id.to_string()),
            Failure::Other => HostError::CommandFailed(stderr.trim().to_string()),
        })
    }

    /// `tmux -V`.
    pub async fn version(&self) -> Result<String, HostError> {
        let result = self.run(["-V"]).await?;
        if result.success() {
            Ok(result.stdout_string().trim().to_string())
        } else {
            Err(HostError::HostUnavailable(result.stderr_string()))
        }
    }

    pub async fn has_session(&self, id: &SessionId) -> Result<bool, HostError> {
        let target = format!("={}", self.target(id));
        let result = self.run(["has-session", "-t", target.as_str()]).await?;
        Ok(result.success())
    }

    pub async fn new_session(&self, id: &SessionId, working_dir: &Path) -> Result<(), HostError> {
        let target = self.target(id);
        let dir = working_dir.to_string_lossy().to_string();
        self.run_checked(
            id,
            ["new-session", "-d", "-s", target.as_str(), "-c", dir.as_str()],
        )
        .await?;
        Ok(())
    }

    /// Kill the tmux session; an already-missing one counts as success.
    pub async fn kill_session(&self, id: &SessionId) -> Result<(), HostError> {
        let target = format!("={}", self.target(id));
        match self.run_checked(id, ["kill-session", "-t", target.as_str()]).await {
            Ok(_) | Err(HostError::SessionNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Type `text` literally, then press Enter.
    pub async fn send_line(&self, id: &SessionId, text: &str) -> Result<(), HostError> {
        let target = self.target(id);
        self.run_checked(id, ["send-keys", "-t", target.as_str(), "-l", "--", text])
            .await?;
        self.run_checked(id, ["send-keys", "-t", target.as_str(), "Enter"])
            .await?;
        Ok(())
    }

    /// Send tmux key names such as `C-c` or `Escape`.
    pub async fn send_keys(&self, id: &SessionId, keys: &[String]) -> Result<(), HostError> {
        let target = self.target(id);
        let mut args = vec![
            "send-keys".to_string(),
            "-t".to_string(),
            target,
            "--".to_string(),
        ];
        args.extend(keys.iter().cloned());
        self.run_checked(id, args).await?;
        Ok(())
    }

    /// Visible pane plus `history` lines of scrollback, wrapped lines joined.
    pub async fn capture(&self, id: &SessionId, history: usize) -> Result<String, HostError> {
        let target = self.target(id);
        let start = format!("-{history}");
        let result = self
            .run_checked(
                id,
                ["capture-pane", "-p", "-J", "-t", target.as_str(), "-S", start.as_str()],
            )
            .await?;
        Ok(result.stdout_string())
    }

    /// Names of every tmux session; no server means none.
    pub async fn list_sessions(&self) -> Result<Vec<String>, HostError> {
        let result = self.run(["list-sessions", "-F", "#{session_name}"]).await?;
        if result.success() {
            return Ok(result
                .stdout
                .into_iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect());
        }
        let stderr = result.stderr_string();
        match classify_failure(&stderr) {
            Failure::NoServer => Ok(Vec::new()),
            _ => Err(HostError::CommandFailed(stderr.trim().to_string())),
        }
    }

    /// Foreground command of the session's pane, e.g. `bash` or `node`.
    pub async fn pane_command(&self, id: &SessionId) -> Result<String, HostError> {
        let target = self.target(id);
        let result = self
            .run_checked(
                id,
                ["display-message", "-p", "-t", target.as_str(), "#{pane_current_command}"],
            )
            .await?;
        Ok(result.stdout_string().trim().to_string())
    }
}

/// [`SessionHost`] backed by one detached tmux session per bot session.
#[derive(Debug, Clone)]
pub struct TmuxHost {
    tmux: Tmux,
}

impl TmuxHost {
    pub fn new(tmux: Tmux) -> Self {
        Self { tmux }
    }

    async fn ensure_live(&self, id: &SessionId) -> Result<(), HostError> {
        if self.tmux.has_session(id).await? {
            Ok(())
        } else {
            Err(HostError::SessionNotFound(id.to_string()))
        }
    }
}

#[async_trait]
impl SessionHost for TmuxHost {
    async fn create(&self, id: &SessionId, working_dir: &Path) -> Result<HostHandle, HostError> {
        if self.tmux.has_session(id).await? {
            return Err(HostError::DuplicateSession(id.to_string()));
        }
        self.tmux.new_session(id, working_dir).await?;
        let target = self.tmux.target(id);
        info!(%id, %target, dir = %working_dir.display(), "tmux session created");
        Ok(HostHandle::new(id.clone(), target))
    }

    async fn send(
        &self,
        id: &SessionId,
        command: &str,
        profile: &CaptureProfile,
    ) -> Result<String, HostError> {
        self.ensure_live(id).await?;
        self.tmux.send_line(id, command).await?;

        let snapshot = || self.tmux.capture(id, profile.history_lines);
        match wait_for_quiescence(snapshot, profile).await {
            Ok(screen) => Ok(extract_output(&screen, command, profile.max_output_lines)),
            Err(HostError::Timeout { partial, after }) => {
                warn!(%id, after_secs = after.as_secs(), "output did not settle");
                Err(HostError::Timeout {
                    partial: extract_output(&partial, command, profile.max_output_lines),
                    after,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn send_keys(&self, id: &SessionId, keys: &[String]) -> Result<(), HostError> {
        self.ensure_live(id).await?;
        self.tmux.send_keys(id, keys).await
    }

    async fn history(&self, id: &SessionId, lines: usize) -> Result<String, HostError> {
        let screen = self.tmux.capture(id, lines).await?;
        let mut kept: Vec<&str> = screen.lines().map(str::trim_end).collect();
        while kept.last().is_some_and(|l| l.is_empty()) {
            kept.pop();
        }
        let skip = kept.len().saturating_sub(lines);
        Ok(kept[skip..].join("\n"))
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), HostError> {
        self.tmux.kill_session(id).await?;
        info!(%id, "tmux session destroyed");
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<SessionId>, HostError> {
        let mut ids: Vec<SessionId> = self
            .tmux
            .list_sessions()
            .await?
            .iter()
            .filter_map(|name| self.tmux.id_from_target(name))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

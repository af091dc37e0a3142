//! Launching the AI coding assistant inside a session's terminal.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AssistantError, HostError};
use crate::host::{shell_quote, Tmux};
use crate::models::SessionId;

/// Opaque reference to a launched assistant process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantHandle {
    session: SessionId,
    nonce: String,
}

impl AssistantHandle {
    pub(crate) fn new(session: SessionId, nonce: impl Into<String>) -> Self {
        Self {
            session,
            nonce: nonce.into(),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }
}

/// Result of probing a launched assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantProbe {
    Running,
    /// Exited; the code is unknown when the whole terminal went away.
    Exited(Option<i32>),
}

/// Subprocess contract of the assistant.
#[async_trait]
pub trait AssistantLauncher: Send + Sync {
    /// Start the assistant in `working_dir` and wait for it to become ready.
    async fn spawn(
        &self,
        session: &SessionId,
        working_dir: &Path,
    ) -> Result<AssistantHandle, AssistantError>;

    /// Ask the assistant to exit. Does not wait for it.
    async fn signal_stop(&self, handle: &AssistantHandle) -> Result<(), AssistantError>;

    async fn probe_status(&self, handle: &AssistantHandle) -> Result<AssistantProbe, AssistantError>;
}

/// Options for launching the assistant.
#[derive(Debug, Clone)]
pub struct AssistantOptions {
    /// Executable name or path.
    pub executable: String,
    /// Extra arguments.
    pub args: Vec<String>,
    /// How long the assistant gets to reach a ready screen.
    pub ready_timeout: Duration,
    /// Answer the workspace trust prompt with Enter.
    pub accept_trust_prompt: bool,
    /// Key presses that make the assistant exit.
    pub stop_keys: Vec<String>,
    /// Delay between pane inspections.
    pub poll_interval: Duration,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            args: Vec::new(),
            ready_timeout: Duration::from_secs(8),
            accept_trust_prompt: true,
            stop_keys: vec!["C-c".to_string(), "C-c".to_string()],
            poll_interval: Duration::from_millis(250),
        }
    }
}

const SHELLS: &[&str] = &["bash", "zsh", "sh", "fish", "dash", "ksh", "tcsh", "csh"];

fn is_shell(command: &str) -> bool {
    SHELLS.contains(&command.trim().trim_start_matches('-'))
}

fn is_trust_prompt(screen: &str) -> bool {
    let screen = screen.to_ascii_lowercase();
    screen.contains("do you trust") || screen.contains("trust the files")
}

fn exit_marker(nonce: &str) -> String {
    format!("__TERMBOT_EXIT_{nonce}__")
}

/// Exit code printed after the assistant returned, if it has.
fn exit_code(screen: &str, nonce: &str) -> Option<i32> {
    let pattern = format!(r"{}=(\d+)", regex::escape(&exit_marker(nonce)));
    let re = Regex::new(&pattern).ok()?;
    re.captures_iter(screen)
        .last()
        .and_then(|caps| caps[1].parse().ok())
}

/// Build the line typed into the pane: run the assistant, then print its exit status.
fn launch_line(options: &AssistantOptions, working_dir: &Path, nonce: &str) -> String {
    let mut line = format!(
        "cd {} && {}",
        shell_quote(&working_dir.to_string_lossy()),
        shell_quote(&options.executable)
    );
    for arg in &options.args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line.push_str(&format!("; echo {}=$?", exit_marker(nonce)));
    line
}

/// Runs the assistant in the session's own tmux pane.
#[derive(Debug, Clone)]
pub struct TmuxLauncher {
    tmux: Tmux,
    options: AssistantOptions,
}

impl TmuxLauncher {
    pub fn new(tmux: Tmux, options: AssistantOptions) -> Self {
        Self { tmux, options }
    }

    /// Wait until the assistant owns the pane and its screen has stopped changing.
    async fn wait_until_ready(&self, id: &SessionId, nonce: &str) -> Result<(), AssistantError> {
        let exe = &self.options.executable;
        let deadline = Instant::now() + self.options.ready_timeout;
        let mut trust_answered = !self.options.accept_trust_prompt;
        let mut last = String::new();

        loop {
            sleep(self.options.poll_interval).await;
            let screen = self.tmux.capture(id, 50).await?;

            if let Some(code) = exit_code(&screen, nonce) {
                return Err(AssistantError::SpawnFailed(format!(
                    "{exe} exited with code {code} before becoming ready"
                )));
            }
            if !trust_answered && is_trust_prompt(&screen) {
                debug!(%id, "answering workspace trust prompt");
                self.tmux.send_keys(id, &["Enter".to_string()]).await?;
                trust_answered = true;
                last.clear();
                continue;
            }

            let foreground = self.tmux.pane_command(id).await?;
            let owns_pane = !is_shell(&foreground);
            if owns_pane && screen == last {
                return Ok(());
            }
            last = screen;

            if Instant::now() >= deadline {
                if owns_pane {
                    warn!(%id, %foreground, "assistant still drawing at ready timeout, assuming ready");
                    return Ok(());
                }
                return Err(AssistantError::SpawnFailed(format!(
                    "{exe} did not start within {}s",
                    self.options.ready_timeout.as_secs()
                )));
            }
        }
    }

    async fn send_stop_keys(&self, id: &SessionId) -> Result<(), HostError> {
        for key in &self.options.stop_keys {
            self.tmux.send_keys(id, std::slice::from_ref(key)).await?;
            sleep(Duration::from_millis(200)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl AssistantLauncher for TmuxLauncher {
    async fn spawn(
        &self,
        session: &SessionId,
        working_dir: &Path,
    ) -> Result<AssistantHandle, AssistantError> {
        which::which(&self.options.executable).map_err(|_| {
            AssistantError::SpawnFailed(format!(
                "{} not found on PATH. Install it or set [assistant] executable in the config.",
                self.options.executable
            ))
        })?;

        let nonce = Uuid::now_v7().simple().to_string();
        let line = launch_line(&self.options, working_dir, &nonce);
        debug!(%session, %line, "launching assistant");
        self.tmux.send_line(session, &line).await?;

        if let Err(err) = self.wait_until_ready(session, &nonce).await {
            // Cancel the typed launch line so a late start cannot run untracked.
            if let Err(stop_err) = self.send_stop_keys(session).await {
                warn!(%session, error = %stop_err, "could not cancel launch");
            }
            return Err(err);
        }
        info!(%session, executable = %self.options.executable, "assistant ready");
        Ok(AssistantHandle::new(session.clone(), nonce))
    }

    async fn signal_stop(&self, handle: &AssistantHandle) -> Result<(), AssistantError> {
        Ok(self.send_stop_keys(handle.session()).await?)
    }

    async fn probe_status(&self, handle: &AssistantHandle) -> Result<AssistantProbe, AssistantError> {
        match self.tmux.capture(handle.session(), 500).await {
            Ok(screen) => Ok(exit_code(&screen, &handle.nonce)
                .map_or(AssistantProbe::Running, |code| AssistantProbe::Exited(Some(code)))),
            Err(HostError::SessionNotFound(_)) => Ok(AssistantProbe::Exited(None)),
            Err(err) => Err(err.into()),
        }
    }
}

//! Session host adapter: one persistent terminal process per session.
//!
//! [`SessionHost`] is the boundary to the multiplexer; [`TmuxHost`] is the production
//! implementation. The router only ever sees session ids and captured text.

mod capture;
#[cfg(test)]
pub mod fake;
mod keys;
mod tmux;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::HostError;
use crate::models::SessionId;

pub use keys::typed_lines;
pub use tmux::{Tmux, TmuxHost};

/// Quote `s` for a POSIX shell command line.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// How long to wait for output to settle after sending input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProfile {
    /// Output must stay unchanged this long to count as finished.
    pub idle_window: Duration,
    /// Upper bound on the whole wait.
    pub hard_timeout: Duration,
    /// Delay between pane snapshots.
    pub poll_interval: Duration,
    /// Scrollback lines included in each snapshot.
    pub history_lines: usize,
    /// Longest reply before head/tail truncation kicks in.
    pub max_output_lines: usize,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_millis(800),
            hard_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(150),
            history_lines: 200,
            max_output_lines: 40,
        }
    }
}

/// Opaque handle to a created host process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostHandle {
    id: SessionId,
    target: String,
}

impl HostHandle {
    pub(crate) fn new(id: SessionId, target: impl Into<String>) -> Self {
        Self {
            id,
            target: target.into(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Multiplexer-side name of the process.
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Capability contract of a persistent terminal host.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Start the host process for `id` in `working_dir`.
    async fn create(&self, id: &SessionId, working_dir: &Path) -> Result<HostHandle, HostError>;

    /// Write one command line and return the output once it settles.
    async fn send(
        &self,
        id: &SessionId,
        command: &str,
        profile: &CaptureProfile,
    ) -> Result<String, HostError>;

    /// Send raw key names (`C-c`, `Enter`) without waiting for output.
    async fn send_keys(&self, id: &SessionId, keys: &[String]) -> Result<(), HostError>;

    /// Recent scrollback, without sending anything.
    async fn history(&self, id: &SessionId, lines: usize) -> Result<String, HostError>;

    /// Terminate the host process. Destroying a missing process is not an error.
    async fn destroy(&self, id: &SessionId) -> Result<(), HostError>;

    /// Ids of every live host process carrying this bot's naming scheme.
    async fn list_live(&self) -> Result<Vec<SessionId>, HostError>;
}

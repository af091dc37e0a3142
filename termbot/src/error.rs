//! Error types for termbot.
//!
//! Each layer owns a small `thiserror` enum; [`BotError`] is the router-facing
//! taxonomy and its `Display` output is the reply the operator sees.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the session host (the terminal multiplexer).
#[derive(Error, Debug)]
pub enum HostError {
    /// The multiplexer binary is missing or its server cannot be reached.
    #[error("terminal host unavailable: {0}")]
    HostUnavailable(String),

    /// A live host process already exists for this session id.
    #[error("a terminal process already exists for session {0}")]
    DuplicateSession(String),

    /// No live host process for this session id.
    #[error("no terminal process for session {0}")]
    SessionNotFound(String),

    /// Output never went quiet within the hard timeout.
    #[error("no quiescence within {}s", .after.as_secs())]
    Timeout {
        /// Output captured before giving up.
        partial: String,
        /// The bound that elapsed.
        after: Duration,
    },

    /// The multiplexer ran but reported a failure.
    #[error("multiplexer command failed: {0}")]
    CommandFailed(String),
}

/// Failures of the assistant launcher.
#[derive(Error, Debug)]
pub enum AssistantError {
    /// The assistant could not be brought to a ready state.
    #[error("{0}")]
    SpawnFailed(String),

    /// Talking to the session host failed while driving the assistant.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Failures of the session store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A persisted record could not be parsed.
    #[error("session record {} is unreadable: {source}", .path.display())]
    Corrupt {
        /// Offending file.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure while reading or writing records.
    #[error("session store I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Another live session already carries this name.
    #[error("a session named \"{0}\" already exists")]
    DuplicateName(String),

    /// No session with this id.
    #[error("session {0} not found")]
    NotFound(String),

    /// All three-digit ids have been handed out.
    #[error("session ids exhausted")]
    Exhausted,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Every failure the router can report back to the operator.
#[derive(Error, Debug)]
pub enum BotError {
    /// Directive arguments could not be parsed.
    #[error("Invalid command: {0}")]
    ClassificationInvalid(String),

    /// The security policy vetoed a raw command.
    #[error("Command blocked for security: {0}")]
    SecurityDenied(String),

    /// An explicit session reference did not resolve.
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// No explicit target and no usable current session.
    #[error("No active session. Use /new-session to create one.")]
    NoActiveSession,

    /// Create conflict on id or name.
    #[error("Session {0} already exists")]
    DuplicateSession(String),

    /// The multiplexer could not be reached.
    #[error("Terminal host unavailable: {0}. Retry once it is back.")]
    HostUnavailable(String),

    /// No quiescence within the capture bound.
    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The assistant failed to reach a ready state.
    #[error("Failed to start the assistant: {0}")]
    AssistantSpawnFailed(String),

    /// Any other multiplexer failure.
    #[error("Command execution failed: {0}")]
    Execution(String),

    /// Session store failure.
    #[error("Session store error: {0}")]
    Store(StoreError),
}

impl From<HostError> for BotError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::HostUnavailable(msg) => Self::HostUnavailable(msg),
            HostError::DuplicateSession(id) => Self::DuplicateSession(id),
            HostError::SessionNotFound(id) => Self::SessionNotFound(id),
            HostError::Timeout { after, .. } => Self::Timeout(after),
            HostError::CommandFailed(msg) => Self::Execution(msg),
        }
    }
}

impl From<StoreError> for BotError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateName(name) => Self::DuplicateSession(format!("\"{name}\"")),
            StoreError::NotFound(id) => Self::SessionNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<AssistantError> for BotError {
    fn from(err: AssistantError) -> Self {
        match err {
            AssistantError::SpawnFailed(reason) => Self::AssistantSpawnFailed(reason),
            AssistantError::Host(host) => host.into(),
        }
    }
}

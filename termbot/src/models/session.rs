//! Session model representing one persistent terminal context.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Short, immutable session identifier: three zero-padded digits (`001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Highest allocatable id.
    pub const MAX: u32 = 999;

    /// Build the id for a sequence number.
    pub fn from_number(n: u32) -> Self {
        Self(format!("{n:03}"))
    }

    /// Parse an operator-supplied id. `2`, `02` and `002` all name session `002`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let n: u32 = s.parse().ok()?;
        (n > 0).then(|| Self::from_number(n))
    }

    /// Numeric value of the id.
    pub fn number(&self) -> u32 {
        self.0.parse().unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session is in use.
    Active,
    /// Session is sleeping; its host process keeps running.
    Background,
    /// Session is gone for good.
    Terminated,
}

impl SessionState {
    /// Convert state to its persisted string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Background => "background",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the session can still be targeted.
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// State of the AI coding assistant inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl AssistantState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    /// `starting` or `running`.
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for AssistantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A logical, named terminal session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Unique identifier, assigned at creation.
    pub id: SessionId,
    /// Operator-chosen label, unique among live sessions.
    pub name: String,
    /// Absolute working directory.
    pub working_dir: PathBuf,
    /// Lifecycle state.
    pub state: SessionState,
    /// Assistant lifecycle state, independent of `state`.
    pub assistant: AssistantState,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last successful command execution.
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// Create a new active session.
    pub fn new(id: SessionId, name: String, working_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            working_dir,
            state: SessionState::Active,
            assistant: AssistantState::Stopped,
            created_at: now,
            last_active_at: now,
        }
    }

    /// `001 (demo)`, used in replies.
    pub fn label(&self) -> String {
        format!("{} ({})", self.id, self.name)
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            working_directory: self.working_dir.clone(),
            state: self.state,
            created_at: self.created_at,
            last_active_at: Some(self.last_active_at),
        }
    }

    /// Rebuild a session from disk. The assistant is never assumed to survive a restart.
    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            last_active_at: record.last_active_at.unwrap_or(record.created_at),
            id: record.id,
            name: record.name,
            working_dir: record.working_directory,
            state: record.state,
            assistant: AssistantState::Stopped,
            created_at: record.created_at,
        }
    }
}

/// The persisted, externally inspectable form of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub name: String,
    pub working_directory: PathBuf,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
}

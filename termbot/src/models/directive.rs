//! Directive model: the typed meaning of one inbound message.

/// What an inbound message asks for. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Create a session, optionally named.
    CreateSession { name: Option<String> },
    ListSessions,
    /// Make `target` (id or name) the current session.
    SwitchSession { target: String },
    /// Move a session to the background; `None` means the current one.
    SleepSession { target: Option<String> },
    /// Terminate a session; `None` means the current one.
    KillSession { target: Option<String> },
    RenameSession { target: String, name: String },
    SetWorkingDirectory { path: String },
    AssistantStart,
    AssistantStop,
    AssistantStatus,
    /// Recent scrollback of the target session.
    History { lines: Option<usize> },
    /// Raw multiplexer key names, e.g. `C-c`.
    SendKeys { keys: Vec<String> },
    Help,
    /// Text to run in the target session's shell.
    RawCommand { text: String },
    /// Recognised directive with unusable arguments.
    Invalid { reason: String },
}

impl Directive {
    /// Short name used in logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::ListSessions => "list_sessions",
            Self::SwitchSession { .. } => "switch_session",
            Self::SleepSession { .. } => "sleep_session",
            Self::KillSession { .. } => "kill_session",
            Self::RenameSession { .. } => "rename_session",
            Self::SetWorkingDirectory { .. } => "set_working_directory",
            Self::AssistantStart => "assistant_start",
            Self::AssistantStop => "assistant_stop",
            Self::AssistantStatus => "assistant_status",
            Self::History { .. } => "history",
            Self::SendKeys { .. } => "send_keys",
            Self::Help => "help",
            Self::RawCommand { .. } => "raw_command",
            Self::Invalid { .. } => "invalid",
        }
    }

    /// Session reference carried by the directive itself, if any.
    pub fn explicit_target(&self) -> Option<&str> {
        match self {
            Self::SwitchSession { target } | Self::RenameSession { target, .. } => Some(target),
            Self::SleepSession { target } | Self::KillSession { target } => target.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

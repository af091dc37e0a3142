//! Reply text shown to the operator.

use std::fmt::Write;
use std::time::Duration;

use crate::error::BotError;
use crate::models::{AssistantState, Session, SessionId, SessionState};

pub(super) const HELP: &str = "\
Session management:
  /new-session [name]            create a session and switch to it
  /list-sessions                 show sessions
  /switch-session <id|name>      make a session current (wakes sleeping ones)
  /sleep-session [id|name]       move a session to the background
  /kill-session [id|name]        terminate a session (also removes orphans)
  /rename-session <id> \"name\"    rename a session
  /working-dir <path>            change the working directory

Assistant:
  /claude-start                  start the assistant in the current session
  /claude-stop                   stop it
  /claude-status                 check on it

Terminal:
  /history [lines]               recent scrollback
  /keys <key>...                 send keys, e.g. /keys C-c
  /help                          this message

Anything else runs as a shell command in the current session.";

pub(super) fn error(err: &BotError) -> String {
    err.to_string()
}

/// Wrap captured output in a code block.
pub(super) fn output(text: &str) -> String {
    if text.trim().is_empty() {
        "Command executed (no output)".to_string()
    } else {
        format!("```\n{text}\n```")
    }
}

/// Partial output followed by the timeout marker.
pub(super) fn timed_out(partial: &str, after: Duration) -> String {
    let marker = BotError::Timeout(after).to_string();
    if partial.trim().is_empty() {
        format!("{marker} (no output captured)")
    } else {
        format!("```\n{partial}\n```\n{marker}; output may be incomplete")
    }
}

pub(super) fn created(session: &Session) -> String {
    format!(
        "Created session {}\nWorking directory: {}",
        session.label(),
        session.working_dir.display()
    )
}

pub(super) fn session_list(
    sessions: &[Session],
    current: Option<&SessionId>,
    orphans: &[SessionId],
) -> String {
    let mut out = String::new();
    if sessions.is_empty() {
        out.push_str("No active sessions. Use /new-session to create one.");
    } else {
        out.push_str("Sessions:");
        for session in sessions {
            let _ = write!(
                out,
                "\n- {} [{}] {}",
                session.label(),
                session.state,
                session.working_dir.display()
            );
            if session.assistant != AssistantState::Stopped {
                let _ = write!(out, " (assistant {})", session.assistant);
            }
            if Some(&session.id) == current {
                out.push_str(" <- current");
            }
        }
    }
    if !orphans.is_empty() {
        let ids: Vec<&str> = orphans.iter().map(SessionId::as_str).collect();
        let _ = write!(
            out,
            "\nOrphaned terminal processes (not managed, /kill-session <id> removes one): {}",
            ids.join(", ")
        );
    }
    out
}

pub(super) fn state_changed(session: &Session) -> String {
    match session.state {
        SessionState::Active => format!("Switched to session {}", session.label()),
        SessionState::Background => format!("Session {} is now in the background", session.label()),
        SessionState::Terminated => format!("Session {} terminated", session.label()),
    }
}

pub(super) fn assistant_unchanged(session: &Session, state: AssistantState) -> String {
    match state {
        AssistantState::Stopped => format!("Assistant is not running in session {}", session.label()),
        other => format!("Assistant is already {other} in session {}", session.label()),
    }
}

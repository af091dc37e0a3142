//! AI coding assistant: launcher contract and per-session supervisor.

#[cfg(test)]
pub mod fake;
mod launcher;
mod supervisor;

pub use launcher::{AssistantLauncher, AssistantOptions, TmuxLauncher};
pub use supervisor::{AssistantSupervisor, StopOutcome};

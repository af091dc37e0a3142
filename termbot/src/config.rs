//! TOML configuration.
//!
//! Every field has a default, so a missing file or a partial one is fine. An unreadable
//! or malformed file is a startup error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::assistant::AssistantOptions;
use crate::host::CaptureProfile;
use crate::security::SecurityPolicy;

/// Default HTTP port for the inbound endpoint.
pub const DEFAULT_PORT: u16 = 58240;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sessions: SessionsConfig,
    pub capture: CaptureConfig,
    pub assistant: AssistantConfig,
    pub security: SecurityPolicy,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// One subdirectory per session id.
    pub base_dir: String,
    /// tmux session name = prefix + id.
    pub tmux_prefix: String,
    pub tmux_binary: String,
    /// Reap sessions idle this long; 0 disables reaping.
    pub idle_timeout_secs: u64,
    /// Period of the reconciliation and reaping sweep.
    pub sweep_interval_secs: u64,
    /// Exact-match shortcuts for `/working-dir`.
    pub working_dir_aliases: BTreeMap<String, String>,
    /// Prefix rewrites for `/working-dir`, e.g. `git/` → `~/git/`.
    pub working_dir_prefixes: BTreeMap<String, String>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            base_dir: "~/termbot-sessions".to_string(),
            tmux_prefix: "termbot-".to_string(),
            tmux_binary: "tmux".to_string(),
            idle_timeout_secs: 0,
            sweep_interval_secs: 60,
            working_dir_aliases: BTreeMap::new(),
            working_dir_prefixes: BTreeMap::new(),
        }
    }
}

impl SessionsConfig {
    pub fn base_dir(&self) -> PathBuf {
        expand_tilde(&self.base_dir)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Turn operator input into a path: aliases, then prefix rewrites, then `~`.
    /// Relative results are joined onto `relative_to`.
    pub fn resolve_working_dir(&self, input: &str, relative_to: &Path) -> PathBuf {
        let input = input.trim();
        let rewritten = self
            .working_dir_aliases
            .get(input)
            .cloned()
            .or_else(|| {
                // Longest prefix wins.
                self.working_dir_prefixes
                    .iter()
                    .filter(|(prefix, _)| input.starts_with(prefix.as_str()))
                    .max_by_key(|(prefix, _)| prefix.len())
                    .map(|(prefix, target)| format!("{target}{}", &input[prefix.len()..]))
            })
            .unwrap_or_else(|| input.to_string());

        let path = expand_tilde(&rewritten);
        if path.is_absolute() {
            path
        } else {
            relative_to.join(path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub idle_window_ms: u64,
    pub hard_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub history_lines: usize,
    pub max_output_lines: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            idle_window_ms: 800,
            hard_timeout_ms: 15_000,
            poll_interval_ms: 150,
            history_lines: 200,
            max_output_lines: 40,
        }
    }
}

impl CaptureConfig {
    /// Capture profile for shell commands.
    pub fn profile(&self) -> CaptureProfile {
        CaptureProfile {
            idle_window: Duration::from_millis(self.idle_window_ms),
            hard_timeout: Duration::from_millis(self.hard_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(10)),
            history_lines: self.history_lines,
            max_output_lines: self.max_output_lines,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub executable: String,
    pub args: Vec<String>,
    pub ready_timeout_ms: u64,
    pub accept_trust_prompt: bool,
    pub stop_keys: Vec<String>,
    pub stop_timeout_ms: u64,
    /// Capture settings used while the assistant owns the pane.
    pub idle_window_ms: u64,
    pub hard_timeout_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            args: Vec::new(),
            ready_timeout_ms: 8_000,
            accept_trust_prompt: true,
            stop_keys: vec!["C-c".to_string(), "C-c".to_string()],
            stop_timeout_ms: 5_000,
            idle_window_ms: 2_500,
            hard_timeout_ms: 120_000,
        }
    }
}

impl AssistantConfig {
    pub fn options(&self) -> AssistantOptions {
        AssistantOptions {
            executable: self.executable.clone(),
            args: self.args.clone(),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            accept_trust_prompt: self.accept_trust_prompt,
            stop_keys: self.stop_keys.clone(),
            ..AssistantOptions::default()
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Capture profile for input sent to a running assistant.
    pub fn profile(&self, capture: &CaptureConfig) -> CaptureProfile {
        CaptureProfile {
            idle_window: Duration::from_millis(self.idle_window_ms),
            hard_timeout: Duration::from_millis(self.hard_timeout_ms),
            ..capture.profile()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `termbot=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Default config location: `$XDG_CONFIG_HOME/termbot/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("termbot").join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; an explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

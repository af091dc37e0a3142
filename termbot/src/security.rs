//! Security filter applied to raw shell commands before they reach a session.

use serde::{Deserialize, Serialize};

/// Outcome of evaluating a command against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Denied, with the reason echoed to the operator.
    Deny(String),
}

impl Verdict {
    #[cfg(test)]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Block list and optional allow list.
///
/// Block entries are an absolute veto: they are checked first and an allow-list entry
/// never overrides them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Substrings that deny a command wherever they appear.
    pub blocked: Vec<String>,
    /// Permitted leading tokens. Empty means every command not blocked is allowed.
    pub allowed: Vec<String>,
}

impl SecurityPolicy {
    #[cfg(test)]
    pub fn new(blocked: Vec<String>, allowed: Vec<String>) -> Self {
        Self { blocked, allowed }
    }

    /// Evaluate one raw command.
    pub fn evaluate(&self, command: &str) -> Verdict {
        // Collapse runs of whitespace so `rm  -rf` cannot slip past `rm -rf`.
        let normalized = command.split_whitespace().collect::<Vec<_>>().join(" ");

        if let Some(pattern) = self
            .blocked
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .find(|p| normalized.contains(p))
        {
            return Verdict::Deny(format!("{command} (matches blocked pattern \"{pattern}\")"));
        }

        if self.allowed.is_empty() {
            return Verdict::Allow;
        }

        let Some(leading) = normalized.split(' ').next().filter(|t| !t.is_empty()) else {
            return Verdict::Deny("empty command".to_string());
        };
        let basename = leading.rsplit('/').next().unwrap_or(leading);
        if self
            .allowed
            .iter()
            .any(|entry| entry == leading || entry == basename)
        {
            Verdict::Allow
        } else {
            Verdict::Deny(format!("{command} (\"{leading}\" is not in the allowed list)"))
        }
    }
}

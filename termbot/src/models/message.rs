//! Inbound message and per-conversation operator context.

use serde::{Deserialize, Serialize};

use super::SessionId;

/// One message delivered by the chat transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message body.
    pub text: String,
    /// Sender identity.
    pub sender: String,
    /// Explicit session hint (id or name).
    #[serde(default)]
    pub session: Option<String>,
    /// Conversation key (chat topic); defaults to the sender.
    #[serde(default)]
    pub topic: Option<String>,
    /// Transport message id, used for de-duplication.
    #[serde(default)]
    pub message_id: Option<String>,
}

impl InboundMessage {
    /// Create a message with only text and sender set.
    pub fn new(text: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: sender.into(),
            ..Self::default()
        }
    }

    /// Attach an explicit session hint.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Key selecting the operator context this message belongs to.
    pub fn conversation_key(&self) -> &str {
        self.topic.as_deref().unwrap_or(&self.sender)
    }
}

/// Per-conversation state passed explicitly into the router.
#[derive(Debug, Clone, Default)]
pub struct OperatorContext {
    /// The session implicitly targeted by messages without a reference.
    pub current: Option<SessionId>,
}

impl OperatorContext {
    pub const fn new(current: Option<SessionId>) -> Self {
        Self { current }
    }
}

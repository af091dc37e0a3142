//! Data models for termbot entities.

mod directive;
mod message;
mod session;

pub use directive::Directive;
pub use message::{InboundMessage, OperatorContext};
pub use session::{AssistantState, Session, SessionId, SessionRecord, SessionState};

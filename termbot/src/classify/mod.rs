//! Command classifier: turns one inbound message into a [`Directive`].
//!
//! Recognition order is slash grammar, then the phrase table, then a raw shell command.
//! Classification never fails; malformed arguments come back as [`Directive::Invalid`].

mod phrases;
mod slash;

use crate::models::Directive;

/// Classify one message.
pub fn classify(text: &str) -> Directive {
    let text = text.trim();
    if text.is_empty() {
        return Directive::invalid("Empty message");
    }

    if let Some(word) = slash::command_word(text) {
        if let Some(directive) = slash::parse(text) {
            return directive;
        }
        // Unknown `/word`: run it as a shell command without the slash.
        let stripped = text[1..].trim();
        tracing::debug!(word, "unrecognised slash command, treating as raw");
        return Directive::RawCommand {
            text: stripped.to_string(),
        };
    }

    phrases::match_phrase(text).unwrap_or_else(|| Directive::RawCommand {
        text: text.to_string(),
    })
}

//! Slash-command grammar.

use crate::models::Directive;

/// Split into tokens, honouring straight and typographic quotes.
///
/// Phone dictation tends to produce `“demo”` rather than `"demo"`, so both are accepted.
pub(super) fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;
    let mut quoted = false;

    for c in input.chars() {
        match closing {
            Some(end) if c == end => {
                closing = None;
            }
            Some(_) => current.push(c),
            None => match c {
                '"' | '\'' | '\u{201C}' | '\u{2018}' if current.is_empty() => {
                    closing = Some(closing_quote(c));
                    quoted = true;
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() || quoted {
                        tokens.push(std::mem::take(&mut current));
                    }
                    quoted = false;
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() || quoted {
        tokens.push(current);
    }
    tokens
}

const fn closing_quote(open: char) -> char {
    match open {
        '\u{201C}' => '\u{201D}',
        '\u{2018}' => '\u{2019}',
        other => other,
    }
}

/// `/word` at the start of the message, as opposed to an absolute path like `/usr/bin/env`.
pub(super) fn command_word(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('/')?;
    let word = rest.split(char::is_whitespace).next().unwrap_or("");
    let mut chars = word.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    (first_ok && rest_ok).then_some(word)
}

/// Parse a recognised slash command. `None` means the command word is unknown.
pub(super) fn parse(text: &str) -> Option<Directive> {
    let word = command_word(text)?;
    let args = tokenize(text[1 + word.len()..].trim());
    let joined = || {
        let joined = args.join(" ");
        let joined = joined.trim();
        (!joined.is_empty()).then(|| joined.to_string())
    };

    let directive = match word.to_ascii_lowercase().as_str() {
        "new-session" => Directive::CreateSession { name: joined() },
        "list-sessions" | "sessions" => Directive::ListSessions,
        "switch-session" => match args.first() {
            Some(target) => Directive::SwitchSession {
                target: target.clone(),
            },
            None => Directive::invalid("Usage: /switch-session <session id or name>"),
        },
        "sleep-session" => Directive::SleepSession {
            target: args.first().cloned(),
        },
        "kill-session" => Directive::KillSession {
            target: args.first().cloned(),
        },
        "rename-session" => match args.as_slice() {
            [target, name @ ..] if !name.is_empty() => Directive::RenameSession {
                target: target.clone(),
                name: name.join(" "),
            },
            _ => Directive::invalid("Usage: /rename-session <session id> \"<new name>\""),
        },
        "working-dir" | "cd" => match joined() {
            Some(path) => Directive::SetWorkingDirectory { path },
            None => Directive::invalid("Usage: /working-dir <path>"),
        },
        "claude-start" => Directive::AssistantStart,
        "claude-stop" => Directive::AssistantStop,
        "claude-status" => Directive::AssistantStatus,
        "history" => match args.first().map(|n| n.parse::<usize>()) {
            None => Directive::History { lines: None },
            Some(Ok(n)) if n > 0 => Directive::History { lines: Some(n) },
            Some(_) => Directive::invalid("Usage: /history [number of lines]"),
        },
        "keys" => {
            if args.is_empty() {
                Directive::invalid("Usage: /keys <key> [key...], e.g. /keys C-c")
            } else {
                Directive::SendKeys { keys: args }
            }
        }
        "help" => Directive::Help,
        _ => return None,
    };
    Some(directive)
}

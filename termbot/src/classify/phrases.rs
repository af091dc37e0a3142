//! Natural-language phrase table.
//!
//! Each entry pairs an anchored, case-insensitive pattern with a builder. Entries are
//! tried in order and the first match wins, so adding a phrase is a table edit.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::models::Directive;

type Builder = fn(&Captures<'_>) -> Directive;

/// One row of the phrase table.
struct PhraseRule {
    pattern: Regex,
    build: Builder,
}

const fn rule(pattern: &'static str, build: Builder) -> (&'static str, Builder) {
    (pattern, build)
}

fn table() -> Vec<(&'static str, Builder)> {
    vec![
        rule(
            r"^(?:please\s+)?(?:start|launch|open|run)\s+claude(?:\s+code)?$",
            |_| Directive::AssistantStart,
        ),
        rule(r"^claude(?:\s+code)?\s+start$", |_| Directive::AssistantStart),
        rule(
            r"^(?:please\s+)?(?:stop|quit|exit|close)\s+claude(?:\s+code)?$",
            |_| Directive::AssistantStop,
        ),
        rule(r"^claude(?:\s+code)?\s+stop$", |_| Directive::AssistantStop),
        rule(
            r"^(?:claude(?:\s+code)?\s+status|is\s+claude(?:\s+code)?\s+running)$",
            |_| Directive::AssistantStatus,
        ),
        rule(
            r"^(?:list|show)(?:\s+all)?(?:\s+my)?\s+sessions$",
            |_| Directive::ListSessions,
        ),
        rule(
            r"^(?:new|create)(?:\s+(?:a|new))?\s+session(?:\s+(?:called|named))?(?:\s+(?P<name>.+))?$",
            |caps| Directive::CreateSession {
                name: caps.name("name").map(|m| unquote(m.as_str())),
            },
        ),
        rule(
            r"^(?:switch|change)(?:\s+to)?\s+session\s+(?P<target>\S+)$",
            |caps| Directive::SwitchSession {
                target: unquote(&caps["target"]),
            },
        ),
        rule(
            r"^(?:switch|change)(?:\s+to)?\s+session$",
            |_| Directive::ListSessions,
        ),
        rule(
            r"^(?:sleep|pause|background)\s+session(?:\s+(?P<target>\S+))?$",
            |caps| Directive::SleepSession {
                target: caps.name("target").map(|m| unquote(m.as_str())),
            },
        ),
        rule(
            r"^(?:kill|close|terminate|end)\s+session(?:\s+(?P<target>\S+))?$",
            |caps| Directive::KillSession {
                target: caps.name("target").map(|m| unquote(m.as_str())),
            },
        ),
        rule(
            r"^(?:change|switch|set)\s+(?:the\s+)?(?:working\s+)?directory\s+to\s+(?P<path>.+)$",
            |caps| Directive::SetWorkingDirectory {
                path: unquote(&caps["path"]),
            },
        ),
        rule(r"^cd\s+(?P<path>\S+)$", |caps| Directive::SetWorkingDirectory {
            path: caps["path"].to_string(),
        }),
        rule(r"^(?:show\s+|bot\s+)?help$", |_| Directive::Help),
    ]
}

fn rules() -> &'static [PhraseRule] {
    static TABLE: OnceLock<Vec<PhraseRule>> = OnceLock::new();
    TABLE.get_or_init(|| {
        table()
            .into_iter()
            .filter_map(|(pattern, build)| {
                Regex::new(&format!("(?i){pattern}"))
                    .ok()
                    .map(|pattern| PhraseRule { pattern, build })
            })
            .collect()
    })
}

/// Collapse whitespace and drop the trailing punctuation dictation likes to add.
fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', '!', '?'])
        .trim_end()
        .to_string()
}

fn unquote(s: &str) -> String {
    s.trim()
        .trim_matches(['"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'])
        .trim()
        .to_string()
}

/// Match `text` against the phrase table.
pub(super) fn match_phrase(text: &str) -> Option<Directive> {
    let normalized = normalize(text);
    rules().iter().find_map(|rule| {
        rule.pattern
            .captures(&normalized)
            .map(|caps| (rule.build)(&caps))
    })
}

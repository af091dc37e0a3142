//! What a `send-keys` argument list types into a pane.
//!
//! tmux looks each argument up as a key name and types it literally when the lookup
//! fails, so `/keys "make install" Enter` runs a command just like raw input does.

const NAMED_KEYS: &[&str] = &[
    "Escape", "Tab", "BTab", "BSpace", "Up", "Down", "Left", "Right", "Home", "End", "IC",
    "DC", "Insert", "Delete", "NPage", "PPage", "PageUp", "PageDown", "PgUp", "PgDn", "Any",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keystroke<'a> {
    Text(&'a str),
    Space,
    Enter,
    /// A key that types nothing printable.
    Control,
}

fn is_function_key(name: &str) -> bool {
    name.strip_prefix(['F', 'f'])
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=24).contains(&n))
}

fn keystroke(arg: &str) -> Keystroke<'_> {
    let mut rest = arg;
    let mut modified = false;
    while let Some(prefix) = rest.get(..2).filter(|_| rest.len() > 2) {
        if !["C-", "M-", "S-"].iter().any(|p| p.eq_ignore_ascii_case(prefix)) {
            break;
        }
        rest = &rest[2..];
        modified = true;
    }
    if let Some(c) = rest.strip_prefix('^').filter(|c| c.chars().count() == 1) {
        rest = c;
        modified = true;
    }

    if modified {
        return if rest.eq_ignore_ascii_case("m") || rest.eq_ignore_ascii_case("j") {
            Keystroke::Enter
        } else {
            Keystroke::Control
        };
    }
    if rest.eq_ignore_ascii_case("Enter") || rest.eq_ignore_ascii_case("KPEnter") {
        Keystroke::Enter
    } else if rest.eq_ignore_ascii_case("Space") {
        Keystroke::Space
    } else if NAMED_KEYS.iter().any(|k| k.eq_ignore_ascii_case(rest)) || is_function_key(rest) {
        Keystroke::Control
    } else {
        Keystroke::Text(rest)
    }
}

/// Every non-blank line of text the keys would type, whether or not Enter follows it.
pub fn typed_lines(keys: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for key in keys {
        match keystroke(key) {
            Keystroke::Text(text) => {
                for c in text.chars() {
                    if c == '\n' || c == '\r' {
                        lines.push(std::mem::take(&mut line));
                    } else {
                        line.push(c);
                    }
                }
            }
            Keystroke::Space => line.push(' '),
            Keystroke::Enter => lines.push(std::mem::take(&mut line)),
            Keystroke::Control => {}
        }
    }
    lines.push(line);
    lines.retain(|l| !l.trim().is_empty());
    lines
}

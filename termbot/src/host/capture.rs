//! Output capture: quiescence polling and reply shaping.

use std::future::Future;

use tokio::time::{sleep, Instant};

use super::CaptureProfile;
use crate::error::HostError;

/// Placed between head and tail of truncated output.
pub const TRUNCATION_MARKER: &str = "... (output truncated) ...";

/// Lines kept from the end of truncated output.
const TAIL_LINES: usize = 3;

/// Lines returned when the echoed command cannot be located.
const FALLBACK_LINES: usize = 3;

/// Leading characters of the command used to find its echo. Long commands wrap.
const ECHO_PREFIX_CHARS: usize = 30;

/// Poll `snapshot` until its output stops changing.
///
/// Output counts as settled once it has been identical for `idle_window`, measured from
/// the last change, and at least one poll after the initial snapshot has been taken.
/// If that never happens within `hard_timeout`, the last snapshot is returned inside
/// [`HostError::Timeout`].
pub async fn wait_for_quiescence<F, Fut>(
    mut snapshot: F,
    profile: &CaptureProfile,
) -> Result<String, HostError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, HostError>>,
{
    let started = Instant::now();
    let mut last = snapshot().await?;
    let mut changed_at = Instant::now();

    loop {
        sleep(profile.poll_interval).await;
        let current = snapshot().await?;
        let now = Instant::now();

        if current == last {
            if now.duration_since(changed_at) >= profile.idle_window {
                return Ok(current);
            }
        } else {
            last = current;
            changed_at = now;
        }

        if now.duration_since(started) >= profile.hard_timeout {
            return Err(HostError::Timeout {
                partial: last,
                after: profile.hard_timeout,
            });
        }
    }
}

fn is_prompt(line: &str) -> bool {
    let line = line.trim_end();
    ['$', '#', '%', '>', '\u{276F}']
        .iter()
        .any(|c| line.ends_with(*c))
}

/// Border rows of full-screen UIs: nothing but box-drawing characters.
fn is_chrome(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| ('\u{2500}'..='\u{257F}').contains(&c) || c.is_whitespace())
}

fn trim_blank_edges(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let leading = lines.iter().take_while(|l| l.trim().is_empty()).count();
    lines.drain(..leading);
}

/// Pull the output of `command` out of a pane snapshot.
///
/// Takes what follows the last echo of the command, minus the prompt that came back.
/// If the echo has scrolled away, falls back to the last few meaningful lines. The
/// result is truncated to `max_lines`.
pub fn extract_output(screen: &str, command: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = screen
        .lines()
        .map(str::trim_end)
        .filter(|l| !is_chrome(l))
        .collect();
    let needle: String = command.trim().chars().take(ECHO_PREFIX_CHARS).collect();

    let echo = (!needle.is_empty())
        .then(|| lines.iter().rposition(|l| l.contains(needle.as_str())))
        .flatten();

    let mut output: Vec<String> = match echo {
        Some(index) => lines[index + 1..].iter().map(ToString::to_string).collect(),
        None => Vec::new(),
    };
    trim_blank_edges(&mut output);
    if output.last().is_some_and(|l| is_prompt(l)) {
        output.pop();
        trim_blank_edges(&mut output);
    }

    if echo.is_none() {
        let mut meaningful: Vec<String> = lines
            .iter()
            .rev()
            .filter(|l| !l.trim().is_empty() && !is_prompt(l))
            .take(FALLBACK_LINES)
            .map(ToString::to_string)
            .collect();
        meaningful.reverse();
        output = meaningful;
    }

    truncate_lines(&output, max_lines).join("\n")
}

/// Keep the head and the last few lines, with a marker in between.
pub fn truncate_lines(lines: &[String], max_lines: usize) -> Vec<String> {
    if lines.len() <= max_lines || max_lines <= TAIL_LINES + 1 {
        return lines.to_vec();
    }
    let head = max_lines - TAIL_LINES - 1;
    let mut out = Vec::with_capacity(max_lines);
    out.extend_from_slice(&lines[..head]);
    out.push(TRUNCATION_MARKER.to_string());
    out.extend_from_slice(&lines[lines.len() - TAIL_LINES..]);
    out
}

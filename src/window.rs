//! Line-window patching: locate a target line by scanning a bounded range
//! around an approximate line number instead of by unique content match.
//!
//! This exists for edits that exact text cannot disambiguate, e.g. renaming
//! one `const data = []` declaration in a file that contains dozens. It is a
//! last resort; prefer literal or regex queries when the target is unique.

use crate::matcher::Matcher;
use thiserror::Error;

/// A substitution applied within a single line: find `search` in the line,
/// splice in `replace` (with capture expansion for regex matchers).
#[derive(Debug, Clone)]
pub struct LineEdit {
    pub search: Matcher,
    pub replace: String,
}

/// Window-scan query: anchor on the line near `near_line` that matches
/// `anchor.search`, optionally fixing up one later line as well (e.g. the
/// `return` statement that refers to a renamed declaration).
#[derive(Debug, Clone)]
pub struct WindowQuery {
    /// Approximate 1-based line number of the target
    pub near_line: usize,
    /// Total window height in lines, centered on `near_line`
    pub window: usize,
    pub anchor: LineEdit,
    pub follow_up: Option<FollowUp>,
}

/// Bounded scan below the anchor for a second line to rewrite.
#[derive(Debug, Clone)]
pub struct FollowUp {
    pub edit: LineEdit,
    /// How many lines below the anchor to scan
    pub within: usize,
}

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("no line in window [{window_start}, {window_end}] matches the anchor")]
    NoCandidate {
        window_start: usize,
        window_end: usize,
    },

    #[error("{found} lines in window [{window_start}, {window_end}] match the anchor, expected exactly 1")]
    AmbiguousCandidates {
        found: usize,
        window_start: usize,
        window_end: usize,
    },

    #[error("no line within {within} lines below the anchor matches the follow-up")]
    FollowUpNotFound { within: usize },
}

/// A planned single-line replacement: byte span plus replacement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePatch {
    pub byte_start: usize,
    pub byte_end: usize,
    pub matched: String,
    pub replacement: String,
    /// 1-based line the patch lands on
    pub line: usize,
}

/// One line of the file with its byte offset.
struct LineSpan<'a> {
    /// 1-based line number
    number: usize,
    offset: usize,
    text: &'a str,
}

fn line_spans(content: &str) -> Vec<LineSpan<'_>> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for (idx, line) in content.split('\n').enumerate() {
        spans.push(LineSpan {
            number: idx + 1,
            offset,
            text: line,
        });
        offset += line.len() + 1;
    }
    // split('\n') yields a trailing empty slice when content ends with '\n';
    // that phantom line can never match a non-empty anchor, so it is harmless.
    spans
}

/// Plan the line patches a window query produces against `content`.
///
/// The window `[near_line - window/2, near_line + window/2]` is clamped to
/// the file. Exactly one line in the window may match the anchor; zero is
/// `NoCandidate` (the caller decides whether the patch already ran) and two
/// or more is `AmbiguousCandidates` so a drifted file never gets a
/// best-guess edit.
pub fn plan(content: &str, query: &WindowQuery) -> Result<Vec<LinePatch>, WindowError> {
    let lines = line_spans(content);
    let line_count = lines.len();

    let half = query.window / 2;
    let window_end = (query.near_line + half).min(line_count);
    // Keep start <= end even when near_line points past the end of the file.
    let window_start = query.near_line.saturating_sub(half).max(1).min(window_end);

    let candidates: Vec<&LineSpan> = lines
        .iter()
        .filter(|l| l.number >= window_start && l.number <= window_end)
        .filter(|l| query.anchor.search.is_present(l.text))
        .collect();

    let anchor_line = match candidates.len() {
        0 => {
            return Err(WindowError::NoCandidate {
                window_start,
                window_end,
            })
        }
        1 => candidates[0],
        found => {
            return Err(WindowError::AmbiguousCandidates {
                found,
                window_start,
                window_end,
            })
        }
    };

    let mut patches = vec![patch_line(anchor_line, &query.anchor)
        .expect("anchor presence was checked against this line")];

    if let Some(follow_up) = &query.follow_up {
        let scan_end = anchor_line.number + follow_up.within;
        let target = lines
            .iter()
            .filter(|l| l.number > anchor_line.number && l.number <= scan_end)
            .find(|l| follow_up.edit.search.is_present(l.text))
            .ok_or(WindowError::FollowUpNotFound {
                within: follow_up.within,
            })?;
        patches.push(
            patch_line(target, &follow_up.edit)
                .expect("follow-up presence was checked against this line"),
        );
    }

    Ok(patches)
}

/// Apply a line edit to one concrete line, producing the file-level span.
fn patch_line(line: &LineSpan<'_>, edit: &LineEdit) -> Option<LinePatch> {
    let (start, end) = match &edit.search {
        Matcher::Literal(search) => {
            let start = line.text.find(search.as_str())?;
            (start, start + search.len())
        }
        Matcher::Pattern(regex) => {
            let m = regex.find(line.text)?;
            (m.start(), m.end())
        }
    };

    let span = crate::matcher::Span {
        byte_start: line.offset + start,
        byte_end: line.offset + end,
        text: line.text[start..end].to_string(),
    };
    let replacement = edit.search.expand(&span, &edit.replace);

    Some(LinePatch {
        byte_start: span.byte_start,
        byte_end: span.byte_end,
        matched: span.text,
        replacement,
        line: line.number,
    })
}

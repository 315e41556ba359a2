use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// A located occurrence of a matcher within file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Byte range of the match
    pub byte_start: usize,
    pub byte_end: usize,
    /// The matched text
    pub text: String,
}

/// Which occurrences of a matcher to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Patch the single occurrence; more than one is ambiguous
    #[default]
    First,
    /// Patch every occurrence
    All,
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("matcher found no occurrences")]
    NoMatch,

    #[error("matcher found {count} occurrences, expected exactly 1")]
    AmbiguousMatch { count: usize },
}

/// Locates text to replace: an exact substring or a compiled regex.
///
/// Regex matchers are compiled with dot-matches-newline and multi-line
/// enabled, since replacement blocks routinely span many lines.
#[derive(Debug, Clone)]
pub enum Matcher {
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn literal(search: impl Into<String>) -> Self {
        Matcher::Literal(search.into())
    }

    /// Compile a regex matcher. Fails with `InvalidPattern` on bad syntax.
    pub fn pattern(pattern: &str) -> Result<Self, MatchError> {
        let regex = RegexBuilder::new(pattern)
            .dot_matches_new_line(true)
            .multi_line(true)
            .build()
            .map_err(|e| MatchError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Matcher::Pattern(regex))
    }

    /// Find the spans this matcher selects in `content`.
    ///
    /// `Mode::First` returns at most one span; a second occurrence is an
    /// `AmbiguousMatch` so a patch never lands on the wrong copy of a
    /// repeated fragment. Zero spans is not an error at this layer; the
    /// applicator decides whether that means "no match" or "already applied".
    pub fn find_spans(&self, content: &str, mode: Mode) -> Result<Vec<Span>, MatchError> {
        let spans: Vec<Span> = match self {
            Matcher::Literal(search) => content
                .match_indices(search.as_str())
                .map(|(start, text)| Span {
                    byte_start: start,
                    byte_end: start + text.len(),
                    text: text.to_string(),
                })
                .collect(),
            Matcher::Pattern(regex) => regex
                .find_iter(content)
                .map(|m| Span {
                    byte_start: m.start(),
                    byte_end: m.end(),
                    text: m.as_str().to_string(),
                })
                .collect(),
        };

        match mode {
            Mode::All => Ok(spans),
            Mode::First if spans.len() > 1 => Err(MatchError::AmbiguousMatch { count: spans.len() }),
            Mode::First => Ok(spans),
        }
    }

    /// Expand the replacement template for a given span.
    ///
    /// Literal matchers use the template verbatim. Regex matchers expand
    /// `$1` / `${name}` capture references against the matched text.
    pub fn expand(&self, span: &Span, template: &str) -> String {
        match self {
            Matcher::Literal(_) => template.to_string(),
            Matcher::Pattern(regex) => {
                let mut expanded = String::new();
                if let Some(captures) = regex.captures(&span.text) {
                    captures.expand(template, &mut expanded);
                    expanded
                } else {
                    template.to_string()
                }
            }
        }
    }

    pub fn is_present(&self, content: &str) -> bool {
        match self {
            Matcher::Literal(search) => content.contains(search.as_str()),
            Matcher::Pattern(regex) => regex.is_match(content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn literal_finds_single_occurrence() {
        let content = "const data = [];\nfoo();\n";
        let matcher = Matcher::literal("const data = [];");
        let spans = matcher.find_spans(content, Mode::First).unwrap();

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].byte_start, 0);
        assert_eq!(spans[0].text, "const data = [];");
    }

    #[test]
    fn literal_first_mode_rejects_repeats() {
        let content = "const data = [];\nconst data = [];\n";
        let matcher = Matcher::literal("const data = [];");
        let result = matcher.find_spans(content, Mode::First);

        assert!(matches!(
            result,
            Err(MatchError::AmbiguousMatch { count: 2 })
        ));
    }

    #[test]
    fn literal_all_mode_finds_every_occurrence() {
        let content = "data data data";
        let matcher = Matcher::literal("data");
        let spans = matcher.find_spans(content, Mode::All).unwrap();

        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2].byte_start, 10);
    }

    #[test]
    fn pattern_matches_across_newlines() {
        let content = "try {\n    mock();\n} catch (e) {}\n";
        let matcher = Matcher::pattern(r"try \{.*?\}").unwrap();
        let spans = matcher.find_spans(content, Mode::First).unwrap();

        assert_eq!(spans.len(), 1);
        assert!(spans[0].text.contains("mock();"));
        assert!(spans[0].text.contains('\n'));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let result = Matcher::pattern(r"const data = [unclosed");
        assert!(matches!(result, Err(MatchError::InvalidPattern { .. })));
    }

    #[test]
    fn pattern_expands_capture_references() {
        let content = "const data = [];";
        let matcher = Matcher::pattern(r"const (\w+) = \[\];").unwrap();
        let spans = matcher.find_spans(content, Mode::First).unwrap();

        let replacement = matcher.expand(&spans[0], "const history$1 = [];");
        assert_eq!(replacement, "const historydata = [];");
    }

    #[test]
    fn zero_spans_is_not_an_error() {
        let matcher = Matcher::literal("generateMockPerformanceData");
        let spans = matcher.find_spans("nothing here", Mode::First).unwrap();
        assert!(spans.is_empty());
    }

    proptest! {
        /// Splicing the replacement at a literal span only changes the span.
        #[test]
        fn literal_splice_is_exact(
            prefix in "[a-z \n]{0,40}",
            suffix in "[a-z \n]{0,40}",
            replacement in "[A-Z]{1,10}",
        ) {
            let needle = "NEEDLE_XYZ";
            prop_assume!(!prefix.contains(needle) && !suffix.contains(needle));
            let content = format!("{prefix}{needle}{suffix}");

            let matcher = Matcher::literal(needle);
            let spans = matcher.find_spans(&content, Mode::First).unwrap();
            prop_assert_eq!(spans.len(), 1);

            let span = &spans[0];
            let patched = format!(
                "{}{}{}",
                &content[..span.byte_start],
                replacement,
                &content[span.byte_end..]
            );
            prop_assert_eq!(&patched[..span.byte_start], prefix.as_str());
            prop_assert_eq!(&patched[span.byte_start + replacement.len()..], suffix.as_str());
        }

        /// Reverting with the inverse matcher restores the original bytes.
        #[test]
        fn literal_round_trip(
            prefix in "[a-z \n]{0,40}",
            suffix in "[a-z \n]{0,40}",
        ) {
            let needle = "NEEDLE_XYZ";
            let replacement = "PATCHED_ABC";
            prop_assume!(!prefix.contains(needle) && !suffix.contains(needle));
            prop_assume!(!prefix.contains(replacement) && !suffix.contains(replacement));
            let content = format!("{prefix}{needle}{suffix}");

            let forward = Matcher::literal(needle);
            let span = forward.find_spans(&content, Mode::First).unwrap().remove(0);
            let patched = format!(
                "{}{}{}",
                &content[..span.byte_start],
                replacement,
                &content[span.byte_end..]
            );

            let inverse = Matcher::literal(replacement);
            let span = inverse.find_spans(&patched, Mode::First).unwrap().remove(0);
            let restored = format!(
                "{}{}{}",
                &patched[..span.byte_start],
                needle,
                &patched[span.byte_end..]
            );
            prop_assert_eq!(restored, content);
        }
    }
}

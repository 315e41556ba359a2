use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The fundamental patch primitive: byte-span replacement with verification.
///
/// Every query kind (literal, regex, line-window) resolves to one or more
/// spans, and every span becomes an [`Edit`]. Intelligence lives in span
/// acquisition, not in application.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until it is applied"]
pub struct Edit {
    /// Path to the target file (already resolved against the project root)
    pub file: PathBuf,
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// Text spliced into `[byte_start, byte_end)`
    pub new_text: String,
    /// What we expect to find at the span before touching it
    pub expected_before: SpanCheck,
}

/// Before-text verification for an edit span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanCheck {
    /// Exact text match required
    Exact(String),
    /// xxh3 hash of the expected text, used for large spans
    Hash(u64),
}

impl SpanCheck {
    /// Build a check from the text currently at the span. Spans over 1 KiB
    /// are hashed rather than stored.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            SpanCheck::Hash(xxh3_64(text.as_bytes()))
        } else {
            SpanCheck::Exact(text.to_string())
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            SpanCheck::Exact(expected) => text == expected,
            SpanCheck::Hash(expected) => xxh3_64(text.as_bytes()) == *expected,
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("before-text check failed at {file}:{byte_start}")]
    BeforeTextMismatch {
        file: PathBuf,
        byte_start: usize,
        found: String,
    },

    #[error("invalid byte range [{byte_start}, {byte_end}) in file of length {file_len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        file_len: usize,
    },

    #[error(
        "overlapping edit spans: [{first_start}, {first_end}) and [{second_start}, {second_end})"
    )]
    OverlappingSpans {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("target is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("edit would produce malformed UTF-8")]
    InvalidUtf8Edit,
}

/// Result of applying one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "check whether the edit applied or was already in place"]
pub enum EditResult {
    Applied { file: PathBuf, bytes_changed: usize },
    /// Current text at the span already equals `new_text`
    AlreadyApplied { file: PathBuf },
}

impl Edit {
    /// Create an edit whose before-text check is derived from `expected_before`.
    pub fn new(
        file: impl Into<PathBuf>,
        byte_start: usize,
        byte_end: usize,
        new_text: impl Into<String>,
        expected_before: &str,
    ) -> Self {
        Self {
            file: file.into(),
            byte_start,
            byte_end,
            new_text: new_text.into(),
            expected_before: SpanCheck::from_text(expected_before),
        }
    }

    /// Check the span against current content, returning the current text
    /// at the span on success.
    fn check<'a>(&self, content: &'a [u8]) -> Result<&'a str, EditError> {
        if self.byte_start > self.byte_end || self.byte_end > content.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                file_len: content.len(),
            });
        }

        let current = std::str::from_utf8(&content[self.byte_start..self.byte_end])?;

        // Idempotency short-circuits verification: the span already holds
        // the replacement text.
        if current == self.new_text {
            return Ok(current);
        }

        if !self.expected_before.matches(current) {
            return Err(EditError::BeforeTextMismatch {
                file: self.file.clone(),
                byte_start: self.byte_start,
                found: current.to_string(),
            });
        }

        Ok(current)
    }

    /// Apply this edit on its own. Equivalent to `apply_all` with one edit.
    pub fn apply(&self) -> Result<EditResult, EditError> {
        let mut results = apply_all(&self.file, std::slice::from_ref(self))?;
        Ok(results.remove(0))
    }
}

/// Apply a set of edits to a single file in one atomic write.
///
/// Spans are applied bottom-to-top so earlier offsets stay valid. Overlapping
/// spans are rejected before anything is written. If every edit turns out to
/// be already applied, the file is left untouched.
pub fn apply_all(file: &Path, edits: &[Edit]) -> Result<Vec<EditResult>, EditError> {
    if edits.is_empty() {
        return Ok(Vec::new());
    }

    let original = fs::read(file)?;

    let mut order: Vec<usize> = (0..edits.len()).collect();
    order.sort_by(|&a, &b| edits[b].byte_start.cmp(&edits[a].byte_start));

    for &i in &order {
        edits[i].check(&original)?;
    }

    // Descending order: window[1] is the lower span, window[0] the higher.
    for pair in order.windows(2) {
        let (higher, lower) = (&edits[pair[0]], &edits[pair[1]]);
        if lower.byte_end > higher.byte_start {
            return Err(EditError::OverlappingSpans {
                first_start: lower.byte_start,
                first_end: lower.byte_end,
                second_start: higher.byte_start,
                second_end: higher.byte_end,
            });
        }
    }

    let mut content = original;
    let mut results = vec![None; edits.len()];
    let mut changed = false;

    for &i in &order {
        let edit = &edits[i];
        let current = std::str::from_utf8(&content[edit.byte_start..edit.byte_end])?;

        if current == edit.new_text {
            results[i] = Some(EditResult::AlreadyApplied {
                file: edit.file.clone(),
            });
            continue;
        }

        content.splice(edit.byte_start..edit.byte_end, edit.new_text.bytes());
        changed = true;

        results[i] = Some(EditResult::Applied {
            file: edit.file.clone(),
            bytes_changed: edit.new_text.len(),
        });
    }

    if changed {
        std::str::from_utf8(&content).map_err(|_| EditError::InvalidUtf8Edit)?;
        atomic_write(file, &content)?;

        // Bump mtime so dev-server file watchers notice the rewrite.
        filetime::set_file_mtime(file, filetime::FileTime::now())?;
    }

    Ok(results.into_iter().map(|r| r.expect("every edit visited")).collect())
}

/// Atomic whole-file write: tempfile in the same directory + fsync + rename.
///
/// Either the full write lands or the original file is untouched.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    let parent = path.parent().ok_or_else(|| {
        EditError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ))
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

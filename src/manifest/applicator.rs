//! Manifest applicator: plans and applies patch descriptors with
//! idempotency checks.
//!
//! Patches are grouped by resolved target file so each file is read once
//! and all of its edits land in a single atomic write. A no-match is a
//! reported outcome, not an error, unless strict mode is on.

use crate::edit::{self, Edit, EditResult};
use crate::manifest::schema::{Manifest, OccurrenceMode, Operation, PatchDescriptor, Query};
use crate::matcher::{MatchError, Matcher, Mode};
use crate::safety::ProjectGuard;
use crate::window::{self, FollowUp, LineEdit, WindowError, WindowQuery};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result of one patch descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutcome should be checked and reported"]
pub enum PatchOutcome {
    /// At least one span was rewritten
    Applied {
        file: PathBuf,
        /// Number of spans this patch rewrote
        matches: usize,
        /// File size before and after the whole-file write
        bytes_before: u64,
        bytes_after: u64,
    },
    /// Every span already held the replacement text
    AlreadyApplied { file: PathBuf },
    /// The matcher found nothing; non-fatal so an already-applied patch can
    /// be re-run safely
    NoMatch {
        file: PathBuf,
        /// Excerpt of the scanned region, when one exists (line windows)
        snippet: Option<String>,
    },
    /// The patch could not be applied for a reason worth reporting per-patch
    Failed { file: PathBuf, reason: String },
}

/// Hard errors during patch application.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("target file not found: {file}")]
    NotFound { file: PathBuf },

    #[error("invalid pattern in patch against {file}: {reason}")]
    InvalidPattern { file: PathBuf, reason: String },

    #[error("no match in {file} (strict mode)")]
    NoMatch { file: PathBuf },

    #[error("ambiguous match in {file}: {detail}")]
    AmbiguousMatch { file: PathBuf, detail: String },

    #[error("path refused: {0}")]
    Safety(#[from] crate::safety::SafetyError),

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Knobs shared by `apply` and the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Plan and simulate against temp copies; never write to the project
    pub dry_run: bool,
    /// Escalate NoMatch outcomes to hard errors
    pub strict: bool,
}

/// What planning a single patch produced.
enum Plan {
    /// Concrete edits to batch with the rest of the file's patches
    Edits(Vec<Edit>),
    /// Outcome decided without touching the file
    Settled(PatchOutcome),
}

/// Apply every patch in the manifest against `project_root`.
///
/// Returns one `(patch id, result)` entry per descriptor, in manifest order.
pub fn apply_manifest(
    manifest: &Manifest,
    project_root: &Path,
    options: ApplyOptions,
) -> Vec<(String, Result<PatchOutcome, ApplyError>)> {
    let strict = options.strict || manifest.meta.strict;

    let guard = if manifest.meta.project_relative {
        match ProjectGuard::new(project_root) {
            Ok(guard) => Some(guard),
            Err(e) => {
                // Without a usable project root no relative patch can be
                // resolved safely.
                return manifest
                    .patches
                    .iter()
                    .map(|p| {
                        (
                            p.id.clone(),
                            Err(ApplyError::Safety(e.clone())),
                        )
                    })
                    .collect();
            }
        }
    } else {
        None
    };

    // Group patches by resolved file, remembering manifest order.
    let mut by_file: HashMap<PathBuf, Vec<(usize, &PatchDescriptor)>> = HashMap::new();
    let mut resolution_errors: Vec<(usize, String, ApplyError)> = Vec::new();

    for (index, patch) in manifest.patches.iter().enumerate() {
        let raw = if manifest.meta.project_relative {
            project_root.join(&patch.file)
        } else {
            PathBuf::from(&patch.file)
        };

        let resolved = match &guard {
            Some(guard) => match guard.validate_path(&raw) {
                Ok(path) => path,
                Err(e) => {
                    resolution_errors.push((index, patch.id.clone(), ApplyError::Safety(e)));
                    continue;
                }
            },
            None => raw,
        };

        by_file.entry(resolved).or_default().push((index, patch));
    }

    let mut results: Vec<(usize, String, Result<PatchOutcome, ApplyError>)> = resolution_errors
        .into_iter()
        .map(|(index, id, err)| (index, id, Err(err)))
        .collect();

    for (file_path, patches) in by_file {
        if !file_path.exists() {
            for (index, patch) in patches {
                results.push((
                    index,
                    patch.id.clone(),
                    Err(ApplyError::NotFound {
                        file: file_path.clone(),
                    }),
                ));
            }
            continue;
        }

        let content = match fs::read_to_string(&file_path) {
            Ok(c) => c,
            Err(source) => {
                // io::Error is not Clone; reconstruct one per patch.
                let kind = source.kind();
                let msg = source.to_string();
                for (index, patch) in patches {
                    results.push((
                        index,
                        patch.id.clone(),
                        Err(ApplyError::Io {
                            path: file_path.clone(),
                            source: io::Error::new(kind, msg.clone()),
                        }),
                    ));
                }
                continue;
            }
        };

        results.extend(apply_file_group(&file_path, &content, &patches, options));
    }

    if strict {
        for (_, _, result) in results.iter_mut() {
            let no_match_file = match result {
                Ok(PatchOutcome::NoMatch { file, .. }) => Some(file.clone()),
                _ => None,
            };
            if let Some(file) = no_match_file {
                *result = Err(ApplyError::NoMatch { file });
            }
        }
    }

    results.sort_by_key(|(index, _, _)| *index);
    results
        .into_iter()
        .map(|(_, id, result)| (id, result))
        .collect()
}

/// Read-only status evaluation: same result semantics as `apply_manifest`
/// (`Applied` means "would apply"), run entirely against temp copies.
pub fn check_manifest(
    manifest: &Manifest,
    project_root: &Path,
    strict: bool,
) -> Vec<(String, Result<PatchOutcome, ApplyError>)> {
    apply_manifest(
        manifest,
        project_root,
        ApplyOptions {
            dry_run: true,
            strict,
        },
    )
}

/// Plan and apply every patch targeting one file.
fn apply_file_group(
    file_path: &Path,
    content: &str,
    patches: &[(usize, &PatchDescriptor)],
    options: ApplyOptions,
) -> Vec<(usize, String, Result<PatchOutcome, ApplyError>)> {
    let mut settled: Vec<(usize, String, Result<PatchOutcome, ApplyError>)> = Vec::new();
    let mut flat_edits: Vec<Edit> = Vec::new();
    // (manifest index, patch id, range into flat_edits)
    let mut pending: Vec<(usize, String, std::ops::Range<usize>)> = Vec::new();

    for (index, patch) in patches {
        match plan_patch(patch, file_path, content) {
            Ok(Plan::Settled(outcome)) => settled.push((*index, patch.id.clone(), Ok(outcome))),
            Ok(Plan::Edits(edits)) => {
                let start = flat_edits.len();
                flat_edits.extend(edits);
                pending.push((*index, patch.id.clone(), start..flat_edits.len()));
            }
            Err(e) => settled.push((*index, patch.id.clone(), Err(e))),
        }
    }

    if flat_edits.is_empty() {
        return settled;
    }

    // Dry runs apply against a temp copy so result semantics stay identical
    // without ever writing to the project.
    let scratch;
    let target: &Path = if options.dry_run {
        scratch = make_scratch_copy(file_path, content);
        match &scratch {
            Ok((_, path)) => {
                for edit in flat_edits.iter_mut() {
                    edit.file = path.clone();
                }
                path.as_path()
            }
            Err(reason) => {
                for (index, id, _) in pending {
                    settled.push((
                        index,
                        id,
                        Ok(PatchOutcome::Failed {
                            file: file_path.to_path_buf(),
                            reason: reason.clone(),
                        }),
                    ));
                }
                return settled;
            }
        }
    } else {
        file_path
    };

    match edit::apply_all(target, &flat_edits) {
        Ok(edit_results) => {
            let bytes_before = content.len() as u64;
            let delta: i64 = flat_edits
                .iter()
                .zip(edit_results.iter())
                .filter(|(_, r)| matches!(r, EditResult::Applied { .. }))
                .map(|(e, _)| e.new_text.len() as i64 - (e.byte_end - e.byte_start) as i64)
                .sum();
            let bytes_after = (content.len() as i64 + delta) as u64;

            for (index, id, range) in pending {
                let slice = &edit_results[range];
                let applied = slice
                    .iter()
                    .filter(|r| matches!(r, EditResult::Applied { .. }))
                    .count();
                let outcome = if applied > 0 {
                    PatchOutcome::Applied {
                        file: file_path.to_path_buf(),
                        matches: applied,
                        bytes_before,
                        bytes_after,
                    }
                } else {
                    PatchOutcome::AlreadyApplied {
                        file: file_path.to_path_buf(),
                    }
                };
                settled.push((index, id, Ok(outcome)));
            }
        }
        Err(e) => {
            // The batch failed as a unit; report the same reason per patch.
            let reason = e.to_string();
            for (index, id, _) in pending {
                settled.push((
                    index,
                    id,
                    Ok(PatchOutcome::Failed {
                        file: file_path.to_path_buf(),
                        reason: reason.clone(),
                    }),
                ));
            }
        }
    }

    settled
}

/// Copy content into a temp file for dry-run application.
fn make_scratch_copy(
    file_path: &Path,
    content: &str,
) -> Result<(tempfile::TempDir, PathBuf), String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let name = file_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "scratch.tmp".into());
    let path = dir.path().join(name);
    fs::write(&path, content).map_err(|e| e.to_string())?;
    Ok((dir, path))
}

/// Translate one descriptor into edits (or a settled outcome).
fn plan_patch(
    patch: &PatchDescriptor,
    file_path: &Path,
    content: &str,
) -> Result<Plan, ApplyError> {
    let Operation::Replace {
        text,
        mode,
        then_text,
    } = &patch.operation;

    match &patch.query {
        Query::Literal { search } => {
            let matcher = Matcher::literal(search.clone());
            plan_span_patch(file_path, content, &matcher, text, *mode)
        }
        Query::Pattern { pattern } => {
            let matcher =
                Matcher::pattern(pattern).map_err(|e| ApplyError::InvalidPattern {
                    file: file_path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            plan_span_patch(file_path, content, &matcher, text, *mode)
        }
        Query::LineWindow {
            near_line,
            window,
            search,
            pattern,
            then_search,
            then_pattern,
            then_within,
        } => {
            let anchor_matcher = build_line_matcher(file_path, search, pattern)?;
            let follow_up = match (then_search, then_pattern) {
                (None, None) => None,
                _ => {
                    let follow_matcher = build_line_matcher(file_path, then_search, then_pattern)?;
                    Some(FollowUp {
                        edit: LineEdit {
                            search: follow_matcher,
                            // validated: follow-up queries carry then_text
                            replace: then_text.clone().unwrap_or_default(),
                        },
                        within: *then_within,
                    })
                }
            };

            let query = WindowQuery {
                near_line: *near_line,
                window: *window,
                anchor: LineEdit {
                    search: anchor_matcher,
                    replace: text.clone(),
                },
                follow_up,
            };

            match window::plan(content, &query) {
                Ok(line_patches) => Ok(Plan::Edits(
                    line_patches
                        .into_iter()
                        .map(|p| {
                            Edit::new(file_path, p.byte_start, p.byte_end, p.replacement, &p.matched)
                        })
                        .collect(),
                )),
                Err(WindowError::NoCandidate {
                    window_start,
                    window_end,
                }) => {
                    // Anchor absent: already renamed, or the file drifted.
                    if content.contains(text.as_str()) {
                        Ok(Plan::Settled(PatchOutcome::AlreadyApplied {
                            file: file_path.to_path_buf(),
                        }))
                    } else {
                        Ok(Plan::Settled(PatchOutcome::NoMatch {
                            file: file_path.to_path_buf(),
                            snippet: Some(window_snippet(content, window_start, window_end)),
                        }))
                    }
                }
                Err(e @ WindowError::AmbiguousCandidates { .. }) => {
                    Err(ApplyError::AmbiguousMatch {
                        file: file_path.to_path_buf(),
                        detail: e.to_string(),
                    })
                }
                Err(e @ WindowError::FollowUpNotFound { .. }) => {
                    Ok(Plan::Settled(PatchOutcome::Failed {
                        file: file_path.to_path_buf(),
                        reason: e.to_string(),
                    }))
                }
            }
        }
    }
}

/// Plan a literal or regex replace over whole-content spans.
fn plan_span_patch(
    file_path: &Path,
    content: &str,
    matcher: &Matcher,
    template: &str,
    mode: OccurrenceMode,
) -> Result<Plan, ApplyError> {
    let mode = match mode {
        OccurrenceMode::First => Mode::First,
        OccurrenceMode::All => Mode::All,
    };

    let spans = match matcher.find_spans(content, mode) {
        Ok(spans) => spans,
        Err(e @ MatchError::AmbiguousMatch { .. }) => {
            return Err(ApplyError::AmbiguousMatch {
                file: file_path.to_path_buf(),
                detail: e.to_string(),
            })
        }
        Err(e) => {
            return Err(ApplyError::InvalidPattern {
                file: file_path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    if spans.is_empty() {
        // The replacement being present is the usual sign of a re-run.
        if content.contains(template) {
            return Ok(Plan::Settled(PatchOutcome::AlreadyApplied {
                file: file_path.to_path_buf(),
            }));
        }
        let needle = match matcher {
            Matcher::Literal(search) => search.as_str(),
            Matcher::Pattern(regex) => regex.as_str(),
        };
        return Ok(Plan::Settled(PatchOutcome::NoMatch {
            file: file_path.to_path_buf(),
            snippet: Some(nearest_snippet(content, needle)),
        }));
    }

    Ok(Plan::Edits(
        spans
            .iter()
            .map(|span| {
                let new_text = matcher.expand(span, template);
                Edit::new(file_path, span.byte_start, span.byte_end, new_text, &span.text)
            })
            .collect(),
    ))
}

fn build_line_matcher(
    file_path: &Path,
    search: &Option<String>,
    pattern: &Option<String>,
) -> Result<Matcher, ApplyError> {
    match (search, pattern) {
        (Some(search), None) => Ok(Matcher::literal(search.clone())),
        (None, Some(pattern)) => {
            Matcher::pattern(pattern).map_err(|e| ApplyError::InvalidPattern {
                file: file_path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        // validate() rejects both-set and neither-set before we get here
        _ => Err(ApplyError::InvalidPattern {
            file: file_path.to_path_buf(),
            reason: "line matcher needs exactly one of search or pattern".to_string(),
        }),
    }
}

/// Excerpt for whole-file no-match diagnostics: the lines around the
/// longest prefix of the search text still present in the file, falling
/// back to the file head. A drifted fragment usually keeps its opening
/// characters, so the prefix points at where the edit was meant to land.
fn nearest_snippet(content: &str, needle: &str) -> String {
    const MAX_LINES: usize = 6;
    const MIN_PREFIX: usize = 4;

    let mut ends: Vec<usize> = needle.char_indices().map(|(i, _)| i).collect();
    ends.push(needle.len());

    let offset = ends
        .into_iter()
        .rev()
        .filter_map(|end| {
            let prefix = needle[..end].trim_end();
            if prefix.len() < MIN_PREFIX {
                return None;
            }
            content.find(prefix)
        })
        .next()
        .unwrap_or(0);

    let line_idx = content[..offset].matches('\n').count();
    let lines: Vec<&str> = content
        .split('\n')
        .skip(line_idx.saturating_sub(1))
        .take(MAX_LINES)
        .collect();
    lines.join("\n")
}

/// Excerpt of the scanned window for no-match diagnostics.
fn window_snippet(content: &str, window_start: usize, window_end: usize) -> String {
    const MAX_LINES: usize = 6;
    let lines: Vec<&str> = content
        .split('\n')
        .skip(window_start.saturating_sub(1))
        .take((window_end + 1 - window_start).min(MAX_LINES))
        .collect();
    lines.join("\n")
}

use serde::Deserialize;
use std::fmt;

fn default_window() -> usize {
    40
}

fn default_then_within() -> usize {
    10
}

/// A patch manifest: metadata plus declarative patch descriptors.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Manifest {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDescriptor>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Resolve patch file paths against the project root
    #[serde(default)]
    pub project_relative: bool,
    /// Treat a patch whose matcher finds nothing as a hard failure
    #[serde(default)]
    pub strict: bool,
}

/// One declarative patch: target file, query, operation.
#[derive(Debug, Deserialize, Clone)]
pub struct PatchDescriptor {
    pub id: String,
    pub file: String,
    pub query: Query,
    pub operation: Operation,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Query {
    /// Exact substring search
    Literal { search: String },
    /// Regex search, compiled with dot-matches-newline and multi-line
    Pattern { pattern: String },
    /// Window scan around an approximate line number. Last resort for
    /// fragments that recur too often for content matching alone.
    LineWindow {
        near_line: usize,
        #[serde(default = "default_window")]
        window: usize,
        #[serde(default)]
        search: Option<String>,
        #[serde(default)]
        pattern: Option<String>,
        /// Optional follow-up matcher scanned below the anchor line
        #[serde(default)]
        then_search: Option<String>,
        #[serde(default)]
        then_pattern: Option<String>,
        #[serde(default = "default_then_within")]
        then_within: usize,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    Replace {
        text: String,
        #[serde(default)]
        mode: OccurrenceMode,
        /// Replacement for the follow-up line of a line-window query
        #[serde(default)]
        then_text: Option<String>,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OccurrenceMode {
    #[default]
    First,
    All,
}

impl Manifest {
    /// Structural validation, run before any file is touched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            }
            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "file",
                });
            }

            match &patch.query {
                Query::Literal { search } => {
                    if search.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "query.search",
                        });
                    }
                }
                Query::Pattern { pattern } => {
                    if pattern.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "query.pattern",
                        });
                    }
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
                    if *near_line == 0 {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "near_line is 1-based and must be >= 1".to_string(),
                        });
                    }
                    if *window == 0 {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "window must be >= 1".to_string(),
                        });
                    }
                    match (search, pattern) {
                        (Some(_), Some(_)) => issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "line-window query takes search or pattern, not both"
                                .to_string(),
                        }),
                        (None, None) => issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "query.search",
                        }),
                        _ => {}
                    }
                    if then_search.is_some() && then_pattern.is_some() {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "follow-up takes then_search or then_pattern, not both"
                                .to_string(),
                        });
                    }
                    if *then_within == 0 {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "then_within must be >= 1".to_string(),
                        });
                    }
                }
            }

            match &patch.operation {
                Operation::Replace {
                    text,
                    mode,
                    then_text,
                } => {
                    if text.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "operation.text",
                        });
                    }
                    let is_window = matches!(patch.query, Query::LineWindow { .. });
                    if *mode == OccurrenceMode::All && is_window {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "mode = \"all\" does not apply to line-window queries"
                                .to_string(),
                        });
                    }
                    let has_follow_up = matches!(
                        &patch.query,
                        Query::LineWindow {
                            then_search: Some(_),
                            ..
                        } | Query::LineWindow {
                            then_pattern: Some(_),
                            ..
                        }
                    );
                    if has_follow_up && then_text.is_none() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "operation.then_text",
                        });
                    }
                    if then_text.is_some() && !has_follow_up {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "then_text requires a follow-up matcher in the query"
                                .to_string(),
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "manifest contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal_patch(id: &str) -> PatchDescriptor {
        PatchDescriptor {
            id: id.to_string(),
            file: "public/static/app.js".to_string(),
            query: Query::Literal {
                search: "const data = [];".to_string(),
            },
            operation: Operation::Replace {
                text: "const historyData = [];".to_string(),
                mode: OccurrenceMode::First,
                then_text: None,
            },
        }
    }

    #[test]
    fn valid_manifest_passes() {
        let manifest = Manifest {
            meta: Metadata::default(),
            patches: vec![literal_patch("rename-data")],
        };
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn empty_patch_list_is_invalid() {
        let manifest = Manifest::default();
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err.issues[0], ValidationIssue::EmptyPatchList));
    }

    #[test]
    fn missing_search_is_invalid() {
        let mut patch = literal_patch("p");
        patch.query = Query::Literal {
            search: String::new(),
        };
        let manifest = Manifest {
            meta: Metadata::default(),
            patches: vec![patch],
        };
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn window_all_mode_is_invalid() {
        let mut patch = literal_patch("p");
        patch.query = Query::LineWindow {
            near_line: 5484,
            window: 40,
            search: Some("const data = []".to_string()),
            pattern: None,
            then_search: None,
            then_pattern: None,
            then_within: 10,
        };
        patch.operation = Operation::Replace {
            text: "const historyData = []".to_string(),
            mode: OccurrenceMode::All,
            then_text: None,
        };
        let manifest = Manifest {
            meta: Metadata::default(),
            patches: vec![patch],
        };
        let err = manifest.validate().unwrap_err();
        assert!(err.issues.iter().any(|i| matches!(
            i,
            ValidationIssue::InvalidCombo { .. }
        )));
    }

    #[test]
    fn follow_up_without_then_text_is_invalid() {
        let mut patch = literal_patch("p");
        patch.query = Query::LineWindow {
            near_line: 10,
            window: 6,
            search: Some("const data = []".to_string()),
            pattern: None,
            then_search: Some("return data;".to_string()),
            then_pattern: None,
            then_within: 10,
        };
        let manifest = Manifest {
            meta: Metadata::default(),
            patches: vec![patch],
        };
        let err = manifest.validate().unwrap_err();
        assert!(err
            .issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::MissingField { field: "operation.then_text", .. })));
    }
}

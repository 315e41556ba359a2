use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directories a patch must never touch even inside the project root.
const FORBIDDEN_DIRS: &[&str] = &["node_modules", ".git", "dist"];

/// Boundary checks preventing patches from escaping the project root or
/// landing in generated/vendored directories.
#[derive(Debug, Clone)]
pub struct ProjectGuard {
    /// Canonical project root
    project_root: PathBuf,
}

#[derive(Error, Debug, Clone)]
pub enum SafetyError {
    #[error("path is outside the project: {path} (project: {project})")]
    OutsideProject { path: PathBuf, project: PathBuf },

    #[error("path is in a forbidden directory: {path} ({dir}/ is never patched)")]
    ForbiddenDir { path: PathBuf, dir: String },

    #[error("failed to resolve {path}: {reason}")]
    Canonicalize { path: PathBuf, reason: String },
}

impl ProjectGuard {
    /// Create a guard rooted at the project directory.
    ///
    /// The root is canonicalized so symlinked checkouts behave correctly.
    pub fn new(project_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let root = project_root.as_ref();
        let project_root = root.canonicalize().map_err(|e| SafetyError::Canonicalize {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { project_root })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Check that a target path is safe to patch, returning its resolved
    /// absolute path.
    ///
    /// The target file may not exist yet when the applicator reports
    /// NotFound, so the parent directory is canonicalized instead of the
    /// file itself. `..` components and symlinks pointing outside the root
    /// both end up rejected.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        };

        let file_name = absolute
            .file_name()
            .ok_or_else(|| SafetyError::Canonicalize {
                path: absolute.clone(),
                reason: "path has no file name".to_string(),
            })?
            .to_os_string();

        let parent = absolute
            .parent()
            .ok_or_else(|| SafetyError::Canonicalize {
                path: absolute.clone(),
                reason: "path has no parent directory".to_string(),
            })?;

        let canonical_parent = parent.canonicalize().map_err(|e| SafetyError::Canonicalize {
            path: parent.to_path_buf(),
            reason: e.to_string(),
        })?;

        let resolved = canonical_parent.join(file_name);

        if !resolved.starts_with(&self.project_root) {
            return Err(SafetyError::OutsideProject {
                path: resolved,
                project: self.project_root.clone(),
            });
        }

        let inside = resolved
            .strip_prefix(&self.project_root)
            .expect("starts_with checked above");
        for component in inside.components() {
            let name = component.as_os_str().to_string_lossy();
            if FORBIDDEN_DIRS.contains(&name.as_ref()) {
                return Err(SafetyError::ForbiddenDir {
                    path: resolved.clone(),
                    dir: name.into_owned(),
                });
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn accepts_file_inside_project() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server.js"), "x").unwrap();

        let guard = ProjectGuard::new(dir.path()).unwrap();
        let resolved = guard.validate_path("server.js").unwrap();
        assert!(resolved.ends_with("server.js"));
    }

    #[test]
    fn accepts_missing_file_in_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ProjectGuard::new(dir.path()).unwrap();

        // File absent; the applicator reports NotFound, not a safety error.
        assert!(guard.validate_path("absent.js").is_ok());
    }

    #[test]
    fn rejects_dotdot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ProjectGuard::new(dir.path()).unwrap();

        let result = guard.validate_path("../outside.js");
        assert!(matches!(result, Err(SafetyError::OutsideProject { .. })));
    }

    #[test]
    fn rejects_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        let guard = ProjectGuard::new(dir.path()).unwrap();

        let result = guard.validate_path("node_modules/lodash/index.js");
        // Either the forbidden check or parent canonicalization refuses it,
        // depending on whether the nested directory exists.
        assert!(result.is_err());
    }

    #[test]
    fn rejects_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let guard = ProjectGuard::new(dir.path()).unwrap();

        let result = guard.validate_path(".git/config");
        assert!(matches!(result, Err(SafetyError::ForbiddenDir { .. })));
    }
}

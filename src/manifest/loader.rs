use crate::manifest::schema::{Manifest, ValidationError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse manifest TOML: {0}")]
    Toml(#[from] toml_edit::de::Error),

    #[error("invalid manifest: {0}")]
    Validation(#[from] ValidationError),

    /// A parse or validation error, annotated with the file it came from.
    #[error("manifest {path}: {source}")]
    InFile {
        path: PathBuf,
        source: Box<ManifestError>,
    },
}

pub fn load_from_str(input: &str) -> Result<Manifest, ManifestError> {
    let manifest: Manifest = toml_edit::de::from_str(input)?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|source| ManifestError::InFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{
    apply_manifest, check_manifest, ApplyError, ApplyOptions, PatchOutcome,
};
pub use loader::{load_from_path, load_from_str, ManifestError};
pub use schema::{
    Manifest, Metadata, OccurrenceMode, Operation, PatchDescriptor, Query, ValidationError,
    ValidationIssue,
};

//! Dashpatch: declarative text patching for dashboard source files
//!
//! Replaces a pile of one-off maintenance scripts with one interpreter and
//! many patch descriptors. A descriptor names a target file, a matcher
//! (literal substring, regex, or line-window), and a replacement; the
//! applicator locates the matched spans and rewrites them in place.
//!
//! # Architecture
//!
//! Every query kind compiles down to a single primitive: [`Edit`], a
//! verified byte-span replacement. Intelligence lives in span acquisition
//! (literal search, regex with dot-matches-newline, window scans around an
//! approximate line number), not in the application logic.
//!
//! # Safety
//!
//! - Every edit verifies its expected before-text before applying
//! - Atomic file writes (tempfile + fsync + rename)
//! - Project boundary enforcement (no edits outside the project root, no
//!   edits under `node_modules/`, `.git/`, or `dist/`)
//! - Idempotent: re-running an applied manifest reports AlreadyApplied or
//!   NoMatch instead of corrupting the target
//!
//! # Example
//!
//! ```no_run
//! use dashpatch::{Edit, EditResult};
//! use std::path::PathBuf;
//!
//! let edit = Edit::new(
//!     PathBuf::from("public/static/app.js"),
//!     6,
//!     10,
//!     "historyData",
//!     "data",
//! );
//!
//! match edit.apply() {
//!     Ok(result) => println!("edit applied: {:?}", result),
//!     Err(e) => eprintln!("edit failed: {}", e),
//! }
//! ```

pub mod edit;
pub mod manifest;
pub mod matcher;
pub mod safety;
pub mod window;

// Re-exports
pub use edit::{apply_all, Edit, EditError, EditResult, SpanCheck};
pub use manifest::{
    apply_manifest, check_manifest, load_from_path, load_from_str, ApplyError, ApplyOptions,
    Manifest, ManifestError, PatchOutcome,
};
pub use matcher::{MatchError, Matcher, Mode, Span};
pub use safety::{ProjectGuard, SafetyError};
pub use window::{FollowUp, LineEdit, LinePatch, WindowError, WindowQuery};

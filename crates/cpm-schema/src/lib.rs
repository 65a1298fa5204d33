//! Shared types and on-disk formats for cpm.
//!
//! Everything here is pure data plus the functions that order and key it:
//! module references and their version algebra, the GNU version comparator,
//! build matrices, and the JSON shapes of the manifest and build cache files.
//! The resolution and build engine lives in `cpm-core`.

pub mod cache;
pub mod manifest;
pub mod matrix;
pub mod module;
pub mod version;

// Re-exports
pub use cache::{BuildResult, CacheEntry, CacheFile};
pub use manifest::{Dependency, Manifest, ManifestError};
pub use matrix::{Matrix, MatrixError};
pub use module::{MAIN_VERSION, ModuleRef, NONE};

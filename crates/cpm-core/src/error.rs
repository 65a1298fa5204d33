//! Domain errors for resolution and build runs

use cpm_schema::{ManifestError, ModuleRef};
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that abort a resolution or build run.
///
/// `Cache` is the only kind the engine recovers from on its own: a corrupt
/// cache file is logged and treated as empty.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Failed to load formula for {module}: {reason}")]
    FormulaLoad { module: ModuleRef, reason: String },

    #[error("Failed to resolve {module}: {reason}")]
    Resolution { module: ModuleRef, reason: String },

    #[error("Build cache error for {path}: {reason}")]
    Cache { path: String, reason: String },

    #[error("Build of {module} failed: {reason}")]
    Build { module: ModuleRef, reason: String },

    #[error("{module} timed out after {}s", .after.as_secs())]
    Timeout { module: ModuleRef, after: Duration },

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Wrap a collaborator failure as a resolution error for `module`.
    pub fn resolution(module: &ModuleRef, err: &anyhow::Error) -> Self {
        Self::Resolution {
            module: module.clone(),
            reason: format!("{err:#}"),
        }
    }

    /// Wrap a collaborator failure as a formula load error for `module`.
    pub fn formula_load(module: &ModuleRef, err: &anyhow::Error) -> Self {
        Self::FormulaLoad {
            module: module.clone(),
            reason: format!("{err:#}"),
        }
    }

    /// Wrap a collaborator failure as a build error for `module`.
    pub fn build(module: &ModuleRef, reason: impl std::fmt::Display) -> Self {
        Self::Build {
            module: module.clone(),
            reason: reason.to_string(),
        }
    }

    /// The module the error is attributed to, if any.
    pub fn module(&self) -> Option<&ModuleRef> {
        match self {
            Self::FormulaLoad { module, .. }
            | Self::Resolution { module, .. }
            | Self::Build { module, .. }
            | Self::Timeout { module, .. } => Some(module),
            _ => None,
        }
    }
}

impl From<ManifestError> for Error {
    fn from(err: ManifestError) -> Self {
        Self::Manifest(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

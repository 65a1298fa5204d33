//! Module manifest (`cpm.json`).
//!
//! A manifest belongs to one module and maps each declared version of that
//! module to its pinned direct dependencies:
//!
//! ```json
//! {
//!   "id": "github.com/example/app",
//!   "deps": {
//!     "1.0.0": [{ "id": "github.com/madler/zlib", "version": "1.3.1" }]
//!   }
//! }
//! ```
//!
//! The pins for the main module are rewritten by `tidy`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ModuleRef;

/// Conventional manifest file name inside a module directory.
pub const MANIFEST_FILE: &str = "cpm.json";

/// Errors that can occur when loading or saving a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest file does not exist.
    #[error("Manifest not found: {0}")]
    Missing(PathBuf),

    /// An I/O error occurred while reading or writing the manifest.
    #[error("Failed to access manifest {path}: {source}")]
    Io {
        /// Manifest location.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The manifest content is not valid JSON of the expected shape.
    #[error("Corrupt manifest {path}: {source}")]
    Parse {
        /// Manifest location.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// A pinned direct dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Module path of the dependency.
    pub id: String,
    /// Pinned version.
    pub version: String,
}

impl From<&ModuleRef> for Dependency {
    fn from(m: &ModuleRef) -> Self {
        Self {
            id: m.path.clone(),
            version: m.version.clone(),
        }
    }
}

impl From<&Dependency> for ModuleRef {
    fn from(d: &Dependency) -> Self {
        ModuleRef::new(d.id.clone(), d.version.clone())
    }
}

/// Persisted manifest of one module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Module path of the owning module.
    pub id: String,
    /// Declared version of the owning module → pinned direct dependencies.
    #[serde(default)]
    pub deps: BTreeMap<String, Vec<Dependency>>,
}

impl Manifest {
    /// Create an empty manifest for a module.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deps: BTreeMap::new(),
        }
    }

    /// Load and parse a manifest from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Missing`] if the file does not exist,
    /// [`ManifestError::Io`] if it cannot be read, or
    /// [`ManifestError::Parse`] if its content is invalid.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ManifestError::Missing(path.to_path_buf())
            } else {
                ManifestError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::parse(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a manifest, returning `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, ManifestError> {
        match Self::load(path) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(ManifestError::Missing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Parse a manifest from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the content is invalid.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Atomically persist the manifest.
    ///
    /// The file is first written to a temporary sibling and then renamed so
    /// readers never observe a partially written manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if writing or renaming fails.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let io_err = |source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut content = serde_json::to_string_pretty(self).map_err(|source| {
            ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        content.push('\n');

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content).map_err(io_err)?;
        std::fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }

    /// Pinned dependencies declared for `version`, if any.
    pub fn pins(&self, version: &str) -> Option<Vec<ModuleRef>> {
        self.deps
            .get(version)
            .map(|deps| deps.iter().map(ModuleRef::from).collect())
    }

    /// The version pinned for `path` under `version`.
    pub fn pinned(&self, version: &str, path: &str) -> Option<&str> {
        self.deps
            .get(version)?
            .iter()
            .find(|d| d.id == path)
            .map(|d| d.version.as_str())
    }

    /// Replace the pins declared for `version`, sorted by path.
    pub fn set_pins(&mut self, version: &str, modules: &[ModuleRef]) {
        let mut deps: Vec<Dependency> = modules.iter().map(Dependency::from).collect();
        deps.sort_by(|a, b| a.id.cmp(&b.id));
        self.deps.insert(version.to_string(), deps);
    }

    /// Pin `module` under `version`, replacing any existing pin for its path.
    pub fn pin(&mut self, version: &str, module: &ModuleRef) {
        let deps = self.deps.entry(version.to_string()).or_default();
        deps.retain(|d| d.id != module.path);
        deps.push(Dependency::from(module));
        deps.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

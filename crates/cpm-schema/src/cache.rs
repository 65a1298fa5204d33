//! Build results and the on-disk build cache format.
//!
//! One cache file exists per module path. It maps `"<version>|<matrix-key>"`
//! to the stored result and the time it was produced:
//!
//! ```json
//! {
//!   "1.3.1|amd64-linux": {
//!     "build_result": { "output_dir": "...", "metadata": "", "errs": [] },
//!     "build_time": "2026-01-02T03:04:05Z"
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Outcome of building one module under one matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Install prefix the module was built into.
    pub output_dir: PathBuf,
    /// Free-form metadata exported by the recipe.
    #[serde(default)]
    pub metadata: String,
    /// Errors reported by the build. A non-empty list means the build failed.
    #[serde(default)]
    pub errs: Vec<String>,
}

impl BuildResult {
    /// Create an empty result for an output directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            metadata: String::new(),
            errs: Vec::new(),
        }
    }

    /// Whether the build reported no errors.
    pub fn is_success(&self) -> bool {
        self.errs.is_empty()
    }
}

/// A stored build result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached result.
    pub build_result: BuildResult,
    /// When the result was produced.
    pub build_time: DateTime<Utc>,
}

/// Content of one module's cache file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheFile {
    entries: BTreeMap<String, CacheEntry>,
}

impl CacheFile {
    /// Key of the entry for a version built under a matrix key.
    pub fn entry_key(version: &str, matrix_key: &str) -> String {
        format!("{version}|{matrix_key}")
    }

    /// Look up an entry.
    pub fn get(&self, version: &str, matrix_key: &str) -> Option<&CacheEntry> {
        self.entries.get(&Self::entry_key(version, matrix_key))
    }

    /// Insert or replace an entry stamped with the current time.
    pub fn insert(&mut self, version: &str, matrix_key: &str, build_result: BuildResult) {
        self.entries.insert(
            Self::entry_key(version, matrix_key),
            CacheEntry {
                build_result,
                build_time: Utc::now(),
            },
        );
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&mut self, version: &str, matrix_key: &str) -> Option<CacheEntry> {
        self.entries.remove(&Self::entry_key(version, matrix_key))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the file holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let mut file = CacheFile::default();
        file.insert("1.3.1", "amd64-linux", BuildResult::new("/out/zlib"));

        let json = serde_json::to_value(&file).unwrap();
        let entry = &json["1.3.1|amd64-linux"];
        assert_eq!(entry["build_result"]["output_dir"], "/out/zlib");
        assert!(entry["build_time"].as_str().unwrap().contains('T'));

        let back: CacheFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn test_entries_are_per_matrix() {
        let mut file = CacheFile::default();
        file.insert("1.0", "amd64-linux", BuildResult::new("/a"));
        file.insert("1.0", "arm64-darwin", BuildResult::new("/b"));
        assert_eq!(file.len(), 2);
        assert_eq!(
            file.get("1.0", "arm64-darwin").unwrap().build_result.output_dir,
            PathBuf::from("/b")
        );
        assert!(file.remove("1.0", "amd64-linux").is_some());
        assert!(file.get("1.0", "amd64-linux").is_none());
    }

    #[test]
    fn test_success_flag() {
        let mut result = BuildResult::new("/x");
        assert!(result.is_success());
        result.errs.push("link failed".into());
        assert!(!result.is_success());
    }
}

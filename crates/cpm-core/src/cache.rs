//! Persistent build-result cache.
//!
//! One JSON file per module path under the cache directory, holding every
//! `(version, matrix)` result built for that path. A missing or unreadable
//! file is an empty cache: the module is simply rebuilt. There is no content
//! hashing or expiry; an entry stays valid until it is removed.

use cpm_schema::{BuildResult, CacheFile, Matrix};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Build results keyed by (module path, version, matrix).
#[derive(Debug, Clone)]
pub struct BuildCache {
    dir: PathBuf,
}

impl BuildCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the cache file for a module path.
    ///
    /// The readable part is the sanitized path; a short digest of the
    /// original path keeps distinct paths from colliding after sanitizing.
    pub fn file_for(&self, module_path: &str) -> PathBuf {
        let digest = Sha256::digest(module_path.as_bytes());
        let stem: String = module_path
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir
            .join(format!("{stem}-{}.json", hex::encode(&digest[..6])))
    }

    /// Read the cache file of a module path. Missing or corrupt files yield
    /// an empty cache.
    pub async fn load(&self, module_path: &str) -> CacheFile {
        let file = self.file_for(module_path);
        let content = match fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheFile::default(),
            Err(e) => {
                warn!("Ignoring unreadable build cache {}: {e}", file.display());
                return CacheFile::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Ignoring corrupt build cache {}: {e}", file.display());
                CacheFile::default()
            }
        }
    }

    /// Cached result for `module_path@version` under `matrix`.
    pub async fn get(&self, module_path: &str, version: &str, matrix: &Matrix) -> Option<BuildResult> {
        let key = matrix.key();
        let hit = self
            .load(module_path)
            .await
            .get(version, &key)
            .map(|entry| entry.build_result.clone());
        debug!(
            "cache {} for {module_path}@{version} [{key}]",
            if hit.is_some() { "hit" } else { "miss" }
        );
        hit
    }

    /// Store a result, rewriting the module's cache file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the file cannot be written.
    pub async fn put(
        &self,
        module_path: &str,
        version: &str,
        matrix: &Matrix,
        result: &BuildResult,
    ) -> Result<()> {
        let mut cache = self.load(module_path).await;
        cache.insert(version, &matrix.key(), result.clone());
        self.write(module_path, &cache).await
    }

    /// Remove one entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the file cannot be rewritten.
    pub async fn remove(&self, module_path: &str, version: &str, matrix: &Matrix) -> Result<bool> {
        let mut cache = self.load(module_path).await;
        if cache.remove(version, &matrix.key()).is_none() {
            return Ok(false);
        }
        self.write(module_path, &cache).await?;
        Ok(true)
    }

    /// Delete every cached result of a module path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the file exists but cannot be deleted.
    pub async fn clear(&self, module_path: &str) -> Result<()> {
        match fs::remove_file(self.file_for(module_path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(cache_error(module_path, &e)),
        }
    }

    async fn write(&self, module_path: &str, cache: &CacheFile) -> Result<()> {
        let err = |e: &dyn std::fmt::Display| cache_error(module_path, e);

        fs::create_dir_all(&self.dir).await.map_err(|e| err(&e))?;
        let content = serde_json::to_vec_pretty(cache).map_err(|e| err(&e))?;

        let file = self.file_for(module_path);
        let temp_path = file.with_extension("json.tmp");
        fs::write(&temp_path, &content).await.map_err(|e| err(&e))?;
        fs::rename(&temp_path, &file).await.map_err(|e| err(&e))?;
        Ok(())
    }
}

fn cache_error(module_path: &str, e: &dyn std::fmt::Display) -> Error {
    Error::Cache {
        path: module_path.to_string(),
        reason: e.to_string(),
    }
}

//! Source synchronization.
//!
//! [`Source`] is the seam to whatever hosts module sources (a VCS, a mirror).
//! [`LocalSource`] serves a registry directory laid out as
//! `<root>/<module path>/<version>/`. [`Checkouts`] syncs each module version
//! into the work directory at most once per process and hands out its path.

use anyhow::{Context, Result, bail};
use cpm_schema::{ModuleRef, version};
use fs_extra::dir::CopyOptions;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where module sources come from.
pub trait Source: Send + Sync {
    /// Materialize `path` at `reference` (a version or tag) into `dest`.
    ///
    /// `dest` does not exist when this is called.
    fn sync(&self, cancel: &CancellationToken, reference: &str, path: &str, dest: &Path)
    -> Result<()>;

    /// Every published version of `path`.
    fn tags(&self, path: &str) -> Result<Vec<String>>;

    /// The greatest published version of `path` by the GNU ordering.
    fn latest(&self, path: &str) -> Result<String> {
        let tags = self.tags(path)?;
        match version::latest(tags.iter().map(String::as_str)) {
            Some(latest) => Ok(latest.to_string()),
            None => bail!("no published versions of {path}"),
        }
    }
}

/// A registry directory: `<root>/<module path>/<version>/`.
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn module_dir(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Source for LocalSource {
    fn sync(
        &self,
        cancel: &CancellationToken,
        reference: &str,
        path: &str,
        dest: &Path,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            bail!("sync of {path}@{reference} cancelled");
        }
        let src = self.module_dir(path).join(reference);
        if !src.is_dir() {
            bail!("{path}@{reference} not found in registry {}", self.root.display());
        }
        std::fs::create_dir_all(dest)?;
        let options = CopyOptions::new().content_only(true);
        fs_extra::dir::copy(&src, dest, &options)
            .with_context(|| format!("failed to copy {} into {}", src.display(), dest.display()))?;
        Ok(())
    }

    fn tags(&self, path: &str) -> Result<Vec<String>> {
        let dir = self.module_dir(path);
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("module {path} not found in registry {}", self.root.display()))?;
        let mut tags = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                tags.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        tags.sort_by(|a, b| version::compare(a, b));
        Ok(tags)
    }
}

type Slot = Arc<Mutex<Option<PathBuf>>>;

/// Synced source trees of one session.
///
/// The main module is never synced; its tree is the project directory.
pub struct Checkouts {
    source: Arc<dyn Source>,
    work_dir: PathBuf,
    main: ModuleRef,
    main_dir: PathBuf,
    slots: Mutex<HashMap<ModuleRef, Slot>>,
}

impl Checkouts {
    pub fn new(
        source: Arc<dyn Source>,
        work_dir: impl Into<PathBuf>,
        main: ModuleRef,
        main_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            work_dir: work_dir.into(),
            main,
            main_dir: main_dir.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &dyn Source {
        &*self.source
    }

    pub fn main(&self) -> &ModuleRef {
        &self.main
    }

    /// Source tree of `module`, syncing it on first use.
    ///
    /// Concurrent callers for the same module wait for a single sync.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the sync fails.
    pub fn dir(&self, cancel: &CancellationToken, module: &ModuleRef) -> Result<PathBuf> {
        if module.path == self.main.path {
            return Ok(self.main_dir.clone());
        }

        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(module.clone()).or_default())
        };
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dir) = slot.as_ref() {
            return Ok(dir.clone());
        }

        let dest = self
            .work_dir
            .join(&module.path)
            .join(&module.version);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Sync into a scratch directory next to the destination and move it
        // into place, so an interrupted sync never leaves a partial tree.
        let scratch = tempfile::Builder::new()
            .prefix(".sync-")
            .tempdir_in(dest.parent().unwrap_or(&self.work_dir))?;
        let staged = scratch.path().join("tree");
        debug!("syncing {module} into {}", dest.display());
        self.source
            .sync(cancel, &module.version, &module.path, &staged)
            .with_context(|| format!("failed to sync {module}"))?;

        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        std::fs::rename(&staged, &dest)?;

        *slot = Some(dest.clone());
        Ok(dest)
    }
}

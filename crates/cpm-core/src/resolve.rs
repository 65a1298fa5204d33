//! The requirement graph backed by formulas and synced sources.

use cpm_schema::{Manifest, ModuleRef};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::formula::{DepsSink, Formula, FormulaStore, Project};
use crate::mvs::Requirements;
use crate::source::Checkouts;

/// [`Requirements`] answered by each module's formula.
///
/// A module's requirements are its manifest pins for its own version plus
/// whatever its formula declares. A declared requirement without a version
/// takes the manifest pin for that path, else the source's latest version.
///
/// Before returning a module's requirements, the formula of every required
/// module is loaded, so the per-path comparator is known before the
/// resolver compares versions of that path.
pub struct FormulaRequirements {
    checkouts: Arc<Checkouts>,
    formulas: Arc<FormulaStore>,
    cancel: CancellationToken,
    main_manifest: Option<Manifest>,
    cache: Mutex<HashMap<ModuleRef, Vec<ModuleRef>>>,
}

impl FormulaRequirements {
    pub fn new(
        checkouts: Arc<Checkouts>,
        formulas: Arc<FormulaStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            checkouts,
            formulas,
            cancel,
            main_manifest: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the main module against `manifest` instead of the `cpm.json`
    /// on disk.
    #[must_use]
    pub fn with_main_manifest(mut self, manifest: Manifest) -> Self {
        self.main_manifest = Some(manifest);
        self
    }

    /// Sync `module` and load its project and formula.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] once the run is cancelled, a resolution
    /// error if the sync fails, or a formula load error.
    pub fn prepare(&self, module: &ModuleRef) -> Result<(Project, Arc<dyn Formula>)> {
        self.check_cancelled()?;
        let dir = self
            .checkouts
            .dir(&self.cancel, module)
            .map_err(|e| self.wrap(module, &e))?;
        let mut project = Project::load(module.clone(), &dir)?;
        if module.path == self.checkouts.main().path && self.main_manifest.is_some() {
            project.manifest.clone_from(&self.main_manifest);
        }
        let formula = self.formulas.load(module, &dir)?;
        Ok((project, formula))
    }

    /// Paths the formula of `module` declares without a version.
    ///
    /// These are the requirements that only a manifest pin holds in place.
    ///
    /// # Errors
    ///
    /// See [`FormulaRequirements::prepare`].
    pub fn unversioned_paths(&self, module: &ModuleRef) -> Result<Vec<String>> {
        let (project, formula) = self.prepare(module)?;
        let mut sink = DepsSink::default();
        formula
            .on_require(&project, &mut sink)
            .map_err(|e| Error::resolution(module, &e))?;
        Ok(sink
            .into_inner()
            .into_iter()
            .filter(|(_, version)| version.is_empty())
            .map(|(path, _)| path)
            .collect())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn wrap(&self, module: &ModuleRef, err: &anyhow::Error) -> Error {
        if self.cancel.is_cancelled() {
            Error::Cancelled
        } else {
            Error::resolution(module, err)
        }
    }

    fn pin(&self, module: &ModuleRef, project: &Project, declared: Vec<(String, String)>) -> Result<Vec<ModuleRef>> {
        let pins = project
            .manifest
            .as_ref()
            .and_then(|m| m.pins(&module.version))
            .unwrap_or_default();

        let mut required = pins.clone();
        for (path, version) in declared {
            if !version.is_empty() {
                required.push(ModuleRef::new(path, version));
                continue;
            }
            if pins.iter().any(|p| p.path == path) {
                continue;
            }
            self.check_cancelled()?;
            let latest = self
                .checkouts
                .source()
                .latest(&path)
                .map_err(|e| self.wrap(module, &e.context(format!("latest version of {path}"))))?;
            debug!("{module}: {path} resolved to latest {latest}");
            required.push(ModuleRef::new(path, latest));
        }
        required.sort();
        required.dedup();
        Ok(required)
    }
}

impl Requirements for FormulaRequirements {
    fn required(&self, module: &ModuleRef) -> Result<Vec<ModuleRef>> {
        self.check_cancelled()?;
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
        {
            return Ok(hit.clone());
        }

        let (project, formula) = self.prepare(module)?;
        let mut sink = DepsSink::default();
        formula
            .on_require(&project, &mut sink)
            .map_err(|e| Error::resolution(module, &e))?;
        let required = self.pin(module, &project, sink.into_inner())?;

        for dep in &required {
            if dep.is_none() || dep.path == self.checkouts.main().path {
                continue;
            }
            self.prepare(dep)?;
        }

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.clone(), required.clone());
        Ok(required)
    }

    fn compare(&self, path: &str, v1: &str, v2: &str) -> Ordering {
        self.formulas.compare(path, v1, v2)
    }
}

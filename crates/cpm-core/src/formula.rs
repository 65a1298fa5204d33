//! Build recipes as seen by the engine.
//!
//! A [`Formula`] answers two questions about a module: what it requires, and
//! how to build it. The engine never looks inside a recipe; it only calls the
//! trait. Formulas are produced by a [`FormulaLoader`] from a synced source
//! tree and retained by a [`FormulaStore`] for the life of the process.

use cpm_schema::{BuildResult, Manifest, Matrix, ModuleRef, version};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::builder;
use crate::env::BuildEnv;
use crate::error::{Error, Result};

/// A module version with its source tree.
#[derive(Debug, Clone)]
pub struct Project {
    pub module: ModuleRef,
    pub source_dir: PathBuf,
    /// The module's own `cpm.json`, if it ships one.
    pub manifest: Option<Manifest>,
}

impl Project {
    /// Load the project rooted at `source_dir`.
    ///
    /// # Errors
    ///
    /// Fails if a manifest exists but cannot be read or parsed.
    pub fn load(module: ModuleRef, source_dir: impl Into<PathBuf>) -> Result<Self> {
        let source_dir = source_dir.into();
        let manifest = Manifest::load_optional(&source_dir.join(cpm_schema::manifest::MANIFEST_FILE))?;
        Ok(Self {
            module,
            source_dir,
            manifest,
        })
    }
}

/// Collects the requirements a formula declares.
#[derive(Debug, Default)]
pub struct DepsSink {
    deps: Vec<(String, String)>,
}

impl DepsSink {
    /// Declare a dependency. An empty `version` means "resolve from the
    /// manifest, else the latest published version".
    pub fn require(&mut self, path: impl Into<String>, version: impl Into<String>) {
        self.deps.push((path.into(), version.into()));
    }

    pub fn into_inner(self) -> Vec<(String, String)> {
        self.deps
    }
}

/// A build recipe for one module.
pub trait Formula: Send + Sync {
    /// Declare the direct requirements of `project`.
    fn on_require(&self, project: &Project, deps: &mut DepsSink) -> anyhow::Result<()>;

    /// Build `project` into `ctx.output_dir()`.
    ///
    /// Reporting an entry in `result.errs` fails the build just like
    /// returning an error.
    fn on_build(
        &self,
        ctx: &BuildContext,
        project: &Project,
        result: &mut BuildResult,
    ) -> anyhow::Result<()>;

    /// Order two versions of this formula's module.
    fn compare(&self, v1: &str, v2: &str) -> Ordering {
        version::compare(v1, v2)
    }
}

/// Produces formulas from synced source trees.
pub trait FormulaLoader: Send + Sync {
    fn load(&self, module: &ModuleRef, dir: &Path) -> anyhow::Result<Arc<dyn Formula>>;
}

/// Loaded formulas, keyed by module.
///
/// Also serves as the per-path version comparator: once any version of a
/// path is loaded, its formula orders that path's versions.
pub struct FormulaStore {
    loader: Arc<dyn FormulaLoader>,
    by_module: Mutex<HashMap<ModuleRef, Arc<dyn Formula>>>,
    by_path: Mutex<HashMap<String, Arc<dyn Formula>>>,
}

impl FormulaStore {
    pub fn new(loader: Arc<dyn FormulaLoader>) -> Self {
        Self {
            loader,
            by_module: Mutex::new(HashMap::new()),
            by_path: Mutex::new(HashMap::new()),
        }
    }

    /// The formula of `module`, loading it from `dir` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormulaLoad`] if the loader fails.
    pub fn load(&self, module: &ModuleRef, dir: &Path) -> Result<Arc<dyn Formula>> {
        if let Some(formula) = self.get(module) {
            return Ok(formula);
        }
        debug!("loading formula for {module} from {}", dir.display());
        let formula = self
            .loader
            .load(module, dir)
            .map_err(|e| Error::formula_load(module, &e))?;

        let formula = Arc::clone(
            self.by_module
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(module.clone())
                .or_insert(formula),
        );
        self.by_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(module.path.clone())
            .or_insert_with(|| Arc::clone(&formula));
        Ok(formula)
    }

    pub fn get(&self, module: &ModuleRef) -> Option<Arc<dyn Formula>> {
        self.by_module
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .cloned()
    }

    /// Order two versions of `path`, falling back to the GNU ordering when
    /// no formula for the path is loaded.
    pub fn compare(&self, path: &str, v1: &str, v2: &str) -> Ordering {
        let formula = self
            .by_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        match formula {
            Some(formula) => formula.compare(v1, v2),
            None => version::compare(v1, v2),
        }
    }
}

/// Everything a formula may see while building one module.
#[derive(Debug, Clone)]
pub struct BuildContext {
    module: ModuleRef,
    matrix: Matrix,
    matrix_key: String,
    deps: BTreeMap<String, BuildResult>,
    env: BuildEnv,
    output_dir: PathBuf,
    log_path: PathBuf,
    cancel: CancellationToken,
}

impl BuildContext {
    /// `deps` maps the module path of every module in the build's
    /// dependency closure to its result.
    pub fn new(
        module: ModuleRef,
        matrix: Matrix,
        deps: BTreeMap<String, BuildResult>,
        env: BuildEnv,
        output_dir: PathBuf,
        log_path: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        let matrix_key = matrix.key();
        Self {
            module,
            matrix,
            matrix_key,
            deps,
            env,
            output_dir,
            log_path,
            cancel,
        }
    }

    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// Canonical key of the build matrix.
    pub fn current_matrix(&self) -> &str {
        &self.matrix_key
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// The result of `dep` in this build's closure.
    ///
    /// The closure holds one selected version per path, which may be newer
    /// than the version `dep` asks for, so the lookup is by path.
    pub fn build_result_of(&self, dep: &ModuleRef) -> Option<&BuildResult> {
        self.deps.get(&dep.path)
    }

    pub fn env(&self) -> &BuildEnv {
        &self.env
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Fires when the build times out or the run is cancelled.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a shell script in `cwd` with this build's environment.
    ///
    /// # Errors
    ///
    /// See [`builder::run_script`].
    pub fn run_script(&self, script: &str, cwd: &Path) -> anyhow::Result<()> {
        builder::run_script(script, cwd, &self.env, &self.log_path, &self.cancel)
    }
}

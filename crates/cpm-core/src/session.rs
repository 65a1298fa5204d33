//! One main module wired to the resolver, the minimizer and the orchestrator.

use cpm_schema::manifest::MANIFEST_FILE;
use cpm_schema::{BuildResult, Manifest, Matrix, ModuleRef};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::formula::{FormulaLoader, FormulaStore};
use crate::graph::BuildGraph;
use crate::mvs::{self, BuildList};
use crate::orchestrator::Orchestrator;
use crate::reporter::{NullReporter, Reporter};
use crate::resolve::FormulaRequirements;
use crate::source::{Checkouts, Source};

/// Resolution, tidying and builds for one main module.
pub struct Session {
    config: Config,
    main: ModuleRef,
    main_dir: PathBuf,
    checkouts: Arc<Checkouts>,
    formulas: Arc<FormulaStore>,
    reporter: Arc<dyn Reporter>,
}

impl Session {
    /// A session for the main module `main_path` whose source tree is
    /// `main_dir`.
    pub fn new(
        config: Config,
        main_path: impl Into<String>,
        main_dir: impl Into<PathBuf>,
        source: Arc<dyn Source>,
        loader: Arc<dyn FormulaLoader>,
    ) -> Self {
        let main = ModuleRef::main(main_path);
        let main_dir = main_dir.into();
        let checkouts = Arc::new(Checkouts::new(
            source,
            &config.work_dir,
            main.clone(),
            &main_dir,
        ));
        Self {
            config,
            main,
            main_dir,
            checkouts,
            formulas: Arc::new(FormulaStore::new(loader)),
            reporter: Arc::new(NullReporter),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn main(&self) -> &ModuleRef {
        &self.main
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.main_dir.join(MANIFEST_FILE)
    }

    /// Resolve the build list of the main module.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error, [`Error::Timeout`] if resolution
    /// exceeds the configured limit, or [`Error::Cancelled`].
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<BuildList> {
        self.reporter.resolving(&self.main);
        let main = self.main.clone();
        let jobs = self.config.jobs;
        let list = self
            .blocking(cancel, None, move |reqs| {
                mvs::build_list_with_workers(&main, &[], reqs, jobs)
            })
            .await?;
        self.reporter.resolved(list.len());
        Ok(list)
    }

    /// Resolve and build the dependency graph of the main module.
    ///
    /// Cycles are logged and reported, not rejected.
    ///
    /// # Errors
    ///
    /// See [`Session::resolve`].
    pub async fn graph(&self, cancel: &CancellationToken) -> Result<BuildGraph> {
        self.reporter.resolving(&self.main);
        let main = self.main.clone();
        let jobs = self.config.jobs;
        let graph = self
            .blocking(cancel, None, move |reqs| {
                let list = mvs::build_list_with_workers(&main, &[], reqs, jobs)?;
                BuildGraph::from_build_list(&list, reqs)
            })
            .await?;
        self.reporter.resolved(graph.len());

        for cycle in graph.find_cycles() {
            let modules: Vec<ModuleRef> = cycle.iter().map(|&id| graph.module(id).clone()).collect();
            let names: Vec<String> = modules.iter().map(ToString::to_string).collect();
            warn!("dependency cycle: {}", names.join(" -> "));
            self.reporter.cycle(&modules);
        }
        Ok(graph)
    }

    /// Rewrite the main module's pins to the minimal requirement list.
    ///
    /// Paths the main formula declares without a version are always kept,
    /// since only their pin holds them in place.
    ///
    /// # Errors
    ///
    /// Fails on resolution errors or if the manifest cannot be written.
    pub async fn tidy(&self, cancel: &CancellationToken) -> Result<Vec<ModuleRef>> {
        let manifest = self.load_manifest(&self.manifest_path())?;
        self.write_minimal(cancel, manifest).await
    }

    /// Pin a dependency of the main module, then tidy.
    ///
    /// An empty version pins the latest published version. Returns the
    /// pinned module. `cpm.json` is only written once the new pin resolves.
    ///
    /// # Errors
    ///
    /// Fails if the latest version cannot be determined, or as
    /// [`Session::tidy`].
    pub async fn get(&self, cancel: &CancellationToken, module: ModuleRef) -> Result<ModuleRef> {
        let pinned = if module.version.is_empty() {
            let checkouts = Arc::clone(&self.checkouts);
            let path = module.path.clone();
            self.blocking(cancel, None, move |_| {
                checkouts
                    .source()
                    .latest(&path)
                    .map(|latest| ModuleRef::new(path.clone(), latest))
                    .map_err(|e| Error::resolution(&ModuleRef::new(path.clone(), ""), &e))
            })
            .await?
        } else {
            module
        };

        let mut manifest = self.load_manifest(&self.manifest_path())?;
        manifest.pin(&self.main.version, &pinned);
        self.write_minimal(cancel, manifest).await?;
        info!("pinned {pinned}");
        Ok(pinned)
    }

    /// Minimize the pins of `manifest` and save it. Resolution runs against
    /// `manifest` itself, so nothing is written unless it resolves.
    async fn write_minimal(
        &self,
        cancel: &CancellationToken,
        mut manifest: Manifest,
    ) -> Result<Vec<ModuleRef>> {
        let main = self.main.clone();
        let jobs = self.config.jobs;
        let min = self
            .blocking(cancel, Some(manifest.clone()), move |reqs| {
                let base = reqs.unversioned_paths(&main)?;
                let list = mvs::build_list_with_workers(&main, &[], reqs, jobs)?;
                mvs::req_from_list(&main, &list, &base, reqs)
            })
            .await?;

        let path = self.manifest_path();
        manifest.set_pins(&self.main.version, &min);
        manifest.save(&path)?;
        info!("wrote {} requirement(s) to {}", min.len(), path.display());
        Ok(min)
    }

    /// Resolve and build everything under `matrix`.
    ///
    /// # Errors
    ///
    /// See [`Session::graph`] and [`Orchestrator::build`].
    pub async fn build(
        &self,
        cancel: &CancellationToken,
        matrix: Matrix,
    ) -> Result<Vec<(ModuleRef, BuildResult)>> {
        let graph = self.graph(cancel).await?;
        let orchestrator = Orchestrator::new(
            &self.config,
            Arc::clone(&self.checkouts),
            Arc::clone(&self.formulas),
            matrix,
        )
        .with_reporter(Arc::clone(&self.reporter));

        let results = orchestrator.build(cancel, &self.main, &graph).await?;
        let order = Orchestrator::build_order(&self.main, &graph);
        Ok(order
            .into_iter()
            .map(|id| graph.module(id).clone())
            .zip(results)
            .collect())
    }

    fn load_manifest(&self, path: &Path) -> Result<Manifest> {
        Ok(Manifest::load_optional(path)?.unwrap_or_else(|| Manifest::new(&self.main.path)))
    }

    /// Run `f` against fresh formula-backed requirements on a blocking
    /// task, bounded by the resolve timeout. `manifest` replaces the main
    /// module's `cpm.json` for this run.
    async fn blocking<T, F>(
        &self,
        cancel: &CancellationToken,
        manifest: Option<Manifest>,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FormulaRequirements) -> Result<T> + Send + 'static,
    {
        let child = cancel.child_token();
        let mut reqs = FormulaRequirements::new(
            Arc::clone(&self.checkouts),
            Arc::clone(&self.formulas),
            child.clone(),
        );
        if let Some(manifest) = manifest {
            reqs = reqs.with_main_manifest(manifest);
        }
        let task = tokio::task::spawn_blocking(move || f(&reqs));

        let timeout = self.config.resolve_timeout();
        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                child.cancel();
                return Err(Error::Cancelled);
            }
            outcome = tokio::time::timeout(timeout, task) => outcome,
        };

        match outcome {
            Err(_) => {
                child.cancel();
                Err(Error::Timeout {
                    module: self.main.clone(),
                    after: timeout,
                })
            }
            Ok(Err(join)) => Err(Error::Resolution {
                module: self.main.clone(),
                reason: join.to_string(),
            }),
            Ok(Ok(result)) => result,
        }
    }
}

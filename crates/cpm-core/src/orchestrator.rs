//! Build orchestration.
//!
//! Modules are built one at a time in global build order. Each module is
//! looked up in the [`BuildCache`] under the run's matrix first; on a miss its
//! source is synced, its formula loaded, and `on_build` runs on a blocking
//! task bounded by the build timeout. The first failure aborts the run:
//! nothing after it is built and the failing module is never cached.
//!
//! The main module is always rebuilt and never cached, since its version
//! does not identify its contents.

use cpm_schema::{BuildResult, Matrix, ModuleRef};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::BuildCache;
use crate::config::Config;
use crate::env::BuildEnv;
use crate::error::{Error, Result};
use crate::formula::{BuildContext, FormulaStore, Project};
use crate::graph::{BuildGraph, NodeId};
use crate::reporter::{NullReporter, Reporter};
use crate::source::Checkouts;

/// Directory segment used in place of the main module's empty version.
const MAIN_LABEL: &str = "main";

/// Builds a resolved graph under one matrix, reusing cached results.
pub struct Orchestrator {
    config: Config,
    checkouts: Arc<Checkouts>,
    formulas: Arc<FormulaStore>,
    cache: BuildCache,
    matrix: Matrix,
    reporter: Arc<dyn Reporter>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        checkouts: Arc<Checkouts>,
        formulas: Arc<FormulaStore>,
        matrix: Matrix,
    ) -> Self {
        Self {
            config: config.clone(),
            checkouts,
            formulas,
            cache: BuildCache::new(&config.cache_dir),
            matrix,
            reporter: Arc::new(NullReporter),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Order in which [`Orchestrator::build`] visits the graph: the main
    /// module's closure first, then every other node in insertion order.
    pub fn build_order(main: &ModuleRef, graph: &BuildGraph) -> Vec<NodeId> {
        let mut seeds: Vec<NodeId> = graph.id_of(main).into_iter().collect();
        seeds.extend(graph.ids());
        graph.global_build_order(&seeds)
    }

    /// Install prefix of `module` under this run's matrix.
    pub fn output_dir(&self, module: &ModuleRef) -> PathBuf {
        self.config
            .build_dir
            .join(&module.path)
            .join(version_label(module))
            .join(self.matrix.key())
    }

    /// Build every module of `graph`, returning results in build order.
    ///
    /// # Errors
    ///
    /// Returns the first module failure, timeout, or [`Error::Cancelled`].
    pub async fn build(
        &self,
        cancel: &CancellationToken,
        main: &ModuleRef,
        graph: &BuildGraph,
    ) -> Result<Vec<BuildResult>> {
        let key = self.matrix.key();
        let order = Self::build_order(main, graph);
        info!("building {} module(s) for {key}", order.len());

        let mut done: HashMap<NodeId, BuildResult> = HashMap::with_capacity(order.len());
        let mut results = Vec::with_capacity(order.len());

        for id in order {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let module = graph.module(id);
            let is_main = module.path == main.path;

            if !is_main {
                let hit = self
                    .cache
                    .get(&module.path, &module.version, &self.matrix)
                    .await
                    .filter(BuildResult::is_success);
                if let Some(hit) = hit {
                    debug!("{module}: using cached build");
                    self.reporter.cached(module, &hit);
                    done.insert(id, hit.clone());
                    results.push(hit);
                    continue;
                }
            }

            // Members of a cycle that are not built yet are left out.
            let deps: Vec<(String, BuildResult)> = graph
                .transitive_closure_of(id)
                .into_iter()
                .filter_map(|dep| {
                    done.get(&dep)
                        .map(|r| (graph.module(dep).path.clone(), r.clone()))
                })
                .collect();

            info!("building {module} [{key}]");
            self.reporter.building(module, &key);
            let started = Instant::now();

            let result = match self.build_one(cancel, module, deps).await {
                Ok(result) => result,
                Err(e) => {
                    self.reporter.failed(module, &e.to_string());
                    return Err(e);
                }
            };

            if !is_main {
                if let Err(e) = self
                    .cache
                    .put(&module.path, &module.version, &self.matrix, &result)
                    .await
                {
                    warn!("{e}");
                }
            }
            info!("built {module} in {:.1}s", started.elapsed().as_secs_f64());
            self.reporter.built(module, &result, started.elapsed());
            done.insert(id, result.clone());
            results.push(result);
        }
        Ok(results)
    }

    async fn build_one(
        &self,
        cancel: &CancellationToken,
        module: &ModuleRef,
        deps: Vec<(String, BuildResult)>,
    ) -> Result<BuildResult> {
        let child = cancel.child_token();
        let output_dir = self.output_dir(module);
        let log_path = self
            .config
            .build_log_path(&module.path, version_label(module));

        let dep_dirs: Vec<(String, PathBuf)> = deps
            .iter()
            .map(|(path, result)| (path.clone(), result.output_dir.clone()))
            .collect();
        let env = BuildEnv::new(&output_dir, &self.matrix, &dep_dirs);
        let ctx = BuildContext::new(
            module.clone(),
            self.matrix.clone(),
            deps.into_iter().collect::<BTreeMap<_, _>>(),
            env,
            output_dir.clone(),
            log_path,
            child.clone(),
        );

        let checkouts = Arc::clone(&self.checkouts);
        let formulas = Arc::clone(&self.formulas);
        let m = module.clone();
        let task = tokio::task::spawn_blocking(move || -> Result<BuildResult> {
            let dir = checkouts
                .dir(ctx.cancel_token(), &m)
                .map_err(|e| Error::build(&m, format!("{e:#}")))?;
            let project = Project::load(m.clone(), dir)?;
            let formula = formulas.load(&m, &project.source_dir)?;

            // Always start from an empty prefix.
            if output_dir.exists() {
                std::fs::remove_dir_all(&output_dir)?;
            }
            let mut result = BuildResult::new(&output_dir);
            formula
                .on_build(&ctx, &project, &mut result)
                .map_err(|e| Error::build(&m, format!("{e:#}")))?;
            if !result.is_success() {
                return Err(Error::build(&m, result.errs.join("; ")));
            }
            Ok(result)
        });

        let timeout = self.config.build_timeout();
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
                    module: module.clone(),
                    after: timeout,
                })
            }
            Ok(Err(join)) => Err(Error::build(module, join)),
            Ok(Ok(result)) => result,
        }
    }
}

fn version_label(module: &ModuleRef) -> &str {
    if module.is_main_version() {
        MAIN_LABEL
    } else {
        &module.version
    }
}

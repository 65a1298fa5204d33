//! In-memory formulas and sources for driving a [`Session`] end to end.

#![allow(dead_code)]

use anyhow::{Result, bail};
use cpm_core::{BuildContext, Config, DepsSink, Formula, FormulaLoader, Project, Session, Source};
use cpm_schema::{BuildResult, ModuleRef};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const MAIN: &str = "app";

/// How a fake module's build ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Outcome {
    #[default]
    Ok,
    /// `on_build` returns an error.
    Fail,
    /// `on_build` succeeds but reports an error in the result.
    Errs,
    /// `on_build` blocks until its cancel token fires.
    Hang,
}

#[derive(Debug, Clone, Default)]
struct Spec {
    requires: Vec<(String, String)>,
    outcome: Outcome,
    /// `sync` blocks until its cancel token fires.
    slow_sync: bool,
}

/// A registry of fake modules keyed by `path@version` (the main module by
/// its bare path), plus a log of every build that ran.
pub struct World {
    pub home: TempDir,
    pub project: PathBuf,
    specs: Arc<HashMap<String, Spec>>,
    builds: Arc<Mutex<Vec<String>>>,
}

impl World {
    pub fn new() -> Self {
        let home = TempDir::new().unwrap();
        let project = home.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        Self {
            home,
            project,
            specs: Arc::new(HashMap::new()),
            builds: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Declare a module. Requirements are `path@version`, or a bare path
    /// for "manifest pin, else latest".
    pub fn module(mut self, id: &str, requires: &[&str]) -> Self {
        let requires = requires
            .iter()
            .map(|r| match r.split_once('@') {
                Some((p, v)) => (p.to_string(), v.to_string()),
                None => ((*r).to_string(), String::new()),
            })
            .collect();
        Arc::make_mut(&mut self.specs).insert(
            id.to_string(),
            Spec {
                requires,
                ..Spec::default()
            },
        );
        self
    }

    pub fn outcome(mut self, id: &str, outcome: Outcome) -> Self {
        if let Some(spec) = Arc::make_mut(&mut self.specs).get_mut(id) {
            spec.outcome = outcome;
        }
        self
    }

    /// Make fetching `id` hang until the run gives up on it.
    pub fn slow_sync(mut self, id: &str) -> Self {
        if let Some(spec) = Arc::make_mut(&mut self.specs).get_mut(id) {
            spec.slow_sync = true;
        }
        self
    }

    pub fn config(&self) -> Config {
        let mut config = Config::with_home(self.home.path());
        config.jobs = 4;
        config
    }

    pub fn session(&self, config: Config) -> Session {
        Session::new(
            config,
            MAIN,
            &self.project,
            Arc::new(MemSource {
                specs: Arc::clone(&self.specs),
            }),
            Arc::new(MemLoader {
                specs: Arc::clone(&self.specs),
                builds: Arc::clone(&self.builds),
            }),
        )
    }

    /// Every build run so far, in order.
    pub fn builds(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }

    pub fn clear_builds(&self) {
        self.builds.lock().unwrap().clear();
    }
}

struct MemSource {
    specs: Arc<HashMap<String, Spec>>,
}

impl Source for MemSource {
    fn sync(&self, cancel: &CancellationToken, reference: &str, path: &str, dest: &Path) -> Result<()> {
        let id = format!("{path}@{reference}");
        let Some(spec) = self.specs.get(&id) else {
            bail!("unknown module {id}");
        };
        if spec.slow_sync {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(10));
            }
            bail!("sync of {id} interrupted");
        }
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join("MODULE"), &id)?;
        Ok(())
    }

    fn tags(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{path}@");
        Ok(self
            .specs
            .keys()
            .filter_map(|id| id.strip_prefix(&prefix).map(ToString::to_string))
            .collect())
    }
}

struct MemLoader {
    specs: Arc<HashMap<String, Spec>>,
    builds: Arc<Mutex<Vec<String>>>,
}

impl FormulaLoader for MemLoader {
    fn load(&self, module: &ModuleRef, _: &Path) -> Result<Arc<dyn Formula>> {
        let id = module.to_string();
        let Some(spec) = self.specs.get(&id) else {
            bail!("no recipe for {id}");
        };
        Ok(Arc::new(MemFormula {
            spec: spec.clone(),
            builds: Arc::clone(&self.builds),
        }))
    }
}

struct MemFormula {
    spec: Spec,
    builds: Arc<Mutex<Vec<String>>>,
}

impl Formula for MemFormula {
    fn on_require(&self, _: &Project, deps: &mut DepsSink) -> Result<()> {
        for (path, version) in &self.spec.requires {
            deps.require(path.clone(), version.clone());
        }
        Ok(())
    }

    fn on_build(&self, ctx: &BuildContext, project: &Project, result: &mut BuildResult) -> Result<()> {
        self.builds.lock().unwrap().push(project.module.to_string());

        // Every direct requirement has been built before this module.
        for (path, version) in &self.spec.requires {
            if ctx.build_result_of(&ModuleRef::new(path.clone(), version.clone())).is_none() {
                bail!("{path} was not built before {}", project.module);
            }
        }

        match self.spec.outcome {
            Outcome::Ok => {}
            Outcome::Fail => bail!("compiler exploded"),
            Outcome::Errs => result.errs.push("undefined reference to `inflate'".into()),
            Outcome::Hang => {
                while !ctx.cancel_token().is_cancelled() {
                    std::thread::sleep(Duration::from_millis(10));
                }
                bail!("interrupted");
            }
        }

        std::fs::create_dir_all(ctx.output_dir())?;
        std::fs::write(ctx.output_dir().join("matrix"), ctx.current_matrix())?;
        result.metadata = format!("{}|{}", project.module, ctx.current_matrix());
        Ok(())
    }
}

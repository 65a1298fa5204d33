//! cpm - a package manager for native libraries
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Resolves a project's dependencies with Minimal Version Selection, builds
//! them in dependency order, and caches every build per matrix.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.cpm/
//! ├── config.toml # Optional overrides
//! ├── registry/   # <module path>/<version>/ source trees
//! ├── work/       # Synced sources
//! ├── build/      # <module path>/<version>/<matrix>/ install prefixes
//! ├── cache/      # One JSON file of build results per module path
//! └── logs/       # Build logs
//! ```

pub mod cmd;
pub mod reporter;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cpm_core::{Config, LocalSource, RecipeLoader, Session};
use cpm_schema::Manifest;
use cpm_schema::manifest::MANIFEST_FILE;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "cpm")]
#[command(author, version, about = "cpm - a package manager for native libraries")]
pub struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Main module path (defaults to the id in cpm.json)
    #[arg(long, global = true, env = "CPM_MODULE")]
    pub module: Option<String>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the resolved build list
    Resolve,
    /// Print the build order with each module's direct dependencies
    Graph,
    /// Rewrite cpm.json with the minimal requirement list
    Tidy,
    /// Pin a dependency and tidy
    Get {
        /// Module spec: path or path@version (latest if omitted)
        spec: String,
    },
    /// Resolve and build everything
    Build {
        /// Target architecture (defaults to the host)
        #[arg(long)]
        arch: Option<String>,
        /// Target operating system (defaults to the host)
        #[arg(long)]
        os: Option<String>,
        /// Matrix option, e.g. -D shared=on
        #[arg(short = 'D', value_name = "NAME=VALUE")]
        define: Vec<String>,
    },
}

impl Cli {
    /// Open a session for the selected project.
    pub fn session(&self) -> Result<Session> {
        let config = Config::load().context("Failed to load configuration")?;
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };

        let main = match &self.module {
            Some(module) => module.clone(),
            None => {
                let manifest = Manifest::load_optional(&dir.join(MANIFEST_FILE))?;
                match manifest {
                    Some(manifest) => manifest.id,
                    None => bail!(
                        "No {MANIFEST_FILE} in {}; pass --module to name the main module",
                        dir.display()
                    ),
                }
            }
        };

        debug!(
            "main module {main} in {}, registry {}, {} job(s)",
            dir.display(),
            config.registry.display(),
            config.jobs
        );
        let source = Arc::new(LocalSource::new(&config.registry));
        Ok(
            Session::new(config, main, dir, source, Arc::new(RecipeLoader))
                .with_reporter(Arc::new(reporter::ConsoleReporter)),
        )
    }
}

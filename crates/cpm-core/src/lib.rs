pub mod builder;
pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod formula;
pub mod graph;
pub mod mvs;
pub mod orchestrator;
pub mod recipe;
pub mod resolve;
pub mod scheduler;
pub mod session;
pub mod source;

pub mod reporter;

pub use cache::BuildCache;
pub use config::{Config, cpm_home, try_cpm_home};
pub use env::BuildEnv;
pub use error::{Error, Result};
pub use formula::{BuildContext, DepsSink, Formula, FormulaLoader, FormulaStore, Project};
pub use graph::{BuildGraph, BuildModule, NodeId};
pub use mvs::{BuildList, Requirements};
pub use orchestrator::Orchestrator;
pub use recipe::{Recipe, RecipeLoader};
pub use reporter::{NullReporter, Reporter};
pub use session::Session;
pub use source::{Checkouts, LocalSource, Source};

//! Reporter trait for dependency injection
//!
//! Lets the engine report progress without being coupled to a particular
//! terminal output.

use cpm_schema::{BuildResult, ModuleRef};
use std::time::Duration;

pub trait Reporter: Send + Sync {
    /// Resolution of `main` has started.
    fn resolving(&self, main: &ModuleRef);

    /// Resolution finished with `count` modules selected.
    fn resolved(&self, count: usize);

    /// A module build is starting under matrix `key`.
    fn building(&self, module: &ModuleRef, key: &str);

    /// A module's result was taken from the build cache.
    fn cached(&self, module: &ModuleRef, result: &BuildResult);

    /// A module was built successfully.
    fn built(&self, module: &ModuleRef, result: &BuildResult, elapsed: Duration);

    /// A module failed to build; the run is aborting.
    fn failed(&self, module: &ModuleRef, reason: &str);

    /// Cyclic requirements were found among `modules`.
    fn cycle(&self, modules: &[ModuleRef]);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn resolving(&self, main: &ModuleRef) {
        (**self).resolving(main);
    }
    fn resolved(&self, count: usize) {
        (**self).resolved(count);
    }
    fn building(&self, module: &ModuleRef, key: &str) {
        (**self).building(module, key);
    }
    fn cached(&self, module: &ModuleRef, result: &BuildResult) {
        (**self).cached(module, result);
    }
    fn built(&self, module: &ModuleRef, result: &BuildResult, elapsed: Duration) {
        (**self).built(module, result, elapsed);
    }
    fn failed(&self, module: &ModuleRef, reason: &str) {
        (**self).failed(module, reason);
    }
    fn cycle(&self, modules: &[ModuleRef]) {
        (**self).cycle(modules);
    }
}

/// A reporter that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn resolving(&self, _: &ModuleRef) {}
    fn resolved(&self, _: usize) {}
    fn building(&self, _: &ModuleRef, _: &str) {}
    fn cached(&self, _: &ModuleRef, _: &BuildResult) {}
    fn built(&self, _: &ModuleRef, _: &BuildResult, _: Duration) {}
    fn failed(&self, _: &ModuleRef, _: &str) {}
    fn cycle(&self, _: &[ModuleRef]) {}
}

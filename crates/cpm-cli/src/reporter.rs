//! Human-readable progress on stderr.
//!
//! Engine log events are only shown with `-v` or `RUST_LOG`; this reporter
//! is what a user sees by default.

use cpm_core::Reporter;
use cpm_schema::{BuildResult, ModuleRef};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn resolving(&self, main: &ModuleRef) {
        eprintln!("Resolving {main}");
    }

    fn resolved(&self, count: usize) {
        eprintln!("Selected  {count} module(s)");
    }

    fn building(&self, module: &ModuleRef, key: &str) {
        eprintln!("Building  {module} [{key}]");
    }

    fn cached(&self, module: &ModuleRef, _: &BuildResult) {
        eprintln!("Cached    {module}");
    }

    fn built(&self, module: &ModuleRef, _: &BuildResult, elapsed: Duration) {
        eprintln!("Built     {module} ({:.1}s)", elapsed.as_secs_f64());
    }

    fn failed(&self, module: &ModuleRef, reason: &str) {
        eprintln!("Failed    {module}");
        for line in reason.lines() {
            eprintln!("  {line}");
        }
    }

    fn cycle(&self, modules: &[ModuleRef]) {
        let names: Vec<String> = modules.iter().map(ToString::to_string).collect();
        eprintln!("Cycle     {}", names.join(", "));
    }
}

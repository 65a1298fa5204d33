//! Minimal Version Selection.
//!
//! [`build_list`] computes, for every module path reachable from a main
//! module, the maximum version any reachable module requires. Expansion runs
//! on the [`Work`] scheduler: the per-path maximum is commutative and
//! idempotent, so the final selection does not depend on the order in which
//! workers happen to process modules.
//!
//! [`req`] goes the other way and reduces a resolved graph to the smallest
//! explicit requirement list that reproduces it.

use cpm_schema::module::{max_version, sort_modules};
use cpm_schema::{ModuleRef, NONE, version};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::error::{Error, Result};
use crate::scheduler::{Work, default_workers};

/// Ordered, deduplicated resolution result: main module first, one entry per path.
pub type BuildList = Vec<ModuleRef>;

/// The requirement graph as seen by the resolver.
///
/// Implementations may perform I/O in [`Requirements::required`] and are
/// called from several worker threads at once.
pub trait Requirements: Sync {
    /// Direct dependencies of `module`.
    fn required(&self, module: &ModuleRef) -> Result<Vec<ModuleRef>>;

    /// Order two versions of `path`. Defaults to the GNU ordering.
    fn compare(&self, path: &str, v1: &str, v2: &str) -> Ordering {
        let _ = path;
        version::compare(v1, v2)
    }

    /// The greater of two versions of `path`, honouring the main and
    /// `none` sentinels.
    fn max(&self, path: &str, v1: &str, v2: &str) -> String {
        max_version(v1, v2, |a, b| self.compare(path, a, b)).to_string()
    }

    /// Whether `module` is the main module.
    fn is_main(&self, module: &ModuleRef) -> bool {
        module.is_main_version()
    }
}

/// Resolve the build list for `main`, using the default worker count.
///
/// `roots` seeds additional requirements on top of what `main` itself
/// requires. A root for the main module's own path is ignored.
///
/// # Errors
///
/// Returns the first error reported by [`Requirements::required`]; no
/// partial list is returned.
pub fn build_list<R>(main: &ModuleRef, roots: &[ModuleRef], reqs: &R) -> Result<BuildList>
where
    R: Requirements + ?Sized,
{
    build_list_with_workers(main, roots, reqs, default_workers())
}

/// Resolve the build list for `main` with an explicit worker count.
///
/// # Errors
///
/// See [`build_list`].
pub fn build_list_with_workers<R>(
    main: &ModuleRef,
    roots: &[ModuleRef],
    reqs: &R,
    workers: usize,
) -> Result<BuildList>
where
    R: Requirements + ?Sized,
{
    let mut initial: HashMap<String, String> = HashMap::new();
    initial.insert(main.path.clone(), main.version.clone());

    let work = Work::new();
    work.add(main.clone());
    for root in roots {
        if root.path == main.path || root.is_none() {
            continue;
        }
        let current = initial.get(&root.path).map_or(NONE, String::as_str);
        let next = reqs.max(&root.path, current, &root.version);
        initial.insert(root.path.clone(), next);
        work.add(root.clone());
    }

    let selected = Mutex::new(initial);
    let failure: Mutex<Option<Error>> = Mutex::new(None);

    work.run(workers, |module| {
        if failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
        {
            return;
        }

        let required = match reqs.required(&module) {
            Ok(required) => required,
            Err(err) => {
                debug!("requirement expansion of {module} failed: {err}");
                failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert(err);
                return;
            }
        };
        debug!("{module} requires {} module(s)", required.len());

        for dep in required {
            if dep.path == main.path || dep.is_none() {
                continue;
            }
            {
                let mut selected = selected.lock().unwrap_or_else(PoisonError::into_inner);
                let current = selected.get(&dep.path).map_or(NONE, String::as_str);
                let next = reqs.max(&dep.path, current, &dep.version);
                if next != current {
                    debug!("selected {}@{next}", dep.path);
                    selected.insert(dep.path.clone(), next);
                }
            }
            // Every required version is expanded, not only the current
            // maximum, so the reachable set is independent of scheduling.
            work.add(dep);
        }
    });

    if let Some(err) = failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
        return Err(err);
    }

    let selected = selected.into_inner().unwrap_or_else(PoisonError::into_inner);
    let mut list: BuildList = selected
        .into_iter()
        .filter(|(path, version)| *path != main.path && version != NONE)
        .map(|(path, version)| ModuleRef::new(path, version))
        .collect();
    sort_modules(&mut list, |path, a, b| reqs.compare(path, a, b));
    list.insert(0, main.clone());
    Ok(list)
}

/// Minimal explicit requirement list for `main`.
///
/// Re-resolving `main` with exactly the returned requirements reproduces the
/// per-path selection of the full graph. Paths listed in `base` are always
/// kept. The result is sorted by path.
///
/// # Errors
///
/// Returns the first error reported by [`Requirements::required`].
pub fn req<R>(main: &ModuleRef, base: &[String], reqs: &R) -> Result<Vec<ModuleRef>>
where
    R: Requirements + ?Sized,
{
    let list = build_list(main, &[], reqs)?;
    req_from_list(main, &list, base, reqs)
}

/// [`req`] for an already computed build list.
///
/// # Errors
///
/// Returns the first error reported by [`Requirements::required`].
pub fn req_from_list<R>(
    main: &ModuleRef,
    list: &[ModuleRef],
    base: &[String],
    reqs: &R,
) -> Result<Vec<ModuleRef>>
where
    R: Requirements + ?Sized,
{
    // Post-order over everything reachable, excluding main's own edges.
    let mut cache: HashMap<ModuleRef, Vec<ModuleRef>> = HashMap::new();
    cache.insert(main.clone(), Vec::new());
    let mut postorder = Vec::new();
    for module in list {
        walk_postorder(module, reqs, &mut cache, &mut postorder)?;
    }

    let max: HashMap<&str, &str> = list
        .iter()
        .map(|m| (m.path.as_str(), m.version.as_str()))
        .collect();

    let mut have: HashSet<ModuleRef> = HashSet::new();
    let mut min = Vec::new();

    for path in base {
        let Some(version) = max.get(path.as_str()) else {
            continue;
        };
        let module = ModuleRef::new(path.clone(), *version);
        mark_implied(&module, &cache, &mut have);
        min.push(module);
    }

    for module in postorder.iter().rev() {
        if max.get(module.path.as_str()) != Some(&module.version.as_str()) {
            // Superseded version.
            continue;
        }
        if !have.contains(module) {
            mark_implied(module, &cache, &mut have);
            min.push(module.clone());
        }
    }

    min.sort_by(|a, b| a.path.cmp(&b.path));
    min.dedup();
    Ok(min)
}

fn walk_postorder<R>(
    module: &ModuleRef,
    reqs: &R,
    cache: &mut HashMap<ModuleRef, Vec<ModuleRef>>,
    postorder: &mut Vec<ModuleRef>,
) -> Result<()>
where
    R: Requirements + ?Sized,
{
    if cache.contains_key(module) || module.is_none() {
        return Ok(());
    }
    let required: Vec<ModuleRef> = reqs
        .required(module)?
        .into_iter()
        .filter(|m| !m.is_none())
        .collect();
    cache.insert(module.clone(), required.clone());
    for dep in &required {
        walk_postorder(dep, reqs, cache, postorder)?;
    }
    postorder.push(module.clone());
    Ok(())
}

fn mark_implied(
    module: &ModuleRef,
    cache: &HashMap<ModuleRef, Vec<ModuleRef>>,
    have: &mut HashSet<ModuleRef>,
) {
    if !have.insert(module.clone()) {
        return;
    }
    if let Some(required) = cache.get(module) {
        for dep in required {
            mark_implied(dep, cache, have);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// In-memory requirement graph keyed by `path@version`.
    #[derive(Default)]
    pub(crate) struct Graph {
        edges: HashMap<ModuleRef, Vec<ModuleRef>>,
        pub(crate) calls: AtomicUsize,
        fail_on: Option<ModuleRef>,
    }

    impl Graph {
        pub(crate) fn with(mut self, module: &str, deps: &[&str]) -> Self {
            self.edges.insert(
                parse(module),
                deps.iter().map(|d| parse(d)).collect(),
            );
            self
        }

        fn failing(mut self, module: &str) -> Self {
            self.fail_on = Some(parse(module));
            self
        }
    }

    pub(crate) fn parse(spec: &str) -> ModuleRef {
        match spec.split_once('@') {
            Some((p, v)) => ModuleRef::new(p, v),
            None => ModuleRef::main(spec),
        }
    }

    impl Requirements for Graph {
        fn required(&self, module: &ModuleRef) -> Result<Vec<ModuleRef>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.fail_on.as_ref() == Some(module) {
                return Err(Error::Resolution {
                    module: module.clone(),
                    reason: "tag lookup failed".into(),
                });
            }
            Ok(self.edges.get(module).cloned().unwrap_or_default())
        }
    }

    fn render(list: &[ModuleRef]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_selects_maximum_version() {
        let g = Graph::default()
            .with("a", &["b@1.2", "c@1.0"])
            .with("b@1.2", &["c@1.4", "d@0.1"])
            .with("c@1.4", &["d@0.3"]);
        let list = build_list(&parse("a"), &[], &g).unwrap();
        assert_eq!(render(&list), vec!["a", "b@1.2", "c@1.4", "d@0.3"]);
    }

    #[test]
    fn test_confluence_across_orderings_and_workers() {
        // c@1.0 is superseded by c@2.0, but its requirement on d still counts.
        let forward = Graph::default()
            .with("a", &["b@1", "c@1.0"])
            .with("b@1", &["c@2.0"])
            .with("c@1.0", &["d@5"]);
        let backward = Graph::default()
            .with("a", &["c@1.0", "b@1"])
            .with("b@1", &["c@2.0"])
            .with("c@1.0", &["d@5"]);

        let expected = vec!["a", "b@1", "c@2.0", "d@5"];
        for workers in [1, 2, 8] {
            let l1 = build_list_with_workers(&parse("a"), &[], &forward, workers).unwrap();
            let l2 = build_list_with_workers(&parse("a"), &[], &backward, workers).unwrap();
            assert_eq!(render(&l1), expected);
            assert_eq!(render(&l2), expected);
        }
    }

    #[test]
    fn test_main_wins() {
        let g = Graph::default()
            .with("a", &["b@1"])
            .with("b@1", &["a@9.9"]);
        let list = build_list(&parse("a"), &[parse("a@3.0")], &g).unwrap();
        assert_eq!(list[0], parse("a"));
        assert_eq!(list.iter().filter(|m| m.path == "a").count(), 1);
    }

    #[test]
    fn test_roots_seed_selection() {
        let g = Graph::default()
            .with("a", &["b@1"])
            .with("b@2", &["c@1"]);
        let list = build_list(&parse("a"), &[parse("b@2")], &g).unwrap();
        assert_eq!(render(&list), vec!["a", "b@2", "c@1"]);
    }

    #[test]
    fn test_none_is_never_selected() {
        let g = Graph::default().with("a", &["b@none", "c@1"]);
        let list = build_list(&parse("a"), &[], &g).unwrap();
        assert_eq!(render(&list), vec!["a", "c@1"]);
    }

    #[test]
    fn test_cycles_converge() {
        let g = Graph::default()
            .with("a", &["b@1"])
            .with("b@1", &["c@1"])
            .with("c@1", &["b@1", "a@0.5"]);
        let list = build_list(&parse("a"), &[], &g).unwrap();
        assert_eq!(render(&list), vec!["a", "b@1", "c@1"]);
    }

    #[test]
    fn test_error_aborts_without_partial_list() {
        let g = Graph::default()
            .with("a", &["b@1", "c@1"])
            .with("b@1", &["d@1"])
            .failing("c@1");
        let err = build_list(&parse("a"), &[], &g).unwrap_err();
        assert_eq!(err.module(), Some(&parse("c@1")));
    }

    #[test]
    fn test_each_module_expanded_once() {
        let g = Graph::default()
            .with("a", &["b@1", "c@1"])
            .with("b@1", &["d@1"])
            .with("c@1", &["d@1"]);
        build_list_with_workers(&parse("a"), &[], &g, 4).unwrap();
        // a, b@1, c@1, d@1
        assert_eq!(g.calls.load(AtomicOrdering::SeqCst), 4);
    }

    #[test]
    fn test_req_omits_implied_requirement() {
        let g = Graph::default()
            .with("a", &["b@1", "c@1"])
            .with("b@1", &["c@1"]);
        let min = req(&parse("a"), &[], &g).unwrap();
        assert_eq!(render(&min), vec!["b@1"]);
    }

    #[test]
    fn test_req_keeps_upgrade_beyond_implied() {
        let g = Graph::default()
            .with("a", &["b@1", "c@2"])
            .with("b@1", &["c@1"]);
        let min = req(&parse("a"), &[], &g).unwrap();
        assert_eq!(render(&min), vec!["b@1", "c@2"]);

        // Re-resolving from the minimal list reproduces the selection.
        let again = build_list(&parse("a"), &min, &Graph::default().with("b@1", &["c@1"]))
            .unwrap();
        assert_eq!(render(&again), vec!["a", "b@1", "c@2"]);
    }

    #[test]
    fn test_req_base_paths_are_kept() {
        let g = Graph::default()
            .with("a", &["b@1", "c@1"])
            .with("b@1", &["c@1"]);
        let min = req(&parse("a"), &["c".to_string()], &g).unwrap();
        assert_eq!(render(&min), vec!["b@1", "c@1"]);
    }
}

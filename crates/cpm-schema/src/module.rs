//! Module references and the version algebra shared by the resolver.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Version of the main module. Always wins a comparison.
pub const MAIN_VERSION: &str = "";

/// Sentinel version meaning "absent". Always loses a comparison.
pub const NONE: &str = "none";

/// A module at a specific version.
///
/// Identity is the `(path, version)` pair. The version may be
/// [`MAIN_VERSION`] for the main module or [`NONE`] for an excluded one.
///
/// # Example
///
/// ```
/// use cpm_schema::ModuleRef;
///
/// let zlib = ModuleRef::new("github.com/madler/zlib", "1.3.1");
/// assert_eq!(zlib.to_string(), "github.com/madler/zlib@1.3.1");
/// assert!(ModuleRef::main("example.com/app").is_main_version());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleRef {
    /// Module path, e.g. `github.com/madler/zlib`.
    pub path: String,
    /// Version string, tag-like (`1.3.1`, `v2.0.0-rc1`).
    pub version: String,
}

impl ModuleRef {
    /// Create a reference from a path and version.
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    /// Reference to a main module (version [`MAIN_VERSION`]).
    pub fn main(path: impl Into<String>) -> Self {
        Self::new(path, MAIN_VERSION)
    }

    /// Whether this reference carries the main-module version.
    pub fn is_main_version(&self) -> bool {
        self.version == MAIN_VERSION
    }

    /// Whether this reference carries the [`NONE`] sentinel.
    pub fn is_none(&self) -> bool {
        self.version == NONE
    }

    /// Parse a `path@version` spec. A missing version yields an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error string if the path part is empty or the `@` is
    /// followed by nothing.
    pub fn parse_spec(spec: &str) -> Result<Self, String> {
        match spec.rsplit_once('@') {
            Some((path, version)) => {
                if path.is_empty() {
                    return Err(format!("Invalid module spec '{spec}': missing path"));
                }
                if version.is_empty() {
                    return Err(format!("Invalid module spec '{spec}': missing version after @"));
                }
                Ok(Self::new(path, version))
            }
            None if spec.is_empty() => Err("Invalid module spec: empty".to_string()),
            None => Ok(Self::new(spec, "")),
        }
    }
}

impl std::fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}@{}", self.path, self.version)
        }
    }
}

/// Pick the greater of two versions of the same path.
///
/// The main version beats everything, [`NONE`] loses to everything, and
/// versions the comparator considers equal are tie-broken lexically so the
/// result does not depend on argument order.
///
/// ```
/// use cpm_schema::module::max_version;
/// use cpm_schema::version::compare;
///
/// assert_eq!(max_version("none", "1.2", compare), "1.2");
/// assert_eq!(max_version("none", "none", compare), "none");
/// assert_eq!(max_version("1.10", "1.9", compare), "1.10");
/// assert_eq!(max_version("", "9.9", compare), "");
/// ```
pub fn max_version<'a, F>(v1: &'a str, v2: &'a str, cmp: F) -> &'a str
where
    F: Fn(&str, &str) -> Ordering,
{
    if v1 == MAIN_VERSION || v2 == MAIN_VERSION {
        return MAIN_VERSION;
    }
    if v1 == NONE {
        return v2;
    }
    if v2 == NONE {
        return v1;
    }
    match cmp(v1, v2).then_with(|| v1.cmp(v2)) {
        Ordering::Less => v2,
        _ => v1,
    }
}

/// Sort modules by path, then by version.
///
/// Versions are compared with `cmp` on the part before an optional `/`
/// suffix; the suffix only breaks ties.
pub fn sort_modules<F>(list: &mut [ModuleRef], cmp: F)
where
    F: Fn(&str, &str, &str) -> Ordering,
{
    list.sort_by(|a, b| {
        a.path.cmp(&b.path).then_with(|| {
            let (va, sa) = split_suffix(&a.version);
            let (vb, sb) = split_suffix(&b.version);
            cmp(&a.path, va, vb).then_with(|| sa.cmp(sb))
        })
    });
}

fn split_suffix(version: &str) -> (&str, &str) {
    version.split_once('/').unwrap_or((version, ""))
}

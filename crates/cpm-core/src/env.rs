//! Explicit per-build environment.
//!
//! A [`BuildEnv`] is computed once per module build from its install prefix,
//! the build matrix and the output directories of its dependency closure. It
//! is applied to child processes with `env_clear()`, so the host environment
//! never leaks into a build and nothing here mutates the process environment.
//!
//! ## Environment contract
//!
//! | Variable | Value |
//! |---|---|
//! | `PATH` | each dependency's `bin/`, then `/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin` |
//! | `HOME` | The install prefix |
//! | `TERM` / `LANG` | `dumb` / `C.UTF-8` |
//! | `PREFIX` / `OUTPUT` | Install destination |
//! | `JOBS` | Logical CPU count |
//! | `SOURCE_DATE_EPOCH` | `0` |
//! | `CPM_ARCH` / `CPM_OS` | Matrix fixed axes |
//! | `CPM_MATRIX` | Matrix key |
//! | `CPM_OPT_<NAME>` | Comma-separated values of each option axis |
//! | `DEP_<NAME>` | Output dir of each dependency (last path segment, uppercased) |
//! | `CFLAGS` / `CPPFLAGS` | `-I` flags for each dependency's `include/` |
//! | `LDFLAGS` | `-L` flags for each dependency's `lib/` |
//! | `CPATH`, `C_INCLUDE_PATH`, `CPLUS_INCLUDE_PATH` | Colon-separated include paths |
//! | `LIBRARY_PATH` | Colon-separated library paths |
//! | `PKG_CONFIG_PATH` | Colon-separated `lib/pkgconfig` paths |

use cpm_schema::Matrix;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

const SYSTEM_PATH: [&str; 5] = ["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"];

/// Fixed epoch so embedded timestamps do not vary between builds.
const SOURCE_DATE_EPOCH: &str = "0";

/// Immutable environment handed to one module build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
}

impl BuildEnv {
    /// Environment for a build installing into `prefix` under `matrix`.
    ///
    /// `deps` pairs each dependency's module path with its output directory,
    /// dependencies first.
    pub fn new(prefix: &Path, matrix: &Matrix, deps: &[(String, PathBuf)]) -> Self {
        let mut vars = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            vars.insert(key.to_string(), value);
        };

        let prefix_str = prefix.to_string_lossy().to_string();
        put("HOME", prefix_str.clone());
        put("PREFIX", prefix_str.clone());
        put("OUTPUT", prefix_str);
        put("TERM", "dumb".into());
        put("LANG", "C.UTF-8".into());
        put("JOBS", num_cpus::get().to_string());
        put("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH.into());

        put("CPM_ARCH", matrix.arch().to_string());
        put("CPM_OS", matrix.os().to_string());
        put("CPM_MATRIX", matrix.key());
        for (name, values) in matrix.options() {
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            put(&format!("CPM_OPT_{}", env_name(name)), values.join(","));
        }

        let mut path_dirs: Vec<String> = Vec::new();
        let mut include_paths: Vec<String> = Vec::new();
        let mut library_paths: Vec<String> = Vec::new();
        let mut pkg_config_paths: Vec<String> = Vec::new();

        for (module_path, dir) in deps {
            let name = module_path.rsplit('/').next().unwrap_or(module_path);
            put(
                &format!("DEP_{}", env_name(name)),
                dir.to_string_lossy().to_string(),
            );

            let bin = dir.join("bin");
            if bin.is_dir() {
                path_dirs.push(bin.to_string_lossy().to_string());
            }
            let include = dir.join("include");
            if include.is_dir() {
                include_paths.push(include.to_string_lossy().to_string());
            }
            let lib = dir.join("lib");
            if lib.is_dir() {
                library_paths.push(lib.to_string_lossy().to_string());
            }
            let pkgconfig = dir.join("lib/pkgconfig");
            if pkgconfig.is_dir() {
                pkg_config_paths.push(pkgconfig.to_string_lossy().to_string());
            }
        }

        path_dirs.extend(SYSTEM_PATH.iter().map(ToString::to_string));
        put("PATH", path_dirs.join(":"));

        if !include_paths.is_empty() {
            let cflags: Vec<String> = include_paths.iter().map(|p| format!("-I{p}")).collect();
            let cflags = cflags.join(" ");
            put("CFLAGS", cflags.clone());
            put("CPPFLAGS", cflags);
            let joined = include_paths.join(":");
            put("CPATH", joined.clone());
            put("C_INCLUDE_PATH", joined.clone());
            put("CPLUS_INCLUDE_PATH", joined);
        }
        if !library_paths.is_empty() {
            let ldflags: Vec<String> = library_paths.iter().map(|p| format!("-L{p}")).collect();
            put("LDFLAGS", ldflags.join(" "));
            put("LIBRARY_PATH", library_paths.join(":"));
        }
        if !pkg_config_paths.is_empty() {
            put("PKG_CONFIG_PATH", pkg_config_paths.join(":"));
        }

        Self { vars }
    }

    /// A copy with one more variable set.
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replace the environment of `cmd` with exactly these variables.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env_clear();
        cmd.envs(&self.vars);
    }
}

/// `openssl-3` -> `OPENSSL_3`
fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_dependency_flags() {
        let dep = tempdir().unwrap();
        std::fs::create_dir_all(dep.path().join("include")).unwrap();
        std::fs::create_dir_all(dep.path().join("lib/pkgconfig")).unwrap();
        std::fs::create_dir_all(dep.path().join("bin")).unwrap();

        let matrix = Matrix::new("amd64", "linux").unwrap();
        let deps = vec![("github.com/madler/zlib".to_string(), dep.path().to_path_buf())];
        let env = BuildEnv::new(Path::new("/out/app"), &matrix, &deps);

        let inc = dep.path().join("include").to_string_lossy().to_string();
        assert_eq!(env.get("CFLAGS"), Some(format!("-I{inc}").as_str()));
        assert_eq!(env.get("CPATH"), Some(inc.as_str()));
        assert!(env.get("LDFLAGS").unwrap().starts_with("-L"));
        assert!(env.get("PKG_CONFIG_PATH").unwrap().ends_with("lib/pkgconfig"));
        assert_eq!(
            env.get("DEP_ZLIB"),
            Some(&*dep.path().to_string_lossy())
        );
        assert!(env.get("PATH").unwrap().starts_with(&*dep.path().join("bin").to_string_lossy()));
        assert_eq!(env.get("PREFIX"), Some("/out/app"));
    }

    #[test]
    fn test_no_flags_without_deps() {
        let matrix = Matrix::new("arm64", "darwin")
            .unwrap()
            .with_option("simd", "neon")
            .unwrap();
        let env = BuildEnv::new(Path::new("/out"), &matrix, &[]);
        assert_eq!(env.get("CFLAGS"), None);
        assert_eq!(env.get("LDFLAGS"), None);
        assert_eq!(env.get("CPM_OS"), Some("darwin"));
        assert_eq!(env.get("CPM_OPT_SIMD"), Some("neon"));
        assert_eq!(env.get("CPM_MATRIX"), Some("arm64-darwin+simd=neon"));
    }

    #[test]
    fn test_host_environment_does_not_leak() {
        let env = BuildEnv::new(Path::new("/out"), &Matrix::host(), &[]).with_var("EXTRA", "1");
        let mut cmd = Command::new("/bin/sh");
        env.apply(&mut cmd);
        let keys: Vec<String> = cmd
            .get_envs()
            .filter(|(_, v)| v.is_some())
            .map(|(k, _)| k.to_string_lossy().to_string())
            .collect();
        assert!(keys.contains(&"EXTRA".to_string()));
        assert!(!keys.contains(&"CARGO".to_string()));
        assert_eq!(keys.len(), env.vars().count());
    }

    #[test]
    fn test_env_name() {
        assert_eq!(env_name("openssl-3.x"), "OPENSSL_3_X");
    }
}

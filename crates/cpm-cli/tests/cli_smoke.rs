//! Smoke tests driving the `cpm` binary against a local registry.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// An isolated CPM_HOME with a registry and a project directory.
struct TestContext {
    _temp_dir: TempDir,
    cpm_home: PathBuf,
    project: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let cpm_home = temp_dir.path().join(".cpm");
        let project = temp_dir.path().join("project");
        std::fs::create_dir_all(&cpm_home).expect("failed to create cpm home");
        std::fs::create_dir_all(&project).expect("failed to create project");
        Self {
            _temp_dir: temp_dir,
            cpm_home,
            project,
        }
    }

    /// Publish `path@version` with the given recipe.
    fn publish(&self, path: &str, version: &str, recipe: &str) {
        let dir = self.cpm_home.join("registry").join(path).join(version);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("recipe.toml"), recipe).unwrap();
    }

    fn project_recipe(&self, recipe: &str) {
        std::fs::write(self.project.join("recipe.toml"), recipe).unwrap();
    }

    fn cpm(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_cpm"))
            .env("CPM_HOME", &self.cpm_home)
            .env_remove("RUST_LOG")
            .arg("-C")
            .arg(&self.project)
            .arg("--module")
            .arg("example.com/app")
            .args(args)
            .output()
            .expect("failed to run cpm")
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn lines(output: &Output) -> Vec<String> {
    stdout(output).lines().map(ToString::to_string).collect()
}

fn recipe(name: &str, requires: &[(&str, &str)], script: &str) -> String {
    let mut out = format!("[package]\nname = \"{name}\"\n\n[requires]\n");
    for (path, version) in requires {
        out.push_str(&format!("\"{path}\" = \"{version}\"\n"));
    }
    out.push_str(&format!("\n[build]\nscript = '''{script}'''\n"));
    out
}

/// app -> curl@8 -> zlib@1.3; app -> zlib (latest)
fn setup() -> TestContext {
    let ctx = TestContext::new();
    let install = "mkdir -p $PREFIX/lib && echo $CPM_MATRIX > $PREFIX/lib/built";
    ctx.publish("zlib", "1.2", &recipe("zlib", &[], install));
    ctx.publish("zlib", "1.3", &recipe("zlib", &[], install));
    ctx.publish("curl", "8", &recipe("curl", &[("zlib", "1.2")], install));
    ctx.project_recipe(&recipe(
        "app",
        &[("curl", "8"), ("zlib", "")],
        "test -n \"$DEP_CURL\" && test -f \"$DEP_ZLIB/lib/built\"",
    ));
    ctx
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = Command::new(env!("CARGO_BIN_EXE_cpm"))
        .env("CPM_HOME", &ctx.cpm_home)
        .arg("--help")
        .output()
        .expect("failed to run cpm");
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage:"));
}

#[test]
fn test_resolve_prints_build_list() {
    let ctx = setup();
    let output = ctx.cpm(&["resolve"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(lines(&output), vec!["example.com/app", "curl@8", "zlib@1.3"]);
}

#[test]
fn test_graph_prints_dependencies_first() {
    let ctx = setup();
    let output = ctx.cpm(&["graph"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        lines(&output),
        vec!["zlib@1.3", "curl@8: zlib@1.3", "example.com/app: curl@8 zlib@1.3"]
    );
}

#[test]
fn test_build_then_cached() {
    let ctx = setup();
    let output = ctx.cpm(&["build", "--arch", "amd64", "--os", "linux"]);
    assert!(output.status.success(), "{output:?}");
    let built = lines(&output);
    assert_eq!(built.len(), 3);
    assert!(built[0].starts_with("zlib@1.3 "));

    let zlib_out = Path::new(built[0].split_once(' ').unwrap().1);
    assert_eq!(
        std::fs::read_to_string(zlib_out.join("lib/built")).unwrap().trim(),
        "amd64-linux"
    );

    let again = ctx.cpm(&["build", "--arch", "amd64", "--os", "linux"]);
    assert!(again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("Cached    zlib@1.3"));
}

#[test]
fn test_failing_build_exits_non_zero() {
    let ctx = setup();
    ctx.publish("zlib", "1.4", &recipe("zlib", &[], "echo broken toolchain >&2; exit 1"));
    let output = ctx.cpm(&["build"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("zlib@1.4"));
    assert!(stderr.contains("broken toolchain"));
}

#[test]
fn test_tidy_and_get_write_manifest() {
    let ctx = setup();
    let output = ctx.cpm(&["get", "zlib@1.2"]);
    assert!(output.status.success(), "{output:?}");

    let manifest = cpm_schema::Manifest::load(&ctx.project.join("cpm.json")).unwrap();
    assert_eq!(manifest.id, "example.com/app");
    assert_eq!(manifest.pinned("", "zlib"), Some("1.2"));
    assert_eq!(manifest.pinned("", "curl"), Some("8"));

    // The pin replaces "latest": zlib now resolves to 1.2.
    let output = ctx.cpm(&["resolve"]);
    assert_eq!(lines(&output), vec!["example.com/app", "curl@8", "zlib@1.2"]);
}

#[test]
fn test_verbose_logs_session_setup() {
    let ctx = setup();
    let output = ctx.cpm(&["-v", "resolve"]);
    assert!(output.status.success(), "{output:?}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("main module example.com/app"), "{stderr}");
}

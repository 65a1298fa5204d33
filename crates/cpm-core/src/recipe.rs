//! Declarative `recipe.toml` formulas.
//!
//! ```toml
//! [package]
//! name = "curl"
//! version_scheme = "gnu"    # or "lexical"
//!
//! [requires]
//! "github.com/madler/zlib" = "1.3"
//! "github.com/openssl/openssl" = ""   # manifest pin, else latest
//!
//! [build]
//! script = "./configure --prefix=$PREFIX && make -j$JOBS install"
//! metadata = "shared"
//! ```

use cpm_schema::version::Scheme;
use cpm_schema::{BuildResult, ModuleRef};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::formula::{BuildContext, DepsSink, Formula, FormulaLoader, Project};

/// File name of a recipe inside a module's source tree.
pub const RECIPE_FILE: &str = "recipe.toml";

#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(default)]
    pub version_scheme: Scheme,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Shell script run in the source tree; installs into `$PREFIX`.
    #[serde(default)]
    pub script: Option<String>,
    /// Exported to dependents through the build result.
    #[serde(default)]
    pub metadata: String,
}

/// A parsed `recipe.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub package: PackageInfo,
    /// Module path to version; an empty version is resolved at run time.
    #[serde(default)]
    pub requires: BTreeMap<String, String>,
    #[serde(default)]
    pub build: BuildSpec,
}

impl Recipe {
    /// # Errors
    ///
    /// Returns a [`RecipeError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, RecipeError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// # Errors
    ///
    /// Returns [`RecipeError::Parse`] on invalid TOML or missing fields.
    pub fn parse(content: &str) -> Result<Self, RecipeError> {
        Ok(toml::from_str(content)?)
    }
}

impl Formula for Recipe {
    fn on_require(&self, _project: &Project, deps: &mut DepsSink) -> anyhow::Result<()> {
        for (path, version) in &self.requires {
            deps.require(path.clone(), version.clone());
        }
        Ok(())
    }

    fn on_build(
        &self,
        ctx: &BuildContext,
        project: &Project,
        result: &mut BuildResult,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(ctx.output_dir())?;
        if let Some(script) = &self.build.script {
            ctx.run_script(script, &project.source_dir)?;
        }
        result.metadata.clone_from(&self.build.metadata);
        Ok(())
    }

    fn compare(&self, v1: &str, v2: &str) -> Ordering {
        self.package.version_scheme.compare(v1, v2)
    }
}

/// Loads [`Recipe`] formulas from `recipe.toml` at the root of a source tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecipeLoader;

impl FormulaLoader for RecipeLoader {
    fn load(&self, module: &ModuleRef, dir: &Path) -> anyhow::Result<Arc<dyn Formula>> {
        let file = dir.join(RECIPE_FILE);
        let recipe = Recipe::from_file(&file)
            .map_err(|e| anyhow::anyhow!("{} for {module}: {e}", file.display()))?;
        Ok(Arc::new(recipe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::BuildEnv;
    use cpm_schema::Matrix;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    const CURL: &str = r#"
[package]
name = "curl"

[requires]
"github.com/madler/zlib" = "1.3"
"github.com/openssl/openssl" = ""

[build]
script = "mkdir -p $PREFIX/lib && echo $CPM_OS > $PREFIX/lib/os"
metadata = "shared"
"#;

    #[test]
    fn test_parse_recipe() {
        let recipe = Recipe::parse(CURL).unwrap();
        assert_eq!(recipe.package.name, "curl");
        assert_eq!(recipe.package.version_scheme, Scheme::Gnu);
        assert_eq!(recipe.requires.len(), 2);
        assert_eq!(recipe.requires["github.com/openssl/openssl"], "");
    }

    #[test]
    fn test_missing_package_table_is_an_error() {
        assert!(matches!(
            Recipe::parse("[requires]\nzlib = \"1\"\n"),
            Err(RecipeError::Parse(_))
        ));
    }

    #[test]
    fn test_lexical_scheme() {
        let recipe = Recipe::parse("[package]\nname = \"x\"\nversion_scheme = \"lexical\"\n").unwrap();
        assert_eq!(recipe.compare("10", "9"), Ordering::Less);
        let gnu = Recipe::parse("[package]\nname = \"x\"\n").unwrap();
        assert_eq!(gnu.compare("10", "9"), Ordering::Greater);
    }

    #[test]
    fn test_on_require_declares_table() {
        let recipe = Recipe::parse(CURL).unwrap();
        let project = Project {
            module: ModuleRef::new("curl", "8"),
            source_dir: "/src".into(),
            manifest: None,
        };
        let mut sink = DepsSink::default();
        recipe.on_require(&project, &mut sink).unwrap();
        assert_eq!(
            sink.into_inner(),
            vec![
                ("github.com/madler/zlib".to_string(), "1.3".to_string()),
                ("github.com/openssl/openssl".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_on_build_runs_script() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let matrix = Matrix::new("arm64", "darwin").unwrap();
        let ctx = BuildContext::new(
            ModuleRef::new("curl", "8"),
            matrix.clone(),
            BTreeMap::new(),
            BuildEnv::new(&out, &matrix, &[]),
            out.clone(),
            dir.path().join("build.log"),
            CancellationToken::new(),
        );
        let project = Project {
            module: ModuleRef::new("curl", "8"),
            source_dir: dir.path().to_path_buf(),
            manifest: None,
        };
        let mut result = BuildResult::new(&out);
        Recipe::parse(CURL)
            .unwrap()
            .on_build(&ctx, &project, &mut result)
            .unwrap();
        assert_eq!(result.metadata, "shared");
        assert_eq!(
            fs::read_to_string(out.join("lib/os")).unwrap().trim(),
            "darwin"
        );
    }

    #[test]
    fn test_loader_reports_missing_recipe() {
        let dir = tempdir().unwrap();
        let err = RecipeLoader
            .load(&ModuleRef::new("zlib", "1.3"), dir.path())
            .err()
            .unwrap();
        assert!(err.to_string().contains("zlib@1.3"));
    }
}

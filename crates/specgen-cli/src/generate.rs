//! `specgen generate`.

use anyhow::{anyhow, Context, Result};
use specgen_config::{BaseDependencies, HomeLayout, CONFIG_FILE};
use specgen_core::{Generator, GeneratorOptions};
use std::env;
use std::path::{Path, PathBuf};

/// Options for a generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Generation file path or URL (defaults to `apex.yaml`).
    pub config: Option<String>,

    /// Home directory override.
    pub home: Option<PathBuf>,
}

impl GenerateOptions {
    fn config_location(&self) -> &str {
        self.config.as_deref().unwrap_or(CONFIG_FILE)
    }

    fn home_layout(&self) -> Result<HomeLayout> {
        match &self.home {
            Some(dir) => Ok(HomeLayout::new(dir)),
            None => HomeLayout::discover().context("Failed to locate the specgen home directory"),
        }
    }
}

/// Code generation modules and shared definitions the CLI needs on top of the core.
fn base_dependencies() -> BaseDependencies {
    BaseDependencies::defaults().with(
        "@apexlang/codegen",
        [
            "src/@apexlang/codegen",
            "templates/@apexlang/codegen",
            "definitions/@apexlang",
        ],
    )
}

fn generator_options(working_dir: &Path, home: HomeLayout) -> GeneratorOptions {
    let mut options = GeneratorOptions::new(working_dir, home);
    options.dependencies = base_dependencies();
    options
}

/// Generate every target of the generation file in the current directory.
pub fn generate(options: &GenerateOptions) -> Result<()> {
    let working_dir = env::current_dir().context("Failed to get current directory")?;
    let home = options.home_layout()?;
    tracing::debug!(home = %home.root().display(), "using home directory");

    let mut generator = Generator::new(generator_options(&working_dir, home));
    generator
        .run_file(options.config_location())
        .map_err(|e| anyhow!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_defaults_to_apex_yaml() {
        let options = GenerateOptions::default();
        assert_eq!(options.config_location(), "apex.yaml");

        let options = GenerateOptions {
            config: Some("other.yaml".to_string()),
            home: None,
        };
        assert_eq!(options.config_location(), "other.yaml");
    }

    #[test]
    fn codegen_modules_are_required() {
        let tmp = TempDir::new().unwrap();
        let home = HomeLayout::new(tmp.path());
        let options = generator_options(tmp.path(), home.clone());

        let missing = options.dependencies.missing(&home);
        assert_eq!(missing, vec!["@apexlang/codegen", "@apexlang/core"]);

        for dir in [
            "src/@apexlang/core",
            "templates/@apexlang/core",
            "src/@apexlang/codegen",
            "templates/@apexlang/codegen",
            "definitions/@apexlang",
        ] {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        assert!(options.dependencies.missing(&home).is_empty());
    }

    #[test]
    fn home_override() {
        let tmp = TempDir::new().unwrap();
        let options = GenerateOptions {
            config: None,
            home: Some(tmp.path().to_path_buf()),
        };
        let layout = options.home_layout().unwrap();
        assert_eq!(layout.root(), tmp.path());
    }
}

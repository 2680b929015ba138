//! Home directory layout and base dependency checks.
//!
//! ```text
//! ~/.apex/
//! ├── src/              # Installed generator modules (with tsconfig.json)
//! ├── node_modules/     # Module search path handed to the bundler
//! ├── templates/        # Project templates
//! ├── definitions/      # Shared spec definitions served to the sandbox
//! └── formatters/       # Formatter bundles and WebAssembly modules
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory name of the home directory under the user's home.
pub const HOME_DIR_NAME: &str = ".apex";

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "SPECGEN_HOME";

/// Installed module sources.
pub const SOURCE_DIR: &str = "src";

/// Module search path.
pub const NODE_MODULES_DIR: &str = "node_modules";

/// Project templates.
pub const TEMPLATES_DIR: &str = "templates";

/// Spec definitions.
pub const DEFINITIONS_DIR: &str = "definitions";

/// Formatter assets.
pub const FORMATTERS_DIR: &str = "formatters";

/// Spec definition file extension.
pub const DEFINITION_EXT: &str = "apex";

/// Definition loaded when a directory is imported.
pub const INDEX_FILE: &str = "index.apex";

const TSCONFIG_FILE: &str = "tsconfig.json";

const TSCONFIG_CONTENTS: &str = r#"{
  "compilerOptions": {
    "module": "commonjs",
    "target": "esnext",
    "baseUrl": ".",
    "lib": [
      "esnext"
    ],
    "outDir": "../dist"
  }
}
"#;

/// Errors that can occur when preparing the home directory.
#[derive(Error, Debug)]
pub enum HomeError {
    #[error("could not determine home directory")]
    NoHomeDirectory,

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("missing base dependencies: {}; install them into {home}", .missing.join(", "))]
    MissingDependencies { missing: Vec<String>, home: PathBuf },

    #[error("failed to install {dependency}: {reason}")]
    Install { dependency: String, reason: String },
}

/// Installs a module into the home directory.
///
/// Downloading and unpacking modules lives outside this crate; callers that
/// can install plug an implementation into [`BaseDependencies::ensure`].
pub trait ModuleInstaller {
    /// Install `dependency` into `home`.
    fn install(&self, dependency: &str, home: &HomeLayout) -> Result<(), String>;
}

/// Paths inside the home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeLayout {
    root: PathBuf,
}

impl HomeLayout {
    /// Use `root` as the home directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locate the home directory: `SPECGEN_HOME` if set, else `~/.apex`.
    ///
    /// # Errors
    ///
    /// Returns an error if the user's home directory cannot be determined.
    pub fn discover() -> Result<Self, HomeError> {
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(root));
        }
        let home = dirs::home_dir().ok_or(HomeError::NoHomeDirectory)?;
        Ok(Self::new(home.join(HOME_DIR_NAME)))
    }

    /// Root of the home directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join(SOURCE_DIR)
    }

    pub fn node_modules_dir(&self) -> PathBuf {
        self.root.join(NODE_MODULES_DIR)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join(TEMPLATES_DIR)
    }

    pub fn definitions_dir(&self) -> PathBuf {
        self.root.join(DEFINITIONS_DIR)
    }

    pub fn formatters_dir(&self) -> PathBuf {
        self.root.join(FORMATTERS_DIR)
    }

    /// Create any missing directories and the editor `tsconfig.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or file cannot be created.
    pub fn ensure(&self) -> Result<(), HomeError> {
        for dir in [
            self.src_dir(),
            self.templates_dir(),
            self.definitions_dir(),
            self.formatters_dir(),
        ] {
            create_dir(&dir)?;
        }

        let tsconfig = self.src_dir().join(TSCONFIG_FILE);
        if !tsconfig.exists() {
            fs::write(&tsconfig, TSCONFIG_CONTENTS).map_err(|source| HomeError::Io {
                path: tsconfig.clone(),
                source,
            })?;
        }

        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<(), HomeError> {
    if dir.exists() {
        return Ok(());
    }
    tracing::debug!(path = %dir.display(), "creating directory");
    fs::create_dir_all(dir).map_err(|source| HomeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    restrict_permissions(dir)
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> Result<(), HomeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|source| HomeError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> Result<(), HomeError> {
    Ok(())
}

/// Modules that must be present in the home directory before generating.
///
/// Maps a dependency name to the home-relative paths it installs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseDependencies {
    entries: BTreeMap<String, Vec<String>>,
}

impl BaseDependencies {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The core modules every generator imports.
    pub fn defaults() -> Self {
        Self::new().with(
            "@apexlang/core",
            ["src/@apexlang/core", "templates/@apexlang/core"],
        )
    }

    /// Add or replace a dependency.
    #[must_use]
    pub fn with<I, S>(mut self, name: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .insert(name.into(), paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dependencies with at least one required path absent from `home`.
    pub fn missing(&self, home: &HomeLayout) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, paths)| {
                paths.iter().any(|relative| {
                    let path = relative
                        .split('/')
                        .fold(home.root().to_path_buf(), |acc, part| acc.join(part));
                    !path.exists()
                })
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Make sure every dependency is installed.
    ///
    /// Missing dependencies are handed to `installer`; without one they are
    /// reported as an error.
    ///
    /// # Errors
    ///
    /// Returns an error when dependencies are missing and cannot be installed.
    pub fn ensure(
        &self,
        home: &HomeLayout,
        installer: Option<&dyn ModuleInstaller>,
    ) -> Result<(), HomeError> {
        let missing = self.missing(home);
        if missing.is_empty() {
            return Ok(());
        }

        let Some(installer) = installer else {
            return Err(HomeError::MissingDependencies {
                missing: missing.iter().map(ToString::to_string).collect(),
                home: home.root().to_path_buf(),
            });
        };

        tracing::info!("Installing base dependencies...");
        for dependency in missing {
            installer
                .install(dependency, home)
                .map_err(|reason| HomeError::Install {
                    dependency: dependency.to_string(),
                    reason,
                })?;
        }
        Ok(())
    }
}

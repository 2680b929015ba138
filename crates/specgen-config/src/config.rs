//! Generation file (`apex.yaml`) parsing and validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::source::read_source;

/// The default generation filename.
pub const CONFIG_FILE: &str = "apex.yaml";

/// Reserved configuration key holding the destination filename.
///
/// Always injected last when merging, so user configuration cannot override it.
pub const FILENAME_KEY: &str = "$filename";

/// Free-form configuration handed to generator modules.
pub type ConfigMap = Map<String, Value>;

/// Errors that can occur when loading generation files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        source: std::io::Error,
    },

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("spec is required")]
    MissingSpec,

    #[error("generates is required")]
    MissingTargets,
}

/// One generation document: a spec and the files generated from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Path or HTTP(S) URL of the specification document.
    #[serde(default)]
    pub spec: String,

    /// Configuration shared by every target.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: ConfigMap,

    /// Destination filename to target description.
    #[serde(default)]
    pub generates: BTreeMap<String, TargetSpec>,
}

/// How a single destination file is produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Module that provides the visitor.
    #[serde(default)]
    pub module: String,

    /// Visitor exported by `module`; the module's default visitor when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_class: Option<String>,

    /// Skip the target when the destination already exists.
    #[serde(default)]
    pub if_not_exists: bool,

    /// Mark the written file as executable.
    #[serde(default)]
    pub executable: bool,

    /// Target configuration, overriding the shared configuration.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: ConfigMap,

    /// Commands to run once every file has been generated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_after: Vec<Command>,
}

/// A post-generation command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Command {
    /// Command line; may span several lines.
    pub command: String,

    /// Working directory; the project directory when empty.
    #[serde(default)]
    pub dir: String,
}

impl GenerationConfig {
    /// Load every generation document from a path or URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or any document is invalid.
    pub fn load(location: &str, base_dir: &Path) -> Result<Vec<Self>, ConfigError> {
        let content = read_source(location, base_dir)?;
        Self::parse_all(&content)
    }

    /// Parse a YAML stream holding one or more `---` separated documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a document is missing required fields.
    pub fn parse_all(content: &str) -> Result<Vec<Self>, ConfigError> {
        let mut configs = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            let config = Self::deserialize(document)?;
            config.validate()?;
            configs.push(config);
        }
        if configs.is_empty() {
            return Err(ConfigError::MissingSpec);
        }
        Ok(configs)
    }

    /// Parse a single generation document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or missing required fields.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.spec.trim().is_empty() {
            return Err(ConfigError::MissingSpec);
        }
        if self.generates.is_empty() {
            return Err(ConfigError::MissingTargets);
        }
        Ok(())
    }
}

impl TargetSpec {
    /// The requested visitor, treating an empty name as unset.
    pub fn visitor(&self) -> Option<&str> {
        self.visitor_class
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Merge shared configuration under this target's configuration.
    ///
    /// Target keys win, shared keys fill the gaps, and [`FILENAME_KEY`] is
    /// set to `filename` last.
    pub fn merged_config(&self, shared: &ConfigMap, filename: &str) -> ConfigMap {
        let mut merged = shared.clone();
        for (key, value) in &self.config {
            merged.insert(key.clone(), value.clone());
        }
        merged.insert(
            FILENAME_KEY.to_string(),
            Value::String(filename.to_string()),
        );
        merged
    }
}

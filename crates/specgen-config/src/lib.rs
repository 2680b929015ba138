//! Generation configuration for specgen.
//!
//! This crate provides:
//! - Parsing and validation of `apex.yaml` generation files
//! - Shared/target configuration merging
//! - Reading spec documents and configuration from disk or HTTP(S)
//! - The home directory layout and base dependency checks

mod config;
mod home;
mod source;

pub use config::{
    Command, ConfigError, ConfigMap, GenerationConfig, TargetSpec, CONFIG_FILE, FILENAME_KEY,
};
pub use home::{
    BaseDependencies, HomeError, HomeLayout, ModuleInstaller, DEFINITIONS_DIR, DEFINITION_EXT,
    FORMATTERS_DIR, HOME_DIR_NAME, HOME_ENV, INDEX_FILE, NODE_MODULES_DIR, SOURCE_DIR,
    TEMPLATES_DIR,
};
pub use source::{is_remote, read_source};

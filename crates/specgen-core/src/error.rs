//! Generation errors and per-run aggregation.
//!
//! A failing target never aborts the run: its error is logged when collected
//! and generation moves on. At the end a single failure is reported as is
//! and several are summarized by count.

use specgen_config::{ConfigError, HomeError};
use thiserror::Error;

use crate::bundle::BundleError;
use crate::command::CommandError;
use crate::entry::EntryError;
use crate::format::FormatError;
use crate::sandbox::SandboxError;
use crate::source_map::SourceMapError;

/// Errors that can occur while generating files.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("{message}")]
    Validation { target: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not read spec {location}: {source}")]
    Spec {
        location: String,
        source: ConfigError,
    },

    #[error(transparent)]
    Home(#[from] HomeError),

    #[error("{target}: {source}")]
    Entry { target: String, source: EntryError },

    #[error("{target}: {source}")]
    Bundle { target: String, source: BundleError },

    #[error("{target}: could not parse source map: {source}")]
    SourceMap {
        target: String,
        source: SourceMapError,
    },

    #[error("{target}: {source}")]
    Sandbox {
        target: String,
        source: SandboxError,
    },

    /// A script exception, with its stack translated to original sources.
    #[error("{trace}")]
    Script { target: String, trace: String },

    #[error("{target}: {source}")]
    Format { target: String, source: FormatError },

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl GenerateError {
    /// The destination file the error belongs to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            GenerateError::Validation { target, .. }
            | GenerateError::Entry { target, .. }
            | GenerateError::Bundle { target, .. }
            | GenerateError::SourceMap { target, .. }
            | GenerateError::Sandbox { target, .. }
            | GenerateError::Script { target, .. }
            | GenerateError::Format { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// The final outcome of a failed run.
#[derive(Error, Debug)]
pub enum GenerationFailure {
    #[error(transparent)]
    Single(GenerateError),

    #[error("generation failed due to {} error(s)", .0.len())]
    Multiple(Vec<GenerateError>),
}

impl GenerationFailure {
    pub fn errors(&self) -> &[GenerateError] {
        match self {
            GenerationFailure::Single(error) => std::slice::from_ref(error),
            GenerationFailure::Multiple(errors) => errors,
        }
    }
}

/// Ordered collection of the failures of one run.
#[derive(Debug, Default)]
pub struct AggregatedError {
    errors: Vec<GenerateError>,
}

impl AggregatedError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and log it.
    pub fn push(&mut self, error: impl Into<GenerateError>) {
        let error = error.into();
        tracing::error!("{error}");
        self.errors.push(error);
    }

    /// Append failures that were already logged.
    pub fn extend(&mut self, other: AggregatedError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[GenerateError] {
        &self.errors
    }

    /// Collapse into the run's result.
    pub fn into_result(mut self) -> Result<(), GenerationFailure> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(GenerationFailure::Single(self.errors.remove(0))),
            _ => Err(GenerationFailure::Multiple(self.errors)),
        }
    }
}

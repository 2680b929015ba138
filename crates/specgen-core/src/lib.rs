//! Specgen Core - generation engine for specgen
//!
//! This crate provides the core functionality:
//! - Codec: JSON values across the script boundary
//! - Sandbox: QuickJS sessions running bundled generator modules
//! - Resolve: definition lookups served to scripts
//! - Native: WebAssembly formatter modules over shared linear memory
//! - Source maps and stack trace translation
//! - Bundle: entry script bundling
//! - Generate: the per-target generation pipeline

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Value conversion between JSON and script values
pub mod codec;

/// Script sandbox sessions
pub mod sandbox;

/// Definition resolution callback
pub mod resolve;

/// WebAssembly formatter bridge
pub mod native;

/// Source map v3 decoding
pub mod source_map;

/// Stack trace translation through source maps
pub mod stack_trace;

/// Entry script bundling
pub mod bundle;

/// Generated entry scripts
pub mod entry;

/// Formatter dispatch by file extension
pub mod format;

/// Post-generation commands
pub mod command;

/// Generation errors and aggregation
pub mod error;

/// Generation orchestrator
pub mod generate;

/// Convenience re-export of the orchestrator
pub use generate::{Generator, GeneratorOptions};

/// Convenience re-export of error types
pub use error::{AggregatedError, GenerateError, GenerationFailure};

/// Convenience re-export of bundler types
pub use bundle::{Bundle, BundleError, BundleRequest, Bundler, EsbuildBundler};

/// Convenience re-export of sandbox types
pub use sandbox::{FormatterSession, HostCallback, SandboxError, SandboxLimits, SandboxSession};

/// Convenience re-export of the native formatter
pub use native::{NativeError, NativeExports, NativeFormatter};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}

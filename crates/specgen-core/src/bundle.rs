//! Bundling generated entry scripts with their imported modules.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// File name of the emitted bundle.
pub const BUNDLE_FILE: &str = "bundle.js";

/// Errors from bundling an entry script.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("bundler returned errors ({status}):\n{stderr}")]
    Failed { status: String, stderr: String },

    #[error("bundler did not produce exactly 2 output files (got {0})")]
    OutputCount(usize),

    #[error("unexpected bundler outputs: {}", .0.join(", "))]
    UnexpectedOutputs(Vec<String>),

    #[error("bundle IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to bundle.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    /// Entry script contents, fed on stdin.
    pub entry: String,
    /// Name the entry is reported under in the source map.
    pub sourcefile: String,
    /// Directory imports in the entry resolve from.
    pub resolve_dir: PathBuf,
    /// Additional module search paths.
    pub node_paths: Vec<PathBuf>,
}

/// A bundled script and its external source map.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub code: String,
    pub source_map: String,
    /// Directory the source map's relative sources are relative to.
    pub map_dir: PathBuf,
}

/// Produces a single self-contained script from an entry.
pub trait Bundler {
    fn bundle(&self, request: &BundleRequest) -> Result<Bundle, BundleError>;
}

/// Bundles with the `esbuild` executable.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    program: PathBuf,
}

impl Default for EsbuildBundler {
    fn default() -> Self {
        Self {
            program: PathBuf::from("esbuild"),
        }
    }
}

impl EsbuildBundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific esbuild binary.
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Bundler for EsbuildBundler {
    fn bundle(&self, request: &BundleRequest) -> Result<Bundle, BundleError> {
        let out_dir = tempfile::TempDir::new()?;
        let outfile = out_dir.path().join(BUNDLE_FILE);
        let node_path = std::env::join_paths(&request.node_paths)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let program = self.program.display().to_string();
        tracing::debug!(program = %program, outfile = %outfile.display(), "bundling entry");

        let mut child = Command::new(&self.program)
            .arg("--bundle")
            .arg("--loader=ts")
            .arg(format!("--sourcefile={}", request.sourcefile))
            .arg("--sourcemap=external")
            .arg("--format=iife")
            .arg("--log-level=warning")
            .arg(format!("--outfile={}", outfile.display()))
            .current_dir(&request.resolve_dir)
            .env("NODE_PATH", node_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BundleError::Spawn {
                program: program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.entry.as_bytes())?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(BundleError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::warn!("{}", stderr.trim());
        }

        collect_outputs(out_dir.path())
    }
}

/// Read the bundle and map from `dir`, which must hold exactly those two files.
pub fn collect_outputs(dir: &Path) -> Result<Bundle, BundleError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    if names.len() != 2 {
        return Err(BundleError::OutputCount(names.len()));
    }

    let code = names.iter().find(|n| n.ends_with(".js"));
    let map = names.iter().find(|n| n.ends_with(".js.map"));
    let (Some(code), Some(map)) = (code, map) else {
        return Err(BundleError::UnexpectedOutputs(names));
    };

    Ok(Bundle {
        code: std::fs::read_to_string(dir.join(code))?,
        source_map: std::fs::read_to_string(dir.join(map))?,
        map_dir: dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn collects_bundle_and_map() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bundle.js"), "code").unwrap();
        std::fs::write(tmp.path().join("bundle.js.map"), "{}").unwrap();

        let bundle = collect_outputs(tmp.path()).unwrap();
        assert_eq!(bundle.code, "code");
        assert_eq!(bundle.source_map, "{}");
        assert_eq!(bundle.map_dir, tmp.path());
    }

    #[test]
    fn wrong_output_count() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bundle.js"), "code").unwrap();

        let err = collect_outputs(tmp.path()).unwrap_err();
        assert!(matches!(err, BundleError::OutputCount(1)));
        assert_eq!(
            err.to_string(),
            "bundler did not produce exactly 2 output files (got 1)"
        );
    }

    #[test]
    fn missing_source_map() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.js"), "a").unwrap();
        std::fs::write(tmp.path().join("b.js"), "b").unwrap();

        let err = collect_outputs(tmp.path()).unwrap_err();
        assert!(matches!(err, BundleError::UnexpectedOutputs(_)));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let bundler = EsbuildBundler::with_program(tmp.path().join("no-such-esbuild"));
        let request = BundleRequest {
            entry: "export {};".to_string(),
            sourcefile: "generate.ts".to_string(),
            resolve_dir: tmp.path().to_path_buf(),
            node_paths: vec![tmp.path().to_path_buf()],
        };
        let err = bundler.bundle(&request).unwrap_err();
        assert!(matches!(err, BundleError::Spawn { .. }));
    }
}

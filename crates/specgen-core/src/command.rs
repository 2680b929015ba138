//! Post-generation commands and external formatter processes.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("error running command: {command}, {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("error running command: {command}, {status}")]
    Failed { command: String, status: String },
}

/// Collapse a possibly multi-line command into one line.
///
/// Each line is trimmed and the lines are joined with single spaces.
pub fn normalize(command: &str) -> String {
    command
        .trim()
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a normalized command line in `dir`.
pub fn run_line(line: &str, dir: &Path) -> Result<(), CommandError> {
    let mut parts = line.split_whitespace();
    let program = parts.next().ok_or(CommandError::Empty)?;
    let args: Vec<&str> = parts.collect();
    run(program, args.as_slice(), dir)
}

/// Run `program` with `args` in `dir`, inheriting stdout and stderr.
pub fn run<S: AsRef<str>>(program: &str, args: &[S], dir: &Path) -> Result<(), CommandError> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    tracing::debug!(command = %command, dir = %dir.display(), "running command");
    let status = Command::new(program)
        .args(&args)
        .current_dir(dir)
        .status()
        .map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !status.success() {
        return Err(CommandError::Failed {
            command,
            status: status.to_string(),
        });
    }
    Ok(())
}

//! Rewrites sandbox stack traces to point at original sources.

use std::path::{Component, Path, PathBuf};

use crate::source_map::SourceMapIndex;

/// File name marker of frames without a parenthesized location.
pub const BUNDLE_MARKER: &str = "bundle.js:";

/// Function name of the top-level expression that invoked the export.
///
/// That expression is evaluated outside the bundle, so its frames have no
/// counterpart in the source map.
pub const TOP_LEVEL_FRAME: &str = "at <eval>";

/// Translate every frame of `trace` through `index`.
///
/// The first line is the error message and is kept as is. A frame whose
/// location cannot be parsed or mapped is left unchanged byte for byte, as
/// are frames of the invoking top-level expression.
/// Relative original sources are resolved against `base_dir`.
pub fn translate(trace: &str, index: &SourceMapIndex, base_dir: &Path) -> String {
    let mut lines = trace.split('\n');
    let mut translated: Vec<String> = Vec::new();
    if let Some(message) = lines.next() {
        translated.push(message.to_string());
    }
    for line in lines {
        translated.push(translate_frame(line, index, base_dir).unwrap_or_else(|| line.to_string()));
    }
    translated.join("\n")
}

fn translate_frame(line: &str, index: &SourceMapIndex, base_dir: &Path) -> Option<String> {
    let trimmed = line.trim_end_matches(|c: char| c == ' ' || c == '\t');
    if trimmed.trim_start().starts_with(TOP_LEVEL_FRAME) {
        return None;
    }
    let (prefix, location) = split_location(trimmed)?;
    let (generated_line, generated_column) = parse_location(location)?;

    let original = index.lookup(generated_line.checked_sub(1)?, generated_column.checked_sub(1)?)?;
    let source = absolute(base_dir, original.source);
    Some(format!(
        "{prefix}({}:{}:{})",
        source.display(),
        original.line + 1,
        original.column + 1
    ))
}

fn split_location(frame: &str) -> Option<(&str, &str)> {
    if let Some(inner) = frame.strip_suffix(')') {
        if let Some(open) = inner.rfind('(') {
            return Some((&inner[..open], &inner[open + 1..]));
        }
    }
    let at = frame.rfind(BUNDLE_MARKER)?;
    Some((&frame[..at], &frame[at..]))
}

/// `file:line:column` with exactly three parts.
fn parse_location(location: &str) -> Option<(u32, u32)> {
    let mut parts = location.split(':');
    let (_file, line, column) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some((line.parse().ok()?, column.parse().ok()?))
}

/// Join and lexically normalize; the file need not exist.
fn absolute(base_dir: &Path, source: &str) -> PathBuf {
    let joined = base_dir.join(source);
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

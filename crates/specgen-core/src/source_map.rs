//! Source map v3 decoding: bundle position → original source position.
//!
//! Only what stack trace translation needs is kept: the `sources` list and the
//! decoded `mappings`. Positions are 0-based throughout this module.

use serde::Deserialize;
use thiserror::Error;

/// Errors from parsing a source map.
#[derive(Error, Debug)]
pub enum SourceMapError {
    #[error("invalid source map JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported source map version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid mapping on generated line {line}: {reason}")]
    InvalidMapping { line: usize, reason: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    version: u32,
    #[serde(default)]
    source_root: Option<String>,
    #[serde(default)]
    sources: Vec<Option<String>>,
    #[serde(default)]
    mappings: String,
}

/// Original position of a mapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Original {
    source: usize,
    line: u32,
    column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    generated_column: u32,
    original: Option<Original>,
}

/// A resolved original location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalLocation<'a> {
    pub source: &'a str,
    pub line: u32,
    pub column: u32,
}

/// Decoded mappings of one bundle.
#[derive(Debug, Clone, Default)]
pub struct SourceMapIndex {
    sources: Vec<String>,
    lines: Vec<Vec<Segment>>,
}

impl SourceMapIndex {
    /// Parse a version 3 source map.
    pub fn parse(json: &str) -> Result<Self, SourceMapError> {
        let raw: RawSourceMap = serde_json::from_str(json)?;
        if raw.version != 3 {
            return Err(SourceMapError::UnsupportedVersion(raw.version));
        }

        let root = raw
            .source_root
            .filter(|root| !root.is_empty())
            .map(|root| root.trim_end_matches('/').to_string());
        let sources = raw
            .sources
            .into_iter()
            .map(|source| {
                let source = source.unwrap_or_default();
                match &root {
                    Some(root) => format!("{root}/{source}"),
                    None => source,
                }
            })
            .collect::<Vec<_>>();

        let lines = decode_mappings(&raw.mappings, sources.len())?;
        Ok(Self { sources, lines })
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Find the original position of a generated position.
    ///
    /// Uses the closest segment at or before `column` on `line`.
    pub fn lookup(&self, line: u32, column: u32) -> Option<OriginalLocation<'_>> {
        let segments = self.lines.get(line as usize)?;
        let idx = segments.partition_point(|s| s.generated_column <= column);
        let segment = segments.get(idx.checked_sub(1)?)?;
        let original = segment.original?;
        Some(OriginalLocation {
            source: self.sources.get(original.source)?,
            line: original.line,
            column: original.column,
        })
    }
}

fn decode_mappings(mappings: &str, source_count: usize) -> Result<Vec<Vec<Segment>>, SourceMapError> {
    let mut lines = Vec::new();
    let mut source: i64 = 0;
    let mut original_line: i64 = 0;
    let mut original_column: i64 = 0;

    for (line_no, line) in mappings.split(';').enumerate() {
        let invalid = |reason: String| SourceMapError::InvalidMapping {
            line: line_no,
            reason,
        };

        let mut generated_column: i64 = 0;
        let mut segments = Vec::new();
        for text in line.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_vlq(text).map_err(invalid)?;
            generated_column += fields[0];
            let original = match fields.len() {
                1 => None,
                4 | 5 => {
                    source += fields[1];
                    original_line += fields[2];
                    original_column += fields[3];
                    let index = usize::try_from(source)
                        .ok()
                        .filter(|&s| s < source_count)
                        .ok_or_else(|| invalid(format!("source index {source} out of range")))?;
                    Some(Original {
                        source: index,
                        line: non_negative(original_line).map_err(invalid)?,
                        column: non_negative(original_column).map_err(invalid)?,
                    })
                }
                n => return Err(invalid(format!("segment {text:?} has {n} fields"))),
            };
            segments.push(Segment {
                generated_column: non_negative(generated_column).map_err(invalid)?,
                original,
            });
        }
        segments.sort_by_key(|s| s.generated_column);
        lines.push(segments);
    }

    Ok(lines)
}

fn non_negative(value: i64) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("position {value} out of range"))
}

fn base64_value(c: u8) -> Option<i64> {
    let v = match c {
        b'A'..=b'Z' => c - b'A',
        b'a'..=b'z' => c - b'a' + 26,
        b'0'..=b'9' => c - b'0' + 52,
        b'+' => 62,
        b'/' => 63,
        _ => return None,
    };
    Some(i64::from(v))
}

/// Decode one base64 VLQ segment into its signed fields.
fn decode_vlq(segment: &str) -> Result<Vec<i64>, String> {
    let mut fields = Vec::new();
    let mut value: i64 = 0;
    let mut shift = 0;
    let mut pending = false;

    for c in segment.bytes() {
        let digit = base64_value(c).ok_or_else(|| format!("invalid character {:?}", c as char))?;
        if shift > 60 {
            return Err("value too large".to_string());
        }
        value += (digit & 0x1f) << shift;
        if digit & 0x20 != 0 {
            shift += 5;
            pending = true;
            continue;
        }
        let negative = value & 1 == 1;
        let magnitude = value >> 1;
        fields.push(if negative { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
        pending = false;
    }

    if pending {
        return Err(format!("truncated segment {segment:?}"));
    }
    Ok(fields)
}

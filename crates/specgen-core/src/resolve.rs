//! Definition lookups served to generator scripts.
//!
//! Scripts call the `__resolve(location)` global while parsing a spec that
//! imports other definitions. The host answers with a tagged record,
//! `{ "ok": true, "value": <contents> }` or `{ "ok": false, "value": <message> }`,
//! and the entry script turns failures into thrown errors.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use serde_json::Value as JsonValue;
use specgen_config::{DEFINITION_EXT, INDEX_FILE};
use thiserror::Error;

use crate::sandbox::HostCallback;

/// Global name of the resolution callback.
pub const RESOLVE_CALLBACK: &str = "__resolve";

/// Errors reported back to the script.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("resolve: invalid arguments")]
    InvalidArguments,

    #[error("resolve: invalid location {0:?}")]
    InvalidLocation(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result of one lookup as seen by the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub ok: bool,
    pub value: String,
}

impl Resolution {
    pub fn found(contents: String) -> Self {
        Self {
            ok: true,
            value: contents,
        }
    }

    pub fn failed(error: &ResolveError) -> Self {
        Self {
            ok: false,
            value: error.to_string(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({ "ok": self.ok, "value": self.value })
    }
}

/// Map a logical location such as `@apexlang/rest` onto a definition file.
///
/// A location without the definition extension prefers `<path>.apex`, then
/// `<path>/index.apex` when `<path>` is a directory.
pub fn definition_path(definitions_dir: &Path, location: &str) -> Result<PathBuf, ResolveError> {
    let mut path = definitions_dir.to_path_buf();
    for segment in location.split('/').filter(|s| !s.is_empty()) {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => return Err(ResolveError::InvalidLocation(location.to_string())),
        }
    }
    if path == definitions_dir {
        return Err(ResolveError::InvalidLocation(location.to_string()));
    }

    if path.extension().is_some_and(|ext| ext == DEFINITION_EXT) {
        return Ok(path);
    }

    let with_ext = append_extension(&path);
    if with_ext.is_file() {
        return Ok(with_ext);
    }

    let metadata = std::fs::metadata(&path).map_err(|source| ResolveError::Io {
        path: path.clone(),
        source,
    })?;
    if metadata.is_dir() {
        Ok(path.join(INDEX_FILE))
    } else {
        Ok(with_ext)
    }
}

fn append_extension(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(DEFINITION_EXT);
    PathBuf::from(name)
}

/// Read the definition named by `location`.
pub fn read_definition(definitions_dir: &Path, location: &str) -> Result<String, ResolveError> {
    let path = definition_path(definitions_dir, location)?;
    tracing::debug!(location, path = %path.display(), "resolving definition");
    std::fs::read_to_string(&path).map_err(|source| ResolveError::Io { path, source })
}

/// Answer one `__resolve` call.
pub fn resolve(definitions_dir: &Path, args: &[String]) -> Resolution {
    let [location] = args else {
        return Resolution::failed(&ResolveError::InvalidArguments);
    };
    match read_definition(definitions_dir, location) {
        Ok(contents) => Resolution::found(contents),
        Err(e) => Resolution::failed(&e),
    }
}

/// The `__resolve` host callback serving `definitions_dir`.
pub fn callback(definitions_dir: PathBuf) -> HostCallback {
    HostCallback::new(RESOLVE_CALLBACK, move |args: &[String]| {
        resolve(&definitions_dir, args).to_json()
    })
}

//! Reading configuration and spec documents from disk or over HTTP(S).

use std::path::Path;
use std::time::Duration;

use crate::ConfigError;

/// Returns true when `location` names an HTTP(S) resource.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Read a document as text.
///
/// URLs are fetched with a blocking HTTP client; anything else is a path,
/// resolved against `base_dir` when relative.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the request fails.
pub fn read_source(location: &str, base_dir: &Path) -> Result<String, ConfigError> {
    if is_remote(location) {
        return fetch(location);
    }

    let path = base_dir.join(location);
    std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        location: path.display().to_string(),
        source,
    })
}

fn fetch(url: &str) -> Result<String, ConfigError> {
    let fetch_error = |reason: String| ConfigError::Fetch {
        url: url.to_string(),
        reason,
    };

    tracing::debug!(url, "fetching document");
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("specgen/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| fetch_error(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| fetch_error(e.to_string()))?;

    if !response.status().is_success() {
        return Err(fetch_error(format!("HTTP {}", response.status())));
    }

    response.text().map_err(|e| fetch_error(e.to_string()))
}

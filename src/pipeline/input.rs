//! Input resolution: turn a user-supplied path or URL into a [`StagedFile`].
//!
//! Local paths are checked for existence and read permission before their
//! bytes are read. URLs are downloaded with the configured timeout. The MIME
//! type is taken from the response `Content-Type` when the server sends a
//! specific one, and guessed from the file name otherwise.

use crate::error::ToolkitError;
use crate::upload::{guess_mime, StagedFile};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to an in-memory staged file.
pub async fn resolve_input(
    client: &reqwest::Client,
    input: &str,
    timeout_secs: u64,
) -> Result<StagedFile, ToolkitError> {
    if is_url(input) {
        download_url(client, input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

async fn resolve_local(path_str: &str) -> Result<StagedFile, ToolkitError> {
    if path_str.trim().is_empty() {
        return Err(ToolkitError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(ToolkitError::FileNotFound { path });
    }

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ToolkitError::PermissionDenied { path });
        }
        Err(_) => return Err(ToolkitError::FileNotFound { path }),
    };

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input")
        .to_string();
    debug!("Resolved local file: {} ({} bytes)", path.display(), bytes.len());
    Ok(StagedFile::from_bytes(name, bytes))
}

async fn download_url(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<StagedFile, ToolkitError> {
    info!("Downloading input from: {}", url);

    let response = client
        .get(url)
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(|e| fetch_error(url, timeout_secs, e))?;

    if !response.status().is_success() {
        return Err(ToolkitError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty() && v != "application/octet-stream");

    let name = extract_filename(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| fetch_error(url, timeout_secs, e))?;

    let mime = content_type.unwrap_or_else(|| guess_mime(&name));
    info!("Downloaded {} ({} bytes, {})", name, bytes.len(), mime);
    Ok(StagedFile::new(name, mime, bytes.to_vec()))
}

pub(crate) fn fetch_error(url: &str, timeout_secs: u64, e: reqwest::Error) -> ToolkitError {
    if e.is_timeout() {
        ToolkitError::DownloadTimeout {
            url: url.to_string(),
            secs: timeout_secs,
        }
    } else {
        ToolkitError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Extract a reasonable filename from the URL path.
pub fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}

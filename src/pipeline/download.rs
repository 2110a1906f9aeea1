//! Download surface: save a finished output to disk.
//!
//! URL outputs are fetched with the shared client; inline outputs are
//! written as-is. Either way the bytes land in a temp file next to the
//! target first and are renamed into place, so an interrupted save never
//! leaves a partial file under the final name.

use super::input::fetch_error;
use super::reconcile::sanitize_file_name;
use crate::error::ToolkitError;
use crate::output::{OutputReference, ProcessingResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Fetch the bytes behind an output reference.
pub async fn fetch_output(
    client: &reqwest::Client,
    output: &OutputReference,
    timeout_secs: u64,
) -> Result<Vec<u8>, ToolkitError> {
    match output {
        OutputReference::Inline { data, .. } => Ok(data.clone()),
        OutputReference::Url { url } => {
            let response = client
                .get(url)
                .timeout(Duration::from_secs(timeout_secs))
                .send()
                .await
                .map_err(|e| fetch_error(url, timeout_secs, e))?;
            if !response.status().is_success() {
                return Err(ToolkitError::DownloadFailed {
                    url: url.clone(),
                    reason: format!("HTTP {}", response.status()),
                });
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| fetch_error(url, timeout_secs, e))?;
            Ok(bytes.to_vec())
        }
    }
}

/// Save a result under `dir` using its display file name. Returns the path
/// written.
pub async fn save_output(
    client: &reqwest::Client,
    result: &ProcessingResult,
    dir: &Path,
    timeout_secs: u64,
) -> Result<PathBuf, ToolkitError> {
    let name = sanitize_file_name(&result.display_file_name);
    let name = if name.is_empty() { "output".to_string() } else { name };
    let path = dir.join(name);

    let bytes = fetch_output(client, &result.output, timeout_secs).await?;
    write_atomic(&path, &bytes).await?;
    info!("Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// Atomic write: write to a temp file in the target directory, then rename
/// it over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ToolkitError> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes))
        .await
        .map_err(|e| ToolkitError::Internal(format!("write task panicked: {e}")))?
}

fn write_atomic_blocking(path: &Path, bytes: &[u8]) -> Result<(), ToolkitError> {
    let write_failed = |e| ToolkitError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_failed)?;

    // Dropped (and removed) on any error before persist.
    let mut tmp = tempfile::Builder::new()
        .prefix(".filekit-")
        .suffix(".part")
        .tempfile_in(&dir)
        .map_err(write_failed)?;
    tmp.write_all(bytes).map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;
    Ok(())
}

//! Error types for the filekit library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ProcessingError`]: a single processing request failed. This is the
//!   normalised taxonomy every execution backend maps into (validation,
//!   strategy readiness, remote service, local computation). It is what a UI
//!   shows next to the tool, together with a [`Suggestion`].
//!
//! * [`SessionError`]: the request never got a verdict of its own: nothing
//!   was staged, another request is still in flight, or a newer selection
//!   superseded it. Wraps [`ProcessingError`] for everything else.
//!
//! * [`ToolkitError`]: **Fatal** setup and I/O errors outside a request
//!   (bad configuration, unreadable input path, failed download of a result).
//!
//! Raw transport or runtime errors never reach [`ProcessingError`]'s message
//! verbatim; adapters log them with `tracing` and store a readable summary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors outside the lifecycle of a processing request.
#[derive(Debug, Error)]
pub enum ToolkitError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// No tool is registered under this slug.
    #[error("Unknown tool '{slug}'\nRun `filekit tools` to list the available tools.")]
    UnknownTool { slug: String },

    // ── Transfer errors ───────────────────────────────────────────────────
    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why the validation gate turned a request away.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RejectReason {
    /// The request carries no files (or no markup).
    #[error("no file selected")]
    Empty,

    /// The MIME type is not accepted by this tool.
    #[error("unsupported file type '{mime}' (accepted: {accepted})")]
    UnsupportedType { mime: String, accepted: String },

    /// The file's MIME type disagrees with the category declared on the request.
    #[error("'{name}' is {mime}, which is not a {declared} file")]
    CategoryMismatch {
        name: String,
        mime: String,
        declared: String,
    },

    /// A file exceeds the tool's size ceiling.
    #[error("'{name}' is {size} bytes, the limit is {limit} bytes")]
    TooLarge { name: String, size: u64, limit: u64 },

    /// Too few or too many files for this tool.
    #[error("expected {min}–{max} files, got {got}")]
    FileCount { min: usize, max: usize, got: usize },

    /// A file declared as PDF does not start with the `%PDF` magic bytes.
    #[error("'{name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// The markup to convert is blank.
    #[error("no HTML code to convert")]
    BlankMarkup,

    /// The chosen processing settings do not fit the tool or the file.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Normalised failure of one processing request.
///
/// Every execution backend maps its own failures into one of these four
/// variants before anything reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProcessingError {
    /// The input or settings were rejected before any processing started.
    #[error("{0}")]
    ValidationFailed(RejectReason),

    /// The selected execution venue cannot run right now (e.g. the local
    /// model is still loading). A waiting state, not a failure.
    #[error("{reason}")]
    StrategyUnavailable { reason: String },

    /// The processing service failed or answered with an unusable payload.
    ///
    /// `status` is `None` when no HTTP response was received at all.
    /// `fallback` carries the service's hint that local processing should
    /// be tried instead.
    #[error("Processing service error ({}): {message}", describe_status(.status))]
    RemoteFailure {
        status: Option<u16>,
        message: String,
        fallback: bool,
    },

    /// In-process computation failed.
    #[error("Local processing failed: {message}")]
    LocalFailure { message: String },
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "no response".to_string(),
    }
}

/// Corrective action offered to the user alongside an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suggestion {
    ChooseDifferentFile,
    ReduceFileSize,
    AdjustSettings,
    WaitForModel,
    SwitchToLocal,
    SwitchToRemote,
    TryAgain,
}

impl std::fmt::Display for Suggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Suggestion::ChooseDifferentFile => "Choose a file of a supported type.",
            Suggestion::ReduceFileSize => "Reduce the file size and try again.",
            Suggestion::AdjustSettings => "Adjust the processing settings.",
            Suggestion::WaitForModel => "Wait for the local model to finish loading.",
            Suggestion::SwitchToLocal => "Switch to local processing.",
            Suggestion::SwitchToRemote => "Switch to server processing.",
            Suggestion::TryAgain => "Please try again.",
        };
        f.write_str(text)
    }
}

impl ProcessingError {
    /// Shorthand for a rejected request.
    pub fn rejected(reason: RejectReason) -> Self {
        ProcessingError::ValidationFailed(reason)
    }

    /// Whether the service hinted that local processing should be tried.
    pub fn recommends_fallback(&self) -> bool {
        matches!(self, ProcessingError::RemoteFailure { fallback: true, .. })
    }

    /// The corrective action to show next to this error.
    pub fn suggestion(&self) -> Suggestion {
        match self {
            ProcessingError::ValidationFailed(reason) => match reason {
                RejectReason::TooLarge { .. } => Suggestion::ReduceFileSize,
                RejectReason::InvalidSettings(_) => Suggestion::AdjustSettings,
                _ => Suggestion::ChooseDifferentFile,
            },
            ProcessingError::StrategyUnavailable { .. } => Suggestion::WaitForModel,
            ProcessingError::RemoteFailure { fallback: true, .. } => Suggestion::SwitchToLocal,
            ProcessingError::RemoteFailure {
                status: Some(413), ..
            } => Suggestion::ReduceFileSize,
            ProcessingError::RemoteFailure { .. } => Suggestion::TryAgain,
            ProcessingError::LocalFailure { .. } => Suggestion::SwitchToRemote,
        }
    }

    /// Message plus suggested action, ready for display.
    pub fn user_message(&self) -> String {
        format!("{self} {}", self.suggestion())
    }
}

/// Errors from the request lifecycle of a [`crate::session::ToolSession`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `submit` was called with no upload staged.
    #[error("Nothing to process: select a file first")]
    NothingStaged,

    /// A request is already executing on this session.
    #[error("A request is already being processed; wait for it or select a new file")]
    Busy,

    /// The user selected or removed a file while this request was running;
    /// its result was discarded.
    #[error("Request {generation} was superseded by a newer selection")]
    Superseded { generation: u64 },

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

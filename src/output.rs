//! Output types: the reconciled result of one processing request.

use crate::settings::ExecutionStrategy;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Where a metric value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    /// Reported verbatim by the processing service.
    Reported,
    /// Computed from reported or measured data (e.g. a rate from two sizes).
    Derived,
    /// A client-side guess from the fixed fallback ratio.
    Estimated,
}

/// A displayed number tagged with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric<T> {
    pub value: T,
    pub source: MetricSource,
}

impl<T> Metric<T> {
    pub fn reported(value: T) -> Self {
        Self {
            value,
            source: MetricSource::Reported,
        }
    }

    pub fn derived(value: T) -> Self {
        Self {
            value,
            source: MetricSource::Derived,
        }
    }

    pub fn estimated(value: T) -> Self {
        Self {
            value,
            source: MetricSource::Estimated,
        }
    }

    pub fn is_estimated(&self) -> bool {
        self.source == MetricSource::Estimated
    }
}

/// Reference to the produced output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputReference {
    /// A fetchable URL, already resolved against the service base URL.
    Url { url: String },
    /// Output held in memory (local processing, converted source code).
    Inline { mime: String, data: Vec<u8> },
}

impl std::fmt::Debug for OutputReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputReference::Url { url } => f.debug_struct("Url").field("url", url).finish(),
            OutputReference::Inline { mime, data } => f
                .debug_struct("Inline")
                .field("mime", mime)
                .field("len", &data.len())
                .finish(),
        }
    }
}

impl OutputReference {
    /// Something a browser or downloader can open: the URL itself, or a
    /// base64 data URL for inline output.
    pub fn href(&self) -> String {
        match self {
            OutputReference::Url { url } => url.clone(),
            OutputReference::Inline { mime, data } => {
                format!("data:{mime};base64,{}", STANDARD.encode(data))
            }
        }
    }

    /// Inline output decoded as UTF-8, for text results such as generated code.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutputReference::Inline { data, .. } => std::str::from_utf8(data).ok(),
            OutputReference::Url { .. } => None,
        }
    }
}

/// Kinds of user-facing notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    /// The service asked for local processing; the session switched over.
    FallbackEngaged,
    /// The service returned a free-form message with its result.
    ServiceMessage,
}

/// A message to show the user alongside a result or while processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn fallback_engaged() -> Self {
        Self {
            kind: NoticeKind::FallbackEngaged,
            message: "Server processing failed. Switching to local processing...".to_string(),
        }
    }

    pub fn service_message(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::ServiceMessage,
            message: message.into(),
        }
    }
}

/// The reconciled outcome of a successful request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub output: OutputReference,
    /// File name to offer for download.
    pub display_file_name: String,
    pub original_size_bytes: u64,
    pub result_size_bytes: Metric<u64>,
    /// Size reduction in percent; negative when the output grew.
    pub reduction_percent: Metric<i64>,
    /// Venue that produced this result.
    pub strategy: ExecutionStrategy,
    /// Whether the result came from the automatic local re-attempt.
    pub via_fallback: bool,
    pub notices: Vec<Notice>,
}

impl ProcessingResult {
    /// Whether any displayed metric is a client-side estimate.
    pub fn is_estimated(&self) -> bool {
        self.result_size_bytes.is_estimated() || self.reduction_percent.is_estimated()
    }
}

/// Reduction in percent, `round((1 - result/original) * 100)`.
///
/// An empty original yields 0.
pub fn reduction_percent(original: u64, result: u64) -> i64 {
    if original == 0 {
        return 0;
    }
    ((1.0 - result as f64 / original as f64) * 100.0).round() as i64
}

/// Format a byte count the way the tool pages display it.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

//! Result reconciliation: turn a service payload into a [`ProcessingResult`].
//!
//! The service contract only guarantees `{success, downloadUrl}`. Sizes and
//! rates are optional, may arrive as numbers or numeric strings, and are
//! used verbatim when present. When neither is reported the reconciler falls
//! back to a fixed ratio and tags both metrics [`MetricSource::Estimated`] so
//! no guess is ever displayed as a measurement.
//!
//! ## Metric precedence
//!
//! | reported            | result size          | reduction            |
//! |---------------------|----------------------|----------------------|
//! | size and rate       | Reported             | Reported             |
//! | size only           | Reported             | Derived from sizes   |
//! | rate only           | Derived from rate    | Reported             |
//! | neither             | Estimated (ratio)    | Estimated (ratio)    |

use crate::config::{resolve_against, OrchestratorConfig};
use crate::error::ProcessingError;
use crate::output::{
    reduction_percent, Metric, MetricSource, Notice, OutputReference, ProcessingResult,
};
use crate::settings::ExecutionStrategy;
use crate::tool::ToolKind;
use crate::upload::UploadRequest;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// The JSON body returned by the processing service. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemotePayload {
    pub success: Option<bool>,
    pub download_url: Option<String>,
    pub file_name: Option<String>,
    pub compressed_size: Option<Value>,
    pub compression_rate: Option<Value>,
    pub message: Option<String>,
    pub fallback: Option<bool>,
    pub react_code: Option<String>,
}

impl RemotePayload {
    /// Parse a response body. Unknown fields are ignored; a body that is not
    /// a JSON object yields `None`.
    pub fn parse(body: &[u8]) -> Option<RemotePayload> {
        serde_json::from_slice(body).ok()
    }
}

/// Builds results from service payloads.
#[derive(Debug, Clone)]
pub struct Reconciler {
    estimate_ratio: f64,
    api_base_url: String,
}

impl Reconciler {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            estimate_ratio: config.estimate_ratio,
            api_base_url: config.api_base_url.clone(),
        }
    }

    /// Reconcile a 2xx payload. `status` is only used to describe a
    /// malformed payload.
    pub fn reconcile(
        &self,
        payload: RemotePayload,
        status: u16,
        request: &UploadRequest,
        tool: ToolKind,
    ) -> Result<ProcessingResult, ProcessingError> {
        if payload.success == Some(false) {
            return Err(ProcessingError::RemoteFailure {
                status: Some(status),
                message: payload
                    .message
                    .unwrap_or_else(|| "the service reported a failure".to_string()),
                fallback: payload.fallback.unwrap_or(false),
            });
        }

        let original = request.total_bytes();
        let mut notices = Vec::new();

        if tool == ToolKind::HtmlToReact {
            let code = payload.react_code.ok_or_else(|| malformed(status, "reactCode"))?;
            let size = code.len() as u64;
            return Ok(ProcessingResult {
                output: OutputReference::Inline {
                    mime: "text/javascript".to_string(),
                    data: code.into_bytes(),
                },
                display_file_name: "ConvertedComponent.jsx".to_string(),
                original_size_bytes: original,
                result_size_bytes: Metric::derived(size),
                reduction_percent: Metric::derived(reduction_percent(original, size)),
                strategy: ExecutionStrategy::Remote,
                via_fallback: false,
                notices,
            });
        }

        let url = payload
            .download_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| malformed(status, "downloadUrl"))?;

        if let Some(message) = payload.message.filter(|m| !m.trim().is_empty()) {
            notices.push(Notice::service_message(message));
        }

        let reported_size = payload
            .compressed_size
            .as_ref()
            .and_then(number)
            .filter(|n| *n >= 0.0);
        let reported_rate = payload.compression_rate.as_ref().and_then(number);
        let (size, rate) = self.metrics(original, reported_size, reported_rate);
        if size.source == MetricSource::Estimated {
            debug!(tool = %tool, "service reported no sizes; using estimate");
        }

        let display_file_name = payload
            .file_name
            .as_deref()
            .map(sanitize_file_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_file_name(tool, request));

        Ok(ProcessingResult {
            output: OutputReference::Url {
                url: resolve_against(&self.api_base_url, &url),
            },
            display_file_name,
            original_size_bytes: original,
            result_size_bytes: size,
            reduction_percent: rate,
            strategy: ExecutionStrategy::Remote,
            via_fallback: false,
            notices,
        })
    }

    fn metrics(
        &self,
        original: u64,
        size: Option<f64>,
        rate: Option<f64>,
    ) -> (Metric<u64>, Metric<i64>) {
        match (size, rate) {
            (Some(size), Some(rate)) => (
                Metric::reported(size.round() as u64),
                Metric::reported(rate.round() as i64),
            ),
            (Some(size), None) => {
                let size = size.round() as u64;
                (
                    Metric::reported(size),
                    Metric::derived(reduction_percent(original, size)),
                )
            }
            (None, Some(rate)) => {
                let size = (original as f64 * (1.0 - rate / 100.0)).round().max(0.0) as u64;
                (Metric::derived(size), Metric::reported(rate.round() as i64))
            }
            (None, None) => {
                let size = (original as f64 * self.estimate_ratio).round() as u64;
                let rate = ((1.0 - self.estimate_ratio) * 100.0).round() as i64;
                (Metric::estimated(size), Metric::estimated(rate))
            }
        }
    }
}

fn malformed(status: u16, field: &str) -> ProcessingError {
    warn!(status, field, "service response is missing a required field");
    ProcessingError::RemoteFailure {
        status: Some(status),
        message: format!("the service returned an unusable response (no {field})"),
        fallback: false,
    }
}

/// A numeric field that may arrive as a JSON number or a numeric string.
fn number(value: &Value) -> Option<f64> {
    let n: f64 = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

static RE_UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]+"#).unwrap());

static RE_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[A-Za-z0-9]{1,8}$").unwrap());

/// Keep only the last path component and replace characters that are not
/// valid in file names. Returns an empty string when nothing usable is left
/// (`""`, `"."`, `".."`, `"..."`).
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let clean = RE_UNSAFE_CHARS.replace_all(last.trim(), "_");
    if clean.chars().all(|c| c == '.') {
        return String::new();
    }
    clean.into_owned()
}

/// Swap (or add) a file extension.
pub fn with_extension(name: &str, ext: &str) -> String {
    format!("{}.{ext}", RE_EXTENSION.replace(name, ""))
}

/// Download name used when the service does not supply one.
pub fn default_file_name(tool: ToolKind, request: &UploadRequest) -> String {
    let name = request
        .primary()
        .map(|f| sanitize_file_name(f.name()))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "output".to_string());
    match tool {
        ToolKind::PdfMerge => "merged.pdf".to_string(),
        ToolKind::PdfEdit => format!("edited-{name}"),
        ToolKind::WordToPdf | ToolKind::PptToPdf => with_extension(&name, "pdf"),
        ToolKind::BackgroundRemoval => {
            format!("{}-no-bg.png", RE_EXTENSION.replace(&name, ""))
        }
        ToolKind::MediaCompress => format!("compressed-{name}"),
        ToolKind::HtmlToReact => "ConvertedComponent.jsx".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::StagedFile;
    use serde_json::json;

    const MB: usize = 1024 * 1024;

    fn reconciler() -> Reconciler {
        Reconciler::new(&OrchestratorConfig::default())
    }

    fn payload(v: Value) -> RemotePayload {
        serde_json::from_value(v).expect("payload")
    }

    fn jpeg(size: usize) -> UploadRequest {
        UploadRequest::single(StagedFile::new("cat.jpg", "image/jpeg", vec![0; size])).unwrap()
    }

    #[test]
    fn missing_sizes_are_estimated() {
        let result = reconciler()
            .reconcile(
                payload(json!({"success": true, "downloadUrl": "/files/out.png"})),
                200,
                &jpeg(4 * MB),
                ToolKind::BackgroundRemoval,
            )
            .expect("success");
        assert_eq!(
            result.output,
            OutputReference::Url {
                url: "http://localhost:5000/files/out.png".into()
            }
        );
        assert!(result.is_estimated());
        assert_eq!(result.reduction_percent, Metric::estimated(30));
        assert_eq!(
            result.result_size_bytes,
            Metric::estimated((4.0 * MB as f64 * 0.7).round() as u64)
        );
        assert_eq!(result.display_file_name, "cat-no-bg.png");
    }

    #[test]
    fn reported_size_is_verbatim_and_rate_derived() {
        let req = UploadRequest::single(StagedFile::new(
            "photo.png",
            "image/png",
            vec![0; 200 * 1024],
        ))
        .unwrap();
        let result = reconciler()
            .reconcile(
                payload(json!({
                    "success": true,
                    "downloadUrl": "/files/photo.jpg",
                    "compressedSize": 50_000
                })),
                200,
                &req,
                ToolKind::MediaCompress,
            )
            .unwrap();
        assert_eq!(result.result_size_bytes, Metric::reported(50_000));
        assert_eq!(
            result.reduction_percent,
            Metric::derived(reduction_percent(200 * 1024, 50_000))
        );
        assert!(!result.is_estimated());
        assert_eq!(result.display_file_name, "compressed-photo.png");
    }

    #[test]
    fn reported_rate_wins_even_if_inconsistent() {
        let result = reconciler()
            .reconcile(
                payload(json!({
                    "success": true,
                    "downloadUrl": "https://cdn.example.com/x.mp3",
                    "compressedSize": "900",
                    "compressionRate": "12.4"
                })),
                200,
                &jpeg(1000),
                ToolKind::MediaCompress,
            )
            .unwrap();
        assert_eq!(result.result_size_bytes, Metric::reported(900));
        assert_eq!(result.reduction_percent, Metric::reported(12));
        assert_eq!(
            result.output,
            OutputReference::Url {
                url: "https://cdn.example.com/x.mp3".into()
            }
        );
    }

    #[test]
    fn size_derived_from_rate() {
        let result = reconciler()
            .reconcile(
                payload(json!({"success": true, "downloadUrl": "/f", "compressionRate": 25})),
                200,
                &jpeg(1000),
                ToolKind::MediaCompress,
            )
            .unwrap();
        assert_eq!(result.result_size_bytes, Metric::derived(750));
        assert_eq!(result.reduction_percent, Metric::reported(25));
    }

    #[test]
    fn missing_download_url_is_malformed() {
        let err = reconciler()
            .reconcile(
                payload(json!({"success": true})),
                200,
                &jpeg(10),
                ToolKind::BackgroundRemoval,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::RemoteFailure {
                status: Some(200),
                fallback: false,
                ..
            }
        ));
    }

    #[test]
    fn success_false_carries_message_and_hint() {
        let err = reconciler()
            .reconcile(
                payload(json!({"success": false, "message": "model offline", "fallback": true})),
                200,
                &jpeg(10),
                ToolKind::BackgroundRemoval,
            )
            .unwrap_err();
        assert!(err.recommends_fallback());
        assert!(err.to_string().contains("model offline"));
    }

    #[test]
    fn service_file_name_and_message() {
        let req = UploadRequest::single(StagedFile::new(
            "report.docx",
            "application/msword",
            vec![0; 10],
        ))
        .unwrap();
        let result = reconciler()
            .reconcile(
                payload(json!({
                    "success": true,
                    "downloadUrl": "/files/abc.pdf",
                    "fileName": "../../etc/report.pdf",
                    "message": "Converted"
                })),
                200,
                &req,
                ToolKind::WordToPdf,
            )
            .unwrap();
        assert_eq!(result.display_file_name, "report.pdf");
        assert_eq!(result.notices, vec![Notice::service_message("Converted")]);
    }

    #[test]
    fn dot_only_file_names_fall_back_to_default() {
        let req = UploadRequest::single(StagedFile::new(
            "report.docx",
            "application/msword",
            vec![0; 10],
        ))
        .unwrap();
        for name in ["..", ".", "...", "  ", "files/.."] {
            let result = reconciler()
                .reconcile(
                    payload(json!({
                        "success": true,
                        "downloadUrl": "/files/abc.pdf",
                        "fileName": name
                    })),
                    200,
                    &req,
                    ToolKind::WordToPdf,
                )
                .unwrap();
            assert_eq!(result.display_file_name, "report.pdf", "fileName {name:?}");
        }
        assert_eq!(sanitize_file_name(".."), "");
        assert_eq!(sanitize_file_name(".hidden"), ".hidden");
    }

    #[test]
    fn html_result_is_inline_code() {
        let req = UploadRequest::markup("<div>hello</div>");
        let result = reconciler()
            .reconcile(
                payload(json!({"success": true, "reactCode": "const C = () => <div>hello</div>;"})),
                200,
                &req,
                ToolKind::HtmlToReact,
            )
            .unwrap();
        assert_eq!(result.output.as_text(), Some("const C = () => <div>hello</div>;"));
        assert_eq!(result.result_size_bytes.source, MetricSource::Derived);
    }

    #[test]
    fn default_names() {
        let pptx = UploadRequest::single(StagedFile::new(
            "deck.final.pptx",
            "application/vnd.ms-powerpoint",
            vec![1],
        ))
        .unwrap();
        assert_eq!(default_file_name(ToolKind::PptToPdf, &pptx), "deck.final.pdf");
        assert_eq!(default_file_name(ToolKind::PdfMerge, &pptx), "merged.pdf");
        assert_eq!(with_extension("noext", "pdf"), "noext.pdf");
        assert_eq!(sanitize_file_name("a:b?.png"), "a_b_.png");
    }

    #[test]
    fn unparsable_body() {
        assert!(RemotePayload::parse(b"<html>502</html>").is_none());
        let p = RemotePayload::parse(br#"{"success":true,"extra":1}"#).expect("object");
        assert_eq!(p.success, Some(true));
    }
}

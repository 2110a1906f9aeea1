//! Remote execution: one call to the processing service.
//!
//! This is the only stage that performs network I/O while a request runs.
//! It is deliberately single-shot: retry-via-fallback is decided by the
//! session and its [`super::strategy::StrategySelector`], never here.
//!
//! ## Progress
//!
//! The service exposes no progress channel. While the request is in flight a
//! [`HeuristicTicker`] adds a fixed step per interval, capped at 90 %. The
//! ticker is dropped as soon as the response body has arrived, after which
//! the tracker enters `Finalizing`.
//!
//! ## Error mapping
//!
//! | condition                          | result                                  |
//! |------------------------------------|-----------------------------------------|
//! | connect / timeout / body read      | `RemoteFailure { status: None }`        |
//! | non-2xx                            | `RemoteFailure { status, message, fallback }` from the JSON body when present |
//! | 2xx with unusable body             | `RemoteFailure { status }`              |
//!
//! Raw transport errors are logged, never shown.

use super::form::{build_submission, multipart_form, Body};
use super::reconcile::{Reconciler, RemotePayload};
use super::Executor;
use crate::config::OrchestratorConfig;
use crate::error::ProcessingError;
use crate::output::ProcessingResult;
use crate::progress::{HeuristicTicker, Phase, ProgressTracker};
use crate::settings::{ExecutionStrategy, ProcessingSettings};
use crate::tool::ToolKind;
use crate::upload::UploadRequest;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Executes a tool request against the processing service.
pub struct RemoteExecutor {
    client: reqwest::Client,
    config: Arc<OrchestratorConfig>,
    tool: ToolKind,
    reconciler: Reconciler,
}

impl RemoteExecutor {
    pub fn new(client: reqwest::Client, config: Arc<OrchestratorConfig>, tool: ToolKind) -> Self {
        let reconciler = Reconciler::new(&config);
        Self {
            client,
            config,
            tool,
            reconciler,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ProcessingError {
        warn!(tool = %self.tool, error = %e, "request to processing service failed");
        let message = if e.is_timeout() {
            format!(
                "the processing service did not respond within {}s",
                self.config.request_timeout_secs
            )
        } else if e.is_connect() {
            format!(
                "could not reach the processing service at {}",
                self.config.api_base_url
            )
        } else {
            "the connection to the processing service was interrupted".to_string()
        };
        ProcessingError::RemoteFailure {
            status: None,
            message,
            fallback: false,
        }
    }
}

#[async_trait]
impl Executor for RemoteExecutor {
    fn strategy(&self) -> ExecutionStrategy {
        ExecutionStrategy::Remote
    }

    async fn execute(
        &self,
        request: &UploadRequest,
        settings: &ProcessingSettings,
        progress: &ProgressTracker,
    ) -> Result<ProcessingResult, ProcessingError> {
        let start = Instant::now();
        let submission = build_submission(self.tool, request, settings);
        let url = self.config.resolve_url(submission.endpoint);
        info!(
            tool = %self.tool,
            url = %url,
            files = request.files().len(),
            bytes = request.total_bytes(),
            settings = settings.label(),
            "submitting to processing service"
        );

        progress.advance(Phase::Uploading);
        let ticker = HeuristicTicker::start(
            progress.clone(),
            Duration::from_millis(self.config.progress_tick_ms),
            self.config.progress_step,
        );

        let builder = self.client.post(&url);
        let builder = match submission.body {
            Body::Multipart(parts) => builder.multipart(multipart_form(parts)?),
            Body::Json(value) => builder.json(&value),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        drop(ticker);

        progress.advance(Phase::Finalizing);
        debug!(
            tool = %self.tool,
            status = status.as_u16(),
            body_len = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "service responded"
        );

        let payload = RemotePayload::parse(&body);
        if !status.is_success() {
            return Err(status_error(status, payload));
        }
        let payload = payload.ok_or_else(|| {
            warn!(tool = %self.tool, status = status.as_u16(), "service body is not JSON");
            ProcessingError::RemoteFailure {
                status: Some(status.as_u16()),
                message: "the service returned an unreadable response".to_string(),
                fallback: false,
            }
        })?;

        self.reconciler
            .reconcile(payload, status.as_u16(), request, self.tool)
    }
}

/// Map a non-2xx response, keeping the service's message and fallback hint
/// when the body carries them.
fn status_error(status: StatusCode, payload: Option<RemotePayload>) -> ProcessingError {
    let (message, fallback) = match payload {
        Some(p) => (p.message, p.fallback.unwrap_or(false)),
        None => (None, false),
    };
    let message = message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| match status.canonical_reason() {
            Some(reason) => format!("the service answered '{reason}'"),
            None => "the service rejected the request".to_string(),
        });
    warn!(status = status.as_u16(), fallback, %message, "service returned an error");
    ProcessingError::RemoteFailure {
        status: Some(status.as_u16()),
        message,
        fallback,
    }
}

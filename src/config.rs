//! Configuration for the orchestration layer.
//!
//! All behaviour that is not per-request is controlled through
//! [`OrchestratorConfig`], built via its [`OrchestratorConfigBuilder`].
//! One config is shared (behind an `Arc`) by a [`crate::context::ToolContext`]
//! and every session it opens.

use crate::error::ToolkitError;
use crate::progress::ProgressCallback;
use crate::tool::ToolKind;
use std::collections::HashMap;
use std::fmt;

/// Service base URL used when none is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";

/// Configuration shared by every tool session of a context.
///
/// # Example
/// ```rust
/// use filekit::{OrchestratorConfig, ToolKind};
///
/// let config = OrchestratorConfig::builder()
///     .api_base_url("https://tools.example.com")
///     .max_upload_bytes(ToolKind::BackgroundRemoval, 8 * 1024 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_bytes_for(ToolKind::BackgroundRemoval), 8 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Base URL of the processing service. Default: `http://localhost:5000`.
    ///
    /// Relative download URLs returned by the service are resolved against it.
    pub api_base_url: String,

    /// Per-request timeout for service calls in seconds. Default: 300.
    ///
    /// Video compression on the service side can take minutes.
    pub request_timeout_secs: u64,

    /// Timeout for fetching a finished output in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Interval between heuristic progress ticks for remote requests in
    /// milliseconds. Default: 500.
    pub progress_tick_ms: u64,

    /// Percentage points added per heuristic tick. Default: 10.
    pub progress_step: u8,

    /// Result/original size ratio assumed when the service reports no sizes.
    /// Default: 0.7. Results built from it are marked estimated.
    pub estimate_ratio: f64,

    /// Foreground colour-distance threshold for the built-in local
    /// segmenter (0–441, Euclidean RGB distance). Default: 60.
    pub segmentation_tolerance: f32,

    /// Per-tool upload ceilings overriding [`ToolKind::default_max_bytes`].
    pub max_upload_bytes: HashMap<ToolKind, u64>,

    /// Optional observer for progress, phase and notice events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 300,
            download_timeout_secs: 120,
            progress_tick_ms: 500,
            progress_step: 10,
            estimate_ratio: 0.7,
            segmentation_tolerance: 60.0,
            max_upload_bytes: HashMap::new(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("progress_tick_ms", &self.progress_tick_ms)
            .field("progress_step", &self.progress_step)
            .field("estimate_ratio", &self.estimate_ratio)
            .field("segmentation_tolerance", &self.segmentation_tolerance)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ToolProgressCallback>"),
            )
            .finish()
    }
}

impl OrchestratorConfig {
    /// Create a new builder for `OrchestratorConfig`.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective upload ceiling for a tool.
    pub fn max_bytes_for(&self, tool: ToolKind) -> u64 {
        self.max_upload_bytes
            .get(&tool)
            .copied()
            .unwrap_or_else(|| tool.default_max_bytes())
    }

    /// Resolve a service-relative URL (`/files/out.png`) against the base
    /// URL. Absolute URLs and data URLs are returned unchanged.
    pub fn resolve_url(&self, url: &str) -> String {
        resolve_against(&self.api_base_url, url)
    }
}

pub(crate) fn resolve_against(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("data:") {
        return url.to_string();
    }
    let base = base.trim_end_matches('/');
    if url.starts_with('/') {
        format!("{base}{url}")
    } else {
        format!("{base}/{url}")
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn progress_tick_ms(mut self, ms: u64) -> Self {
        self.config.progress_tick_ms = ms.max(10);
        self
    }

    pub fn progress_step(mut self, step: u8) -> Self {
        self.config.progress_step = step.clamp(1, 90);
        self
    }

    pub fn estimate_ratio(mut self, ratio: f64) -> Self {
        self.config.estimate_ratio = ratio;
        self
    }

    pub fn segmentation_tolerance(mut self, tolerance: f32) -> Self {
        self.config.segmentation_tolerance = tolerance.clamp(0.0, 441.0);
        self
    }

    pub fn max_upload_bytes(mut self, tool: ToolKind, bytes: u64) -> Self {
        self.config.max_upload_bytes.insert(tool, bytes);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OrchestratorConfig, ToolkitError> {
        let c = &self.config;
        let base = c.api_base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ToolkitError::InvalidConfig(format!(
                "API base URL must start with http:// or https://, got '{}'",
                c.api_base_url
            )));
        }
        if !(c.estimate_ratio > 0.0 && c.estimate_ratio <= 1.0) {
            return Err(ToolkitError::InvalidConfig(format!(
                "estimate ratio must be in (0, 1], got {}",
                c.estimate_ratio
            )));
        }
        if let Some((tool, _)) = c.max_upload_bytes.iter().find(|(_, b)| **b == 0) {
            return Err(ToolkitError::InvalidConfig(format!(
                "upload ceiling for '{tool}' must be positive"
            )));
        }
        Ok(self.config)
    }
}

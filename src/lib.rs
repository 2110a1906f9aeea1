//! # filekit
//!
//! Orchestrate file-processing tools: PDF merge and edit, Word/PowerPoint to
//! PDF, media compression, background removal and HTML→React conversion.
//!
//! ## Why this crate?
//!
//! Every tool follows the same request lifecycle: take a file, check it,
//! send it somewhere to be processed, show progress, present the result or
//! a readable error. This crate implements that lifecycle once. A tool is a
//! [`ToolKind`]; its work runs either on a remote processing service or, for
//! background removal, in-process on a locally loaded segmentation model.
//!
//! ## Request Flow
//!
//! ```text
//! file(s) + settings
//!  │
//!  ├─ 1. Stage     build an UploadRequest, declare its media category
//!  ├─ 2. Validate  type, count and size gate (no I/O)
//!  ├─ 3. Select    remote default, user choice, or engaged fallback
//!  ├─ 4. Execute   multipart/JSON call to the service, or local inference
//!  ├─ 5. Reconcile normalise the payload into a ProcessingResult
//!  └─ 6. Present   output reference + size metrics (reported/derived/estimated)
//! ```
//!
//! A remote failure that carries the service's fallback hint is re-attempted
//! locally exactly once when the tool has a local pipeline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filekit::{OrchestratorConfig, ToolContext, ToolKind, UploadRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::builder()
//!         .api_base_url("http://localhost:5000")
//!         .build()?;
//!     let ctx = ToolContext::new(config)?;
//!
//!     let session = ctx.open(ToolKind::BackgroundRemoval);
//!     let file = ctx.load_input("portrait.jpg").await?;
//!     session.stage(UploadRequest::single(file)?)?;
//!
//!     let result = session.submit().await?;
//!     let path = ctx.save(&result, std::path::Path::new("out")).await?;
//!     eprintln!("saved {} ({}% smaller{})",
//!         path.display(),
//!         result.reduction_percent.value,
//!         if result.is_estimated() { ", estimated" } else { "" });
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `filekit` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! filekit = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod settings;
pub mod tool;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder, DEFAULT_API_BASE_URL};
pub use context::ToolContext;
pub use error::{ProcessingError, RejectReason, SessionError, Suggestion, ToolkitError};
pub use output::{
    format_size, Metric, MetricSource, Notice, NoticeKind, OutputReference, ProcessingResult,
};
pub use pipeline::segment::{ModelLoader, SegmentationMask, SegmentationModel};
pub use pipeline::strategy::SelectorState;
pub use pipeline::{Executor, Readiness};
pub use progress::{
    NoopProgressCallback, Phase, ProgressCallback, ProgressTracker, ToolProgressCallback,
};
pub use session::{Lifecycle, ToolSession};
pub use settings::{
    parse_byte_size, CompressionLevel, EditOperation, ExecutionStrategy, ProcessingSettings,
};
pub use tool::{ToolDescriptor, ToolKind, ToolRegistry};
pub use upload::{MediaCategory, StagedFile, UploadRequest};

//! Pipeline stages for one tool request.
//!
//! Each submodule implements exactly one step. The session picks the
//! executor per request; the other stages are venue-agnostic.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ validate ──▶ strategy ──▶ remote | local ──▶ reconcile
//! (path/URL)  (gate)     (venue)      (executor)         (result)
//! ```
//!
//! 1. [`input`]: read a local path or download a URL into a [`crate::upload::StagedFile`]
//! 2. [`validate`]: reject bad input and settings before any work starts
//! 3. [`strategy`]: pick remote or local execution, engage the fallback
//! 4. [`form`]: attribute files and settings to multipart fields
//! 5. [`remote`]: call the processing service; the only stage with
//!    network I/O during a request
//! 6. [`local`]: in-process background removal; CPU work runs in
//!    `spawn_blocking`
//! 7. [`reconcile`]: turn a service payload into a [`ProcessingResult`]
//! 8. [`download`]: save a finished output to disk

pub mod download;
pub mod encode;
pub mod form;
pub mod input;
pub mod local;
pub mod reconcile;
pub mod remote;
pub mod segment;
pub mod strategy;
pub mod validate;

use crate::error::ProcessingError;
use crate::output::ProcessingResult;
use crate::progress::ProgressTracker;
use crate::settings::{ExecutionStrategy, ProcessingSettings};
use crate::upload::UploadRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether an execution venue can accept work right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    /// Nothing loaded yet; a load has not been requested.
    Unloaded,
    Loading,
    Ready,
    /// The last load attempt failed.
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// One execution venue for a tool.
///
/// Implementations map every failure into [`ProcessingError`]: and report
/// progress only through the tracker they are handed.
#[async_trait]
pub trait Executor: Send + Sync {
    fn strategy(&self) -> ExecutionStrategy;

    /// Current readiness. Remote venues are always ready.
    fn readiness(&self) -> Readiness {
        Readiness::Ready
    }

    /// Make the venue ready (load models). Idempotent.
    async fn prepare(&self) -> Result<(), ProcessingError> {
        Ok(())
    }

    /// Release anything `prepare` acquired.
    async fn release(&self) {}

    async fn execute(
        &self,
        request: &UploadRequest,
        settings: &ProcessingSettings,
        progress: &ProgressTracker,
    ) -> Result<ProcessingResult, ProcessingError>;
}

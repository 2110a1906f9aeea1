//! Local execution: in-process background removal.
//!
//! ## Shared model slot
//!
//! The segmentation model is process-wide. A [`LocalModelSlot`] loads it
//! lazily and at most once, shares it between every session of a
//! [`crate::context::ToolContext`], and frees it on [`LocalModelSlot::release`].
//! A second lock serialises executions so the model is never used by two
//! requests at the same time.
//!
//! ## Why spawn_blocking?
//!
//! Decoding, segmentation and PNG encoding are CPU-bound and would stall the
//! Tokio worker threads. Each runs on the blocking pool; progress advances
//! between them so the reported phase reflects real work.
//!
//! ## Scratch memory
//!
//! Models may hold per-call scratch buffers. A [`ScratchGuard`] wraps every
//! segmentation call and invokes [`SegmentationModel::release_scratch`] on
//! drop, so buffers are freed on success, error and panic alike.

use super::encode::{decode_rgba, encode_png};
use super::reconcile::default_file_name;
use super::segment::{apply_mask, ModelLoader, SegmentationModel};
use super::{Executor, Readiness};
use crate::error::ProcessingError;
use crate::output::{reduction_percent, Metric, OutputReference, ProcessingResult};
use crate::progress::{Phase, ProgressTracker};
use crate::settings::{ExecutionStrategy, ProcessingSettings};
use crate::tool::ToolKind;
use crate::upload::UploadRequest;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Process-wide holder of the local segmentation model.
pub struct LocalModelSlot {
    loader: Arc<dyn ModelLoader>,
    model: tokio::sync::Mutex<Option<Arc<dyn SegmentationModel>>>,
    readiness: Mutex<Readiness>,
    exec: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for LocalModelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalModelSlot")
            .field("readiness", &self.readiness())
            .finish()
    }
}

impl LocalModelSlot {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: tokio::sync::Mutex::new(None),
            readiness: Mutex::new(Readiness::Unloaded),
            exec: tokio::sync::Mutex::new(()),
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_readiness(&self, r: Readiness) {
        *self.readiness.lock().unwrap_or_else(PoisonError::into_inner) = r;
    }

    /// Load the model if it is not loaded yet and return it. Concurrent
    /// callers wait for the same load.
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn SegmentationModel>, ProcessingError> {
        let mut slot = self.model.lock().await;
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }

        self.set_readiness(Readiness::Loading);
        let start = Instant::now();
        match self.loader.load().await {
            Ok(model) => {
                info!(
                    model = model.name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "local model loaded"
                );
                *slot = Some(model.clone());
                self.set_readiness(Readiness::Ready);
                Ok(model)
            }
            Err(e) => {
                warn!(error = %e, "local model failed to load");
                self.set_readiness(Readiness::Failed(e.clone()));
                Err(ProcessingError::StrategyUnavailable {
                    reason: "The local model failed to load".to_string(),
                })
            }
        }
    }

    /// Start loading in the background. Readiness reports `Loading` from
    /// the moment this returns until the load finishes.
    pub fn spawn_load(self: &Arc<Self>) -> JoinHandle<()> {
        if !self.readiness().is_ready() {
            self.set_readiness(Readiness::Loading);
        }
        let slot = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = slot.ensure_loaded().await {
                debug!(error = %e, "background model load did not complete");
            }
        })
    }

    /// Drop the model. The next `ensure_loaded` loads it again.
    pub async fn release(&self) {
        // Wait for any running execution before freeing the model.
        let _exec = self.exec.lock().await;
        let mut slot = self.model.lock().await;
        if let Some(model) = slot.take() {
            info!(model = model.name(), "local model released");
        }
        self.set_readiness(Readiness::Unloaded);
    }

    async fn loaded(&self) -> Option<Arc<dyn SegmentationModel>> {
        self.model.lock().await.clone()
    }
}

/// Calls `release_scratch` when dropped.
struct ScratchGuard(Arc<dyn SegmentationModel>);

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        self.0.release_scratch();
    }
}

/// Executes background removal on this machine.
pub struct LocalExecutor {
    slot: Arc<LocalModelSlot>,
    tool: ToolKind,
}

impl LocalExecutor {
    pub fn new(slot: Arc<LocalModelSlot>, tool: ToolKind) -> Self {
        Self { slot, tool }
    }
}

fn local_failure(message: impl Into<String>) -> ProcessingError {
    ProcessingError::LocalFailure {
        message: message.into(),
    }
}

fn join_failure(stage: &str, e: tokio::task::JoinError) -> ProcessingError {
    warn!(stage, error = %e, "local processing task aborted");
    local_failure(format!("the {stage} step stopped unexpectedly"))
}

#[async_trait]
impl Executor for LocalExecutor {
    fn strategy(&self) -> ExecutionStrategy {
        ExecutionStrategy::Local
    }

    fn readiness(&self) -> Readiness {
        self.slot.readiness()
    }

    async fn prepare(&self) -> Result<(), ProcessingError> {
        self.slot.ensure_loaded().await.map(|_| ())
    }

    async fn release(&self) {
        self.slot.release().await;
    }

    async fn execute(
        &self,
        request: &UploadRequest,
        _settings: &ProcessingSettings,
        progress: &ProgressTracker,
    ) -> Result<ProcessingResult, ProcessingError> {
        let file = request
            .primary()
            .ok_or_else(|| local_failure("no image to process"))?;
        let start = Instant::now();

        // One local execution at a time on the shared model.
        let _exec = self.slot.exec.lock().await;

        // ── Step 1: Decode ───────────────────────────────────────────────
        progress.advance(Phase::Uploading);
        let bytes = file.bytes().to_vec();
        let mut image = tokio::task::spawn_blocking(move || decode_rgba(&bytes))
            .await
            .map_err(|e| join_failure("decode", e))?
            .map_err(|e| {
                warn!(error = %e, "image decode failed");
                local_failure("the image could not be decoded")
            })?;

        // ── Step 2: Model ────────────────────────────────────────────────
        progress.advance(Phase::Analyzing);
        let model = self
            .slot
            .loaded()
            .await
            .ok_or_else(|| ProcessingError::StrategyUnavailable {
                reason: "The local model is not loaded".to_string(),
            })?;

        // ── Step 3: Segment and apply the mask ───────────────────────────
        progress.advance(Phase::Processing);
        let image = tokio::task::spawn_blocking(move || {
            let _scratch = ScratchGuard(model.clone());
            let mask = model.segment(&image)?;
            apply_mask(&mut image, &mask)?;
            Ok::<_, String>(image)
        })
        .await
        .map_err(|e| join_failure("segmentation", e))?
        .map_err(|e| {
            warn!(error = %e, "segmentation failed");
            local_failure("the background could not be separated in this image")
        })?;

        // ── Step 4: Encode ───────────────────────────────────────────────
        progress.advance(Phase::Finalizing);
        let png = tokio::task::spawn_blocking(move || encode_png(&image))
            .await
            .map_err(|e| join_failure("encode", e))?
            .map_err(|e| {
                warn!(error = %e, "PNG encode failed");
                local_failure("the result could not be encoded as PNG")
            })?;

        let original = request.total_bytes();
        let size = png.len() as u64;
        debug!(
            tool = %self.tool,
            original,
            size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "local processing finished"
        );

        Ok(ProcessingResult {
            output: OutputReference::Inline {
                mime: "image/png".to_string(),
                data: png,
            },
            display_file_name: default_file_name(self.tool, request),
            original_size_bytes: original,
            result_size_bytes: Metric::derived(size),
            reduction_percent: Metric::derived(reduction_percent(original, size)),
            strategy: ExecutionStrategy::Local,
            via_fallback: false,
            notices: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::segment::{BuiltinLoader, SegmentationMask};
    use crate::upload::StagedFile;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        fail: bool,
        scratch_released: AtomicUsize,
    }

    impl SegmentationModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn segment(&self, image: &RgbaImage) -> Result<SegmentationMask, String> {
            if self.fail {
                return Err("tensor shape mismatch".into());
            }
            let (w, h) = image.dimensions();
            SegmentationMask::new(w, h, vec![true; (w * h) as usize])
        }

        fn release_scratch(&self) {
            self.scratch_released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedLoader {
        model: Arc<CountingModel>,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ModelLoader for FixedLoader {
        async fn load(&self) -> Result<Arc<dyn SegmentationModel>, String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.model.clone())
        }
    }

    struct BrokenLoader;

    #[async_trait]
    impl ModelLoader for BrokenLoader {
        async fn load(&self) -> Result<Arc<dyn SegmentationModel>, String> {
            Err("weights not found".into())
        }
    }

    fn png_request() -> UploadRequest {
        let img = RgbaImage::from_pixel(8, 8, Rgba([10, 200, 10, 255]));
        let png = encode_png(&img).unwrap();
        UploadRequest::single(StagedFile::new("leaf.png", "image/png", png)).unwrap()
    }

    fn loader(fail: bool) -> (Arc<FixedLoader>, Arc<CountingModel>) {
        let model = Arc::new(CountingModel {
            fail,
            scratch_released: AtomicUsize::new(0),
        });
        let loader = Arc::new(FixedLoader {
            model: model.clone(),
            loads: AtomicUsize::new(0),
        });
        (loader, model)
    }

    #[tokio::test]
    async fn model_loads_once() {
        let (loader, _) = loader(false);
        let slot = Arc::new(LocalModelSlot::new(loader.clone()));
        assert_eq!(slot.readiness(), Readiness::Unloaded);
        let (a, b) = tokio::join!(slot.ensure_loaded(), slot.ensure_loaded());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(slot.readiness(), Readiness::Ready);

        slot.release().await;
        assert_eq!(slot.readiness(), Readiness::Unloaded);
        slot.ensure_loaded().await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_load_is_reported() {
        let slot = LocalModelSlot::new(Arc::new(BrokenLoader));
        let err = slot.ensure_loaded().await.err().expect("load fails");
        assert!(!err.to_string().contains("weights"), "{err}");
        assert!(matches!(err, ProcessingError::StrategyUnavailable { .. }));
        assert_eq!(slot.readiness(), Readiness::Failed("weights not found".into()));
    }

    #[tokio::test]
    async fn spawn_load_reports_loading_then_ready() {
        let (loader, _) = loader(false);
        let slot = Arc::new(LocalModelSlot::new(loader));
        let handle = slot.spawn_load();
        assert_ne!(slot.readiness(), Readiness::Unloaded);
        handle.await.unwrap();
        assert_eq!(slot.readiness(), Readiness::Ready);
    }

    #[tokio::test]
    async fn spawn_load_records_a_failed_load() {
        let slot = Arc::new(LocalModelSlot::new(Arc::new(BrokenLoader)));
        slot.spawn_load().await.unwrap();
        assert!(matches!(slot.readiness(), Readiness::Failed(_)));
    }

    #[tokio::test]
    async fn execute_produces_png_and_releases_scratch() {
        let (loader, model) = loader(false);
        let slot = Arc::new(LocalModelSlot::new(loader));
        let exec = LocalExecutor::new(slot, ToolKind::BackgroundRemoval);
        exec.prepare().await.unwrap();

        let tracker = ProgressTracker::new(None);
        let result = exec
            .execute(&png_request(), &ProcessingSettings::Default, &tracker)
            .await
            .expect("local success");
        assert_eq!(result.strategy, ExecutionStrategy::Local);
        assert_eq!(result.display_file_name, "leaf-no-bg.png");
        assert!(!result.is_estimated());
        assert!(matches!(&result.output, OutputReference::Inline { mime, .. } if mime == "image/png"));
        assert!(result.output.href().starts_with("data:image/png;base64,"));
        assert_eq!(tracker.phase(), Phase::Finalizing);
        assert_eq!(model.scratch_released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn segmentation_error_still_releases_scratch() {
        let (loader, model) = loader(true);
        let exec = LocalExecutor::new(Arc::new(LocalModelSlot::new(loader)), ToolKind::BackgroundRemoval);
        exec.prepare().await.unwrap();
        let err = exec
            .execute(&png_request(), &ProcessingSettings::Default, &ProgressTracker::new(None))
            .await
            .unwrap_err();
        match &err {
            ProcessingError::LocalFailure { message } => {
                assert!(!message.contains("tensor"), "{message}");
            }
            other => panic!("expected local failure, got {other:?}"),
        }
        assert_eq!(model.scratch_released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_input_is_a_local_failure() {
        let exec = LocalExecutor::new(
            Arc::new(LocalModelSlot::new(Arc::new(BuiltinLoader::new(60.0)))),
            ToolKind::BackgroundRemoval,
        );
        exec.prepare().await.unwrap();
        let req = UploadRequest::single(StagedFile::new("x.png", "image/png", vec![1, 2, 3])).unwrap();
        let err = exec
            .execute(&req, &ProcessingSettings::Default, &ProgressTracker::new(None))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProcessingError::LocalFailure {
                message: "the image could not be decoded".into()
            }
        );
    }

    #[tokio::test]
    async fn execute_without_model_is_unavailable() {
        let (loader, _) = loader(false);
        let exec = LocalExecutor::new(Arc::new(LocalModelSlot::new(loader)), ToolKind::BackgroundRemoval);
        let err = exec
            .execute(&png_request(), &ProcessingSettings::Default, &ProgressTracker::new(None))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::StrategyUnavailable { .. }));
    }
}

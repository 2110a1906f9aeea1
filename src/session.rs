//! Tool sessions: the request lifecycle of one tool.
//!
//! A [`ToolSession`] is what a tool page holds while it is open. It owns the
//! staged upload, the settings, the strategy selector and the outcome of the
//! last request, and it enforces the lifecycle rules:
//!
//! ```text
//! Idle ──stage──▶ Validating ──▶ Rejected | Ready ──submit──▶ Executing
//!                                                   │
//!                            Succeeded ◀────────────┤
//!                            Failed    ◀────────────┘ (──▶ Executing once on fallback)
//! ```
//!
//! * One request in flight at a time: a second [`ToolSession::submit`]
//!   returns [`SessionError::Busy`].
//! * Staging a new upload or calling [`ToolSession::reset`] bumps a
//!   generation token. A request that finishes under an older generation is
//!   discarded with [`SessionError::Superseded`] and its progress tracker is
//!   detached, so stale results and progress never surface.
//! * A remote failure carrying the service's fallback hint is re-attempted
//!   locally exactly once, if the tool has a local pipeline.

use crate::config::OrchestratorConfig;
use crate::error::{ProcessingError, SessionError};
use crate::output::ProcessingResult;
use crate::pipeline::strategy::{SelectorState, StrategySelector};
use crate::pipeline::validate::{validate, validate_settings};
use crate::pipeline::{Executor, Readiness};
use crate::progress::{Phase, ProgressCallback, ProgressTracker};
use crate::settings::{ExecutionStrategy, ProcessingSettings};
use crate::tool::ToolKind;
use crate::upload::UploadRequest;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where the session is in its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Nothing staged.
    Idle,
    /// The validation gate is running.
    Validating,
    /// The staged input or the settings were turned away.
    Rejected,
    /// An upload is staged and may be submitted.
    Ready,
    Executing,
    Succeeded,
    Failed,
}

struct SessionInner {
    lifecycle: Lifecycle,
    generation: u64,
    upload: Option<Arc<UploadRequest>>,
    settings: ProcessingSettings,
    selector: StrategySelector,
    outcome: Option<Result<ProcessingResult, ProcessingError>>,
    tracker: ProgressTracker,
    in_flight: Option<u64>,
}

/// Request lifecycle controller for one tool.
pub struct ToolSession {
    tool: ToolKind,
    max_bytes: u64,
    remote: Arc<dyn Executor>,
    local: Option<Arc<dyn Executor>>,
    callback: Option<ProgressCallback>,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for ToolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ToolSession")
            .field("tool", &self.tool)
            .field("lifecycle", &inner.lifecycle)
            .field("generation", &inner.generation)
            .field("selector", &inner.selector.state())
            .field("has_local", &self.local.is_some())
            .finish()
    }
}

impl ToolSession {
    /// Open a session over explicit executors.
    ///
    /// `local` is ignored for tools without a local pipeline.
    pub fn with_executors(
        tool: ToolKind,
        config: &OrchestratorConfig,
        remote: Arc<dyn Executor>,
        local: Option<Arc<dyn Executor>>,
    ) -> Self {
        let local = local.filter(|_| tool.supports_local());
        let callback = config.progress_callback.clone();
        Self {
            tool,
            max_bytes: config.max_bytes_for(tool),
            remote,
            callback: callback.clone(),
            inner: Mutex::new(SessionInner {
                lifecycle: Lifecycle::Idle,
                generation: 0,
                upload: None,
                settings: ProcessingSettings::Default,
                selector: StrategySelector::new(local.is_some()),
                outcome: None,
                tracker: ProgressTracker::new(callback),
                in_flight: None,
            }),
            local,
        }
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    pub fn state(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Result or error of the last request of the current generation.
    pub fn outcome(&self) -> Option<Result<ProcessingResult, ProcessingError>> {
        self.lock().outcome.clone()
    }

    pub fn progress(&self) -> u8 {
        self.lock().tracker.percent()
    }

    pub fn phase(&self) -> Phase {
        self.lock().tracker.phase()
    }

    pub fn settings(&self) -> ProcessingSettings {
        self.lock().settings.clone()
    }

    pub fn selector_state(&self) -> SelectorState {
        self.lock().selector.state()
    }

    /// Venue the next request will use, ignoring readiness.
    pub fn preferred_strategy(&self) -> ExecutionStrategy {
        self.lock().selector.preferred()
    }

    /// Readiness of the local venue, `None` when the tool has none.
    pub fn local_readiness(&self) -> Option<Readiness> {
        self.local.as_ref().map(|l| l.readiness())
    }

    /// Stage a new upload, replacing whatever was staged before.
    ///
    /// Any request still running is superseded. The upload is validated
    /// immediately; a rejection leaves the session `Rejected`.
    pub fn stage(&self, upload: UploadRequest) -> Result<(), ProcessingError> {
        let mut inner = self.lock();
        self.start_generation(&mut inner);
        inner.lifecycle = Lifecycle::Validating;

        match validate(&upload, self.tool, self.max_bytes) {
            Ok(()) => {
                debug!(
                    tool = %self.tool,
                    generation = inner.generation,
                    files = upload.files().len(),
                    "upload staged"
                );
                inner.upload = Some(Arc::new(upload));
                inner.lifecycle = Lifecycle::Ready;
                Ok(())
            }
            Err(e) => {
                info!(tool = %self.tool, reason = %e, "upload rejected");
                inner.lifecycle = Lifecycle::Rejected;
                inner.outcome = Some(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Drop the staged upload and any outcome, returning to `Idle`.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.start_generation(&mut inner);
        inner.lifecycle = Lifecycle::Idle;
    }

    pub fn set_settings(&self, settings: ProcessingSettings) {
        self.lock().settings = settings;
    }

    /// Apply the user's venue choice. `None` returns to the remote default.
    ///
    /// Choosing local starts loading the model in the background when a
    /// Tokio runtime is available; until it is ready, `submit` reports
    /// `StrategyUnavailable`.
    pub fn set_preference(&self, choice: Option<ExecutionStrategy>) {
        self.lock().selector.set_preference(choice);
        if choice != Some(ExecutionStrategy::Local) {
            return;
        }
        let Some(local) = self.local.clone() else {
            return;
        };
        if local.readiness().is_ready() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = local.prepare().await {
                        warn!(error = %e, "background model load failed");
                    }
                });
            }
            Err(_) => debug!("no runtime; local model will load on prepare_local"),
        }
    }

    /// Load the local model and wait for it.
    pub async fn prepare_local(&self) -> Result<(), ProcessingError> {
        match &self.local {
            Some(local) => local.prepare().await,
            None => Err(ProcessingError::StrategyUnavailable {
                reason: "This tool can only be processed on the server".to_string(),
            }),
        }
    }

    /// Process the staged upload.
    pub async fn submit(&self) -> Result<ProcessingResult, SessionError> {
        let start = Instant::now();

        // ── Step 1: Admit the request ────────────────────────────────────
        let (generation, upload, settings, tracker, strategy) = {
            let mut inner = self.lock();
            let upload = match inner.upload.clone() {
                Some(upload) => upload,
                None => {
                    return match &inner.outcome {
                        Some(Err(e)) if inner.lifecycle == Lifecycle::Rejected => {
                            Err(SessionError::Processing(e.clone()))
                        }
                        _ => Err(SessionError::NothingStaged),
                    }
                }
            };
            if inner.in_flight == Some(inner.generation) {
                return Err(SessionError::Busy);
            }

            if let Err(e) = validate_settings(&inner.settings, &upload, self.tool) {
                info!(tool = %self.tool, reason = %e, "settings rejected");
                inner.lifecycle = Lifecycle::Rejected;
                inner.outcome = Some(Err(e.clone()));
                return Err(e.into());
            }

            let local_readiness = self
                .local
                .as_ref()
                .map(|l| l.readiness())
                .unwrap_or(Readiness::Unloaded);
            // Unavailable is a waiting state: the session is Ready and shows
            // the reason instead of the previous outcome.
            let strategy = match inner.selector.select(&local_readiness) {
                Ok(strategy) => strategy,
                Err(e) => {
                    debug!(tool = %self.tool, reason = %e, "waiting for execution venue");
                    inner.tracker.detach();
                    inner.tracker = ProgressTracker::new(self.callback.clone());
                    inner.lifecycle = Lifecycle::Ready;
                    inner.outcome = Some(Err(e.clone()));
                    return Err(e.into());
                }
            };

            inner.tracker.detach();
            inner.tracker = ProgressTracker::new(self.callback.clone());
            inner.lifecycle = Lifecycle::Executing;
            inner.outcome = None;
            inner.in_flight = Some(inner.generation);
            (
                inner.generation,
                upload,
                inner.settings.clone(),
                inner.tracker.clone(),
                strategy,
            )
        };

        info!(
            tool = %self.tool,
            generation,
            strategy = %strategy,
            "request started"
        );
        if let Some(cb) = &self.callback {
            cb.on_request_start(self.tool, generation, strategy);
        }

        // ── Step 2: Execute ──────────────────────────────────────────────
        let mut result = self
            .executor(strategy)
            .execute(&upload, &settings, &tracker)
            .await;

        // ── Step 3: One-time fallback to local ───────────────────────────
        if let Err(e) = &result {
            if strategy == ExecutionStrategy::Remote && e.recommends_fallback() {
                if let Some(retry) = self
                    .fallback(generation, &upload, &settings, &tracker)
                    .await
                {
                    result = retry;
                }
            }
        }

        // ── Step 4: Apply the outcome if still current ───────────────────
        let success = result.is_ok();
        {
            let mut inner = self.lock();
            if inner.in_flight == Some(generation) {
                inner.in_flight = None;
            }
            if inner.generation != generation {
                tracker.detach();
                info!(tool = %self.tool, generation, "result discarded: superseded");
                return Err(SessionError::Superseded { generation });
            }
            inner.lifecycle = match &result {
                Ok(_) => Lifecycle::Succeeded,
                Err(ProcessingError::StrategyUnavailable { .. }) => Lifecycle::Ready,
                Err(ProcessingError::ValidationFailed(_)) => Lifecycle::Rejected,
                Err(_) => Lifecycle::Failed,
            };
            inner.outcome = Some(result.clone());
        }

        if success {
            tracker.complete();
        }
        if !tracker.is_detached() {
            if let Some(cb) = &self.callback {
                cb.on_request_complete(success);
            }
        }
        match &result {
            Ok(r) => info!(
                tool = %self.tool,
                generation,
                strategy = %r.strategy,
                estimated = r.is_estimated(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "request succeeded"
            ),
            Err(e) => warn!(tool = %self.tool, generation, error = %e, "request failed"),
        }
        result.map_err(SessionError::from)
    }

    /// Engage the selector's fallback and re-attempt locally. Returns `None`
    /// when no re-attempt happens.
    async fn fallback(
        &self,
        generation: u64,
        upload: &UploadRequest,
        settings: &ProcessingSettings,
        tracker: &ProgressTracker,
    ) -> Option<Result<ProcessingResult, ProcessingError>> {
        let local = self.local.clone()?;
        let notice = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return None;
            }
            let notice = inner.selector.engage_fallback()?;
            // Failed → Executing, exactly once.
            inner.lifecycle = Lifecycle::Executing;
            notice
        };
        warn!(tool = %self.tool, generation, "re-attempting locally after service fallback hint");
        tracker.notice(&notice);
        tracker.restart_phases();

        let result = match local.prepare().await {
            Ok(()) => local.execute(upload, settings, tracker).await,
            Err(e) => Err(e),
        };
        Some(result.map(|mut r| {
            r.via_fallback = true;
            r.notices.insert(0, notice);
            r
        }))
    }

    /// End the session: supersede anything running and release the local
    /// model.
    pub async fn close(&self) {
        self.reset();
        if let Some(local) = &self.local {
            local.release().await;
        }
        debug!(tool = %self.tool, "session closed");
    }

    fn executor(&self, strategy: ExecutionStrategy) -> &Arc<dyn Executor> {
        match (strategy, &self.local) {
            (ExecutionStrategy::Local, Some(local)) => local,
            _ => &self.remote,
        }
    }

    fn start_generation(&self, inner: &mut SessionInner) {
        inner.generation += 1;
        inner.tracker.detach();
        inner.tracker = ProgressTracker::new(self.callback.clone());
        inner.upload = None;
        inner.outcome = None;
        inner.in_flight = None;
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectReason;
    use crate::output::{Metric, Notice, NoticeKind, OutputReference};
    use crate::progress::ToolProgressCallback;
    use crate::upload::StagedFile;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct FakeExecutor {
        strategy: ExecutionStrategy,
        responses: Mutex<VecDeque<Result<ProcessingResult, ProcessingError>>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        readiness: Mutex<Readiness>,
    }

    impl FakeExecutor {
        fn new(
            strategy: ExecutionStrategy,
            responses: Vec<Result<ProcessingResult, ProcessingError>>,
        ) -> Arc<Self> {
            Self::gated(strategy, responses, None)
        }

        fn gated(
            strategy: ExecutionStrategy,
            responses: Vec<Result<ProcessingResult, ProcessingError>>,
            gate: Option<Arc<Notify>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                strategy,
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                gate,
                readiness: Mutex::new(Readiness::Unloaded),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        fn strategy(&self) -> ExecutionStrategy {
            self.strategy
        }

        fn readiness(&self) -> Readiness {
            match self.strategy {
                ExecutionStrategy::Remote => Readiness::Ready,
                ExecutionStrategy::Local => self.readiness.lock().unwrap().clone(),
            }
        }

        async fn prepare(&self) -> Result<(), ProcessingError> {
            *self.readiness.lock().unwrap() = Readiness::Ready;
            Ok(())
        }

        async fn execute(
            &self,
            _request: &UploadRequest,
            _settings: &ProcessingSettings,
            progress: &ProgressTracker,
        ) -> Result<ProcessingResult, ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress.bump(40, 90);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            progress.advance(Phase::Finalizing);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(result(self.strategy, "default.png")))
        }
    }

    fn result(strategy: ExecutionStrategy, name: &str) -> ProcessingResult {
        ProcessingResult {
            output: OutputReference::Url {
                url: format!("http://localhost:5000/files/{name}"),
            },
            display_file_name: name.to_string(),
            original_size_bytes: 1000,
            result_size_bytes: Metric::estimated(700),
            reduction_percent: Metric::estimated(30),
            strategy,
            via_fallback: false,
            notices: vec![],
        }
    }

    fn fallback_failure() -> ProcessingError {
        ProcessingError::RemoteFailure {
            status: Some(500),
            message: "segmenter offline".into(),
            fallback: true,
        }
    }

    fn image(name: &str) -> UploadRequest {
        UploadRequest::single(StagedFile::new(name, "image/jpeg", vec![9; 1024])).unwrap()
    }

    fn session(
        tool: ToolKind,
        remote: Arc<FakeExecutor>,
        local: Option<Arc<FakeExecutor>>,
        config: &OrchestratorConfig,
    ) -> ToolSession {
        ToolSession::with_executors(
            tool,
            config,
            remote,
            local.map(|l| l as Arc<dyn Executor>),
        )
    }

    #[derive(Default)]
    struct Recording {
        values: Mutex<Vec<u8>>,
        notices: Mutex<Vec<Notice>>,
        completions: Mutex<Vec<bool>>,
    }

    impl ToolProgressCallback for Recording {
        fn on_progress(&self, percent: u8, _phase: Phase) {
            self.values.lock().unwrap().push(percent);
        }

        fn on_notice(&self, notice: &Notice) {
            self.notices.lock().unwrap().push(notice.clone());
        }

        fn on_request_complete(&self, success: bool) {
            self.completions.lock().unwrap().push(success);
        }
    }

    #[tokio::test]
    async fn unsupported_file_never_reaches_an_executor() {
        let remote = FakeExecutor::new(ExecutionStrategy::Remote, vec![]);
        let s = session(
            ToolKind::BackgroundRemoval,
            remote.clone(),
            None,
            &OrchestratorConfig::default(),
        );
        let video =
            UploadRequest::single(StagedFile::new("clip.mp4", "video/mp4", vec![1; 10])).unwrap();
        assert!(s.stage(video).is_err());
        assert_eq!(s.state(), Lifecycle::Rejected);

        let err = s.submit().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Processing(ProcessingError::ValidationFailed(
                RejectReason::UnsupportedType { .. }
            ))
        ));
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn nothing_staged() {
        let remote = FakeExecutor::new(ExecutionStrategy::Remote, vec![]);
        let s = session(ToolKind::PdfMerge, remote, None, &OrchestratorConfig::default());
        assert_eq!(s.submit().await.unwrap_err(), SessionError::NothingStaged);
        assert_eq!(s.state(), Lifecycle::Idle);
    }

    #[tokio::test]
    async fn successful_remote_request() {
        let rec = Arc::new(Recording::default());
        let config = OrchestratorConfig::builder()
            .progress_callback(rec.clone())
            .build()
            .unwrap();
        let remote = FakeExecutor::new(
            ExecutionStrategy::Remote,
            vec![Ok(result(ExecutionStrategy::Remote, "out.png"))],
        );
        let s = session(ToolKind::BackgroundRemoval, remote.clone(), None, &config);
        s.stage(image("cat.jpg")).unwrap();
        assert_eq!(s.state(), Lifecycle::Ready);

        let r = s.submit().await.unwrap();
        assert_eq!(r.display_file_name, "out.png");
        assert_eq!(s.state(), Lifecycle::Succeeded);
        assert_eq!(s.progress(), 100);
        assert!(matches!(s.outcome(), Some(Ok(_))));
        assert_eq!(*rec.completions.lock().unwrap(), vec![true]);
        let values = rec.values.lock().unwrap().clone();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
        assert_eq!(values.last(), Some(&100));
    }

    #[tokio::test]
    async fn fallback_hint_triggers_exactly_one_local_attempt() {
        let rec = Arc::new(Recording::default());
        let config = OrchestratorConfig::builder()
            .progress_callback(rec.clone())
            .build()
            .unwrap();
        let remote = FakeExecutor::new(ExecutionStrategy::Remote, vec![Err(fallback_failure())]);
        let local = FakeExecutor::new(
            ExecutionStrategy::Local,
            vec![Ok(result(ExecutionStrategy::Local, "cat-no-bg.png"))],
        );
        let s = session(
            ToolKind::BackgroundRemoval,
            remote.clone(),
            Some(local.clone()),
            &config,
        );
        s.stage(image("cat.jpg")).unwrap();

        let r = s.submit().await.unwrap();
        assert_eq!(remote.calls(), 1);
        assert_eq!(local.calls(), 1);
        assert!(r.via_fallback);
        assert_eq!(r.strategy, ExecutionStrategy::Local);
        assert_eq!(r.notices[0].kind, NoticeKind::FallbackEngaged);
        assert_eq!(s.selector_state(), SelectorState::FallbackEngaged);
        assert_eq!(*rec.notices.lock().unwrap(), vec![Notice::fallback_engaged()]);

        // The re-attempt's own stages are reported after the remote ones.
        let values = rec.values.lock().unwrap().clone();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
        assert_eq!(values, vec![40, 90, 99, 100]);

        // Later requests go straight to local.
        s.submit().await.unwrap();
        assert_eq!(remote.calls(), 1);
        assert_eq!(local.calls(), 2);
    }

    #[tokio::test]
    async fn failed_local_reattempt_is_terminal() {
        let remote = FakeExecutor::new(ExecutionStrategy::Remote, vec![Err(fallback_failure())]);
        let local = FakeExecutor::new(
            ExecutionStrategy::Local,
            vec![Err(ProcessingError::LocalFailure {
                message: "out of memory".into(),
            })],
        );
        let s = session(
            ToolKind::BackgroundRemoval,
            remote.clone(),
            Some(local.clone()),
            &OrchestratorConfig::default(),
        );
        s.stage(image("cat.jpg")).unwrap();

        let err = s.submit().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Processing(ProcessingError::LocalFailure { .. })
        ));
        assert_eq!(remote.calls(), 1);
        assert_eq!(local.calls(), 1);
        assert_eq!(s.state(), Lifecycle::Failed);
    }

    #[tokio::test]
    async fn failure_without_hint_does_not_fall_back() {
        let remote = FakeExecutor::new(
            ExecutionStrategy::Remote,
            vec![Err(ProcessingError::RemoteFailure {
                status: Some(502),
                message: "bad gateway".into(),
                fallback: false,
            })],
        );
        let local = FakeExecutor::new(ExecutionStrategy::Local, vec![]);
        let s = session(
            ToolKind::BackgroundRemoval,
            remote,
            Some(local.clone()),
            &OrchestratorConfig::default(),
        );
        s.stage(image("cat.jpg")).unwrap();
        assert!(s.submit().await.is_err());
        assert_eq!(local.calls(), 0);
        assert_eq!(s.state(), Lifecycle::Failed);
        assert_eq!(s.selector_state(), SelectorState::RemoteDefault);
    }

    #[tokio::test]
    async fn remote_only_tool_ignores_fallback_hint() {
        let remote = FakeExecutor::new(ExecutionStrategy::Remote, vec![Err(fallback_failure())]);
        let s = session(ToolKind::MediaCompress, remote, None, &OrchestratorConfig::default());
        s.stage(image("cat.jpg")).unwrap();
        let err = s.submit().await.unwrap_err();
        assert_eq!(err, SessionError::Processing(fallback_failure()));
        assert_eq!(s.state(), Lifecycle::Failed);
    }

    #[tokio::test]
    async fn second_submit_while_in_flight_is_busy() {
        let gate = Arc::new(Notify::new());
        let remote = FakeExecutor::gated(ExecutionStrategy::Remote, vec![], Some(gate.clone()));
        let s = Arc::new(session(
            ToolKind::BackgroundRemoval,
            remote.clone(),
            None,
            &OrchestratorConfig::default(),
        ));
        s.stage(image("cat.jpg")).unwrap();

        let first = tokio::spawn({
            let s = s.clone();
            async move { s.submit().await }
        });
        while s.state() != Lifecycle::Executing {
            tokio::task::yield_now().await;
        }
        assert_eq!(s.submit().await.unwrap_err(), SessionError::Busy);

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(remote.calls(), 1);
        assert_eq!(s.state(), Lifecycle::Succeeded);
    }

    #[tokio::test]
    async fn new_selection_supersedes_running_request() {
        let gate = Arc::new(Notify::new());
        let remote = FakeExecutor::gated(
            ExecutionStrategy::Remote,
            vec![
                Ok(result(ExecutionStrategy::Remote, "stale.png")),
                Ok(result(ExecutionStrategy::Remote, "fresh.png")),
            ],
            Some(gate.clone()),
        );
        let s = Arc::new(session(
            ToolKind::BackgroundRemoval,
            remote,
            None,
            &OrchestratorConfig::default(),
        ));
        s.stage(image("old.jpg")).unwrap();

        let first = tokio::spawn({
            let s = s.clone();
            async move { s.submit().await }
        });
        while s.state() != Lifecycle::Executing {
            tokio::task::yield_now().await;
        }

        s.stage(image("new.jpg")).unwrap();
        assert_eq!(s.progress(), 0);
        gate.notify_one();
        assert_eq!(
            first.await.unwrap().unwrap_err(),
            SessionError::Superseded { generation: 1 }
        );
        assert_eq!(s.state(), Lifecycle::Ready);
        assert!(s.outcome().is_none());

        gate.notify_one();
        let r = s.submit().await.unwrap();
        assert_eq!(r.display_file_name, "fresh.png");
        assert_eq!(s.generation(), 2);
    }

    #[tokio::test]
    async fn local_preference_waits_for_model() {
        let remote = FakeExecutor::new(ExecutionStrategy::Remote, vec![]);
        let local = FakeExecutor::new(ExecutionStrategy::Local, vec![]);
        let s = session(
            ToolKind::BackgroundRemoval,
            remote.clone(),
            Some(local.clone()),
            &OrchestratorConfig::default(),
        );
        s.stage(image("cat.jpg")).unwrap();
        s.lock().selector.set_preference(Some(ExecutionStrategy::Local));

        let err = s.submit().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Processing(ProcessingError::StrategyUnavailable { .. })
        ));
        assert_eq!(s.state(), Lifecycle::Ready);
        assert_eq!(local.calls() + remote.calls(), 0);

        s.prepare_local().await.unwrap();
        let r = s.submit().await.unwrap();
        assert_eq!(r.strategy, ExecutionStrategy::Local);
        assert_eq!(local.calls(), 1);
    }

    #[tokio::test]
    async fn waiting_for_model_replaces_previous_outcome() {
        let remote = FakeExecutor::new(
            ExecutionStrategy::Remote,
            vec![
                Ok(result(ExecutionStrategy::Remote, "old.png")),
                Err(ProcessingError::RemoteFailure {
                    status: Some(502),
                    message: "bad gateway".into(),
                    fallback: false,
                }),
            ],
        );
        let local = FakeExecutor::new(ExecutionStrategy::Local, vec![]);
        let s = session(
            ToolKind::BackgroundRemoval,
            remote.clone(),
            Some(local.clone()),
            &OrchestratorConfig::default(),
        );
        s.stage(image("cat.jpg")).unwrap();

        // After a success.
        s.submit().await.unwrap();
        assert_eq!(s.state(), Lifecycle::Succeeded);
        s.lock().selector.set_preference(Some(ExecutionStrategy::Local));
        assert!(s.submit().await.is_err());
        assert_eq!(s.state(), Lifecycle::Ready);
        assert!(matches!(
            s.outcome(),
            Some(Err(ProcessingError::StrategyUnavailable { .. }))
        ));
        assert_eq!(s.progress(), 0);

        // After a failure.
        s.lock().selector.set_preference(None);
        assert!(s.submit().await.is_err());
        assert_eq!(s.state(), Lifecycle::Failed);
        s.lock().selector.set_preference(Some(ExecutionStrategy::Local));
        let err = s.submit().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Processing(ProcessingError::StrategyUnavailable { .. })
        ));
        assert_eq!(s.state(), Lifecycle::Ready);
        assert!(matches!(
            s.outcome(),
            Some(Err(ProcessingError::StrategyUnavailable { .. }))
        ));
        assert_eq!(remote.calls(), 2);
        assert_eq!(local.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_before_execution() {
        let remote = FakeExecutor::new(ExecutionStrategy::Remote, vec![]);
        let s = session(
            ToolKind::MediaCompress,
            remote.clone(),
            None,
            &OrchestratorConfig::default(),
        );
        let audio =
            UploadRequest::single(StagedFile::new("a.mp3", "audio/mpeg", vec![1; 10])).unwrap();
        s.stage(audio).unwrap();
        s.set_settings(ProcessingSettings::target_size(1024, Some(50)));
        assert!(s.submit().await.is_err());
        assert_eq!(s.state(), Lifecycle::Rejected);
        assert_eq!(remote.calls(), 0);

        s.set_settings(ProcessingSettings::target_size(1024, None));
        assert!(s.submit().await.is_ok());
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let remote = FakeExecutor::new(ExecutionStrategy::Remote, vec![]);
        let s = session(ToolKind::BackgroundRemoval, remote, None, &OrchestratorConfig::default());
        s.stage(image("cat.jpg")).unwrap();
        s.submit().await.unwrap();
        s.reset();
        assert_eq!(s.state(), Lifecycle::Idle);
        assert!(s.outcome().is_none());
        assert_eq!(s.submit().await.unwrap_err(), SessionError::NothingStaged);
    }
}

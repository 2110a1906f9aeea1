//! Progress tracking for a single processing request.
//!
//! A request moves through four ordered [`Phase`]s, each owning a slice of
//! the 0–100 range. [`ProgressTracker`] enforces the two rules every observer
//! relies on: the value never decreases within a request, and it never
//! exceeds 100.
//!
//! Remote requests have no server-side progress channel, so a
//! [`HeuristicTicker`] nudges the value forward on a timer and stops at 90
//! until the response arrives. Local requests call [`ProgressTracker::advance`]
//! at each real stage (decode, model, segmentation, encode).
//!
//! Inject an [`Arc<dyn ToolProgressCallback>`] via
//! [`crate::config::OrchestratorConfigBuilder::progress_callback`] to receive
//! events.
//!
//! # Example
//!
//! ```rust
//! use filekit::{OrchestratorConfig, Phase, ToolProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicU8, Ordering}};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl ToolProgressCallback for LastPercent {
//!     fn on_progress(&self, percent: u8, _phase: Phase) {
//!         self.0.store(percent, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = OrchestratorConfig::builder()
//!     .progress_callback(Arc::new(LastPercent(AtomicU8::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Notice;
use crate::settings::ExecutionStrategy;
use crate::tool::ToolKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Highest value heuristic progress may reach before the response arrives.
pub const REMOTE_PROGRESS_CAP: u8 = 90;

/// Ordered processing phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// 0–30
    Uploading,
    /// 30–60
    Analyzing,
    /// 60–90
    Processing,
    /// 90–100
    Finalizing,
}

impl Phase {
    /// Inclusive start and end of this phase's slice of the 0–100 range.
    pub fn range(&self) -> (u8, u8) {
        match self {
            Phase::Uploading => (0, 30),
            Phase::Analyzing => (30, 60),
            Phase::Processing => (60, 90),
            Phase::Finalizing => (90, 100),
        }
    }

    /// The phase a percentage falls into.
    pub fn for_percent(percent: u8) -> Phase {
        match percent {
            0..=29 => Phase::Uploading,
            30..=59 => Phase::Analyzing,
            60..=89 => Phase::Processing,
            _ => Phase::Finalizing,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Uploading => "uploading",
            Phase::Analyzing => "analyzing",
            Phase::Processing => "processing",
            Phase::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

/// Called by a tool session as a request progresses.
///
/// Implementations must be `Send + Sync`: heuristic ticks arrive from a
/// spawned task. All methods have default no-op implementations so callers
/// only override what they care about. Callbacks run while the tracker's
/// lock is held, so they must not call back into the tracker.
pub trait ToolProgressCallback: Send + Sync {
    /// Called once when a request starts executing.
    fn on_request_start(&self, tool: ToolKind, generation: u64, strategy: ExecutionStrategy) {
        let _ = (tool, generation, strategy);
    }

    /// Called when the request enters a new phase.
    fn on_phase(&self, phase: Phase) {
        let _ = phase;
    }

    /// Called whenever the percentage increases.
    fn on_progress(&self, percent: u8, phase: Phase) {
        let _ = (percent, phase);
    }

    /// Called for user-facing notices such as a strategy switch.
    fn on_notice(&self, notice: &Notice) {
        let _ = notice;
    }

    /// Called once when the request reaches a terminal state.
    fn on_request_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ToolProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::OrchestratorConfig`].
pub type ProgressCallback = Arc<dyn ToolProgressCallback>;

#[derive(Debug)]
struct TrackerState {
    percent: u8,
    phase: Phase,
    /// Where the current pass of phases starts. Zero except during a
    /// re-attempt, whose phases share the range above this value.
    base: u8,
}

impl TrackerState {
    /// Map a phase-relative percentage onto the current pass.
    fn scaled(&self, percent: u8) -> u8 {
        let span = 100 - u16::from(self.base);
        (u16::from(self.base) + span * u16::from(percent) / 100) as u8
    }

    /// The phase an absolute percentage falls into for the current pass.
    fn phase_at(&self, percent: u8) -> Phase {
        let span = 100 - u16::from(self.base);
        if span == 0 {
            return Phase::Finalizing;
        }
        let relative = u16::from(percent.saturating_sub(self.base)) * 100 / span;
        Phase::for_percent(relative.min(100) as u8)
    }
}

struct TrackerInner {
    state: Mutex<TrackerState>,
    detached: AtomicBool,
    callback: Option<ProgressCallback>,
}

/// Monotonic progress for one request. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("percent", &self.percent())
            .field("phase", &self.phase())
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState {
                    percent: 0,
                    phase: Phase::Uploading,
                    base: 0,
                }),
                detached: AtomicBool::new(false),
                callback,
            }),
        }
    }

    pub fn percent(&self) -> u8 {
        self.lock().percent
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Enter `phase` and return the current percentage.
    ///
    /// Moving to an earlier phase is ignored; entering a later phase lifts
    /// the value to that phase's floor.
    pub fn advance(&self, phase: Phase) -> u8 {
        let mut state = self.lock();
        if phase < state.phase {
            return state.percent;
        }
        let phase_changed = phase != state.phase;
        state.phase = phase;
        let floor = state.scaled(phase.range().0);
        let percent_changed = floor > state.percent;
        state.percent = state.percent.max(floor);
        self.emit(&state, phase_changed, percent_changed);
        state.percent
    }

    /// Heuristic increment: add `step`, never past `cap`, never backwards.
    pub fn bump(&self, step: u8, cap: u8) -> u8 {
        let mut state = self.lock();
        let target = state.percent.saturating_add(step).min(cap.min(100));
        if target <= state.percent {
            return state.percent;
        }
        state.percent = target;
        // A value held at the cap is still waiting for the response.
        let phase = if target == cap && cap < 100 {
            state.phase_at(target.saturating_sub(1))
        } else {
            state.phase_at(target)
        };
        let phase = phase.max(state.phase);
        let phase_changed = phase != state.phase;
        state.phase = phase;
        self.emit(&state, phase_changed, true);
        state.percent
    }

    /// Mark the request finished: 100 %.
    pub fn complete(&self) -> u8 {
        let mut state = self.lock();
        let phase_changed = state.phase != Phase::Finalizing;
        let percent_changed = state.percent != 100;
        state.phase = Phase::Finalizing;
        state.percent = 100;
        self.emit(&state, phase_changed, percent_changed);
        100
    }

    /// Begin a second pass of phases within the same request, e.g. a local
    /// re-attempt after the service failed. The value stays where it is and
    /// the new pass shares what remains up to 100, so its stages show up
    /// without the value ever going backwards.
    pub fn restart_phases(&self) {
        let mut state = self.lock();
        state.base = state.percent;
        let phase_changed = state.phase != Phase::Uploading;
        state.phase = Phase::Uploading;
        self.emit(&state, phase_changed, false);
    }

    /// Forward a notice to the observer unless detached.
    pub fn notice(&self, notice: &Notice) {
        let _state = self.lock();
        if let Some(cb) = self.live_callback() {
            cb.on_notice(notice);
        }
    }

    /// Stop forwarding events. Used when a newer request supersedes this one;
    /// the tracker keeps counting but nobody hears about it.
    pub fn detach(&self) {
        self.inner.detached.store(true, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn live_callback(&self) -> Option<&ProgressCallback> {
        if self.is_detached() {
            None
        } else {
            self.inner.callback.as_ref()
        }
    }

    fn emit(&self, state: &TrackerState, phase_changed: bool, percent_changed: bool) {
        trace!(percent = state.percent, phase = %state.phase, "progress");
        let Some(cb) = self.live_callback() else {
            return;
        };
        if phase_changed {
            cb.on_phase(state.phase);
        }
        if percent_changed {
            cb.on_progress(state.percent, state.phase);
        }
    }
}

/// Time-based progress for requests with no progress channel.
///
/// Adds `step` every `every` until [`REMOTE_PROGRESS_CAP`]. The ticking task
/// is aborted when the ticker is dropped, so holding it in a scope ties the
/// heuristic to the lifetime of the call it decorates.
pub struct HeuristicTicker {
    handle: JoinHandle<()>,
}

impl HeuristicTicker {
    pub fn start(tracker: ProgressTracker, every: Duration, step: u8) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if tracker.bump(step, REMOTE_PROGRESS_CAP) >= REMOTE_PROGRESS_CAP {
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for HeuristicTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

//! Strategy selection: which venue runs the next request.
//!
//! Remote is the default for every tool. A user may switch to local for
//! tools that support it, and a remote failure carrying the service's
//! fallback hint moves the selector to local once per session.

use super::Readiness;
use crate::error::ProcessingError;
use crate::output::Notice;
use crate::settings::ExecutionStrategy;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    /// No explicit choice; remote.
    RemoteDefault,
    /// The user picked a venue.
    UserChoice(ExecutionStrategy),
    /// The service asked for local processing and the switch was made.
    FallbackEngaged,
}

#[derive(Debug, Clone)]
pub struct StrategySelector {
    state: SelectorState,
    supports_local: bool,
}

impl StrategySelector {
    pub fn new(supports_local: bool) -> Self {
        Self {
            state: SelectorState::RemoteDefault,
            supports_local,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Venue the selector currently points at, ignoring readiness.
    pub fn preferred(&self) -> ExecutionStrategy {
        match self.state {
            SelectorState::RemoteDefault => ExecutionStrategy::Remote,
            SelectorState::UserChoice(s) => s,
            SelectorState::FallbackEngaged => ExecutionStrategy::Local,
        }
    }

    /// Pick the venue for the next request.
    ///
    /// `local` is the readiness of the local venue; it is only consulted
    /// when local is preferred. A local venue that is not ready yields
    /// `StrategyUnavailable`, which is a waiting state rather than a failure.
    pub fn select(&self, local: &Readiness) -> Result<ExecutionStrategy, ProcessingError> {
        match self.preferred() {
            ExecutionStrategy::Remote => Ok(ExecutionStrategy::Remote),
            ExecutionStrategy::Local if !self.supports_local => {
                Err(ProcessingError::StrategyUnavailable {
                    reason: "This tool can only be processed on the server".to_string(),
                })
            }
            ExecutionStrategy::Local => match local {
                Readiness::Ready => Ok(ExecutionStrategy::Local),
                Readiness::Loading => Err(ProcessingError::StrategyUnavailable {
                    reason: "The local model is still loading".to_string(),
                }),
                Readiness::Unloaded => Err(ProcessingError::StrategyUnavailable {
                    reason: "The local model is not loaded".to_string(),
                }),
                Readiness::Failed(_) => Err(ProcessingError::StrategyUnavailable {
                    reason: "The local model failed to load".to_string(),
                }),
            },
        }
    }

    /// Switch to local after a remote failure that carried the fallback
    /// hint. Returns the notice to show, or `None` when the switch is not
    /// possible or already happened.
    pub fn engage_fallback(&mut self) -> Option<Notice> {
        if !self.supports_local || self.preferred() != ExecutionStrategy::Remote {
            return None;
        }
        info!("service requested local processing; switching venue");
        self.state = SelectorState::FallbackEngaged;
        Some(Notice::fallback_engaged())
    }

    /// Apply a manual choice. `None` returns to the remote default. A manual
    /// choice always replaces an engaged fallback.
    pub fn set_preference(&mut self, choice: Option<ExecutionStrategy>) {
        self.state = match choice {
            None => SelectorState::RemoteDefault,
            Some(s) => SelectorState::UserChoice(s),
        };
    }
}

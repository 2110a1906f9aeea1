//! Process-wide entry point: shared client, shared model, session factory.
//!
//! A [`ToolContext`] is created once and outlives every tool page. It owns
//! the pieces sessions share: the configuration, one HTTP client (connection
//! pooling) and the [`LocalModelSlot`] holding the background-removal model.
//! Each call to [`ToolContext::open`] hands out a fresh [`ToolSession`].

use crate::config::OrchestratorConfig;
use crate::error::ToolkitError;
use crate::output::ProcessingResult;
use crate::pipeline::download::save_output;
use crate::pipeline::input::resolve_input;
use crate::pipeline::local::{LocalExecutor, LocalModelSlot};
use crate::pipeline::remote::RemoteExecutor;
use crate::pipeline::segment::{BuiltinLoader, ModelLoader};
use crate::pipeline::{Executor, Readiness};
use crate::session::ToolSession;
use crate::tool::{ToolKind, ToolRegistry};
use crate::upload::StagedFile;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Shared state behind every [`ToolSession`].
#[derive(Debug, Clone)]
pub struct ToolContext {
    config: Arc<OrchestratorConfig>,
    client: reqwest::Client,
    model_slot: Arc<LocalModelSlot>,
    registry: ToolRegistry,
}

impl ToolContext {
    /// Create a context using the built-in segmentation model.
    pub fn new(config: OrchestratorConfig) -> Result<Self, ToolkitError> {
        let loader = Arc::new(BuiltinLoader::new(config.segmentation_tolerance));
        Self::with_model_loader(config, loader)
    }

    /// Create a context whose local pipeline loads its model from `loader`.
    pub fn with_model_loader(
        config: OrchestratorConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self, ToolkitError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("filekit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolkitError::InvalidConfig(format!("HTTP client: {e}")))?;
        let registry = ToolRegistry::new(|kind| config.max_bytes_for(kind));
        debug!(api = %config.api_base_url, "tool context created");
        Ok(Self {
            config: Arc::new(config),
            client,
            model_slot: Arc::new(LocalModelSlot::new(loader)),
            registry,
        })
    }

    /// Open a session for one tool.
    pub fn open(&self, tool: ToolKind) -> ToolSession {
        let remote: Arc<dyn Executor> = Arc::new(RemoteExecutor::new(
            self.client.clone(),
            self.config.clone(),
            tool,
        ));
        let local = tool.supports_local().then(|| {
            Arc::new(LocalExecutor::new(self.model_slot.clone(), tool)) as Arc<dyn Executor>
        });
        ToolSession::with_executors(tool, &self.config, remote, local)
    }

    /// Open a session by slug (`"image-bg-remover"`, `"pdf-merger"`, …).
    pub fn open_slug(&self, slug: &str) -> Result<ToolSession, ToolkitError> {
        let kind = self.registry.lookup(slug)?.kind;
        Ok(self.open(kind))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// State of the shared local model.
    pub fn model_readiness(&self) -> Readiness {
        self.model_slot.readiness()
    }

    /// Start loading the shared local model in the background.
    pub fn preload_model(&self) -> JoinHandle<()> {
        self.model_slot.spawn_load()
    }

    /// Free the shared local model. Sessions reload it on demand.
    pub async fn release_model(&self) {
        self.model_slot.release().await;
    }

    /// Read a local path or download a URL into a file ready to stage.
    pub async fn load_input(&self, input: &str) -> Result<StagedFile, ToolkitError> {
        resolve_input(&self.client, input, self.config.download_timeout_secs).await
    }

    /// Save a finished result under `dir`, returning the written path.
    pub async fn save(
        &self,
        result: &ProcessingResult,
        dir: &Path,
    ) -> Result<PathBuf, ToolkitError> {
        save_output(&self.client, result, dir, self.config.download_timeout_secs).await
    }
}

//! Model backend access and the active-model selection.

use crate::config::ProviderConfig;
use crate::error::{ChatError, Result};
use async_openai::config::OpenAIConfig;
use async_openai::Client;
use std::sync::{Arc, Mutex};
use tracing::info;

/// A client bound to one model identifier.
pub struct ModelHandle {
    model_id: String,
    client: Client<OpenAIConfig>,
}

impl ModelHandle {
    pub fn new(provider: &ProviderConfig, model_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            model_id: model_id.into(),
            client: build_client(provider)?,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn client(&self) -> &Client<OpenAIConfig> {
        &self.client
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

/// Tracks the most recently requested model and reuses its handle.
///
/// Callers get an `Arc` to the handle; a later switch to another model
/// replaces the selector's entry but never the handle a caller already holds.
pub struct ModelSelector {
    provider: ProviderConfig,
    catalog: Client<OpenAIConfig>,
    active: Mutex<Arc<ModelHandle>>,
}

impl ModelSelector {
    /// Create a selector with the configured default model already active.
    pub fn new(provider: ProviderConfig) -> Result<Self> {
        let catalog = build_client(&provider)?;
        let initial = ModelHandle::new(&provider, provider.default_model.clone())?;
        Ok(Self {
            provider,
            catalog,
            active: Mutex::new(Arc::new(initial)),
        })
    }

    /// Return the handle for `model_id`, rebuilding it if a different model
    /// is currently active.
    pub fn ensure_model(&self, model_id: &str) -> Result<Arc<ModelHandle>> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| ChatError::Provider("model selector lock poisoned".into()))?;

        if active.model_id() == model_id {
            return Ok(active.clone());
        }

        info!(from = active.model_id(), to = model_id, "Switching active model");
        let handle = Arc::new(ModelHandle::new(&self.provider, model_id)?);
        *active = handle.clone();
        Ok(handle)
    }

    /// Identifier of the currently active model.
    pub fn active_model_id(&self) -> Option<String> {
        self.active
            .lock()
            .ok()
            .map(|active| active.model_id().to_string())
    }

    /// Model identifiers offered by the backend's catalog.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .catalog
            .models()
            .list()
            .await
            .map_err(|e| ChatError::Provider(e.to_string()))?;
        Ok(response.data.into_iter().map(|m| m.id).collect())
    }
}

fn build_client(provider: &ProviderConfig) -> Result<Client<OpenAIConfig>> {
    let openai_config = OpenAIConfig::new()
        .with_api_base(&provider.api_base)
        .with_api_key(
            provider
                .api_key
                .clone()
                .unwrap_or_else(|| "not-needed".to_string()),
        );

    let http = reqwest::Client::builder()
        .timeout(provider.timeout())
        .build()?;

    Ok(Client::with_config(openai_config).with_http_client(http))
}

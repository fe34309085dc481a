//! Config resolver: server connection info, sampler list and the cached
//! model catalog.
//!
//! Catalog reads and option writes tolerate path drift between server
//! versions by retrying the legacy path; generation itself never does.
use std::sync::{Arc, RwLock};

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::sd::models::{ModelDescriptor, SdOption};
use crate::sd::transport::{HttpRequest, SharedTransport};

/// Snapshot of the catalog. Replaced wholesale, never mutated in place.
#[derive(Debug, Default)]
struct Catalog {
    models: Arc<Vec<ModelDescriptor>>,
    names: Arc<Vec<String>>,
}

pub struct ConfigResolver {
    server: ServerConfig,
    transport: SharedTransport,
    samplers: Vec<String>,
    catalog: RwLock<Catalog>,
}

impl ConfigResolver {
    pub fn new(server: ServerConfig, transport: SharedTransport, samplers: Vec<String>) -> Self {
        ConfigResolver { server, transport, samplers, catalog: RwLock::new(Catalog::default()) }
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn transport(&self) -> SharedTransport {
        self.transport.clone()
    }

    pub fn samplers(&self) -> &[String] {
        &self.samplers
    }

    /// Cached model names, in server order. Empty until the first
    /// successful `list_models`.
    pub fn model_names(&self) -> Arc<Vec<String>> {
        self.read_catalog().names.clone()
    }

    pub fn models(&self) -> Arc<Vec<ModelDescriptor>> {
        self.read_catalog().models.clone()
    }

    /// Fetch the model catalog and replace the cache.
    ///
    /// 404 on the primary path retries the legacy path once; 401/403 fails
    /// with `AuthRequired` without touching the fallback.
    pub async fn list_models(&self) -> AppResult<Arc<Vec<ModelDescriptor>>> {
        let primary = self.server.url(&self.server.models_path);
        let response = match self.transport.send(HttpRequest::get(&primary)).await {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => {
                let fallback = self.server.url(&self.server.models_fallback_path);
                tracing::warn!(%primary, %fallback, "model list not found, trying legacy path");
                self.transport.send(HttpRequest::get(&fallback)).await?
            }
            Err(err) => return Err(err.into()),
        };

        let models: Vec<ModelDescriptor> = response.json()?;
        let names: Vec<String> = models.iter().map(|m| m.model_name.clone()).collect();
        tracing::info!(count = models.len(), "model catalog refreshed");

        let models = Arc::new(models);
        let mut catalog = self.catalog.write().unwrap_or_else(|e| e.into_inner());
        *catalog = Catalog { models: models.clone(), names: Arc::new(names) };
        Ok(models)
    }

    /// Switch the server's active checkpoint.
    ///
    /// Loads the catalog first when it is empty. A transport failure on the
    /// options path is retried once on the legacy path; auth failures are
    /// not. The response body is ignored; returning means the server has
    /// finished switching.
    pub async fn set_model(&self, name: &str) -> AppResult<()> {
        if self.model_names().is_empty() {
            self.list_models().await?;
        }
        if !self.model_names().iter().any(|n| n == name) {
            tracing::warn!(model = name, "model is not in the cached catalog, sending anyway");
        }

        let body = serde_json::to_value(SdOption { sd_model_checkpoint: name.to_string() })
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let primary = self.server.url(&self.server.options_path);
        match self.transport.send(HttpRequest::post_json(&primary, body.clone())).await {
            Ok(_) => {}
            Err(err) if err.is_auth() => return Err(err.into()),
            Err(err) => {
                let fallback = self.server.url(&self.server.options_fallback_path);
                tracing::warn!(%primary, %fallback, error = %err, "set model failed, trying legacy path");
                self.transport
                    .send(HttpRequest::post_json(&fallback, body))
                    .await
                    .map_err(AppError::from)?;
            }
        }
        tracing::info!(model = name, "active model set");
        Ok(())
    }

    /// Name to select when a request does not pick a model: the first
    /// catalog entry, loading the catalog if needed.
    pub async fn default_model(&self) -> AppResult<String> {
        if self.model_names().is_empty() {
            self.list_models().await?;
        }
        self.model_names().first().cloned().ok_or(AppError::NoModels)
    }

    fn read_catalog(&self) -> std::sync::RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner())
    }
}

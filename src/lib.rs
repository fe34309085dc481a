//! Stable Diffusion material generation library
//!
//! Modules:
//! - `sd`: client for the inference server (transport, catalog, requests, progress).
//! - `generation`: the job orchestrator and the material hand-off.
//! - `normal_map`: normal-map synthesis from a color image.
//! - `api`: Axum HTTP handlers and router used by the service binary.
//! - `config`: Env-driven configuration loader.
//! - `error`: Common error types and alias.
//!
//! Re-exports are provided for common types: `Config`, `ConfigResolver`,
//! `Orchestrator`, `GenerationRequest` and `HttpTransport`.
pub mod api;
pub mod config;
pub mod error;
pub mod generation;
pub mod normal_map;
pub mod sd;

pub use config::{Config, GenerationDefaults, ServerConfig};
pub use error::{AppError, AppResult, TransportError};
pub use generation::{GenerateOutcome, JobState, MaterialSettings, MaterialSink, Orchestrator, OrchestratorOptions};
pub use sd::catalog::ConfigResolver;
pub use sd::request::GenerationRequest;
pub use sd::transport::{HttpTransport, Transport};

use std::sync::Arc;

/// Wire a resolver over the real HTTP transport from a loaded `Config`.
pub fn resolver_from_config(config: &Config) -> AppResult<Arc<ConfigResolver>> {
    let transport = HttpTransport::new(&config.server)?;
    Ok(Arc::new(ConfigResolver::new(
        config.server.clone(),
        Arc::new(transport),
        config.samplers.clone(),
    )))
}

/// Orchestrator options taken from a loaded `Config`.
pub fn orchestrator_options(config: &Config) -> OrchestratorOptions {
    OrchestratorOptions {
        output_root: config.output_root.clone(),
        poll_interval: config.poll_interval,
        defaults: config.defaults.clone(),
        material: MaterialSettings::default(),
    }
}

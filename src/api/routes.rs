//! Shared state and router for the HTTP host surface.
use std::sync::{Arc, RwLock};

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::generation::{GeneratedMaterial, MaterialSink, Orchestrator};
use crate::sd::catalog::ConfigResolver;

pub struct AppState {
    pub resolver: Arc<ConfigResolver>,
    pub orchestrator: Arc<Orchestrator>,
    pub latest: Arc<LatestMaterial>,
}

/// Material sink that keeps the most recent color/normal pair so the API
/// can serve it.
#[derive(Default)]
pub struct LatestMaterial {
    inner: RwLock<Option<GeneratedMaterial>>,
}

impl LatestMaterial {
    pub fn get(&self) -> Option<GeneratedMaterial> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MaterialSink for LatestMaterial {
    fn apply(&self, material: &GeneratedMaterial) {
        tracing::info!(
            material_id = %material.material_id,
            normal = material.normal.is_some(),
            "material updated"
        );
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(material.clone());
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/models", get(handlers::list_models))
        .route("/models/select", post(handlers::select_model))
        .route("/samplers", get(handlers::samplers))
        .route("/generate", post(handlers::generate))
        .route("/job", get(handlers::job))
        .route("/material/color.png", get(handlers::color_png))
        .route("/material/normal.png", get(handlers::normal_png))
        .route(
            "/material/settings",
            get(handlers::material_settings).put(handlers::update_material_settings),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

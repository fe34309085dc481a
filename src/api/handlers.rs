//! Axum request handlers for the HTTP API.
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::routes::AppState;
use crate::error::AppError;
use crate::generation::MaterialSettings;
use crate::sd::request::GenerationRequest;

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn fail(err: AppError) -> (StatusCode, String) {
    let status = match &err {
        AppError::AuthRequired { .. } => StatusCode::UNAUTHORIZED,
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::Transport(_) | AppError::InvalidResponse(_) | AppError::EmptyResult | AppError::NoModels => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!(error = %err, "request failed");
    (status, err.to_string())
}

fn json_flag(params: &HashMap<String, String>) -> bool {
    params.get("json").map(|v| v == "true" || v == "1").unwrap_or(false)
}

fn png(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], bytes).into_response()
}

pub async fn root() -> &'static str {
    "SD Material Service"
}

// Models: refresh the catalog; names one per line, or descriptors with ?json=true
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let models = state.resolver.list_models().await.map_err(fail)?;
    if json_flag(&params) {
        return Ok(Json((*models).clone()).into_response());
    }
    let mut lines = String::new();
    for m in models.iter() {
        lines.push_str(&m.model_name);
        lines.push('\n');
    }
    Ok(lines.into_response())
}

#[derive(Debug, Deserialize)]
pub struct SelectModel {
    pub name: String,
}

pub async fn select_model(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SelectModel>,
) -> ApiResult<Json<Value>> {
    if payload.name.trim().is_empty() {
        return Err(fail(AppError::Validation("model name is required".to_string())));
    }
    state.resolver.set_model(&payload.name).await.map_err(fail)?;
    Ok(Json(json!({"status": "success", "model": payload.name})))
}

pub async fn samplers(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.resolver.samplers().to_vec())
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerationRequest>,
) -> (StatusCode, Json<Value>) {
    if !request.is_triggerable() {
        return (StatusCode::OK, Json(json!({"status": "ignored", "reason": "empty prompt"})));
    }
    if state.orchestrator.spawn_generate(request) {
        let job_id = state.orchestrator.snapshot().job_id;
        (StatusCode::ACCEPTED, Json(json!({"status": "started", "job_id": job_id})))
    } else {
        (StatusCode::OK, Json(json!({"status": "busy"})))
    }
}

pub async fn job(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.orchestrator.snapshot()))
}

pub async fn color_png(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let Some(material) = state.latest.get() else {
        return Err((StatusCode::NOT_FOUND, "no material generated yet".to_string()));
    };
    let bytes = tokio::fs::read(&material.color_path)
        .await
        .map_err(|e| fail(AppError::Io(e)))?;
    Ok(png(bytes))
}

pub async fn normal_png(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let Some(normal) = state.latest.get().and_then(|m| m.normal) else {
        return Err((StatusCode::NOT_FOUND, "no normal map available".to_string()));
    };
    let mut buf = Cursor::new(Vec::new());
    normal
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| fail(AppError::Internal(e.to_string())))?;
    Ok(png(buf.into_inner()))
}

pub async fn material_settings(State(state): State<Arc<AppState>>) -> Json<MaterialSettings> {
    Json(state.orchestrator.material_settings())
}

pub async fn update_material_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<MaterialSettings>,
) -> ApiResult<Json<Value>> {
    let republished = state.orchestrator.update_material(settings).await.map_err(fail)?;
    Ok(Json(json!({
        "status": "success",
        "republished": republished,
        "settings": state.orchestrator.material_settings(),
    })))
}

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};

use sd_material::config::DEFAULT_SAMPLERS;
use sd_material::generation::GeneratedMaterial;
use sd_material::sd::transport::{HttpRequest, HttpResponse, Transport};
use sd_material::{ConfigResolver, MaterialSink, ServerConfig, TransportError};

pub const BASE: &str = "http://sd.test";

pub type Reply = Result<HttpResponse, TransportError>;

pub fn ok(body: impl Into<String>) -> Reply {
    Ok(HttpResponse { status: 200, body: body.into() })
}

pub fn status(code: u16) -> Reply {
    Err(TransportError::Protocol { status: code, body: String::new() })
}

#[derive(Default)]
struct Route {
    replies: VecDeque<Reply>,
    delay: Duration,
}

/// In-memory `Transport` answering by URL path. The last scripted reply for a
/// path repeats; unscripted paths answer 404. Every request is recorded.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, path: &str, reply: Reply) -> &Self {
        self.routes.lock().unwrap().entry(path.to_string()).or_default().replies.push_back(reply);
        self
    }

    pub fn delay(&self, path: &str, delay: Duration) -> &Self {
        self.routes.lock().unwrap().entry(path.to_string()).or_default().delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Paths requested so far, in order.
    pub fn paths(&self) -> Vec<String> {
        self.calls().iter().map(|c| path_of(&c.url).to_string()).collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.paths().iter().filter(|p| p.as_str() == path).count()
    }
}

fn path_of(url: &str) -> &str {
    url.strip_prefix(BASE).unwrap_or(url)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = path_of(&request.url).to_string();
        self.calls.lock().unwrap().push(request);
        let (reply, delay) = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&path) {
                Some(route) => {
                    let reply = if route.replies.len() > 1 {
                        route.replies.pop_front()
                    } else {
                        route.replies.front().cloned()
                    };
                    (reply, route.delay)
                }
                None => (None, Duration::ZERO),
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply.unwrap_or_else(|| status(404))
    }
}

pub fn samplers() -> Vec<String> {
    DEFAULT_SAMPLERS.iter().map(|s| s.to_string()).collect()
}

pub fn resolver(transport: Arc<ScriptedTransport>) -> Arc<ConfigResolver> {
    Arc::new(ConfigResolver::new(ServerConfig::new(BASE), transport, samplers()))
}

pub fn models_json(names: &[&str]) -> String {
    let models: Vec<Value> = names
        .iter()
        .map(|n| {
            json!({
                "title": format!("{} [abc123]", n),
                "model_name": n,
                "hash": "abc123",
                "sha256": null,
                "filename": format!("/models/{}.safetensors", n),
                "config": null,
            })
        })
        .collect();
    Value::Array(models).to_string()
}

pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(rgba));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn png_base64(width: u32, height: u32, rgba: [u8; 4]) -> String {
    base64::engine::general_purpose::STANDARD.encode(png_bytes(width, height, rgba))
}

/// txt2img body; `info` is the JSON-encoded string the server sends back.
pub fn txt2img_json(images: Value, info: Option<Value>) -> String {
    json!({
        "images": images,
        "parameters": {},
        "info": info.map(|i| i.to_string()),
    })
    .to_string()
}

pub fn progress_json(progress: f32, step: i64, steps: i64) -> String {
    json!({
        "progress": progress,
        "eta_relative": 1.5,
        "state": {
            "skipped": false,
            "interrupted": false,
            "job": "job-1",
            "job_count": 1,
            "job_timestamp": "20240101000000",
            "job_no": 0,
            "sampling_step": step,
            "sampling_steps": steps,
        },
        "current_image": null,
        "textinfo": null,
    })
    .to_string()
}

/// Sink that records every published material.
#[derive(Default)]
pub struct RecordingSink {
    pub materials: Mutex<Vec<GeneratedMaterial>>,
}

impl RecordingSink {
    pub fn all(&self) -> Vec<GeneratedMaterial> {
        self.materials.lock().unwrap().clone()
    }
}

impl MaterialSink for RecordingSink {
    fn apply(&self, material: &GeneratedMaterial) {
        self.materials.lock().unwrap().push(material.clone());
    }
}

/// Poll `cond` every few milliseconds until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Behavior knobs and request log of the mock inference server.
#[derive(Default)]
pub struct MockSd {
    pub legacy_models_only: bool,
    pub authorization: Option<String>,
    pub txt2img_delay: Duration,
    pub models: Vec<String>,
    pub options: Mutex<Vec<Value>>,
    pub payloads: Mutex<Vec<Value>>,
    pub progress_hits: AtomicUsize,
}

impl MockSd {
    pub fn progress_hits(&self) -> usize {
        self.progress_hits.load(Ordering::SeqCst)
    }
}

fn authorized(sd: &MockSd, headers: &HeaderMap) -> Result<(), StatusCode> {
    match &sd.authorization {
        None => Ok(()),
        Some(expected) => {
            let given = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
            if given == Some(expected.as_str()) {
                Ok(())
            } else {
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}

fn catalog(sd: &MockSd) -> Json<Value> {
    let names: Vec<&str> = sd.models.iter().map(String::as_str).collect();
    Json(serde_json::from_str(&models_json(&names)).unwrap_or(Value::Null))
}

async fn mock_models(State(sd): State<Arc<MockSd>>, headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    authorized(&sd, &headers)?;
    if sd.legacy_models_only {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(catalog(&sd))
}

async fn mock_legacy_models(
    State(sd): State<Arc<MockSd>>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    authorized(&sd, &headers)?;
    Ok(catalog(&sd))
}

async fn mock_options(
    State(sd): State<Arc<MockSd>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&sd, &headers)?;
    sd.options.lock().unwrap().push(body);
    Ok(Json(Value::Null))
}

async fn mock_txt2img(
    State(sd): State<Arc<MockSd>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&sd, &headers)?;
    if !sd.txt2img_delay.is_zero() {
        tokio::time::sleep(sd.txt2img_delay).await;
    }
    sd.payloads.lock().unwrap().push(body.clone());
    let width = body["width"].as_u64().unwrap_or(512) as u32;
    let height = body["height"].as_u64().unwrap_or(512) as u32;
    let seed = match body["seed"].as_i64() {
        Some(-1) | None => 777,
        Some(seed) => seed,
    };
    let info = json!({"seed": seed, "all_seeds": [seed], "width": width, "height": height});
    Ok(Json(json!({
        "images": [png_base64(width, height, [200, 30, 30, 255])],
        "parameters": body,
        "info": info.to_string(),
    })))
}

async fn mock_progress(State(sd): State<Arc<MockSd>>) -> Json<Value> {
    sd.progress_hits.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::from_str(&progress_json(0.5, 10, 20)).unwrap_or(Value::Null))
}

/// Serve the mock on an ephemeral local port and return its base URL.
pub fn spawn_mock_sd(sd: Arc<MockSd>) -> String {
    let app = Router::new()
        .route("/sdapi/v1/sd-models", get(mock_models))
        .route("/api/sd-models", get(mock_legacy_models))
        .route("/sdapi/v1/options", post(mock_options))
        .route("/sdapi/v1/txt2img", post(mock_txt2img))
        .route("/sdapi/v1/progress", get(mock_progress))
        .with_state(sd);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service());
    tokio::spawn(async move {
        let _ = server.await;
    });
    format!("http://{}", addr)
}

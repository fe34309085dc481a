//! Generation orchestrator.
//!
//! Drives one job at a time per owning entity:
//! `ModelSelecting -> Submitting -> Polling -> Decoding -> Completed | Failed`.
//! The txt2img call runs on its own task while a second task samples the
//! progress endpoint; the poller is aborted as soon as the call settles.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use base64::Engine;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::GenerationDefaults;
use crate::error::{AppError, AppResult};
use crate::generation::job::{JobGuard, JobSlot, JobSnapshot, JobState, ProgressReporter};
use crate::normal_map;
use crate::sd::catalog::ConfigResolver;
use crate::sd::models::{GenerationInfo, Txt2ImgResponse};
use crate::sd::progress::ProgressPoller;
use crate::sd::request::{GenerationRequest, RequestBuilder};
use crate::sd::transport::HttpRequest;

pub const MATERIALS_DIR: &str = "SDMaterials";

/// Surface properties handed to the material sink with every image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSettings {
    pub tiling_x: u32,
    pub tiling_y: u32,
    pub metallic: f32,
    pub smoothness: f32,
    pub generate_normal_map: bool,
    pub normal_map_strength: f32,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        MaterialSettings {
            tiling_x: 1,
            tiling_y: 1,
            metallic: 0.1,
            smoothness: 0.5,
            generate_normal_map: true,
            normal_map_strength: 0.5,
        }
    }
}

impl MaterialSettings {
    pub fn clamped(mut self) -> Self {
        self.tiling_x = self.tiling_x.clamp(1, 100);
        self.tiling_y = self.tiling_y.clamp(1, 100);
        self.metallic = clamp_unit(self.metallic, 0.0, 1.0);
        self.smoothness = clamp_unit(self.smoothness, 0.0, 1.0);
        self.normal_map_strength = clamp_unit(self.normal_map_strength, 0.0, 10.0);
        self
    }
}

fn clamp_unit(v: f32, lo: f32, hi: f32) -> f32 {
    if v.is_finite() { v.clamp(lo, hi) } else { lo }
}

/// The color + normal pair the host binds to its material.
#[derive(Debug, Clone)]
pub struct GeneratedMaterial {
    pub material_id: Uuid,
    pub color: Arc<RgbaImage>,
    pub normal: Option<Arc<RgbaImage>>,
    pub color_path: PathBuf,
    pub settings: MaterialSettings,
}

/// Host-side consumer of finished materials.
pub trait MaterialSink: Send + Sync {
    fn apply(&self, material: &GeneratedMaterial);
}

/// Sink for callers that only want the file on disk.
pub struct NoopSink;

impl MaterialSink for NoopSink {
    fn apply(&self, _material: &GeneratedMaterial) {}
}

#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub job_id: Uuid,
    pub color_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub generated_seed: Option<i64>,
    pub has_normal_map: bool,
}

#[derive(Debug, Clone)]
pub enum GenerateOutcome {
    /// A job was already in flight or the prompt was empty; nothing happened.
    Skipped,
    Completed(CompletedJob),
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub output_root: PathBuf,
    pub poll_interval: Duration,
    pub defaults: GenerationDefaults,
    pub material: MaterialSettings,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        OrchestratorOptions {
            output_root: PathBuf::from("./streamingAssets"),
            poll_interval: Duration::from_millis(500),
            defaults: GenerationDefaults::default(),
            material: MaterialSettings::default(),
        }
    }
}

pub struct Orchestrator {
    resolver: Arc<ConfigResolver>,
    poller: ProgressPoller,
    sink: Arc<dyn MaterialSink>,
    output_root: PathBuf,
    poll_interval: Duration,
    defaults: GenerationDefaults,
    material_id: Uuid,
    slot: Arc<JobSlot>,
    settings: RwLock<MaterialSettings>,
    last_color: Mutex<Option<(Arc<RgbaImage>, PathBuf)>>,
}

impl Orchestrator {
    pub fn new(resolver: Arc<ConfigResolver>, sink: Arc<dyn MaterialSink>, options: OrchestratorOptions) -> Self {
        let poller = ProgressPoller::new(resolver.server(), resolver.transport());
        Orchestrator {
            resolver,
            poller,
            sink,
            output_root: options.output_root,
            poll_interval: options.poll_interval,
            defaults: options.defaults,
            material_id: Uuid::new_v4(),
            slot: Arc::new(JobSlot::default()),
            settings: RwLock::new(options.material.clamped()),
            last_color: Mutex::new(None),
        }
    }

    /// Reuse a stable id so regenerations overwrite the same file.
    pub fn with_material_id(mut self, id: Uuid) -> Self {
        self.material_id = id;
        self
    }

    pub fn material_id(&self) -> Uuid {
        self.material_id
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// `<output_root>/SDMaterials/<material_id>.png`
    pub fn color_path(&self) -> PathBuf {
        self.output_root.join(MATERIALS_DIR).join(format!("{}.png", self.material_id))
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.slot.snapshot()
    }

    pub fn state(&self) -> JobState {
        self.slot.state()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn material_settings(&self) -> MaterialSettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run a job to completion. Returns `Skipped` immediately, without
    /// touching the active job, when the prompt is empty or a job is in flight.
    pub async fn generate(&self, request: GenerationRequest) -> AppResult<GenerateOutcome> {
        let Some(guard) = self.begin(&request) else {
            return Ok(GenerateOutcome::Skipped);
        };
        self.run(guard, request).await.map(GenerateOutcome::Completed)
    }

    /// Start a job in the background. Returns false when nothing was started.
    pub fn spawn_generate(self: &Arc<Self>, request: GenerationRequest) -> bool {
        let Some(guard) = self.begin(&request) else {
            return false;
        };
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.run(guard, request).await;
        });
        true
    }

    fn begin(&self, request: &GenerationRequest) -> Option<JobGuard> {
        if !request.is_triggerable() {
            tracing::debug!("empty prompt, generation not started");
            return None;
        }
        let guard = self.slot.try_begin();
        if guard.is_none() {
            tracing::info!("a job is already in flight, generate ignored");
        }
        guard
    }

    async fn run(&self, guard: JobGuard, request: GenerationRequest) -> AppResult<CompletedJob> {
        let job_id = guard.job_id();
        tracing::info!(%job_id, prompt = %request.prompt, "generation started");
        match self.execute(&guard, &request).await {
            Ok(done) => {
                tracing::info!(%job_id, path = %done.color_path.display(), seed = ?done.generated_seed, "generation completed");
                guard.complete(done.color_path.clone(), done.generated_seed);
                Ok(done)
            }
            Err(err) => {
                tracing::error!(%job_id, error = %err, "generation failed");
                guard.fail(&err.to_string());
                Err(err)
            }
        }
    }

    async fn execute(&self, guard: &JobGuard, request: &GenerationRequest) -> AppResult<CompletedJob> {
        // ModelSelecting. The payload is built first so an invalid request
        // never switches the server's model.
        let payload = RequestBuilder::new(&self.defaults, self.resolver.samplers()).build(request)?;
        let model = match &request.model {
            Some(name) => name.clone(),
            None => self.resolver.default_model().await?,
        };
        self.resolver.set_model(&model).await?;

        // Submitting
        guard.transition(JobState::Submitting, "submitting");
        let body = serde_json::to_value(&payload).map_err(|e| AppError::Internal(e.to_string()))?;
        let server = self.resolver.server();
        let primary = HttpRequest::post_json(server.url(&server.txt2img_path), body);
        let transport = self.resolver.transport();
        let call: JoinHandle<_> = tokio::spawn(async move { transport.send(primary).await });

        // Polling
        guard.transition(JobState::Polling, "generating");
        let polling = PollTask::start(self.poller.clone(), guard.reporter(), self.poll_interval);
        let settled = call.await;
        polling.stop();

        let response = settled
            .map_err(|e| AppError::Internal(format!("generation task failed: {}", e)))?
            .map_err(AppError::from)?;
        let parsed: Txt2ImgResponse = response.json()?;
        let encoded = parsed.first_image().ok_or(AppError::EmptyResult)?;

        // Decoding
        guard.transition(JobState::Decoding, "decoding");
        let bytes = decode_image_base64(encoded)?;
        let color = image::load_from_memory(&bytes)
            .map_err(|e| AppError::Corrupt(e.to_string()))?
            .to_rgba8();

        let color_path = self.color_path();
        write_overwriting(&color_path, &bytes).await?;

        let generated_seed = match parsed.info.as_deref().map(parse_seed) {
            Some(Ok(seed)) => Some(seed),
            Some(Err(reason)) => {
                guard.warn(format!("seed unknown: {}", reason));
                None
            }
            None => {
                guard.warn("seed unknown: response carried no info".to_string());
                None
            }
        };

        // Completed: hand off to the synthesizer and the sink.
        let (width, height) = color.dimensions();
        let color = Arc::new(color);
        *self.last_color.lock().unwrap_or_else(|e| e.into_inner()) = Some((color.clone(), color_path.clone()));
        let has_normal_map = self.publish(color, color_path.clone()).await?;

        Ok(CompletedJob {
            job_id: guard.job_id(),
            color_path,
            width,
            height,
            generated_seed,
            has_normal_map,
        })
    }

    /// Store new material settings and re-publish the last image with a
    /// freshly synthesized normal map. Returns false when nothing has been
    /// generated yet.
    pub async fn update_material(&self, settings: MaterialSettings) -> AppResult<bool> {
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings.clamped();
        let last = self.last_color.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match last {
            Some((color, path)) => {
                self.publish(color, path).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn publish(&self, color: Arc<RgbaImage>, color_path: PathBuf) -> AppResult<bool> {
        let settings = self.material_settings();
        let normal = if settings.generate_normal_map {
            let source = color.clone();
            let strength = settings.normal_map_strength;
            let map = tokio::task::spawn_blocking(move || normal_map::synthesize(&source, strength))
                .await
                .map_err(|e| AppError::Internal(format!("normal map task failed: {}", e)))?;
            Some(Arc::new(map))
        } else {
            None
        };
        let has_normal = normal.is_some();
        self.sink.apply(&GeneratedMaterial {
            material_id: self.material_id,
            color,
            normal,
            color_path,
            settings,
        });
        Ok(has_normal)
    }
}

/// Periodic progress sampling for one job. Aborted on `stop` or drop so the
/// loop never outlives the request it watches.
struct PollTask {
    handle: JoinHandle<()>,
}

impl PollTask {
    fn start(poller: ProgressPoller, reporter: ProgressReporter, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match poller.sample().await {
                    Ok(sample) => {
                        if reporter.report(&sample) {
                            tracing::debug!(percent = sample.percent, status = %sample.status, "progress");
                        }
                    }
                    Err(err) => tracing::debug!(error = %err, "progress sample failed"),
                }
            }
        });
        PollTask { handle }
    }

    fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Decode a base64 image, tolerating a `data:<mime>;base64,` prefix.
pub fn decode_image_base64(encoded: &str) -> AppResult<Vec<u8>> {
    let data = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| AppError::Corrupt(format!("base64: {}", e)))
}

/// Read the authoritative seed out of the JSON-encoded `info` string.
pub fn parse_seed(info: &str) -> Result<i64, String> {
    if info.trim().is_empty() {
        return Err("empty info".to_string());
    }
    serde_json::from_str::<GenerationInfo>(info)
        .map(|i| i.seed)
        .map_err(|e| e.to_string())
}

async fn write_overwriting(path: &Path, bytes: &[u8]) -> AppResult<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

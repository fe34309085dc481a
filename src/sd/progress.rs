//! Progress sampling against the server's progress endpoint.
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::sd::models::ProgressResponse;
use crate::sd::transport::{HttpRequest, SharedTransport};

/// One normalized progress reading. Ephemeral: each sample replaces the last.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSample {
    /// 0..=100
    pub percent: f32,
    pub eta_relative: f32,
    pub job: Option<String>,
    pub sampling_step: i64,
    pub sampling_steps: i64,
    pub status: String,
    pub current_image: Option<String>,
}

impl From<ProgressResponse> for ProgressSample {
    fn from(raw: ProgressResponse) -> Self {
        let status = match raw.textinfo.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ if raw.state.sampling_steps > 0 => {
                format!("step {}/{}", raw.state.sampling_step, raw.state.sampling_steps)
            }
            _ => "waiting".to_string(),
        };
        ProgressSample {
            percent: normalize_percent(raw.progress),
            eta_relative: raw.eta_relative,
            job: raw.state.job,
            sampling_step: raw.state.sampling_step,
            sampling_steps: raw.state.sampling_steps,
            status,
            current_image: raw.current_image.filter(|s| !s.is_empty()),
        }
    }
}

/// Servers report either a 0..=1 fraction or a 0..=100 percentage.
pub fn normalize_percent(raw: f32) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    percent.clamp(0.0, 100.0)
}

#[derive(Clone)]
pub struct ProgressPoller {
    transport: SharedTransport,
    url: String,
}

impl ProgressPoller {
    pub fn new(server: &ServerConfig, transport: SharedTransport) -> Self {
        ProgressPoller { transport, url: server.url(&server.progress_path) }
    }

    /// A single request to the progress endpoint.
    pub async fn sample(&self) -> AppResult<ProgressSample> {
        let response = self.transport.send(HttpRequest::get(&self.url)).await.map_err(AppError::from)?;
        let raw: ProgressResponse = response.json()?;
        Ok(raw.into())
    }
}

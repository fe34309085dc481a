//! Wire types exchanged with the inference server.
use serde::{Deserialize, Serialize};

/// One entry of the model catalog. `model_name` is the identity key; the
/// server does not guarantee uniqueness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDescriptor {
    pub title: String,
    pub model_name: String,
    pub hash: Option<String>,
    pub sha256: Option<String>,
    pub filename: String,
    pub config: Option<String>,
}

/// Body of the options call that switches the active checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdOption {
    pub sd_model_checkpoint: String,
}

/// txt2img payload. Fields the caller never sets carry the server's
/// no-op values (hires fix off, eta/churn knobs neutral).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdParamsIn {
    pub enable_hr: bool,
    pub denoising_strength: f32,
    pub firstphase_width: u32,
    pub firstphase_height: u32,
    pub hr_scale: f32,
    pub hr_upscaler: String,
    pub hr_second_pass_steps: u32,
    pub hr_resize_x: u32,
    pub hr_resize_y: u32,
    pub prompt: String,
    pub styles: Vec<String>,
    pub seed: i64,
    pub subseed: i64,
    pub subseed_strength: f32,
    pub seed_resize_from_h: i32,
    pub seed_resize_from_w: i32,
    pub sampler_name: String,
    pub batch_size: u32,
    pub n_iter: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
    pub restore_faces: bool,
    pub tiling: bool,
    pub negative_prompt: String,
    pub eta: f32,
    pub s_churn: f32,
    pub s_tmax: f32,
    pub s_tmin: f32,
    pub s_noise: f32,
    pub override_settings_restore_afterwards: bool,
    pub sampler_index: String,
}

impl Default for SdParamsIn {
    fn default() -> Self {
        SdParamsIn {
            enable_hr: false,
            denoising_strength: 0.0,
            firstphase_width: 0,
            firstphase_height: 0,
            hr_scale: 2.0,
            hr_upscaler: String::new(),
            hr_second_pass_steps: 0,
            hr_resize_x: 0,
            hr_resize_y: 0,
            prompt: String::new(),
            styles: Vec::new(),
            seed: -1,
            subseed: -1,
            subseed_strength: 0.0,
            seed_resize_from_h: -1,
            seed_resize_from_w: -1,
            sampler_name: "Euler a".to_string(),
            batch_size: 1,
            n_iter: 1,
            steps: 50,
            cfg_scale: 7.0,
            width: 512,
            height: 512,
            restore_faces: false,
            tiling: false,
            negative_prompt: String::new(),
            eta: 0.0,
            s_churn: 0.0,
            s_tmax: 0.0,
            s_tmin: 0.0,
            s_noise: 1.0,
            override_settings_restore_afterwards: true,
            sampler_index: "Euler a".to_string(),
        }
    }
}

/// txt2img response envelope. Only `images[0]` is consumed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Txt2ImgResponse {
    pub images: Option<Vec<String>>,
    pub parameters: serde_json::Value,
    pub info: Option<String>,
}

impl Txt2ImgResponse {
    pub fn first_image(&self) -> Option<&str> {
        self.images.as_ref()?.first().map(String::as_str)
    }
}

/// The subset of the JSON-encoded `info` string we read back.
/// `seed` is the seed the server actually used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationInfo {
    pub seed: i64,
    #[serde(default)]
    pub all_seeds: Vec<i64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub sampler_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressState {
    pub skipped: bool,
    pub interrupted: bool,
    pub job: Option<String>,
    pub job_count: i64,
    pub job_timestamp: Option<String>,
    pub job_no: i64,
    pub sampling_step: i64,
    pub sampling_steps: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressResponse {
    pub progress: f32,
    pub eta_relative: f32,
    pub state: ProgressState,
    pub current_image: Option<String>,
    pub textinfo: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_descriptor_tolerates_missing_fields() {
        let models: Vec<ModelDescriptor> = serde_json::from_str(
            r#"[
                {"title": "v1-5.safetensors [6ce0161689]", "model_name": "v1-5", "hash": "6ce0161689",
                 "sha256": null, "filename": "/models/v1-5.safetensors", "config": null},
                {"model_name": "dreamshaper"}
            ]"#,
        )
        .unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].hash.as_deref(), Some("6ce0161689"));
        assert_eq!(models[1].model_name, "dreamshaper");
        assert!(models[1].title.is_empty());
    }

    #[test]
    fn default_payload_uses_neutral_knobs() {
        let json = serde_json::to_value(SdParamsIn::default()).unwrap();
        assert_eq!(json["enable_hr"], false);
        assert_eq!(json["s_noise"], 1.0);
        assert_eq!(json["eta"], 0.0);
        assert_eq!(json["n_iter"], 1);
        assert_eq!(json["override_settings_restore_afterwards"], true);
    }

    #[test]
    fn progress_parses_server_envelope() {
        let p: ProgressResponse = serde_json::from_str(
            r#"{"progress": 0.42, "eta_relative": 3.1,
                "state": {"skipped": false, "interrupted": false, "job": "txt2img", "job_count": 1,
                          "job_timestamp": "20240101000000", "job_no": 0, "sampling_step": 8, "sampling_steps": 20},
                "current_image": null, "textinfo": null}"#,
        )
        .unwrap();
        assert_eq!(p.state.sampling_step, 8);
        assert!(p.current_image.is_none());
    }

    #[test]
    fn txt2img_response_without_images_is_empty() {
        let r: Txt2ImgResponse = serde_json::from_str(r#"{"info": ""}"#).unwrap();
        assert!(r.first_image().is_none());
        let r: Txt2ImgResponse = serde_json::from_str(r#"{"images": null, "info": null}"#).unwrap();
        assert!(r.first_image().is_none());
        let r: Txt2ImgResponse = serde_json::from_str(r#"{"images": ["aGk=", "b3RoZXI="]}"#).unwrap();
        assert_eq!(r.first_image(), Some("aGk="));
    }

    #[test]
    fn info_reads_actual_seed() {
        let info: GenerationInfo =
            serde_json::from_str(r#"{"prompt": "a red cube", "seed": 12345, "all_seeds": [12345]}"#).unwrap();
        assert_eq!(info.seed, 12345);
    }
}

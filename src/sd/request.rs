//! Generation requests and their conversion into the txt2img payload.
use serde::{Deserialize, Serialize};

use crate::config::GenerationDefaults;
use crate::error::{AppError, AppResult};
use crate::sd::models::SdParamsIn;

pub const MIN_DIMENSION: u32 = 128;
pub const MAX_DIMENSION: u32 = 2048;

/// What the caller asks for. Unset fields fall back to `GenerationDefaults`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    /// Checkpoint to select before generating; the first catalog entry when unset.
    pub model: Option<String>,
    /// Explicit sampler; must be one of the resolved sampler names.
    pub sampler_name: Option<String>,
    /// Position in the resolved sampler list; negative or out of range uses the default.
    pub sampler_index: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub steps: Option<u32>,
    pub cfg_scale: Option<f32>,
    /// -1 lets the server choose.
    pub seed: Option<i64>,
    pub tiling: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        GenerationRequest { prompt: prompt.into(), ..Default::default() }
    }

    pub fn negative(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = negative.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn sampler(mut self, name: impl Into<String>) -> Self {
        self.sampler_name = Some(name.into());
        self
    }

    pub fn sampler_index(mut self, index: i64) -> Self {
        self.sampler_index = Some(index);
        self
    }

    pub fn size(mut self, width: i64, height: i64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn cfg_scale(mut self, cfg: f32) -> Self {
        self.cfg_scale = Some(cfg);
        self
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn tiling(mut self, tiling: bool) -> Self {
        self.tiling = tiling;
        self
    }

    /// A request only triggers generation with a non-empty prompt.
    pub fn is_triggerable(&self) -> bool {
        !self.prompt.is_empty()
    }
}

/// Clamp a requested dimension into `[MIN_DIMENSION, MAX_DIMENSION]`.
pub fn clamp_dimension(value: i64) -> u32 {
    value.clamp(MIN_DIMENSION as i64, MAX_DIMENSION as i64) as u32
}

pub struct RequestBuilder<'a> {
    defaults: &'a GenerationDefaults,
    samplers: &'a [String],
}

impl<'a> RequestBuilder<'a> {
    pub fn new(defaults: &'a GenerationDefaults, samplers: &'a [String]) -> Self {
        RequestBuilder { defaults, samplers }
    }

    pub fn build(&self, request: &GenerationRequest) -> AppResult<SdParamsIn> {
        if !request.is_triggerable() {
            return Err(AppError::Validation("prompt must not be empty".to_string()));
        }

        let width = clamp_dimension(request.width.unwrap_or(self.defaults.width as i64));
        let height = clamp_dimension(request.height.unwrap_or(self.defaults.height as i64));
        let sampler = self.resolve_sampler(request)?;
        let steps = match request.steps {
            Some(s) if s > 0 => s,
            _ => self.defaults.steps,
        };
        let cfg_scale = match request.cfg_scale {
            Some(c) if c > 0.0 && c.is_finite() => c,
            _ => self.defaults.cfg_scale,
        };

        Ok(SdParamsIn {
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            seed: request.seed.unwrap_or(self.defaults.seed),
            sampler_name: sampler.clone(),
            sampler_index: sampler,
            steps,
            cfg_scale,
            width,
            height,
            tiling: request.tiling,
            ..SdParamsIn::default()
        })
    }

    fn resolve_sampler(&self, request: &GenerationRequest) -> AppResult<String> {
        if let Some(name) = &request.sampler_name {
            return if self.samplers.iter().any(|s| s == name) {
                Ok(name.clone())
            } else {
                Err(AppError::Validation(format!("unknown sampler '{}'", name)))
            };
        }
        let indexed = request
            .sampler_index
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| self.samplers.get(i));
        match (indexed, request.sampler_index) {
            (Some(name), _) => Ok(name.clone()),
            (None, Some(i)) => {
                tracing::debug!(index = i, "sampler index out of range, using default sampler");
                Ok(self.defaults.sampler.clone())
            }
            (None, None) => Ok(self.defaults.sampler.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SAMPLERS;

    fn samplers() -> Vec<String> {
        DEFAULT_SAMPLERS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dimensions_are_clamped() {
        for (input, expected) in [(-1, 128), (0, 128), (127, 128), (128, 128), (640, 640), (2048, 2048), (4096, 2048)] {
            assert_eq!(clamp_dimension(input), expected, "input {}", input);
        }
    }

    #[test]
    fn clamped_dimensions_reach_the_payload() {
        let defaults = GenerationDefaults::default();
        let list = samplers();
        let payload = RequestBuilder::new(&defaults, &list)
            .build(&GenerationRequest::new("tiles").size(50, 9000))
            .unwrap();
        assert_eq!((payload.width, payload.height), (128, 2048));
    }

    #[test]
    fn unset_fields_use_defaults() {
        let defaults = GenerationDefaults::default();
        let list = samplers();
        let payload = RequestBuilder::new(&defaults, &list)
            .build(&GenerationRequest::new("stone wall"))
            .unwrap();
        assert_eq!(payload.width, 512);
        assert_eq!(payload.steps, 35);
        assert_eq!(payload.cfg_scale, 7.0);
        assert_eq!(payload.seed, -1);
        assert_eq!(payload.sampler_name, "Euler a");
        assert!(!payload.enable_hr);
    }

    #[test]
    fn sampler_index_resolves_or_falls_back() {
        let defaults = GenerationDefaults::default();
        let list = samplers();
        let builder = RequestBuilder::new(&defaults, &list);

        let payload = builder.build(&GenerationRequest::new("x").sampler_index(17)).unwrap();
        assert_eq!(payload.sampler_name, "DDIM");

        let payload = builder.build(&GenerationRequest::new("x").sampler_index(99)).unwrap();
        assert_eq!(payload.sampler_name, "Euler a");

        let payload = builder.build(&GenerationRequest::new("x").sampler_index(-1)).unwrap();
        assert_eq!(payload.sampler_name, "Euler a");
    }

    #[test]
    fn negative_sampler_index_deserializes() {
        let request: GenerationRequest = serde_json::from_str(r#"{"prompt":"x","sampler_index":-1}"#).unwrap();
        assert_eq!(request.sampler_index, Some(-1));
    }

    #[test]
    fn only_an_empty_prompt_is_blank() {
        assert!(!GenerationRequest::new("").is_triggerable());
        assert!(GenerationRequest::new("  ").is_triggerable());

        let defaults = GenerationDefaults::default();
        let list = samplers();
        let builder = RequestBuilder::new(&defaults, &list);
        assert!(matches!(builder.build(&GenerationRequest::new("")), Err(AppError::Validation(_))));
        assert_eq!(builder.build(&GenerationRequest::new(" ")).unwrap().prompt, " ");
    }

    #[test]
    fn unknown_sampler_name_fails_validation() {
        let defaults = GenerationDefaults::default();
        let list = samplers();
        let builder = RequestBuilder::new(&defaults, &list);

        let err = builder.build(&GenerationRequest::new("x").sampler("Warp Drive")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let ok = builder.build(&GenerationRequest::new("x").sampler("DPM++ 2M Karras")).unwrap();
        assert_eq!(ok.sampler_name, "DPM++ 2M Karras");
    }

    #[test]
    fn explicit_values_pass_through() {
        let defaults = GenerationDefaults::default();
        let list = samplers();
        let payload = RequestBuilder::new(&defaults, &list)
            .build(
                &GenerationRequest::new("a red cube")
                    .negative("blurry")
                    .seed(42)
                    .steps(20)
                    .cfg_scale(9.5)
                    .tiling(true),
            )
            .unwrap();
        assert_eq!(payload.prompt, "a red cube");
        assert_eq!(payload.negative_prompt, "blurry");
        assert_eq!(payload.seed, 42);
        assert_eq!(payload.steps, 20);
        assert_eq!(payload.cfg_scale, 9.5);
        assert!(payload.tiling);
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let defaults = GenerationDefaults::default();
        let list = samplers();
        let err = RequestBuilder::new(&defaults, &list).build(&GenerationRequest::new("")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}

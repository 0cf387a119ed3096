//! Wire types for the inference server's REST API.
//!
//! Only the fields the client consumes are modelled; everything else the
//! server sends is ignored by serde.

use base64::Engine as _;
use serde::Deserialize;

/// Response body of `POST /sdapi/v1/txt2img`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    /// Base64-encoded PNGs, possibly with a `data:` URL prefix.
    #[serde(default)]
    pub images: Vec<String>,
    /// Generation info as a JSON-encoded string (seed, sampler, ...).
    #[serde(default)]
    pub info: String,
}

/// Response body of `GET /sdapi/v1/progress`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressResponse {
    /// Overall completion fraction, `0.0..=1.0`.
    pub progress: f64,
    /// Estimated seconds remaining. May be negative near step boundaries.
    pub eta_relative: f64,
    #[serde(default)]
    pub state: ProgressState,
    /// Free-form status text (e.g. "Sampling").
    #[serde(default)]
    pub textinfo: Option<String>,
}

/// Server-side execution state attached to a progress response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressState {
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub job_count: i32,
    #[serde(default)]
    pub sampling_step: i32,
    #[serde(default)]
    pub sampling_steps: i32,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub skipped: bool,
}

/// Entry of `GET /sdapi/v1/sd-models`.
#[derive(Debug, Clone, Deserialize)]
pub struct SdModel {
    /// Display title, e.g. `"v1-5-pruned.safetensors [6ce0161689]"`.
    pub title: String,
    pub model_name: String,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Entry of `GET /sdapi/v1/samplers`.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerInfo {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Entry of `GET /sdapi/v1/schedulers`.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerInfo {
    pub name: String,
    #[serde(default)]
    pub label: String,
}

/// Entry of `GET /sdapi/v1/upscalers`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpscalerInfo {
    pub name: String,
}

/// Decode one base64 image, tolerating a `data:image/...;base64,` prefix.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let data = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    base64::engine::general_purpose::STANDARD.decode(data.trim())
}

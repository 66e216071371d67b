use serde_json::{json, Map, Value};

use crate::encoding::encode_png_data_uri;
use crate::error::BackendError;

/// Generic generation parameters as handed over by the host, keyed by field
/// name. The mapper adds the provider-specific keys in place.
pub type GenerationParams = Map<String, Value>;

/// Adds `denoising_strength` and `sampler_index`. Ranges are not checked:
/// a similarity outside `[0, 1]` yields a strength outside it too.
pub fn map_params(params: &mut GenerationParams) -> Result<(), BackendError> {
    let similarity = params
        .get("image_similarity")
        .and_then(Value::as_f64)
        .ok_or(BackendError::MissingParameter("image_similarity"))?;
    let sampler = params
        .get("sampler")
        .filter(|value| !value.is_null())
        .cloned()
        .ok_or(BackendError::MissingParameter("sampler"))?;

    params.insert(
        "denoising_strength".to_string(),
        json!(denoising_strength(similarity)),
    );
    params.insert("sampler_index".to_string(), sampler);
    Ok(())
}

pub fn denoising_strength(image_similarity: f64) -> f64 {
    round_to(1.0 - image_similarity, 2)
}

pub fn attach_init_image(params: &mut GenerationParams, image_bytes: &[u8]) {
    params.insert(
        "init_images".to_string(),
        json!([encode_png_data_uri(image_bytes)]),
    );
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleOptions {
    pub factor: f64,
    pub upscaler_model: String,
}

/// Target size for the extras endpoint: the source scaled by `factor`, shrunk
/// proportionally when the result would exceed `max_area`.
pub fn sanitized_upscaled_size(width: u32, height: u32, factor: f64, max_area: u64) -> (u32, u32) {
    let factor = if factor.is_finite() && factor > 0.0 {
        factor
    } else {
        1.0
    };
    let mut target_w = f64::from(width) * factor;
    let mut target_h = f64::from(height) * factor;
    let area = target_w * target_h;
    let max_area = max_area as f64;
    if area > max_area && area > 0.0 {
        let shrink = (max_area / area).sqrt();
        target_w *= shrink;
        target_h *= shrink;
    }
    (target_w.floor() as u32, target_h.floor() as u32)
}

pub fn upscale_payload(
    image_bytes: &[u8],
    options: &UpscaleOptions,
    target: (u32, u32),
) -> GenerationParams {
    let (target_w, target_h) = target;
    let payload = json!({
        "resize_mode": 0,
        "show_extras_results": true,
        "gfpgan_visibility": 0,
        "codeformer_visibility": 0,
        "codeformer_weight": 0,
        "upscaling_resize": options.factor,
        "upscaling_resize_w": target_w,
        "upscaling_resize_h": target_h,
        "upscaling_crop": true,
        "upscaler_1": options.upscaler_model,
        "upscaler_2": "None",
        "extras_upscaler_2_visibility": 0,
        "upscale_first": true,
        "image": encode_png_data_uri(image_bytes),
    });
    payload.as_object().cloned().unwrap_or_default()
}

/// Rounds the exact binary value to `decimals` places, ties to even.
fn round_to(value: f64, decimals: usize) -> f64 {
    format!("{value:.decimals$}").parse().unwrap_or(value)
}

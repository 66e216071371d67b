use serde::Serialize;

use crate::samplers::DEFAULT_SAMPLER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageFormat {
    #[serde(rename = "PNG")]
    Png,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "PNG",
        }
    }
}

/// Static feature flags a host queries before offering an option in its UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub negative_prompts: bool,
    pub upscaling: bool,
    pub tiling: bool,
    pub reloading_upscaler_models: bool,
    pub choosing_model: bool,
    pub inpainting: bool,
    pub outpainting: bool,
    /// Areas are in pixels (width * height).
    pub min_image_area: u64,
    pub max_image_area: u64,
    pub max_upscaled_area: u64,
    pub default_sampler: &'static str,
    pub default_upscaler: &'static str,
    pub image_format: ImageFormat,
}

pub const DEFAULT_UPSCALER: &str = "ESRGAN_4x";

pub const AUTOMATIC1111: Capabilities = Capabilities {
    negative_prompts: true,
    upscaling: true,
    tiling: true,
    reloading_upscaler_models: true,
    choosing_model: true,
    inpainting: false,
    outpainting: false,
    min_image_area: 128 * 128,
    max_image_area: 2048 * 2048,
    max_upscaled_area: 4096 * 4096,
    default_sampler: DEFAULT_SAMPLER,
    default_upscaler: DEFAULT_UPSCALER,
    image_format: ImageFormat::Png,
};

impl Capabilities {
    pub fn allows_image_area(&self, width: u32, height: u32) -> bool {
        let area = u64::from(width) * u64::from(height);
        area >= self.min_image_area && area <= self.max_image_area
    }
}

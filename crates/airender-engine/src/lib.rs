use std::fs;
use std::path::{Path, PathBuf};

use airender_contracts::capabilities::{Capabilities, AUTOMATIC1111, DEFAULT_UPSCALER};
use airender_contracts::catalog::{Catalog, CatalogKind, CatalogStore, UPSCALER_MODEL_KEY};
use airender_contracts::events::ErrorSink;
use airender_contracts::samplers::{samplers, Sampler};
use serde_json::Value;

pub mod catalog;
pub mod config;
pub mod controlnet;
pub mod encoding;
pub mod error;
pub mod params;
pub mod response;
pub mod tempfiles;
pub mod transport;

#[cfg(test)]
mod test_server;

pub use catalog::{choose_controlnet_defaults, pick_controlnet_defaults, ControlNetDefaults};
pub use config::ServerConfig;
pub use controlnet::{ConditioningImage, ControlMode, ControlNetUnit, FileConditioningImage};
pub use error::BackendError;
pub use params::{GenerationParams, UpscaleOptions};
pub use tempfiles::{TempDirAllocator, TempFileAllocator};

pub const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";
pub const IMG2IMG_PATH: &str = "/sdapi/v1/img2img";
pub const EXTRAS_PATH: &str = "/sdapi/v1/extra-single-image";

/// Automatic1111 Stable Diffusion backend.
///
/// Every public call is one blocking round-trip. Failures are handed to the
/// configured [`ErrorSink`] and returned to the caller as well.
pub struct Automatic1111Backend {
    config: ServerConfig,
    transport: transport::Transport,
    temp_files: Box<dyn TempFileAllocator>,
    sink: Box<dyn ErrorSink>,
}

impl Automatic1111Backend {
    pub fn new(config: ServerConfig, sink: impl ErrorSink + 'static) -> Self {
        Self {
            transport: transport::Transport::new(&config),
            config,
            temp_files: Box::new(TempDirAllocator::system()),
            sink: Box::new(sink),
        }
    }

    pub fn with_temp_files(mut self, temp_files: impl TempFileAllocator + 'static) -> Self {
        self.temp_files = Box::new(temp_files);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        AUTOMATIC1111
    }

    pub fn samplers(&self) -> &'static [Sampler] {
        samplers()
    }

    /// Text-to-image when `init_image` is `None`, image-to-image otherwise.
    pub fn generate(
        &self,
        params: GenerationParams,
        init_image: Option<&Path>,
        filename_prefix: &str,
        control_nets: &[ControlNetUnit],
    ) -> Result<PathBuf, BackendError> {
        let result = self.try_generate(params, init_image, filename_prefix, control_nets);
        self.reported(None, result)
    }

    fn try_generate(
        &self,
        mut params: GenerationParams,
        init_image: Option<&Path>,
        filename_prefix: &str,
        control_nets: &[ControlNetUnit],
    ) -> Result<PathBuf, BackendError> {
        params::map_params(&mut params)?;
        let url = self.config.endpoint(if init_image.is_some() {
            IMG2IMG_PATH
        } else {
            TXT2IMG_PATH
        })?;

        if let Some(path) = init_image {
            let bytes = fs::read(path).map_err(|err| BackendError::init_image_read(path, err))?;
            params::attach_init_image(&mut params, &bytes);
        }
        if !control_nets.is_empty() {
            let args = controlnet::build_controlnet_args(control_nets, self.temp_files.as_ref())?;
            controlnet::attach_controlnet_args(&mut params, args);
        }

        let reply = self.transport.post_json(&url, &Value::Object(params))?;
        response::reconcile(&reply, filename_prefix, self.temp_files.as_ref())
    }

    pub fn upscale(
        &self,
        image_path: &Path,
        filename_prefix: &str,
        options: &UpscaleOptions,
    ) -> Result<PathBuf, BackendError> {
        let result = self.try_upscale(image_path, filename_prefix, options);
        self.reported(None, result)
    }

    fn try_upscale(
        &self,
        image_path: &Path,
        filename_prefix: &str,
        options: &UpscaleOptions,
    ) -> Result<PathBuf, BackendError> {
        let url = self.config.endpoint(EXTRAS_PATH)?;
        let bytes =
            fs::read(image_path).map_err(|err| BackendError::init_image_read(image_path, err))?;
        let (width, height) = image::image_dimensions(image_path)
            .map_err(|err| BackendError::init_image_read(image_path, err))?;
        let target = params::sanitized_upscaled_size(
            width,
            height,
            options.factor,
            self.capabilities().max_upscaled_area,
        );
        let payload = params::upscale_payload(&bytes, options, target);

        let reply = self.transport.post_json(&url, &Value::Object(payload))?;
        response::reconcile(&reply, filename_prefix, self.temp_files.as_ref())
    }

    /// Fetches one catalog and replaces the stored copy. Nothing is stored
    /// when any step fails.
    pub fn load_catalog(
        &self,
        kind: CatalogKind,
        store: &mut dyn CatalogStore,
        context: Option<&str>,
    ) -> Result<Catalog, BackendError> {
        let result = self.try_load_catalog(kind, store);
        self.reported(context, result)
    }

    fn try_load_catalog(
        &self,
        kind: CatalogKind,
        store: &mut dyn CatalogStore,
    ) -> Result<Catalog, BackendError> {
        let unavailable = |detail: String| BackendError::CatalogUnavailable { kind, detail };
        let was_loaded = store.is_loaded(kind);

        let url = self
            .config
            .endpoint(catalog::catalog_path(kind))
            .map_err(|err| unavailable(err.to_string()))?;
        let reply = self
            .transport
            .get_json(&url)
            .map_err(|err| unavailable(err.to_string()))?;
        if !(200..300).contains(&reply.status) {
            return Err(unavailable(format!("server answered {}", reply.status)));
        }
        let payload = reply
            .json()
            .map_err(|err| unavailable(format!("invalid JSON: {err}")))?;
        log::debug!("{} returned from Automatic1111 API: {payload}", kind.label());

        let fetched = catalog::parse_catalog(kind, &payload)?;
        let stored = |err: anyhow::Error| BackendError::CatalogStore {
            kind,
            detail: format!("{err:#}"),
        };
        store.put_catalog(kind, &fetched).map_err(stored)?;
        if kind == CatalogKind::UpscalerModels && !was_loaded {
            store
                .set(UPSCALER_MODEL_KEY, DEFAULT_UPSCALER)
                .map_err(stored)?;
        }
        log::info!("loaded {} {}", fetched.len(), kind.label());
        Ok(fetched)
    }

    pub fn load_sd_models(
        &self,
        store: &mut dyn CatalogStore,
        context: Option<&str>,
    ) -> Result<Catalog, BackendError> {
        self.load_catalog(CatalogKind::SdModels, store, context)
    }

    pub fn load_upscaler_models(
        &self,
        store: &mut dyn CatalogStore,
        context: Option<&str>,
    ) -> Result<Catalog, BackendError> {
        self.load_catalog(CatalogKind::UpscalerModels, store, context)
    }

    pub fn load_controlnet_models(
        &self,
        store: &mut dyn CatalogStore,
        context: Option<&str>,
    ) -> Result<Catalog, BackendError> {
        self.load_catalog(CatalogKind::ControlNetModels, store, context)
    }

    pub fn load_controlnet_modules(
        &self,
        store: &mut dyn CatalogStore,
        context: Option<&str>,
    ) -> Result<Catalog, BackendError> {
        self.load_catalog(CatalogKind::ControlNetModules, store, context)
    }

    /// Loads both ControlNet catalogs, then picks default model/module.
    pub fn load_controlnet(
        &self,
        store: &mut dyn CatalogStore,
        context: Option<&str>,
    ) -> Result<Option<ControlNetDefaults>, BackendError> {
        self.load_controlnet_models(store, context)?;
        self.load_controlnet_modules(store, context)?;
        let result = choose_controlnet_defaults(store).map_err(|err| BackendError::CatalogStore {
            kind: CatalogKind::ControlNetModels,
            detail: format!("{err:#}"),
        });
        self.reported(context, result)
    }

    fn reported<T>(
        &self,
        context: Option<&str>,
        result: Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        if let Err(err) = &result {
            self.sink.report(context, &err.to_string(), err.code());
        }
        result
    }
}

use airender_contracts::catalog::{
    Catalog, CatalogKind, CatalogStore, CONTROLNET_MODEL_KEY, CONTROLNET_MODULE_KEY,
};
use serde_json::Value;

use crate::error::BackendError;

pub const CONTROLNET_PRIORITY: [&str; 5] = ["depth", "openpose", "normal", "canny", "scribble"];

const UPSCALER_NONE: &str = "None";

pub fn catalog_path(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::SdModels => "/sdapi/v1/sd-models",
        CatalogKind::UpscalerModels => "/sdapi/v1/upscalers",
        CatalogKind::ControlNetModels => "/controlnet/model_list",
        CatalogKind::ControlNetModules => "/controlnet/module_list",
    }
}

/// Pulls the identifiers out of a catalog endpoint's JSON.
pub fn parse_catalog(kind: CatalogKind, payload: &Value) -> Result<Catalog, BackendError> {
    let unavailable = |detail: &str| BackendError::CatalogUnavailable {
        kind,
        detail: detail.to_string(),
    };
    let catalog = match kind {
        CatalogKind::SdModels => {
            let rows = payload
                .as_array()
                .ok_or_else(|| unavailable("expected a JSON array of models"))?;
            rows.iter()
                .map(|row| string_field(row, "title"))
                .collect::<Option<Catalog>>()
                .ok_or_else(|| unavailable("model entry without a title"))?
        }
        CatalogKind::UpscalerModels => {
            let rows = payload
                .as_array()
                .ok_or_else(|| unavailable("expected a JSON array of upscalers"))?;
            if rows.is_empty() {
                return Err(BackendError::CatalogEmpty { kind });
            }
            let names = rows
                .iter()
                .map(|row| string_field(row, "name"))
                .collect::<Option<Vec<String>>>()
                .ok_or_else(|| unavailable("upscaler entry without a name"))?;
            names
                .into_iter()
                .filter(|name| name != UPSCALER_NONE)
                .collect::<Catalog>()
        }
        CatalogKind::ControlNetModels => string_list(payload, "model_list")
            .ok_or_else(|| unavailable("response has no model_list"))?,
        CatalogKind::ControlNetModules => string_list(payload, "module_list")
            .ok_or_else(|| unavailable("response has no module_list"))?,
    };

    let may_be_empty = matches!(
        kind,
        CatalogKind::ControlNetModules | CatalogKind::UpscalerModels
    );
    if catalog.is_empty() && !may_be_empty {
        return Err(BackendError::CatalogEmpty { kind });
    }
    Ok(catalog)
}

fn string_field(row: &Value, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(payload: &Value, key: &str) -> Option<Catalog> {
    payload
        .get(key)?
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlNetDefaults {
    pub model: String,
    pub module: String,
}

/// First priority tag with both a matching model and a matching module wins.
pub fn pick_controlnet_defaults(models: &Catalog, modules: &Catalog) -> Option<ControlNetDefaults> {
    CONTROLNET_PRIORITY.iter().find_map(|tag| {
        let model = models.find_containing(tag)?;
        let module = modules.find_containing(tag)?;
        Some(ControlNetDefaults {
            model: model.to_string(),
            module: module.to_string(),
        })
    })
}

/// Applies [`pick_controlnet_defaults`] to the stored catalogs and records
/// the pair as the current selection.
pub fn choose_controlnet_defaults(
    store: &mut dyn CatalogStore,
) -> anyhow::Result<Option<ControlNetDefaults>> {
    let models = store.catalog(CatalogKind::ControlNetModels);
    let modules = store.catalog(CatalogKind::ControlNetModules);
    let Some(defaults) = pick_controlnet_defaults(&models, &modules) else {
        return Ok(None);
    };
    store.set(CONTROLNET_MODEL_KEY, &defaults.model)?;
    store.set(CONTROLNET_MODULE_KEY, &defaults.module)?;
    Ok(Some(defaults))
}

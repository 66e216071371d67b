use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Separator used when a catalog is persisted as a single host property.
pub const CATALOG_DELIMITER: &str = "||||";

pub const UPSCALER_MODEL_KEY: &str = "upscaler_model";
pub const CONTROLNET_MODEL_KEY: &str = "controlnet_model";
pub const CONTROLNET_MODULE_KEY: &str = "controlnet_module";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    SdModels,
    UpscalerModels,
    ControlNetModels,
    ControlNetModules,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 4] = [
        CatalogKind::SdModels,
        CatalogKind::UpscalerModels,
        CatalogKind::ControlNetModels,
        CatalogKind::ControlNetModules,
    ];

    pub fn storage_key(self) -> &'static str {
        match self {
            CatalogKind::SdModels => "sd_available_models",
            CatalogKind::UpscalerModels => "automatic1111_available_upscaler_models",
            CatalogKind::ControlNetModels => "controlnet_available_models",
            CatalogKind::ControlNetModules => "controlnet_available_modules",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CatalogKind::SdModels => "Stable Diffusion models",
            CatalogKind::UpscalerModels => "upscaler models",
            CatalogKind::ControlNetModels => "ControlNet models",
            CatalogKind::ControlNetModules => "ControlNet modules",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogEncodeError {
    #[error("catalog identifier {0:?} contains the reserved delimiter")]
    ContainsDelimiter(String),
    #[error("catalog identifiers must not be empty")]
    EmptyIdentifier,
}

/// Ordered list of server-side identifiers (models, upscalers, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    items: Vec<String>,
}

impl Catalog {
    pub fn new(items: Vec<String>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn into_items(self) -> Vec<String> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    /// First identifier containing `needle`, in catalog order.
    pub fn find_containing(&self, needle: &str) -> Option<&str> {
        self.iter().find(|item| item.contains(needle))
    }

    pub fn encode(&self) -> Result<String, CatalogEncodeError> {
        for item in &self.items {
            if item.is_empty() {
                return Err(CatalogEncodeError::EmptyIdentifier);
            }
            if item.contains(CATALOG_DELIMITER) {
                return Err(CatalogEncodeError::ContainsDelimiter(item.clone()));
            }
        }
        Ok(self.items.join(CATALOG_DELIMITER))
    }

    pub fn decode(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::default();
        }
        Self {
            items: raw.split(CATALOG_DELIMITER).map(str::to_string).collect(),
        }
    }
}

impl FromIterator<String> for Catalog {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Host-owned key/value storage for catalogs and the selections made from them.
pub trait CatalogStore {
    fn get(&mut self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;

    fn catalog(&mut self, kind: CatalogKind) -> Catalog {
        self.get(kind.storage_key())
            .map(|raw| Catalog::decode(&raw))
            .unwrap_or_default()
    }

    fn is_loaded(&mut self, kind: CatalogKind) -> bool {
        self.get(kind.storage_key())
            .map(|raw| !raw.is_empty())
            .unwrap_or(false)
    }

    fn put_catalog(&mut self, kind: CatalogKind, catalog: &Catalog) -> anyhow::Result<()> {
        let encoded = catalog.encode()?;
        self.set(kind.storage_key(), &encoded)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    values: BTreeMap<String, String>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for MemoryCatalogStore {
    fn get(&mut self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store persisted as a flat JSON object of string values. Every call reads
/// the file again and `set` rewrites it, so several stores can share a file.
#[derive(Debug, Clone)]
pub struct FileCatalogStore {
    path: PathBuf,
}

impl FileCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file contents; a missing file is an empty store.
    pub fn entries(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                let message = format!("failed to read {}", self.path.display());
                return Err(anyhow::Error::new(err).context(message));
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a catalog store", self.path.display()))
    }
}

impl CatalogStore for FileCatalogStore {
    fn get(&mut self, key: &str) -> Option<String> {
        match self.entries() {
            Ok(mut entries) => entries.remove(key),
            Err(err) => {
                log::warn!("catalog store unreadable: {err:#}");
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self.entries()?;
        entries.insert(key.to_string(), value.to_string());
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

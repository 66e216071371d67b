use std::fs;
use std::io;
use std::path::PathBuf;

/// Hands out fresh writable paths. Files are left on disk for the host to
/// clean up.
pub trait TempFileAllocator: Send + Sync {
    fn allocate(&self, prefix: &str) -> io::Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct TempDirAllocator {
    dir: PathBuf,
    suffix: String,
}

impl TempDirAllocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            suffix: ".png".to_string(),
        }
    }

    pub fn system() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

impl TempFileAllocator for TempDirAllocator {
    fn allocate(&self, prefix: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        tempfile::Builder::new()
            .prefix(&sanitize_prefix(prefix))
            .suffix(&self.suffix)
            .tempfile_in(&self.dir)?
            .into_temp_path()
            .keep()
            .map_err(|err| err.error)
    }
}

fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

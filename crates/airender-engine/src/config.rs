use std::env;
use std::time::Duration;

use crate::error::BackendError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:7860";
pub const DEFAULT_TIMEOUT_SECS: f64 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub host_name: String,
    pub host_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: Some(DEFAULT_SERVER_URL.to_string()),
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            host_name: "Blender".to_string(),
            host_version: "4.0.0".to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads `AIRENDER_SD_URL`, `AIRENDER_SD_TIMEOUT`, `AIRENDER_HOST_NAME`
    /// and `AIRENDER_HOST_VERSION`, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: non_empty_env("AIRENDER_SD_URL").or(defaults.base_url),
            timeout: non_empty_env("AIRENDER_SD_TIMEOUT")
                .and_then(|raw| parse_timeout_secs(&raw))
                .unwrap_or(defaults.timeout),
            host_name: non_empty_env("AIRENDER_HOST_NAME").unwrap_or(defaults.host_name),
            host_version: non_empty_env("AIRENDER_HOST_VERSION")
                .unwrap_or(defaults.host_version),
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.host_name, self.host_version)
    }

    pub fn endpoint(&self, path: &str) -> Result<String, BackendError> {
        build_url(self.base_url.as_deref(), path)
    }
}

pub fn build_url(base: Option<&str>, path: &str) -> Result<String, BackendError> {
    let base = base
        .map(|value| value.trim().trim_end_matches('/').trim_end())
        .unwrap_or_default();
    if base.is_empty() {
        return Err(BackendError::ServerUrlMissing);
    }
    Ok(format!("{base}{path}"))
}

pub fn parse_timeout_secs(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<f64>().ok()?;
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

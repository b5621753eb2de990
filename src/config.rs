use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::LectureMaterialsError;

/// Service settings, usually read from a `lecture-materials.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root of the on-disk cache.
    pub cache_dir: PathBuf,
    /// Fetches allowed to run at once across all materials.
    pub max_concurrent_downloads: usize,
    /// Per-fetch timeout; no timeout when absent.
    pub download_timeout_secs: Option<u64>,
    /// Pending requests per material before new ones are rejected.
    pub request_queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            cache_dir: PathBuf::from("lecture_materials"),
            max_concurrent_downloads: 4,
            download_timeout_secs: None,
            request_queue_capacity: 100,
        }
    }
}

impl ServiceConfig {
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        ServiceConfig {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, LectureMaterialsError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, LectureMaterialsError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }
}

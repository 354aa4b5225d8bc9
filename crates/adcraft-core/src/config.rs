use crate::ExportError;
use adcraft_remote::FetchConfig;
use adcraft_render::{DriverConfig, RenderConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by the CLI and the HTTP service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub templates_root: PathBuf,
    /// Where the service exposes `/assets/...`; rendered documents resolve
    /// relative references against it instead of `file://` folders.
    pub public_base_url: Option<String>,
    /// Overall budget for one export or render request.
    pub request_timeout_secs: u64,
    /// `playwright` or `mock`.
    pub backend: String,
    /// Render, export and DPA requests the service runs at once; each holds
    /// its own browser.
    pub max_concurrent_jobs: usize,
    pub fetch: FetchConfig,
    pub render: RenderConfig,
    pub driver: DriverConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            templates_root: PathBuf::from("templates"),
            public_base_url: None,
            request_timeout_secs: 300,
            backend: "playwright".to_owned(),
            max_concurrent_jobs: 4,
            fetch: FetchConfig::default(),
            render: RenderConfig::default(),
            driver: DriverConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.config/adcraft/config.json`, or defaults when
    /// the file does not exist.
    pub fn load_default() -> Result<Self, ExportError> {
        match default_config_path() {
            Ok(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ExportError::Config(format!("invalid config {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn job_limit(&self) -> usize {
        self.max_concurrent_jobs.max(1)
    }
}

pub fn default_config_path() -> Result<PathBuf, ExportError> {
    let home = std::env::var("HOME").map_err(|_| ExportError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/adcraft/config.json"))
}

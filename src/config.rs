use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::utils;

const DEFAULT_USER_AGENT: &str =
    "ProtestPipeline/0.1 (+https://github.com/protest-pipeline/protest-pipeline)";
const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org";
const USER_AGENT_ENV: &str = "PROTEST_PIPELINE_USER_AGENT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no locale registered for country {country} (source {source_id})")]
    UnknownLocale { country: String, source_id: String },
    #[error("unknown source id: {0}")]
    UnknownSource(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_path: PathBuf,
    pub geocode_cache_path: PathBuf,
    pub user_agent: String,
    pub geocoder_endpoint: String,
    pub request_timeout_secs: u64,
    pub geocode_interval_ms: u64,
    pub robots_ttl_secs: u64,
    pub ingest_horizon_days: u32,
    pub adapter_horizon_days: u32,
    pub cleanup_window_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_path: utils::database_path(),
            geocode_cache_path: utils::geocode_cache_path(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            request_timeout_secs: 20,
            geocode_interval_ms: 1100,
            robots_ttl_secs: 3600,
            ingest_horizon_days: 40,
            adapter_horizon_days: 90,
            cleanup_window_days: 3,
        }
    }
}

impl PipelineConfig {
    /// Reads the config file at `path`, or the default location. A missing
    /// file yields the defaults; a present but malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(utils::config_path);
        let mut config = read_config(&path)?;
        if let Ok(agent) = std::env::var(USER_AGENT_ENV) {
            if !agent.trim().is_empty() {
                config.user_agent = agent.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn geocode_interval(&self) -> Duration {
        Duration::from_millis(self.geocode_interval_ms)
    }

    pub fn robots_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_ttl_secs)
    }
}

fn read_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.ingest_horizon_days, 40);
        assert_eq!(config.adapter_horizon_days, 90);
        assert_eq!(config.robots_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"ingest_horizon_days": 14, "geocode_interval_ms": 2000}"#).unwrap();
        let config = read_config(&path).unwrap();
        assert_eq!(config.ingest_horizon_days, 14);
        assert_eq!(config.geocode_interval(), Duration::from_secs(2));
        assert_eq!(config.cleanup_window_days, 3);
    }

    #[test]
    fn malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read_config(&path), Err(ConfigError::Parse { .. })));
    }
}

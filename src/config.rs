use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::cache::CacheLayout;
use crate::domain::FailurePolicy;
use crate::error::BbsError;
use crate::regions::RegionIndex;
use crate::remote::{DEFAULT_BASE_URL, DEFAULT_STATES_DIR, DEFAULT_TIMEOUT_SECS};

pub const DEFAULT_CONFIG_FILE: &str = "bbs-fetch.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub states_dir: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub policy: Option<FailurePolicy>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub region_table: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: String,
    pub states_dir: String,
    pub cache_dir: Utf8PathBuf,
    pub regions: Vec<String>,
    pub overwrite: bool,
    pub policy: FailurePolicy,
    pub timeout: Duration,
    pub region_table: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout::new(self.cache_dir.clone())
    }

    pub fn region_index(&self) -> Result<RegionIndex, BbsError> {
        match &self.region_table {
            Some(path) => RegionIndex::from_csv_path(path),
            None => Ok(RegionIndex::builtin()),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `bbs-fetch.json` in the working directory when no
    /// path is given. A missing default file means all defaults; a missing
    /// explicit file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BbsError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BbsError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| BbsError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BbsError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(BbsError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let cache_dir = match config.cache_dir {
            Some(dir) if !dir.trim().is_empty() => Utf8PathBuf::from(dir.trim()),
            _ => CacheLayout::default_root()?,
        };
        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(BbsError::ConfigParse(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            states_dir: config
                .states_dir
                .unwrap_or_else(|| DEFAULT_STATES_DIR.to_string()),
            cache_dir,
            regions: config.regions,
            overwrite: config.overwrite.unwrap_or(false),
            policy: config.policy.unwrap_or_default(),
            timeout: Duration::from_secs(timeout_secs),
            region_table: config.region_table.map(PathBuf::from),
        })
    }
}

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::RasterFormat;
use crate::error::LocatorError;

pub const DEFAULT_CONFIG_FILE: &str = "plan-locator.json";
pub const DEFAULT_BASE_URL: &str = "https://api.lrsnative.com.au/hlrv/iiif/2";
pub const DEFAULT_PREFIX: &str = "eirCP";

/// File representation; every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: Option<CatalogEntry>,
    #[serde(default)]
    pub probe: Option<ProbeEntry>,
    #[serde(default)]
    pub rasterizer: Option<RasterizerEntry>,
    #[serde(default)]
    pub cache: Option<CacheEntry>,
    #[serde(default)]
    pub tables: Option<TablesEntry>,
    #[serde(default)]
    pub work_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CatalogEntry {
    pub base_url: Option<String>,
    pub identifier_prefix: Option<String>,
    pub search_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProbeEntry {
    pub workers: Option<usize>,
    pub default_start: Option<u64>,
    pub default_end: Option<u64>,
    pub max_span: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RasterizerEntry {
    pub program: Option<String>,
    pub timeout_secs: Option<u64>,
    pub format: Option<RasterFormat>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheEntry {
    pub capacity: Option<usize>,
    /// Zero disables expiry.
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TablesEntry {
    pub aliases: Option<String>,
    pub collections: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub base_url: String,
    pub identifier_prefix: String,
    pub search_url: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub catalog: CatalogSettings,
    pub workers: usize,
    pub default_start: u64,
    pub default_end: u64,
    pub max_span: u64,
    pub rasterizer_program: String,
    pub rasterizer_timeout: Duration,
    pub format: RasterFormat,
    pub cache_capacity: usize,
    pub cache_ttl: Option<chrono::Duration>,
    pub alias_table: PathBuf,
    pub collection_table: PathBuf,
    pub work_dir: Option<Utf8PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; the default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, LocatorError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| LocatorError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| LocatorError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        let catalog = config.catalog.unwrap_or_default();
        let probe = config.probe.unwrap_or_default();
        let rasterizer = config.rasterizer.unwrap_or_default();
        let cache = config.cache.unwrap_or_default();
        let tables = config.tables.unwrap_or_default();

        let ttl_secs = cache.ttl_secs.unwrap_or(3600);
        ResolvedConfig {
            catalog: CatalogSettings {
                base_url: catalog
                    .base_url
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                identifier_prefix: catalog
                    .identifier_prefix
                    .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
                search_url: catalog.search_url,
                request_timeout_secs: catalog.request_timeout_secs.unwrap_or(15),
            },
            workers: probe.workers.unwrap_or(crate::probe::DEFAULT_WORKERS).max(1),
            default_start: probe.default_start.unwrap_or(1),
            default_end: probe.default_end.unwrap_or(200),
            max_span: probe
                .max_span
                .unwrap_or(crate::app::DEFAULT_MAX_SPAN)
                .max(1),
            rasterizer_program: rasterizer
                .program
                .unwrap_or_else(|| crate::rasterizer::DEFAULT_PROGRAM.to_string()),
            rasterizer_timeout: Duration::from_secs(rasterizer.timeout_secs.unwrap_or(600)),
            format: rasterizer.format.unwrap_or(RasterFormat::Jpg),
            cache_capacity: cache.capacity.unwrap_or(crate::cache::DEFAULT_CAPACITY),
            cache_ttl: (ttl_secs > 0).then(|| chrono::Duration::seconds(ttl_secs as i64)),
            alias_table: PathBuf::from(
                tables
                    .aliases
                    .unwrap_or_else(|| "data/aliases.json".to_string()),
            ),
            collection_table: PathBuf::from(
                tables
                    .collections
                    .unwrap_or_else(|| "data/collections.json".to_string()),
            ),
            work_dir: config.work_dir.map(Utf8PathBuf::from),
        }
    }
}

//! Application configuration management

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::indexer::IndexerSettings;
use crate::indexer::manager::ManagerOptions;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding Cardigann YAML definitions
    pub definitions_path: Option<PathBuf>,

    /// YAML list of configured sites
    pub sites_file: Option<PathBuf>,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    pub user_agent: String,

    /// How long search results are served from cache
    pub cache_ttl: Duration,

    /// Concurrent searches allowed against one site
    pub max_concurrent_searches: usize,
}

const DEFAULT_USER_AGENT: &str = concat!("indexgate/", env!("CARGO_PKG_VERSION"));

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            definitions_path: var("INDEXGATE_DEFINITIONS_PATH").map(PathBuf::from),

            sites_file: var("INDEXGATE_SITES_FILE").map(PathBuf::from),

            request_timeout: Duration::from_secs(
                var("INDEXGATE_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|| "30".to_string())
                    .parse()
                    .context("Invalid INDEXGATE_REQUEST_TIMEOUT_SECS")?,
            ),

            user_agent: var("INDEXGATE_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),

            cache_ttl: Duration::from_secs(
                var("INDEXGATE_CACHE_TTL_SECS")
                    .unwrap_or_else(|| "300".to_string())
                    .parse()
                    .context("Invalid INDEXGATE_CACHE_TTL_SECS")?,
            ),

            max_concurrent_searches: var("INDEXGATE_MAX_CONCURRENT_SEARCHES")
                .unwrap_or_else(|| "2".to_string())
                .parse()
                .context("Invalid INDEXGATE_MAX_CONCURRENT_SEARCHES")?,
        })
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            cache_ttl: self.cache_ttl,
            max_concurrent_searches: self.max_concurrent_searches,
        }
    }

    /// Configured sites, empty when no sites file is set
    pub fn load_sites(&self) -> Result<Vec<SiteConfig>> {
        match &self.sites_file {
            Some(path) => SiteConfig::load(path),
            None => Ok(vec![]),
        }
    }
}

/// One configured site as written in the sites file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SiteConfig {
    pub id: String,
    /// Native indexer type or Cardigann definition id
    pub kind: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: IndexerSettings,
}

fn enabled_default() -> bool {
    true
}

impl SiteConfig {
    pub fn load(path: &Path) -> Result<Vec<Self>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sites file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid sites file {}", path.display()))
    }

    pub fn parse(yaml: &str) -> Result<Vec<Self>> {
        let sites: Vec<Self> = serde_yaml::from_str(yaml)?;
        for (i, site) in sites.iter().enumerate() {
            if site.id.trim().is_empty() {
                bail!("site #{} has no id", i + 1);
            }
            if sites[..i].iter().any(|s| s.id == site.id) {
                bail!("duplicate site id '{}'", site.id);
            }
        }
        Ok(sites)
    }
}

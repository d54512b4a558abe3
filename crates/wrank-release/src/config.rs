use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use wrank_adapters::RosterSourceConfig;
use wrank_storage::HttpClientConfig;

#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub database_url: Option<String>,
    pub web_port: u16,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_max_redirects: usize,
    pub roster_ttl_secs: u64,
    pub sources_file: PathBuf,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            web_port: 8000,
            user_agent: "wrank-resolver/0.1".to_string(),
            http_timeout_secs: 12,
            http_max_redirects: 6,
            roster_ttl_secs: 600,
            sources_file: PathBuf::from("sources.yaml"),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl ReleaseConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            web_port: env_parsed("WRANK_WEB_PORT").unwrap_or(defaults.web_port),
            user_agent: std::env::var("WRANK_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parsed("WRANK_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            http_max_redirects: env_parsed("WRANK_HTTP_MAX_REDIRECTS")
                .unwrap_or(defaults.http_max_redirects),
            roster_ttl_secs: env_parsed("WRANK_ROSTER_TTL_SECS").unwrap_or(defaults.roster_ttl_secs),
            sources_file: std::env::var("WRANK_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_file),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            max_redirects: self.http_max_redirects,
            ..Default::default()
        }
    }

    pub fn roster_ttl(&self) -> Duration {
        Duration::from_secs(self.roster_ttl_secs)
    }

    pub fn load_source_config(&self) -> Result<RosterSourceConfig> {
        load_source_config(&self.sources_file)
    }
}

/// Reads the roster source description. A missing file means built-in defaults.
pub fn load_source_config(path: &Path) -> Result<RosterSourceConfig> {
    if !path.exists() {
        info!(path = %path.display(), "no sources file, using default roster source");
        return Ok(RosterSourceConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

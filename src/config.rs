// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "MOVIE_AGGREGATOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total calls per operation, first one included.
    pub max_attempts: u32,
    pub delay_ms: u64,
    /// Statuses retried besides timeouts.
    pub transient_statuses: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
            transient_statuses: vec![503],
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailurePolicy {
    /// Any failed page fails the whole aggregation.
    #[default]
    FailFast,
    /// Failed pages are skipped and reported.
    PartialMerge,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub omdb_base_url: String,
    pub tmdb_base_url: String,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Watch-provider region used for availability lookups.
    pub region: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            omdb_base_url: "https://www.omdbapi.com".into(),
            tmdb_base_url: "https://api.themoviedb.org".into(),
            connect_timeout_ms: 5_000,
            response_timeout_ms: 5_000,
            region: "US".into(),
        }
    }
}

impl UpstreamSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub page_size: u32,
    pub max_concurrent_pages: usize,
    pub cache_ttl_secs: u64,
    pub partial_failure: PartialFailurePolicy,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_concurrent_pages: 10,
            cache_ttl_secs: 3_600,
            partial_failure: PartialFailurePolicy::FailFast,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReleaseSettings {
    pub page_size: u32,
    pub max_concurrent_pages: usize,
    pub cache_ttl_secs: u64,
    /// TTL for a day that has no releases yet.
    pub empty_ttl_secs: u64,
    pub poll_interval_secs: u64,
    pub topic_prefix: String,
    pub partial_failure: PartialFailurePolicy,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_concurrent_pages: 10,
            cache_ttl_secs: 24 * 3600,
            empty_ttl_secs: 30,
            poll_interval_secs: 30,
            topic_prefix: "new-movies-".into(),
            partial_failure: PartialFailurePolicy::FailFast,
        }
    }
}

/// Movie reviews and the watch-provider listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    /// Fallback when a review page omits its page count.
    pub page_size: u32,
    pub max_concurrent_pages: usize,
    pub cache_ttl_secs: u64,
    pub providers_ttl_secs: u64,
    pub partial_failure: PartialFailurePolicy,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_concurrent_pages: 10,
            cache_ttl_secs: 3_600,
            providers_ttl_secs: 3_600,
            partial_failure: PartialFailurePolicy::FailFast,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_secs: u64,
    pub group_concurrency: usize,
    pub match_concurrency: usize,
    pub notify_concurrency: usize,
    pub availability_ttl_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            group_concurrency: 8,
            match_concurrency: 16,
            notify_concurrency: 32,
            availability_ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub metrics: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".into(),
            metrics: true,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .with_context(|| format!("parsing bind address {}", self.bind_addr))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub retry: RetrySettings,
    pub upstream: UpstreamSettings,
    pub search: SearchSettings,
    pub releases: ReleaseSettings,
    pub reviews: ReviewSettings,
    pub scheduler: SchedulerSettings,
    pub server: ServerSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1"));
        }
        if self.search.page_size == 0
            || self.releases.page_size == 0
            || self.reviews.page_size == 0
        {
            return Err(ConfigError::Invalid("page_size must be positive"));
        }
        if self.search.max_concurrent_pages == 0
            || self.releases.max_concurrent_pages == 0
            || self.reviews.max_concurrent_pages == 0
        {
            return Err(ConfigError::Invalid("max_concurrent_pages must be positive"));
        }
        let s = &self.scheduler;
        if s.group_concurrency == 0 || s.match_concurrency == 0 || s.notify_concurrency == 0 {
            return Err(ConfigError::Invalid("scheduler concurrency must be positive"));
        }
        if s.interval_secs == 0 || self.releases.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("scheduler intervals must be positive"));
        }
        Ok(())
    }
}

/// Load config from an explicit TOML file. Missing sections fall back to defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    parse_config(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $MOVIE_AGGREGATOR_CONFIG
/// 2) config/aggregator.toml
/// 3) built-in defaults
///
/// `BIND_ADDR` overrides the listen address in every case.
pub fn load_config_default() -> Result<AppConfig> {
    let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        load_config_from(&pb)?
    } else {
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            load_config_from(&default_p)?
        } else {
            AppConfig::default()
        }
    };

    if let Ok(addr) = std::env::var("BIND_ADDR") {
        cfg.server.bind_addr = addr;
    }
    Ok(cfg)
}

fn parse_config(s: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(s)?;
    cfg.validate()?;
    Ok(cfg)
}

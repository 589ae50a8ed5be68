//! Configuration management for the pinglun harvester
//!
//! This module handles loading and validating configuration from TOML files,
//! environment variables, and command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crawler::endpoint::EndpointVariant;
use crate::models::SortMode;
use crate::storage::sink::OutputFormat;
use crate::storage::DedupStrategy;
use crate::utils::retry::{DelayInterval, RetryConfig, MAX_DELAY_SECS};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pagination, retry and expansion settings
    pub harvest: HarvestConfig,

    /// HTTP transport settings
    pub transport: TransportConfig,

    /// Endpoint priority overrides
    pub endpoints: EndpointsConfig,

    /// Output settings for the persistence collaborator
    pub output: OutputConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Harvest session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Hard ceiling on top-level pages
    pub max_top_level_pages: u32,

    /// Page quota for each reply sub-thread
    pub max_sub_pages_per_thread: u32,

    /// Top-level page size
    pub page_size: u32,

    /// Reply sub-thread page size
    pub reply_page_size: u32,

    /// Attempts per page before it is recorded as failed
    pub retry_limit: u32,

    /// Randomized pause between requests
    pub delay_interval: DelayInterval,

    /// Requested ordering
    pub sort_mode: SortMode,

    /// Consecutive failed pages after which a thread is abandoned
    pub max_consecutive_failures: u32,

    /// Deduplication key strategy
    pub dedup: DedupStrategy,

    /// Whether reply sub-threads are expanded
    pub expand_replies: bool,
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Rate limit (requests per second)
    pub rate_limit: u32,

    /// Cookie header forwarded verbatim (acquired externally)
    pub cookie: Option<String>,
}

/// Endpoint priority lists; `None` selects the platform defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Top-level comment endpoints, in priority order
    pub top_level: Option<Vec<EndpointVariant>>,

    /// Reply sub-thread endpoints, in priority order
    pub replies: Option<Vec<EndpointVariant>>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving result files
    pub dir: PathBuf,

    /// Formats written for each session
    pub formats: Vec<OutputFormat>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_top_level_pages: 100,
            max_sub_pages_per_thread: 3,
            page_size: 20,
            reply_page_size: 10,
            retry_limit: 3,
            delay_interval: DelayInterval::default(),
            sort_mode: SortMode::Popularity,
            max_consecutive_failures: 3,
            dedup: DedupStrategy::Identity,
            expand_replies: true,
        }
    }
}

impl HarvestConfig {
    /// Retry policy derived from this configuration
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_delay(self.retry_limit, self.delay_interval)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            rate_limit: 2,
            cookie: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            formats: vec![OutputFormat::Json],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PINGLUN_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| anyhow::anyhow!("Invalid value for {key}: {value}"))
        }

        if let Some(v) = lookup("PINGLUN_MAX_PAGES") {
            self.harvest.max_top_level_pages = parse("PINGLUN_MAX_PAGES", v)?;
        }
        if let Some(v) = lookup("PINGLUN_MAX_SUB_PAGES") {
            self.harvest.max_sub_pages_per_thread = parse("PINGLUN_MAX_SUB_PAGES", v)?;
        }
        if let Some(v) = lookup("PINGLUN_PAGE_SIZE") {
            self.harvest.page_size = parse("PINGLUN_PAGE_SIZE", v)?;
        }
        if let Some(v) = lookup("PINGLUN_REPLY_PAGE_SIZE") {
            self.harvest.reply_page_size = parse("PINGLUN_REPLY_PAGE_SIZE", v)?;
        }
        if let Some(v) = lookup("PINGLUN_RETRY_LIMIT") {
            self.harvest.retry_limit = parse("PINGLUN_RETRY_LIMIT", v)?;
        }
        if let Some(v) = lookup("PINGLUN_DELAY_MIN") {
            self.harvest.delay_interval.min_secs = parse("PINGLUN_DELAY_MIN", v)?;
        }
        if let Some(v) = lookup("PINGLUN_DELAY_MAX") {
            self.harvest.delay_interval.max_secs = parse("PINGLUN_DELAY_MAX", v)?;
        }
        if let Some(v) = lookup("PINGLUN_SORT") {
            self.harvest.sort_mode = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = lookup("PINGLUN_REQUEST_TIMEOUT") {
            self.transport.request_timeout_secs = parse("PINGLUN_REQUEST_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("PINGLUN_RATE_LIMIT") {
            self.transport.rate_limit = parse("PINGLUN_RATE_LIMIT", v)?;
        }
        if let Some(v) = lookup("PINGLUN_COOKIE") {
            self.transport.cookie = Some(v);
        }
        if let Some(v) = lookup("PINGLUN_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PINGLUN_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("PINGLUN_LOG_FORMAT") {
            self.logging.format = v;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let h = &self.harvest;

        if h.max_top_level_pages == 0 {
            anyhow::bail!("max_top_level_pages must be greater than 0");
        }

        if h.page_size == 0 || h.reply_page_size == 0 {
            anyhow::bail!("page sizes must be greater than 0");
        }

        if h.retry_limit == 0 {
            anyhow::bail!("retry_limit must be at least 1");
        }

        if !h.delay_interval.is_valid() {
            anyhow::bail!(
                "delay_interval must satisfy 0 <= min ({}) <= max ({}) <= {MAX_DELAY_SECS}",
                h.delay_interval.min_secs,
                h.delay_interval.max_secs
            );
        }

        if self.transport.rate_limit == 0 {
            anyhow::bail!("rate_limit must be positive");
        }

        if self.transport.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }

        for (label, list) in [
            ("top_level", &self.endpoints.top_level),
            ("replies", &self.endpoints.replies),
        ] {
            if let Some(list) = list {
                if list.is_empty() {
                    anyhow::bail!("endpoints.{label} must list at least one variant");
                }
            }
        }

        if self.output.formats.is_empty() {
            anyhow::bail!("output.formats must list at least one format");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.harvest.max_top_level_pages, 100);
        assert_eq!(config.harvest.page_size, 20);
        assert_eq!(config.harvest.retry_limit, 3);
    }

    #[test]
    fn test_invalid_page_size() {
        let mut config = Config::default();
        config.harvest.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_delay_interval() {
        let mut config = Config::default();
        config.harvest.delay_interval = DelayInterval::new(2.0, 1.0);
        assert!(config.validate().is_err());

        config.harvest.delay_interval = DelayInterval::new(0.5, 1e30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_endpoint_override_rejected() {
        let mut config = Config::default();
        config.endpoints.replies = Some(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PINGLUN_MAX_PAGES", "7"),
            ("PINGLUN_SORT", "time"),
            ("PINGLUN_DELAY_MAX", "2.5"),
            ("PINGLUN_COOKIE", "SESSDATA=abc"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.harvest.max_top_level_pages, 7);
        assert_eq!(config.harvest.sort_mode, SortMode::Time);
        assert_eq!(config.harvest.delay_interval.max_secs, 2.5);
        assert_eq!(config.transport.cookie.as_deref(), Some("SESSDATA=abc"));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let result = config.apply_env(|key| {
            (key == "PINGLUN_PAGE_SIZE").then(|| "twenty".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_toml() {
        let toml_src = r#"
            [harvest]
            max_top_level_pages = 5
            sort_mode = "time"
            dedup = "content"

            [harvest.delay_interval]
            min_secs = 0.1
            max_secs = 0.2

            [output]
            formats = ["json", "csv"]
        "#;

        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.harvest.max_top_level_pages, 5);
        assert_eq!(config.harvest.page_size, 20);
        assert_eq!(config.harvest.dedup, DedupStrategy::Content);
        assert_eq!(config.output.formats, vec![OutputFormat::Json, OutputFormat::Csv]);
        assert!(config.validate().is_ok());
    }
}

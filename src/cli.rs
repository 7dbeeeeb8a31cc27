//! Command-line interface parsing for the price dashboard
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! a validated `DashboardConfig`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::data::PriceType;
use crate::format::DisplayZone;

/// Backend address used when neither `--api-url` nor the env var is set
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The API base URL is not an absolute http(s) URL
    #[error("Invalid API URL: '{0}'. Expected an http:// or https:// address")]
    InvalidApiUrl(String),

    /// The specified price type is not recognized
    #[error("Invalid price type: '{0}'. Valid price types: usd, vnd")]
    InvalidPriceType(String),

    /// A duration argument was zero
    #[error("Invalid {0}: must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Gold, bitcoin and USD/VND price dashboard
#[derive(Parser, Debug)]
#[command(name = "pricedash")]
#[command(about = "Terminal dashboard for gold, bitcoin and USD/VND price history")]
#[command(version)]
pub struct Cli {
    /// Base URL of the price API
    #[arg(long, value_name = "URL", env = "PRICEDASH_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Price column charted for gold and bitcoin (usd or vnd)
    #[arg(long, value_name = "TYPE", default_value = "usd")]
    pub price_type: String,

    /// Seconds before cached data is refetched
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub stale_secs: u64,

    /// HTTP request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 15)]
    pub timeout_secs: u64,

    /// Render chart labels in local time instead of UTC
    #[arg(long)]
    pub local_time: bool,

    /// Write logs to this file instead of the cache directory
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Base URL of the price API, without trailing slash
    pub api_url: String,
    /// Initial price type
    pub price_type: PriceType,
    /// Age after which cached data is refetched
    pub stale_after: Duration,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// Time zone of chart labels
    pub display_zone: DisplayZone,
    /// Explicit log file location
    pub log_file: Option<PathBuf>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            price_type: PriceType::Usd,
            stale_after: CacheConfig::default().stale_after,
            request_timeout: Duration::from_secs(15),
            display_zone: DisplayZone::Utc,
            log_file: None,
        }
    }
}

/// Parses a price type argument into a `PriceType`
pub fn parse_price_type_arg(s: &str) -> Result<PriceType, CliError> {
    s.parse::<PriceType>()
        .map_err(|_| CliError::InvalidPriceType(s.to_string()))
}

/// Validates the API base URL and strips any trailing slash
pub fn parse_api_url_arg(s: &str) -> Result<String, CliError> {
    let url = Url::parse(s).map_err(|_| CliError::InvalidApiUrl(s.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(CliError::InvalidApiUrl(s.to_string()));
    }
    Ok(s.trim_end_matches('/').to_string())
}

impl DashboardConfig {
    /// Creates a DashboardConfig from parsed CLI arguments.
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.stale_secs == 0 {
            return Err(CliError::ZeroDuration("stale interval"));
        }
        if cli.timeout_secs == 0 {
            return Err(CliError::ZeroDuration("timeout"));
        }

        Ok(Self {
            api_url: parse_api_url_arg(&cli.api_url)?,
            price_type: parse_price_type_arg(&cli.price_type)?,
            stale_after: Duration::from_secs(cli.stale_secs),
            request_timeout: Duration::from_secs(cli.timeout_secs),
            display_zone: if cli.local_time {
                DisplayZone::Local
            } else {
                DisplayZone::Utc
            },
            log_file: cli.log_file.clone(),
        })
    }

    /// Cache settings for this configuration
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            stale_after: self.stale_after,
            ..CacheConfig::default()
        }
    }
}

//! Price API client
//!
//! This module defines the `PriceApi` seam used by the query cache and its
//! reqwest-backed implementation. Every read goes through one generic
//! `fetch_series` / `fetch_latest` pair parameterized by `Resource`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use thiserror::Error;

use super::{AssetPrice, DateRange, ExchangeRate, PricePoint, Resource};
use crate::cache::{QueryData, QueryKey};

/// Longest server error body kept in an error message
const MAX_ERROR_BODY: usize = 200;

/// Errors that can occur when talking to the price API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request failed or timed out before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    /// The response body was not the expected JSON
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// A write command asking the backend to pull fresh data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshCommand {
    /// Refresh gold and bitcoin prices
    RefreshAssetPrices,
    /// Refresh the USD/VND exchange rate
    RefreshExchangeRates,
}

impl RefreshCommand {
    /// Every command, in dispatch order
    pub const ALL: [RefreshCommand; 2] = [
        RefreshCommand::RefreshAssetPrices,
        RefreshCommand::RefreshExchangeRates,
    ];

    /// API path the command is POSTed to
    pub fn path(self) -> &'static str {
        match self {
            RefreshCommand::RefreshAssetPrices => "/api/assets-prices",
            RefreshCommand::RefreshExchangeRates => "/api/exchange-rates",
        }
    }

    /// Read resources whose cached data is outdated once the command succeeds
    pub fn invalidates(self) -> &'static [Resource] {
        match self {
            RefreshCommand::RefreshAssetPrices => {
                &[Resource::GoldPrices, Resource::BitcoinPrices]
            }
            RefreshCommand::RefreshExchangeRates => &[Resource::ExchangeRates],
        }
    }

    /// Short label for status messages
    pub fn label(self) -> &'static str {
        match self {
            RefreshCommand::RefreshAssetPrices => "asset prices",
            RefreshCommand::RefreshExchangeRates => "exchange rates",
        }
    }
}

/// Acknowledgement returned by a successful write
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteReceipt {
    #[serde(default)]
    pub message: String,
}

/// Remote source of price data
#[async_trait]
pub trait PriceApi: Send + Sync {
    /// Performs the read identified by `key`
    async fn fetch(&self, key: &QueryKey) -> Result<QueryData, FetchError>;

    /// Sends a write command
    async fn refresh(&self, command: RefreshCommand) -> Result<WriteReceipt, FetchError>;
}

/// Client for the price API over HTTP
#[derive(Debug, Clone)]
pub struct HttpPriceApi {
    client: Client,
    base_url: String,
}

impl HttpPriceApi {
    /// Create a client for `base_url` with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client with a custom HTTP client
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch the points of `resource` recorded within `range`
    pub async fn fetch_series(
        &self,
        resource: Resource,
        range: &DateRange,
    ) -> Result<Vec<PricePoint>, FetchError> {
        let response = self
            .client
            .get(self.url(resource.path()))
            .query(&range.query_params())
            .send()
            .await?;
        let text = read_body(response).await?;

        let points = if resource.is_asset() {
            serde_json::from_str::<Vec<AssetPrice>>(&text)?
                .into_iter()
                .map(PricePoint::Asset)
                .collect()
        } else {
            serde_json::from_str::<Vec<ExchangeRate>>(&text)?
                .into_iter()
                .map(PricePoint::Rate)
                .collect()
        };

        Ok(points)
    }

    /// Fetch the most recent point of `resource`, if the backend has one
    pub async fn fetch_latest(&self, resource: Resource) -> Result<Option<PricePoint>, FetchError> {
        let response = self
            .client
            .get(self.url(&resource.latest_path()))
            .send()
            .await?;
        let text = read_body(response).await?;

        let point = if resource.is_asset() {
            serde_json::from_str::<Option<AssetPrice>>(&text)?.map(PricePoint::Asset)
        } else {
            serde_json::from_str::<Option<ExchangeRate>>(&text)?.map(PricePoint::Rate)
        };

        Ok(point)
    }

    /// POST a refresh command
    pub async fn send_refresh(&self, command: RefreshCommand) -> Result<WriteReceipt, FetchError> {
        let response = self.client.post(self.url(command.path())).send().await?;
        let text = read_body(response).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl PriceApi for HttpPriceApi {
    async fn fetch(&self, key: &QueryKey) -> Result<QueryData, FetchError> {
        match &key.range {
            Some(range) => Ok(QueryData::Series(self.fetch_series(key.resource, range).await?)),
            None => Ok(QueryData::Latest(self.fetch_latest(key.resource).await?)),
        }
    }

    async fn refresh(&self, command: RefreshCommand) -> Result<WriteReceipt, FetchError> {
        self.send_refresh(command).await
    }
}

/// Reads a response body, turning non-2xx statuses into `FetchError::Server`
async fn read_body(response: Response) -> Result<String, FetchError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let body: String = text.chars().take(MAX_ERROR_BODY).collect();
        return Err(FetchError::Server {
            status: status.as_u16(),
            body,
        });
    }

    Ok(text)
}

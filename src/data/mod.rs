//! Core data models for the price dashboard
//!
//! This module contains the wire types returned by the price API and the
//! small value types (resources, price types, date ranges) used to address it.

pub mod client;
pub mod timestamp;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{FetchError, HttpPriceApi, PriceApi, RefreshCommand, WriteReceipt};

use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use ratatui::style::Color;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Earliest date the range picker will step back to
pub fn min_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// A price series served by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    GoldPrices,
    BitcoinPrices,
    ExchangeRates,
}

impl Resource {
    /// All resources in display order (left to right)
    pub const ALL: [Resource; 3] = [
        Resource::GoldPrices,
        Resource::BitcoinPrices,
        Resource::ExchangeRates,
    ];

    /// API path for the historical series
    pub fn path(self) -> &'static str {
        match self {
            Resource::GoldPrices => "/api/gold-prices",
            Resource::BitcoinPrices => "/api/bitcoin-prices",
            Resource::ExchangeRates => "/api/exchange-rates",
        }
    }

    /// API path for the most recent point
    pub fn latest_path(self) -> String {
        format!("{}/latest", self.path())
    }

    /// Panel heading for the latest value
    pub fn title(self) -> &'static str {
        match self {
            Resource::GoldPrices => "Latest Gold Price",
            Resource::BitcoinPrices => "Latest Bitcoin Price",
            Resource::ExchangeRates => "Latest Exchange Rate",
        }
    }

    /// Legend name of the chart series
    pub fn series_name(self) -> &'static str {
        match self {
            Resource::GoldPrices => "Gold Price",
            Resource::BitcoinPrices => "Bitcoin Price",
            Resource::ExchangeRates => "USD to VND",
        }
    }

    /// Line color of the chart series
    pub fn color(self) -> Color {
        match self {
            Resource::GoldPrices => Color::Yellow,
            Resource::BitcoinPrices => Color::Blue,
            Resource::ExchangeRates => Color::Green,
        }
    }

    /// Whether points of this resource are asset prices (USD and VND)
    pub fn is_asset(self) -> bool {
        !matches!(self, Resource::ExchangeRates)
    }
}

/// Which currency column of an asset price is displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceType {
    #[default]
    Usd,
    Vnd,
}

/// Error returned when a price type name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown price type '{0}'")]
pub struct UnknownPriceType(pub String);

impl FromStr for PriceType {
    type Err = UnknownPriceType;

    /// Parses a price type name ("usd" or "vnd", case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usd" | "usd_price" => Ok(PriceType::Usd),
            "vnd" | "vnd_price" => Ok(PriceType::Vnd),
            _ => Err(UnknownPriceType(s.to_string())),
        }
    }
}

impl PriceType {
    /// Currency unit shown after a value
    pub fn unit(self) -> &'static str {
        match self {
            PriceType::Usd => "USD",
            PriceType::Vnd => "VND",
        }
    }

    /// The other price type
    pub fn toggled(self) -> Self {
        match self {
            PriceType::Usd => PriceType::Vnd,
            PriceType::Vnd => PriceType::Usd,
        }
    }
}

/// An inclusive calendar date range used to filter a series
///
/// The fields are private so that `start <= end` always holds. A range built
/// with `start > end` is clamped to the single day `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range, clamping `end` up to `start` when they are reversed
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// The default range: January 1 of the current year through tomorrow
    pub fn default_for(today: NaiveDate) -> Self {
        let start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);
        let end = today.checked_add_days(Days::new(1)).unwrap_or(today);
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Returns a copy with a new start date (end is pushed along if needed)
    pub fn with_start(self, start: NaiveDate) -> Self {
        Self::new(start, self.end)
    }

    /// Returns a copy with a new end date (clamped to start if earlier)
    pub fn with_end(self, end: NaiveDate) -> Self {
        Self::new(self.start, end)
    }

    /// Query parameters in the `YYYY-MM-DD` form the API expects
    pub fn query_params(&self) -> [(&'static str, String); 2] {
        [
            ("start_date", format_query_date(self.start)),
            ("end_date", format_query_date(self.end)),
        ]
    }
}

/// Formats a calendar date as zero-padded `YYYY-MM-DD`
pub fn format_query_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// A gold or bitcoin price observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPrice {
    /// Backend asset identifier (not always present)
    #[serde(default)]
    pub asset_id: Option<i64>,
    /// When the price was recorded
    #[serde(with = "timestamp")]
    pub price_recorded_at: DateTime<Utc>,
    /// Price in US dollars
    pub usd_price: f64,
    /// Price in Vietnamese dong
    pub vnd_price: f64,
}

/// A USD to VND exchange rate observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// When the rate was recorded
    #[serde(with = "timestamp")]
    pub recorded_at: DateTime<Utc>,
    /// Dong per dollar
    pub usd_to_vnd: f64,
}

/// One timestamped observation of an asset price or exchange rate
#[derive(Debug, Clone, PartialEq)]
pub enum PricePoint {
    Asset(AssetPrice),
    Rate(ExchangeRate),
}

impl PricePoint {
    /// When the observation was recorded
    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            PricePoint::Asset(price) => price.price_recorded_at,
            PricePoint::Rate(rate) => rate.recorded_at,
        }
    }

    /// The charted value. Exchange rates ignore the price type.
    pub fn value(&self, price_type: PriceType) -> f64 {
        match (self, price_type) {
            (PricePoint::Asset(price), PriceType::Usd) => price.usd_price,
            (PricePoint::Asset(price), PriceType::Vnd) => price.vnd_price,
            (PricePoint::Rate(rate), _) => rate.usd_to_vnd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range_keeps_ordered_dates() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 2));
        assert_eq!(range.start(), date(2024, 1, 1));
        assert_eq!(range.end(), date(2024, 1, 2));
    }

    #[test]
    fn test_date_range_clamps_reversed_dates() {
        let range = DateRange::new(date(2024, 3, 10), date(2024, 3, 1));
        assert_eq!(range.start(), date(2024, 3, 10));
        assert_eq!(range.end(), date(2024, 3, 10));
    }

    #[test]
    fn test_with_start_past_end_pushes_end() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 5));
        let moved = range.with_start(date(2024, 1, 9));
        assert_eq!(moved.start(), date(2024, 1, 9));
        assert_eq!(moved.end(), date(2024, 1, 9));
    }

    #[test]
    fn test_with_end_before_start_is_clamped() {
        let range = DateRange::new(date(2024, 1, 5), date(2024, 1, 9));
        let moved = range.with_end(date(2024, 1, 1));
        assert_eq!(moved.end(), date(2024, 1, 5));
    }

    #[test]
    fn test_default_range_runs_from_new_year_to_tomorrow() {
        let range = DateRange::default_for(date(2024, 6, 15));
        assert_eq!(range.start(), date(2024, 1, 1));
        assert_eq!(range.end(), date(2024, 6, 16));
    }

    #[test]
    fn test_default_range_on_new_years_eve_crosses_year() {
        let range = DateRange::default_for(date(2024, 12, 31));
        assert_eq!(range.start(), date(2024, 1, 1));
        assert_eq!(range.end(), date(2025, 1, 1));
    }

    #[test]
    fn test_query_params_are_zero_padded() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 2));
        let params = range.query_params();
        assert_eq!(params[0], ("start_date", "2024-01-01".to_string()));
        assert_eq!(params[1], ("end_date", "2024-01-02".to_string()));
    }

    #[test]
    fn test_resource_paths() {
        assert_eq!(Resource::GoldPrices.path(), "/api/gold-prices");
        assert_eq!(Resource::BitcoinPrices.latest_path(), "/api/bitcoin-prices/latest");
        assert_eq!(Resource::ExchangeRates.latest_path(), "/api/exchange-rates/latest");
        assert!(Resource::GoldPrices.is_asset());
        assert!(!Resource::ExchangeRates.is_asset());
    }

    #[test]
    fn test_price_type_parsing() {
        assert_eq!("usd".parse::<PriceType>(), Ok(PriceType::Usd));
        assert_eq!("VND".parse::<PriceType>(), Ok(PriceType::Vnd));
        assert_eq!("vnd_price".parse::<PriceType>(), Ok(PriceType::Vnd));
        assert_eq!(
            "eur".parse::<PriceType>(),
            Err(UnknownPriceType("eur".to_string()))
        );
        assert_eq!(PriceType::Usd.toggled(), PriceType::Vnd);
    }

    #[test]
    fn test_asset_price_deserializes_api_payload() {
        let json = r#"{
            "asset_id": 1,
            "price_recorded_at": "2024-01-01T10:00:00Z",
            "exchange_rate_recorded_at": "2024-01-01T00:00:00",
            "usd_price": 2000.00,
            "vnd_price": 49000000.00
        }"#;
        let price: AssetPrice = serde_json::from_str(json).expect("valid asset price");
        assert_eq!(price.asset_id, Some(1));
        assert!((price.usd_price - 2000.0).abs() < 0.001);
        assert_eq!(
            price.price_recorded_at.to_rfc3339(),
            "2024-01-01T10:00:00+00:00"
        );
    }

    #[test]
    fn test_price_point_value_by_price_type() {
        let asset = PricePoint::Asset(AssetPrice {
            asset_id: None,
            price_recorded_at: Utc::now(),
            usd_price: 2000.0,
            vnd_price: 49_000_000.0,
        });
        let rate = PricePoint::Rate(ExchangeRate {
            recorded_at: Utc::now(),
            usd_to_vnd: 24_500.0,
        });
        assert_eq!(asset.value(PriceType::Usd), 2000.0);
        assert_eq!(asset.value(PriceType::Vnd), 49_000_000.0);
        assert_eq!(rate.value(PriceType::Usd), 24_500.0);
        assert_eq!(rate.value(PriceType::Vnd), 24_500.0);
    }
}

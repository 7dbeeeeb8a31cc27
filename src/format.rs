//! Display formatting for price data
//!
//! Turns cached price points into chart series and latest-value strings.

use chrono::{DateTime, Local, Utc};
use num_format::{Locale, ToFormattedString};
use ratatui::style::Color;

use crate::data::{PricePoint, PriceType, Resource};

/// Chart label layout: `DD/MM/YYYY HH:MM:SS`, 24-hour clock
const LABEL_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Placeholder for values that could not be loaded
pub const NOT_AVAILABLE: &str = "N/A";

/// Time zone chart labels are rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayZone {
    #[default]
    Utc,
    Local,
}

/// Formats a point timestamp as a chart label
pub fn format_label(timestamp: &DateTime<Utc>, zone: DisplayZone) -> String {
    match zone {
        DisplayZone::Utc => timestamp.format(LABEL_FORMAT).to_string(),
        DisplayZone::Local => timestamp.with_timezone(&Local).format(LABEL_FORMAT).to_string(),
    }
}

/// Data handed to the chart widget
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    /// Display label per point, same length as `values`
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    pub series_name: String,
    pub color: Color,
}

impl ChartSeries {
    /// Builds the series for `points` of `resource`
    pub fn from_points(
        resource: Resource,
        points: &[PricePoint],
        price_type: PriceType,
        zone: DisplayZone,
    ) -> Self {
        let (labels, values) = points
            .iter()
            .map(|point| (format_label(&point.recorded_at(), zone), point.value(price_type)))
            .unzip();

        Self {
            labels,
            values,
            series_name: resource.series_name().to_string(),
            color: resource.color(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(x, y)` pairs for the chart widget, x being the point index
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, value)| (i as f64, *value))
            .collect()
    }

    /// Lowest and highest value, padded so a flat line stays visible
    pub fn value_bounds(&self) -> Option<(f64, f64)> {
        let min = self.values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() || !max.is_finite() {
            return None;
        }

        let pad = if max > min {
            (max - min) * 0.05
        } else {
            (max.abs() * 0.01).max(1.0)
        };
        Some((min - pad, max + pad))
    }
}

/// Unit shown after a value of `resource`
pub fn unit_for(resource: Resource, price_type: PriceType) -> &'static str {
    if resource.is_asset() {
        price_type.unit()
    } else {
        "VND"
    }
}

/// Formats a value with two decimals and comma thousands separators
///
/// Non-finite values render as `N/A`.
pub fn format_amount(value: f64) -> String {
    if !value.is_finite() {
        return NOT_AVAILABLE.to_string();
    }

    let cents = (value.abs() * 100.0).round() as u128;
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!(
        "{}{}.{:02}",
        sign,
        (cents / 100).to_formatted_string(&Locale::en),
        cents % 100
    )
}

/// Latest-value line for a panel, or `N/A` when there is no point
pub fn format_latest(resource: Resource, point: Option<&PricePoint>, price_type: PriceType) -> String {
    match point {
        Some(point) => format!(
            "{} {}",
            format_amount(point.value(price_type)),
            unit_for(resource, price_type)
        ),
        None => NOT_AVAILABLE.to_string(),
    }
}

//! In-memory query cache for price API reads
//!
//! This module provides the `QueryCache`, the single source of truth for all
//! price and rate data shown by the dashboard. Reads are keyed by resource and
//! optional date range, fetched in the background at most once at a time per
//! key, and invalidated after a successful refresh command. Nothing is
//! persisted across restarts.

mod query;

pub use query::{CacheConfig, CacheEntry, CacheEvent, QueryCache, QueryData, QueryKey, QueryStatus};

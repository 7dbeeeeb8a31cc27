//! In-memory `PriceApi` used by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::watch;

use super::{AssetPrice, ExchangeRate, FetchError, PriceApi, PricePoint, RefreshCommand, WriteReceipt};
use crate::cache::{QueryData, QueryKey};

/// Fake backend whose prices equal its current data version
///
/// Every successful refresh bumps the version, so tests can tell pre-write
/// data from post-write data. Reads can be held open to observe in-flight state.
pub(crate) struct FakePriceApi {
    version: AtomicU64,
    fetches: Mutex<HashMap<QueryKey, usize>>,
    writes: Mutex<Vec<RefreshCommand>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    hold: watch::Sender<bool>,
}

impl FakePriceApi {
    pub(crate) fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            version: AtomicU64::new(1),
            fetches: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            hold,
        }
    }

    /// Blocks subsequent reads until `release` is called
    pub(crate) fn hold_reads(&self) {
        self.hold.send_replace(true);
    }

    pub(crate) fn release_reads(&self) {
        self.hold.send_replace(false);
    }

    pub(crate) fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_count(&self, key: &QueryKey) -> usize {
        self.fetches.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub(crate) fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }

    pub(crate) fn writes(&self) -> Vec<RefreshCommand> {
        self.writes.lock().unwrap().clone()
    }

    fn point(&self, key: &QueryKey, version: u64) -> PricePoint {
        let recorded_at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        if key.resource.is_asset() {
            PricePoint::Asset(AssetPrice {
                asset_id: Some(1),
                price_recorded_at: recorded_at,
                usd_price: version as f64,
                vnd_price: version as f64 * 25_000.0,
            })
        } else {
            PricePoint::Rate(ExchangeRate {
                recorded_at,
                usd_to_vnd: version as f64,
            })
        }
    }
}

#[async_trait]
impl PriceApi for FakePriceApi {
    async fn fetch(&self, key: &QueryKey) -> Result<QueryData, FetchError> {
        *self.fetches.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        let mut hold = self.hold.subscribe();
        let _ = hold.wait_for(|held| !*held).await;

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".to_string()));
        }

        let version = self.version();
        let point = self.point(key, version);
        Ok(if key.is_latest() {
            QueryData::Latest(Some(point))
        } else {
            QueryData::Series(vec![point])
        })
    }

    async fn refresh(&self, command: RefreshCommand) -> Result<WriteReceipt, FetchError> {
        self.writes.lock().unwrap().push(command);

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FetchError::Server {
                status: 500,
                body: "Failed to create assets prices".to_string(),
            });
        }

        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(WriteReceipt {
            message: format!("{} refreshed", command.label()),
        })
    }
}

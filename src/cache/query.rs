//! Query cache with in-flight de-duplication and key-prefix invalidation
//!
//! Provides a `QueryCache` that hands out entry snapshots without blocking and
//! spawns background fetches, notifying observers through a broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::data::{DateRange, FetchError, PriceApi, PricePoint, RefreshCommand, Resource, WriteReceipt};

/// Capacity of the observer channel; slow observers see `Lagged` and resync
const EVENT_CAPACITY: usize = 64;

/// Identity of a cached read
///
/// A key without a range addresses the "latest" point of the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub resource: Resource,
    pub range: Option<DateRange>,
}

impl QueryKey {
    /// Key for the historical series of `resource` within `range`
    pub fn series(resource: Resource, range: DateRange) -> Self {
        Self {
            resource,
            range: Some(range),
        }
    }

    /// Key for the most recent point of `resource`
    pub fn latest(resource: Resource) -> Self {
        Self {
            resource,
            range: None,
        }
    }

    pub fn is_latest(&self) -> bool {
        self.range.is_none()
    }
}

/// Result of a read
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    /// Points of a historical series, in API order
    Series(Vec<PricePoint>),
    /// The most recent point, if the backend has any
    Latest(Option<PricePoint>),
}

/// Lifecycle of a cache entry
#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatus {
    /// No data yet (first load, or invalidated)
    Pending,
    /// The last fetch succeeded
    Success,
    /// The last fetch failed; retried on the next read
    Error(FetchError),
}

/// Snapshot of one cached read
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: QueryKey,
    /// Last successfully fetched data. Cleared on invalidation.
    pub data: Option<QueryData>,
    pub status: QueryStatus,
    /// When `data` was fetched
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Whether a fetch for this key is in flight
    pub is_fetching: bool,
}

impl CacheEntry {
    fn new(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            status: QueryStatus::Pending,
            last_fetched_at: None,
            is_fetching: false,
        }
    }

    /// True while nothing can be displayed yet
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    pub fn error(&self) -> Option<&FetchError> {
        match &self.status {
            QueryStatus::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Series points, if this entry holds a series
    pub fn series(&self) -> Option<&[PricePoint]> {
        match &self.data {
            Some(QueryData::Series(points)) => Some(points),
            _ => None,
        }
    }

    /// Latest point, if this entry holds one
    pub fn latest(&self) -> Option<&PricePoint> {
        match &self.data {
            Some(QueryData::Latest(point)) => point.as_ref(),
            _ => None,
        }
    }

    fn needs_fetch(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match self.status {
            QueryStatus::Pending | QueryStatus::Error(_) => true,
            QueryStatus::Success => match self.last_fetched_at {
                Some(fetched_at) => {
                    let age = (now - fetched_at).to_std().unwrap_or(Duration::ZERO);
                    age >= stale_after
                }
                None => true,
            },
        }
    }
}

/// Notification sent to observers when the cache changes
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A fetch for the key started, finished, or was discarded
    Updated(QueryKey),
    /// Every entry of the resource was invalidated
    Invalidated(Resource),
}

/// Configuration for cache freshness and retention
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age after which successful data is refetched on the next read
    pub stale_after: Duration,
    /// Entries not read for this long are dropped on a later read
    pub gc_after: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300), // 5 minutes
            gc_after: Duration::from_secs(300),
        }
    }
}

/// A running fetch task
struct InFlight {
    id: u64,
    handle: AbortHandle,
}

struct Slot {
    entry: CacheEntry,
    /// Only the fetch recorded here may complete the entry
    fetch: Option<InFlight>,
    last_read: Instant,
}

impl Slot {
    fn new(key: QueryKey) -> Self {
        Self {
            entry: CacheEntry::new(key),
            fetch: None,
            last_read: Instant::now(),
        }
    }

    /// Aborts the running fetch, if any
    fn abort_fetch(&mut self) -> bool {
        self.entry.is_fetching = false;
        match self.fetch.take() {
            Some(fetch) => {
                fetch.handle.abort();
                true
            }
            None => false,
        }
    }
}

struct Inner {
    api: Arc<dyn PriceApi>,
    config: CacheConfig,
    slots: Mutex<HashMap<QueryKey, Slot>>,
    next_fetch_id: AtomicU64,
    events: broadcast::Sender<CacheEvent>,
}

/// Cache of price API reads shared by the whole dashboard
///
/// Cloning is cheap and every clone refers to the same entries. Fetches run as
/// tokio tasks, so the cache must be used from within a tokio runtime.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    /// Creates an empty cache reading from `api`
    pub fn new(api: Arc<dyn PriceApi>, config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                slots: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Subscribes to cache change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the entry for `key`, starting a background fetch when needed
    ///
    /// A fetch starts when none is in flight for the key and the entry is
    /// absent, invalidated, failed, or older than `stale_after`. The returned
    /// snapshot reflects the entry right after that decision. Entries of other
    /// keys that were not read within `gc_after` are dropped.
    pub fn read(&self, key: &QueryKey) -> CacheEntry {
        let now = Utc::now();
        let mut slots = self.slots();
        self.collect_unused(&mut slots, key);

        let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(key.clone()));
        slot.last_read = Instant::now();

        if slot.entry.is_fetching {
            debug!(?key, "fetch already in flight");
        } else if slot.entry.needs_fetch(now, self.inner.config.stale_after) {
            slot.entry.is_fetching = true;
            slot.fetch = Some(self.spawn_fetch(key.clone()));
        }

        slot.entry.clone()
    }

    /// Returns the entry for `key` without side effects
    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.slots().get(key).map(|slot| slot.entry.clone())
    }

    /// Number of keys currently cached
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks every entry of `resource` stale and drops its data
    ///
    /// Fetches in flight for those entries are aborted, and a result that
    /// races the abort is discarded. Nothing is refetched until the next read.
    pub fn invalidate(&self, resource: Resource) {
        let (count, aborted) = {
            let mut slots = self.slots();
            let mut count = 0;
            let mut aborted = 0;
            for slot in slots.values_mut().filter(|slot| slot.entry.key.resource == resource) {
                if slot.abort_fetch() {
                    aborted += 1;
                }
                slot.entry.data = None;
                slot.entry.status = QueryStatus::Pending;
                count += 1;
            }
            (count, aborted)
        };

        info!(?resource, entries = count, aborted, "invalidated cache entries");
        let _ = self.inner.events.send(CacheEvent::Invalidated(resource));
    }

    /// Aborts the fetch in flight for `key`
    ///
    /// The entry keeps whatever data it had. Returns `false`, doing nothing,
    /// when no fetch is running, so repeated calls and calls after the fetch
    /// finished are harmless.
    pub fn cancel(&self, key: &QueryKey) -> bool {
        let cancelled = self
            .slots()
            .get_mut(key)
            .map(Slot::abort_fetch)
            .unwrap_or(false);

        if cancelled {
            debug!(?key, "cancelled fetch");
            let _ = self.inner.events.send(CacheEvent::Updated(key.clone()));
        }
        cancelled
    }

    /// Sends a refresh command and invalidates the resources it affects
    ///
    /// On failure the cache is left untouched and the error is returned.
    pub async fn write(&self, command: RefreshCommand) -> Result<WriteReceipt, FetchError> {
        match self.inner.api.refresh(command).await {
            Ok(receipt) => {
                info!(command = command.label(), message = %receipt.message, "refresh succeeded");
                for resource in command.invalidates() {
                    self.invalidate(*resource);
                }
                Ok(receipt)
            }
            Err(err) => {
                warn!(command = command.label(), error = %err, "refresh failed");
                Err(err)
            }
        }
    }

    fn spawn_fetch(&self, key: QueryKey) -> InFlight {
        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        debug!(?key, id, "starting fetch");
        let _ = self.inner.events.send(CacheEvent::Updated(key.clone()));

        let cache = self.clone();
        let task = tokio::spawn(async move {
            let result = cache.inner.api.fetch(&key).await;
            cache.complete_fetch(key, id, result);
        });

        InFlight {
            id,
            handle: task.abort_handle(),
        }
    }

    fn complete_fetch(&self, key: QueryKey, id: u64, result: Result<QueryData, FetchError>) {
        {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(&key) else {
                return;
            };
            if slot.fetch.as_ref().map(|fetch| fetch.id) != Some(id) {
                debug!(?key, id, "discarding result of cancelled fetch");
                return;
            }

            slot.fetch = None;
            slot.entry.is_fetching = false;
            match result {
                Ok(data) => {
                    slot.entry.data = Some(data);
                    slot.entry.status = QueryStatus::Success;
                    slot.entry.last_fetched_at = Some(Utc::now());
                }
                Err(err) => {
                    warn!(?key, error = %err, "fetch failed");
                    slot.entry.status = QueryStatus::Error(err);
                }
            }
        }

        let _ = self.inner.events.send(CacheEvent::Updated(key));
    }

    /// Drops idle entries not read within `gc_after`, except `keep`
    fn collect_unused(&self, slots: &mut HashMap<QueryKey, Slot>, keep: &QueryKey) {
        let gc_after = self.inner.config.gc_after;
        let before = slots.len();
        slots.retain(|key, slot| {
            key == keep || slot.entry.is_fetching || slot.last_read.elapsed() < gc_after
        });

        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, "dropped unused cache entries");
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

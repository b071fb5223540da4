//! Price cache with TTL expiry, an LRU capacity bound, and per-key
//! single-flight fill coordination.
//!
//! The cache is the only shared mutable state in the pipeline. Entries live in
//! an [`lru::LruCache`] behind a short-lived mutex (never held across an
//! await); fill coordination lives in a separate `DashMap` of per-key
//! broadcast channels.
//!
//! # Fill coordination
//!
//! The first caller to observe a miss claims the key's in-flight slot and
//! becomes the sole computer. Every concurrent caller for the same key
//! subscribes to the slot's broadcast channel and receives the identical
//! outcome, success or failure. The slot is removed by an RAII guard, so a
//! leader that panics or is cancelled closes the channel and waiters observe
//! [`InferenceError::Cancelled`] instead of hanging. A failed fill stores
//! nothing: the key remains a miss for the next caller.
//!
//! The `DashMap` entry guard is released before any await. Holding it across
//! an await would serialize unrelated keys that hash to the same shard and
//! can deadlock against the leader's own cleanup.

use crate::features::key::CacheKey;
use crate::inference::InferenceError;
use crate::metrics::MetricsCollector;
use ahash::RandomState;
use dashmap::{mapref::entry::Entry, DashMap};
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Time source for TTL decisions, injected so tests control expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock backed [`Clock`] used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// How a request's price was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a live cache entry.
    Hit,
    /// This request ran the computation.
    Miss,
    /// This request waited on another request's in-flight computation.
    Joined,
}

impl CacheStatus {
    /// Header value for `x-cache-status`.
    #[must_use]
    pub fn as_header_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Joined => "SHARED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header_str())
    }
}

/// One cached prediction. Populated only by the single-flight fill path.
#[derive(Debug, Clone, Copy)]
pub struct CacheEntry {
    pub value: f64,
    pub created_at: Instant,
    pub expires_at: Instant,
}

type FillOutcome = Result<f64, InferenceError>;

/// Removes the in-flight slot when the leader finishes or is dropped.
///
/// Dropping this guard also drops the leader's last broadcast sender clone on
/// the error paths, which closes the channel and releases any waiters.
struct FillGuard<'a> {
    cache: &'a PriceCache,
    key: &'a CacheKey,
}

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        self.cache.inflight.remove(self.key);
    }
}

/// Bounded TTL cache of predicted prices, keyed by [`CacheKey`].
pub struct PriceCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    inflight: DashMap<CacheKey, broadcast::Sender<FillOutcome>, RandomState>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl PriceCache {
    #[must_use]
    pub fn new(ttl: Duration, capacity: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            inflight: DashMap::with_hasher(RandomState::new()),
            clock,
            ttl,
        }
    }

    /// Returns the cached price for `key`, or runs `compute` under
    /// single-flight coordination and caches its result.
    ///
    /// # Errors
    ///
    /// Propagates the computation's [`InferenceError`] to the leader and to
    /// every waiter that joined the same fill. Nothing is cached on failure.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> Result<(f64, CacheStatus), InferenceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FillOutcome>,
    {
        if let Some(value) = self.lookup(key) {
            trace!(key = %key, "cache hit");
            return Ok((value, CacheStatus::Hit));
        }

        enum Role {
            Leader(broadcast::Sender<FillOutcome>),
            Waiter(broadcast::Receiver<FillOutcome>),
        }

        // The entry guard must not outlive this block: subscribing or
        // inserting is all that may happen while the shard lock is held.
        let role = match self.inflight.entry(key.clone()) {
            Entry::Occupied(occupied) => Role::Waiter(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (tx, _) = broadcast::channel(1);
                vacant.insert(tx.clone());
                Role::Leader(tx)
            }
        };

        match role {
            Role::Waiter(mut rx) => match rx.recv().await {
                Ok(Ok(value)) => Ok((value, CacheStatus::Joined)),
                Ok(Err(error)) => Err(error),
                // The leader dropped its sender without broadcasting: it
                // panicked or was cancelled mid-computation.
                Err(_) => Err(InferenceError::Cancelled),
            },
            Role::Leader(tx) => {
                let guard = FillGuard { cache: self, key };

                // Another leader may have filled the entry between our
                // lookup and our claim; don't recompute what is now cached.
                if let Some(value) = self.lookup(key) {
                    drop(guard);
                    let _ = tx.send(Ok(value));
                    return Ok((value, CacheStatus::Hit));
                }

                let outcome = compute().await;
                if let Ok(value) = outcome {
                    self.insert(key.clone(), value);
                }

                // Remove the slot before broadcasting: late arrivals then
                // find either the cached value or a vacant slot, never a
                // channel whose message they missed.
                drop(guard);
                let _ = tx.send(outcome.clone());

                outcome.map(|value| (value, CacheStatus::Miss))
            }
        }
    }

    /// Fresh-entry lookup with lazy expiry: an expired entry is removed and
    /// reported as a miss.
    fn lookup(&self, key: &CacheKey) -> Option<f64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.value),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            trace!(key = %key, "expired entry dropped");
        }
        None
    }

    fn insert(&self, key: CacheKey, value: f64) {
        let now = self.clock.now();
        let entry = CacheEntry { value, created_at: now, expires_at: now + self.ttl };
        self.entries.lock().put(key, entry);
    }

    /// Number of entries currently held, including any not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every expired entry, returning how many were dropped.
    ///
    /// Lazy expiry already guarantees correctness; this only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    /// Starts the periodic expiry sweep, stopped via the shutdown channel.
    pub fn start_expiry_sweep(
        self: &Arc<Self>,
        interval: Duration,
        metrics: Arc<MetricsCollector>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("expiry sweep shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        metrics.record_cache_entries(cache.len());
                        if removed > 0 {
                            debug!(removed, "expiry sweep reclaimed entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{tests::sample_record, FeatureRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { base: Instant::now(), offset: Mutex::new(Duration::ZERO) }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock()
        }
    }

    fn cache_with_clock(
        ttl: Duration,
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Arc<PriceCache> {
        Arc::new(PriceCache::new(ttl, NonZeroUsize::new(capacity).unwrap(), clock))
    }

    fn key_for(record: &FeatureRecord) -> CacheKey {
        CacheKey::from_record(record)
    }

    fn nth_key(n: u64) -> CacheKey {
        let mut record = sample_record();
        record.km_driven = n;
        key_for(&record)
    }

    #[tokio::test]
    async fn test_hit_within_ttl_skips_compute() {
        let cache =
            cache_with_clock(Duration::from_secs(60), 16, Arc::new(SystemClock));
        let key = nth_key(1);
        let calls = AtomicUsize::new(0);

        let (value, status) = cache
            .get_or_compute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42.5)
            })
            .await
            .unwrap();
        assert_eq!(value, 42.5);
        assert_eq!(status, CacheStatus::Miss);

        let (value, status) = cache
            .get_or_compute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(99.9)
            })
            .await
            .unwrap();
        assert_eq!(value, 42.5);
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entry_not_served_after_expiry() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with_clock(Duration::from_secs(30), 16, clock.clone());
        let key = nth_key(2);
        let calls = AtomicUsize::new(0);

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(10.0)
        };
        cache.get_or_compute(&key, compute).await.unwrap();

        clock.advance(Duration::from_secs(31));

        let (_, status) = cache
            .get_or_compute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(11.0)
            })
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "expiry must trigger exactly one recompute");
    }

    #[tokio::test]
    async fn test_entry_still_fresh_just_before_expiry() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with_clock(Duration::from_secs(30), 16, clock.clone());
        let key = nth_key(3);

        cache.get_or_compute(&key, || async { Ok(5.0) }).await.unwrap();
        clock.advance(Duration::from_secs(29));

        let (value, status) =
            cache.get_or_compute(&key, || async { Ok(6.0) }).await.unwrap();
        assert_eq!(value, 5.0);
        assert_eq!(status, CacheStatus::Hit);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_runs_compute_once() {
        let cache =
            cache_with_clock(Duration::from_secs(60), 16, Arc::new(SystemClock));
        let key = nth_key(4);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&key, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(77.0)
                    })
                    .await
            }));
        }

        for handle in handles {
            let (value, _) = handle.await.unwrap().unwrap();
            assert_eq!(value, 77.0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one computation per key");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiters_share_the_leaders_failure() {
        let cache =
            cache_with_clock(Duration::from_secs(60), 16, Arc::new(SystemClock));
        let key = nth_key(5);

        let leader = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key, || async {
                        tokio::time::sleep(Duration::from_millis(80)).await;
                        Err(InferenceError::ModelFailure("weights corrupted".to_string()))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                cache.get_or_compute(&key, || async { Ok(1.0) }).await
            })
        };

        assert!(matches!(
            leader.await.unwrap(),
            Err(InferenceError::ModelFailure(_))
        ));
        assert!(matches!(
            waiter.await.unwrap(),
            Err(InferenceError::ModelFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_the_key() {
        let cache =
            cache_with_clock(Duration::from_secs(60), 16, Arc::new(SystemClock));
        let key = nth_key(6);
        let calls = AtomicUsize::new(0);

        let result = cache
            .get_or_compute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(InferenceError::ModelFailure("transient".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty(), "failed fill must not be cached");

        let (value, status) = cache
            .get_or_compute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(64.0)
            })
            .await
            .unwrap();
        assert_eq!(value, 64.0);
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_leader_releases_waiters() {
        let cache =
            cache_with_clock(Duration::from_secs(60), 16, Arc::new(SystemClock));
        let key = nth_key(7);

        let leader = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1.0)
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;

        let waiter = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                cache.get_or_compute(&key, || async { Ok(2.0) }).await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        leader.abort();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(InferenceError::Cancelled)));
        assert!(cache.is_empty(), "aborted fill must not populate the cache");
    }

    async fn fill_counted(
        cache: &PriceCache,
        key: &CacheKey,
        calls: &AtomicUsize,
        price: f64,
    ) -> (f64, CacheStatus) {
        cache
            .get_or_compute(key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(price)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lru_capacity_evicts_least_recent() {
        let cache =
            cache_with_clock(Duration::from_secs(60), 2, Arc::new(SystemClock));
        let calls = AtomicUsize::new(0);

        fill_counted(&cache, &nth_key(10), &calls, 1.0).await;
        fill_counted(&cache, &nth_key(11), &calls, 2.0).await;
        // Touch key 10 so key 11 becomes the eviction candidate.
        fill_counted(&cache, &nth_key(10), &calls, 1.0).await;
        fill_counted(&cache, &nth_key(12), &calls, 3.0).await;
        assert_eq!(cache.len(), 2);

        let (_, status) = fill_counted(&cache, &nth_key(11), &calls, 2.0).await;
        assert_eq!(status, CacheStatus::Miss, "evicted key must recompute");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share_fills() {
        let cache =
            cache_with_clock(Duration::from_secs(60), 16, Arc::new(SystemClock));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for n in 0..4 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&nth_key(100 + n), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(f64::from(u32::try_from(n).unwrap()))
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_purge_expired_reclaims_only_stale_entries() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with_clock(Duration::from_secs(30), 16, clock.clone());

        cache.get_or_compute(&nth_key(20), || async { Ok(1.0) }).await.unwrap();
        clock.advance(Duration::from_secs(20));
        cache.get_or_compute(&nth_key(21), || async { Ok(2.0) }).await.unwrap();
        clock.advance(Duration::from_secs(15));

        // Key 20 is now 35s old (expired); key 21 is 15s old (fresh).
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}

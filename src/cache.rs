//! TTL cache with single-flight fills.
//!
//! The first caller that misses on a key registers it as in flight and starts the fill; later
//! callers for the same key subscribe to that fill instead of starting their own. Entries expire
//! lazily on read. The entry map and the in-flight registry live under one mutex so the
//! miss-check and the in-flight registration are a single step.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ForecastError, Result};

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

#[derive(Debug, Clone)]
enum FillState<V> {
    Pending,
    Done(V),
    Failed(ForecastError),
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    in_flight: HashMap<K, watch::Receiver<FillState<V>>>,
}

type Shared<K, V> = Arc<Mutex<CacheState<K, V>>>;

fn lock<K, V>(shared: &Mutex<CacheState<K, V>>) -> MutexGuard<'_, CacheState<K, V>> {
    // State is only replaced wholesale under the lock, so a poisoned guard is still consistent.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove the in-flight mark for `key` only if it still belongs to the fill behind `own`. A
/// later fill may have registered the key once this one released it.
fn release<K: Eq + Hash, V>(
    state: &mut CacheState<K, V>,
    key: &K,
    own: &watch::Receiver<FillState<V>>,
) {
    if state
        .in_flight
        .get(key)
        .is_some_and(|registered| registered.same_channel(own))
    {
        state.in_flight.remove(key);
    }
}

/// Clears this fill's in-flight mark if the fill task unwinds before completing.
struct InFlightGuard<K: Eq + Hash, V> {
    shared: Shared<K, V>,
    key: K,
    own: watch::Receiver<FillState<V>>,
}

impl<K: Eq + Hash, V> Drop for InFlightGuard<K, V> {
    fn drop(&mut self) {
        release(&mut lock(&self.shared), &self.key, &self.own);
    }
}

#[derive(Clone)]
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    shared: Shared<K, V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            shared: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            })),
        }
    }

    /// Fresh value for `key`, without fetching.
    pub fn peek(&self, key: &K) -> Option<V> {
        let state = lock(&self.shared);
        state
            .entries
            .get(key)
            .filter(|e| e.is_fresh(self.ttl, Instant::now()))
            .map(|e| e.value.clone())
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.shared).in_flight.contains_key(key)
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        lock(&self.shared).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored entry. Fills already in flight still store their result.
    pub fn clear(&self) -> usize {
        let mut state = lock(&self.shared);
        let n = state.entries.len();
        state.entries.clear();
        n
    }

    /// Cached value if fresh; otherwise join the in-flight fill for `key`, or start one with
    /// `fill`. A failed fill is reported to every caller waiting on it and leaves no entry.
    pub async fn get_or_fill<F, Fut>(&self, key: K, fill: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut rx = {
            let mut state = lock(&self.shared);
            if let Some(entry) = state.entries.get(&key) {
                if entry.is_fresh(self.ttl, Instant::now()) {
                    tracing::debug!(cache = self.name, key = ?key, "cache hit");
                    return Ok(entry.value.clone());
                }
            }
            match state.in_flight.get(&key) {
                Some(rx) => {
                    tracing::debug!(cache = self.name, key = ?key, "joining in-flight fill");
                    rx.clone()
                }
                None => {
                    tracing::info!(cache = self.name, key = ?key, "cache miss, filling");
                    let (tx, rx) = watch::channel(FillState::Pending);
                    state.in_flight.insert(key.clone(), rx.clone());
                    self.spawn_fill(key.clone(), tx, rx.clone(), fill());
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(|s| !matches!(s, FillState::Pending))
            .await
            .map(|s| s.clone());
        match outcome {
            Ok(FillState::Done(value)) => Ok(value),
            Ok(FillState::Failed(e)) => Err(e),
            Ok(FillState::Pending) | Err(_) => Err(ForecastError::Fetch(format!(
                "{} fill for {:?} ended without a result",
                self.name, key
            ))),
        }
    }

    fn spawn_fill<Fut>(
        &self,
        key: K,
        tx: watch::Sender<FillState<V>>,
        own: watch::Receiver<FillState<V>>,
        fut: Fut,
    ) where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let name = self.name;
        let guard = InFlightGuard {
            shared: Arc::clone(&self.shared),
            key,
            own,
        };
        tokio::spawn(async move {
            let started = Instant::now();
            let result = fut.await;
            let outcome = {
                let mut state = lock(&guard.shared);
                release(&mut state, &guard.key, &guard.own);
                match result {
                    Ok(value) => {
                        state.entries.insert(
                            guard.key.clone(),
                            CacheEntry {
                                value: value.clone(),
                                fetched_at: Instant::now(),
                            },
                        );
                        tracing::info!(
                            cache = name,
                            key = ?guard.key,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "cache filled"
                        );
                        FillState::Done(value)
                    }
                    Err(e) => {
                        tracing::warn!(cache = name, key = ?guard.key, error = %e, "cache fill failed");
                        FillState::Failed(e)
                    }
                }
            };
            tx.send_replace(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fill(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<u32>> + Send>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(value) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_read_within_ttl_is_a_hit() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(cache.get_or_fill("k", counting_fill(&calls, 1)).await, Ok(1));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get_or_fill("k", counting_fill(&calls, 2)).await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_replaced() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        cache.get_or_fill("k", counting_fill(&calls, 1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.peek(&"k"), None);
        assert_eq!(cache.get_or_fill("k", counting_fill(&calls, 2)).await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failed_fill_clears_in_flight_and_stores_nothing() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test", Duration::from_secs(60));
        let err = cache
            .get_or_fill("k", || async { Err(ForecastError::Fetch("down".into())) })
            .await
            .unwrap_err();
        assert_eq!(err, ForecastError::Fetch("down".into()));
        assert!(!cache.is_in_flight(&"k"));
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_fill("k", || async { Ok(7) }).await, Ok(7));
    }

    #[tokio::test]
    async fn panicking_fill_does_not_leave_key_in_flight() {
        let cache: TtlCache<&str, u32> = TtlCache::new("test", Duration::from_secs(60));
        let res = cache
            .get_or_fill("k", || async {
                if true {
                    panic!("fill exploded");
                }
                Ok(0)
            })
            .await;
        assert!(matches!(res, Err(ForecastError::Fetch(_))));
        assert!(!cache.is_in_flight(&"k"));
    }

    /// Drives `get_or_fill` on one key from many tasks and returns the peak number of fills
    /// that were running at the same time.
    async fn peak_concurrent_fills(
        cache: TtlCache<&'static str, u32>,
        tasks: usize,
        rounds: usize,
    ) -> usize {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..tasks {
            let cache = cache.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                for _ in 0..rounds {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    cache
                        .get_or_fill("k", move || async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(1)
                        })
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn back_to_back_fills_never_overlap_with_zero_ttl() {
        let cache = TtlCache::new("test", Duration::ZERO);
        assert_eq!(peak_concurrent_fills(cache.clone(), 8, 2_000).await, 1);
        assert!(!cache.is_in_flight(&"k"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn refills_after_clear_never_overlap() {
        let cache = TtlCache::new("test", Duration::from_secs(3600));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let clearer = {
            let cache = cache.clone();
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    cache.clear();
                    tokio::task::yield_now().await;
                }
            })
        };
        let peak = peak_concurrent_fills(cache.clone(), 8, 2_000).await;
        stop.store(true, Ordering::SeqCst);
        clearer.await.unwrap();
        assert_eq!(peak, 1);
    }

    #[tokio::test]
    async fn clear_reports_removed_entries() {
        let cache = TtlCache::new("test", Duration::from_secs(60));
        cache.get_or_fill("a", || async { Ok(1) }).await.unwrap();
        cache.get_or_fill("b", || async { Ok(2) }).await.unwrap();
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }
}

//! # Model Cache
//!
//! Holds the live instances of one model kind and guarantees that each
//! [`CacheKey`] is initialized at most once, no matter how many requests ask for
//! it at the same time.
//!
//! ## Acquisition (double-checked):
//! 1. **Fast path**: look the key up in the concurrent map. A warm hit returns
//!    immediately without touching any per-key lock.
//! 2. **Slow path**: take the key's lock and look again, since another caller
//!    may have finished initializing while we waited.
//! 3. **Cold initialization**: still absent, so run the initializer. It runs on
//!    its own task which owns the key lock, so it always completes even if the
//!    caller that triggered it goes away. Failures are never stored.
//!
//! ## Leases:
//! Every successful `acquire` returns a [`ModelLease`]. The slot counts
//! outstanding leases, and `release` defers teardown until the count for the
//! removed instance drops to zero. The key stays locked until teardown is
//! done, so at most one instance per key ever holds device memory. Requests
//! for the key that arrive meanwhile wait and then initialize a fresh one.
//!
//! ## Memory visibility:
//! The map is a `DashMap`. Lookups and insertions go through its shard locks,
//! which is what gives a fast-path reader a fully constructed instance.

use crate::cache::error::CacheError;
use crate::cache::key::CacheKey;
use crate::cache::locks::KeyedLocks;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Teardown operation invoked on release. May fail; failures are logged.
pub type TeardownFn<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// One resident instance and its bookkeeping.
struct Slot<T> {
    instance: T,
    loaded_at: DateTime<Utc>,
    /// Number of outstanding leases.
    leases: watch::Sender<usize>,
}

impl<T> Slot<T> {
    fn new(instance: T) -> Self {
        let (leases, _) = watch::channel(0);
        Self {
            instance,
            loaded_at: Utc::now(),
            leases,
        }
    }

    fn in_flight(&self) -> usize {
        *self.leases.borrow()
    }
}

/// A checked-out model instance.
///
/// Dereferences to the instance. Dropping the lease tells the cache the caller
/// is done with it.
pub struct ModelLease<T> {
    slot: Arc<Slot<T>>,
}

impl<T> ModelLease<T> {
    fn checkout(slot: Arc<Slot<T>>) -> Self {
        slot.leases.send_modify(|count| *count += 1);
        Self { slot }
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.slot.loaded_at
    }

    /// Whether two leases refer to the same physical instance.
    pub fn same_instance(&self, other: &ModelLease<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T> fmt::Debug for ModelLease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLease")
            .field("loaded_at", &self.slot.loaded_at)
            .field("in_flight", &self.slot.in_flight())
            .finish()
    }
}

impl<T> Deref for ModelLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot.instance
    }
}

impl<T> Drop for ModelLease<T> {
    fn drop(&mut self) {
        self.slot
            .leases
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Snapshot of one resident instance, for listings.
#[derive(Debug, Clone)]
pub struct ResidentModel {
    pub key: CacheKey,
    pub loaded_at: DateTime<Utc>,
    pub in_flight: usize,
}

struct Shared<T> {
    slots: DashMap<CacheKey, Arc<Slot<T>>>,
    locks: KeyedLocks,
    teardown: TeardownFn<T>,
}

impl<T> Shared<T> {
    /// Look up `key` and check out a lease while the map's shard lock is held,
    /// so a concurrent `release` either sees the lease or we see no slot.
    fn checkout(&self, key: &CacheKey) -> Option<ModelLease<T>> {
        self.slots
            .get(key)
            .map(|slot| ModelLease::checkout(Arc::clone(slot.value())))
    }
}

/// Cache of live model instances for one kind.
pub struct ModelCache<T> {
    name: &'static str,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ModelCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ModelCache<T>
where
    T: Send + Sync + 'static,
{
    /// Create an empty cache. `name` only appears in logs.
    pub fn new(name: &'static str, teardown: TeardownFn<T>) -> Self {
        Self {
            name,
            shared: Arc::new(Shared {
                slots: DashMap::new(),
                locks: KeyedLocks::new(),
                teardown,
            }),
        }
    }

    /// Return the instance for `key`, running `initializer` if it is not
    /// resident yet.
    ///
    /// ## Guarantees:
    /// - at most one initializer runs per key at a time, and none runs once the
    ///   key is resident
    /// - callers for other keys are never blocked by this key's initializer
    /// - a failed initialization is reported to this caller only and leaves the
    ///   slot empty for the next caller to retry
    pub async fn acquire<F, Fut>(
        &self,
        key: &CacheKey,
        initializer: F,
    ) -> Result<ModelLease<T>, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if let Some(lease) = self.shared.checkout(key) {
            debug!(cache = self.name, key = %key, "warm hit");
            return Ok(lease);
        }

        let guard = self.shared.locks.lock_for(key).acquire().await;

        if let Some(lease) = self.shared.checkout(key) {
            debug!(cache = self.name, key = %key, "initialized by a concurrent caller");
            return Ok(lease);
        }

        let shared = Arc::clone(&self.shared);
        let task_key = key.clone();
        let cache = self.name;
        let task = tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            info!(cache, key = %task_key, "cold initialization");

            let instance = initializer().await?;
            let slot = Arc::new(Slot::new(instance));
            let lease = ModelLease::checkout(Arc::clone(&slot));
            shared.slots.insert(task_key.clone(), slot);

            info!(
                cache,
                key = %task_key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "model initialized"
            );
            Ok::<_, anyhow::Error>(lease)
        });

        match task.await {
            Ok(Ok(lease)) => Ok(lease),
            Ok(Err(e)) => {
                let reason = format!("{:#}", e);
                warn!(cache = self.name, key = %key, %reason, "initialization failed");
                Err(CacheError::ModelInitialization {
                    key: key.to_string(),
                    reason,
                })
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    "initializer panicked".to_string()
                } else {
                    "initialization task was cancelled".to_string()
                };
                warn!(cache = self.name, key = %key, %reason, "initialization failed");
                Err(CacheError::ModelInitialization {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }

    /// Remove `key` and tear its instance down.
    ///
    /// Returns `false` if the key was not resident. The key's lock is held
    /// until teardown has finished, so a concurrent `acquire` of the same key
    /// waits instead of loading a second copy next to the one being retired.
    /// Teardown itself waits for outstanding leases. A caller must not hold a
    /// lease for `key` while it re-acquires `key` during a release.
    ///
    /// Teardown failures are logged and swallowed: the slot is gone either way.
    pub async fn release(&self, key: &CacheKey) -> bool {
        let guard = self.shared.locks.lock_for(key).acquire().await;

        let Some((key, slot)) = self.shared.slots.remove(key) else {
            debug!(cache = self.name, key = %key, "release of non-resident model ignored");
            return false;
        };

        let teardown = Arc::clone(&self.shared.teardown);
        let cache = self.name;
        // Runs on its own task so teardown completes even if this caller is dropped.
        let task = tokio::spawn(async move {
            let _guard = guard;
            retire(cache, teardown, key, slot).await;
        });
        if let Err(e) = task.await {
            warn!(cache = self.name, error = %e, "retire task failed");
        }
        true
    }

    /// Release every resident key matching `predicate`. Returns how many were
    /// released. Releases run concurrently and independently.
    pub async fn release_all<P>(&self, predicate: P) -> usize
    where
        P: Fn(&CacheKey) -> bool,
    {
        let keys: Vec<CacheKey> = self
            .shared
            .slots
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        join_all(keys.iter().map(|key| self.release(key)))
            .await
            .into_iter()
            .filter(|released| *released)
            .count()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.shared.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.slots.is_empty()
    }

    pub fn resident(&self) -> Vec<ResidentModel> {
        self.shared
            .slots
            .iter()
            .map(|entry| ResidentModel {
                key: entry.key().clone(),
                loaded_at: entry.value().loaded_at,
                in_flight: entry.value().in_flight(),
            })
            .collect()
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.shared.locks.len()
    }
}

/// Wait for the slot's leases to drain, then run teardown on a blocking thread.
async fn retire<T>(cache: &'static str, teardown: TeardownFn<T>, key: CacheKey, slot: Arc<Slot<T>>)
where
    T: Send + Sync + 'static,
{
    let in_flight = slot.in_flight();
    if in_flight > 0 {
        info!(cache, key = %key, in_flight, "waiting for in-flight requests before teardown");
        let mut leases = slot.leases.subscribe();
        // The sender lives in `slot`, so this only returns once the count hits zero.
        let _ = leases.wait_for(|count| *count == 0).await;
    }

    let result = tokio::task::spawn_blocking(move || teardown(&slot.instance)).await;

    match result {
        Ok(Ok(())) => info!(cache, key = %key, "model released"),
        Ok(Err(e)) => warn!(
            cache,
            key = %key,
            error = ?e,
            "teardown failed, slot cleared anyway"
        ),
        Err(e) => warn!(
            cache,
            key = %key,
            error = %e,
            "teardown panicked, slot cleared anyway"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{DeviceSpec, ModelKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct TestModel {
        id: usize,
    }

    fn key(name: &str, device: DeviceSpec) -> CacheKey {
        CacheKey::build(ModelKind::Transcription, name, device, "float16", Vec::new(), 2).unwrap()
    }

    fn counting_cache() -> (ModelCache<TestModel>, Arc<AtomicUsize>) {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&teardowns);
        let cache = ModelCache::new(
            "test",
            Arc::new(move |_: &TestModel| -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        (cache, teardowns)
    }

    /// Initializer that records its invocations and takes `delay` to finish.
    fn recording_init(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<TestModel>> + Send>>
           + Send
           + 'static {
        let calls = Arc::clone(calls);
        move || {
            Box::pin(async move {
                let id = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(TestModel { id })
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_initialization() {
        let (cache, _) = counting_cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = key("large-v3", DeviceSpec::Gpu(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let key = key.clone();
            let init = recording_init(&calls, Duration::from_millis(50));
            handles.push(tokio::spawn(async move { cache.acquire(&key, init).await }));
        }

        let mut leases = Vec::new();
        for handle in handles {
            leases.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(leases.iter().all(|lease| lease.id == 1));
        assert!(leases.iter().all(|lease| lease.same_instance(&leases[0])));
        assert_eq!(cache.resident()[0].in_flight, 50);
    }

    #[tokio::test]
    async fn test_failures_are_retried_and_never_cached() {
        let (cache, _) = counting_cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = key("base", DeviceSpec::Cpu);

        for attempt in 1..=3 {
            let calls = Arc::clone(&calls);
            let result = cache
                .acquire(&key, move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 2 {
                        anyhow::bail!("device out of memory (attempt {})", n);
                    }
                    Ok(TestModel { id: n })
                })
                .await;

            if attempt <= 2 {
                assert!(matches!(result, Err(CacheError::ModelInitialization { .. })));
                assert!(!cache.contains(&key));
            } else {
                assert_eq!(result.unwrap().id, 3);
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_retried_by_waiters() {
        let (cache, _) = counting_cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = key("base", DeviceSpec::Cpu);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let key = key.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .acquire(&key, move || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        if n <= 2 {
                            anyhow::bail!("transient failure {}", n);
                        }
                        Ok(TestModel { id: n })
                    })
                    .await
            }));
        }

        let mut failures = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(lease) => assert_eq!(lease.id, 3),
                Err(_) => failures += 1,
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failures, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_keys_do_not_block_each_other() {
        let (cache, _) = counting_cache();
        let gpu_key = key("large-v3", DeviceSpec::Gpu(0));
        let cpu_key = key("large-v3", DeviceSpec::Cpu);
        let (release_slow, slow_gate) = oneshot::channel::<()>();

        let slow_cache = cache.clone();
        let slow = tokio::spawn(async move {
            slow_cache
                .acquire(&gpu_key, move || async move {
                    let _ = slow_gate.await;
                    Ok(TestModel { id: 1 })
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = tokio::time::timeout(
            Duration::from_secs(2),
            cache.acquire(&cpu_key, || async { Ok(TestModel { id: 2 }) }),
        )
        .await
        .expect("fast key must not wait for the slow key")
        .unwrap();

        assert_eq!(fast.id, 2);
        assert!(!slow.is_finished());

        release_slow.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_release_then_acquire_initializes_again() {
        let (cache, teardowns) = counting_cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = key("base", DeviceSpec::Cpu);

        let first = cache.acquire(&key, recording_init(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(first.id, 1);
        drop(first);

        assert!(cache.release(&key).await);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        let second = cache.acquire(&key, recording_init(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_release_of_absent_key_is_noop() {
        let (cache, teardowns) = counting_cache();
        assert!(!cache.release(&key("base", DeviceSpec::Cpu)).await);
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teardown_failure_still_clears_slot() {
        let cache: ModelCache<TestModel> = ModelCache::new(
            "failing",
            Arc::new(|_: &TestModel| -> anyhow::Result<()> {
                anyhow::bail!("cannot move weights off device")
            }),
        );
        let key = key("base", DeviceSpec::Cpu);
        drop(cache.acquire(&key, || async { Ok(TestModel { id: 1 }) }).await.unwrap());

        assert!(cache.release(&key).await);
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn test_teardown_panic_still_clears_slot() {
        let cache: ModelCache<TestModel> = ModelCache::new(
            "panicking",
            Arc::new(|_: &TestModel| -> anyhow::Result<()> { panic!("driver crashed") }),
        );
        let key = key("base", DeviceSpec::Cpu);
        drop(cache.acquire(&key, || async { Ok(TestModel { id: 1 }) }).await.unwrap());

        assert!(cache.release(&key).await);
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_teardown_waits_for_outstanding_leases() {
        let (cache, teardowns) = counting_cache();
        let key = key("base", DeviceSpec::Cpu);
        let lease = cache.acquire(&key, || async { Ok(TestModel { id: 1 }) }).await.unwrap();

        let releasing = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.release(&key).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cache.contains(&key), "slot is removed immediately");
        assert_eq!(teardowns.load(Ordering::SeqCst), 0, "teardown is deferred");
        assert_eq!(lease.id, 1);

        drop(lease);
        assert!(releasing.await.unwrap());
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    /// Initializer that counts live instances and records the highest count.
    fn tracked_init(
        live: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
        id: usize,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<TestModel>> + Send>>
           + Send
           + 'static {
        let live = Arc::clone(live);
        let peak = Arc::clone(peak);
        move || {
            Box::pin(async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                Ok(TestModel { id })
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reacquire_during_release_never_duplicates_instance() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cache: ModelCache<TestModel> = {
            let live = Arc::clone(&live);
            ModelCache::new(
                "single",
                Arc::new(move |_: &TestModel| -> anyhow::Result<()> {
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
        };
        let key = key("large-v3", DeviceSpec::Gpu(0));

        let lease = cache.acquire(&key, tracked_init(&live, &peak, 1)).await.unwrap();

        let releasing = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.release(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reacquiring = {
            let cache = cache.clone();
            let key = key.clone();
            let init = tracked_init(&live, &peak, 2);
            tokio::spawn(async move { cache.acquire(&key, init).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!reacquiring.is_finished(), "acquire waits for the retiring instance");
        assert_eq!(live.load(Ordering::SeqCst), 1);

        drop(lease);
        assert!(releasing.await.unwrap());
        let second = reacquiring.await.unwrap().unwrap();

        assert_eq!(second.id, 2);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(cache.lock_entries(), 0);
    }

    #[tokio::test]
    async fn test_other_keys_are_served_during_release() {
        let (cache, _) = counting_cache();
        let gpu_key = key("large-v3", DeviceSpec::Gpu(0));
        let cpu_key = key("large-v3", DeviceSpec::Cpu);
        let lease = cache.acquire(&gpu_key, || async { Ok(TestModel { id: 1 }) }).await.unwrap();

        let releasing = {
            let cache = cache.clone();
            let key = gpu_key.clone();
            tokio::spawn(async move { cache.release(&key).await })
        };
        tokio::task::yield_now().await;

        let other = tokio::time::timeout(
            Duration::from_secs(2),
            cache.acquire(&cpu_key, || async { Ok(TestModel { id: 2 }) }),
        )
        .await
        .expect("other key must not wait for a release")
        .unwrap();
        assert_eq!(other.id, 2);

        drop(lease);
        assert!(releasing.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_caller_does_not_cancel_initialization() {
        let (cache, _) = counting_cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = key("base", DeviceSpec::Cpu);
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (finish_tx, finish_rx) = oneshot::channel::<()>();

        let caller = {
            let cache = cache.clone();
            let key = key.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .acquire(&key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = started_tx.send(());
                        let _ = finish_rx.await;
                        Ok(TestModel { id: 1 })
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        caller.abort();
        let _ = caller.await;
        finish_tx.send(()).unwrap();

        let lease = cache
            .acquire(&key, recording_init(&calls, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(lease.id, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_all_with_predicate() {
        let (cache, teardowns) = counting_cache();
        for (name, device) in [
            ("base", DeviceSpec::Cpu),
            ("small", DeviceSpec::Cpu),
            ("base", DeviceSpec::Gpu(1)),
        ] {
            let key = key(name, device);
            drop(cache.acquire(&key, || async { Ok(TestModel { id: 0 }) }).await.unwrap());
        }

        let released = cache
            .release_all(|key| key.device() == DeviceSpec::Cpu)
            .await;
        assert_eq!(released, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key("base", DeviceSpec::Gpu(1))));
        assert_eq!(teardowns.load(Ordering::SeqCst), 2);

        assert_eq!(cache.release_all(|_| true).await, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_lock_table_does_not_grow_unbounded() {
        let (cache, _) = counting_cache();
        for name in ["tiny", "base", "small", "medium"] {
            let key = key(name, DeviceSpec::Cpu);
            drop(cache.acquire(&key, || async { Ok(TestModel { id: 0 }) }).await.unwrap());
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.lock_entries(), 0);
    }
}

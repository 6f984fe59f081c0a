//! Integration tests for the single-flight cache-aside layer
//!
//! These tests verify:
//! - At-most-once acquisition for sequential, mixed and concurrent callers
//! - Caching of absent results
//! - Type-scoped clear
//! - Error propagation and retry after a failed acquisition
//! - Expiration policies reaching the store unchanged
//! - Explicit type tags shared across cache fronts

use futures::future::join_all;
use ouroboros_cache::cache::key;
use ouroboros_cache::{
    CacheError, CacheKey, CacheStore, CacheValue, ExpirationPolicy, KeyedLocks, MemoryStore,
    SingleFlightCache, TypeTag,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Person {
    name: String,
    age: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct Company {
    name: String,
}

/// Counts how often each acquisition path is taken
struct PersonAcquirer {
    person: Option<Arc<Person>>,
    calls: AtomicUsize,
    async_calls: AtomicUsize,
}

impl PersonAcquirer {
    fn new() -> Self {
        Self {
            person: Some(Arc::new(Person {
                name: "John Doe".to_string(),
                age: 35,
            })),
            calls: AtomicUsize::new(0),
            async_calls: AtomicUsize::new(0),
        }
    }

    fn finding_nobody() -> Self {
        Self {
            person: None,
            ..Self::new()
        }
    }

    fn acquire(&self) -> anyhow::Result<Option<Arc<Person>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.person.clone())
    }

    async fn acquire_async(&self) -> anyhow::Result<Option<Arc<Person>>> {
        self.async_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.person.clone())
    }

    async fn long_running_acquire_async(&self) -> anyhow::Result<Option<Arc<Person>>> {
        self.async_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(self.person.clone())
    }

    fn long_running_acquire(&self) -> anyhow::Result<Option<Arc<Person>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(200));
        Ok(self.person.clone())
    }

    fn total_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst) + self.async_calls.load(Ordering::SeqCst)
    }
}

fn create_cache() -> SingleFlightCache<MemoryStore> {
    SingleFlightCache::with_locks(MemoryStore::default(), Arc::new(KeyedLocks::new()))
}

#[test]
fn test_get_twice_acquires_once() {
    let acquirer = PersonAcquirer::new();
    let cache = create_cache();

    let first = cache.get("FindPerson", || acquirer.acquire()).unwrap();
    let second = cache.get("FindPerson", || acquirer.acquire()).unwrap();

    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
}

#[tokio::test]
async fn test_sync_then_async_acquires_once() {
    let acquirer = Arc::new(PersonAcquirer::new());
    let cache = Arc::new(create_cache());

    let first = {
        let cache = Arc::clone(&cache);
        let acquirer = Arc::clone(&acquirer);
        tokio::task::spawn_blocking(move || cache.get("FindPerson", || acquirer.acquire()))
            .await
            .unwrap()
            .unwrap()
    };
    let second = cache
        .get_async("FindPerson", || acquirer.acquire_async())
        .await
        .unwrap();

    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(acquirer.async_calls.load(Ordering::SeqCst), 0);
    assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
}

#[test]
fn test_sync_then_async_without_runtime() {
    let acquirer = PersonAcquirer::new();
    let cache = create_cache();

    let first = cache.get("FindPerson", || acquirer.acquire()).unwrap();
    let second = tokio_test::block_on(cache.get_async("FindPerson", || acquirer.acquire_async()))
        .unwrap();

    assert_eq!(acquirer.total_calls(), 1);
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_gets_acquire_once() {
    let acquirer = Arc::new(PersonAcquirer::new());
    let cache = Arc::new(create_cache());

    let tasks = (0..10).map(|_| {
        let cache = Arc::clone(&cache);
        let acquirer = Arc::clone(&acquirer);
        tokio::spawn(async move {
            cache
                .get_async("FindPerson", || acquirer.long_running_acquire_async())
                .await
        })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().unwrap())
        .collect();

    assert_eq!(acquirer.total_calls(), 1);
    assert_eq!(cache.acquisitions(), 1);
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|person| Arc::ptr_eq(person, &results[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_blocking_and_async_gets_acquire_once() {
    let acquirer = Arc::new(PersonAcquirer::new());
    let cache = Arc::new(create_cache());

    let blocking: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let acquirer = Arc::clone(&acquirer);
            tokio::task::spawn_blocking(move || {
                cache.get("FindPerson", || acquirer.long_running_acquire())
            })
        })
        .collect();

    let suspending: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let acquirer = Arc::clone(&acquirer);
            tokio::spawn(async move {
                cache
                    .get_async("FindPerson", || acquirer.long_running_acquire_async())
                    .await
            })
        })
        .collect();

    for result in join_all(blocking).await {
        assert!(result.unwrap().unwrap().is_some());
    }
    for result in join_all(suspending).await {
        assert!(result.unwrap().unwrap().is_some());
    }

    assert_eq!(acquirer.total_calls(), 1);
}

#[test]
fn test_absent_result_is_cached() {
    let acquirer = PersonAcquirer::finding_nobody();
    let cache = create_cache();

    assert!(cache.get("FindPerson", || acquirer.acquire()).unwrap().is_none());
    assert!(cache.get("FindPerson", || acquirer.acquire()).unwrap().is_none());

    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 1);
    assert!(cache.is_set::<Arc<Person>>("FindPerson").unwrap());
}

#[tokio::test]
async fn test_absent_result_is_cached_async() {
    let acquirer = PersonAcquirer::finding_nobody();
    let cache = create_cache();

    let first = cache
        .get_async("FindPerson", || acquirer.acquire_async())
        .await
        .unwrap();
    let second = cache
        .get_async("FindPerson", || acquirer.acquire_async())
        .await
        .unwrap();

    assert!(first.is_none());
    assert!(second.is_none());
    assert_eq!(acquirer.async_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_clear_is_scoped_to_type() {
    let cache = create_cache();
    let person_calls = AtomicUsize::new(0);
    let company_calls = AtomicUsize::new(0);

    let get_person = || {
        cache.get("acme", || {
            person_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(Some(Person {
                name: "Wile E.".to_string(),
                age: 70,
            }))
        })
    };
    let get_company = || {
        cache.get("acme", || {
            company_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(Some(Company {
                name: "ACME".to_string(),
            }))
        })
    };

    get_person().unwrap();
    get_company().unwrap();

    let event = cache.clear::<Person>().unwrap();
    assert_eq!(event.keys.len(), 1);
    assert!(!cache.is_set::<Person>("acme").unwrap());
    assert!(cache.is_set::<Company>("acme").unwrap());

    get_person().unwrap();
    let company = get_company().unwrap().unwrap();

    assert_eq!(person_calls.load(Ordering::SeqCst), 2);
    assert_eq!(company_calls.load(Ordering::SeqCst), 1);
    assert_eq!(company.name, "ACME");
}

#[test]
fn test_remove_forces_reacquisition() {
    let acquirer = PersonAcquirer::new();
    let cache = create_cache();

    cache.get("FindPerson", || acquirer.acquire()).unwrap();
    assert!(cache.remove::<Arc<Person>>("FindPerson").unwrap());
    assert!(!cache.is_set::<Arc<Person>>("FindPerson").unwrap());

    cache.get("FindPerson", || acquirer.acquire()).unwrap();
    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiter_retries_after_failed_acquisition() {
    let cache = Arc::new(create_cache());
    let attempts = Arc::new(AtomicUsize::new(0));

    let failing = {
        let cache = Arc::clone(&cache);
        let attempts = Arc::clone(&attempts);
        tokio::spawn(async move {
            cache
                .get_async::<u32, _, _, _>("flaky", || async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err(anyhow::anyhow!("upstream timeout"))
                })
                .await
        })
    };

    // Let the failing caller take the lock first
    tokio::time::sleep(Duration::from_millis(20)).await;

    let waiting = {
        let cache = Arc::clone(&cache);
        let attempts = Arc::clone(&attempts);
        tokio::spawn(async move {
            cache
                .get_async("flaky", || async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(Some(7u32))
                })
                .await
        })
    };

    let failed = failing.await.unwrap();
    assert!(matches!(failed, Err(CacheError::AcquisitionError { .. })));

    assert_eq!(waiting.await.unwrap().unwrap(), Some(7));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_acquisition_stores_nothing_and_unlocks() {
    let cache = create_cache();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        cache.get_async("slow", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, anyhow::Error>(Some(1u32))
        }),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!cache.is_set::<u32>("slow").unwrap());

    let value = tokio::time::timeout(
        Duration::from_secs(1),
        cache.get_async("slow", || async { Ok::<_, anyhow::Error>(Some(2u32)) }),
    )
    .await
    .expect("lock was not released")
    .unwrap();
    assert_eq!(value, Some(2));
}

#[test]
fn test_panicking_acquirer_releases_lock() {
    let cache = Arc::new(create_cache());

    let panicked = {
        let cache = Arc::clone(&cache);
        std::thread::spawn(move || {
            let _ = cache.get::<u32, anyhow::Error, _>("boom", || panic!("acquirer bug"));
        })
        .join()
    };
    assert!(panicked.is_err());

    let value = cache.get("boom", || Ok::<_, anyhow::Error>(Some(3u32))).unwrap();
    assert_eq!(value, Some(3));
}

/// Store wrapper recording every policy handed to `set`
struct RecordingStore {
    inner: MemoryStore,
    policies: Mutex<Vec<(CacheKey, ExpirationPolicy)>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::default(),
            policies: Mutex::new(Vec::new()),
        }
    }

    fn recorded(&self) -> Vec<(CacheKey, ExpirationPolicy)> {
        self.policies.lock().unwrap().clone()
    }
}

impl CacheStore for RecordingStore {
    fn get(&self, key: &str) -> ouroboros_cache::Result<Option<CacheValue>> {
        self.inner.get(key)
    }

    fn set(
        &self,
        key: CacheKey,
        value: CacheValue,
        policy: ExpirationPolicy,
    ) -> ouroboros_cache::Result<()> {
        self.policies
            .lock()
            .unwrap()
            .push((key.clone(), policy.clone()));
        self.inner.set(key, value, policy)
    }

    fn contains(&self, key: &str) -> ouroboros_cache::Result<bool> {
        self.inner.contains(key)
    }

    fn remove(&self, key: &str) -> ouroboros_cache::Result<Option<CacheValue>> {
        self.inner.remove(key)
    }

    fn keys(&self) -> ouroboros_cache::Result<Vec<CacheKey>> {
        self.inner.keys()
    }
}

#[tokio::test]
async fn test_policies_reach_the_store_unchanged() {
    let cache = SingleFlightCache::with_locks(RecordingStore::new(), Arc::new(KeyedLocks::new()));
    let at = chrono::Utc::now() + chrono::Duration::hours(1);
    let ttl = Duration::from_secs(90);
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("people.json");
    std::fs::write(&watched, "[]").unwrap();

    cache
        .get_until("absolute", at, || Ok::<_, anyhow::Error>(Some(1u32)))
        .unwrap();
    cache
        .get_for("relative", ttl, || Ok::<_, anyhow::Error>(Some(2u32)))
        .unwrap();
    cache
        .get_watching("file", &watched, || Ok::<_, anyhow::Error>(Some(3u32)))
        .unwrap();
    cache
        .get_async_for("relative-async", ttl, || async {
            Ok::<Option<u32>, anyhow::Error>(None)
        })
        .await
        .unwrap();
    cache
        .get_async_until("absolute-async", at, || async {
            Ok::<_, anyhow::Error>(Some(4u32))
        })
        .await
        .unwrap();
    cache
        .get_async_watching("file-async", &watched, || async {
            Ok::<_, anyhow::Error>(Some(5u32))
        })
        .await
        .unwrap();

    let tag = TypeTag::of::<u32>();
    assert_eq!(
        cache.store().recorded(),
        vec![
            (key::generate(&tag, "absolute"), ExpirationPolicy::Absolute(at)),
            (key::generate(&tag, "relative"), ExpirationPolicy::Relative(ttl)),
            (
                key::generate(&tag, "file"),
                ExpirationPolicy::FileChange(watched.clone())
            ),
            (
                key::generate(&tag, "relative-async"),
                ExpirationPolicy::Relative(ttl)
            ),
            (
                key::generate(&tag, "absolute-async"),
                ExpirationPolicy::Absolute(at)
            ),
            (
                key::generate(&tag, "file-async"),
                ExpirationPolicy::FileChange(watched.clone())
            ),
        ]
    );
}

#[test]
fn test_relative_expiry_triggers_reacquisition() {
    let acquirer = PersonAcquirer::new();
    let cache = create_cache();
    let ttl = Duration::from_millis(50);

    cache.get_for("FindPerson", ttl, || acquirer.acquire()).unwrap();
    cache.get_for("FindPerson", ttl, || acquirer.acquire()).unwrap();
    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 1);

    std::thread::sleep(Duration::from_millis(80));

    cache.get_for("FindPerson", ttl, || acquirer.acquire()).unwrap();
    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_watched_file_change_triggers_reacquisition() {
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("people.json");
    std::fs::write(&watched, "[]").unwrap();

    let acquirer = PersonAcquirer::new();
    let cache = create_cache();

    cache
        .get_watching("FindPerson", &watched, || acquirer.acquire())
        .unwrap();
    cache
        .get_watching("FindPerson", &watched, || acquirer.acquire())
        .unwrap();
    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 1);

    std::fs::remove_file(&watched).unwrap();

    cache
        .get_watching("FindPerson", &watched, || acquirer.acquire())
        .unwrap();
    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_shared_store_behind_arc() {
    let store = Arc::new(MemoryStore::default());
    let locks = Arc::new(KeyedLocks::new());
    let front_a = SingleFlightCache::with_locks(Arc::clone(&store), Arc::clone(&locks));
    let front_b = SingleFlightCache::with_locks(Arc::clone(&store), locks);
    let acquirer = PersonAcquirer::new();

    front_a.get("FindPerson", || acquirer.acquire()).unwrap();
    front_b.get("FindPerson", || acquirer.acquire()).unwrap();

    assert_eq!(acquirer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_explicit_tag_is_shared_across_fronts() {
    let store = Arc::new(MemoryStore::default());
    let locks = Arc::new(KeyedLocks::new());
    let front_a = Arc::new(SingleFlightCache::with_locks(Arc::clone(&store), Arc::clone(&locks)));
    let front_b = Arc::new(SingleFlightCache::with_locks(Arc::clone(&store), locks));
    let person = TypeTag::new("person").unwrap();
    let acquirer = Arc::new(PersonAcquirer::new());

    let tasks = [front_a, front_b].into_iter().map(|front| {
        let person = person.clone();
        let acquirer = Arc::clone(&acquirer);
        tokio::spawn(async move {
            front
                .get_async_tagged(&person, "1", ExpirationPolicy::None, || {
                    acquirer.long_running_acquire_async()
                })
                .await
        })
    });

    for result in join_all(tasks).await {
        assert!(result.unwrap().unwrap().is_some());
    }
    assert_eq!(acquirer.total_calls(), 1);
    assert_eq!(store.keys().unwrap(), vec![key::generate(&person, "1")]);
}

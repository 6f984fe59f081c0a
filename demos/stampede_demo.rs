//! Cache Stampede Demo
//!
//! Fires a burst of concurrent requests, blocking and async, at the same
//! uncached entry and shows that the slow lookup runs only once.
//!
//! Usage:
//!   cargo run --example stampede_demo
//!
//! Environment variables:
//!   RUST_LOG                     - log filter (default: info)
//!   OUROBOROS_CACHE_MAX_ENTRIES  - memory store entry limit
//!   OUROBOROS_CACHE_TTL_JITTER   - jitter applied to relative expirations

use futures::future::join_all;
use ouroboros_cache::{CacheConfig, MemoryStore, SingleFlightCache};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Profile {
    name: String,
    followers: u64,
}

static LOOKUPS: AtomicUsize = AtomicUsize::new(0);

async fn load_profile(id: u32) -> anyhow::Result<Option<Profile>> {
    LOOKUPS.fetch_add(1, Ordering::SeqCst);
    info!("Loading profile {} from the slow backend...", id);
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(Some(Profile {
        name: format!("user-{}", id),
        followers: 1_000 + id as u64,
    }))
}

fn load_profile_blocking(id: u32) -> anyhow::Result<Option<Profile>> {
    LOOKUPS.fetch_add(1, Ordering::SeqCst);
    info!("Loading profile {} from the slow backend (blocking)...", id);
    std::thread::sleep(Duration::from_millis(500));
    Ok(Some(Profile {
        name: format!("user-{}", id),
        followers: 1_000 + id as u64,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("=== Cache Stampede Demo ===");

    let config = CacheConfig::from_env()?;
    let store = Arc::new(MemoryStore::new(config)?);
    let _cleanup = store.spawn_auto_cleanup();
    let cache = Arc::new(SingleFlightCache::new(Arc::clone(&store)));

    let started = Instant::now();
    let ttl = Duration::from_secs(30);

    let async_requests = (0..8).map(|_| {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .get_async_for("profile:42", ttl, || load_profile(42))
                .await
        })
    });
    let blocking_requests: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::task::spawn_blocking(move || {
                cache.get_for("profile:42", ttl, || load_profile_blocking(42))
            })
        })
        .collect();

    for result in join_all(async_requests).await {
        let profile = result??;
        info!("async caller got {:?}", profile);
    }
    for result in join_all(blocking_requests).await {
        let profile = result??;
        info!("blocking caller got {:?}", profile);
    }

    info!(
        "12 requests served in {:?} with {} backend lookup(s)",
        started.elapsed(),
        LOOKUPS.load(Ordering::SeqCst)
    );

    if let Some(profile) = cache
        .get_async_for("profile:42", ttl, || load_profile(42))
        .await?
    {
        info!("{} has {} followers (cached)", profile.name, profile.followers);
    }

    info!("Store stats: {}", store.stats()?);
    Ok(())
}

//! A thundering herd against a slow upstream.
//!
//! One hundred concurrent requests for the same key produce one upstream call;
//! a second wave is answered from memory. Run with
//! `RUST_LOG=herdcache=debug cargo run --example stampede` to watch the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use herdcache::cache::{CacheConfig, CoalescingCache, InMemoryStore};
use herdcache::upstream::{FnFetcher, UpstreamRequest, UpstreamResponse};
use tracing::info;
use tracing_subscriber::EnvFilter;

const HERD: usize = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetcher = FnFetcher::new(move |req: UpstreamRequest| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(UpstreamResponse::new(200)
                .header("Content-Type", "application/json")
                .body(format!(r#"{{"url":"{}","call":{n}}}"#, req.url())))
        }
    });

    let config = CacheConfig::new()
        .with_fresh_ttl(Duration::from_secs(5))
        .with_stale_ttl(Duration::from_secs(30))
        .with_upstream_timeout(Duration::from_secs(2));
    let cache = CoalescingCache::builder(Arc::new(InMemoryStore::new()), Arc::new(fetcher))
        .config(config)
        .build()?;

    for wave in 1..=2 {
        let started = Instant::now();
        let herd = (0..HERD).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch(
                        "quote:ACME",
                        UpstreamRequest::get("https://api.example.com/q/ACME"),
                    )
                    .await
            })
        });
        let mut served = 0;
        for joined in join_all(herd).await {
            joined??;
            served += 1;
        }
        info!(
            wave,
            served,
            upstream_calls = calls.load(Ordering::SeqCst),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "wave complete"
        );
    }

    let stats = cache.stats();
    info!(
        memory_hits = stats.memory_hits,
        coalesced = stats.coalesced,
        upstream_calls = stats.upstream_calls,
        hit_rate = stats.hit_rate(),
        "final stats"
    );
    Ok(())
}

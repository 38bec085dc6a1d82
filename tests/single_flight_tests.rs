/// Single-flight tests
///
/// Concurrent cold resolves share one scan; abandoned waiters and
/// invalidations do not corrupt the shared build.
/// Run with: cargo test --test single_flight_tests

use shortid::{MemorySource, ResolveError, ResolverConfig, RetryPolicy, ShortIds};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use uuid::Uuid;

fn corpus(n: u64) -> Vec<String> {
    (1..=n)
        .map(|i| Uuid::from_u128(((i as u128 * 13) << 88) | i as u128).to_string())
        .collect()
}

fn slow_ids(
    ids: &[String],
    latency: Duration,
) -> (Arc<MemorySource<String>>, Arc<ShortIds<MemorySource<String>>>) {
    let source = Arc::new(MemorySource::with_entities(ids.to_vec()).with_latency(latency));
    let shortids = ShortIds::with_source(
        Arc::clone(&source),
        ResolverConfig::default().retry(RetryPolicy::none()),
    )
    .unwrap();
    (source, Arc::new(shortids))
}

#[tokio::test]
async fn test_concurrent_cold_resolves_share_one_scan() {
    let ids = corpus(50);
    let (source, shortids) = slow_ids(&ids, Duration::from_millis(50));

    let num_tasks = 32;
    let barrier = Arc::new(Barrier::new(num_tasks));
    let mut handles = vec![];

    for task_id in 0..num_tasks {
        let shortids = Arc::clone(&shortids);
        let barrier = Arc::clone(&barrier);
        let raw = ids[task_id % ids.len()].clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let projected = shortids.project(&raw).unwrap();
            let resolved = shortids.resolve(projected).await.unwrap();
            assert_eq!(resolved.as_str(), raw, "task {} resolved wrong id", task_id);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(source.scans(), 1);
    let stats = shortids.stats();
    assert_eq!(stats.builds_started, 1);
    assert_eq!(stats.builds_completed, 1);
}

#[tokio::test]
async fn test_abandoned_waiter_does_not_cancel_build() {
    let ids = corpus(5);
    let (source, shortids) = slow_ids(&ids, Duration::from_millis(100));
    let projected = shortids.project(&ids[0]).unwrap();

    let quitter = {
        let shortids = Arc::clone(&shortids);
        tokio::spawn(async move { shortids.resolve(projected).await })
    };
    let patient = {
        let shortids = Arc::clone(&shortids);
        tokio::spawn(async move { shortids.resolve(projected).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    quitter.abort();

    let resolved = patient.await.unwrap().unwrap();
    assert_eq!(resolved.as_str(), ids[0]);
    assert_eq!(source.scans(), 1);
    assert_eq!(shortids.stats().builds_completed, 1);
}

#[tokio::test]
async fn test_waiter_timeout_keeps_build_for_others() {
    let ids = corpus(5);
    let (source, shortids) = slow_ids(&ids, Duration::from_millis(80));
    let projected = shortids.project(&ids[1]).unwrap();

    let patient = {
        let shortids = Arc::clone(&shortids);
        tokio::spawn(async move { shortids.resolve(projected).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let gave_up =
        tokio::time::timeout(Duration::from_millis(10), shortids.resolve(projected)).await;
    assert!(gave_up.is_err());

    assert_eq!(patient.await.unwrap().unwrap().as_str(), ids[1]);
    assert_eq!(source.scans(), 1);
}

#[tokio::test]
async fn test_build_without_waiters_is_aborted() {
    let ids = corpus(5);
    let (source, shortids) = slow_ids(&ids, Duration::from_millis(100));
    let projected = shortids.project(&ids[0]).unwrap();

    let lonely = {
        let shortids = Arc::clone(&shortids);
        tokio::spawn(async move { shortids.resolve(projected).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    lonely.abort();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The next miss cannot join the abandoned build and starts its own.
    assert_eq!(shortids.resolve(projected).await.unwrap().as_str(), ids[0]);
    assert_eq!(source.scans(), 2);

    let stats = shortids.stats();
    assert_eq!(stats.builds_started, 2);
    assert_eq!(stats.builds_completed, 1);
}

#[tokio::test]
async fn test_invalidation_during_build_is_not_published() {
    let ids = corpus(5);
    let (source, shortids) = slow_ids(&ids, Duration::from_millis(60));
    let projected = shortids.project(&ids[2]).unwrap();

    let waiter = {
        let shortids = Arc::clone(&shortids);
        tokio::spawn(async move { shortids.resolve(projected).await })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;
    shortids.invalidate();

    // Existing waiters still get the fenced build's answer.
    assert_eq!(waiter.await.unwrap().unwrap().as_str(), ids[2]);
    assert!(shortids.index_summary().is_none());

    source.set_latency(Duration::ZERO);
    shortids.resolve(projected).await.unwrap();
    assert_eq!(source.scans(), 2);
    assert_eq!(shortids.index_summary().unwrap().generation, 2);
}

#[tokio::test]
async fn test_misses_after_invalidate_start_a_new_build() {
    let ids = corpus(5);
    let (source, shortids) = slow_ids(&ids, Duration::from_millis(60));
    let projected = shortids.project(&ids[3]).unwrap();

    let before = {
        let shortids = Arc::clone(&shortids);
        tokio::spawn(async move { shortids.resolve(projected).await })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;
    shortids.invalidate();

    let after = {
        let shortids = Arc::clone(&shortids);
        tokio::spawn(async move { shortids.resolve(projected).await })
    };

    before.await.unwrap().unwrap();
    after.await.unwrap().unwrap();

    assert_eq!(source.scans(), 2);
    // Only the post-invalidation build is published.
    assert_eq!(shortids.index_summary().unwrap().generation, 2);
}

#[tokio::test]
async fn test_build_deadline_surfaces_index_unavailable() {
    let ids = corpus(3);
    let source = MemorySource::with_entities(ids.clone()).with_latency(Duration::from_millis(200));
    let shortids = ShortIds::new(
        source,
        ResolverConfig::default()
            .build_deadline(Duration::from_millis(30))
            .retry(RetryPolicy::none()),
    )
    .unwrap();

    let err = shortids.resolve_segment("13").await.unwrap_err();
    assert!(matches!(err, ResolveError::IndexUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(shortids.stats().builds_failed, 1);
}

#[tokio::test]
async fn test_retry_awaits_build_that_outlived_deadline() {
    let ids = corpus(3);
    let source = Arc::new(
        MemorySource::with_entities(ids.clone()).with_latency(Duration::from_millis(60)),
    );
    let shortids = ShortIds::with_source(
        Arc::clone(&source),
        ResolverConfig::default()
            .resolve_deadline(Duration::from_millis(40))
            .retry(RetryPolicy {
                max_attempts: 4,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
            }),
    )
    .unwrap();

    let resolved = shortids.resolve_segment("13").await.unwrap();
    assert_eq!(resolved.as_str(), ids[0]);

    // The first attempt timed out; the second awaited the same scan.
    assert_eq!(source.scans(), 1);
    let stats = shortids.stats();
    assert_eq!(stats.builds_started, 1);
    assert_eq!(stats.builds_completed, 1);
}

#[tokio::test]
async fn test_timed_out_retries_share_one_scan() {
    let ids = corpus(3);
    let source = Arc::new(
        MemorySource::with_entities(ids.clone()).with_latency(Duration::from_millis(200)),
    );
    let shortids = ShortIds::with_source(
        Arc::clone(&source),
        ResolverConfig::default()
            .resolve_deadline(Duration::from_millis(20))
            .retry(RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
            }),
    )
    .unwrap();

    let err = shortids.resolve_segment("13").await.unwrap_err();
    assert!(matches!(err, ResolveError::IndexUnavailable(_)));
    // Every attempt waited on one scan rather than starting its own.
    assert_eq!(source.scans(), 1);
    assert_eq!(shortids.stats().builds_started, 1);
}

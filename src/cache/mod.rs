//! Holder of the current [`ResolutionIndex`].
//!
//! Readers load the published index without locking. A miss (no index, or
//! one older than the TTL) joins the build already in flight or starts one;
//! concurrent misses therefore cost one scan of the source. The only lock is
//! the in-flight slot, and it is never held across an await.
//!
//! Builds run on their own task. A waiter that gives up does not cancel the
//! build for the others; when the last waiter is gone the task is aborted.
//!
//! [`IndexCache::invalidate`] drops the published index and fences off any
//! build that started before it, so a result computed from a corpus that has
//! since changed is handed to its existing waiters but never published.

mod flight;

use crate::core::{ResolveError, Result};
use crate::index::{IndexBuilder, ResolutionIndex};
use crate::source::{EntitySource, SourceEvent};
use arc_swap::ArcSwapOption;
use flight::{BuildTask, InFlight};
pub(crate) use flight::SharedBuild;
use futures::FutureExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Level, event};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    builds_started: AtomicU64,
    builds_completed: AtomicU64,
    builds_failed: AtomicU64,
    invalidations: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub builds_started: u64,
    pub builds_completed: u64,
    pub builds_failed: u64,
    pub invalidations: u64,
    /// Generation of the published index, if any.
    pub generation: Option<u64>,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache Stats: {} hits, {} misses, builds {}/{} ({} failed), {} invalidations",
            self.hits,
            self.misses,
            self.builds_completed,
            self.builds_started,
            self.builds_failed,
            self.invalidations
        )
    }
}

pub(crate) enum Acquired {
    Ready(Arc<ResolutionIndex>),
    Pending(SharedBuild),
}

pub struct IndexCache<S: EntitySource> {
    source: Arc<S>,
    builder: IndexBuilder,
    current: ArcSwapOption<ResolutionIndex>,
    in_flight: Mutex<Option<InFlight>>,
    /// Bumped by every invalidation.
    epoch: AtomicU64,
    next_generation: AtomicU64,
    ttl: Duration,
    build_deadline: Duration,
    counters: Counters,
}

impl<S: EntitySource> IndexCache<S> {
    pub fn new(
        source: Arc<S>,
        builder: IndexBuilder,
        ttl: Duration,
        build_deadline: Duration,
    ) -> Self {
        Self {
            source,
            builder,
            current: ArcSwapOption::empty(),
            in_flight: Mutex::new(None),
            epoch: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            ttl,
            build_deadline,
            counters: Counters::default(),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The published index, stale or not, without triggering a build.
    pub fn snapshot(&self) -> Option<Arc<ResolutionIndex>> {
        self.current.load_full()
    }

    /// Returns the published index while it is younger than the TTL;
    /// otherwise waits for the single in-flight build.
    pub async fn get_or_build(self: &Arc<Self>) -> Result<Arc<ResolutionIndex>> {
        match self.acquire() {
            Acquired::Ready(index) => Ok(index),
            Acquired::Pending(build) => build.await,
        }
    }

    /// The fresh index, or a handle on the build to wait for. Holding the
    /// handle keeps the build alive.
    pub(crate) fn acquire(self: &Arc<Self>) -> Acquired {
        if let Some(index) = self.fresh() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Acquired::Ready(index);
        }

        let mut slot = self.lock_slot();
        // A build may have published between the check above and the lock.
        if let Some(index) = self.fresh() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Acquired::Ready(index);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let epoch = self.epoch.load(Ordering::SeqCst);
        match slot.as_ref().and_then(|flight| flight.join(epoch)) {
            Some(build) => {
                event!(Level::DEBUG, "joining in-flight index build");
                Acquired::Pending(build)
            }
            None => Acquired::Pending(self.start_build(&mut slot, epoch)),
        }
    }

    /// Drops the published index and fences off in-flight builds.
    pub fn invalidate(&self) {
        let mut slot = self.lock_slot();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.current.store(None);
        *slot = None;
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        event!(Level::DEBUG, "index invalidated");
    }

    /// Invalidates on every event from `events` until the sender closes or
    /// the cache is dropped.
    pub fn listen(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SourceEvent>,
    ) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let received = events.recv().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                match received {
                    Ok(mutation) => {
                        event!(Level::DEBUG, ?mutation, "source mutation observed");
                        cache.invalidate();
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        event!(Level::WARN, skipped, "mutation feed lagged; invalidating");
                        cache.invalidate();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            builds_started: self.counters.builds_started.load(Ordering::Relaxed),
            builds_completed: self.counters.builds_completed.load(Ordering::Relaxed),
            builds_failed: self.counters.builds_failed.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            generation: self.current.load_full().map(|index| index.generation()),
        }
    }

    fn fresh(&self) -> Option<Arc<ResolutionIndex>> {
        let index = self.current.load_full()?;
        (index.age() < self.ttl).then_some(index)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        // The slot only holds a weak handle; a panic elsewhere cannot leave
        // it inconsistent.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_build(self: &Arc<Self>, slot: &mut Option<InFlight>, epoch: u64) -> SharedBuild {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.builds_started.fetch_add(1, Ordering::Relaxed);
        event!(Level::DEBUG, generation, "starting index build");

        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move { cache.run_build(generation, epoch).await });
        let build = BuildTask(handle).boxed().shared();

        *slot = build
            .downgrade()
            .map(|weak| InFlight { epoch, build: weak });
        build
    }

    async fn run_build(
        self: Arc<Self>,
        generation: u64,
        epoch: u64,
    ) -> Result<Arc<ResolutionIndex>> {
        let outcome = timeout(
            self.build_deadline,
            self.builder.build(self.source.as_ref(), generation),
        )
        .await;

        let index = match outcome {
            Ok(Ok(index)) => Arc::new(index),
            Ok(Err(err)) => {
                self.counters.builds_failed.fetch_add(1, Ordering::Relaxed);
                event!(Level::WARN, generation, error = %err, "index build failed");
                return Err(err);
            }
            Err(_) => {
                self.counters.builds_failed.fetch_add(1, Ordering::Relaxed);
                let deadline_ms = self.build_deadline.as_millis() as u64;
                event!(Level::WARN, generation, deadline_ms, "index build exceeded deadline");
                return Err(ResolveError::IndexUnavailable(format!(
                    "index build exceeded its {}ms deadline",
                    deadline_ms
                )));
            }
        };

        self.counters.builds_completed.fetch_add(1, Ordering::Relaxed);
        self.publish(&index, epoch);
        Ok(index)
    }

    fn publish(&self, index: &Arc<ResolutionIndex>, epoch: u64) {
        let _slot = self.lock_slot();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            event!(
                Level::DEBUG,
                generation = index.generation(),
                "index invalidated during build; not publishing"
            );
            return;
        }

        // Never replace a newer generation.
        let _previous = self.current.rcu(|current| match current {
            Some(existing) if existing.generation() > index.generation() => {
                Some(Arc::clone(existing))
            }
            _ => Some(Arc::clone(index)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BuildConfig;
    use crate::projector::Projector;
    use crate::source::MemorySource;

    fn keys(n: u64) -> Vec<String> {
        (1..=n)
            .map(|i| format!("{:08x}-{:02x}00-4000-8000-000000000000", i >> 8, i & 0xff))
            .collect()
    }

    fn cache(source: MemorySource<String>, ttl: Duration) -> Arc<IndexCache<MemorySource<String>>> {
        Arc::new(IndexCache::new(
            Arc::new(source),
            IndexBuilder::new(BuildConfig::default(), Projector::default()),
            ttl,
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn test_hit_after_build() {
        let cache = cache(MemorySource::with_entities(keys(3)), Duration::from_secs(30));

        let first = cache.get_or_build().await.unwrap();
        let second = cache.get_or_build().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.source().scans(), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.builds_completed, 1);
        assert_eq!(stats.generation, Some(1));
    }

    #[tokio::test]
    async fn test_ttl_expiry_rebuilds() {
        let cache = cache(MemorySource::with_entities(keys(3)), Duration::from_millis(30));

        let first = cache.get_or_build().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = cache.get_or_build().await.unwrap();

        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        assert_eq!(cache.source().scans(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_drops_snapshot() {
        let cache = cache(MemorySource::with_entities(keys(3)), Duration::from_secs(30));

        cache.get_or_build().await.unwrap();
        assert!(cache.snapshot().is_some());

        cache.invalidate();
        assert!(cache.snapshot().is_none());

        let rebuilt = cache.get_or_build().await.unwrap();
        assert_eq!(rebuilt.generation(), 2);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_not_published_or_joined() {
        let source = MemorySource::with_entities(keys(3));
        source.fail_page(Some(1));
        let cache = cache(source, Duration::from_secs(30));

        let err = cache.get_or_build().await.unwrap_err();
        assert!(matches!(err, ResolveError::SourceUnavailable(_)));
        assert!(cache.snapshot().is_none());

        cache.source().fail_page(None);
        let index = cache.get_or_build().await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(cache.stats().builds_failed, 1);
    }

    #[tokio::test]
    async fn test_build_deadline() {
        let source = MemorySource::with_entities(keys(3)).with_latency(Duration::from_millis(200));
        let cache = Arc::new(IndexCache::new(
            Arc::new(source),
            IndexBuilder::new(BuildConfig::default(), Projector::default()),
            Duration::from_secs(30),
            Duration::from_millis(20),
        ));

        let err = cache.get_or_build().await.unwrap_err();
        assert!(matches!(err, ResolveError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn test_listen_invalidates_on_mutation() {
        let cache = cache(MemorySource::with_entities(keys(3)), Duration::from_secs(30));
        let listener = cache.listen(cache.source().subscribe().unwrap());

        cache.get_or_build().await.unwrap();
        cache.source().insert(keys(4).pop().unwrap()).await;

        for _ in 0..100 {
            if cache.snapshot().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.snapshot().is_none());
        assert_eq!(cache.get_or_build().await.unwrap().len(), 4);

        listener.abort();
    }

    #[test]
    fn test_stats_display() {
        let stats = CacheStats {
            hits: 4,
            misses: 1,
            builds_started: 1,
            builds_completed: 1,
            builds_failed: 0,
            invalidations: 2,
            generation: Some(1),
        };
        assert_eq!(
            stats.to_string(),
            "Cache Stats: 4 hits, 1 misses, builds 1/1 (0 failed), 2 invalidations"
        );
    }
}

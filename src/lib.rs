// ============================================================================
// shortid library
// ============================================================================

pub mod cache;
pub mod config;
pub mod core;
pub mod index;
pub mod projector;
pub mod resolver;
pub mod source;
pub mod web;

// Re-export main types for convenience
pub use cache::{CacheStats, IndexCache};
pub use config::{ResolverConfig, RetryPolicy};
pub use crate::core::{OpaqueId, ProjectedId, ResolveError, Result, SourceError};
pub use index::{
    BuildConfig, Collision, CollisionOutcome, CollisionPolicy, IndexBuilder, IndexEntry,
    IndexSummary, Lookup, ResolutionIndex,
};
pub use projector::{DEFAULT_MODULUS, Projector, project};
pub use resolver::{ResolveOutcome, Resolver};
pub use source::{
    EntityPage, EntitySource, Keyed, MemorySource, RemoteEntity, RestSource, SourceEvent,
};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Level, event};

// ============================================================================
// High-level API
// ============================================================================

/// Short numeric ids over one entity source
///
/// This is the one object pages share for numeric-id routing: it owns the
/// cache and the resolver, and wires the source's mutation feed into the
/// cache when there is one.
///
/// # Examples
///
/// ```
/// use shortid::{MemorySource, ResolverConfig, ShortIds};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = MemorySource::with_entities(vec![
///     "3fa85f64-5717-4562-b3fc-2c963f66afa6".to_string(),
/// ]);
/// let ids = ShortIds::new(source, ResolverConfig::default())?;
///
/// let projected = ids.project("3fa85f64-5717-4562-b3fc-2c963f66afa6")?;
/// let opaque = ids.resolve(projected).await?;
/// assert_eq!(opaque.as_str(), "3fa85f64-5717-4562-b3fc-2c963f66afa6");
/// # Ok(())
/// # }
/// ```
pub struct ShortIds<S: EntitySource> {
    resolver: Resolver<S>,
    listener: Option<JoinHandle<()>>,
}

impl<S: EntitySource> ShortIds<S> {
    pub fn new(source: S, config: ResolverConfig) -> Result<Self> {
        Self::with_source(Arc::new(source), config)
    }

    /// Same as [`new`](Self::new) for a source shared with other owners,
    /// e.g. the code that mutates it.
    pub fn with_source(source: Arc<S>, config: ResolverConfig) -> Result<Self> {
        config.validate().map_err(ResolveError::Config)?;

        let projector = Projector::new(config.modulus)?;
        let builder = IndexBuilder::new(config.build.clone(), projector);
        let cache = Arc::new(IndexCache::new(
            Arc::clone(&source),
            builder,
            config.ttl_duration(),
            config.build_deadline_duration(),
        ));

        let listener = match (source.subscribe(), tokio::runtime::Handle::try_current()) {
            (Some(events), Ok(_)) => Some(cache.listen(events)),
            (Some(_), Err(_)) => {
                event!(
                    Level::WARN,
                    ttl_ms = config.ttl_ms,
                    "no tokio runtime for the mutation feed; staleness bounded by ttl only"
                );
                None
            }
            (None, _) => {
                event!(
                    Level::DEBUG,
                    ttl_ms = config.ttl_ms,
                    "source has no mutation feed; staleness bounded by ttl only"
                );
                None
            }
        };

        let resolver = Resolver::new(
            cache,
            projector,
            config.retry.clone(),
            config.resolve_deadline_duration(),
        );

        Ok(Self { resolver, listener })
    }

    /// Projects an opaque id without consulting the index.
    pub fn project(&self, raw: &str) -> Result<ProjectedId> {
        self.resolver.project(raw)
    }

    pub async fn resolve(&self, projected: ProjectedId) -> Result<OpaqueId> {
        self.resolver.resolve(projected).await
    }

    pub async fn resolve_segment(&self, segment: &str) -> Result<OpaqueId> {
        self.resolver.resolve_segment(segment).await
    }

    pub async fn fetch(&self, projected: ProjectedId) -> Result<S::Entity> {
        self.resolver.fetch(projected).await
    }

    /// Call after creating or deleting an entity through a path the source
    /// feed does not see.
    pub fn invalidate(&self) {
        self.resolver.cache().invalidate();
    }

    pub fn stats(&self) -> CacheStats {
        self.resolver.cache().stats()
    }

    /// Summary of the published index, if any.
    pub fn index_summary(&self) -> Option<IndexSummary> {
        self.resolver.cache().snapshot().map(|index| index.summary())
    }

    pub fn resolver(&self) -> &Resolver<S> {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<IndexCache<S>> {
        self.resolver.cache()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }
}

impl<S: EntitySource> Drop for ShortIds<S> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

//! Projected id → opaque id.
//!
//! One call walks `Idle → AwaitingIndex → outcome`, where the outcome is one
//! of [`ResolveOutcome`]. Unavailable sources and indexes are retried with
//! exponential backoff up to the configured attempt count; every other
//! outcome is final.

use crate::cache::{Acquired, IndexCache, SharedBuild};
use crate::config::RetryPolicy;
use crate::core::{OpaqueId, ProjectedId, ResolveError, Result, SourceError};
use crate::projector::Projector;
use crate::source::EntitySource;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{Instrument, Level, event, info_span};

/// Terminal state of a resolve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Hit,
    MissComplete,
    MissIncomplete,
    Ambiguous,
    Unavailable,
    Invalid,
}

impl ResolveOutcome {
    pub fn of(result: &Result<OpaqueId>) -> Self {
        match result {
            Ok(_) => ResolveOutcome::Hit,
            Err(ResolveError::NotFound(_)) => ResolveOutcome::MissComplete,
            Err(ResolveError::IndexIncomplete { .. }) => ResolveOutcome::MissIncomplete,
            Err(ResolveError::Ambiguous { .. }) => ResolveOutcome::Ambiguous,
            Err(ResolveError::SourceUnavailable(_)) | Err(ResolveError::IndexUnavailable(_)) => {
                ResolveOutcome::Unavailable
            }
            Err(ResolveError::InvalidFormat(_)) | Err(ResolveError::Config(_)) => {
                ResolveOutcome::Invalid
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveOutcome::Hit => "hit",
            ResolveOutcome::MissComplete => "miss_complete",
            ResolveOutcome::MissIncomplete => "miss_incomplete",
            ResolveOutcome::Ambiguous => "ambiguous",
            ResolveOutcome::Unavailable => "unavailable",
            ResolveOutcome::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Resolver<S: EntitySource> {
    cache: Arc<IndexCache<S>>,
    projector: Projector,
    retry: RetryPolicy,
    deadline: Duration,
}

impl<S: EntitySource> Resolver<S> {
    pub fn new(
        cache: Arc<IndexCache<S>>,
        projector: Projector,
        retry: RetryPolicy,
        deadline: Duration,
    ) -> Self {
        Self {
            cache,
            projector,
            retry,
            deadline,
        }
    }

    pub fn cache(&self) -> &Arc<IndexCache<S>> {
        &self.cache
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    /// Projects an opaque id directly, bypassing the cached index.
    pub fn project(&self, raw: &str) -> Result<ProjectedId> {
        self.projector.project_str(raw)
    }

    pub async fn resolve(&self, projected: ProjectedId) -> Result<OpaqueId> {
        let span = info_span!("resolver.resolve", projected = %projected);
        async move {
            let result = self.resolve_with_retry(projected).await;
            let outcome = ResolveOutcome::of(&result);
            match &result {
                Ok(opaque) => event!(Level::DEBUG, %outcome, opaque = %opaque, "resolved"),
                Err(err) => event!(Level::DEBUG, %outcome, error = %err, "resolve failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Parses a route segment and resolves it.
    pub async fn resolve_segment(&self, segment: &str) -> Result<OpaqueId> {
        let projected = self.projector.parse_projected(segment)?;
        self.resolve(projected).await
    }

    /// Resolves `projected` and fetches the full entity from the source.
    pub async fn fetch(&self, projected: ProjectedId) -> Result<S::Entity> {
        let opaque = self.resolve(projected).await?;
        self.cache
            .source()
            .get_by_id(&opaque)
            .await
            .map_err(|err| match err {
                // Deleted after the index was built.
                SourceError::NotFound(_) => ResolveError::NotFound(projected),
                other => other.into(),
            })
    }

    async fn resolve_with_retry(&self, projected: ProjectedId) -> Result<OpaqueId> {
        self.projector.check_range(projected)?;

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        // A build that outlives one attempt's deadline is awaited again by the
        // next attempt instead of being dropped and rescanned.
        let mut pending: Option<SharedBuild> = None;
        loop {
            let build = match pending.take() {
                Some(build) => build,
                None => match self.cache.acquire() {
                    Acquired::Ready(index) => return index.resolve(projected),
                    Acquired::Pending(build) => build,
                },
            };

            let err = match timeout(self.deadline, build.clone()).await {
                Ok(Ok(index)) => return index.resolve(projected),
                Ok(Err(err)) => err,
                Err(_) => {
                    pending = Some(build);
                    ResolveError::IndexUnavailable(format!(
                        "no index within {}ms",
                        self.deadline.as_millis()
                    ))
                }
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            let backoff_ms = self.retry.backoff_ms(attempt);
            event!(
                Level::DEBUG,
                attempt,
                backoff_ms,
                error = %err,
                "index unavailable; retrying"
            );
            sleep(Duration::from_millis(backoff_ms)).await;
            attempt += 1;
        }
    }
}

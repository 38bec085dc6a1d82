use super::{Collision, CollisionOutcome, CollisionPolicy, ResolutionIndex};
use crate::core::{OpaqueId, ProjectedId, ResolveError, Result};
use crate::projector::Projector;
use crate::source::{EntitySource, Keyed};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{Instrument, Level, event, info_span};

/// Paging limits and collision handling for one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Entities requested per page.
    pub page_size: u32,
    /// Pages fetched before the build stops and reports itself incomplete.
    pub max_pages: u32,
    pub collision_policy: CollisionPolicy,
}

impl BuildConfig {
    /// Most entities a single build can see.
    pub fn item_cap(&self) -> u64 {
        self.page_size as u64 * self.max_pages as u64
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 10,
            collision_policy: CollisionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Insert {
    Added,
    Duplicate,
    Collided,
}

/// Index under construction. Never escapes a failed build.
struct PendingIndex {
    entries: HashMap<ProjectedId, OpaqueId>,
    collisions: HashMap<ProjectedId, Collision>,
    policy: CollisionPolicy,
}

impl PendingIndex {
    fn new(policy: CollisionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            collisions: HashMap::new(),
            policy,
        }
    }

    fn insert(&mut self, projected: ProjectedId, opaque: OpaqueId) -> Insert {
        if let Some(collision) = self.collisions.get_mut(&projected) {
            if collision.candidates.contains(&opaque) {
                return Insert::Duplicate;
            }
            collision.candidates.push(opaque.clone());
            if self.policy == CollisionPolicy::KeepLast {
                self.entries.insert(projected, opaque.clone());
                collision.outcome = CollisionOutcome::Kept(opaque);
            }
            return Insert::Collided;
        }

        let existing = match self.entries.get(&projected) {
            None => {
                self.entries.insert(projected, opaque);
                return Insert::Added;
            }
            Some(existing) if *existing == opaque => return Insert::Duplicate,
            Some(existing) => existing.clone(),
        };

        let outcome = match self.policy {
            CollisionPolicy::KeepFirst => CollisionOutcome::Kept(existing.clone()),
            CollisionPolicy::KeepLast => {
                self.entries.insert(projected, opaque.clone());
                CollisionOutcome::Kept(opaque.clone())
            }
            CollisionPolicy::MarkUnresolved => {
                self.entries.remove(&projected);
                CollisionOutcome::Unresolved
            }
        };

        self.collisions.insert(
            projected,
            Collision {
                projected,
                candidates: vec![existing, opaque],
                outcome,
            },
        );
        Insert::Collided
    }
}

/// Scans a source and materializes a [`ResolutionIndex`].
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    config: BuildConfig,
    projector: Projector,
}

impl IndexBuilder {
    pub fn new(config: BuildConfig, projector: Projector) -> Self {
        Self { config, projector }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    /// Pages through `source` from page 1 until it is exhausted or
    /// `max_pages` pages have been read.
    ///
    /// Any listing failure aborts the build with `SourceUnavailable`; callers
    /// retry the whole build, never a part of it.
    pub async fn build<S>(&self, source: &S, generation: u64) -> Result<ResolutionIndex>
    where
        S: EntitySource + ?Sized,
    {
        let span = info_span!(
            "index.build",
            generation,
            page_size = self.config.page_size,
            max_pages = self.config.max_pages
        );
        self.scan(source, generation).instrument(span).await
    }

    async fn scan<S>(&self, source: &S, generation: u64) -> Result<ResolutionIndex>
    where
        S: EntitySource + ?Sized,
    {
        if self.config.page_size == 0 || self.config.max_pages == 0 {
            return Err(ResolveError::Config(
                "page_size and max_pages must be > 0".to_string(),
            ));
        }

        let started = Instant::now();
        let mut pending = PendingIndex::new(self.config.collision_policy);
        let mut scanned = 0usize;
        let mut invalid = 0usize;
        let mut pages_fetched = 0u32;
        let mut exhausted = false;

        while pages_fetched < self.config.max_pages {
            let page_number = pages_fetched + 1;
            let page = source
                .list(page_number, self.config.page_size)
                .await
                .map_err(|err| {
                    event!(Level::WARN, page = page_number, error = %err, "index build aborted");
                    ResolveError::SourceUnavailable(format!(
                        "listing page {} failed: {}",
                        page_number, err
                    ))
                })?;
            pages_fetched += 1;

            for entity in &page.items {
                scanned += 1;
                let opaque = match OpaqueId::parse(entity.opaque_key()) {
                    Ok(opaque) => opaque,
                    Err(err) => {
                        invalid += 1;
                        event!(Level::WARN, error = %err, "skipping entity with malformed id");
                        continue;
                    }
                };

                let projected = self.projector.project(&opaque);
                if pending.insert(projected, opaque) == Insert::Collided {
                    event!(Level::WARN, projected = %projected, "projected id collision");
                }
            }

            if page.is_last() {
                exhausted = true;
                break;
            }
        }

        if !exhausted {
            event!(
                Level::WARN,
                pages_fetched,
                scanned,
                "index build stopped at page cap; index is incomplete"
            );
        }

        if self.projector.is_unsafe_for(scanned) {
            event!(
                Level::WARN,
                scanned,
                modulus = self.projector.modulus(),
                collision_probability = self.projector.collision_probability(scanned),
                "corpus too large for projected id space; collisions are likely"
            );
        }

        let index = ResolutionIndex {
            entries: pending.entries,
            collisions: pending.collisions,
            built_at: Utc::now(),
            built_instant: Instant::now(),
            complete: exhausted,
            scanned_count: scanned,
            invalid_count: invalid,
            pages_fetched,
            max_pages: self.config.max_pages,
            generation,
            modulus: self.projector.modulus(),
        };

        event!(
            Level::INFO,
            entries = index.len(),
            collisions = index.collisions.len(),
            complete = index.complete,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index built"
        );

        Ok(index)
    }
}

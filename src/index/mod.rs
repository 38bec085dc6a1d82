//! Point-in-time mapping from projected ids back to opaque ids.
//!
//! A [`ResolutionIndex`] is produced wholesale by one [`IndexBuilder`] run
//! and never changes afterwards. Caches share it behind an `Arc` and replace
//! it as a whole.
//!
//! Lookups follow one decision table ([`ResolutionIndex::lookup`]):
//!
//! | state                          | outcome          |
//! |--------------------------------|------------------|
//! | id is an unresolved collision  | `Ambiguous`      |
//! | id has an entry                | `Hit`            |
//! | absent, index complete         | `MissComplete`   |
//! | absent, index incomplete       | `MissIncomplete` |

pub mod builder;
pub mod collision;

use crate::core::{OpaqueId, ProjectedId, ResolveError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub use builder::{BuildConfig, IndexBuilder};
pub use collision::{Collision, CollisionOutcome, CollisionPolicy};

/// One projected pair observed during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub projected_id: ProjectedId,
    pub opaque_id: OpaqueId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Hit(&'a OpaqueId),
    Ambiguous(&'a Collision),
    MissComplete,
    MissIncomplete,
}

#[derive(Debug)]
pub struct ResolutionIndex {
    entries: HashMap<ProjectedId, OpaqueId>,
    collisions: HashMap<ProjectedId, Collision>,
    built_at: DateTime<Utc>,
    built_instant: Instant,
    complete: bool,
    scanned_count: usize,
    invalid_count: usize,
    pages_fetched: u32,
    max_pages: u32,
    generation: u64,
    modulus: u64,
}

/// Serializable description of an index, without its entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub complete: bool,
    pub entries: usize,
    pub collisions: usize,
    pub unresolved: usize,
    pub scanned_count: usize,
    pub invalid_count: usize,
    pub pages_fetched: u32,
    pub page_cap_hit: bool,
    pub modulus: u64,
}

impl ResolutionIndex {
    pub fn lookup(&self, projected: ProjectedId) -> Lookup<'_> {
        if let Some(collision) = self.collisions.get(&projected) {
            if collision.is_unresolved() {
                return Lookup::Ambiguous(collision);
            }
        }

        match self.entries.get(&projected) {
            Some(opaque) => Lookup::Hit(opaque),
            None if self.complete => Lookup::MissComplete,
            None => Lookup::MissIncomplete,
        }
    }

    /// [`lookup`](Self::lookup) expressed as a resolution result.
    pub fn resolve(&self, projected: ProjectedId) -> Result<OpaqueId> {
        match self.lookup(projected) {
            Lookup::Hit(opaque) => Ok(opaque.clone()),
            Lookup::Ambiguous(collision) => Err(ResolveError::Ambiguous {
                projected,
                candidates: collision.candidates.clone(),
            }),
            Lookup::MissComplete => Err(ResolveError::NotFound(projected)),
            Lookup::MissIncomplete => Err(ResolveError::IndexIncomplete {
                projected,
                scanned: self.scanned_count,
                max_pages: self.max_pages,
            }),
        }
    }

    pub fn get(&self, projected: ProjectedId) -> Option<&OpaqueId> {
        self.entries.get(&projected)
    }

    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        self.entries.iter().map(|(projected, opaque)| IndexEntry {
            projected_id: *projected,
            opaque_id: opaque.clone(),
        })
    }

    pub fn collisions(&self) -> impl Iterator<Item = &Collision> {
        self.collisions.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True when the build stopped at `max_pages` with pages left.
    pub fn page_cap_hit(&self) -> bool {
        !self.complete
    }

    pub fn scanned_count(&self) -> usize {
        self.scanned_count
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid_count
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn age(&self) -> Duration {
        self.built_instant.elapsed()
    }

    pub fn summary(&self) -> IndexSummary {
        IndexSummary {
            generation: self.generation,
            built_at: self.built_at,
            complete: self.complete,
            entries: self.entries.len(),
            collisions: self.collisions.len(),
            unresolved: self.collisions.values().filter(|c| c.is_unresolved()).count(),
            scanned_count: self.scanned_count,
            invalid_count: self.invalid_count,
            pages_fetched: self.pages_fetched,
            page_cap_hit: self.page_cap_hit(),
            modulus: self.modulus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque(n: u64) -> OpaqueId {
        OpaqueId::parse(&format!("00000000-0000-4000-8000-{:012x}", n)).unwrap()
    }

    fn index(complete: bool) -> ResolutionIndex {
        let mut entries = HashMap::new();
        entries.insert(ProjectedId::new(1), opaque(1));

        let mut collisions = HashMap::new();
        collisions.insert(
            ProjectedId::new(2),
            Collision {
                projected: ProjectedId::new(2),
                candidates: vec![opaque(2), opaque(3)],
                outcome: CollisionOutcome::Unresolved,
            },
        );
        entries.insert(ProjectedId::new(4), opaque(4));
        collisions.insert(
            ProjectedId::new(4),
            Collision {
                projected: ProjectedId::new(4),
                candidates: vec![opaque(4), opaque(5)],
                outcome: CollisionOutcome::Kept(opaque(4)),
            },
        );

        ResolutionIndex {
            entries,
            collisions,
            built_at: Utc::now(),
            built_instant: Instant::now(),
            complete,
            scanned_count: 5,
            invalid_count: 0,
            pages_fetched: 1,
            max_pages: 1,
            generation: 1,
            modulus: 1_000_000,
        }
    }

    #[test]
    fn test_lookup_decision_table() {
        let complete = index(true);
        assert_eq!(complete.lookup(ProjectedId::new(1)), Lookup::Hit(&opaque(1)));
        assert!(matches!(
            complete.lookup(ProjectedId::new(2)),
            Lookup::Ambiguous(_)
        ));
        assert_eq!(complete.lookup(ProjectedId::new(4)), Lookup::Hit(&opaque(4)));
        assert_eq!(complete.lookup(ProjectedId::new(9)), Lookup::MissComplete);

        let partial = index(false);
        assert_eq!(partial.lookup(ProjectedId::new(9)), Lookup::MissIncomplete);
    }

    #[test]
    fn test_resolve_errors() {
        let partial = index(false);
        assert_eq!(
            partial.resolve(ProjectedId::new(2)),
            Err(ResolveError::Ambiguous {
                projected: ProjectedId::new(2),
                candidates: vec![opaque(2), opaque(3)],
            })
        );
        assert!(matches!(
            partial.resolve(ProjectedId::new(9)),
            Err(ResolveError::IndexIncomplete { scanned: 5, .. })
        ));
        assert_eq!(
            index(true).resolve(ProjectedId::new(9)),
            Err(ResolveError::NotFound(ProjectedId::new(9)))
        );
    }

    #[test]
    fn test_summary() {
        let summary = index(true).summary();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.collisions, 2);
        assert_eq!(summary.unresolved, 1);
        assert!(!summary.page_cap_hit);
    }
}

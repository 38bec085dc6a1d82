//! Opaque id → projected id.
//!
//! The projection keeps the leading [`PREFIX_HEX_DIGITS`] hex digits of the
//! opaque id (separators stripped), reads them as a base-16 integer and
//! reduces it modulo `M`. It has no seed and no process state, so the same
//! opaque id maps to the same projected id everywhere and forever, as long as
//! `M` does not change.

use crate::core::{OpaqueId, ProjectedId, ResolveError, Result};
use serde::{Deserialize, Serialize};

/// Default size of the projected space.
pub const DEFAULT_MODULUS: u64 = 1_000_000;

/// Number of leading hex digits fed into the reduction (40 bits).
pub const PREFIX_HEX_DIGITS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projector {
    modulus: u64,
}

impl Projector {
    pub fn new(modulus: u64) -> Result<Self> {
        if modulus == 0 {
            return Err(ResolveError::Config("modulus must be > 0".to_string()));
        }
        Ok(Self { modulus })
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    pub fn project(&self, id: &OpaqueId) -> ProjectedId {
        let prefix = id.as_u128() >> (128 - PREFIX_HEX_DIGITS * 4);
        ProjectedId::new(prefix as u64 % self.modulus)
    }

    /// Validates `raw` as an opaque id and projects it.
    pub fn project_str(&self, raw: &str) -> Result<ProjectedId> {
        Ok(self.project(&OpaqueId::parse(raw)?))
    }

    /// Parses a route segment into a projected id inside `[0, M)`.
    pub fn parse_projected(&self, segment: &str) -> Result<ProjectedId> {
        let projected: ProjectedId = segment.parse()?;
        self.check_range(projected)?;
        Ok(projected)
    }

    pub fn check_range(&self, projected: ProjectedId) -> Result<()> {
        if projected.value() >= self.modulus {
            return Err(ResolveError::InvalidFormat(format!(
                "projected id {} is outside [0, {})",
                projected, self.modulus
            )));
        }
        Ok(())
    }

    /// Birthday-bound probability that at least two of `n` ids share a
    /// projected id.
    pub fn collision_probability(&self, n: usize) -> f64 {
        if n < 2 {
            return 0.0;
        }
        let n = n as f64;
        let m = self.modulus as f64;
        1.0 - (-(n * (n - 1.0)) / (2.0 * m)).exp()
    }

    /// Largest corpus for which collisions stay unlikely (`floor(sqrt(M))`).
    pub fn safe_corpus_size(&self) -> usize {
        (self.modulus as f64).sqrt().floor() as usize
    }

    /// True once a corpus of `n` entities makes collisions likely.
    pub fn is_unsafe_for(&self, n: usize) -> bool {
        n > self.safe_corpus_size()
    }
}

impl Default for Projector {
    fn default() -> Self {
        Self {
            modulus: DEFAULT_MODULUS,
        }
    }
}

/// Projects `raw` with the default modulus.
///
/// Callers that have just created an entity should use this instead of
/// resolving through a cached index, which may not contain it yet.
pub fn project(raw: &str) -> Result<ProjectedId> {
    Projector::default().project_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const WORKED_EXAMPLE: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";

    #[test]
    fn test_worked_example() {
        // 0x3fa85f6457 = 273_407_763_543
        assert_eq!(project(WORKED_EXAMPLE).unwrap(), ProjectedId::new(763_543));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let projector = Projector::default();
        for _ in 0..100 {
            let id = OpaqueId::from(Uuid::new_v4());
            let first = projector.project(&id);
            let again = projector.project(&OpaqueId::parse(id.as_str()).unwrap());
            assert_eq!(first, again);
            assert!(first.value() < DEFAULT_MODULUS);
        }
    }

    #[test]
    fn test_only_prefix_matters() {
        let a = project("3fa85f64-57ff-ffff-ffff-ffffffffffff").unwrap();
        let b = project("3fa85f64-5700-0000-0000-000000000000").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            project("not-an-id"),
            Err(ResolveError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_zero_modulus_rejected() {
        assert!(matches!(Projector::new(0), Err(ResolveError::Config(_))));
    }

    #[test]
    fn test_parse_projected_range() {
        let projector = Projector::new(1_000).unwrap();
        assert_eq!(projector.parse_projected("999").unwrap(), ProjectedId::new(999));
        assert!(projector.parse_projected("1000").is_err());
        assert!(projector.parse_projected("abc").is_err());
    }

    #[test]
    fn test_distribution_is_roughly_uniform() {
        let projector = Projector::new(100).unwrap();
        let mut buckets = [0usize; 100];
        for _ in 0..10_000 {
            let id = OpaqueId::from(Uuid::new_v4());
            buckets[projector.project(&id).value() as usize] += 1;
        }
        for (bucket, count) in buckets.iter().enumerate() {
            assert!(
                (40..=160).contains(count),
                "bucket {} got {} of 10000",
                bucket,
                count
            );
        }
    }

    #[test]
    fn test_birthday_bound() {
        let projector = Projector::default();
        assert_eq!(projector.collision_probability(1), 0.0);
        assert_eq!(projector.safe_corpus_size(), 1_000);
        assert!(!projector.is_unsafe_for(1_000));
        assert!(projector.is_unsafe_for(1_001));

        let p = projector.collision_probability(1_000);
        assert!(p > 0.39 && p < 0.40, "p = {}", p);
    }
}

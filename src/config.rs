use crate::index::{BuildConfig, CollisionPolicy};
use crate::projector::DEFAULT_MODULUS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behavior for transient resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential backoff before retry number `attempt` (1-based).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let base = self.initial_backoff_ms.max(1);
        let max = self.max_backoff_ms.max(base);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor).min(max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 250,
        }
    }
}

/// Resolver configuration
///
/// Built with chained setters or loaded from JSON; every missing field takes
/// its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Size of the projected id space
    pub modulus: u64,

    /// Paging limits and collision policy for index builds
    pub build: BuildConfig,

    /// Age after which a cached index is rebuilt
    pub ttl_ms: u64,

    /// Longest a single index build may run
    pub build_deadline_ms: u64,

    /// Longest one resolve attempt waits for an index
    pub resolve_deadline_ms: u64,

    /// Retry policy for unavailable sources and indexes
    pub retry: RetryPolicy,
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projected id space
    pub fn modulus(mut self, modulus: u64) -> Self {
        self.modulus = modulus;
        self
    }

    /// Set entities requested per page
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.build.page_size = page_size;
        self
    }

    /// Set the page cap of a build
    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.build.max_pages = max_pages;
        self
    }

    pub fn collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.build.collision_policy = policy;
        self
    }

    /// Set index time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Set build deadline
    pub fn build_deadline(mut self, deadline: Duration) -> Self {
        self.build_deadline_ms = deadline.as_millis() as u64;
        self
    }

    /// Set resolve deadline
    pub fn resolve_deadline(mut self, deadline: Duration) -> Self {
        self.resolve_deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn build_deadline_duration(&self) -> Duration {
        Duration::from_millis(self.build_deadline_ms)
    }

    pub fn resolve_deadline_duration(&self) -> Duration {
        Duration::from_millis(self.resolve_deadline_ms)
    }

    /// Parse and validate a JSON document
    ///
    /// ```
    /// use shortid::ResolverConfig;
    ///
    /// let config = ResolverConfig::from_json_str(
    ///     r#"{ "ttl_ms": 5000, "build": { "page_size": 50, "max_pages": 40 } }"#
    /// ).unwrap();
    /// assert_eq!(config.build.item_cap(), 2_000);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| format!("invalid config: {}", err))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.modulus == 0 {
            return Err("modulus must be > 0".to_string());
        }

        if self.build.page_size == 0 {
            return Err("page_size must be > 0".to_string());
        }

        if self.build.max_pages == 0 {
            return Err("max_pages must be > 0".to_string());
        }

        if self.build_deadline_ms == 0 {
            return Err("build_deadline_ms must be > 0".to_string());
        }

        if self.resolve_deadline_ms == 0 {
            return Err("resolve_deadline_ms must be > 0".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            modulus: DEFAULT_MODULUS,
            build: BuildConfig::default(),
            ttl_ms: 30_000,
            build_deadline_ms: 10_000,
            resolve_deadline_ms: 15_000,
            retry: RetryPolicy::default(),
        }
    }
}

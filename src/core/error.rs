use super::types::{OpaqueId, ProjectedId};
use thiserror::Error;

/// Failures surfaced by projection and resolution.
///
/// The enum is `Clone` because one in-flight index build hands the same
/// outcome to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error(
        "Projected id {projected} is not among the {scanned} entities scanned before the {max_pages}-page cap"
    )]
    IndexIncomplete {
        projected: ProjectedId,
        scanned: usize,
        max_pages: u32,
    },

    #[error("Projected id {projected} is ambiguous between {} opaque ids", .candidates.len())]
    Ambiguous {
        projected: ProjectedId,
        candidates: Vec<OpaqueId>,
    },

    #[error("Projected id {0} not found")]
    NotFound(ProjectedId),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResolveError {
    /// Transient failures that a caller may retry after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolveError::SourceUnavailable(_) | ResolveError::IndexUnavailable(_)
        )
    }

    /// Stable machine-readable code, used by the HTTP layer and the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::InvalidFormat(_) => "invalid_format",
            ResolveError::SourceUnavailable(_) => "source_unavailable",
            ResolveError::IndexIncomplete { .. } => "index_incomplete",
            ResolveError::Ambiguous { .. } => "ambiguous",
            ResolveError::NotFound(_) => "not_found",
            ResolveError::IndexUnavailable(_) => "index_unavailable",
            ResolveError::Config(_) => "config_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Failures reported by an entity source while listing or fetching.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Entity '{0}' not found")]
    NotFound(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

impl From<SourceError> for ResolveError {
    fn from(err: SourceError) -> Self {
        Self::SourceUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ResolveError::SourceUnavailable("down".into()).is_retryable());
        assert!(ResolveError::IndexUnavailable("slow".into()).is_retryable());
        assert!(!ResolveError::NotFound(ProjectedId::new(7)).is_retryable());
        assert!(!ResolveError::InvalidFormat("x".into()).is_retryable());
    }

    #[test]
    fn test_ambiguous_message_counts_candidates() {
        let err = ResolveError::Ambiguous {
            projected: ProjectedId::new(42),
            candidates: vec![
                OpaqueId::parse("00000000-0000-4000-8000-000000000001").unwrap(),
                OpaqueId::parse("00000000-0000-4000-8000-000000000002").unwrap(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Projected id 42 is ambiguous between 2 opaque ids"
        );
        assert_eq!(err.code(), "ambiguous");
    }

    #[test]
    fn test_source_error_maps_to_unavailable() {
        let err: ResolveError = SourceError::Timeout(250).into();
        assert_eq!(
            err,
            ResolveError::SourceUnavailable("Request timed out after 250ms".into())
        );
    }
}

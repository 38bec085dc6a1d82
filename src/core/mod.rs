pub mod error;
pub mod types;

pub use error::{ResolveError, Result, SourceError, SourceResult};
pub use types::{OpaqueId, ProjectedId};

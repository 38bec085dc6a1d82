//! Entity sources the index is built from.
//!
//! A source is the system of record: it lists entities page by page and
//! fetches one entity by its opaque id. Sources that can observe their own
//! mutations expose them through [`EntitySource::subscribe`] so a cache can
//! drop its index as soon as the corpus changes.

pub mod memory;
pub mod rest;

use crate::core::{OpaqueId, SourceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use memory::MemorySource;
pub use rest::{RemoteEntity, RestSource};

/// Anything that carries the raw opaque key issued by the backend.
pub trait Keyed {
    fn opaque_key(&self) -> &str;
}

impl Keyed for String {
    fn opaque_key(&self) -> &str {
        self
    }
}

impl Keyed for OpaqueId {
    fn opaque_key(&self) -> &str {
        self.as_str()
    }
}

/// One page of a listing. Pages are numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPage<E> {
    pub items: Vec<E>,
    pub page: u32,
    pub total_pages: u32,
}

impl<E> EntityPage<E> {
    /// True when no page follows this one.
    pub fn is_last(&self) -> bool {
        self.items.is_empty() || self.page >= self.total_pages
    }
}

/// Mutation notice published by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Created(OpaqueId),
    Deleted(OpaqueId),
    /// The corpus changed in a way that cannot be pinned to one id.
    Reset,
}

#[async_trait]
pub trait EntitySource: Send + Sync + 'static {
    type Entity: Keyed + Send + Sync + 'static;

    async fn list(&self, page: u32, limit: u32) -> SourceResult<EntityPage<Self::Entity>>;

    async fn get_by_id(&self, id: &OpaqueId) -> SourceResult<Self::Entity>;

    /// Mutation feed, if the source can observe its own writes.
    fn subscribe(&self) -> Option<broadcast::Receiver<SourceEvent>> {
        None
    }
}

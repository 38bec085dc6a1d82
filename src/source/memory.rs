use super::{EntityPage, EntitySource, Keyed, SourceEvent};
use crate::core::{OpaqueId, SourceError, SourceResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};

const EVENT_CAPACITY: usize = 256;

/// In-process entity source.
///
/// Keeps entities in insertion order, publishes a [`SourceEvent`] for every
/// mutation and counts the calls made against it. Failures and latency can be
/// injected to exercise the build error paths.
pub struct MemorySource<E> {
    entities: RwLock<Vec<E>>,
    events: broadcast::Sender<SourceEvent>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    scans: AtomicUsize,
    /// Page number that fails when listed; 0 disables.
    failing_page: AtomicU32,
    latency_ms: AtomicU64,
}

impl<E> MemorySource<E>
where
    E: Keyed + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_entities(Vec::new())
    }

    pub fn with_entities(entities: Vec<E>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entities: RwLock::new(entities),
            events,
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
            failing_page: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Delay every `list` call by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make listing `page` fail until cleared with `None`.
    pub fn fail_page(&self, page: Option<u32>) {
        self.failing_page.store(page.unwrap_or(0), Ordering::SeqCst);
    }

    pub async fn insert(&self, entity: E) {
        let event = match OpaqueId::parse(entity.opaque_key()) {
            Ok(id) => SourceEvent::Created(id),
            Err(_) => SourceEvent::Reset,
        };
        self.entities.write().await.push(entity);
        // No receivers is fine: nobody is caching.
        let _ = self.events.send(event);
    }

    /// Removes the entity keyed `key`, returning it if present.
    pub async fn remove(&self, key: &str) -> Option<E> {
        let removed = {
            let mut entities = self.entities.write().await;
            let position = entities.iter().position(|e| e.opaque_key() == key)?;
            entities.remove(position)
        };

        let event = match OpaqueId::parse(key) {
            Ok(id) => SourceEvent::Deleted(id),
            Err(_) => SourceEvent::Reset,
        };
        let _ = self.events.send(event);
        Some(removed)
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of full scans started, i.e. listings of page 1.
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl<E> Default for MemorySource<E>
where
    E: Keyed + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EntitySource for MemorySource<E>
where
    E: Keyed + Clone + Send + Sync + 'static,
{
    type Entity = E;

    async fn list(&self, page: u32, limit: u32) -> SourceResult<EntityPage<E>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if page == 1 {
            self.scans.fetch_add(1, Ordering::SeqCst);
        }

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if page == 0 || limit == 0 {
            return Err(SourceError::Status {
                status: 400,
                message: format!("invalid paging page={} limit={}", page, limit),
            });
        }

        if self.failing_page.load(Ordering::SeqCst) == page {
            return Err(SourceError::Transport(format!(
                "injected failure on page {}",
                page
            )));
        }

        let entities = self.entities.read().await;
        let limit = limit as usize;
        let total_pages = entities.len().div_ceil(limit) as u32;
        let start = (page as usize - 1).saturating_mul(limit);
        let items = entities
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect();

        Ok(EntityPage {
            items,
            page,
            total_pages,
        })
    }

    async fn get_by_id(&self, id: &OpaqueId) -> SourceResult<E> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let entities = self.entities.read().await;
        entities
            .iter()
            .find(|e| e.opaque_key().eq_ignore_ascii_case(id.as_str()))
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SourceEvent>> {
        Some(self.events.subscribe())
    }
}

//! Push-update listener
//!
//! Applies `status` namespace events to the [`QueryCache`] in receipt order.
//! Partial tag updates are merged in place; `"all"` updates mark the entry
//! stale and refetch it. After a reconnect (or if this listener fell behind
//! the event bus) everything cached is refetched, since messages sent while
//! the socket was down are gone.
//!
//! Updates for tags the cache does not hold are dropped unless discovery is
//! enabled, in which case the tag is fetched and cached.

use std::sync::Arc;

use tagdeck_common::events::{Attributes, Namespace, StatusEvent, TagUpdate, TagdeckEvent};
use tagdeck_common::{Error, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::api::LibraryApi;
use crate::cache::{CacheKey, PatchSource, QueryCache};

/// What applying one push event did to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Fields merged into the entry, producing this version
    Patched { key: CacheKey, version: u64 },
    /// Entry flagged for refetch
    MarkedStale(CacheKey),
    /// Event named nothing this cache holds
    Ignored,
}

pub struct PushUpdateListener<A> {
    api: Arc<A>,
    discover_uncached: bool,
}

impl<A: LibraryApi> PushUpdateListener<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            discover_uncached: false,
        }
    }

    /// Fetch tags named by updates even when they are not cached yet
    pub fn with_discovery(mut self) -> Self {
        self.discover_uncached = true;
        self
    }

    /// Apply one status event to the cache without any I/O.
    ///
    /// A partial inbox update is a contract violation and returns
    /// [`Error::UnsupportedPush`].
    pub fn apply(event: &StatusEvent, cache: &mut QueryCache) -> Result<Applied> {
        match event {
            StatusEvent::Tag(update) => Ok(apply_tag(update, cache)),
            StatusEvent::Inbox(update) => match &update.attributes {
                Attributes::All => {
                    cache.mark_stale(CacheKey::Inbox);
                    Ok(Applied::MarkedStale(CacheKey::Inbox))
                }
                Attributes::Partial(fields) => Err(Error::UnsupportedPush(format!(
                    "inbox update must carry \"all\", got partial fields {:?}",
                    fields.keys().collect::<Vec<_>>()
                ))),
            },
        }
    }

    /// Refetch every stale key. See [`refresh_stale`].
    pub async fn refresh(&self, cache: &Mutex<QueryCache>) -> usize {
        refresh_stale(self.api.as_ref(), cache).await
    }

    /// Consume the event bus until it closes.
    ///
    /// Returns an error only for contract violations in the push stream.
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<TagdeckEvent>,
        cache: Arc<Mutex<QueryCache>>,
    ) -> Result<()> {
        info!("push-update listener started");
        loop {
            match events.recv().await {
                Ok(TagdeckEvent::Status { event }) => {
                    let applied = {
                        let mut cache = cache.lock().await;
                        match Self::apply(&event, &mut cache)? {
                            Applied::Ignored if self.discover_uncached => discover(&event, &mut cache),
                            applied => applied,
                        }
                    };
                    debug!(?applied, "push update applied");
                    if matches!(applied, Applied::MarkedStale(_)) {
                        self.refresh(&cache).await;
                    }
                }
                Ok(TagdeckEvent::Connected {
                    namespace: Namespace::Status,
                    reconnect: true,
                    ..
                }) => {
                    info!("status channel reconnected; refetching cached entries");
                    self.resync(&cache).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "push-update listener lagged; refetching cached entries");
                    self.resync(&cache).await;
                }
                Err(RecvError::Closed) => {
                    info!("event bus closed; push-update listener stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn resync(&self, cache: &Mutex<QueryCache>) {
        cache.lock().await.invalidate_all();
        let refreshed = self.refresh(cache).await;
        info!(refreshed, "resync complete");
    }
}

/// Refetch every stale key through `api`. Failed fetches are logged and stay
/// stale. Returns how many entries were replaced.
pub async fn refresh_stale<A: LibraryApi>(api: &A, cache: &Mutex<QueryCache>) -> usize {
    let keys = cache.lock().await.take_stale();
    let mut refreshed = 0;

    for key in keys {
        // No cache lock is held while the request is in flight.
        let result = match &key {
            CacheKey::TagById(id) => api.fetch_tag_by_id(id).await.map(Refetched::Tag),
            CacheKey::TagByPath(path) => api.fetch_tag_by_path(path).await.map(Refetched::Tag),
            CacheKey::Inbox => api.fetch_inbox().await.map(Refetched::Listing),
            CacheKey::TagGroups => api.fetch_tag_groups().await.map(Refetched::Listing),
        };

        let mut cache = cache.lock().await;
        match result {
            Ok(Refetched::Tag(record)) => {
                debug!(id = %record.id, status = %record.status, "tag refetched");
                cache.insert_tag(record);
                refreshed += 1;
            }
            Ok(Refetched::Listing(value)) => {
                debug!(?key, "listing refetched");
                cache.set_listing(key, value);
                refreshed += 1;
            }
            Err(e) => {
                warn!(?key, error = %e, "refetch failed; entry left stale");
                cache.mark_stale(key);
            }
        }
    }
    refreshed
}

enum Refetched {
    Tag(crate::cache::TagRecord),
    Listing(serde_json::Value),
}

fn apply_tag(update: &TagUpdate, cache: &mut QueryCache) -> Applied {
    // Prefer the id; fall back to the folder path.
    let key = [
        update.tag_id.clone().map(CacheKey::TagById),
        update.tag_path.clone().map(CacheKey::TagByPath),
    ]
    .into_iter()
    .flatten()
    .find(|key| cache.resolve_tag_id(key).is_some());

    let Some(key) = key else {
        info!(tag_id = ?update.tag_id, tag_path = ?update.tag_path, "update for uncached tag ignored");
        return Applied::Ignored;
    };

    match &update.attributes {
        Attributes::All => {
            cache.mark_stale(key.clone());
            Applied::MarkedStale(key)
        }
        Attributes::Partial(fields) => match cache.patch_tag(&key, fields, PatchSource::Authoritative) {
            Some(version) => Applied::Patched { key, version },
            None => Applied::Ignored,
        },
    }
}

/// Queue an uncached tag named by `event` for its first fetch
fn discover(event: &StatusEvent, cache: &mut QueryCache) -> Applied {
    let StatusEvent::Tag(update) = event else {
        return Applied::Ignored;
    };
    let key = match (&update.tag_id, &update.tag_path) {
        (Some(id), _) => CacheKey::TagById(id.clone()),
        (None, Some(path)) => CacheKey::TagByPath(path.clone()),
        (None, None) => return Applied::Ignored,
    };
    if cache.resolve_tag_id(&key).is_some() {
        return Applied::Ignored;
    }
    debug!(?key, "discovered uncached tag");
    cache.mark_stale(key.clone());
    Applied::MarkedStale(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{TagRecord, STATUS_IMPORTED};
    use crate::testing::MockApi;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tagdeck_common::events::{EventBus, InboxUpdate};

    fn tag_event(payload: serde_json::Value) -> StatusEvent {
        StatusEvent::from_socket_event("tag", payload).unwrap().unwrap()
    }

    fn seeded() -> QueryCache {
        let mut cache = QueryCache::new();
        let mut record = TagRecord::new("t1", "/inbox/a", "tagged");
        record.preview = Some("Artist - Album".to_string());
        cache.insert_tag(record);
        cache
    }

    #[test]
    fn test_partial_tag_update_merges_only_named_fields() {
        let mut cache = seeded();
        let applied = PushUpdateListener::<MockApi>::apply(
            &tag_event(json!({"attributes": {"status": "imported"}, "tagId": "t1"})),
            &mut cache,
        )
        .unwrap();
        assert!(matches!(applied, Applied::Patched { .. }));

        let tag = cache.tag("t1").unwrap();
        assert_eq!(tag.status, STATUS_IMPORTED);
        assert_eq!(tag.preview.as_deref(), Some("Artist - Album"));
        let entry = cache.tag_entry(&CacheKey::TagById("t1".to_string())).unwrap();
        assert_eq!(entry.last_patch.as_ref().unwrap().source, PatchSource::Authoritative);
    }

    #[test]
    fn test_tag_all_marks_cached_entry_stale() {
        let mut cache = seeded();
        let applied = PushUpdateListener::<MockApi>::apply(
            &tag_event(json!({"attributes": "all", "tagPath": "/inbox/a"})),
            &mut cache,
        )
        .unwrap();
        assert_eq!(applied, Applied::MarkedStale(CacheKey::TagByPath("/inbox/a".to_string())));
        assert!(cache.is_stale(&CacheKey::TagById("t1".to_string())));
        // Data stays readable until the refetch lands
        assert_eq!(cache.tag("t1").unwrap().preview.as_deref(), Some("Artist - Album"));
    }

    #[test]
    fn test_update_for_uncached_tag_is_ignored() {
        let mut cache = seeded();
        let applied = PushUpdateListener::<MockApi>::apply(
            &tag_event(json!({"attributes": "all", "tagId": "zzz"})),
            &mut cache,
        )
        .unwrap();
        assert_eq!(applied, Applied::Ignored);
        assert!(cache.take_stale().is_empty());
    }

    #[test]
    fn test_partial_inbox_update_raises() {
        let mut cache = seeded();
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("name".to_string(), "x".to_string());
        let event = StatusEvent::Inbox(InboxUpdate {
            attributes: Attributes::Partial(fields),
        });
        assert!(matches!(
            PushUpdateListener::<MockApi>::apply(&event, &mut cache),
            Err(Error::UnsupportedPush(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_replaces_stale_tag_with_backend_copy() {
        let mut fresh = TagRecord::new("t1", "/inbox/a", STATUS_IMPORTED);
        fresh.gui_import_id = Some("imp-9".to_string());
        let listener = PushUpdateListener::new(Arc::new(MockApi::with_tags([fresh])));

        let cache = Mutex::new(seeded());
        cache.lock().await.mark_stale(CacheKey::TagById("t1".to_string()));
        assert_eq!(listener.refresh(&cache).await, 1);

        let cache = cache.lock().await;
        assert!(!cache.is_stale(&CacheKey::TagById("t1".to_string())));
        assert_eq!(cache.tag("t1").unwrap().gui_import_id.as_deref(), Some("imp-9"));
    }

    #[tokio::test]
    async fn test_failed_refetch_leaves_entry_stale() {
        let api = MockApi::default();
        api.fail.store(true, Ordering::SeqCst);
        let listener = PushUpdateListener::new(Arc::new(api));

        let cache = Mutex::new(seeded());
        cache.lock().await.mark_stale(CacheKey::Inbox);
        assert_eq!(listener.refresh(&cache).await, 0);
        assert!(cache.lock().await.is_stale(&CacheKey::Inbox));
    }

    #[tokio::test]
    async fn test_run_applies_in_order_and_stops_on_partial_inbox() {
        let listener = PushUpdateListener::new(Arc::new(MockApi::default()));
        let cache = Arc::new(Mutex::new(seeded()));
        let bus = EventBus::new(16);
        let rx = bus.subscribe();

        for status in ["preview", "pending"] {
            bus.emit(TagdeckEvent::Status {
                event: tag_event(json!({"attributes": {"status": status}, "tagId": "t1"})),
            })
            .unwrap();
        }
        bus.emit(TagdeckEvent::Status {
            event: StatusEvent::from_socket_event("inbox", json!({"attributes": {"a": "b"}}))
                .unwrap()
                .unwrap(),
        })
        .unwrap();

        let result = listener.run(rx, cache.clone()).await;
        assert!(matches!(result, Err(Error::UnsupportedPush(_))));
        assert_eq!(cache.lock().await.tag("t1").unwrap().status, "pending");
    }

    #[tokio::test]
    async fn test_discovery_fetches_uncached_tag() {
        let api = Arc::new(MockApi::with_tags([TagRecord::new("t7", "/inbox/new", "preview")]));
        let cache = Arc::new(Mutex::new(QueryCache::new()));
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        bus.emit(TagdeckEvent::Status {
            event: tag_event(json!({"attributes": {"status": "preview"}, "tagId": "t7"})),
        })
        .unwrap();
        drop(bus);

        PushUpdateListener::new(api.clone())
            .with_discovery()
            .run(rx, cache.clone())
            .await
            .unwrap();
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.lock().await.tag("t7").unwrap().album_folder, "/inbox/new");
    }

    #[tokio::test]
    async fn test_without_discovery_uncached_tag_is_not_fetched() {
        let api = Arc::new(MockApi::with_tags([TagRecord::new("t7", "/inbox/new", "preview")]));
        let cache = Arc::new(Mutex::new(QueryCache::new()));
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        bus.emit(TagdeckEvent::Status {
            event: tag_event(json!({"attributes": "all", "tagPath": "/inbox/new"})),
        })
        .unwrap();
        drop(bus);

        PushUpdateListener::new(api.clone()).run(rx, cache.clone()).await.unwrap();
        assert_eq!(api.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(cache.lock().await.num_tags(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_triggers_full_refetch() {
        let api = Arc::new(MockApi::with_tags([TagRecord::new("t1", "/inbox/a", "imported")]));
        let listener = PushUpdateListener::new(api.clone());
        let cache = Arc::new(Mutex::new(seeded()));
        cache.lock().await.set_listing(CacheKey::Inbox, json!({}));

        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        bus.emit(TagdeckEvent::Connected {
            namespace: Namespace::Status,
            reconnect: true,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();
        drop(bus);

        listener.run(rx, cache.clone()).await.unwrap();
        assert_eq!(api.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(cache.lock().await.tag("t1").unwrap().status, "imported");
    }
}

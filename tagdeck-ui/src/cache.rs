//! Client-side reflection of backend query results
//!
//! The backend owns every record; this cache only mirrors it. Each tag entry
//! carries a version and the last patch applied to it, tagged with whether
//! the patch was an optimistic local guess or an authoritative push, so the
//! order in which the two kinds land can be inspected without any UI.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Status value of a tag whose import finished
pub const STATUS_IMPORTED: &str = "imported";

/// Transitional status applied optimistically after a retag/import request
pub const STATUS_PENDING: &str = "pending";

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    TagById(String),
    TagByPath(String),
    /// Inbox folder listing
    Inbox,
    /// Tag-group listing
    TagGroups,
}

/// A tag as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: String,
    pub album_folder: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub preview: Option<String>,
    /// Identifier the library stamped on items imported from this tag
    #[serde(default)]
    pub gui_import_id: Option<String>,
    /// Fields this client does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TagRecord {
    pub fn new(id: &str, album_folder: &str, status: &str) -> Self {
        Self {
            id: id.to_string(),
            album_folder: album_folder.to_string(),
            status: status.to_string(),
            distance: None,
            preview: None,
            gui_import_id: None,
            extra: BTreeMap::new(),
        }
    }

    /// Return a copy with `patch` merged in; fields not named by the patch
    /// are kept.
    pub fn merged(&self, patch: &BTreeMap<String, String>) -> TagRecord {
        let mut next = self.clone();
        for (field, value) in patch {
            match field.as_str() {
                "id" => {
                    if value != &self.id {
                        warn!(id = %self.id, patched = %value, "ignoring attempt to patch tag id");
                    }
                }
                "album_folder" => next.album_folder = value.clone(),
                "status" => next.status = value.clone(),
                "preview" => next.preview = Some(value.clone()),
                "gui_import_id" => next.gui_import_id = Some(value.clone()),
                "distance" => match value.parse::<f64>() {
                    Ok(d) => next.distance = Some(d),
                    Err(_) => {
                        warn!(id = %self.id, value = %value, "non-numeric distance in patch");
                    }
                },
                _ => {
                    next.extra.insert(field.clone(), Value::String(value.clone()));
                }
            }
        }
        next
    }
}

/// Where a patch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchSource {
    Optimistic,
    Authoritative,
}

/// Last patch applied to an entry
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecord {
    /// Entry version produced by this patch
    pub version: u64,
    pub old: TagRecord,
    pub patch: BTreeMap<String, String>,
    pub source: PatchSource,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub version: u64,
    pub stale: bool,
    pub last_patch: Option<PatchRecord>,
}

impl<T> CacheEntry<T> {
    fn fresh(value: T, version: u64) -> Self {
        Self {
            value,
            version,
            stale: false,
            last_patch: None,
        }
    }
}

/// Shared query cache for one client session
#[derive(Debug, Default)]
pub struct QueryCache {
    tags: HashMap<String, CacheEntry<TagRecord>>,
    /// album folder -> tag id
    by_path: HashMap<String, String>,
    listings: HashMap<CacheKey, CacheEntry<Value>>,
    /// Keys awaiting refetch, in the order they went stale
    stale: Vec<CacheKey>,
    /// Global version counter so versions are comparable across entries
    clock: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Resolve a tag key to the tag id it currently names
    pub fn resolve_tag_id(&self, key: &CacheKey) -> Option<String> {
        match key {
            CacheKey::TagById(id) if self.tags.contains_key(id) => Some(id.clone()),
            CacheKey::TagByPath(path) => self.by_path.get(path).cloned(),
            _ => None,
        }
    }

    /// Look a tag up by id, falling back to album folder
    pub fn tag_for_identifier(&self, identifier: &str) -> Option<&TagRecord> {
        self.tag(identifier).or_else(|| self.tag_by_path(identifier))
    }

    pub fn tag(&self, id: &str) -> Option<&TagRecord> {
        self.tags.get(id).map(|e| &e.value)
    }

    pub fn tag_by_path(&self, path: &str) -> Option<&TagRecord> {
        self.by_path.get(path).and_then(|id| self.tag(id))
    }

    pub fn tag_entry(&self, key: &CacheKey) -> Option<&CacheEntry<TagRecord>> {
        self.resolve_tag_id(key).and_then(|id| self.tags.get(&id))
    }

    /// Install an authoritative record, replacing any cached copy
    pub fn insert_tag(&mut self, record: TagRecord) {
        let version = self.tick();
        if let Some(previous) = self.tags.get(&record.id) {
            if previous.value.album_folder != record.album_folder {
                self.by_path.remove(&previous.value.album_folder);
            }
        }
        self.by_path.insert(record.album_folder.clone(), record.id.clone());
        let id = record.id.clone();
        let folder = record.album_folder.clone();
        self.tags.insert(id.clone(), CacheEntry::fresh(record, version));
        self.stale.retain(|k| match k {
            CacheKey::TagById(i) => *i != id,
            CacheKey::TagByPath(p) => *p != folder,
            _ => true,
        });
    }

    /// Merge `patch` into the tag named by `key`. Returns the new version,
    /// or `None` if the tag is not cached.
    pub fn patch_tag(
        &mut self,
        key: &CacheKey,
        patch: &BTreeMap<String, String>,
        source: PatchSource,
    ) -> Option<u64> {
        let id = self.resolve_tag_id(key)?;
        let version = self.tick();
        let entry = self.tags.get(&id)?;

        let old = entry.value.clone();
        let value = old.merged(patch);
        let old_folder = old.album_folder.clone();
        let new_folder = value.album_folder.clone();
        let replacement = CacheEntry {
            value,
            version,
            stale: entry.stale,
            last_patch: Some(PatchRecord {
                version,
                old,
                patch: patch.clone(),
                source,
                applied_at: Utc::now(),
            }),
        };

        // Single replace of the whole entry
        self.tags.insert(id.clone(), replacement);
        if old_folder != new_folder {
            self.by_path.remove(&old_folder);
            self.by_path.insert(new_folder, id.clone());
        }
        debug!(id = %id, version, ?source, "tag patched");
        Some(version)
    }

    pub fn set_listing(&mut self, key: CacheKey, value: Value) {
        let version = self.tick();
        self.stale.retain(|k| *k != key);
        self.listings.insert(key, CacheEntry::fresh(value, version));
    }

    pub fn listing(&self, key: &CacheKey) -> Option<&CacheEntry<Value>> {
        self.listings.get(key)
    }

    /// Flag `key` for refetch. Tag keys are normalised to `TagById` when the
    /// tag is cached; unknown tag paths are kept as `TagByPath`.
    pub fn mark_stale(&mut self, key: CacheKey) {
        let key = match &key {
            CacheKey::TagById(_) | CacheKey::TagByPath(_) => match self.resolve_tag_id(&key) {
                Some(id) => {
                    if let Some(entry) = self.tags.get_mut(&id) {
                        entry.stale = true;
                    }
                    CacheKey::TagById(id)
                }
                None => key,
            },
            CacheKey::Inbox | CacheKey::TagGroups => {
                if let Some(entry) = self.listings.get_mut(&key) {
                    entry.stale = true;
                }
                key
            }
        };
        if !self.stale.contains(&key) {
            self.stale.push(key);
        }
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        match key {
            CacheKey::Inbox | CacheKey::TagGroups => self.stale.contains(key),
            _ => match self.resolve_tag_id(key) {
                Some(id) => self.stale.contains(&CacheKey::TagById(id)),
                None => self.stale.contains(key),
            },
        }
    }

    /// Listing caches whose membership changes on delete
    pub fn invalidate_lists(&mut self) {
        self.mark_stale(CacheKey::Inbox);
        self.mark_stale(CacheKey::TagGroups);
    }

    /// Mark every cached entry stale (reconnect recovery)
    pub fn invalidate_all(&mut self) {
        let mut ids: Vec<String> = self.tags.keys().cloned().collect();
        ids.sort();
        for id in ids {
            self.mark_stale(CacheKey::TagById(id));
        }
        let mut listings: Vec<CacheKey> = self.listings.keys().cloned().collect();
        listings.sort();
        for key in listings {
            self.mark_stale(key);
        }
    }

    /// Drain keys awaiting refetch, oldest first
    pub fn take_stale(&mut self) -> Vec<CacheKey> {
        std::mem::take(&mut self.stale)
    }

    pub fn has_stale(&self) -> bool {
        !self.stale.is_empty()
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }
}

//! In-memory collaborators for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use tagdeck_common::{Error, Result};

use crate::actions::Clipboard;
use crate::api::{AddTagsRequest, DeleteFoldersRequest, LibraryApi};
use crate::cache::TagRecord;
use crate::terminal::TextInjector;

#[derive(Default)]
pub struct MockApi {
    pub tags: Mutex<HashMap<String, TagRecord>>,
    pub add_requests: Mutex<Vec<AddTagsRequest>>,
    pub delete_requests: Mutex<Vec<DeleteFoldersRequest>>,
    pub fetches: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Option<Duration>,
}

impl MockApi {
    pub fn with_tags(records: impl IntoIterator<Item = TagRecord>) -> Self {
        let api = Self::default();
        {
            let mut tags = api.tags.lock().unwrap();
            for record in records {
                tags.insert(record.id.clone(), record);
            }
        }
        api
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn mutation_calls(&self) -> usize {
        self.add_requests.lock().unwrap().len() + self.delete_requests.lock().unwrap().len()
    }

    async fn latency(&self) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Api {
                status: 500,
                body: "backend exploded".to_string(),
            });
        }
        Ok(())
    }
}

impl LibraryApi for MockApi {
    async fn add_tags(&self, request: &AddTagsRequest) -> Result<()> {
        self.add_requests.lock().unwrap().push(request.clone());
        self.latency().await
    }

    async fn delete_inbox_folders(&self, request: &DeleteFoldersRequest) -> Result<()> {
        self.delete_requests.lock().unwrap().push(request.clone());
        self.latency().await
    }

    async fn fetch_tag_by_id(&self, id: &str) -> Result<TagRecord> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.latency().await?;
        self.tags
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Api {
                status: 404,
                body: format!("no tag {}", id),
            })
    }

    async fn fetch_tag_by_path(&self, path: &str) -> Result<TagRecord> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.latency().await?;
        self.tags
            .lock()
            .unwrap()
            .values()
            .find(|t| t.album_folder == path)
            .cloned()
            .ok_or_else(|| Error::Api {
                status: 404,
                body: format!("no tag at {}", path),
            })
    }

    async fn fetch_inbox(&self) -> Result<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.latency().await?;
        Ok(json!({"type": "directory", "children": []}))
    }

    async fn fetch_tag_groups(&self) -> Result<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.latency().await?;
        Ok(json!([]))
    }
}

#[derive(Default)]
pub struct RecordingTerminal {
    pub typed: Mutex<Vec<String>>,
}

impl TextInjector for RecordingTerminal {
    fn input_text(&self, command: &str) -> Result<()> {
        self.typed.lock().unwrap().push(command.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingClipboard {
    pub text: Mutex<Option<String>>,
}

impl Clipboard for RecordingClipboard {
    fn write_text(&self, text: &str) -> Result<()> {
        *self.text.lock().unwrap() = Some(text.to_string());
        Ok(())
    }
}

//! The entry table — §4.1 "Entry Table": a shared map from content id to
//! `CacheEntry`, guarded by one `RwLock` so reads (`List`, `TotalSize`) don't
//! block each other while a write only blocks for the duration of an insert
//! or remove, never for the duration of an entry's own I/O.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::entry::CacheEntry;
use crate::types::ContentId;

#[derive(Default)]
pub struct EntryTable {
    entries: RwLock<HashMap<ContentId, Arc<CacheEntry>>>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, content_id: &[u8]) -> Option<Arc<CacheEntry>> {
        self.entries.read().unwrap().get(content_id).cloned()
    }

    /// Return the existing entry for `content_id`, or create and insert a
    /// fresh one.
    pub fn get_or_create(&self, content_id: &[u8], now_millis: u64) -> Arc<CacheEntry> {
        if let Some(entry) = self.get(content_id) {
            return entry;
        }
        let mut entries = self.entries.write().unwrap();
        entries
            .entry(content_id.to_vec())
            .or_insert_with(|| Arc::new(CacheEntry::new(now_millis)))
            .clone()
    }

    /// Insert an entry reconstructed during recovery, overwriting any
    /// placeholder that may already be there.
    pub fn insert(&self, content_id: ContentId, entry: Arc<CacheEntry>) {
        self.entries.write().unwrap().insert(content_id, entry);
    }

    pub fn remove(&self, content_id: &[u8]) -> Option<Arc<CacheEntry>> {
        self.entries.write().unwrap().remove(content_id)
    }

    pub fn contains(&self, content_id: &[u8]) -> bool {
        self.entries.read().unwrap().contains_key(content_id)
    }

    pub fn list(&self) -> Vec<ContentId> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn total_size(&self) -> u64 {
        self.entries
            .read()
            .unwrap()
            .values()
            .map(|e| e.total_size())
            .sum()
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

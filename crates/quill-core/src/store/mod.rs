//! Durable item storage keyed by item identifier.
//!
//! The sync engine writes through an [`ItemStore`] before reporting anything
//! as saved, and reloads from it on startup so unsynced edits survive a
//! restart.

mod migrations;
mod sqlite;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Item, ItemField, ItemId, RemoteItem};

pub use sqlite::SqliteItemStore;

/// Persisted form of an identified item with its open local edits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    #[serde(flatten)]
    pub record: RemoteItem,
    #[serde(default)]
    pub dirty_fields: Vec<ItemField>,
}

impl StoredItem {
    /// Snapshot an item; dummy items have no key yet and are not stored
    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            record: item.to_remote()?,
            dirty_fields: item.dirty_fields().collect(),
        })
    }

    pub const fn id(&self) -> ItemId {
        self.record.uuid
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_fields.is_empty()
    }

    /// Rebuild the in-memory item, dirty fields included
    pub fn into_item(self) -> Item {
        Item::restore(&self.record, &self.dirty_fields)
    }
}

/// Opaque key-value persistence for items and the sync cursor
pub trait ItemStore: Send + Sync {
    /// Every stored item
    fn load_items(&self) -> Result<Vec<StoredItem>>;

    /// Insert or replace items; durable once this returns
    fn save_items(&self, items: &[StoredItem]) -> Result<()>;

    fn remove_items(&self, ids: &[ItemId]) -> Result<()>;

    fn load_sync_token(&self) -> Result<Option<String>>;

    fn save_sync_token(&self, token: Option<&str>) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<ItemId, StoredItem>,
    sync_token: Option<String>,
}

/// Volatile store for tests and accountless sessions
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    state: Mutex<MemoryState>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored copy of one item
    pub fn get(&self, id: ItemId) -> Option<StoredItem> {
        self.lock().items.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ItemStore for MemoryItemStore {
    fn load_items(&self) -> Result<Vec<StoredItem>> {
        Ok(self.lock().items.values().cloned().collect())
    }

    fn save_items(&self, items: &[StoredItem]) -> Result<()> {
        let mut state = self.lock();
        for item in items {
            state.items.insert(item.id(), item.clone());
        }
        Ok(())
    }

    fn remove_items(&self, ids: &[ItemId]) -> Result<()> {
        let mut state = self.lock();
        for id in ids {
            state.items.remove(id);
        }
        Ok(())
    }

    fn load_sync_token(&self) -> Result<Option<String>> {
        Ok(self.lock().sync_token.clone())
    }

    fn save_sync_token(&self, token: Option<&str>) -> Result<()> {
        self.lock().sync_token = token.map(str::to_string);
        Ok(())
    }
}

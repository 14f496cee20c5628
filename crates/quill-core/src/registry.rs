//! In-memory authoritative item registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{Error, Result};
use crate::models::{ContentType, Item, ItemId, PendingOp};

/// Local handle for an item, stable for the lifetime of the process.
///
/// Unlike [`ItemId`] it exists from the moment an item is created, so dummy
/// items can be addressed before identifier assignment completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey(u64);

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mapping of local handles and identifiers to items
#[derive(Debug, Default)]
pub struct ItemRegistry {
    items: BTreeMap<ItemKey, Item>,
    by_id: HashMap<ItemId, ItemKey>,
    next_key: u64,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item, returning its local handle
    pub fn insert(&mut self, item: Item) -> Result<ItemKey> {
        if let Some(id) = item.id() {
            if self.by_id.contains_key(&id) {
                return Err(Error::InvalidInput(format!("duplicate item id {id}")));
            }
        }

        self.next_key += 1;
        let key = ItemKey(self.next_key);
        if let Some(id) = item.id() {
            self.by_id.insert(id, key);
        }
        self.items.insert(key, item);
        Ok(key)
    }

    pub fn get(&self, key: ItemKey) -> Option<&Item> {
        self.items.get(&key)
    }

    pub(crate) fn get_mut(&mut self, key: ItemKey) -> Option<&mut Item> {
        self.items.get_mut(&key)
    }

    /// Look up the local handle for an identifier
    pub fn key_for(&self, id: ItemId) -> Option<ItemKey> {
        self.by_id.get(&id).copied()
    }

    pub fn find(&self, id: ItemId) -> Option<&Item> {
        self.key_for(id).and_then(|key| self.items.get(&key))
    }

    /// Give an unidentified item its identifier.
    ///
    /// Returns the operations queued while the identifier was absent. Assigning
    /// to an already identified item is a no-op returning no operations.
    pub(crate) fn assign_id(&mut self, key: ItemKey, id: ItemId) -> Result<Vec<PendingOp>> {
        if let Some(owner) = self.key_for(id) {
            if owner != key {
                return Err(Error::InvalidInput(format!(
                    "item id {id} already belongs to {owner}"
                )));
            }
        }

        let item = self
            .items
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if item.id().is_some() {
            return Ok(Vec::new());
        }

        let pending = item.assign_id(id);
        self.by_id.insert(id, key);
        Ok(pending)
    }

    pub fn remove(&mut self, key: ItemKey) -> Option<Item> {
        let item = self.items.remove(&key)?;
        if let Some(id) = item.id() {
            self.by_id.remove(&id);
        }
        Some(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemKey, &Item)> {
        self.items.iter().map(|(key, item)| (*key, item))
    }

    /// Live (non-deleted) items of one type, oldest first
    pub fn items_of_type(&self, content_type: ContentType) -> Vec<(ItemKey, &Item)> {
        self.iter()
            .filter(|(_, item)| item.content_type() == content_type && !item.is_deleted())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

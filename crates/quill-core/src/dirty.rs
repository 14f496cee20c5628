//! Dirty tracking for unsynced local mutations.
//!
//! Marking an item dirty only records intent; scheduling a sync round is the
//! job of [`crate::scheduler::SyncScheduler`].

use std::collections::BTreeSet;

use crate::models::{Item, ItemField};
use crate::registry::ItemKey;

/// Set of items with local mutations not yet confirmed remotely
#[derive(Debug, Default)]
pub struct DirtyTracker {
    pending: BTreeSet<ItemKey>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `field` of an item dirty and return the item's new revision.
    ///
    /// Marking an already dirty field again only advances its revision.
    pub fn mark_dirty(&mut self, key: ItemKey, item: &mut Item, field: ItemField) -> u64 {
        let revision = item.record_dirty(field);
        self.pending.insert(key);
        revision
    }

    /// Clear every dirty field covered by a confirmed save of `revision`.
    ///
    /// Returns true when the item is now fully clean. Fields mutated after
    /// `revision` stay dirty so they are sent by the next round.
    pub fn clear_dirty(&mut self, key: ItemKey, item: &mut Item, revision: u64) -> bool {
        item.clear_dirty_through(revision);
        if item.is_dirty() {
            false
        } else {
            self.pending.remove(&key);
            true
        }
    }

    /// Register an item that arrived dirty (for example restored from disk)
    pub fn track(&mut self, key: ItemKey, item: &Item) {
        if item.is_dirty() {
            self.pending.insert(key);
        }
    }

    /// Drop an item that left the registry
    pub fn forget(&mut self, key: ItemKey) {
        self.pending.remove(&key);
    }

    pub fn is_dirty(&self, key: ItemKey) -> bool {
        self.pending.contains(&key)
    }

    /// Dirty items in creation order
    pub fn pending(&self) -> impl Iterator<Item = ItemKey> + '_ {
        self.pending.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use crate::registry::ItemRegistry;

    #[test]
    fn marking_twice_is_idempotent() {
        let mut registry = ItemRegistry::new();
        let key = registry.insert(Item::new_dummy(ContentType::Note)).unwrap();
        let mut tracker = DirtyTracker::new();

        let item = registry.get_mut(key).unwrap();
        tracker.mark_dirty(key, item, ItemField::Title);
        tracker.mark_dirty(key, item, ItemField::Title);

        assert_eq!(tracker.len(), 1);
        assert!(tracker.is_dirty(key));
        assert_eq!(item.dirty_fields().collect::<Vec<_>>(), vec![ItemField::Title]);
    }

    #[test]
    fn clear_keeps_edits_made_after_the_sent_revision() {
        let mut registry = ItemRegistry::new();
        let key = registry.insert(Item::new_dummy(ContentType::Note)).unwrap();
        let mut tracker = DirtyTracker::new();
        let item = registry.get_mut(key).unwrap();

        let sent = tracker.mark_dirty(key, item, ItemField::Title);
        tracker.mark_dirty(key, item, ItemField::Text);

        assert!(!tracker.clear_dirty(key, item, sent));
        assert!(tracker.is_dirty(key));
        assert!(item.is_field_dirty(ItemField::Text));

        let latest = item.revision();
        assert!(tracker.clear_dirty(key, item, latest));
        assert!(tracker.is_empty());
    }
}

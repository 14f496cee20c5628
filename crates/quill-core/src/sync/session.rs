//! Exclusive owner of local item state.
//!
//! Every registry mutation goes through a [`SyncSession`]. The service keeps
//! it behind a mutex that is never held across an await, so edits, round
//! bookkeeping and merges are serialized without a dedicated actor.

use std::collections::BTreeSet;

use tokio::time::Instant;

use crate::dirty::DirtyTracker;
use crate::error::{Error, Result};
use crate::models::{ContentType, Item, ItemEdit, ItemField, ItemId, PendingOp};
use crate::registry::{ItemKey, ItemRegistry};
use crate::scheduler::SyncScheduler;
use crate::state::SyncStatus;
use crate::store::StoredItem;

#[derive(Debug)]
pub struct SyncSession {
    pub(super) registry: ItemRegistry,
    pub(super) dirty: DirtyTracker,
    pub(super) scheduler: SyncScheduler,
    pub(super) status: SyncStatus,
    pub(super) sync_token: Option<String>,
    pub(super) rounds: u64,
    /// Local changes happened since the last round started
    pub(super) changed_since_round: bool,
}

impl SyncSession {
    pub fn new(scheduler: SyncScheduler) -> Self {
        Self {
            registry: ItemRegistry::new(),
            dirty: DirtyTracker::new(),
            scheduler,
            status: SyncStatus::Idle,
            sync_token: None,
            rounds: 0,
            changed_since_round: false,
        }
    }

    /// Populate the registry from durable storage.
    ///
    /// Items restored with open edits are tracked and a round is scheduled
    /// for them.
    pub fn load(
        &mut self,
        stored: Vec<StoredItem>,
        sync_token: Option<String>,
        now: Instant,
    ) -> Result<usize> {
        let mut loaded = 0;
        for record in stored {
            let item = record.into_item();
            let key = self.registry.insert(item)?;
            if let Some(item) = self.registry.get(key) {
                self.dirty.track(key, item);
            }
            loaded += 1;
        }
        self.sync_token = sync_token;

        if !self.dirty.is_empty() {
            tracing::info!(pending = self.dirty.len(), "Restored unsynced local edits");
            self.changed(now);
        }
        Ok(loaded)
    }

    pub const fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    pub const fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    pub const fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub const fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn sync_token(&self) -> Option<&str> {
        self.sync_token.as_deref()
    }

    /// Number of rounds started so far
    pub const fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Create a dummy item. It is clean until first edited.
    pub fn create_item(&mut self, content_type: ContentType) -> Result<ItemKey> {
        let key = self.registry.insert(Item::new_dummy(content_type))?;
        tracing::debug!(%key, %content_type, "Created dummy item");
        Ok(key)
    }

    fn item_mut(&mut self, key: ItemKey) -> Result<&mut Item> {
        self.registry
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Apply a local edit; returns whether anything changed.
    ///
    /// Content edits on a locked item are refused.
    pub fn edit(&mut self, key: ItemKey, edit: ItemEdit, now: Instant) -> Result<bool> {
        let item = self
            .registry
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if edit.is_content_edit() && item.is_locked() {
            return Err(Error::Locked(key.to_string()));
        }

        let Some(field) = item.apply(edit) else {
            return Ok(false);
        };
        self.dirty.mark_dirty(key, item, field);
        self.changed(now);
        Ok(true)
    }

    /// Tombstone an item.
    ///
    /// A dummy item was never sent anywhere and is dropped outright.
    pub fn delete(&mut self, key: ItemKey, now: Instant) -> Result<bool> {
        if self.item_mut(key)?.is_dummy() {
            self.registry.remove(key);
            self.dirty.forget(key);
            return Ok(true);
        }
        self.edit(key, ItemEdit::Delete, now)
    }

    /// Link two identified items in both directions
    pub fn link(&mut self, a: ItemId, b: ItemId, now: Instant) -> Result<bool> {
        let changed = self.link_items(a, b)?;
        if changed {
            self.changed(now);
        }
        Ok(changed)
    }

    fn link_items(&mut self, a: ItemId, b: ItemId) -> Result<bool> {
        let (key_a, key_b) = self.keys_for(a, b)?;
        Ok(self.add_reference(key_a, b) | self.add_reference(key_b, a))
    }

    /// Link `other` to an item that may still be waiting for its identifier.
    ///
    /// Queued links are applied in both directions at identification.
    pub fn queue_link(&mut self, key: ItemKey, other: ItemId, now: Instant) -> Result<()> {
        if self.registry.find(other).is_none() {
            return Err(Error::NotFound(other.to_string()));
        }
        let queued = self.item_mut(key)?.queue_op(PendingOp::Link(other));
        match queued {
            Ok(()) => {
                tracing::debug!(%key, %other, "Queued link until identifier is assigned");
                Ok(())
            }
            Err(PendingOp::Link(other)) => {
                let id = self
                    .registry
                    .get(key)
                    .and_then(Item::id)
                    .ok_or_else(|| Error::Unidentified(key.to_string()))?;
                self.link(id, other, now).map(|_| ())
            }
        }
    }

    /// Replace a note's tag relationships with `tags`.
    ///
    /// Nothing changes when the set of tags is the same. Non-tag references
    /// are left alone and both sides of each relationship are updated.
    pub fn replace_tags(&mut self, note: ItemKey, tags: Vec<ItemId>, now: Instant) -> Result<bool> {
        let item = self
            .registry
            .get(note)
            .ok_or_else(|| Error::NotFound(note.to_string()))?;
        let note_id = item.id().ok_or_else(|| Error::Unidentified(note.to_string()))?;
        if item.is_locked() {
            return Err(Error::Locked(note.to_string()));
        }

        for tag in &tags {
            match self.registry.find(*tag) {
                Some(found) if found.content_type() == ContentType::Tag => {}
                Some(_) => return Err(Error::InvalidInput(format!("{tag} is not a tag"))),
                None => return Err(Error::NotFound(tag.to_string())),
            }
        }

        let current: BTreeSet<ItemId> = item
            .references()
            .iter()
            .copied()
            .filter(|id| {
                self.registry
                    .find(*id)
                    .is_some_and(|other| other.content_type() == ContentType::Tag)
            })
            .collect();
        let wanted: BTreeSet<ItemId> = tags.iter().copied().collect();
        if current == wanted {
            return Ok(false);
        }

        for removed in current.difference(&wanted) {
            self.remove_reference(note, *removed);
            if let Some(tag_key) = self.registry.key_for(*removed) {
                self.remove_reference(tag_key, note_id);
            }
        }
        for added in tags.iter().filter(|id| !current.contains(id)) {
            self.add_reference(note, *added);
            if let Some(tag_key) = self.registry.key_for(*added) {
                self.add_reference(tag_key, note_id);
            }
        }

        self.changed(now);
        Ok(true)
    }

    fn keys_for(&self, a: ItemId, b: ItemId) -> Result<(ItemKey, ItemKey)> {
        let key_a = self
            .registry
            .key_for(a)
            .ok_or_else(|| Error::NotFound(a.to_string()))?;
        let key_b = self
            .registry
            .key_for(b)
            .ok_or_else(|| Error::NotFound(b.to_string()))?;
        Ok((key_a, key_b))
    }

    fn add_reference(&mut self, key: ItemKey, id: ItemId) -> bool {
        let Some(item) = self.registry.get_mut(key) else {
            return false;
        };
        if !item.add_reference(id) {
            return false;
        }
        self.dirty.mark_dirty(key, item, ItemField::References);
        true
    }

    fn remove_reference(&mut self, key: ItemKey, id: ItemId) -> bool {
        let Some(item) = self.registry.get_mut(key) else {
            return false;
        };
        if !item.remove_reference(id) {
            return false;
        }
        self.dirty.mark_dirty(key, item, ItemField::References);
        true
    }

    /// Give a dummy item its identifier and run the operations queued for it.
    ///
    /// The first assignment wins; a later call returns the existing id. Links
    /// applied here ride along with the round that is identifying the item,
    /// so no extra round is scheduled for them.
    pub fn identify(&mut self, key: ItemKey, id: ItemId) -> Result<ItemId> {
        if let Some(existing) = self
            .registry
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?
            .id()
        {
            return Ok(existing);
        }

        let pending = self.registry.assign_id(key, id)?;
        tracing::debug!(%key, %id, queued = pending.len(), "Item identified");

        for op in pending {
            match op {
                PendingOp::Link(other) => {
                    if let Err(error) = self.link_items(id, other) {
                        tracing::warn!(%id, %other, %error, "Dropping queued link");
                    }
                }
            }
        }
        Ok(id)
    }

    /// Dirty items still waiting for an identifier
    pub fn unidentified_dirty(&self) -> Vec<(ItemKey, ContentType)> {
        self.dirty
            .pending()
            .filter_map(|key| {
                let item = self.registry.get(key)?;
                item.is_dummy().then_some((key, item.content_type()))
            })
            .collect()
    }

    /// Restart the debounce window without touching any item
    pub fn note_changed(&mut self, now: Instant) {
        self.changed(now);
    }

    fn changed(&mut self, now: Instant) {
        self.changed_since_round = true;
        self.scheduler.note_changed(now);
    }

    /// Snapshots of every dirty identified item, ready for the store.
    ///
    /// Dummy items have nothing to key a record on and are left out.
    pub fn pending_snapshots(&self) -> Vec<StoredItem> {
        self.dirty
            .pending()
            .filter_map(|key| self.registry.get(key).and_then(StoredItem::from_item))
            .collect()
    }

    /// Whether another round could send something the last one did not.
    ///
    /// False after a failed round when nothing changed since it started.
    pub fn has_unsent_changes(&self) -> bool {
        !self.dirty.is_empty()
            && (self.changed_since_round || self.status != SyncStatus::Error)
    }

    pub fn request_now(&mut self, now: Instant) {
        self.scheduler.request_now(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Claim the in-flight slot if a scheduled round is due
    pub fn fire(&mut self, now: Instant) -> bool {
        self.scheduler.fire(now)
    }

    /// Claim the in-flight slot now, or queue behind the running round
    pub fn fire_now(&mut self, now: Instant) -> bool {
        self.scheduler.fire_now(now)
    }

    /// Give back the in-flight slot of a round that will never complete.
    ///
    /// Sent items keep their dirty flags and go out with the next round.
    pub fn abandon_round(&mut self, now: Instant) {
        self.scheduler.round_aborted(now);
        self.status = SyncStatus::Error;
    }

    pub fn pause_periodic(&mut self) {
        self.scheduler.pause_periodic();
    }

    pub fn resume_periodic(&mut self, now: Instant) {
        self.scheduler.resume_periodic(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteItem;
    use pretty_assertions::assert_eq;

    fn session() -> (SyncSession, Instant) {
        let now = Instant::now();
        (SyncSession::new(SyncScheduler::new(now)), now)
    }

    fn identified(
        session: &mut SyncSession,
        content_type: ContentType,
    ) -> (ItemKey, ItemId) {
        let key = session.create_item(content_type).unwrap();
        let id = session.identify(key, ItemId::new()).unwrap();
        (key, id)
    }

    #[test]
    fn new_dummy_is_not_dirty() {
        let (mut session, _) = session();
        let key = session.create_item(ContentType::Note).unwrap();
        assert!(session.registry().get(key).unwrap().is_dummy());
        assert!(session.dirty().is_empty());
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn edit_marks_dirty_and_schedules() {
        let (mut session, now) = session();
        let key = session.create_item(ContentType::Note).unwrap();

        assert!(session.edit(key, ItemEdit::Title("Groceries".into()), now).unwrap());
        assert!(!session.edit(key, ItemEdit::Title("Groceries".into()), now).unwrap());
        assert!(session.dirty().is_dirty(key));
        assert_eq!(
            session.next_deadline(),
            Some(now + crate::scheduler::DEFAULT_DEBOUNCE)
        );
        assert_eq!(session.unidentified_dirty(), vec![(key, ContentType::Note)]);
    }

    #[test]
    fn locked_items_refuse_content_edits() {
        let (mut session, now) = session();
        let key = session.create_item(ContentType::Note).unwrap();
        session.edit(key, ItemEdit::Locked(true), now).unwrap();

        let result = session.edit(key, ItemEdit::Text("nope".into()), now);
        assert!(matches!(result, Err(Error::Locked(_))));
        assert!(session.edit(key, ItemEdit::Locked(false), now).unwrap());
    }

    #[test]
    fn deleting_dummy_drops_it() {
        let (mut session, now) = session();
        let key = session.create_item(ContentType::Note).unwrap();
        session.edit(key, ItemEdit::Text("draft".into()), now).unwrap();

        assert!(session.delete(key, now).unwrap());
        assert!(session.registry().get(key).is_none());
        assert!(session.dirty().is_empty());
    }

    #[test]
    fn deleting_identified_item_tombstones_it() {
        let (mut session, now) = session();
        let (key, _) = identified(&mut session, ContentType::Note);

        assert!(session.delete(key, now).unwrap());
        let item = session.registry().get(key).unwrap();
        assert!(item.is_deleted());
        assert!(item.is_field_dirty(ItemField::Deleted));
    }

    #[test]
    fn queued_link_applies_both_directions_on_identify() {
        let (mut session, now) = session();
        let (tag_key, tag_id) = identified(&mut session, ContentType::Tag);
        let note = session.create_item(ContentType::Note).unwrap();

        session.queue_link(note, tag_id, now).unwrap();
        assert!(session.registry().get(tag_key).unwrap().references().is_empty());

        let note_id = session.identify(note, ItemId::new()).unwrap();
        assert_eq!(session.registry().get(note).unwrap().references(), &[tag_id]);
        assert_eq!(session.registry().get(tag_key).unwrap().references(), &[note_id]);
        assert!(session.dirty().is_dirty(tag_key));
    }

    #[test]
    fn identify_keeps_first_identifier() {
        let (mut session, _) = session();
        let key = session.create_item(ContentType::Note).unwrap();
        let first = session.identify(key, ItemId::new()).unwrap();
        let second = session.identify(key, ItemId::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn replace_tags_requires_identifier() {
        let (mut session, now) = session();
        let (_, tag) = identified(&mut session, ContentType::Tag);
        let note = session.create_item(ContentType::Note).unwrap();

        let result = session.replace_tags(note, vec![tag], now);
        assert!(matches!(result, Err(Error::Unidentified(_))));
    }

    #[test]
    fn replace_tags_only_changes_on_different_set() {
        let (mut session, now) = session();
        let (work_key, work) = identified(&mut session, ContentType::Tag);
        let (_, home) = identified(&mut session, ContentType::Tag);
        let (note, note_id) = identified(&mut session, ContentType::Note);

        assert!(session.replace_tags(note, vec![work, home], now).unwrap());
        assert!(!session.replace_tags(note, vec![home, work], now).unwrap());

        assert!(session.replace_tags(note, vec![home], now).unwrap());
        assert_eq!(session.registry().get(note).unwrap().references(), &[home]);
        assert!(!session
            .registry()
            .get(work_key)
            .unwrap()
            .references()
            .contains(&note_id));
    }

    #[test]
    fn replace_tags_rejects_non_tags() {
        let (mut session, now) = session();
        let (_, other_note) = identified(&mut session, ContentType::Note);
        let (note, _) = identified(&mut session, ContentType::Note);

        let result = session.replace_tags(note, vec![other_note], now);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn load_restores_dirty_items_and_schedules() {
        let (mut session, now) = session();
        let record = RemoteItem {
            uuid: ItemId::new(),
            content_type: ContentType::Note,
            title: "Unsynced".into(),
            text: String::new(),
            references: Vec::new(),
            locked: false,
            deleted: false,
            created_at: 1,
            updated_at: 1,
        };
        let stored = vec![StoredItem {
            record,
            dirty_fields: vec![ItemField::Title],
        }];

        assert_eq!(session.load(stored, Some("cursor".into()), now).unwrap(), 1);
        assert_eq!(session.dirty().len(), 1);
        assert_eq!(session.sync_token(), Some("cursor"));
        assert!(session.next_deadline().is_some());
    }
}

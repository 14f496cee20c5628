//! Item model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A server-stable identifier for an item, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Create a new unique item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of syncable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Note,
    Tag,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Note => f.write_str("Note"),
            Self::Tag => f.write_str("Tag"),
        }
    }
}

/// Individually tracked field of an item.
///
/// Dirty state is recorded per field so that a remote merge can keep open
/// local edits while still adopting remote values for untouched fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    Title,
    Text,
    References,
    Locked,
    Deleted,
}

impl ItemField {
    /// Every tracked field, used when a brand new item is first saved.
    pub const ALL: [Self; 5] = [
        Self::Title,
        Self::Text,
        Self::References,
        Self::Locked,
        Self::Deleted,
    ];
}

/// Operation that needs the item's own identifier and was queued while it had none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingOp {
    /// Link this item with another item in both directions
    Link(ItemId),
}

/// Whether an item has been assigned its stable identifier yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Identity {
    /// Created locally; identifier assignment has not completed
    Unidentified { pending: Vec<PendingOp> },
    /// Addressable by other items and collaborators
    Identified(ItemId),
}

/// A single local mutation applied to an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEdit {
    Title(String),
    Text(String),
    References(Vec<ItemId>),
    Locked(bool),
    Delete,
}

impl ItemEdit {
    /// Field touched by this edit
    #[must_use]
    pub const fn field(&self) -> ItemField {
        match self {
            Self::Title(_) => ItemField::Title,
            Self::Text(_) => ItemField::Text,
            Self::References(_) => ItemField::References,
            Self::Locked(_) => ItemField::Locked,
            Self::Delete => ItemField::Deleted,
        }
    }

    /// Content edits are refused while an item is locked
    #[must_use]
    pub const fn is_content_edit(&self) -> bool {
        matches!(self, Self::Title(_) | Self::Text(_) | Self::References(_))
    }
}

/// A note or tag held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    identity: Identity,
    content_type: ContentType,
    title: String,
    text: String,
    references: Vec<ItemId>,
    locked: bool,
    deleted: bool,
    created_at: i64,
    updated_at: i64,
    /// Bumped on every local mutation
    revision: u64,
    /// Field -> revision of its latest unsynced local mutation
    dirty_fields: BTreeMap<ItemField, u64>,
}

impl Item {
    /// Create a locally new item with no identifier yet
    #[must_use]
    pub fn new_dummy(content_type: ContentType) -> Self {
        let now = crate::util::unix_millis_now();
        Self {
            identity: Identity::Unidentified {
                pending: Vec::new(),
            },
            content_type,
            title: String::new(),
            text: String::new(),
            references: Vec::new(),
            locked: false,
            deleted: false,
            created_at: now,
            updated_at: now,
            revision: 0,
            dirty_fields: BTreeMap::new(),
        }
    }

    /// Build a clean, identified item from a remote record
    #[must_use]
    pub fn from_remote(remote: &RemoteItem) -> Self {
        Self {
            identity: Identity::Identified(remote.uuid),
            content_type: remote.content_type,
            title: remote.title.clone(),
            text: remote.text.clone(),
            references: dedup_ids(remote.references.clone()),
            locked: remote.locked,
            deleted: remote.deleted,
            created_at: remote.created_at,
            updated_at: remote.updated_at,
            revision: 0,
            dirty_fields: BTreeMap::new(),
        }
    }

    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Identifier, if assignment has completed
    pub const fn id(&self) -> Option<ItemId> {
        match self.identity {
            Identity::Identified(id) => Some(id),
            Identity::Unidentified { .. } => None,
        }
    }

    /// A dummy item was created locally and has no identifier yet
    pub const fn is_dummy(&self) -> bool {
        matches!(self.identity, Identity::Unidentified { .. })
    }

    pub const fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Related item identifiers, in insertion order
    pub fn references(&self) -> &[ItemId] {
        &self.references
    }

    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    pub const fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    pub const fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Item has local mutations not yet confirmed by the remote store
    pub fn is_dirty(&self) -> bool {
        !self.dirty_fields.is_empty()
    }

    pub fn is_field_dirty(&self, field: ItemField) -> bool {
        self.dirty_fields.contains_key(&field)
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = ItemField> + '_ {
        self.dirty_fields.keys().copied()
    }

    /// Apply an edit, returning the touched field when the value actually changed
    pub(crate) fn apply(&mut self, edit: ItemEdit) -> Option<ItemField> {
        let field = edit.field();
        let changed = match edit {
            ItemEdit::Title(title) => replace_if_changed(&mut self.title, title),
            ItemEdit::Text(text) => replace_if_changed(&mut self.text, text),
            ItemEdit::References(references) => {
                replace_if_changed(&mut self.references, dedup_ids(references))
            }
            ItemEdit::Locked(locked) => replace_if_changed(&mut self.locked, locked),
            ItemEdit::Delete => replace_if_changed(&mut self.deleted, true),
        };
        if changed {
            self.updated_at = crate::util::unix_millis_now();
            Some(field)
        } else {
            None
        }
    }

    /// Add a relationship; returns false when already present
    pub(crate) fn add_reference(&mut self, id: ItemId) -> bool {
        if self.references.contains(&id) {
            return false;
        }
        self.references.push(id);
        true
    }

    /// Remove a relationship; returns false when absent
    pub(crate) fn remove_reference(&mut self, id: ItemId) -> bool {
        let before = self.references.len();
        self.references.retain(|existing| *existing != id);
        before != self.references.len()
    }

    /// Record a local mutation of `field` and return the new revision
    pub(crate) fn record_dirty(&mut self, field: ItemField) -> u64 {
        self.revision += 1;
        self.dirty_fields.insert(field, self.revision);
        self.revision
    }

    /// Forget dirty fields whose latest mutation was covered by `revision`
    pub(crate) fn clear_dirty_through(&mut self, revision: u64) {
        self.dirty_fields
            .retain(|_, field_revision| *field_revision > revision);
    }

    /// Replace the identity with an identifier, returning ops queued meanwhile
    pub(crate) fn assign_id(&mut self, id: ItemId) -> Vec<PendingOp> {
        match std::mem::replace(&mut self.identity, Identity::Identified(id)) {
            Identity::Unidentified { pending } => pending,
            Identity::Identified(_) => Vec::new(),
        }
    }

    /// Queue an operation until the identifier is known.
    ///
    /// Returns the operation back when the item is already identified.
    pub(crate) fn queue_op(&mut self, op: PendingOp) -> Result<(), PendingOp> {
        match &mut self.identity {
            Identity::Unidentified { pending } => {
                if !pending.contains(&op) {
                    pending.push(op);
                }
                Ok(())
            }
            Identity::Identified(_) => Err(op),
        }
    }

    /// Adopt remote values for every field that has no open local edit.
    ///
    /// Returns true when any local value changed.
    pub(crate) fn merge_remote(&mut self, remote: &RemoteItem) -> bool {
        let mut changed = false;
        if !self.is_field_dirty(ItemField::Title) {
            changed |= replace_if_changed(&mut self.title, remote.title.clone());
        }
        if !self.is_field_dirty(ItemField::Text) {
            changed |= replace_if_changed(&mut self.text, remote.text.clone());
        }
        if !self.is_field_dirty(ItemField::References) {
            changed |=
                replace_if_changed(&mut self.references, dedup_ids(remote.references.clone()));
        }
        if !self.is_field_dirty(ItemField::Locked) {
            changed |= replace_if_changed(&mut self.locked, remote.locked);
        }
        // Open local edits keep the item alive
        if !self.is_dirty() {
            changed |= replace_if_changed(&mut self.deleted, remote.deleted);
        }
        self.updated_at = self.updated_at.max(remote.updated_at);
        changed
    }

    /// Note the server timestamp of a confirmed save
    pub(crate) fn confirm_saved(&mut self, updated_at: i64) {
        self.updated_at = self.updated_at.max(updated_at);
    }

    /// Wire representation; `None` while the item has no identifier
    #[must_use]
    pub fn to_remote(&self) -> Option<RemoteItem> {
        Some(RemoteItem {
            uuid: self.id()?,
            content_type: self.content_type,
            title: self.title.clone(),
            text: self.text.clone(),
            references: self.references.clone(),
            locked: self.locked,
            deleted: self.deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Rebuild an identified item with the given dirty fields still open
    pub(crate) fn restore(remote: &RemoteItem, dirty: &[ItemField]) -> Self {
        let mut item = Self::from_remote(remote);
        for field in dirty {
            item.record_dirty(*field);
        }
        item
    }
}

/// Item record exchanged with the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub uuid: ItemId,
    pub content_type: ContentType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub references: Vec<ItemId>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn dedup_ids(ids: Vec<ItemId>) -> Vec<ItemId> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(uuid: ItemId, title: &str, text: &str) -> RemoteItem {
        RemoteItem {
            uuid,
            content_type: ContentType::Note,
            title: title.to_string(),
            text: text.to_string(),
            references: Vec::new(),
            locked: false,
            deleted: false,
            created_at: 1,
            updated_at: 2,
        }
    }

    #[test]
    fn test_item_id_unique() {
        let id1 = ItemId::new();
        let id2 = ItemId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_item_id_parse() {
        let id = ItemId::new();
        let parsed: ItemId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_new_dummy_is_clean_and_unidentified() {
        let item = Item::new_dummy(ContentType::Note);
        assert!(item.is_dummy());
        assert!(!item.is_dirty());
        assert_eq!(item.id(), None);
        assert_eq!(item.to_remote(), None);
    }

    #[test]
    fn test_apply_reports_only_real_changes() {
        let mut item = Item::new_dummy(ContentType::Note);
        assert_eq!(
            item.apply(ItemEdit::Title("Groceries".into())),
            Some(ItemField::Title)
        );
        assert_eq!(item.apply(ItemEdit::Title("Groceries".into())), None);
        assert_eq!(item.title(), "Groceries");
    }

    #[test]
    fn test_references_are_an_ordered_set() {
        let mut item = Item::new_dummy(ContentType::Note);
        let a = ItemId::new();
        let b = ItemId::new();
        item.apply(ItemEdit::References(vec![b, a, b]));
        assert_eq!(item.references(), &[b, a]);
        assert!(!item.add_reference(a));
        assert!(item.remove_reference(b));
        assert_eq!(item.references(), &[a]);
    }

    #[test]
    fn test_clear_dirty_keeps_newer_edits() {
        let mut item = Item::new_dummy(ContentType::Note);
        item.record_dirty(ItemField::Title);
        let sent = item.revision();
        item.record_dirty(ItemField::Text);

        item.clear_dirty_through(sent);
        assert!(!item.is_field_dirty(ItemField::Title));
        assert!(item.is_field_dirty(ItemField::Text));
    }

    #[test]
    fn test_merge_keeps_dirty_fields() {
        let id = ItemId::new();
        let mut item = Item::from_remote(&remote(id, "Old", "old body"));
        item.apply(ItemEdit::Title("Mine".into()));
        item.record_dirty(ItemField::Title);

        let changed = item.merge_remote(&remote(id, "Theirs", "new body"));
        assert!(changed);
        assert_eq!(item.title(), "Mine");
        assert_eq!(item.text(), "new body");
    }

    #[test]
    fn test_queue_op_only_while_unidentified() {
        let tag = ItemId::new();
        let mut item = Item::new_dummy(ContentType::Note);
        assert!(item.queue_op(PendingOp::Link(tag)).is_ok());

        let ops = item.assign_id(ItemId::new());
        assert_eq!(ops, vec![PendingOp::Link(tag)]);
        assert!(!item.is_dummy());
        assert_eq!(
            item.queue_op(PendingOp::Link(tag)),
            Err(PendingOp::Link(tag))
        );
    }
}

//! Editing surface for a single note.
//!
//! A `NoteComposer` wraps one note held by a [`SyncService`]. It watches sync
//! rounds and marks itself stale when the server hands back a newer copy of
//! its note, so the view can re-read the fields it shows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::lifecycle::LifecycleGate;
use crate::models::{ContentType, Item, ItemEdit, ItemId};
use crate::observer::Subscription;
use crate::registry::ItemKey;
use crate::sync::{SyncRoundEvent, SyncService};

pub struct NoteComposer {
    service: SyncService,
    key: ItemKey,
    gate: Option<Arc<LifecycleGate>>,
    stale: Arc<AtomicBool>,
    _rounds: Subscription<SyncRoundEvent>,
}

impl std::fmt::Debug for NoteComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteComposer")
            .field("key", &self.key)
            .field("gated", &self.gate.is_some())
            .field("stale", &self.is_stale())
            .finish_non_exhaustive()
    }
}

impl NoteComposer {
    /// Open `note`, or a new dummy note when `None`.
    ///
    /// `selected_tag` is linked to the note in both directions, immediately
    /// when the note already has an identifier and otherwise once it gets one.
    pub fn open(
        service: &SyncService,
        note: Option<ItemKey>,
        selected_tag: Option<ItemId>,
    ) -> Result<Self> {
        let key = match note {
            Some(key) => {
                let item = service
                    .item(key)
                    .ok_or_else(|| Error::NotFound(key.to_string()))?;
                if item.content_type() != ContentType::Note {
                    return Err(Error::InvalidInput(format!("{key} is not a note")));
                }
                key
            }
            None => service.create_note()?,
        };

        if let Some(tag) = selected_tag {
            service.queue_link(key, tag)?;
        }

        let stale = Arc::new(AtomicBool::new(false));
        let rounds = {
            let stale = Arc::clone(&stale);
            let watcher = service.clone();
            service.subscribe(move |event| {
                let retrieved = match watcher.item(key) {
                    Some(item) => item.id().is_some_and(|id| event.was_retrieved(id)),
                    // Removed by a remote tombstone
                    None => true,
                };
                if retrieved {
                    stale.store(true, Ordering::SeqCst);
                }
            })
        };

        Ok(Self {
            service: service.clone(),
            key,
            gate: None,
            stale,
            _rounds: rounds,
        })
    }

    /// Refuse edits while `gate` is waiting for authentication
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<LifecycleGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub const fn key(&self) -> ItemKey {
        self.key
    }

    /// Current copy of the note; `None` once it has been deleted remotely
    pub fn note(&self) -> Option<Item> {
        self.service.item(self.key)
    }

    /// Whether a round brought in a newer server copy since the last refresh
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Re-read the note and clear the stale mark
    pub fn refresh(&self) -> Option<Item> {
        self.stale.store(false, Ordering::SeqCst);
        self.note()
    }

    fn ensure_editable(&self) -> Result<()> {
        match &self.gate {
            Some(gate) => gate.ensure_unlocked(),
            None => Ok(()),
        }
    }

    pub fn set_title(&self, title: &str) -> Result<bool> {
        self.ensure_editable()?;
        self.service
            .edit(self.key, ItemEdit::Title(title.to_string()))
    }

    pub fn set_text(&self, text: &str) -> Result<bool> {
        self.ensure_editable()?;
        self.service.edit(self.key, ItemEdit::Text(text.to_string()))
    }

    pub fn set_locked(&self, locked: bool) -> Result<bool> {
        self.ensure_editable()?;
        self.service.edit(self.key, ItemEdit::Locked(locked))
    }

    /// Tags currently linked to the note
    pub fn tags(&self) -> Vec<ItemId> {
        self.service.with_session(|session| {
            let Some(note) = session.registry().get(self.key) else {
                return Vec::new();
            };
            note.references()
                .iter()
                .copied()
                .filter(|id| {
                    session
                        .registry()
                        .find(*id)
                        .is_some_and(|item| item.content_type() == ContentType::Tag)
                })
                .collect()
        })
    }

    /// Replace the note's tags; returns false when the set is unchanged.
    ///
    /// The note needs an identifier first, see [`Self::external_editor_target`].
    pub fn replace_tags(&self, tags: Vec<ItemId>) -> Result<bool> {
        self.ensure_editable()?;
        self.service.replace_tags(self.key, tags)
    }

    /// Identifier to hand to an external editor, assigning one if missing
    pub async fn external_editor_target(&self) -> Result<ItemId> {
        self.service.identify(self.key).await
    }

    /// The view is about to show; re-save a note that still has local edits.
    ///
    /// Returns whether a save was scheduled.
    pub fn will_appear(&self) -> bool {
        if !self.service.is_dirty(self.key) {
            return false;
        }
        tracing::debug!(key = %self.key, "Note still dirty on appear; rescheduling save");
        self.service.note_changed();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthenticationSettings, Authenticator, AuthenticationProps, AuthResult};
    use crate::config::SyncSettings;
    use crate::lifecycle::ApplicationLifecycle;
    use crate::models::RemoteItem;
    use crate::store::MemoryItemStore;
    use crate::sync::{
        LocalIdentifierAssigner, SyncRequest, SyncResponse, SyncResult, SyncTransport,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Echoes sent items and hands back whatever was queued for retrieval
    #[derive(Default)]
    struct EchoTransport {
        retrieve: Mutex<Vec<RemoteItem>>,
    }

    #[async_trait]
    impl SyncTransport for EchoTransport {
        async fn sync(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
            Ok(SyncResponse {
                saved_items: request.items,
                retrieved_items: std::mem::take(&mut *self.retrieve.lock().unwrap()),
                ..Default::default()
            })
        }
    }

    fn service(transport: Arc<EchoTransport>) -> SyncService {
        let settings = SyncSettings {
            retry_after_secs: None,
            sync_interval_secs: None,
            ..SyncSettings::default()
        };
        SyncService::new(
            settings,
            transport,
            Arc::new(LocalIdentifierAssigner),
            Arc::new(MemoryItemStore::new()),
        )
        .unwrap()
    }

    struct SilentAuthenticator;

    impl Authenticator for SilentAuthenticator {
        fn begin_authentication(&self, _props: &AuthenticationProps) -> AuthResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_without_note_creates_dummy() {
        let service = service(Arc::default());
        let composer = NoteComposer::open(&service, None, None).unwrap();

        let note = composer.note().unwrap();
        assert!(note.is_dummy());
        assert!(!composer.will_appear());

        composer.set_title("Groceries").unwrap();
        assert!(composer.will_appear());
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejects_tags() {
        let service = service(Arc::default());
        let tag = service.create_tag("home").unwrap();
        let error = NoteComposer::open(&service, Some(tag), None).unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn selected_tag_links_after_identification() {
        let service = service(Arc::default());
        let tag = service.create_tag("work").unwrap();
        let tag_id = service.identify(tag).await.unwrap();

        let composer = NoteComposer::open(&service, None, Some(tag_id)).unwrap();
        assert!(composer.tags().is_empty());

        let note_id = composer.external_editor_target().await.unwrap();
        assert_eq!(composer.tags(), vec![tag_id]);
        assert_eq!(service.item(tag).unwrap().references(), &[note_id]);
        assert_eq!(composer.external_editor_target().await.unwrap(), note_id);
    }

    #[tokio::test(start_paused = true)]
    async fn locked_note_refuses_content_edits() {
        let service = service(Arc::default());
        let composer = NoteComposer::open(&service, None, None).unwrap();
        composer.set_title("Secret").unwrap();
        composer.set_locked(true).unwrap();

        assert!(matches!(composer.set_text("changed"), Err(Error::Locked(_))));
        composer.set_locked(false).unwrap();
        assert!(composer.set_text("changed").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn replace_tags_only_changes_on_new_set() {
        let service = service(Arc::default());
        let home = service.create_tag("home").unwrap();
        let home = service.identify(home).await.unwrap();
        let work = service.create_tag("work").unwrap();
        let work = service.identify(work).await.unwrap();

        let composer = NoteComposer::open(&service, None, None).unwrap();
        composer.external_editor_target().await.unwrap();

        assert!(composer.replace_tags(vec![home]).unwrap());
        assert!(!composer.replace_tags(vec![home]).unwrap());
        assert!(composer.replace_tags(vec![work]).unwrap());
        assert_eq!(composer.tags(), vec![work]);
        assert!(composer.will_appear());
    }

    #[tokio::test(start_paused = true)]
    async fn retrieved_copy_marks_view_stale() {
        let transport = Arc::new(EchoTransport::default());
        let service = service(Arc::clone(&transport));
        let composer = NoteComposer::open(&service, None, None).unwrap();
        composer.set_title("Groceries").unwrap();
        service.sync_now().await.unwrap();
        assert!(!composer.is_stale());

        let mut remote = composer.note().unwrap().to_remote().unwrap();
        remote.text = "Milk, eggs".to_string();
        transport.retrieve.lock().unwrap().push(remote);
        service.request_sync();
        service.sync_now().await.unwrap();

        assert!(composer.is_stale());
        let refreshed = composer.refresh().unwrap();
        assert_eq!(refreshed.title(), "Groceries");
        assert_eq!(refreshed.text(), "Milk, eggs");
        assert!(!composer.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_composer_unsubscribes() {
        let service = service(Arc::default());
        let composer = NoteComposer::open(&service, None, None).unwrap();
        assert!(format!("{service:?}").contains("observers: 1"));
        drop(composer);
        assert!(format!("{service:?}").contains("observers: 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_blocks_edits_until_authenticated() {
        let service = service(Arc::default());
        let lifecycle = Arc::new(ApplicationLifecycle::new());
        let gate = LifecycleGate::install(
            Arc::clone(&lifecycle),
            AuthenticationSettings {
                passcode: true,
                ..Default::default()
            },
        );
        gate.attach_authenticator(Arc::new(SilentAuthenticator));

        let composer = NoteComposer::open(&service, None, None)
            .unwrap()
            .with_gate(Arc::clone(&gate));
        assert!(matches!(composer.set_title("x"), Err(Error::Locked(_))));

        gate.authentication_succeeded();
        assert!(composer.set_title("x").unwrap());
    }
}

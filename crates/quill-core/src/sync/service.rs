//! Async sync service: the single worker that drives rounds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::engine::SyncRoundEvent;
use super::session::SyncSession;
use super::transport::{IdentifierAssigner, SyncTransport};
use super::{SyncError, SyncResult};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::lifecycle::{ApplicationLifecycle, ApplicationState};
use crate::models::{ContentType, Item, ItemEdit, ItemId};
use crate::observer::{ObserverHub, ObserverToken, Subscription};
use crate::registry::ItemKey;
use crate::state::SyncStatus;
use crate::store::ItemStore;

/// What started a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTrigger {
    /// Debounce, retry or periodic deadline
    Timer,
    /// Explicit caller request
    Explicit,
}

struct Shared {
    session: Mutex<SyncSession>,
    hub: Arc<ObserverHub<SyncRoundEvent>>,
    transport: Arc<dyn SyncTransport>,
    assigner: Arc<dyn IdentifierAssigner>,
    store: Arc<dyn ItemStore>,
    settings: SyncSettings,
    wake: Arc<Notify>,
    shutdown: AtomicBool,
    status: watch::Sender<SyncStatus>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// Cloneable handle to the sync engine.
///
/// All item access goes through the session mutex; the lock is never held
/// across an await and observers are called after it is released.
#[derive(Clone)]
pub struct SyncService {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("status", &self.status())
            .field("observers", &self.shared.hub.len())
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Build the service and load persisted items and cursor.
    ///
    /// No rounds run until [`Self::spawn_worker`] is called.
    pub fn new(
        settings: SyncSettings,
        transport: Arc<dyn SyncTransport>,
        assigner: Arc<dyn IdentifierAssigner>,
        store: Arc<dyn ItemStore>,
    ) -> Result<Self> {
        let now = Instant::now();
        let mut session = SyncSession::new(settings.scheduler(now));
        let loaded = session.load(store.load_items()?, store.load_sync_token()?, now)?;
        tracing::debug!(loaded, "Loaded items from store");

        let (status, _) = watch::channel(session.status());
        Ok(Self {
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                hub: Arc::new(ObserverHub::new()),
                transport,
                assigner,
                store,
                settings,
                wake: Arc::new(Notify::new()),
                shutdown: AtomicBool::new(false),
                status,
                worker: Mutex::new(None),
            }),
        })
    }

    /// [`Self::new`] followed by [`Self::spawn_worker`]
    pub fn start(
        settings: SyncSettings,
        transport: Arc<dyn SyncTransport>,
        assigner: Arc<dyn IdentifierAssigner>,
        store: Arc<dyn ItemStore>,
    ) -> Result<Self> {
        let service = Self::new(settings, transport, assigner, store)?;
        service.spawn_worker();
        Ok(service)
    }

    /// Start the background worker; a second call is a no-op
    pub fn spawn_worker(&self) {
        let mut worker = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return;
        }
        let handle = tokio::spawn(run_worker(
            Arc::downgrade(&self.shared),
            Arc::clone(&self.shared.wake),
        ));
        *worker = Some(handle);
    }

    fn lock(&self) -> MutexGuard<'_, SyncSession> {
        self.shared
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.shared.wake.notify_one();
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        Ok(())
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.shared.settings
    }

    /// Read-only access to the session for the duration of `read`
    pub fn with_session<R>(&self, read: impl FnOnce(&SyncSession) -> R) -> R {
        read(&self.lock())
    }

    pub fn create_note(&self) -> Result<ItemKey> {
        self.ensure_running()?;
        self.lock().create_item(ContentType::Note)
    }

    /// Create a tag; its title edit schedules the first save
    pub fn create_tag(&self, title: &str) -> Result<ItemKey> {
        self.ensure_running()?;
        let key = {
            let mut session = self.lock();
            let key = session.create_item(ContentType::Tag)?;
            session.edit(key, ItemEdit::Title(title.to_string()), Instant::now())?;
            key
        };
        self.wake();
        Ok(key)
    }

    /// Apply a local edit and (re)start the debounce window.
    ///
    /// Refused with [`Error::ShutDown`] once the service has stopped.
    pub fn edit(&self, key: ItemKey, edit: ItemEdit) -> Result<bool> {
        self.ensure_running()?;
        let changed = self.lock().edit(key, edit, Instant::now())?;
        if changed {
            self.wake();
        }
        Ok(changed)
    }

    pub fn delete(&self, key: ItemKey) -> Result<bool> {
        self.ensure_running()?;
        let changed = self.lock().delete(key, Instant::now())?;
        if changed {
            self.wake();
        }
        Ok(changed)
    }

    pub fn link(&self, a: ItemId, b: ItemId) -> Result<bool> {
        self.ensure_running()?;
        let changed = self.lock().link(a, b, Instant::now())?;
        if changed {
            self.wake();
        }
        Ok(changed)
    }

    pub fn queue_link(&self, key: ItemKey, other: ItemId) -> Result<()> {
        self.ensure_running()?;
        self.lock().queue_link(key, other, Instant::now())?;
        self.wake();
        Ok(())
    }

    pub fn replace_tags(&self, note: ItemKey, tags: Vec<ItemId>) -> Result<bool> {
        self.ensure_running()?;
        let changed = self.lock().replace_tags(note, tags, Instant::now())?;
        if changed {
            self.wake();
        }
        Ok(changed)
    }

    pub fn item(&self, key: ItemKey) -> Option<Item> {
        self.lock().registry().get(key).cloned()
    }

    pub fn find(&self, id: ItemId) -> Option<(ItemKey, Item)> {
        let session = self.lock();
        let key = session.registry().key_for(id)?;
        session.registry().get(key).cloned().map(|item| (key, item))
    }

    /// Live items of one type, oldest first
    pub fn items(&self, content_type: ContentType) -> Vec<(ItemKey, Item)> {
        self.lock()
            .registry()
            .items_of_type(content_type)
            .into_iter()
            .map(|(key, item)| (key, item.clone()))
            .collect()
    }

    pub fn is_dirty(&self, key: ItemKey) -> bool {
        self.lock().dirty().is_dirty(key)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().dirty().len()
    }

    /// Assign an identifier now instead of waiting for the next round.
    ///
    /// Used before handing an item to a collaborator that needs a stable id.
    pub async fn identify(&self, key: ItemKey) -> Result<ItemId> {
        let content_type = {
            let session = self.lock();
            let item = session
                .registry()
                .get(key)
                .ok_or_else(|| Error::NotFound(key.to_string()))?;
            if let Some(id) = item.id() {
                return Ok(id);
            }
            item.content_type()
        };

        let id = assign_detached(&self.shared.assigner, content_type)
            .await
            .map_err(|error| Error::IdentifierAssignment(error.to_string()))?;
        let id = self.lock().identify(key, id)?;
        self.wake();
        Ok(id)
    }

    /// Restart the debounce window without an item edit
    pub fn note_changed(&self) {
        self.lock().note_changed(Instant::now());
        self.wake();
    }

    /// Ask the worker for a round as soon as possible
    pub fn request_sync(&self) {
        self.lock().request_now(Instant::now());
        self.wake();
    }

    /// Run a round on the caller's task.
    ///
    /// Returns `None` when a round is already in flight; the request is then
    /// queued behind it. Dropping the future before it resolves gives the
    /// round up and leaves its items dirty.
    pub async fn sync_now(&self) -> Option<SyncRoundEvent> {
        let fired = self.lock().fire_now(Instant::now());
        if !fired {
            self.wake();
            return None;
        }
        self.run_round(RoundTrigger::Explicit).await
    }

    /// Identify dummies, send the dirty batch and merge the response.
    ///
    /// The caller must own the in-flight slot.
    async fn run_round(&self, trigger: RoundTrigger) -> Option<SyncRoundEvent> {
        let slot = InFlightSlot {
            service: self,
            released: false,
        };
        let dummies = {
            let mut session = self.lock();
            session.status = SyncStatus::Saving;
            session.unidentified_dirty()
        };
        self.publish_status(SyncStatus::Saving);

        let mut identification_failures = 0;
        for (key, content_type) in dummies {
            let identified = match assign_detached(&self.shared.assigner, content_type).await {
                Ok(id) => {
                    let mut session = self.lock();
                    session.identify(key, id).map(|_| ())
                }
                Err(error) => Err(Error::IdentifierAssignment(error.to_string())),
            };
            if let Err(error) = identified {
                tracing::warn!(%key, %error, "Unable to initialize item; keeping it local");
                identification_failures += 1;
            }
        }

        let store = Arc::clone(&self.shared.store);
        let planned = self.lock().begin_round(
            store.as_ref(),
            identification_failures,
            self.shared.settings.batch_limit,
            Instant::now(),
        );
        let (ticket, request) = match planned {
            Ok(planned) => planned,
            Err(aborted) => {
                slot.release();
                let status = self.status_from_session();
                self.publish_status(status);
                self.wake();
                self.shared.hub.broadcast(&aborted);
                return Some(aborted);
            }
        };
        tracing::debug!(round = ticket.round(), ?trigger, "Sending sync request");

        let transport = Arc::clone(&self.shared.transport);
        let offline = transport.is_offline();
        let result = match tokio::spawn(async move { transport.sync(request).await }).await {
            Ok(result) => result,
            Err(error) => Err(SyncError::Interrupted(error.to_string())),
        };

        let (event, status) = {
            let mut session = self.lock();
            let event = session.complete_round(ticket, result, offline, store.as_ref(), Instant::now());
            (event, session.status())
        };
        slot.release();
        self.publish_status(status);
        self.wake();
        self.shared.hub.broadcast(&event);
        Some(event)
    }

    fn status_from_session(&self) -> SyncStatus {
        self.lock().status()
    }

    fn publish_status(&self, status: SyncStatus) {
        self.shared.status.send_replace(status);
    }

    /// Observe completed rounds until the returned guard is dropped
    pub fn subscribe(
        &self,
        callback: impl Fn(&SyncRoundEvent) + Send + Sync + 'static,
    ) -> Subscription<SyncRoundEvent> {
        self.shared.hub.subscribe(callback)
    }

    pub fn register_sync_observer(
        &self,
        callback: impl Fn(&SyncRoundEvent) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.shared.hub.register(callback)
    }

    pub fn remove_sync_observer(&self, token: ObserverToken) -> bool {
        self.shared.hub.remove(token)
    }

    pub fn status(&self) -> SyncStatus {
        *self.shared.status.borrow()
    }

    /// Receiver for the status line; updated at round start and completion
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    pub fn pause_periodic(&self) {
        self.lock().pause_periodic();
        self.wake();
    }

    pub fn resume_periodic(&self) {
        self.lock().resume_periodic(Instant::now());
        self.wake();
    }

    /// Follow application phases: flush and pause when backgrounded, resume
    /// in the foreground, stop the worker on termination.
    pub fn bind_lifecycle(&self, lifecycle: &ApplicationLifecycle) -> Subscription<ApplicationState> {
        let weak = Arc::downgrade(&self.shared);
        lifecycle.subscribe(move |state| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let service = Self { shared };
            match state {
                ApplicationState::Backgrounding => {
                    service.request_sync();
                    service.pause_periodic();
                }
                ApplicationState::Resuming => {
                    service.resume_periodic();
                    service.request_sync();
                }
                ApplicationState::Active => service.resume_periodic(),
                ApplicationState::Terminating => {
                    if let Err(error) = service.persist_pending() {
                        tracing::error!(%error, "Failed to persist pending edits on termination");
                    }
                    service.begin_shutdown();
                }
                ApplicationState::Launching | ApplicationState::ResigningActive => {}
            }
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    fn begin_shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::SeqCst) {
            tracing::info!("Sync worker stopping");
        }
        self.wake();
    }

    /// Write every dirty identified item to the store without a round
    pub fn persist_pending(&self) -> Result<usize> {
        let snapshots = self.lock().pending_snapshots();
        self.shared.store.save_items(&snapshots)?;
        tracing::debug!(items = snapshots.len(), "Persisted pending edits");
        Ok(snapshots.len())
    }

    /// Stop the worker, flush pending edits and persist what is left.
    ///
    /// The flush is skipped when the last round failed and nothing changed
    /// since, so a failing remote is not asked twice.
    pub async fn shutdown(&self) {
        self.begin_shutdown();

        let handle = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::error!(%error, "Sync worker ended abnormally");
            }
        }

        if self.with_session(SyncSession::has_unsent_changes) {
            self.sync_now().await;
        }
        if let Err(error) = self.persist_pending() {
            tracing::error!(%error, "Failed to persist pending edits on shutdown");
        }
    }
}

/// In-flight slot held by a running round.
///
/// Dropped without [`Self::release`] when the round's future is cancelled;
/// the slot is then handed back so later edits schedule rounds again.
struct InFlightSlot<'a> {
    service: &'a SyncService,
    released: bool,
}

impl InFlightSlot<'_> {
    fn release(mut self) {
        self.released = true;
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!("Sync round cancelled; local changes kept");
        let status = {
            let mut session = self.service.lock();
            session.abandon_round(Instant::now());
            session.status()
        };
        self.service.publish_status(status);
        self.service.wake();
    }
}

/// Run identifier assignment on its own task so a panic becomes an error
async fn assign_detached(
    assigner: &Arc<dyn IdentifierAssigner>,
    content_type: ContentType,
) -> SyncResult<ItemId> {
    let assigner = Arc::clone(assigner);
    match tokio::spawn(async move { assigner.assign(content_type).await }).await {
        Ok(result) => result,
        Err(error) => Err(SyncError::Interrupted(error.to_string())),
    }
}

async fn run_worker(shared: Weak<Shared>, wake: Arc<Notify>) {
    tracing::debug!("Sync worker started");
    loop {
        let deadline = {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if shared.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let deadline = shared
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .next_deadline();
            deadline
        };

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    () = wake.notified() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => wake.notified().await,
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let service = SyncService { shared };
        let fired = service.lock().fire(Instant::now());
        if fired {
            service.run_round(RoundTrigger::Timer).await;
        }
    }
    tracing::debug!("Sync worker stopped");
}

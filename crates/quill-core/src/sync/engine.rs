//! Round bookkeeping: building the outgoing batch and merging the response.

use std::collections::{BTreeSet, HashSet};

use tokio::time::Instant;

use super::session::SyncSession;
use super::transport::{SyncRequest, SyncResponse};
use super::SyncResult;
use crate::models::{Item, ItemField, ItemId};
use crate::registry::ItemKey;
use crate::state::SyncStatus;
use crate::store::{ItemStore, StoredItem};

/// How a completed round ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Saved { offline: bool },
    Failed(String),
}

/// Result of one completed round, delivered to every sync observer.
///
/// Carries identifiers only; observers re-read the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRoundEvent {
    pub round: u64,
    pub outcome: RoundOutcome,
    /// Local item state changed as a result of this round
    pub changes_made: bool,
    pub retrieved: Vec<ItemId>,
    pub saved: Vec<ItemId>,
}

impl SyncRoundEvent {
    pub const fn succeeded(&self) -> bool {
        matches!(self.outcome, RoundOutcome::Saved { .. })
    }

    pub fn was_retrieved(&self, id: ItemId) -> bool {
        self.retrieved.contains(&id)
    }
}

#[derive(Debug)]
struct SentItem {
    key: ItemKey,
    id: ItemId,
    revision: u64,
    fields: Vec<ItemField>,
}

/// Proof that a round is in flight; consumed by [`SyncSession::complete_round`]
#[derive(Debug)]
pub struct RoundTicket {
    round: u64,
    sent: Vec<SentItem>,
    limit: usize,
    truncated: bool,
    identification_failures: usize,
}

impl RoundTicket {
    pub const fn round(&self) -> u64 {
        self.round
    }
}

impl SyncSession {
    /// Snapshot the dirty identified items into an outgoing batch.
    ///
    /// Expects the scheduler to have already handed out the in-flight slot.
    /// Dirty items are written to `store` first. When every dirty item failed
    /// identification the round is abandoned and its failed event returned.
    pub fn begin_round(
        &mut self,
        store: &dyn ItemStore,
        identification_failures: usize,
        batch_limit: usize,
        now: Instant,
    ) -> Result<(RoundTicket, SyncRequest), SyncRoundEvent> {
        let candidates: Vec<ItemKey> = self
            .dirty
            .pending()
            .filter(|key| self.registry.get(*key).is_some_and(|item| !item.is_dummy()))
            .collect();
        self.changed_since_round = false;

        if candidates.is_empty() && identification_failures > 0 {
            tracing::warn!(
                identification_failures,
                "No identified items to sync; waiting for the next edit"
            );
            self.rounds += 1;
            self.scheduler.round_aborted(now);
            self.status = SyncStatus::InitializationFailed;
            return Err(SyncRoundEvent {
                round: self.rounds,
                outcome: RoundOutcome::Failed(self.status.to_string()),
                changes_made: false,
                retrieved: Vec::new(),
                saved: Vec::new(),
            });
        }

        if let Err(error) = store.save_items(&self.pending_snapshots()) {
            tracing::warn!(%error, "Failed to persist dirty items before sync");
        }

        let limit = batch_limit.max(1);
        let truncated = candidates.len() > limit;
        let mut sent = Vec::new();
        let mut items = Vec::new();
        for key in candidates.into_iter().take(limit) {
            let Some(item) = self.registry.get(key) else {
                continue;
            };
            let Some(record) = item.to_remote() else {
                continue;
            };
            sent.push(SentItem {
                key,
                id: record.uuid,
                revision: item.revision(),
                fields: item.dirty_fields().collect(),
            });
            items.push(record);
        }

        self.rounds += 1;
        self.status = SyncStatus::Saving;
        tracing::debug!(round = self.rounds, items = items.len(), truncated, "Sync round started");

        let ticket = RoundTicket {
            round: self.rounds,
            sent,
            limit,
            truncated,
            identification_failures,
        };
        let request = SyncRequest {
            items,
            sync_token: self.sync_token.clone(),
            limit,
        };
        Ok((ticket, request))
    }

    /// Apply the transport result of an in-flight round.
    ///
    /// On failure every dirty flag is kept. On success the sent revisions are
    /// cleared, retrieved items are merged with local dirty fields winning,
    /// and the outcome is persisted before it is reported.
    pub fn complete_round(
        &mut self,
        ticket: RoundTicket,
        result: SyncResult<SyncResponse>,
        offline: bool,
        store: &dyn ItemStore,
        now: Instant,
    ) -> SyncRoundEvent {
        let round = ticket.round;
        let response = match result.and_then(SyncResponse::into_result) {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(round, %error, "Sync round failed; local changes kept");
                return self.fail_round(round, error.to_string(), now);
            }
        };

        let saved_ids: HashSet<ItemId> = response.saved_items.iter().map(|r| r.uuid).collect();
        let mut changes_made = false;
        let mut to_persist: BTreeSet<ItemKey> = BTreeSet::new();
        let mut removed: Vec<ItemId> = Vec::new();

        for sent in &ticket.sent {
            let Some(item) = self.registry.get_mut(sent.key) else {
                continue;
            };
            self.dirty.clear_dirty(sent.key, item, sent.revision);
            if let Some(saved) = response.saved_items.iter().find(|r| r.uuid == sent.id) {
                item.confirm_saved(saved.updated_at);
            }
            if item.is_deleted() && !item.is_dirty() {
                self.registry.remove(sent.key);
                self.dirty.forget(sent.key);
                removed.push(sent.id);
                changes_made = true;
            } else {
                to_persist.insert(sent.key);
            }
        }

        let mut retrieved = Vec::new();
        for remote in &response.retrieved_items {
            // Our own write echoed back
            if saved_ids.contains(&remote.uuid) {
                continue;
            }
            retrieved.push(remote.uuid);

            match self.registry.key_for(remote.uuid) {
                Some(key) => {
                    let Some(item) = self.registry.get_mut(key) else {
                        continue;
                    };
                    if remote.deleted && !item.is_dirty() {
                        self.registry.remove(key);
                        self.dirty.forget(key);
                        to_persist.remove(&key);
                        removed.push(remote.uuid);
                        changes_made = true;
                    } else {
                        changes_made |= item.merge_remote(remote);
                        to_persist.insert(key);
                    }
                }
                None if remote.deleted => removed.push(remote.uuid),
                None => match self.registry.insert(Item::from_remote(remote)) {
                    Ok(key) => {
                        to_persist.insert(key);
                        changes_made = true;
                    }
                    Err(error) => {
                        tracing::warn!(id = %remote.uuid, %error, "Skipping retrieved item");
                    }
                },
            }
        }

        let snapshots: Vec<StoredItem> = to_persist
            .iter()
            .filter_map(|key| self.registry.get(*key).and_then(StoredItem::from_item))
            .collect();
        let persisted = store
            .save_items(&snapshots)
            .and_then(|()| store.remove_items(&removed))
            .and_then(|()| match response.sync_token.as_deref() {
                Some(token) => store.save_sync_token(Some(token)),
                None => Ok(()),
            });
        if let Err(error) = persisted {
            tracing::error!(round, %error, "Failed to persist sync results; resending");
            self.redirty(&ticket.sent);
            return self.fail_round(round, format!("local store: {error}"), now);
        }
        if response.sync_token.is_some() {
            self.sync_token = response.sync_token;
        }

        self.status = if ticket.identification_failures > 0 {
            SyncStatus::InitializationFailed
        } else {
            SyncStatus::Saved { offline }
        };
        self.scheduler.round_completed(now, true);
        if ticket.truncated || response.retrieved_items.len() >= ticket.limit {
            self.scheduler.request_now(now);
        }

        let saved: Vec<ItemId> = ticket.sent.iter().map(|sent| sent.id).collect();
        tracing::info!(
            round,
            saved = saved.len(),
            retrieved = retrieved.len(),
            offline,
            "Sync round completed"
        );
        SyncRoundEvent {
            round,
            outcome: RoundOutcome::Saved { offline },
            changes_made,
            retrieved,
            saved,
        }
    }

    fn fail_round(&mut self, round: u64, message: String, now: Instant) -> SyncRoundEvent {
        self.status = SyncStatus::Error;
        self.scheduler.round_completed(now, false);
        SyncRoundEvent {
            round,
            outcome: RoundOutcome::Failed(message),
            changes_made: false,
            retrieved: Vec::new(),
            saved: Vec::new(),
        }
    }

    fn redirty(&mut self, sent: &[SentItem]) {
        for sent in sent {
            let Some(item) = self.registry.get_mut(sent.key) else {
                continue;
            };
            for field in &sent.fields {
                if !item.is_field_dirty(*field) {
                    self.dirty.mark_dirty(sent.key, item, *field);
                }
            }
        }
    }
}

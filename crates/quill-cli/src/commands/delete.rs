use quill_core::{ItemId, SyncService};

use crate::commands::common::resolve_note;
use crate::error::CliError;

/// Tombstone a note; the deletion is sent with the next round
pub fn run_delete(service: &SyncService, id: &str) -> Result<ItemId, CliError> {
    let (key, note) = resolve_note(service, id)?;
    let note_id = note.id().ok_or_else(|| CliError::NoteNotFound(id.to_string()))?;
    service.delete(key)?;
    Ok(note_id)
}

use quill_core::{ItemEdit, ItemId, SyncService};

use crate::commands::common::{capture_editor_input_with_initial, resolve_note};
use crate::error::CliError;

/// Apply title/text replacements; opens the editor when both are `None`
pub fn run_edit(
    service: &SyncService,
    id: &str,
    title: Option<String>,
    text: Option<String>,
) -> Result<ItemId, CliError> {
    let (key, note) = resolve_note(service, id)?;
    let note_id = note.id().ok_or_else(|| CliError::NoteNotFound(id.to_string()))?;

    let text = match (&title, text) {
        (None, None) => {
            let Some(edited) = capture_editor_input_with_initial(note.text())? else {
                return Err(CliError::EmptyEditedContent);
            };
            Some(edited)
        }
        (_, text) => text,
    };

    if let Some(title) = title {
        service.edit(key, ItemEdit::Title(title.trim().to_string()))?;
    }
    if let Some(text) = text {
        service.edit(key, ItemEdit::Text(text))?;
    }
    Ok(note_id)
}

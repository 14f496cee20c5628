use quill_core::SyncService;

use crate::commands::common::{format_note_lines, list_notes, note_to_list_item, NoteListItem};
use crate::error::CliError;

pub fn run_list(
    service: &SyncService,
    limit: usize,
    tag: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let notes = list_notes(service, limit, tag);

    if as_json {
        let json_items = notes
            .iter()
            .map(|note| note_to_list_item(service, note))
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(service, &notes) {
            println!("{line}");
        }
    }

    Ok(())
}

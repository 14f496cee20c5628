use quill_core::{ItemId, SyncService};

use crate::commands::common::{find_or_create_tag, resolve_note, tag_names};
use crate::error::CliError;

/// Replace the note's tags with `names`, creating missing tags.
///
/// Returns the resulting tag names.
pub async fn run_tag(
    service: &SyncService,
    id: &str,
    names: &[String],
) -> Result<Vec<String>, CliError> {
    let (key, _) = resolve_note(service, id)?;

    let mut tags: Vec<ItemId> = Vec::with_capacity(names.len());
    for name in names {
        let tag = find_or_create_tag(service, name).await?;
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    if !service.replace_tags(key, tags)? {
        tracing::debug!(%key, "Tags unchanged");
    }

    let note = service
        .item(key)
        .ok_or_else(|| CliError::NoteNotFound(id.to_string()))?;
    Ok(tag_names(service, &note))
}

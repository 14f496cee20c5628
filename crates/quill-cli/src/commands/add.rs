use quill_core::{ItemEdit, ItemId, SyncService};

use crate::commands::common::{find_or_create_tag, resolve_note_content};
use crate::error::CliError;

/// Create a note from `content` and return its identifier
pub async fn run_add(
    service: &SyncService,
    content: &str,
    title: Option<&str>,
    tag: Option<&str>,
) -> Result<ItemId, CliError> {
    let tag = match tag {
        Some(name) => Some(find_or_create_tag(service, name).await?),
        None => None,
    };

    let key = service.create_note()?;
    if let Some(title) = title {
        service.edit(key, ItemEdit::Title(title.trim().to_string()))?;
    }
    service.edit(key, ItemEdit::Text(content.to_string()))?;
    if let Some(tag) = tag {
        service.queue_link(key, tag)?;
    }

    Ok(service.identify(key).await?)
}

pub async fn run_add_command(
    service: &SyncService,
    content_parts: &[String],
    title: Option<&str>,
    tag: Option<&str>,
) -> Result<(), CliError> {
    let content = resolve_note_content(content_parts)?;
    let id = run_add(service, &content, title, tag).await?;
    println!("{id}");
    Ok(())
}

use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use quill_core::sync::{
    HttpSyncTransport, LocalIdentifierAssigner, LocalOnlyTransport, SyncService, SyncTransport,
};
use quill_core::util::{normalize_text_option, preview};
use quill_core::{ContentType, Item, ItemId, ItemKey, SqliteItemStore, SyncSettings};
use serde::Serialize;

use crate::error::CliError;

const ACCESS_TOKEN_VAR: &str = "QUILL_ACCESS_TOKEN";

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: Option<String>,
    pub title: String,
    pub preview: String,
    pub text: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub tags: Vec<String>,
    pub locked: bool,
    pub pending: bool,
}

/// Open the local store and pick a transport from the environment.
///
/// The worker is not started; commands flush explicitly.
pub fn open_service(db_path: &Path) -> Result<SyncService, CliError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let settings = SyncSettings::from_env()?;
    let store = Arc::new(SqliteItemStore::open(db_path)?);
    let transport = transport_for(&settings, env::var(ACCESS_TOKEN_VAR).ok())?;
    Ok(SyncService::new(
        settings,
        transport,
        Arc::new(LocalIdentifierAssigner),
        store,
    )?)
}

/// HTTP transport when an endpoint and a token are both configured
pub fn transport_for(
    settings: &SyncSettings,
    access_token: Option<String>,
) -> Result<Arc<dyn SyncTransport>, CliError> {
    let token = normalize_text_option(access_token);
    match (settings.sync_endpoint.as_deref(), token) {
        (Some(endpoint), Some(token)) => {
            let transport =
                HttpSyncTransport::new(endpoint, token).map_err(quill_core::Error::from)?;
            tracing::info!(endpoint, "Remote sync enabled");
            Ok(Arc::new(transport))
        }
        (Some(endpoint), None) => {
            tracing::warn!(endpoint, "{ACCESS_TOKEN_VAR} is not set; saving locally only");
            Ok(Arc::new(LocalOnlyTransport))
        }
        (None, _) => Ok(Arc::new(LocalOnlyTransport)),
    }
}

/// Find a live note by full identifier or unique identifier prefix
pub fn resolve_note(service: &SyncService, query: &str) -> Result<(ItemKey, Item), CliError> {
    let query = normalize_note_identifier(query)?;
    if let Ok(id) = query.parse::<ItemId>() {
        if let Some((key, item)) = service.find(id) {
            if item.content_type() == ContentType::Note && !item.is_deleted() {
                return Ok((key, item));
            }
        }
    }

    let mut matches: Vec<(ItemKey, Item)> = service
        .items(ContentType::Note)
        .into_iter()
        .filter(|(_, item)| {
            item.id()
                .is_some_and(|id| id.to_string().starts_with(&query))
        })
        .collect();

    match matches.len() {
        0 => Err(CliError::NoteNotFound(query)),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .filter_map(|(_, item)| item.id())
                .map(|id| short_id(&id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Existing tag with this title, or a newly created and identified one
pub async fn find_or_create_tag(service: &SyncService, name: &str) -> Result<ItemId, CliError> {
    let name = normalize_text_option(Some(name.to_string())).ok_or(CliError::EmptyTagName)?;
    let existing = service
        .items(ContentType::Tag)
        .into_iter()
        .find(|(_, tag)| tag.title().eq_ignore_ascii_case(&name));

    let key = match existing {
        Some((key, _)) => key,
        None => service.create_tag(&name)?,
    };
    Ok(service.identify(key).await?)
}

pub fn tag_names(service: &SyncService, note: &Item) -> Vec<String> {
    let mut names: Vec<String> = note
        .references()
        .iter()
        .filter_map(|id| service.find(*id))
        .filter(|(_, item)| item.content_type() == ContentType::Tag && !item.is_deleted())
        .map(|(_, tag)| tag.title().to_string())
        .collect();
    names.sort();
    names
}

/// Notes ordered by most recent change, optionally only those tagged `tag`
pub fn list_notes(service: &SyncService, limit: usize, tag: Option<&str>) -> Vec<Item> {
    let mut notes: Vec<Item> = service
        .items(ContentType::Note)
        .into_iter()
        .map(|(_, note)| note)
        .filter(|note| {
            tag.map_or(true, |wanted| {
                tag_names(service, note)
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(wanted))
            })
        })
        .collect();
    notes.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
    notes.truncate(limit);
    notes
}

pub fn short_id(id: &ItemId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_note_lines(service: &SyncService, notes: &[Item]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let id = note.id().map_or_else(|| "(local)".to_string(), |id| short_id(&id));
            let summary = note_summary(note, 40);
            let relative_time = format_relative_time(note.updated_at(), now_ms);
            let tags = tag_names(service, note)
                .into_iter()
                .map(|tag| format!("#{tag}"))
                .collect::<Vec<_>>()
                .join(" ");
            let marker = if note.is_dirty() { "*" } else { " " };

            if tags.is_empty() {
                format!("{id:<13}{marker} {summary:<40}  {relative_time}")
            } else {
                format!("{id:<13}{marker} {summary:<40}  {relative_time:<10}  {tags}")
            }
        })
        .collect()
}

pub fn note_to_list_item(service: &SyncService, note: &Item) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id().map(|id| id.to_string()),
        title: note.title().to_string(),
        preview: preview(note.text(), 80),
        text: note.text().to_string(),
        created_at: note.created_at(),
        updated_at: note.updated_at(),
        relative_time: format_relative_time(note.updated_at(), now_ms),
        tags: tag_names(service, note),
        locked: note.is_locked(),
        pending: note.is_dirty(),
    }
}

/// Title when present, otherwise the first line of text
pub fn note_summary(note: &Item, max_chars: usize) -> String {
    if note.title().trim().is_empty() {
        preview(note.text(), max_chars)
    } else {
        preview(note.title(), max_chars)
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input_with_initial("")? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(CliError::EditorFailed("empty EDITOR command".into()));
    };

    let status = Command::new(program).args(parts).arg(file_path).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        )))
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("quill-note-{}-{now}.md", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("QUILL_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    dirs::data_dir()
        .map(|dir| dir.join("quill").join("quill.db"))
        .ok_or(CliError::NoDataDir)
}

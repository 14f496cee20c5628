use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use quill_core::sync::{
    LocalIdentifierAssigner, LocalOnlyTransport, SyncError, SyncRequest, SyncResponse,
    SyncResult, SyncService, SyncTransport,
};
use quill_core::{ContentType, ItemStore, MemoryItemStore, SqliteItemStore, SyncSettings};

use crate::commands::add::run_add;
use crate::commands::common::{
    default_editor, format_relative_time, list_notes, normalize_content,
    normalize_note_identifier, resolve_note, transport_for,
};
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::status::status_report;
use crate::commands::sync::run_sync;
use crate::commands::tag::run_tag;
use crate::error::CliError;

fn memory_service() -> SyncService {
    SyncService::new(
        SyncSettings::default(),
        Arc::new(LocalOnlyTransport),
        Arc::new(LocalIdentifierAssigner),
        Arc::new(MemoryItemStore::new()),
    )
    .unwrap()
}

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
    assert_eq!(
        normalize_content("line 1\nline 2\n"),
        Some("line 1\nline 2".to_string())
    );
}

#[test]
fn default_editor_is_defined() {
    assert!(!default_editor().is_empty());
}

#[test]
fn blank_note_identifier_is_rejected() {
    assert!(matches!(
        normalize_note_identifier("   "),
        Err(CliError::EmptyNoteId)
    ));
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn transport_needs_endpoint_and_token() {
    let remote = SyncSettings {
        sync_endpoint: Some("https://sync.example.com".to_string()),
        ..SyncSettings::default()
    };
    assert!(!transport_for(&remote, Some("token".to_string())).unwrap().is_offline());
    assert!(transport_for(&remote, Some("  ".to_string())).unwrap().is_offline());
    assert!(transport_for(&SyncSettings::default(), Some("token".to_string()))
        .unwrap()
        .is_offline());
}

#[tokio::test]
async fn add_resolves_by_prefix_and_edits() {
    let service = memory_service();
    let id = run_add(&service, "Milk, eggs", Some("Groceries"), None)
        .await
        .unwrap();

    let prefix: String = id.to_string().chars().take(13).collect();
    let (_, note) = resolve_note(&service, &prefix).unwrap();
    assert_eq!(note.title(), "Groceries");
    assert_eq!(note.text(), "Milk, eggs");

    run_edit(&service, &id.to_string(), None, Some("Milk, eggs, bread".into())).unwrap();
    let (_, note) = resolve_note(&service, &prefix).unwrap();
    assert_eq!(note.text(), "Milk, eggs, bread");
    assert!(note.is_dirty());
}

#[tokio::test]
async fn unknown_note_is_reported() {
    let service = memory_service();
    assert!(matches!(
        resolve_note(&service, "0000"),
        Err(CliError::NoteNotFound(_))
    ));
}

#[tokio::test]
async fn tags_are_created_once_and_replaced() {
    let service = memory_service();
    let id = run_add(&service, "standup notes", None, Some("work"))
        .await
        .unwrap();

    let names = run_tag(&service, &id.to_string(), &["Work".into(), "daily".into()])
        .await
        .unwrap();
    assert_eq!(names, vec!["daily".to_string(), "work".to_string()]);
    assert_eq!(service.items(ContentType::Tag).len(), 2);

    assert_eq!(list_notes(&service, 10, Some("daily")).len(), 1);
    assert!(list_notes(&service, 10, Some("home")).is_empty());

    let names = run_tag(&service, &id.to_string(), &[]).await.unwrap();
    assert!(names.is_empty());
}

#[tokio::test]
async fn deleted_notes_leave_the_list() {
    let service = memory_service();
    let id = run_add(&service, "temporary", None, None).await.unwrap();
    assert_eq!(list_notes(&service, 10, None).len(), 1);

    run_delete(&service, &id.to_string()).unwrap();
    assert!(list_notes(&service, 10, None).is_empty());
    assert!(matches!(
        run_delete(&service, &id.to_string()),
        Err(CliError::NoteNotFound(_))
    ));
}

#[tokio::test]
async fn sync_reports_offline_save_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quill.db");
    let store = Arc::new(SqliteItemStore::open(&path).unwrap());
    let service = SyncService::new(
        SyncSettings::default(),
        Arc::new(LocalOnlyTransport),
        Arc::new(LocalIdentifierAssigner),
        Arc::clone(&store) as Arc<dyn ItemStore>,
    )
    .unwrap();

    run_add(&service, "kept offline", None, None).await.unwrap();
    assert_eq!(status_report(&service).pending, 1);

    let status = run_sync(&service).await.unwrap();
    assert_eq!(status, "All changes saved (offline)");
    assert_eq!(status_report(&service).pending, 0);
    drop(service);

    let reopened = SqliteItemStore::open(&path).unwrap();
    let items = reopened.load_items().unwrap();
    assert_eq!(items.len(), 1);
    assert!(!items[0].is_dirty());
}

/// Remote that refuses every round
#[derive(Default)]
struct UnreachableRemote {
    attempts: AtomicUsize,
}

#[async_trait]
impl SyncTransport for UnreachableRemote {
    async fn sync(&self, _request: SyncRequest) -> SyncResult<SyncResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::Api("remote unreachable".to_string()))
    }
}

#[tokio::test]
async fn failed_sync_is_not_retried_on_exit() {
    let remote = Arc::new(UnreachableRemote::default());
    let service = SyncService::new(
        SyncSettings::default(),
        Arc::clone(&remote) as Arc<dyn SyncTransport>,
        Arc::new(LocalIdentifierAssigner),
        Arc::new(MemoryItemStore::new()),
    )
    .unwrap();

    run_add(&service, "kept for later", None, None).await.unwrap();
    assert!(matches!(
        run_sync(&service).await,
        Err(CliError::SyncFailed(_))
    ));
    service.shutdown().await;

    assert_eq!(remote.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(status_report(&service).pending, 1);
}

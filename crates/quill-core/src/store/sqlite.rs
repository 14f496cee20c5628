//! `SQLite` item store

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};

use super::{migrations, ItemStore, StoredItem};
use crate::error::{Error, Result};
use crate::models::ItemId;

const SYNC_TOKEN_KEY: &str = "sync_token";

/// Item store backed by a local `SQLite` file
pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteItemStore").finish_non_exhaustive()
    }
}

impl SqliteItemStore {
    /// Open the store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "synchronous", "FULL")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored items with open local edits
    pub fn dirty_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM items WHERE dirty = 1", [], |row| {
                row.get(0)
            })?;
        usize::try_from(count).map_err(|e| Error::Database(e.to_string()))
    }
}

impl ItemStore for SqliteItemStore {
    fn load_items(&self) -> Result<Vec<StoredItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT payload FROM items ORDER BY updated_at ASC")?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(Error::from))
            .collect()
    }

    fn save_items(&self, items: &[StoredItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO items (id, content_type, payload, updated_at, dirty)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    content_type = excluded.content_type,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at,
                    dirty = excluded.dirty",
            )?;
            for item in items {
                let payload = serde_json::to_string(item)?;
                stmt.execute(params![
                    item.id().as_str(),
                    item.record.content_type.to_string(),
                    payload,
                    item.record.updated_at,
                    i32::from(item.is_dirty()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_items(&self, ids: &[ItemId]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM items WHERE id = ?", params![id.as_str()])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_sync_token(&self) -> Result<Option<String>> {
        let token = self
            .conn()
            .query_row(
                "SELECT value FROM meta WHERE key = ?",
                params![SYNC_TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    fn save_sync_token(&self, token: Option<&str>) -> Result<()> {
        let conn = self.conn();
        match token {
            Some(token) => conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SYNC_TOKEN_KEY, token],
            )?,
            None => conn.execute("DELETE FROM meta WHERE key = ?", params![SYNC_TOKEN_KEY])?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, ItemField, RemoteItem};
    use pretty_assertions::assert_eq;

    fn stored(title: &str, dirty: Vec<ItemField>) -> StoredItem {
        StoredItem {
            record: RemoteItem {
                uuid: ItemId::new(),
                content_type: ContentType::Note,
                title: title.to_string(),
                text: String::new(),
                references: Vec::new(),
                locked: false,
                deleted: false,
                created_at: 1,
                updated_at: 1,
            },
            dirty_fields: dirty,
        }
    }

    #[test]
    fn test_save_and_load_items() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        let clean = stored("clean", Vec::new());
        let dirty = stored("dirty", vec![ItemField::Title]);

        store.save_items(&[clean.clone(), dirty.clone()]).unwrap();
        let mut loaded = store.load_items().unwrap();
        loaded.sort_by_key(|item| item.record.title.clone());

        assert_eq!(loaded, vec![clean, dirty]);
        assert_eq!(store.dirty_count().unwrap(), 1);
    }

    #[test]
    fn test_save_replaces_existing_row() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        let mut item = stored("before", vec![ItemField::Title]);
        store.save_items(std::slice::from_ref(&item)).unwrap();

        item.record.title = "after".to_string();
        item.dirty_fields.clear();
        store.save_items(std::slice::from_ref(&item)).unwrap();

        assert_eq!(store.load_items().unwrap(), vec![item]);
        assert_eq!(store.dirty_count().unwrap(), 0);
    }

    #[test]
    fn test_remove_items() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        let item = stored("gone", Vec::new());
        store.save_items(std::slice::from_ref(&item)).unwrap();
        store.remove_items(&[item.id()]).unwrap();
        assert!(store.load_items().unwrap().is_empty());
    }

    #[test]
    fn test_sync_token_round_trip() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        assert_eq!(store.load_sync_token().unwrap(), None);

        store.save_sync_token(Some("t1")).unwrap();
        store.save_sync_token(Some("t2")).unwrap();
        assert_eq!(store.load_sync_token().unwrap().as_deref(), Some("t2"));

        store.save_sync_token(None).unwrap();
        assert_eq!(store.load_sync_token().unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.db");
        let item = stored("persisted", vec![ItemField::Text]);

        {
            let store = SqliteItemStore::open(&path).unwrap();
            store.save_items(std::slice::from_ref(&item)).unwrap();
            store.save_sync_token(Some("cursor")).unwrap();
        }

        let store = SqliteItemStore::open(&path).unwrap();
        assert_eq!(store.load_items().unwrap(), vec![item]);
        assert_eq!(store.load_sync_token().unwrap().as_deref(), Some("cursor"));
    }
}

//! Payload storage.
//!
//! The engine writes every node it inserts through a [`PayloadStore`] and
//! deletes what the garbage collector evicts. Two backends are provided: an
//! in-memory map and SQLite.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use feedsync_core::{Config, ContentId, ContentNode, NodeKind, SemanticProperties, SharedState};

/// Errors that can occur during payload storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Key-value storage for content payloads, shared states and semantic properties.
///
/// Calls are synchronous; the engine makes them from its single writer.
pub trait PayloadStore: Send + Sync {
    /// Nodes for the given ids; missing ids are skipped.
    fn get_payloads(&self, ids: &[ContentId]) -> Result<Vec<ContentNode>>;

    /// Insert or replace nodes.
    fn put_payloads(&self, nodes: &[ContentNode]) -> Result<()>;

    fn get_shared_states(&self) -> Result<Vec<SharedState>>;

    fn put_shared_state(&self, state: &SharedState) -> Result<()>;

    /// Semantic properties for the given ids; missing ids are skipped.
    fn get_semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<SemanticProperties>>;

    fn set_semantic_properties(&self, id: &ContentId, data: &[u8]) -> Result<()>;

    /// Delete node payloads. Semantic properties are kept.
    fn delete_payloads(&self, ids: &[ContentId]) -> Result<()>;

    /// Number of stored node payloads.
    fn payload_count(&self) -> Result<usize>;
}

/// Payload store backed by in-process maps.
#[derive(Default)]
pub struct InMemoryPayloadStore {
    payloads: RwLock<HashMap<ContentId, ContentNode>>,
    shared_states: RwLock<HashMap<ContentId, SharedState>>,
    semantic_properties: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.payloads.read().contains_key(id)
    }
}

impl PayloadStore for InMemoryPayloadStore {
    fn get_payloads(&self, ids: &[ContentId]) -> Result<Vec<ContentNode>> {
        let payloads = self.payloads.read();
        Ok(ids.iter().filter_map(|id| payloads.get(id).cloned()).collect())
    }

    fn put_payloads(&self, nodes: &[ContentNode]) -> Result<()> {
        let mut payloads = self.payloads.write();
        for node in nodes {
            payloads.insert(node.id.clone(), node.clone());
        }
        Ok(())
    }

    fn get_shared_states(&self) -> Result<Vec<SharedState>> {
        let mut states: Vec<SharedState> = self.shared_states.read().values().cloned().collect();
        states.sort_by(|a, b| a.content_id.cmp(&b.content_id));
        Ok(states)
    }

    fn put_shared_state(&self, state: &SharedState) -> Result<()> {
        self.shared_states
            .write()
            .insert(state.content_id.clone(), state.clone());
        Ok(())
    }

    fn get_semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<SemanticProperties>> {
        let properties = self.semantic_properties.read();
        Ok(ids
            .iter()
            .filter_map(|id| {
                properties.get(id).map(|data| SemanticProperties {
                    content_id: id.clone(),
                    data: data.clone(),
                })
            })
            .collect())
    }

    fn set_semantic_properties(&self, id: &ContentId, data: &[u8]) -> Result<()> {
        self.semantic_properties.write().insert(id.clone(), data.to_vec());
        Ok(())
    }

    fn delete_payloads(&self, ids: &[ContentId]) -> Result<()> {
        let mut payloads = self.payloads.write();
        for id in ids {
            payloads.remove(id);
        }
        Ok(())
    }

    fn payload_count(&self) -> Result<usize> {
        Ok(self.payloads.read().len())
    }
}

/// SQLite-backed payload storage.
pub struct SqlitePayloadStore {
    /// Database connection (wrapped in mutex for thread safety).
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqlitePayloadStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
            path,
        };

        store.run_migrations()?;

        Ok(store)
    }

    /// Open store at the default data directory.
    pub fn open_default() -> Result<Self> {
        Self::new(Config::data_dir().join("payloads.db"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            let migration = include_str!("../migrations/001_initial.sql");
            conn.execute_batch(migration)?;
        }

        Ok(())
    }

    fn kind_to_str(kind: NodeKind) -> &'static str {
        match kind {
            NodeKind::Feature => "feature",
            NodeKind::Token => "token",
        }
    }

    fn str_to_kind(s: &str) -> NodeKind {
        match s {
            "token" => NodeKind::Token,
            _ => NodeKind::Feature,
        }
    }

    fn read_id(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<ContentId> {
        let table: String = row.get(offset)?;
        let domain: String = row.get(offset + 1)?;
        let numeric: i64 = row.get(offset + 2)?;
        Ok(ContentId::new(table, domain, numeric as u64))
    }
}

impl PayloadStore for SqlitePayloadStore {
    fn get_payloads(&self, ids: &[ContentId]) -> Result<Vec<ContentNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT table_name, content_domain, numeric_id, kind, payload
             FROM payloads WHERE content_key = ?1",
        )?;

        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            let node = stmt
                .query_row(params![id.to_string()], |row| {
                    let kind: String = row.get(3)?;
                    Ok(ContentNode {
                        id: Self::read_id(row, 0)?,
                        kind: Self::str_to_kind(&kind),
                        payload: row.get(4)?,
                    })
                })
                .optional()?;
            nodes.extend(node);
        }
        Ok(nodes)
    }

    fn put_payloads(&self, nodes: &[ContentNode]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO payloads (content_key, table_name, content_domain, numeric_id, kind, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(content_key) DO UPDATE SET
                    kind = excluded.kind,
                    payload = excluded.payload,
                    updated_at = datetime('now')",
            )?;
            for node in nodes {
                stmt.execute(params![
                    node.id.to_string(),
                    node.id.table,
                    node.id.content_domain,
                    node.id.id as i64,
                    Self::kind_to_str(node.kind),
                    node.payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_shared_states(&self) -> Result<Vec<SharedState>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT table_name, content_domain, numeric_id, payload
             FROM shared_states ORDER BY table_name, content_domain, numeric_id",
        )?;
        let states = stmt
            .query_map([], |row| {
                Ok(SharedState {
                    content_id: Self::read_id(row, 0)?,
                    payload: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn put_shared_state(&self, state: &SharedState) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO shared_states (content_key, table_name, content_domain, numeric_id, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                state.content_id.to_string(),
                state.content_id.table,
                state.content_id.content_domain,
                state.content_id.id as i64,
                state.payload,
            ],
        )?;
        Ok(())
    }

    fn get_semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<SemanticProperties>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT data FROM semantic_properties WHERE content_key = ?1")?;

        let mut found = Vec::new();
        for id in ids {
            let data: Option<Vec<u8>> = stmt
                .query_row(params![id.to_string()], |row| row.get(0))
                .optional()?;
            if let Some(data) = data {
                found.push(SemanticProperties {
                    content_id: id.clone(),
                    data,
                });
            }
        }
        Ok(found)
    }

    fn set_semantic_properties(&self, id: &ContentId, data: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO semantic_properties (content_key, table_name, content_domain, numeric_id, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), id.table, id.content_domain, id.id as i64, data],
        )?;
        Ok(())
    }

    fn delete_payloads(&self, ids: &[ContentId]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM payloads WHERE content_key = ?1")?;
            for id in ids {
                stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn payload_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM payloads", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SqlitePayloadStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqlitePayloadStore::new(temp_dir.path().join("payloads.db")).unwrap();
        (store, temp_dir)
    }

    fn node(id: u64, payload: &[u8]) -> ContentNode {
        ContentNode::feature(ContentId::feature("stream", id), payload.to_vec())
    }

    #[test]
    fn test_put_and_get_payloads() {
        let (store, _tmp) = create_test_store();
        let token = ContentNode::token(ContentId::token("stream", 9), b"next".to_vec());
        store.put_payloads(&[node(1, b"a"), node(2, b"b"), token.clone()]).unwrap();

        let got = store
            .get_payloads(&[ContentId::feature("stream", 2), token.id.clone(), ContentId::feature("stream", 77)])
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].payload, b"b");
        assert!(got[1].is_token());
        assert_eq!(store.payload_count().unwrap(), 3);
    }

    #[test]
    fn test_put_replaces_payload() {
        let (store, _tmp) = create_test_store();
        store.put_payloads(&[node(1, b"old")]).unwrap();
        store.put_payloads(&[node(1, b"new")]).unwrap();

        let got = store.get_payloads(&[ContentId::feature("stream", 1)]).unwrap();
        assert_eq!(got[0].payload, b"new");
        assert_eq!(store.payload_count().unwrap(), 1);
    }

    #[test]
    fn test_delete_keeps_semantic_properties() {
        let (store, _tmp) = create_test_store();
        let id = ContentId::feature("stream", 1);
        store.put_payloads(&[node(1, b"a")]).unwrap();
        store.set_semantic_properties(&id, b"props").unwrap();

        store.delete_payloads(&[id.clone()]).unwrap();

        assert!(store.get_payloads(&[id.clone()]).unwrap().is_empty());
        let props = store.get_semantic_properties(&[id]).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].data, b"props");
    }

    #[test]
    fn test_shared_states() {
        let (store, _tmp) = create_test_store();
        let state = SharedState {
            content_id: ContentId::new("shared", "stream", 1),
            payload: b"template".to_vec(),
        };
        store.put_shared_state(&state).unwrap();
        assert_eq!(store.get_shared_states().unwrap(), vec![state]);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("payloads.db");
        {
            let store = SqlitePayloadStore::new(&path).unwrap();
            store.put_payloads(&[node(5, b"kept")]).unwrap();
        }
        let store = SqlitePayloadStore::new(&path).unwrap();
        assert_eq!(store.payload_count().unwrap(), 1);
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryPayloadStore::new();
        store.put_payloads(&[node(1, b"a")]).unwrap();
        assert!(store.contains(&ContentId::feature("stream", 1)));
        store.delete_payloads(&[ContentId::feature("stream", 1)]).unwrap();
        assert_eq!(store.payload_count().unwrap(), 0);
    }
}

//! SQLite-backed implementation of [`MemoryStore`] (spec §4.E).
//!
//! [`SqliteMemoryStore`] persists [`MemoryRecord`]s to a SQLite database and
//! uses an FTS5 virtual table over title and content for `text_search`. It is
//! a drop-in replacement for [`super::store::InMemoryStore`] behind the same
//! trait, for deployments that need memory to survive a restart.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::schemas::{MemoryRecord, MemoryType};
use super::store::MemoryStore;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS memory_records (
    id TEXT PRIMARY KEY NOT NULL,
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    accessed_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memory_records_type ON memory_records (type);

CREATE VIRTUAL TABLE IF NOT EXISTS memory_records_fts USING fts5(
    title, content,
    content='memory_records',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memory_records_ai AFTER INSERT ON memory_records BEGIN
    INSERT INTO memory_records_fts(rowid, title, content) VALUES (new.rowid, new.title, new.content);
END;
CREATE TRIGGER IF NOT EXISTS memory_records_ad AFTER DELETE ON memory_records BEGIN
    INSERT INTO memory_records_fts(memory_records_fts, rowid, title, content) VALUES('delete', old.rowid, old.title, old.content);
END;
CREATE TRIGGER IF NOT EXISTS memory_records_au AFTER UPDATE ON memory_records BEGIN
    INSERT INTO memory_records_fts(memory_records_fts, rowid, title, content) VALUES('delete', old.rowid, old.title, old.content);
    INSERT INTO memory_records_fts(rowid, title, content) VALUES (new.rowid, new.title, new.content);
END;
"#;

/// SQLite-backed, thread-safe long-term memory store with FTS5 search.
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    pub fn open(path: &str) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("SQLite open error: {e}"))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(())).map_err(|e| format!("SQLite PRAGMA error: {e}"))?;
        conn.execute_batch(SCHEMA_SQL).map_err(|e| format!("SQLite schema error: {e}"))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("SQLite in-memory error: {e}"))?;
        conn.execute_batch(SCHEMA_SQL).map_err(|e| format!("SQLite schema error: {e}"))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, String> {
        self.conn.lock().map_err(|e| format!("SQLite lock error: {e}"))
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
    let type_str: String = row.get(1)?;
    let metadata_json: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    let accessed_at: String = row.get(7)?;

    Ok(MemoryRecord {
        id: row.get(0)?,
        type_: str_to_type(&type_str),
        title: row.get(2)?,
        content: row.get(3)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        embeddings: None,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
        accessed_at: parse_dt(&accessed_at),
        access_count: row.get(8)?,
    })
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn str_to_type(s: &str) -> MemoryType {
    match s {
        "conversation_turn" => MemoryType::ConversationTurn,
        "session_summary" => MemoryType::SessionSummary,
        "device_config" => MemoryType::DeviceConfig,
        "user_preference" => MemoryType::UserPreference,
        "solved_incident" => MemoryType::SolvedIncident,
        "learned_pattern" => MemoryType::LearnedPattern,
        "workflow_template" => MemoryType::WorkflowTemplate,
        "workflow_execution" => MemoryType::WorkflowExecution,
        "environment_state" => MemoryType::EnvironmentState,
        "command_history" => MemoryType::CommandHistory,
        "bookmark" => MemoryType::Bookmark,
        _ => MemoryType::CustomNote,
    }
}

fn sanitise_fts_query(query: &str) -> String {
    query.split_whitespace().map(|tok| format!("\"{}\"", tok.replace('"', "\"\""))).collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn insert(&self, record: MemoryRecord) -> Result<(), String> {
        let conn = self.lock()?;
        let metadata_json = serde_json::to_string(&record.metadata).map_err(|e| e.to_string())?;
        conn.execute(
            r#"INSERT INTO memory_records
               (id, type, title, content, metadata, created_at, updated_at, accessed_at, access_count)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                record.id,
                record.type_.as_str(),
                record.title,
                record.content,
                metadata_json,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.accessed_at.to_rfc3339(),
                record.access_count,
            ],
        )
        .map_err(|e| format!("SQLite insert error: {e}"))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, String> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT id, type, title, content, metadata, created_at, updated_at, accessed_at, access_count
             FROM memory_records WHERE id = ?1",
            params![id],
            row_to_record,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(format!("SQLite query error: {e}")),
        }
    }

    async fn update(&self, mut record: MemoryRecord) -> Result<(), String> {
        record.updated_at = Utc::now();
        let conn = self.lock()?;
        let metadata_json = serde_json::to_string(&record.metadata).map_err(|e| e.to_string())?;
        conn.execute(
            r#"UPDATE memory_records SET type=?2, title=?3, content=?4, metadata=?5, updated_at=?6,
               accessed_at=?7, access_count=?8 WHERE id=?1"#,
            params![
                record.id,
                record.type_.as_str(),
                record.title,
                record.content,
                metadata_json,
                record.updated_at.to_rfc3339(),
                record.accessed_at.to_rfc3339(),
                record.access_count,
            ],
        )
        .map_err(|e| format!("SQLite update error: {e}"))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, String> {
        let conn = self.lock()?;
        let affected =
            conn.execute("DELETE FROM memory_records WHERE id = ?1", params![id]).map_err(|e| format!("SQLite delete error: {e}"))?;
        Ok(affected > 0)
    }

    async fn touch(&self, id: &str) -> Result<Option<MemoryRecord>, String> {
        {
            let conn = self.lock()?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE memory_records SET accessed_at = ?2, access_count = access_count + 1 WHERE id = ?1",
                params![id, now],
            )
            .map_err(|e| format!("SQLite update error: {e}"))?;
        }
        self.get(id).await
    }

    async fn all(&self) -> Result<Vec<MemoryRecord>, String> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, type, title, content, metadata, created_at, updated_at, accessed_at, access_count
                 FROM memory_records",
            )
            .map_err(|e| format!("SQLite prepare error: {e}"))?;
        let rows = stmt.query_map([], row_to_record).map_err(|e| format!("SQLite query error: {e}"))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn by_type(&self, type_: MemoryType) -> Result<Vec<MemoryRecord>, String> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, type, title, content, metadata, created_at, updated_at, accessed_at, access_count
                 FROM memory_records WHERE type = ?1",
            )
            .map_err(|e| format!("SQLite prepare error: {e}"))?;
        let rows = stmt.query_map(params![type_.as_str()], row_to_record).map_err(|e| format!("SQLite query error: {e}"))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn by_tags(&self, tags: &[String]) -> Result<Vec<MemoryRecord>, String> {
        let all = self.all().await?;
        Ok(all.into_iter().filter(|r| tags.iter().all(|tag| r.metadata.tags.contains(tag))).collect())
    }

    async fn text_search(&self, query: &str) -> Result<Vec<MemoryRecord>, String> {
        if query.trim().is_empty() {
            return self.all().await;
        }
        let results: Vec<MemoryRecord> = {
            let conn = self.lock()?;
            let fts_query = sanitise_fts_query(query);
            let mut stmt = conn
                .prepare(
                    r#"SELECT m.id, m.type, m.title, m.content, m.metadata, m.created_at, m.updated_at,
                              m.accessed_at, m.access_count
                       FROM memory_records_fts
                       JOIN memory_records m ON m.rowid = memory_records_fts.rowid
                       WHERE memory_records_fts MATCH ?1
                       ORDER BY rank"#,
                )
                .map_err(|e| format!("SQLite prepare error: {e}"))?;
            let rows = stmt.query_map(params![fts_query], row_to_record).map_err(|e| format!("SQLite query error: {e}"))?;
            rows.filter_map(|r| r.ok()).collect()
        };
        if results.is_empty() {
            let needle = query.to_lowercase();
            let all = self.all().await?;
            return Ok(all
                .into_iter()
                .filter(|r| r.title.to_lowercase().contains(&needle) || r.content.to_lowercase().contains(&needle))
                .collect());
        }
        Ok(results)
    }

    async fn clear(&self) -> Result<usize, String> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM memory_records", [], |row| row.get(0)).map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM memory_records", []).map_err(|e| format!("SQLite delete error: {e}"))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SqliteMemoryStore {
        SqliteMemoryStore::in_memory().expect("in-memory SQLite store")
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = make_store();
        let record = MemoryRecord::new(MemoryType::CustomNote, "title", "some content");
        let id = record.id.clone();
        store.insert(record).await.unwrap();
        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "some content");
    }

    #[tokio::test]
    async fn text_search_finds_by_content() {
        let store = make_store();
        store.insert(MemoryRecord::new(MemoryType::CustomNote, "Deploy", "Deploy to production")).await.unwrap();
        store.insert(MemoryRecord::new(MemoryType::CustomNote, "Docs", "Update documentation")).await.unwrap();

        let hits = store.text_search("production").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("production"));
    }

    #[tokio::test]
    async fn touch_increments_access_count() {
        let store = make_store();
        let record = MemoryRecord::new(MemoryType::CustomNote, "a", "b");
        let id = record.id.clone();
        store.insert(record).await.unwrap();
        store.touch(&id).await.unwrap();
        let touched = store.touch(&id).await.unwrap().unwrap();
        assert_eq!(touched.access_count, 2);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = make_store();
        let record = MemoryRecord::new(MemoryType::CustomNote, "a", "b");
        let id = record.id.clone();
        store.insert(record).await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_reports_count_and_empties_store() {
        let store = make_store();
        store.insert(MemoryRecord::new(MemoryType::CustomNote, "a", "a")).await.unwrap();
        store.insert(MemoryRecord::new(MemoryType::CustomNote, "b", "b")).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_with_tempfile_persists_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.db");
        let store = SqliteMemoryStore::open(path.to_str().unwrap()).expect("open store on disk");
        store.insert(MemoryRecord::new(MemoryType::CustomNote, "a", "hello world")).await.unwrap();
        let hits = store.text_search("hello").await.unwrap();
        assert!(!hits.is_empty());
    }
}

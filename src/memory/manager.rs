//! Unified memory interface (spec §4.E): the facade the agent loop talks to,
//! combining session history, long-term storage, and retrieval.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::retrieval::{MemoryRetrieval, RetrievalConfig};
use super::schemas::{MemoryMetadata, MemoryRecord, MemoryType, SearchResult, Turn};
use super::session::{SessionConfig, SessionStore};
use super::sqlite_store::SqliteMemoryStore;
use super::store::{InMemoryStore, MemoryStore};

/// Ties a session's conversation history to long-term storage and its
/// retrieval index.
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    retrieval: MemoryRetrieval,
    session: Mutex<SessionStore>,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        let retrieval = MemoryRetrieval::new(store.clone(), RetrievalConfig::default());
        Self { store, retrieval, session: Mutex::new(SessionStore::new(SessionConfig::default())) }
    }

    /// Open (or create) a SQLite-backed manager at `db_path`.
    pub fn open(db_path: &str) -> Result<Self, String> {
        Ok(Self::new(Arc::new(SqliteMemoryStore::open(db_path)?)))
    }

    /// An in-process manager with no persistence, for tests and short-lived
    /// runs.
    pub fn in_process() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub async fn session_id(&self) -> String {
        self.session.lock().await.session_id().to_owned()
    }

    // ─── Free-form notes ───────────────────────────────────────────────

    pub async fn remember(
        &self,
        content: &str,
        title: Option<&str>,
        tags: Vec<String>,
        ttl_days: Option<i64>,
    ) -> Result<String, String> {
        let title = title.map(str::to_owned).unwrap_or_else(|| content.chars().take(60).collect());
        let mut metadata = MemoryMetadata { tags, source: "manual".to_owned(), ..MemoryMetadata::new() };
        if let Some(days) = ttl_days {
            metadata.expires_at = Some(chrono::Utc::now() + chrono::Duration::days(days));
        }
        let record = MemoryRecord::new(MemoryType::CustomNote, title, content).with_metadata(metadata);
        let id = record.id.clone();
        self.store.insert(record).await?;
        Ok(id)
    }

    pub async fn recall(&self, query: &str, tags: Option<&[String]>, limit: Option<usize>) -> Result<Vec<SearchResult>, String> {
        let mut results = self.retrieval.search(query, limit).await?;
        if let Some(tags) = tags {
            results.retain(|r| tags.iter().all(|tag| r.record.metadata.tags.contains(tag)));
        }
        Ok(results)
    }

    pub async fn forget(&self, record_id: &str) -> Result<bool, String> {
        self.store.delete(record_id).await
    }

    pub async fn get(&self, record_id: &str) -> Result<Option<MemoryRecord>, String> {
        self.store.touch(record_id).await
    }

    pub async fn update(&self, record: MemoryRecord) -> Result<(), String> {
        self.store.update(record).await
    }

    /// Store an arbitrary key/value pair. `value` is rendered with
    /// `serde_json`'s `Display`-like debug format for non-string JSON values.
    pub async fn store(&self, key: &str, value: Value, memory_type: MemoryType) -> Result<String, String> {
        let content = render_value(&value);
        let record = MemoryRecord::new(memory_type, key, content);
        let id = record.id.clone();
        self.store.insert(record).await?;
        Ok(id)
    }

    // ─── Session / conversation ─────────────────────────────────────────

    pub async fn add_turn(&self, user_input: &str, agent_response: &str, tools_used: Vec<String>) {
        let mut turn = Turn::new(user_input, agent_response);
        turn.tools_used = tools_used;
        self.session.lock().await.append_turn(turn);
    }

    pub async fn get_session_turns(&self, n: usize) -> Vec<Turn> {
        self.session.lock().await.get_recent(n).into_iter().cloned().collect()
    }

    pub async fn get_session_summary(&self) -> String {
        let session = self.session.lock().await;
        let count = session.turn_count();
        format!("{count} exchanges. {}", session.summarize())
    }

    pub async fn clear_session(&self) {
        self.session.lock().await.clear();
    }

    /// Combined context for an LLM prompt: recent session turns plus
    /// relevant long-term memories.
    pub async fn get_context(&self, query: &str, include_session: bool, include_relevant: bool) -> Result<String, String> {
        let mut parts = Vec::new();

        if include_session {
            let window = self.session.lock().await.get_context_window(2000);
            if !window.is_empty() {
                parts.push(window);
            }
        }

        if include_relevant {
            let relevant = self.retrieval.get_relevant_context(query, 5, 1000).await?;
            if !relevant.is_empty() {
                parts.push(relevant);
            }
        }

        Ok(parts.join("\n\n---\n\n"))
    }

    /// Flush the current session's turns into long-term storage and start a
    /// fresh one.
    pub async fn persist_session(&self) -> Result<Vec<String>, String> {
        let records = self.session.lock().await.to_memory_records();
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id.clone();
            self.store.insert(record).await?;
            ids.push(id);
        }
        Ok(ids)
    }

    // ─── Knowledge base helpers ──────────────────────────────────────────

    pub async fn store_device_config(&self, device_id: &str, config: Value, tags: Vec<String>) -> Result<String, String> {
        let mut all_tags = vec![device_id.to_owned()];
        all_tags.extend(tags);
        let metadata = MemoryMetadata { tags: all_tags, source: "device_config".to_owned(), ..MemoryMetadata::new() };
        let record =
            MemoryRecord::new(MemoryType::DeviceConfig, device_id, render_value(&config)).with_metadata(metadata);
        let id = record.id.clone();
        self.store.insert(record).await?;
        Ok(id)
    }

    pub async fn store_user_preference(&self, key: &str, value: Value) -> Result<String, String> {
        let record = MemoryRecord::new(MemoryType::UserPreference, key, render_value(&value));
        let id = record.id.clone();
        self.store.insert(record).await?;
        Ok(id)
    }

    pub async fn store_solved_incident(
        &self,
        title: &str,
        problem: &str,
        solution: &str,
        tags: Vec<String>,
    ) -> Result<String, String> {
        let content = format!("Problem: {problem}\n\nSolution: {solution}");
        let metadata = MemoryMetadata { tags, source: "incident".to_owned(), ..MemoryMetadata::new() };
        let record = MemoryRecord::new(MemoryType::SolvedIncident, title, content).with_metadata(metadata);
        let id = record.id.clone();
        self.store.insert(record).await?;
        Ok(id)
    }

    pub async fn store_learned_pattern(
        &self,
        pattern_name: &str,
        pattern_description: &str,
        examples: Vec<String>,
    ) -> Result<String, String> {
        let content = format!("{pattern_description}\n\nExamples: {}", examples.join(", "));
        let record = MemoryRecord::new(MemoryType::LearnedPattern, pattern_name, content);
        let id = record.id.clone();
        self.store.insert(record).await?;
        Ok(id)
    }

    // ─── Query operations ─────────────────────────────────────────────

    pub async fn get_by_tags(&self, tags: &[String]) -> Result<Vec<MemoryRecord>, String> {
        self.retrieval.get_by_tags(tags, usize::MAX).await
    }

    pub async fn get_recent(&self, memory_type: Option<MemoryType>, days: i64) -> Result<Vec<MemoryRecord>, String> {
        self.retrieval.get_recent(memory_type, days, usize::MAX).await
    }

    pub async fn get_frequently_used(&self, memory_type: Option<MemoryType>, limit: usize) -> Result<Vec<MemoryRecord>, String> {
        self.retrieval.get_frequently_used(memory_type, limit).await
    }

    // ─── Maintenance ─────────────────────────────────────────────────

    pub async fn clear_all(&self) -> Result<usize, String> {
        self.store.clear().await
    }

    pub async fn get_stats(&self) -> HashMap<String, Value> {
        let session = self.session.lock().await;
        let all = self.store.all().await.unwrap_or_default();
        let mut stats = HashMap::new();
        stats.insert("session_id".to_owned(), Value::String(session.session_id().to_owned()));
        stats.insert("session_turns".to_owned(), Value::Number(session.turn_count().into()));
        stats.insert("long_term_records".to_owned(), Value::Number(all.len().into()));
        stats
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        other => other.to_string(),
    }
}

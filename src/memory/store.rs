//! Long-term memory storage (spec §4.E): the [`MemoryStore`] trait and an
//! in-process implementation backed by a `HashMap`.
//!
//! Unlike the session store, records here persist across sessions and are
//! addressed by id rather than recency.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::schemas::{MemoryRecord, MemoryType};

/// Abstraction over where long-term [`MemoryRecord`]s live.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert(&self, record: MemoryRecord) -> Result<(), String>;
    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, String>;
    async fn update(&self, record: MemoryRecord) -> Result<(), String>;
    async fn delete(&self, id: &str) -> Result<bool, String>;
    /// Record an access: bumps `accessed_at`/`access_count` and returns the
    /// touched record.
    async fn touch(&self, id: &str) -> Result<Option<MemoryRecord>, String>;
    async fn all(&self) -> Result<Vec<MemoryRecord>, String>;
    async fn by_type(&self, type_: MemoryType) -> Result<Vec<MemoryRecord>, String>;
    async fn by_tags(&self, tags: &[String]) -> Result<Vec<MemoryRecord>, String>;
    /// Case-insensitive substring match over title and content.
    async fn text_search(&self, query: &str) -> Result<Vec<MemoryRecord>, String>;
    async fn clear(&self) -> Result<usize, String>;
}

/// `RwLock<HashMap>`-backed store, suitable for tests and single-process
/// deployments that don't need the result to survive a restart.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert(&self, record: MemoryRecord) -> Result<(), String> {
        let mut records = self.records.write().map_err(|e| e.to_string())?;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, String> {
        let records = self.records.read().map_err(|e| e.to_string())?;
        Ok(records.get(id).cloned())
    }

    async fn update(&self, mut record: MemoryRecord) -> Result<(), String> {
        record.updated_at = chrono::Utc::now();
        let mut records = self.records.write().map_err(|e| e.to_string())?;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, String> {
        let mut records = self.records.write().map_err(|e| e.to_string())?;
        Ok(records.remove(id).is_some())
    }

    async fn touch(&self, id: &str) -> Result<Option<MemoryRecord>, String> {
        let mut records = self.records.write().map_err(|e| e.to_string())?;
        if let Some(record) = records.get_mut(id) {
            record.touch();
            Ok(Some(record.clone()))
        } else {
            Ok(None)
        }
    }

    async fn all(&self) -> Result<Vec<MemoryRecord>, String> {
        let records = self.records.read().map_err(|e| e.to_string())?;
        Ok(records.values().cloned().collect())
    }

    async fn by_type(&self, type_: MemoryType) -> Result<Vec<MemoryRecord>, String> {
        let records = self.records.read().map_err(|e| e.to_string())?;
        Ok(records.values().filter(|r| r.type_ == type_).cloned().collect())
    }

    async fn by_tags(&self, tags: &[String]) -> Result<Vec<MemoryRecord>, String> {
        let records = self.records.read().map_err(|e| e.to_string())?;
        Ok(records
            .values()
            .filter(|r| tags.iter().all(|tag| r.metadata.tags.contains(tag)))
            .cloned()
            .collect())
    }

    async fn text_search(&self, query: &str) -> Result<Vec<MemoryRecord>, String> {
        let needle = query.to_lowercase();
        let records = self.records.read().map_err(|e| e.to_string())?;
        Ok(records
            .values()
            .filter(|r| r.title.to_lowercase().contains(&needle) || r.content.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<usize, String> {
        let mut records = self.records.write().map_err(|e| e.to_string())?;
        let count = records.len();
        records.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(title: &str, content: &str) -> MemoryRecord {
        MemoryRecord::new(MemoryType::CustomNote, title, content)
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = InMemoryStore::new();
        let record = note("title", "content");
        let id = record.id.clone();
        store.insert(record).await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.unwrap().title, "title");
    }

    #[tokio::test]
    async fn touch_increments_access_count() {
        let store = InMemoryStore::new();
        let record = note("a", "b");
        let id = record.id.clone();
        store.insert(record).await.unwrap();
        store.touch(&id).await.unwrap();
        let touched = store.touch(&id).await.unwrap().unwrap();
        assert_eq!(touched.access_count, 2);
    }

    #[tokio::test]
    async fn by_tags_requires_all_tags_present() {
        let store = InMemoryStore::new();
        let mut r1 = note("a", "a");
        r1.metadata.tags = vec!["important".into(), "work".into()];
        let mut r2 = note("b", "b");
        r2.metadata.tags = vec!["important".into()];
        store.insert(r1).await.unwrap();
        store.insert(r2).await.unwrap();

        let hits = store.by_tags(&["important".to_owned(), "work".to_owned()]).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_everything_and_reports_count() {
        let store = InMemoryStore::new();
        store.insert(note("a", "a")).await.unwrap();
        store.insert(note("b", "b")).await.unwrap();
        let count = store.clear().await.unwrap();
        assert_eq!(count, 2);
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_nonexistent_returns_false() {
        let store = InMemoryStore::new();
        assert!(!store.delete("missing").await.unwrap());
    }
}

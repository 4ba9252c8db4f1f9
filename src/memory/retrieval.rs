//! Scored retrieval over long-term memory (spec §4.E): relevance, recency,
//! and frequency blended into a single ranking, plus tag and type lookups.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use super::schemas::{MemoryRecord, MemoryType, SearchResult, sort_by_score_desc};
use super::store::MemoryStore;

/// Weights and thresholds for [`MemoryRetrieval::search`].
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub max_results: usize,
    pub recency_weight: f64,
    pub frequency_weight: f64,
    pub relevance_weight: f64,
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { max_results: 10, recency_weight: 0.3, frequency_weight: 0.2, relevance_weight: 0.5, min_score: 0.1 }
    }
}

/// Keyword-overlap + recency + frequency search over a [`MemoryStore`].
pub struct MemoryRetrieval {
    store: Arc<dyn MemoryStore>,
    config: RetrievalConfig,
}

impl MemoryRetrieval {
    pub fn new(store: Arc<dyn MemoryStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    /// Rank `candidates` against `query` and return the top matches above
    /// `min_score`, sorted descending.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchResult>, String> {
        let limit = limit.unwrap_or(self.config.max_results);
        let candidates = self.store.text_search(query).await?;

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .take(limit * 2)
            .map(|record| {
                let score = self.calculate_score(query, &record);
                SearchResult::new(record, score, "keyword")
            })
            .filter(|r| r.score >= self.config.min_score)
            .collect();

        sort_by_score_desc(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    fn calculate_score(&self, query: &str, record: &MemoryRecord) -> f64 {
        let relevance = calculate_relevance(query, record);
        let recency = calculate_recency(record);
        let frequency = calculate_frequency(record);
        let score = self.config.relevance_weight * relevance
            + self.config.recency_weight * recency
            + self.config.frequency_weight * frequency;
        score.min(1.0)
    }

    /// Token-budgeted context string for a query, for stitching into an LLM
    /// prompt.
    pub async fn get_relevant_context(&self, query: &str, limit: usize, max_tokens: usize) -> Result<String, String> {
        let results = self.search(query, Some(limit)).await?;
        let budget_chars = max_tokens * 4;
        let mut used = 0usize;
        let mut parts = Vec::new();

        for result in results {
            let piece = format!("[{}] {}\n{}", result.record.type_, result.record.title, result.record.content);
            if used + piece.len() > budget_chars {
                break;
            }
            used += piece.len();
            parts.push(piece);
        }

        Ok(parts.join("\n\n"))
    }

    /// Find records similar to `record`, using its title and a content
    /// prefix as the query; excludes `record` itself.
    pub async fn find_similar(&self, record: &MemoryRecord, limit: usize) -> Result<Vec<SearchResult>, String> {
        let prefix: String = record.content.chars().take(200).collect();
        let query = format!("{} {}", record.title, prefix);
        let results = self.search(&query, Some(limit + 1)).await?;
        Ok(results.into_iter().filter(|r| r.record.id != record.id).take(limit).collect())
    }

    pub async fn get_by_tags(&self, tags: &[String], limit: usize) -> Result<Vec<MemoryRecord>, String> {
        let mut records = self.store.by_tags(tags).await?;
        records.truncate(limit);
        Ok(records)
    }

    /// Records touched within the last `days`, most recently accessed first.
    pub async fn get_recent(
        &self,
        memory_type: Option<MemoryType>,
        days: i64,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, String> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut records = match memory_type {
            Some(t) => self.store.by_type(t).await?,
            None => self.store.all().await?,
        };
        records.retain(|r| r.created_at >= cutoff || r.accessed_at >= cutoff);
        records.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));
        records.truncate(limit);
        Ok(records)
    }

    pub async fn get_frequently_used(&self, memory_type: Option<MemoryType>, limit: usize) -> Result<Vec<MemoryRecord>, String> {
        let mut records = match memory_type {
            Some(t) => self.store.by_type(t).await?,
            None => self.store.all().await?,
        };
        records.sort_by(|a, b| b.access_count.cmp(&a.access_count));
        records.truncate(limit);
        Ok(records)
    }
}

fn calculate_relevance(query: &str, record: &MemoryRecord) -> f64 {
    let query_words: HashSet<String> = query.to_lowercase().split_whitespace().map(str::to_owned).collect();
    if query_words.is_empty() {
        return 0.5;
    }

    let title_words: HashSet<String> = record.title.to_lowercase().split_whitespace().map(str::to_owned).collect();
    let content_words: HashSet<String> = record.content.to_lowercase().split_whitespace().map(str::to_owned).collect();

    let title_score = query_words.intersection(&title_words).count() as f64 / query_words.len() as f64;
    let content_score = query_words.intersection(&content_words).count() as f64 / query_words.len() as f64;

    (title_score * 0.6 + content_score * 0.4).min(1.0)
}

fn calculate_recency(record: &MemoryRecord) -> f64 {
    let days_since = (Utc::now() - record.accessed_at).num_seconds() as f64 / 86_400.0;
    (1.0 - days_since / 30.0).max(0.0)
}

fn calculate_frequency(record: &MemoryRecord) -> f64 {
    (record.access_count as f64 / 100.0).min(1.0)
}

/// Placeholder for a future embedding-backed retrieval mode. No embedding
/// client is wired up; this always reports no matches rather than pretending
/// to search.
pub struct SemanticRetrieval;

impl SemanticRetrieval {
    pub fn new() -> Self {
        Self
    }

    // TODO: wire up an embedding client and vector index before enabling this.
    pub async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchResult>, String> {
        Ok(Vec::new())
    }
}

impl Default for SemanticRetrieval {
    fn default() -> Self {
        Self::new()
    }
}

//! Memory Manager core types (spec §4.E): the taxonomy of what gets
//! remembered, the record shape long-term storage keeps, and the shape of a
//! single conversational exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What kind of thing a [`MemoryRecord`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    ConversationTurn,
    SessionSummary,
    DeviceConfig,
    UserPreference,
    SolvedIncident,
    LearnedPattern,
    WorkflowTemplate,
    WorkflowExecution,
    EnvironmentState,
    CommandHistory,
    CustomNote,
    Bookmark,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::ConversationTurn => "conversation_turn",
            MemoryType::SessionSummary => "session_summary",
            MemoryType::DeviceConfig => "device_config",
            MemoryType::UserPreference => "user_preference",
            MemoryType::SolvedIncident => "solved_incident",
            MemoryType::LearnedPattern => "learned_pattern",
            MemoryType::WorkflowTemplate => "workflow_template",
            MemoryType::WorkflowExecution => "workflow_execution",
            MemoryType::EnvironmentState => "environment_state",
            MemoryType::CommandHistory => "command_history",
            MemoryType::CustomNote => "custom_note",
            MemoryType::Bookmark => "bookmark",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ancillary attributes carried alongside a record's content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub related_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom: Value,
}

fn default_confidence() -> f64 {
    1.0
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self {
            confidence: 1.0,
            custom: Value::Object(serde_json::Map::new()),
            ..Default::default()
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }
}

/// A single unit of long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: MemoryType,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<f64>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u32,
}

impl MemoryRecord {
    pub fn new(type_: MemoryType, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            type_,
            title: title.into(),
            content: content.into(),
            metadata: MemoryMetadata::new(),
            embeddings: None,
            created_at: now,
            updated_at: now,
            accessed_at: now,
            access_count: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record an access: bumps the access count and timestamp.
    pub fn touch(&mut self) {
        self.accessed_at = Utc::now();
        self.access_count += 1;
    }
}

/// One exchange in a conversation: what the user said and how the agent
/// responded, plus which tools were invoked along the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user_input: String,
    pub agent_response: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub metadata: Value,
}

fn default_true() -> bool {
    true
}

impl Turn {
    pub fn new(user_input: impl Into<String>, agent_response: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            agent_response: agent_response.into(),
            tools_used: Vec::new(),
            timestamp: Utc::now(),
            success: true,
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    /// Project this turn into a long-term [`MemoryRecord`] tagged with the
    /// session it came from.
    pub fn to_memory_record(&self, session_id: &str) -> MemoryRecord {
        let title: String = self.user_input.chars().take(100).collect();
        let content = format!("User: {}\n\nAssistant: {}", self.user_input, self.agent_response);

        let mut tags = vec![format!("session:{session_id}")];
        tags.extend(self.tools_used.iter().cloned());

        let metadata = MemoryMetadata {
            tags,
            confidence: 1.0,
            source: "conversation".to_owned(),
            custom: Value::Object(serde_json::Map::new()),
            ..Default::default()
        };

        MemoryRecord::new(MemoryType::ConversationTurn, title, content).with_metadata(metadata)
    }
}

/// A scored hit returned from a retrieval query.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub record: MemoryRecord,
    pub score: f64,
    pub match_type: String,
}

impl SearchResult {
    pub fn new(record: MemoryRecord, score: f64, match_type: impl Into<String>) -> Self {
        Self { record, score, match_type: match_type.into() }
    }
}

/// Sort a batch of results by descending score, as every retrieval API
/// promises.
pub fn sort_by_score_desc(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_to_memory_record_titles_and_tags() {
        let turn = Turn {
            tools_used: vec!["shell.run".into()],
            ..Turn::new("what is the weather", "it is sunny")
        };
        let record = turn.to_memory_record("sess-1");
        assert_eq!(record.type_, MemoryType::ConversationTurn);
        assert_eq!(record.title, "what is the weather");
        assert!(record.content.contains("User: what is the weather"));
        assert!(record.content.contains("Assistant: it is sunny"));
        assert!(record.metadata.tags.contains(&"session:sess-1".to_owned()));
        assert!(record.metadata.tags.contains(&"shell.run".to_owned()));
    }

    #[test]
    fn long_user_input_is_truncated_to_title() {
        let long = "x".repeat(250);
        let turn = Turn::new(long.clone(), "ok");
        let record = turn.to_memory_record("s");
        assert_eq!(record.title.len(), 100);
    }

    #[test]
    fn sort_by_score_desc_orders_descending() {
        let mut results = vec![
            SearchResult::new(MemoryRecord::new(MemoryType::CustomNote, "a", "a"), 0.2, "keyword"),
            SearchResult::new(MemoryRecord::new(MemoryType::CustomNote, "b", "b"), 0.9, "keyword"),
            SearchResult::new(MemoryRecord::new(MemoryType::CustomNote, "c", "c"), 0.5, "keyword"),
        ];
        sort_by_score_desc(&mut results);
        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
    }

    #[test]
    fn metadata_expiry() {
        let mut metadata = MemoryMetadata::new();
        assert!(!metadata.is_expired());
        metadata.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(metadata.is_expired());
    }
}

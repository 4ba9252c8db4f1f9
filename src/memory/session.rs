//! Conversation session tracking (spec §4.E): a bounded ring of recent
//! [`Turn`]s with automatic extractive summarization once a session runs
//! long, and an LRU cache of sessions for multi-conversation deployments.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use super::schemas::{MemoryRecord, Turn};

/// Tunables for a single session's retention and summarization behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_turns: usize,
    pub max_tokens_estimate: usize,
    pub summarize_after: usize,
    pub session_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            max_tokens_estimate: 4000,
            summarize_after: 20,
            session_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Bounded, auto-summarizing conversation history for one session.
pub struct SessionStore {
    config: SessionConfig,
    turns: VecDeque<Turn>,
    summaries: Vec<String>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self { config, turns: VecDeque::new(), summaries: Vec::new() }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Append a turn, evicting the oldest if over capacity and summarizing
    /// once the configured threshold is crossed.
    pub fn append_turn(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.config.max_turns {
            self.turns.pop_front();
        }
        if self.turns.len() >= self.config.summarize_after {
            self.maybe_summarize();
        }
    }

    fn maybe_summarize(&mut self) {
        if self.turns.len() < 5 {
            return;
        }
        let split = self.turns.len() / 2;
        let older: Vec<Turn> = self.turns.drain(..split).collect();
        self.summaries.push(summarize_turns(&older));
    }

    pub fn get_recent(&self, n: usize) -> Vec<&Turn> {
        let len = self.turns.len();
        let start = len.saturating_sub(n);
        self.turns.iter().skip(start).collect()
    }

    pub fn get_all(&self) -> Vec<&Turn> {
        self.turns.iter().collect()
    }

    /// Build a prompt-ready context window: summaries first, then as many
    /// recent turns as fit under `max_tokens` (estimated at 4 chars/token),
    /// re-anchored so it never starts mid-turn.
    pub fn get_context_window(&self, max_tokens: usize) -> String {
        let budget_chars = max_tokens * 4;
        let mut parts: Vec<String> = Vec::new();

        for summary in &self.summaries {
            parts.push(format!("[Earlier summary] {summary}"));
        }
        for turn in &self.turns {
            parts.push(format!("User: {}\nAssistant: {}", turn.user_input, turn.agent_response));
        }

        let mut joined = parts.join("\n\n");
        if joined.len() > budget_chars {
            let cut_at = joined.len() - budget_chars;
            joined = joined[cut_at..].to_owned();
            if let Some(anchor) = joined.find("User:") {
                joined = joined[anchor..].to_owned();
            }
        }
        joined
    }

    /// Case-insensitive substring search across stored turns.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&Turn> {
        let needle = query.to_lowercase();
        self.turns
            .iter()
            .filter(|t| {
                t.user_input.to_lowercase().contains(&needle) || t.agent_response.to_lowercase().contains(&needle)
            })
            .take(limit)
            .collect()
    }

    /// Extractive summary of the whole session: topics touched, tools used,
    /// and a pass/fail tally.
    pub fn summarize(&self) -> String {
        summarize_turns(self.turns.iter().cloned().collect::<Vec<_>>().as_slice())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.summaries.clear();
    }

    pub fn to_memory_records(&self) -> Vec<MemoryRecord> {
        self.turns.iter().map(|t| t.to_memory_record(&self.config.session_id)).collect()
    }
}

/// First-sentence extractive summary of a batch of turns, noting tool usage
/// and the count of failed exchanges.
fn summarize_turns(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "No exchanges.".to_owned();
    }

    let mut tools: Vec<String> = Vec::new();
    let mut failures = 0usize;
    let mut topics: Vec<String> = Vec::new();

    for turn in turns {
        for tool in &turn.tools_used {
            if !tools.contains(tool) {
                tools.push(tool.clone());
            }
        }
        if !turn.success {
            failures += 1;
        }
        let first_sentence = turn.user_input.split(['.', '?', '!']).next().unwrap_or(&turn.user_input).trim();
        if !first_sentence.is_empty() {
            topics.push(first_sentence.to_owned());
        }
    }

    let mut summary = format!("{} exchanges covering: {}.", turns.len(), topics.join("; "));
    if !tools.is_empty() {
        summary.push_str(&format!(" Tools used: {}.", tools.join(", ")));
    }
    if failures > 0 {
        summary.push_str(&format!(" {failures} exchange(s) failed."));
    }
    summary
}

/// An LRU-evicted collection of [`SessionStore`]s, for agents juggling
/// several concurrent conversations.
pub struct MultiSessionStore {
    max_sessions: usize,
    sessions: HashMap<String, SessionStore>,
    access_order: Vec<String>,
}

impl MultiSessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self { max_sessions, sessions: HashMap::new(), access_order: Vec::new() }
    }

    pub fn get_or_create(&mut self, session_id: &str) -> &mut SessionStore {
        if !self.sessions.contains_key(session_id) {
            self.evict_if_needed();
            let config = SessionConfig { session_id: session_id.to_owned(), ..Default::default() };
            self.sessions.insert(session_id.to_owned(), SessionStore::new(config));
        }
        self.touch(session_id);
        self.sessions.get_mut(session_id).expect("just inserted")
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionStore> {
        self.sessions.get(session_id)
    }

    pub fn remove(&mut self, session_id: &str) -> bool {
        self.access_order.retain(|id| id != session_id);
        self.sessions.remove(session_id).is_some()
    }

    fn touch(&mut self, session_id: &str) {
        self.access_order.retain(|id| id != session_id);
        self.access_order.push(session_id.to_owned());
    }

    fn evict_if_needed(&mut self) {
        while self.sessions.len() >= self.max_sessions && !self.access_order.is_empty() {
            let lru = self.access_order.remove(0);
            self.sessions.remove(&lru);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> Turn {
        Turn::new(format!("question {i}"), format!("answer {i}"))
    }

    #[test]
    fn append_turn_respects_max_turns() {
        let mut store = SessionStore::new(SessionConfig { max_turns: 3, summarize_after: 1000, ..Default::default() });
        for i in 0..5 {
            store.append_turn(turn(i));
        }
        assert_eq!(store.turn_count(), 3);
        assert_eq!(store.get_recent(1)[0].user_input, "question 4");
    }

    #[test]
    fn summarize_after_threshold_compacts_older_half() {
        let mut store = SessionStore::new(SessionConfig { max_turns: 100, summarize_after: 6, ..Default::default() });
        for i in 0..6 {
            store.append_turn(turn(i));
        }
        assert!(store.turn_count() < 6, "older half should have been summarized away");
        assert!(!store.summaries.is_empty());
    }

    #[test]
    fn get_context_window_includes_summaries_and_turns() {
        let mut store = SessionStore::new(SessionConfig::default());
        store.append_turn(turn(0));
        let window = store.get_context_window(1000);
        assert!(window.contains("User: question 0"));
    }

    #[test]
    fn search_is_case_insensitive() {
        let mut store = SessionStore::new(SessionConfig::default());
        store.append_turn(Turn::new("Deploy to PRODUCTION", "done"));
        let hits = store.search("production", 10);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn multi_session_store_evicts_lru() {
        let mut multi = MultiSessionStore::new(2);
        multi.get_or_create("a");
        multi.get_or_create("b");
        multi.get_or_create("c");
        assert!(multi.get("a").is_none(), "a should have been evicted");
        assert!(multi.get("b").is_some());
        assert!(multi.get("c").is_some());
    }

    #[test]
    fn multi_session_store_touch_protects_recently_used() {
        let mut multi = MultiSessionStore::new(2);
        multi.get_or_create("a");
        multi.get_or_create("b");
        multi.get_or_create("a");
        multi.get_or_create("c");
        assert!(multi.get("b").is_none(), "b should have been evicted, not a");
        assert!(multi.get("a").is_some());
    }
}

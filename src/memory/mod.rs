//! Memory Manager (spec §4.E): bounded conversation history with automatic
//! summarization, long-term storage (in-process or SQLite+FTS5), and
//! relevance/recency/frequency-weighted retrieval, unified behind
//! [`manager::MemoryManager`].

pub mod manager;
pub mod retrieval;
pub mod schemas;
pub mod session;
pub mod sqlite_store;
pub mod store;

pub use manager::MemoryManager;
pub use retrieval::{MemoryRetrieval, RetrievalConfig, SemanticRetrieval};
pub use schemas::{MemoryMetadata, MemoryRecord, MemoryType, SearchResult, Turn};
pub use session::{MultiSessionStore, SessionConfig, SessionStore};
pub use sqlite_store::SqliteMemoryStore;
pub use store::{InMemoryStore, MemoryStore};

//! Store-client boundary for the Engram memory layer.
//!
//! Defines the record and scope types, the raw [`StoreError`] fault surface,
//! and the async client traits for the vector, graph, and history backends,
//! plus in-memory and file-backed reference implementations used by tests
//! and single-process deployments.

pub mod history;
pub mod memory;
pub mod types;

pub use history::{
    new_event_id, FileHistoryStore, HistoryEventKind, HistoryRecord, HistoryStore,
    InMemoryHistoryStore, HISTORY_RECORD_SCHEMA_VERSION,
};
pub use memory::{InMemoryGraphStore, InMemoryVectorStore};
pub use types::{
    GraphRelationRecord, GraphStoreClient, MemoryRecord, MemoryScope, RecordSet, RelationTriple,
    ScopeFilter, ScoredMemoryRecord, SearchHits, StoreError, VectorStoreClient,
    MEMORY_RECORD_SCHEMA_VERSION,
};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema version stamped on every persisted memory record.
pub const MEMORY_RECORD_SCHEMA_VERSION: u32 = 1;

/// Public struct `MemoryScope` used across Engram components.
///
/// Identifies the owner of a memory along up to three dimensions. A record is
/// writable only when at least one dimension carries a non-blank value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryScope {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl MemoryScope {
    /// Returns true when at least one dimension is present and non-blank.
    pub fn has_any_dimension(&self) -> bool {
        [&self.user_id, &self.agent_id, &self.run_id]
            .into_iter()
            .any(|value| {
                value
                    .as_deref()
                    .map(str::trim)
                    .filter(|trimmed| !trimmed.is_empty())
                    .is_some()
            })
    }
}

/// Public struct `ScopeFilter` used across Engram components.
///
/// Blank or absent dimensions act as wildcards. Doubles as the preserve
/// predicate during resets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeFilter {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl ScopeFilter {
    /// Returns true when `scope` satisfies every specified dimension.
    pub fn matches_scope(&self, scope: &MemoryScope) -> bool {
        let matches_user = Self::dimension_matches(&self.user_id, &scope.user_id);
        if !matches_user {
            return false;
        }

        let matches_agent = Self::dimension_matches(&self.agent_id, &scope.agent_id);
        if !matches_agent {
            return false;
        }

        Self::dimension_matches(&self.run_id, &scope.run_id)
    }

    /// Returns true when every dimension is a wildcard.
    pub fn is_unscoped(&self) -> bool {
        [&self.user_id, &self.agent_id, &self.run_id]
            .into_iter()
            .all(|value| {
                value
                    .as_deref()
                    .map(str::trim)
                    .filter(|trimmed| !trimmed.is_empty())
                    .is_none()
            })
    }

    fn dimension_matches(filter_value: &Option<String>, scope_value: &Option<String>) -> bool {
        filter_value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|wanted| {
                scope_value
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(|actual| actual == wanted)
                    .unwrap_or(false)
            })
            .unwrap_or(true)
    }
}

/// Public struct `RelationTriple` used across Engram components.
///
/// Relationship payload extracted upstream; the graph backend indexes it
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct RelationTriple {
    pub source: String,
    pub relation: String,
    pub target: String,
}

impl RelationTriple {
    fn has_blank_part(&self) -> bool {
        [&self.source, &self.relation, &self.target]
            .into_iter()
            .any(|part| part.trim().is_empty())
    }
}

/// Public struct `MemoryRecord` used across Engram components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub schema_version: u32,
    pub memory_id: String,
    pub content: String,
    pub scope: MemoryScope,
    #[serde(default)]
    pub relations: Vec<RelationTriple>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
}

impl MemoryRecord {
    /// Checks the invariants every write must satisfy.
    ///
    /// Returns the first violation as a [`StoreError::Validation`].
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.memory_id.trim().is_empty() {
            return Err(StoreError::Validation(
                "memory_id must not be empty".to_string(),
            ));
        }
        if self.content.trim().is_empty() {
            return Err(StoreError::Validation(format!(
                "content must not be empty for memory {}",
                self.memory_id
            )));
        }
        if !self.scope.has_any_dimension() {
            return Err(StoreError::Validation(format!(
                "scope must carry at least one of user_id, agent_id, run_id for memory {}",
                self.memory_id
            )));
        }
        if let Some(triple) = self
            .relations
            .iter()
            .find(|triple| triple.has_blank_part())
        {
            return Err(StoreError::Validation(format!(
                "relation ({:?}, {:?}, {:?}) on memory {} has a blank part",
                triple.source, triple.relation, triple.target, self.memory_id
            )));
        }
        Ok(())
    }
}

/// Public struct `ScoredMemoryRecord` used across Engram components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredMemoryRecord {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Public struct `GraphRelationRecord` used across Engram components.
///
/// Read view of one indexed relation, tagged with the memory that produced
/// it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphRelationRecord {
    pub memory_id: String,
    pub triple: RelationTriple,
    pub scope: MemoryScope,
}

/// Public struct `RecordSet` used across Engram components.
///
/// `relations` stays empty when the graph backend is degraded or disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordSet {
    #[serde(default)]
    pub records: Vec<MemoryRecord>,
    #[serde(default)]
    pub relations: Vec<GraphRelationRecord>,
}

/// Public struct `SearchHits` used across Engram components.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchHits {
    #[serde(default)]
    pub hits: Vec<ScoredMemoryRecord>,
    #[serde(default)]
    pub relations: Vec<GraphRelationRecord>,
}

#[derive(Debug, Error)]
/// Enumerates supported `StoreError` values.
///
/// The raw fault type every backend client returns; nothing else crosses the
/// store boundary.
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("operation timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store error: {0}")]
    Other(String),
}

#[async_trait]
/// Trait contract for `VectorStoreClient` behavior.
pub trait VectorStoreClient: Send + Sync {
    /// Inserts or replaces the record keyed by its `memory_id`.
    async fn upsert(&self, record: &MemoryRecord) -> Result<(), StoreError>;

    /// Returns records whose scope matches `filter`, newest first.
    async fn fetch_all(&self, filter: &ScopeFilter) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Returns up to `limit` scored records for `query` within `filter`.
    async fn search(
        &self,
        query: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<ScoredMemoryRecord>, StoreError>;

    /// Deletes the given ids, returning how many records were removed.
    async fn delete(&self, memory_ids: &[String]) -> Result<usize, StoreError>;
}

#[async_trait]
/// Trait contract for `GraphStoreClient` behavior.
pub trait GraphStoreClient: Send + Sync {
    /// Replaces the indexed relations for the record's `memory_id`.
    async fn upsert_relations(&self, record: &MemoryRecord) -> Result<(), StoreError>;

    /// Returns relations whose owning scope matches `filter`.
    async fn fetch_relations(
        &self,
        filter: &ScopeFilter,
    ) -> Result<Vec<GraphRelationRecord>, StoreError>;

    /// Returns relations attached to any of the given memory ids.
    async fn fetch_relations_for(
        &self,
        memory_ids: &[String],
    ) -> Result<Vec<GraphRelationRecord>, StoreError>;

    /// Removes the memories' relations and any nodes left unreferenced,
    /// returning how many relation entries were removed.
    async fn delete_memories(&self, memory_ids: &[String]) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> MemoryRecord {
        MemoryRecord {
            schema_version: MEMORY_RECORD_SCHEMA_VERSION,
            memory_id: "mem-1".to_string(),
            content: "prefers explicit error types".to_string(),
            scope: MemoryScope {
                user_id: Some("u1".to_string()),
                agent_id: None,
                run_id: None,
            },
            relations: vec![RelationTriple {
                source: "user".to_string(),
                relation: "prefers".to_string(),
                target: "explicit error types".to_string(),
            }],
            metadata: BTreeMap::new(),
            created_unix_ms: 1_700_000_000_000,
            updated_unix_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn unit_scope_filter_blank_dimensions_are_wildcards() {
        let scope = MemoryScope {
            user_id: Some("u1".to_string()),
            agent_id: Some("a1".to_string()),
            run_id: None,
        };

        assert!(ScopeFilter::default().matches_scope(&scope));
        assert!(ScopeFilter {
            user_id: Some("  ".to_string()),
            agent_id: Some(String::new()),
            run_id: None,
        }
        .matches_scope(&scope));
        assert!(ScopeFilter {
            user_id: Some(" u1 ".to_string()),
            agent_id: None,
            run_id: None,
        }
        .matches_scope(&scope));
    }

    #[test]
    fn unit_scope_filter_rejects_mismatched_and_absent_dimensions() {
        let scope = MemoryScope {
            user_id: Some("u1".to_string()),
            agent_id: None,
            run_id: None,
        };

        assert!(!ScopeFilter {
            user_id: Some("u2".to_string()),
            agent_id: None,
            run_id: None,
        }
        .matches_scope(&scope));
        assert!(!ScopeFilter {
            user_id: None,
            agent_id: Some("a1".to_string()),
            run_id: None,
        }
        .matches_scope(&scope));
    }

    #[test]
    fn unit_scope_filter_reports_unscoped() {
        assert!(ScopeFilter::default().is_unscoped());
        assert!(ScopeFilter {
            user_id: Some("  ".to_string()),
            agent_id: None,
            run_id: None,
        }
        .is_unscoped());
        assert!(!ScopeFilter {
            user_id: Some("u1".to_string()),
            agent_id: None,
            run_id: None,
        }
        .is_unscoped());
    }

    #[test]
    fn unit_record_validation_requires_id_content_and_scope() {
        assert!(sample_record().validate().is_ok());

        let mut blank_id = sample_record();
        blank_id.memory_id = "  ".to_string();
        let error = blank_id.validate().expect_err("blank id rejected");
        assert!(matches!(error, StoreError::Validation(_)));

        let mut blank_content = sample_record();
        blank_content.content = String::new();
        assert!(blank_content.validate().is_err());

        let mut unscoped = sample_record();
        unscoped.scope = MemoryScope::default();
        let error = unscoped.validate().expect_err("unscoped rejected");
        assert!(error.to_string().contains("at least one of"));
    }

    #[test]
    fn unit_record_validation_rejects_blank_relation_parts() {
        let mut record = sample_record();
        record.relations.push(RelationTriple {
            source: "user".to_string(),
            relation: " ".to_string(),
            target: "x".to_string(),
        });
        let error = record.validate().expect_err("blank relation part rejected");
        assert!(error.to_string().contains("blank part"));
    }

    #[test]
    fn functional_memory_record_serde_defaults_supplementary_fields() {
        let raw = serde_json::json!({
            "schema_version": 1,
            "memory_id": "mem-9",
            "content": "likes terse commit messages",
            "scope": { "user_id": "u1" },
            "created_unix_ms": 1,
            "updated_unix_ms": 2,
        });
        let record: MemoryRecord =
            serde_json::from_value(raw).expect("record without supplementary fields parses");
        assert!(record.relations.is_empty());
        assert!(record.metadata.is_empty());
        assert_eq!(record.scope.user_id.as_deref(), Some("u1"));

        let encoded = serde_json::to_string(&record).expect("record encodes");
        let decoded: MemoryRecord = serde_json::from_str(&encoded).expect("record decodes");
        assert_eq!(decoded, record);
    }

    #[test]
    fn unit_store_error_display_carries_operation_facts() {
        let timeout = StoreError::Timeout { elapsed_ms: 1_500 };
        assert_eq!(timeout.to_string(), "operation timed out after 1500 ms");

        let unavailable = StoreError::Unavailable("vector backend offline".to_string());
        assert!(unavailable.to_string().contains("vector backend offline"));
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use engram_core::lock_or_recover_mutex;

use crate::types::{
    GraphRelationRecord, GraphStoreClient, MemoryRecord, ScopeFilter, ScoredMemoryRecord,
    StoreError, VectorStoreClient,
};

const SEARCH_EMBED_DIMENSIONS: usize = 128;

/// Public struct `InMemoryVectorStore` used across Engram components.
///
/// Reference similarity backend. Scoring uses deterministic hash embeddings
/// so tests never depend on an embedding provider.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: Mutex<BTreeMap<String, MemoryRecord>>,
}

impl InMemoryVectorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStoreClient for InMemoryVectorStore {
    async fn upsert(&self, record: &MemoryRecord) -> Result<(), StoreError> {
        let mut records = lock_or_recover_mutex(&self.records);
        records.insert(record.memory_id.clone(), record.clone());
        Ok(())
    }

    async fn fetch_all(&self, filter: &ScopeFilter) -> Result<Vec<MemoryRecord>, StoreError> {
        let records = lock_or_recover_mutex(&self.records);
        let mut matched = records
            .values()
            .filter(|record| filter.matches_scope(&record.scope))
            .cloned()
            .collect::<Vec<_>>();
        matched.sort_by(|left, right| {
            right
                .updated_unix_ms
                .cmp(&left.updated_unix_ms)
                .then_with(|| left.memory_id.cmp(&right.memory_id))
        });
        Ok(matched)
    }

    async fn search(
        &self,
        query: &str,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<ScoredMemoryRecord>, StoreError> {
        let normalized_query = query.trim();
        if normalized_query.is_empty() {
            return Err(StoreError::Validation(
                "search query must not be empty".to_string(),
            ));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = embed_text_vector(normalized_query, SEARCH_EMBED_DIMENSIONS);
        if query_embedding.iter().all(|component| *component == 0.0) {
            return Ok(Vec::new());
        }

        let records = lock_or_recover_mutex(&self.records);
        let mut hits = records
            .values()
            .filter(|record| filter.matches_scope(&record.scope))
            .filter_map(|record| {
                let record_embedding =
                    embed_text_vector(record.content.as_str(), SEARCH_EMBED_DIMENSIONS);
                let score = cosine_similarity(&query_embedding, &record_embedding);
                if score > 0.0 {
                    Some(ScoredMemoryRecord {
                        record: record.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.record.memory_id.cmp(&right.record.memory_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, memory_ids: &[String]) -> Result<usize, StoreError> {
        let mut records = lock_or_recover_mutex(&self.records);
        let mut removed = 0usize;
        for memory_id in memory_ids {
            if records.remove(memory_id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[derive(Debug, Default)]
struct GraphState {
    relations: Vec<GraphRelationRecord>,
    node_refs: BTreeMap<String, usize>,
}

impl GraphState {
    fn insert_relation(&mut self, relation: GraphRelationRecord) {
        *self
            .node_refs
            .entry(relation.triple.source.clone())
            .or_default() += 1;
        *self
            .node_refs
            .entry(relation.triple.target.clone())
            .or_default() += 1;
        self.relations.push(relation);
    }

    fn remove_relations_for(&mut self, memory_ids: &BTreeSet<&str>) -> usize {
        let (removed, retained): (Vec<_>, Vec<_>) = std::mem::take(&mut self.relations)
            .into_iter()
            .partition(|relation| memory_ids.contains(relation.memory_id.as_str()));
        self.relations = retained;
        for relation in &removed {
            self.release_node(relation.triple.source.as_str());
            self.release_node(relation.triple.target.as_str());
        }
        removed.len()
    }

    fn release_node(&mut self, name: &str) {
        if let Some(count) = self.node_refs.get_mut(name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.node_refs.remove(name);
            }
        }
    }
}

/// Public struct `InMemoryGraphStore` used across Engram components.
///
/// Reference relationship backend. Tracks node reference counts so deleting
/// a memory also drops nodes no remaining relation touches.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: Mutex<GraphState>,
}

impl InMemoryGraphStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the currently referenced node names, sorted.
    pub fn node_names(&self) -> Vec<String> {
        let state = lock_or_recover_mutex(&self.state);
        state.node_refs.keys().cloned().collect()
    }
}

#[async_trait]
impl GraphStoreClient for InMemoryGraphStore {
    async fn upsert_relations(&self, record: &MemoryRecord) -> Result<(), StoreError> {
        let mut state = lock_or_recover_mutex(&self.state);
        let ids = BTreeSet::from([record.memory_id.as_str()]);
        state.remove_relations_for(&ids);

        let unique_triples = record.relations.iter().cloned().collect::<BTreeSet<_>>();
        for triple in unique_triples {
            state.insert_relation(GraphRelationRecord {
                memory_id: record.memory_id.clone(),
                triple,
                scope: record.scope.clone(),
            });
        }
        Ok(())
    }

    async fn fetch_relations(
        &self,
        filter: &ScopeFilter,
    ) -> Result<Vec<GraphRelationRecord>, StoreError> {
        let state = lock_or_recover_mutex(&self.state);
        let mut matched = state
            .relations
            .iter()
            .filter(|relation| filter.matches_scope(&relation.scope))
            .cloned()
            .collect::<Vec<_>>();
        sort_relations(&mut matched);
        Ok(matched)
    }

    async fn fetch_relations_for(
        &self,
        memory_ids: &[String],
    ) -> Result<Vec<GraphRelationRecord>, StoreError> {
        let wanted = memory_ids
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>();
        let state = lock_or_recover_mutex(&self.state);
        let mut matched = state
            .relations
            .iter()
            .filter(|relation| wanted.contains(relation.memory_id.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        sort_relations(&mut matched);
        Ok(matched)
    }

    async fn delete_memories(&self, memory_ids: &[String]) -> Result<usize, StoreError> {
        let wanted = memory_ids
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>();
        let mut state = lock_or_recover_mutex(&self.state);
        Ok(state.remove_relations_for(&wanted))
    }
}

fn sort_relations(relations: &mut [GraphRelationRecord]) {
    relations.sort_by(|left, right| {
        left.memory_id
            .cmp(&right.memory_id)
            .then_with(|| left.triple.cmp(&right.triple))
    });
}

/// Converts text to a normalized fixed-size vector using FNV-1a token hashing.
fn embed_text_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let dimensions = dimensions.max(1);
    let mut vector = vec![0.0f32; dimensions];
    for token in tokenize_text(text) {
        let hash = fnv1a_hash(token.as_bytes());
        let index = (hash as usize) % dimensions;
        let sign = if (hash & 1) == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }

    let magnitude = vector
        .iter()
        .map(|component| component * component)
        .sum::<f32>()
        .sqrt();
    if magnitude > 0.0 {
        for component in &mut vector {
            *component /= magnitude;
        }
    }
    vector
}

fn tokenize_text(text: &str) -> Vec<String> {
    text.split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .collect::<Vec<_>>()
}

/// Computes cosine similarity for equal-length normalized vectors.
fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 0.0;
    }
    left.iter()
        .zip(right)
        .map(|(left, right)| left * right)
        .sum()
}

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

//! Dual-backend orchestration for memory writes and reads.
//!
//! Every operation issues one backend leg at a time through the error
//! handler and folds the per-leg envelopes into a single caller-facing
//! [`OperationResult`]. The vector store is the critical path: a memory
//! that never reached it does not exist, while a memory without graph
//! edges is a usable, relationship-incomplete degradation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use engram_backend::{
    GraphRelationRecord, GraphStoreClient, HistoryEventKind, HistoryRecord, HistoryStore,
    MemoryRecord, RecordSet, ScopeFilter, SearchHits, StoreError, VectorStoreClient, new_event_id,
    HISTORY_RECORD_SCHEMA_VERSION,
};
use engram_core::{current_unix_timestamp_ms, CancelSignal};
use engram_resilience::{classify_store_error, ErrorHandler, OperationResult};
use serde::{Deserialize, Serialize};

use crate::{
    OP_GRAPH_READ, OP_GRAPH_WRITE, OP_HISTORY_APPEND, OP_VECTOR_READ, OP_VECTOR_SEARCH,
    OP_VECTOR_WRITE,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `CoordinatorConfig` used across Engram components.
pub struct CoordinatorConfig {
    /// Skips the graph leg of every operation when set, so results can only
    /// be SUCCESS or FAILURE.
    #[serde(default)]
    pub single_store_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `AddOutcome` used across Engram components.
///
/// Reports which persistence legs of one `add` call completed.
pub struct AddOutcome {
    pub memory_id: String,
    pub vector_written: bool,
    pub graph_written: bool,
    pub history_recorded: bool,
}

/// Progress of one dual-backend add as its legs run in order.
#[derive(Debug)]
enum AddProgress {
    /// The vector leg failed; nothing was persisted anywhere.
    VectorFailed(OperationResult<()>),
    /// The vector leg succeeded and the graph leg was skipped.
    VectorOnly(OperationResult<()>),
    /// Both legs ran.
    GraphAttempted(OperationResult<()>, OperationResult<()>),
}

/// Maps the per-leg envelopes of an add onto the caller-facing result.
///
/// The graph leg degrades to PARTIAL_SUCCESS without rolling the vector
/// write back: deleting a just-written record risks losing data the caller
/// believes was saved, while a record without edges stays queryable. Error
/// details keep leg order, vector first.
fn resolve_add_outcome(
    memory_id: &str,
    progress: AddProgress,
    history_recorded: bool,
) -> OperationResult<AddOutcome> {
    match progress {
        AddProgress::VectorFailed(vector) => OperationResult::failure("add", vector.errors),
        AddProgress::VectorOnly(vector) => {
            let outcome = AddOutcome {
                memory_id: memory_id.to_string(),
                vector_written: true,
                graph_written: false,
                history_recorded,
            };
            let mut result = OperationResult::success("add", outcome);
            result.errors = vector.errors;
            result
        }
        AddProgress::GraphAttempted(vector, graph) => {
            let graph_failed = graph.is_failure();
            let mut errors = vector.errors;
            errors.extend(graph.errors);
            let outcome = AddOutcome {
                memory_id: memory_id.to_string(),
                vector_written: true,
                graph_written: !graph_failed,
                history_recorded,
            };
            if graph_failed {
                let warning = format!(
                    "graph_write failed for memory {memory_id}; record kept in vector store only"
                );
                OperationResult::partial_success("add", outcome, errors, vec![warning])
            } else {
                let mut result = OperationResult::success("add", outcome);
                result.errors = errors;
                result
            }
        }
    }
}

/// Folds the authoritative vector leg and the enriching graph leg of a read
/// into one envelope. When both legs fail the vector detail comes first.
fn combine_read_results<V, D>(
    operation_name: &str,
    vector: OperationResult<V>,
    graph: Option<OperationResult<Vec<GraphRelationRecord>>>,
    build: impl FnOnce(V, Vec<GraphRelationRecord>) -> D,
) -> OperationResult<D>
where
    V: Default,
{
    let vector_failed = vector.is_failure();
    let vector_data = vector.data;
    let mut errors = vector.errors;

    let (graph_failed, graph_data) = match graph {
        Some(graph) => {
            let failed = graph.is_failure();
            errors.extend(graph.errors);
            (failed, graph.data)
        }
        None => (false, None),
    };

    if vector_failed {
        return OperationResult::failure(operation_name, errors);
    }

    let data = build(vector_data.unwrap_or_default(), graph_data.unwrap_or_default());
    if graph_failed {
        let warning = format!("{operation_name} degraded: graph read failed, relations omitted");
        OperationResult::partial_success(operation_name, data, errors, vec![warning])
    } else {
        let mut result = OperationResult::success(operation_name, data);
        result.errors = errors;
        result
    }
}

fn scope_filter_context(filter: &ScopeFilter) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    if let Some(user_id) = &filter.user_id {
        context.insert("user_id".to_string(), user_id.clone());
    }
    if let Some(agent_id) = &filter.agent_id {
        context.insert("agent_id".to_string(), agent_id.clone());
    }
    if let Some(run_id) = &filter.run_id {
        context.insert("run_id".to_string(), run_id.clone());
    }
    context
}

/// Public struct `DualStoreCoordinator` used across Engram components.
///
/// Owns the backend clients and runs every multi-backend operation through
/// the shared [`ErrorHandler`], one leg at a time, in vector-then-graph
/// order.
pub struct DualStoreCoordinator {
    vector: Arc<dyn VectorStoreClient>,
    graph: Option<Arc<dyn GraphStoreClient>>,
    history: Option<Arc<dyn HistoryStore>>,
    handler: Arc<ErrorHandler>,
    config: CoordinatorConfig,
}

impl DualStoreCoordinator {
    pub fn new(
        vector: Arc<dyn VectorStoreClient>,
        graph: Option<Arc<dyn GraphStoreClient>>,
        history: Option<Arc<dyn HistoryStore>>,
        handler: Arc<ErrorHandler>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            vector,
            graph,
            history,
            handler,
            config,
        }
    }

    /// Returns the shared error handler, e.g. for breaker inspection.
    pub fn handler(&self) -> &Arc<ErrorHandler> {
        &self.handler
    }

    fn graph_client(&self) -> Option<&Arc<dyn GraphStoreClient>> {
        if self.config.single_store_mode {
            None
        } else {
            self.graph.as_ref()
        }
    }

    /// Persists `record` to the vector store, then to the graph store.
    ///
    /// Validation rejects before any backend sees the record. A vector
    /// failure returns FAILURE with the graph untouched; a graph failure
    /// returns PARTIAL_SUCCESS with the vector entry retained. The history
    /// append is best-effort and can only add a warning.
    pub async fn add(
        &self,
        record: &MemoryRecord,
        cancel: &CancelSignal,
    ) -> OperationResult<AddOutcome> {
        let started = Instant::now();
        let mut context = BTreeMap::new();
        context.insert("memory_id".to_string(), record.memory_id.clone());

        if let Err(error) = record.validate() {
            tracing::debug!(
                memory_id = %record.memory_id,
                error = %error,
                "add rejected by validation"
            );
            let detail =
                classify_store_error(&error, "add", &context, 0, current_unix_timestamp_ms());
            return OperationResult::failure("add", vec![detail])
                .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        }

        let vector_result = {
            let client = Arc::clone(&self.vector);
            let record = record.clone();
            self.handler
                .execute(OP_VECTOR_WRITE, &context, cancel, move || {
                    let client = Arc::clone(&client);
                    let record = record.clone();
                    async move { client.upsert(&record).await }
                })
                .await
        };
        if vector_result.is_failure() {
            return resolve_add_outcome(
                &record.memory_id,
                AddProgress::VectorFailed(vector_result),
                false,
            )
            .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        }

        let graph_result = match self.graph_client() {
            Some(client) => {
                let client = Arc::clone(client);
                let graph_record = record.clone();
                let result = self
                    .handler
                    .execute(OP_GRAPH_WRITE, &context, cancel, move || {
                        let client = Arc::clone(&client);
                        let record = graph_record.clone();
                        async move { client.upsert_relations(&record).await }
                    })
                    .await;
                if result.is_failure() {
                    tracing::warn!(
                        memory_id = %record.memory_id,
                        "graph write failed, keeping vector copy"
                    );
                }
                Some(result)
            }
            None => None,
        };

        let (history_recorded, history_warning) = self
            .append_add_history(record, graph_result.as_ref(), cancel)
            .await;

        let progress = match graph_result {
            Some(graph) => AddProgress::GraphAttempted(vector_result, graph),
            None => AddProgress::VectorOnly(vector_result),
        };
        let mut result = resolve_add_outcome(&record.memory_id, progress, history_recorded)
            .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        if let Some(warning) = history_warning {
            result = result.with_warning(warning);
        }
        result
    }

    /// Returns all records matching `filter` with their graph relations.
    ///
    /// Both legs run even when the first fails, so a double outage reports
    /// both details. The vector read is authoritative: its failure makes the
    /// whole read FAILURE, while a graph failure degrades the result to
    /// PARTIAL_SUCCESS with empty relations.
    pub async fn get_all(
        &self,
        filter: &ScopeFilter,
        cancel: &CancelSignal,
    ) -> OperationResult<RecordSet> {
        let started = Instant::now();
        let context = scope_filter_context(filter);

        let vector_result = {
            let client = Arc::clone(&self.vector);
            let filter = filter.clone();
            self.handler
                .execute(OP_VECTOR_READ, &context, cancel, move || {
                    let client = Arc::clone(&client);
                    let filter = filter.clone();
                    async move { client.fetch_all(&filter).await }
                })
                .await
        };

        let graph_result = match self.graph_client() {
            Some(client) => {
                let client = Arc::clone(client);
                let filter = filter.clone();
                Some(
                    self.handler
                        .execute(OP_GRAPH_READ, &context, cancel, move || {
                            let client = Arc::clone(&client);
                            let filter = filter.clone();
                            async move { client.fetch_relations(&filter).await }
                        })
                        .await,
                )
            }
            None => None,
        };

        combine_read_results("get_all", vector_result, graph_result, |records, relations| {
            RecordSet { records, relations }
        })
        .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    /// Returns up to `limit` scored hits for `query` plus the relations
    /// attached to those hits.
    ///
    /// Scoring itself is the vector backend's concern. The graph leg only
    /// runs when the vector search produced hits; its failure degrades the
    /// result to PARTIAL_SUCCESS exactly as in [`Self::get_all`].
    pub async fn search(
        &self,
        query: &str,
        filter: &ScopeFilter,
        limit: usize,
        cancel: &CancelSignal,
    ) -> OperationResult<SearchHits> {
        let started = Instant::now();
        let mut context = scope_filter_context(filter);
        context.insert("query".to_string(), query.to_string());

        if query.trim().is_empty() {
            let error = StoreError::Validation("search query must not be blank".to_string());
            let detail =
                classify_store_error(&error, "search", &context, 0, current_unix_timestamp_ms());
            return OperationResult::failure("search", vec![detail])
                .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        }

        let vector_result = {
            let client = Arc::clone(&self.vector);
            let query = query.to_string();
            let filter = filter.clone();
            self.handler
                .execute(OP_VECTOR_SEARCH, &context, cancel, move || {
                    let client = Arc::clone(&client);
                    let query = query.clone();
                    let filter = filter.clone();
                    async move { client.search(&query, &filter, limit).await }
                })
                .await
        };

        let hit_ids: Vec<String> = vector_result
            .data
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|hit| hit.record.memory_id.clone())
            .collect();

        let graph_result = match self.graph_client() {
            Some(client) if !hit_ids.is_empty() => {
                let client = Arc::clone(client);
                Some(
                    self.handler
                        .execute(OP_GRAPH_READ, &context, cancel, move || {
                            let client = Arc::clone(&client);
                            let hit_ids = hit_ids.clone();
                            async move { client.fetch_relations_for(&hit_ids).await }
                        })
                        .await,
                )
            }
            _ => None,
        };

        combine_read_results("search", vector_result, graph_result, |hits, relations| {
            SearchHits { hits, relations }
        })
        .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    /// Appends the audit event for a completed add. A failed append degrades
    /// to a warning; it never changes the add status.
    async fn append_add_history(
        &self,
        record: &MemoryRecord,
        graph_result: Option<&OperationResult<()>>,
        cancel: &CancelSignal,
    ) -> (bool, Option<String>) {
        let Some(history) = &self.history else {
            return (false, None);
        };
        let detail = match graph_result {
            Some(result) if result.is_failure() => "persisted to vector store; graph write failed",
            Some(_) => "persisted to vector and graph stores",
            None => "persisted to vector store",
        };
        let event = HistoryRecord {
            schema_version: HISTORY_RECORD_SCHEMA_VERSION,
            event_id: new_event_id(),
            kind: HistoryEventKind::Add,
            memory_id: Some(record.memory_id.clone()),
            scope: record.scope.clone(),
            detail: detail.to_string(),
            timestamp_unix_ms: current_unix_timestamp_ms(),
        };
        let mut context = BTreeMap::new();
        context.insert("memory_id".to_string(), record.memory_id.clone());

        let result = {
            let client = Arc::clone(history);
            self.handler
                .execute(OP_HISTORY_APPEND, &context, cancel, move || {
                    let client = Arc::clone(&client);
                    let event = event.clone();
                    async move { client.append(&event).await }
                })
                .await
        };
        if result.is_failure() {
            tracing::debug!(
                memory_id = %record.memory_id,
                "history append failed after add"
            );
            (
                false,
                Some(format!(
                    "history append failed for memory {}",
                    record.memory_id
                )),
            )
        } else {
            (true, None)
        }
    }
}

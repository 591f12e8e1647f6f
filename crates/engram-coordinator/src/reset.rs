//! Scoped, auditable deletion across the vector, graph, and history stores.
//!
//! A reset walks its requested passes in vector, graph, history order and
//! keeps going when a pass fails: unlike `add`, which wants minimal side
//! effects on failure, a reset wants maximal cleanup. Dry-run and live runs
//! share one selector, [`partition_reset_candidates`], so they can never
//! pick different targets.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use engram_backend::{
    GraphStoreClient, HistoryEventKind, HistoryRecord, HistoryStore, MemoryScope, ScopeFilter,
    StoreError, VectorStoreClient, new_event_id, HISTORY_RECORD_SCHEMA_VERSION,
};
use engram_core::{current_unix_timestamp_ms, CancelSignal};
use engram_resilience::{
    classify_store_error, ErrorDetail, ErrorHandler, EventSink, OperationResult,
};
use serde::{Deserialize, Serialize};

use crate::{
    OP_GRAPH_DELETE, OP_GRAPH_READ, OP_HISTORY_APPEND, OP_HISTORY_CLEAR, OP_HISTORY_LIST,
    OP_VECTOR_DELETE, OP_VECTOR_READ,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ResetPass` values.
pub enum ResetPass {
    Vector,
    Graph,
    History,
}

impl ResetPass {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::History => "history",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Public struct `ResetScope` used across Engram components.
///
/// Builder-style selection of which stores a reset touches, which records it
/// must keep, and whether it only previews.
pub struct ResetScope {
    #[serde(default)]
    pub include_vector: bool,
    #[serde(default)]
    pub include_graph: bool,
    #[serde(default)]
    pub include_history: bool,
    /// Entries whose scope matches this filter are never deleted.
    #[serde(default)]
    pub preserve_filter: Option<ScopeFilter>,
    #[serde(default)]
    pub dry_run: bool,
}

impl ResetScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects all three stores with no preserve filter, live.
    pub fn all_stores() -> Self {
        Self {
            include_vector: true,
            include_graph: true,
            include_history: true,
            ..Self::default()
        }
    }

    pub fn with_vector(mut self) -> Self {
        self.include_vector = true;
        self
    }

    pub fn with_graph(mut self) -> Self {
        self.include_graph = true;
        self
    }

    pub fn with_history(mut self) -> Self {
        self.include_history = true;
        self
    }

    pub fn with_preserve_filter(mut self, filter: ScopeFilter) -> Self {
        self.preserve_filter = Some(filter);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn selects_any_store(&self) -> bool {
        self.include_vector || self.include_graph || self.include_history
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Outcome of one store pass inside a reset.
pub struct ResetPassReport {
    pub pass: ResetPass,
    pub requested: bool,
    pub succeeded: bool,
    /// Entries removed, in the pass's own unit: records for vector, relation
    /// edges for graph, events for history. Zero on dry runs.
    pub deleted: usize,
    /// Ids the selector targeted, in listing order.
    #[serde(default)]
    pub target_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ResetReport` used across Engram components.
pub struct ResetReport {
    pub dry_run: bool,
    pub passes: Vec<ResetPassReport>,
    pub total_deleted: usize,
}

impl ResetReport {
    /// Returns the report for `pass`, if that pass was requested.
    pub fn pass(&self, pass: ResetPass) -> Option<&ResetPassReport> {
        self.passes.iter().find(|report| report.pass == pass)
    }
}

/// One candidate row for deletion: a store id plus the scope it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetCandidate {
    pub id: String,
    pub scope: MemoryScope,
}

impl ResetCandidate {
    pub fn new(id: impl Into<String>, scope: MemoryScope) -> Self {
        Self {
            id: id.into(),
            scope,
        }
    }
}

/// Splits candidate rows into ids to delete and ids to keep, in first-seen
/// order with duplicates collapsed.
///
/// Both the dry-run preview and the live deletion run through this one
/// function. An id seen with several scopes is kept whenever any of its rows
/// matches the preserve filter.
pub fn partition_reset_candidates(
    candidates: &[ResetCandidate],
    preserve_filter: Option<&ScopeFilter>,
) -> (Vec<String>, Vec<String>) {
    let mut preserved: BTreeSet<&str> = BTreeSet::new();
    if let Some(filter) = preserve_filter {
        for candidate in candidates {
            if filter.matches_scope(&candidate.scope) {
                preserved.insert(candidate.id.as_str());
            }
        }
    }

    let mut delete_ids = Vec::new();
    let mut kept_ids = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for candidate in candidates {
        if !seen.insert(candidate.id.as_str()) {
            continue;
        }
        if preserved.contains(candidate.id.as_str()) {
            kept_ids.push(candidate.id.clone());
        } else {
            delete_ids.push(candidate.id.clone());
        }
    }
    (delete_ids, kept_ids)
}

/// Everything one pass produced, folded into the reset envelope afterwards.
struct PassOutcome {
    report: ResetPassReport,
    errors: Vec<ErrorDetail>,
    warnings: Vec<String>,
}

impl PassOutcome {
    fn skipped_unconfigured(pass: ResetPass) -> Self {
        Self {
            report: ResetPassReport {
                pass,
                requested: true,
                succeeded: true,
                deleted: 0,
                target_ids: Vec::new(),
            },
            errors: Vec::new(),
            warnings: vec![format!(
                "{} reset requested but no {} store is configured",
                pass.as_str(),
                pass.as_str()
            )],
        }
    }
}

/// Public struct `ResetManager` used across Engram components.
///
/// Owns the store clients plus the shared [`ErrorHandler`] and runs every
/// listing and deletion through it.
pub struct ResetManager {
    vector: Arc<dyn VectorStoreClient>,
    graph: Option<Arc<dyn GraphStoreClient>>,
    history: Option<Arc<dyn HistoryStore>>,
    handler: Arc<ErrorHandler>,
    event_sink: Option<EventSink>,
}

impl ResetManager {
    pub fn new(
        vector: Arc<dyn VectorStoreClient>,
        graph: Option<Arc<dyn GraphStoreClient>>,
        history: Option<Arc<dyn HistoryStore>>,
        handler: Arc<ErrorHandler>,
    ) -> Self {
        Self {
            vector,
            graph,
            history,
            handler,
            event_sink: None,
        }
    }

    /// Installs a sink receiving one `reset_pass_completed` event per pass.
    pub fn with_event_sink(mut self, event_sink: EventSink) -> Self {
        self.event_sink = Some(event_sink);
        self
    }

    /// Runs the requested passes and aggregates their reports.
    ///
    /// The result is SUCCESS when every requested pass succeeded,
    /// PARTIAL_SUCCESS when some did, and FAILURE only when every requested
    /// pass failed; warnings name the failed passes. A live reset appends a
    /// reset event to the history trail afterwards, best-effort.
    pub async fn reset(
        &self,
        scope: &ResetScope,
        cancel: &CancelSignal,
    ) -> OperationResult<ResetReport> {
        let started = Instant::now();

        if !scope.selects_any_store() {
            let error = StoreError::Validation("reset scope selects no store".to_string());
            let detail = classify_store_error(
                &error,
                "reset",
                &BTreeMap::new(),
                0,
                current_unix_timestamp_ms(),
            );
            return OperationResult::failure("reset", vec![detail])
                .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        }

        let mut passes: Vec<ResetPassReport> = Vec::new();
        let mut errors: Vec<ErrorDetail> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        if scope.include_vector {
            let outcome = self.vector_pass(scope, cancel).await;
            self.emit_pass_completed(&outcome.report, scope.dry_run);
            errors.extend(outcome.errors);
            warnings.extend(outcome.warnings);
            passes.push(outcome.report);
        }
        if scope.include_graph {
            let outcome = self.graph_pass(scope, cancel).await;
            self.emit_pass_completed(&outcome.report, scope.dry_run);
            errors.extend(outcome.errors);
            warnings.extend(outcome.warnings);
            passes.push(outcome.report);
        }
        if scope.include_history {
            let outcome = self.history_pass(scope, cancel).await;
            self.emit_pass_completed(&outcome.report, scope.dry_run);
            errors.extend(outcome.errors);
            warnings.extend(outcome.warnings);
            passes.push(outcome.report);
        }

        let total_deleted = passes.iter().map(|pass| pass.deleted).sum();
        let report = ResetReport {
            dry_run: scope.dry_run,
            passes,
            total_deleted,
        };

        if !scope.dry_run {
            if let Some(warning) = self.append_reset_audit(&report, cancel).await {
                warnings.push(warning);
            }
        }

        let succeeded = report.passes.iter().filter(|pass| pass.succeeded).count();
        let mut result = if succeeded == report.passes.len() {
            let mut result = OperationResult::success("reset", report);
            result.errors = errors;
            result.warnings = warnings;
            result
        } else if succeeded > 0 {
            OperationResult::partial_success("reset", report, errors, warnings)
        } else {
            let mut result = OperationResult::failure("reset", errors);
            result.warnings = warnings;
            result
        };
        result = result
            .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        tracing::debug!(
            status = result.status.as_str(),
            dry_run = scope.dry_run,
            "reset finished"
        );
        result
    }

    async fn vector_pass(&self, scope: &ResetScope, cancel: &CancelSignal) -> PassOutcome {
        let context = pass_context(ResetPass::Vector);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let listing = {
            let client = Arc::clone(&self.vector);
            self.handler
                .execute(OP_VECTOR_READ, &context, cancel, move || {
                    let client = Arc::clone(&client);
                    async move { client.fetch_all(&ScopeFilter::default()).await }
                })
                .await
        };
        let listing_failed = listing.is_failure();
        let records = listing.data;
        errors.extend(listing.errors);
        if listing_failed {
            warnings.push("vector reset pass failed: could not list candidates".to_string());
            return PassOutcome {
                report: failed_pass(ResetPass::Vector, Vec::new()),
                errors,
                warnings,
            };
        }

        let candidates: Vec<ResetCandidate> = records
            .unwrap_or_default()
            .into_iter()
            .map(|record| ResetCandidate::new(record.memory_id, record.scope))
            .collect();
        let (delete_ids, kept_ids) =
            partition_reset_candidates(&candidates, scope.preserve_filter.as_ref());
        tracing::debug!(
            pass = "vector",
            targets = delete_ids.len(),
            preserved = kept_ids.len(),
            dry_run = scope.dry_run,
            "reset pass selected targets"
        );
        if scope.dry_run {
            return PassOutcome {
                report: selected_pass(ResetPass::Vector, delete_ids, 0),
                errors,
                warnings,
            };
        }

        let mut deleted = 0;
        if !delete_ids.is_empty() {
            let deletion = {
                let client = Arc::clone(&self.vector);
                let ids = delete_ids.clone();
                self.handler
                    .execute(OP_VECTOR_DELETE, &context, cancel, move || {
                        let client = Arc::clone(&client);
                        let ids = ids.clone();
                        async move { client.delete(&ids).await }
                    })
                    .await
            };
            let deletion_failed = deletion.is_failure();
            let count = deletion.data;
            errors.extend(deletion.errors);
            if deletion_failed {
                warnings.push("vector reset pass failed: deletion did not complete".to_string());
                return PassOutcome {
                    report: failed_pass(ResetPass::Vector, delete_ids),
                    errors,
                    warnings,
                };
            }
            deleted = count.unwrap_or_default();
        }
        PassOutcome {
            report: selected_pass(ResetPass::Vector, delete_ids, deleted),
            errors,
            warnings,
        }
    }

    async fn graph_pass(&self, scope: &ResetScope, cancel: &CancelSignal) -> PassOutcome {
        let Some(graph) = self.graph.as_ref() else {
            return PassOutcome::skipped_unconfigured(ResetPass::Graph);
        };
        let context = pass_context(ResetPass::Graph);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let listing = {
            let client = Arc::clone(graph);
            self.handler
                .execute(OP_GRAPH_READ, &context, cancel, move || {
                    let client = Arc::clone(&client);
                    async move { client.fetch_relations(&ScopeFilter::default()).await }
                })
                .await
        };
        let listing_failed = listing.is_failure();
        let relations = listing.data;
        errors.extend(listing.errors);
        if listing_failed {
            warnings.push("graph reset pass failed: could not list candidates".to_string());
            return PassOutcome {
                report: failed_pass(ResetPass::Graph, Vec::new()),
                errors,
                warnings,
            };
        }

        // One row per relation; the selector collapses them to memory ids.
        let candidates: Vec<ResetCandidate> = relations
            .unwrap_or_default()
            .into_iter()
            .map(|relation| ResetCandidate::new(relation.memory_id, relation.scope))
            .collect();
        let (delete_ids, kept_ids) =
            partition_reset_candidates(&candidates, scope.preserve_filter.as_ref());
        tracing::debug!(
            pass = "graph",
            targets = delete_ids.len(),
            preserved = kept_ids.len(),
            dry_run = scope.dry_run,
            "reset pass selected targets"
        );
        if scope.dry_run {
            return PassOutcome {
                report: selected_pass(ResetPass::Graph, delete_ids, 0),
                errors,
                warnings,
            };
        }

        let mut deleted = 0;
        if !delete_ids.is_empty() {
            let deletion = {
                let client = Arc::clone(graph);
                let ids = delete_ids.clone();
                self.handler
                    .execute(OP_GRAPH_DELETE, &context, cancel, move || {
                        let client = Arc::clone(&client);
                        let ids = ids.clone();
                        async move { client.delete_memories(&ids).await }
                    })
                    .await
            };
            let deletion_failed = deletion.is_failure();
            let count = deletion.data;
            errors.extend(deletion.errors);
            if deletion_failed {
                warnings.push("graph reset pass failed: deletion did not complete".to_string());
                return PassOutcome {
                    report: failed_pass(ResetPass::Graph, delete_ids),
                    errors,
                    warnings,
                };
            }
            deleted = count.unwrap_or_default();
        }
        PassOutcome {
            report: selected_pass(ResetPass::Graph, delete_ids, deleted),
            errors,
            warnings,
        }
    }

    async fn history_pass(&self, scope: &ResetScope, cancel: &CancelSignal) -> PassOutcome {
        let Some(history) = self.history.as_ref() else {
            return PassOutcome::skipped_unconfigured(ResetPass::History);
        };
        let context = pass_context(ResetPass::History);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let listing = {
            let client = Arc::clone(history);
            self.handler
                .execute(OP_HISTORY_LIST, &context, cancel, move || {
                    let client = Arc::clone(&client);
                    async move { client.list(&ScopeFilter::default()).await }
                })
                .await
        };
        let listing_failed = listing.is_failure();
        let events = listing.data;
        errors.extend(listing.errors);
        if listing_failed {
            warnings.push("history reset pass failed: could not list candidates".to_string());
            return PassOutcome {
                report: failed_pass(ResetPass::History, Vec::new()),
                errors,
                warnings,
            };
        }

        // Reset audit events survive every reset; the trail of destructive
        // operations must outlive the data they destroyed.
        let candidates: Vec<ResetCandidate> = events
            .unwrap_or_default()
            .into_iter()
            .filter(|event| event.kind != HistoryEventKind::Reset)
            .map(|event| ResetCandidate::new(event.event_id, event.scope))
            .collect();
        let (delete_ids, kept_ids) =
            partition_reset_candidates(&candidates, scope.preserve_filter.as_ref());
        tracing::debug!(
            pass = "history",
            targets = delete_ids.len(),
            preserved = kept_ids.len(),
            dry_run = scope.dry_run,
            "reset pass selected targets"
        );
        if scope.dry_run {
            return PassOutcome {
                report: selected_pass(ResetPass::History, delete_ids, 0),
                errors,
                warnings,
            };
        }

        let mut deleted = 0;
        if !delete_ids.is_empty() {
            let deletion = {
                let client = Arc::clone(history);
                let ids = delete_ids.clone();
                self.handler
                    .execute(OP_HISTORY_CLEAR, &context, cancel, move || {
                        let client = Arc::clone(&client);
                        let ids = ids.clone();
                        async move { client.remove(&ids).await }
                    })
                    .await
            };
            let deletion_failed = deletion.is_failure();
            let count = deletion.data;
            errors.extend(deletion.errors);
            if deletion_failed {
                warnings.push("history reset pass failed: deletion did not complete".to_string());
                return PassOutcome {
                    report: failed_pass(ResetPass::History, delete_ids),
                    errors,
                    warnings,
                };
            }
            deleted = count.unwrap_or_default();
        }
        PassOutcome {
            report: selected_pass(ResetPass::History, delete_ids, deleted),
            errors,
            warnings,
        }
    }

    /// Writes the audit event for a completed live reset.
    async fn append_reset_audit(
        &self,
        report: &ResetReport,
        cancel: &CancelSignal,
    ) -> Option<String> {
        let history = self.history.as_ref()?;
        let passes = report
            .passes
            .iter()
            .map(|pass| pass.pass.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let event = HistoryRecord {
            schema_version: HISTORY_RECORD_SCHEMA_VERSION,
            event_id: new_event_id(),
            kind: HistoryEventKind::Reset,
            memory_id: None,
            scope: MemoryScope::default(),
            detail: format!(
                "reset deleted {} entries across passes: {passes}",
                report.total_deleted
            ),
            timestamp_unix_ms: current_unix_timestamp_ms(),
        };
        let context = pass_context(ResetPass::History);

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
            tracing::debug!("reset audit append failed");
            Some("reset audit append failed".to_string())
        } else {
            None
        }
    }

    fn emit_pass_completed(&self, report: &ResetPassReport, dry_run: bool) {
        let Some(sink) = &self.event_sink else {
            return;
        };
        sink(serde_json::json!({
            "type": "reset_pass_completed",
            "pass": report.pass.as_str(),
            "dry_run": dry_run,
            "succeeded": report.succeeded,
            "deleted": report.deleted,
            "target_count": report.target_ids.len(),
        }));
    }
}

fn pass_context(pass: ResetPass) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    context.insert("reset_pass".to_string(), pass.as_str().to_string());
    context
}

fn failed_pass(pass: ResetPass, target_ids: Vec<String>) -> ResetPassReport {
    ResetPassReport {
        pass,
        requested: true,
        succeeded: false,
        deleted: 0,
        target_ids,
    }
}

fn selected_pass(pass: ResetPass, target_ids: Vec<String>, deleted: usize) -> ResetPassReport {
    ResetPassReport {
        pass,
        requested: true,
        succeeded: true,
        deleted,
        target_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoordinatorConfig, DualStoreCoordinator};
    use async_trait::async_trait;
    use engram_backend::{
        InMemoryGraphStore, InMemoryHistoryStore, InMemoryVectorStore, MemoryRecord,
        RelationTriple, ScoredMemoryRecord, MEMORY_RECORD_SCHEMA_VERSION,
    };
    use engram_resilience::{ErrorHandlerConfig, OperationStatus, RetryPolicy};
    use std::sync::Mutex;

    fn test_handler() -> Arc<ErrorHandler> {
        Arc::new(ErrorHandler::new(ErrorHandlerConfig::default()).expect("valid handler config"))
    }

    fn no_retry_handler() -> Arc<ErrorHandler> {
        let config = ErrorHandlerConfig {
            retry: RetryPolicy {
                max_retries: 0,
                ..RetryPolicy::default()
            },
            ..ErrorHandlerConfig::default()
        };
        Arc::new(ErrorHandler::new(config).expect("valid handler config"))
    }

    fn user_scope(user_id: &str) -> MemoryScope {
        MemoryScope {
            user_id: Some(user_id.to_string()),
            agent_id: None,
            run_id: None,
        }
    }

    fn user_filter(user_id: &str) -> ScopeFilter {
        ScopeFilter {
            user_id: Some(user_id.to_string()),
            agent_id: None,
            run_id: None,
        }
    }

    fn sample_record(memory_id: &str, user_id: &str, content: &str) -> MemoryRecord {
        MemoryRecord {
            schema_version: MEMORY_RECORD_SCHEMA_VERSION,
            memory_id: memory_id.to_string(),
            content: content.to_string(),
            scope: user_scope(user_id),
            relations: vec![RelationTriple {
                source: user_id.to_string(),
                relation: "mentions".to_string(),
                target: memory_id.to_string(),
            }],
            metadata: BTreeMap::new(),
            created_unix_ms: 1,
            updated_unix_ms: 1,
        }
    }

    /// Seeds two users' memories through the coordinator so all three stores
    /// carry matching state.
    async fn seeded_stores() -> (
        Arc<InMemoryVectorStore>,
        Arc<InMemoryGraphStore>,
        Arc<InMemoryHistoryStore>,
    ) {
        let vector = Arc::new(InMemoryVectorStore::new());
        let graph = Arc::new(InMemoryGraphStore::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let coordinator = DualStoreCoordinator::new(
            Arc::clone(&vector) as Arc<dyn VectorStoreClient>,
            Some(Arc::clone(&graph) as Arc<dyn GraphStoreClient>),
            Some(Arc::clone(&history) as Arc<dyn HistoryStore>),
            test_handler(),
            CoordinatorConfig::default(),
        );
        let cancel = CancelSignal::new();
        coordinator
            .add(&sample_record("mem-1", "u1", "prefers green tea"), &cancel)
            .await;
        coordinator
            .add(&sample_record("mem-2", "u2", "works night shifts"), &cancel)
            .await;
        (vector, graph, history)
    }

    fn manager_for(
        vector: &Arc<InMemoryVectorStore>,
        graph: &Arc<InMemoryGraphStore>,
        history: &Arc<InMemoryHistoryStore>,
    ) -> ResetManager {
        ResetManager::new(
            Arc::clone(vector) as Arc<dyn VectorStoreClient>,
            Some(Arc::clone(graph) as Arc<dyn GraphStoreClient>),
            Some(Arc::clone(history) as Arc<dyn HistoryStore>),
            test_handler(),
        )
    }

    struct FailingVectorStore;

    #[async_trait]
    impl VectorStoreClient for FailingVectorStore {
        async fn upsert(&self, _record: &MemoryRecord) -> Result<(), StoreError> {
            Err(StoreError::Connection("vector store offline".to_string()))
        }

        async fn fetch_all(&self, _filter: &ScopeFilter) -> Result<Vec<MemoryRecord>, StoreError> {
            Err(StoreError::Connection("vector store offline".to_string()))
        }

        async fn search(
            &self,
            _query: &str,
            _filter: &ScopeFilter,
            _limit: usize,
        ) -> Result<Vec<ScoredMemoryRecord>, StoreError> {
            Err(StoreError::Connection("vector store offline".to_string()))
        }

        async fn delete(&self, _memory_ids: &[String]) -> Result<usize, StoreError> {
            Err(StoreError::Connection("vector store offline".to_string()))
        }
    }

    #[test]
    fn unit_partition_without_filter_targets_every_unique_row() {
        let candidates = vec![
            ResetCandidate::new("mem-1", user_scope("u1")),
            ResetCandidate::new("mem-2", user_scope("u2")),
            ResetCandidate::new("mem-1", user_scope("u1")),
        ];

        let (delete_ids, kept_ids) = partition_reset_candidates(&candidates, None);

        assert_eq!(delete_ids, vec!["mem-1", "mem-2"]);
        assert!(kept_ids.is_empty());
    }

    #[test]
    fn unit_partition_keeps_rows_matching_preserve_filter() {
        let candidates = vec![
            ResetCandidate::new("mem-1", user_scope("u1")),
            ResetCandidate::new("mem-2", user_scope("u2")),
            ResetCandidate::new("mem-3", user_scope("u1")),
        ];
        let filter = user_filter("u1");

        let (delete_ids, kept_ids) = partition_reset_candidates(&candidates, Some(&filter));

        assert_eq!(delete_ids, vec!["mem-2"]);
        assert_eq!(kept_ids, vec!["mem-1", "mem-3"]);
    }

    #[test]
    fn unit_partition_preserve_wins_for_an_id_with_mixed_scopes() {
        let candidates = vec![
            ResetCandidate::new("mem-1", user_scope("u2")),
            ResetCandidate::new("mem-1", user_scope("u1")),
        ];
        let filter = user_filter("u1");

        let (delete_ids, kept_ids) = partition_reset_candidates(&candidates, Some(&filter));

        assert!(delete_ids.is_empty());
        assert_eq!(kept_ids, vec!["mem-1"]);
    }

    #[test]
    fn unit_reset_scope_builder_sets_flags() {
        let scope = ResetScope::new()
            .with_vector()
            .with_history()
            .with_preserve_filter(user_filter("u1"))
            .with_dry_run(true);

        assert!(scope.include_vector);
        assert!(!scope.include_graph);
        assert!(scope.include_history);
        assert!(scope.dry_run);
        assert!(scope.selects_any_store());
        assert!(!ResetScope::new().selects_any_store());
        assert!(ResetScope::all_stores().include_graph);
    }

    #[tokio::test]
    async fn unit_reset_rejects_scope_selecting_no_store() {
        let (vector, graph, history) = seeded_stores().await;
        let manager = manager_for(&vector, &graph, &history);
        let cancel = CancelSignal::new();

        let result = manager.reset(&ResetScope::new(), &cancel).await;

        assert_eq!(result.status, OperationStatus::Failure);
        assert_eq!(
            result.errors[0].category,
            engram_resilience::ErrorCategory::Validation
        );
    }

    #[tokio::test]
    async fn functional_dry_run_reports_targets_without_deleting() {
        let (vector, graph, history) = seeded_stores().await;
        let manager = manager_for(&vector, &graph, &history);
        let cancel = CancelSignal::new();

        let scope = ResetScope::all_stores().with_dry_run(true);
        let result = manager.reset(&scope, &cancel).await;

        assert_eq!(result.status, OperationStatus::Success);
        let report = result.data.expect("success carries data");
        assert!(report.dry_run);
        assert_eq!(report.total_deleted, 0);
        let vector_pass = report.pass(ResetPass::Vector).expect("vector pass");
        assert_eq!(vector_pass.target_ids, vec!["mem-1", "mem-2"]);
        assert_eq!(vector_pass.deleted, 0);

        let remaining = vector
            .fetch_all(&ScopeFilter::default())
            .await
            .expect("fetch_all");
        assert_eq!(remaining.len(), 2);
        let events = history.list(&ScopeFilter::default()).await.expect("list");
        // Dry runs append no audit event either.
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn functional_live_reset_clears_stores_and_keeps_audit_event() {
        let (vector, graph, history) = seeded_stores().await;
        let manager = manager_for(&vector, &graph, &history);
        let cancel = CancelSignal::new();

        let result = manager.reset(&ResetScope::all_stores(), &cancel).await;

        assert_eq!(result.status, OperationStatus::Success);
        let report = result.data.expect("success carries data");
        assert!(!report.dry_run);
        // Two records, two relation edges, two add events.
        assert_eq!(report.total_deleted, 6);

        let remaining = vector
            .fetch_all(&ScopeFilter::default())
            .await
            .expect("fetch_all");
        assert!(remaining.is_empty());
        let relations = graph
            .fetch_relations(&ScopeFilter::default())
            .await
            .expect("fetch_relations");
        assert!(relations.is_empty());

        let events = history.list(&ScopeFilter::default()).await.expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, HistoryEventKind::Reset);
        assert!(events[0].detail.contains("vector,graph,history"));
    }

    #[tokio::test]
    async fn functional_dry_run_and_live_reset_select_identical_targets() {
        let (vector, graph, history) = seeded_stores().await;
        let manager = manager_for(&vector, &graph, &history);
        let cancel = CancelSignal::new();
        let preserve = user_filter("u1");

        let dry = manager
            .reset(
                &ResetScope::all_stores()
                    .with_preserve_filter(preserve.clone())
                    .with_dry_run(true),
                &cancel,
            )
            .await;
        let live = manager
            .reset(
                &ResetScope::all_stores().with_preserve_filter(preserve),
                &cancel,
            )
            .await;

        let dry_report = dry.data.expect("dry run report");
        let live_report = live.data.expect("live report");
        for pass in [ResetPass::Vector, ResetPass::Graph, ResetPass::History] {
            assert_eq!(
                dry_report.pass(pass).expect("dry pass").target_ids,
                live_report.pass(pass).expect("live pass").target_ids,
            );
        }
    }

    #[tokio::test]
    async fn functional_reset_preserves_filtered_user_across_stores() {
        let (vector, graph, history) = seeded_stores().await;
        let manager = manager_for(&vector, &graph, &history);
        let cancel = CancelSignal::new();

        let scope = ResetScope::all_stores().with_preserve_filter(user_filter("u1"));
        let result = manager.reset(&scope, &cancel).await;

        assert_eq!(result.status, OperationStatus::Success);

        let remaining = vector
            .fetch_all(&ScopeFilter::default())
            .await
            .expect("fetch_all");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].memory_id, "mem-1");

        let relations = graph
            .fetch_relations(&ScopeFilter::default())
            .await
            .expect("fetch_relations");
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].memory_id, "mem-1");

        let events = history.list(&ScopeFilter::default()).await.expect("list");
        let add_events: Vec<_> = events
            .iter()
            .filter(|event| event.kind == HistoryEventKind::Add)
            .collect();
        assert_eq!(add_events.len(), 1);
        assert_eq!(add_events[0].memory_id.as_deref(), Some("mem-1"));
    }

    #[tokio::test]
    async fn functional_second_live_reset_deletes_nothing() {
        let (vector, graph, history) = seeded_stores().await;
        let manager = manager_for(&vector, &graph, &history);
        let cancel = CancelSignal::new();

        let first = manager.reset(&ResetScope::all_stores(), &cancel).await;
        let second = manager.reset(&ResetScope::all_stores(), &cancel).await;

        assert_eq!(first.status, OperationStatus::Success);
        assert_eq!(second.status, OperationStatus::Success);
        let report = second.data.expect("second report");
        // The first reset's audit event is not a deletion candidate.
        assert_eq!(report.total_deleted, 0);
    }

    #[tokio::test]
    async fn functional_failed_vector_pass_still_runs_remaining_passes() {
        let (_ignored, graph, history) = seeded_stores().await;
        let manager = ResetManager::new(
            Arc::new(FailingVectorStore) as Arc<dyn VectorStoreClient>,
            Some(Arc::clone(&graph) as Arc<dyn GraphStoreClient>),
            Some(Arc::clone(&history) as Arc<dyn HistoryStore>),
            no_retry_handler(),
        );
        let cancel = CancelSignal::new();

        let result = manager.reset(&ResetScope::all_stores(), &cancel).await;

        assert_eq!(result.status, OperationStatus::PartialSuccess);
        let report = result.data.expect("partial report");
        assert!(!report.pass(ResetPass::Vector).expect("vector pass").succeeded);
        assert!(report.pass(ResetPass::Graph).expect("graph pass").succeeded);
        assert!(report.pass(ResetPass::History).expect("history pass").succeeded);
        assert!(result
            .warnings
            .iter()
            .any(|warning| warning.contains("vector reset pass failed")));

        let relations = graph
            .fetch_relations(&ScopeFilter::default())
            .await
            .expect("fetch_relations");
        assert!(relations.is_empty());
    }

    #[tokio::test]
    async fn functional_reset_without_graph_store_warns_and_succeeds() {
        let (vector, _graph, history) = seeded_stores().await;
        let manager = ResetManager::new(
            Arc::clone(&vector) as Arc<dyn VectorStoreClient>,
            None,
            Some(Arc::clone(&history) as Arc<dyn HistoryStore>),
            test_handler(),
        );
        let cancel = CancelSignal::new();

        let result = manager
            .reset(&ResetScope::new().with_graph().with_vector(), &cancel)
            .await;

        assert_eq!(result.status, OperationStatus::Success);
        assert!(result
            .warnings
            .iter()
            .any(|warning| warning.contains("no graph store is configured")));
    }

    #[tokio::test]
    async fn functional_reset_emits_pass_completed_events() {
        let (vector, graph, history) = seeded_stores().await;
        let events: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let manager = manager_for(&vector, &graph, &history).with_event_sink(Arc::new(
            move |event| {
                sink_events.lock().expect("sink lock").push(event);
            },
        ));
        let cancel = CancelSignal::new();

        manager.reset(&ResetScope::all_stores(), &cancel).await;

        let captured = events.lock().expect("sink lock");
        let passes: Vec<&str> = captured
            .iter()
            .filter(|event| event["type"] == "reset_pass_completed")
            .filter_map(|event| event["pass"].as_str())
            .collect();
        assert_eq!(passes, vec!["vector", "graph", "history"]);
        assert!(captured
            .iter()
            .all(|event| event["succeeded"].as_bool() == Some(true)));
    }
}

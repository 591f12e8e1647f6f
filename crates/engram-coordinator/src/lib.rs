//! Engram coordination layer: dual-backend writes, reads, and resets.
//!
//! [`DualStoreCoordinator`] runs add/get_all/search across the vector and
//! graph stores; [`ResetManager`] performs scoped, dry-runnable deletion
//! across both plus the history trail. Every backend call either of them
//! makes goes through one shared [`engram_resilience::ErrorHandler`].

pub mod coordinator;
pub mod reset;

/// Operation classes keyed into the circuit-breaker arena. The coordinator
/// and reset paths share the read classes, so a degraded backend trips one
/// breaker for every caller.
pub const OP_VECTOR_WRITE: &str = "vector_write";
pub const OP_VECTOR_READ: &str = "vector_read";
pub const OP_VECTOR_SEARCH: &str = "vector_search";
pub const OP_VECTOR_DELETE: &str = "vector_delete";
pub const OP_GRAPH_WRITE: &str = "graph_write";
pub const OP_GRAPH_READ: &str = "graph_read";
pub const OP_GRAPH_DELETE: &str = "graph_delete";
pub const OP_HISTORY_APPEND: &str = "history_append";
pub const OP_HISTORY_LIST: &str = "history_list";
pub const OP_HISTORY_CLEAR: &str = "history_clear";

pub use coordinator::{AddOutcome, CoordinatorConfig, DualStoreCoordinator};
pub use reset::{
    partition_reset_candidates, ResetCandidate, ResetManager, ResetPass, ResetPassReport,
    ResetReport, ResetScope,
};

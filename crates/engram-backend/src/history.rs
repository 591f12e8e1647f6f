use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use engram_core::{current_unix_timestamp_ms, lock_or_recover_mutex, write_text_atomic};
use serde::{Deserialize, Serialize};

use crate::types::{MemoryScope, ScopeFilter, StoreError};

/// Schema version stamped on every persisted history line.
pub const HISTORY_RECORD_SCHEMA_VERSION: u32 = 1;

static EVENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique identifier for a new history event.
pub fn new_event_id() -> String {
    let millis = current_unix_timestamp_ms();
    let count = EVENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("engram-evt-{millis}-{count}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `HistoryEventKind` values.
pub enum HistoryEventKind {
    Add,
    Reset,
}

impl HistoryEventKind {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Reset => "reset",
        }
    }
}

/// Public struct `HistoryRecord` used across Engram components.
///
/// One auditable event: a memory written or a reset pass executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub schema_version: u32,
    pub event_id: String,
    pub kind: HistoryEventKind,
    #[serde(default)]
    pub memory_id: Option<String>,
    #[serde(default)]
    pub scope: MemoryScope,
    pub detail: String,
    pub timestamp_unix_ms: u64,
}

#[async_trait]
/// Trait contract for `HistoryStore` behavior.
pub trait HistoryStore: Send + Sync {
    /// Appends one event to the trail.
    async fn append(&self, record: &HistoryRecord) -> Result<(), StoreError>;

    /// Returns events whose scope matches `filter`, oldest first.
    async fn list(&self, filter: &ScopeFilter) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Removes the given events, returning how many were dropped.
    async fn remove(&self, event_ids: &[String]) -> Result<usize, StoreError>;
}

/// Public struct `InMemoryHistoryStore` used across Engram components.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    events: Mutex<Vec<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    /// Creates an empty trail.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let mut events = lock_or_recover_mutex(&self.events);
        events.push(record.clone());
        Ok(())
    }

    async fn list(&self, filter: &ScopeFilter) -> Result<Vec<HistoryRecord>, StoreError> {
        let events = lock_or_recover_mutex(&self.events);
        Ok(events
            .iter()
            .filter(|record| filter.matches_scope(&record.scope))
            .cloned()
            .collect())
    }

    async fn remove(&self, event_ids: &[String]) -> Result<usize, StoreError> {
        let wanted = event_ids
            .iter()
            .map(String::as_str)
            .collect::<std::collections::BTreeSet<_>>();
        let mut events = lock_or_recover_mutex(&self.events);
        let before = events.len();
        events.retain(|record| !wanted.contains(record.event_id.as_str()));
        Ok(before - events.len())
    }
}

/// Public struct `FileHistoryStore` used across Engram components.
///
/// Append-only JSONL trail. Malformed lines are skipped on read so one
/// corrupt entry cannot poison the whole audit trail.
#[derive(Debug)]
pub struct FileHistoryStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl FileHistoryStore {
    /// Creates a trail persisted at `path`; the file is created on first
    /// append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    fn load_records(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path).map_err(|error| {
            StoreError::Unavailable(format!(
                "failed to open history file {}: {error}",
                self.path.display()
            ))
        })?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|error| {
                StoreError::Unavailable(format!(
                    "failed to read history file {} at line {}: {error}",
                    self.path.display(),
                    index + 1
                ))
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %error,
                        "skipping malformed history line"
                    );
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(record)?;
        let _guard = lock_or_recover_mutex(&self.io_lock);
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::Unavailable(format!(
                    "failed to create history directory {}: {error}",
                    parent.display()
                ))
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|error| {
                StoreError::Unavailable(format!(
                    "failed to open history file {}: {error}",
                    self.path.display()
                ))
            })?;
        file.write_all(encoded.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush())
            .map_err(|error| {
                StoreError::Unavailable(format!(
                    "failed to write history file {}: {error}",
                    self.path.display()
                ))
            })?;
        Ok(())
    }

    async fn list(&self, filter: &ScopeFilter) -> Result<Vec<HistoryRecord>, StoreError> {
        let _guard = lock_or_recover_mutex(&self.io_lock);
        let records = self.load_records()?;
        Ok(records
            .into_iter()
            .filter(|record| filter.matches_scope(&record.scope))
            .collect())
    }

    async fn remove(&self, event_ids: &[String]) -> Result<usize, StoreError> {
        let wanted = event_ids
            .iter()
            .map(String::as_str)
            .collect::<std::collections::BTreeSet<_>>();
        let _guard = lock_or_recover_mutex(&self.io_lock);
        let records = self.load_records()?;
        let before = records.len();
        let retained = records
            .into_iter()
            .filter(|record| !wanted.contains(record.event_id.as_str()))
            .collect::<Vec<_>>();
        let removed = before - retained.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut content = String::new();
        for record in &retained {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        write_text_atomic(self.path.as_path(), content.as_str()).map_err(|error| {
            StoreError::Unavailable(format!(
                "failed to rewrite history file {}: {error:#}",
                self.path.display()
            ))
        })?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_id: &str, user_id: &str, kind: HistoryEventKind) -> HistoryRecord {
        HistoryRecord {
            schema_version: HISTORY_RECORD_SCHEMA_VERSION,
            event_id: event_id.to_string(),
            kind,
            memory_id: Some("mem-1".to_string()),
            scope: MemoryScope {
                user_id: Some(user_id.to_string()),
                agent_id: None,
                run_id: None,
            },
            detail: "memory written".to_string(),
            timestamp_unix_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn unit_event_ids_are_unique_and_prefixed() {
        let first = new_event_id();
        let second = new_event_id();
        assert_ne!(first, second);
        assert!(first.starts_with("engram-evt-"));
    }

    #[tokio::test]
    async fn functional_in_memory_history_lists_by_scope_and_removes_by_id() {
        let store = InMemoryHistoryStore::new();
        store
            .append(&event("evt-1", "u1", HistoryEventKind::Add))
            .await
            .expect("append evt-1");
        store
            .append(&event("evt-2", "u2", HistoryEventKind::Add))
            .await
            .expect("append evt-2");

        let filter = ScopeFilter {
            user_id: Some("u1".to_string()),
            agent_id: None,
            run_id: None,
        };
        let listed = store.list(&filter).await.expect("list u1");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id, "evt-1");

        let removed = store
            .remove(&["evt-1".to_string(), "evt-missing".to_string()])
            .await
            .expect("remove");
        assert_eq!(removed, 1);
        assert!(store
            .list(&ScopeFilter::default())
            .await
            .expect("list all")
            .iter()
            .all(|record| record.event_id != "evt-1"));
    }

    #[tokio::test]
    async fn functional_file_history_round_trips_records() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileHistoryStore::new(dir.path().join("trail").join("history.jsonl"));

        store
            .append(&event("evt-1", "u1", HistoryEventKind::Add))
            .await
            .expect("append evt-1");
        store
            .append(&event("evt-2", "u1", HistoryEventKind::Reset))
            .await
            .expect("append evt-2");

        let listed = store.list(&ScopeFilter::default()).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].event_id, "evt-1");
        assert_eq!(listed[1].kind, HistoryEventKind::Reset);
    }

    #[tokio::test]
    async fn regression_file_history_skips_malformed_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("history.jsonl");
        let store = FileHistoryStore::new(path.clone());

        store
            .append(&event("evt-1", "u1", HistoryEventKind::Add))
            .await
            .expect("append evt-1");
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(&path)
                .expect("open for corruption");
            file.write_all(b"{ not json }\n").expect("write junk");
        }
        store
            .append(&event("evt-2", "u1", HistoryEventKind::Add))
            .await
            .expect("append evt-2");

        let listed = store.list(&ScopeFilter::default()).await.expect("list");
        let ids = listed
            .iter()
            .map(|record| record.event_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["evt-1", "evt-2"]);
    }

    #[tokio::test]
    async fn functional_file_history_remove_rewrites_without_removed_events() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileHistoryStore::new(dir.path().join("history.jsonl"));

        store
            .append(&event("evt-1", "u1", HistoryEventKind::Add))
            .await
            .expect("append evt-1");
        store
            .append(&event("evt-2", "u1", HistoryEventKind::Add))
            .await
            .expect("append evt-2");

        let removed = store.remove(&["evt-1".to_string()]).await.expect("remove");
        assert_eq!(removed, 1);

        let listed = store.list(&ScopeFilter::default()).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id, "evt-2");

        let removed_again = store
            .remove(&["evt-1".to_string()])
            .await
            .expect("repeat remove");
        assert_eq!(removed_again, 0);
    }

    #[tokio::test]
    async fn unit_file_history_list_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileHistoryStore::new(dir.path().join("absent.jsonl"));
        let listed = store
            .list(&ScopeFilter::default())
            .await
            .expect("list missing");
        assert!(listed.is_empty());
    }
}

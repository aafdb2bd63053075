//! In-memory employee directory backed by the JSON snapshot.
//!
//! All live reads and writes go through [`DirectoryCache`]. Mutations mark the
//! cache dirty and (re)start a single trailing-edge persist timer; only the
//! last timer in a burst writes the snapshot. [`DirectoryCache::flush`] cancels
//! the timer and writes immediately, and must run on shutdown.
//!
//! The employee map, its insertion order and the pending timer live under one
//! `RwLock`. Snapshot file writes are serialized separately and tagged with
//! the revision they captured, so an older capture never overwrites a newer
//! one on disk.

use crate::employee::Employee;
use crate::snapshot::SnapshotFile;
use slipbot_common::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Default)]
struct CacheState {
    employees: HashMap<String, Employee>,
    /// Ids in insertion order
    order: Vec<String>,
    /// Bumped on every mutation
    revision: u64,
    pending_persist: Option<JoinHandle<()>>,
}

impl CacheState {
    fn insert(&mut self, employee: Employee) {
        if !self.employees.contains_key(&employee.id) {
            self.order.push(employee.id.clone());
        }
        self.employees.insert(employee.id.clone(), employee);
    }

    fn replace_all(&mut self, employees: Vec<Employee>) {
        self.employees.clear();
        self.order.clear();
        for employee in employees {
            self.insert(employee);
        }
    }

    fn ordered(&self) -> Vec<Employee> {
        self.order
            .iter()
            .filter_map(|id| self.employees.get(id).cloned())
            .collect()
    }
}

/// Serializes snapshot writes and remembers the newest revision on disk.
struct SnapshotWriter {
    file: SnapshotFile,
    written_revision: Mutex<u64>,
}

impl SnapshotWriter {
    async fn write(&self, revision: u64, employees: &[Employee]) -> Result<bool> {
        let mut written = self.written_revision.lock().await;
        if revision <= *written {
            return Ok(false);
        }

        self.file.write(employees).await?;
        *written = revision;

        tracing::info!(
            count = employees.len(),
            path = %self.file.path().display(),
            revision,
            "local employee snapshot saved"
        );
        Ok(true)
    }
}

pub struct DirectoryCache {
    state: Arc<RwLock<CacheState>>,
    writer: Arc<SnapshotWriter>,
    debounce: Duration,
}

impl DirectoryCache {
    pub fn new(snapshot: SnapshotFile, debounce: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState::default())),
            writer: Arc::new(SnapshotWriter {
                file: snapshot,
                written_revision: Mutex::new(0),
            }),
            debounce,
        }
    }

    pub fn snapshot_file(&self) -> &SnapshotFile {
        &self.writer.file
    }

    /// Replace the cache with the snapshot contents. Does not schedule a persist.
    pub async fn load_snapshot(&self) -> Result<usize> {
        let employees = self.writer.file.load().await?;

        let mut state = self.state.write().await;
        if let Some(handle) = state.pending_persist.take() {
            handle.abort();
        }
        state.replace_all(employees);
        let count = state.employees.len();

        // What was just read is what is on disk
        *self.writer.written_revision.lock().await = state.revision;

        tracing::info!(
            count,
            path = %self.writer.file.path().display(),
            "local employee store loaded"
        );
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.employees.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.employees.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<Employee> {
        self.state.read().await.employees.get(id).cloned()
    }

    /// All employees in insertion order.
    pub async fn list(&self) -> Vec<Employee> {
        self.state.read().await.ordered()
    }

    /// All employees sorted by id (byte-wise lexicographic).
    pub async fn sorted(&self) -> Vec<Employee> {
        let mut employees = self.list().await;
        employees.sort_by(|a, b| a.id.cmp(&b.id));
        employees
    }

    /// Create the employee if needed and set or clear its mobile.
    ///
    /// `id` and `mobile` are expected to be normalized by the caller.
    pub async fn upsert_mobile(&self, id: &str, mobile: Option<String>) -> Employee {
        let mut state = self.state.write().await;

        let mut employee = state
            .employees
            .get(id)
            .cloned()
            .unwrap_or_else(|| Employee::new(id));
        employee.mobile = mobile;
        state.insert(employee.clone());

        self.schedule_persist(&mut state);
        employee
    }

    /// Replace every entry and schedule a persist. Returns the new size.
    pub async fn replace_all(&self, employees: Vec<Employee>) -> usize {
        let mut state = self.state.write().await;
        state.replace_all(employees);
        self.schedule_persist(&mut state);
        state.employees.len()
    }

    /// Whether a debounced persist is waiting to run.
    pub async fn has_pending_persist(&self) -> bool {
        self.state.read().await.pending_persist.is_some()
    }

    /// Cancel any pending timer and write the snapshot now.
    ///
    /// Waits for a persist already in flight. Returns `true` when this call
    /// wrote the file, `false` when the newest revision was already on disk.
    pub async fn flush(&self) -> Result<bool> {
        let (revision, employees) = {
            let mut state = self.state.write().await;
            if let Some(handle) = state.pending_persist.take() {
                handle.abort();
            }
            (state.revision, state.ordered())
        };

        self.writer.write(revision, &employees).await
    }

    /// Must be called with the state write guard held.
    fn schedule_persist(&self, state: &mut CacheState) {
        state.revision += 1;

        if let Some(handle) = state.pending_persist.take() {
            handle.abort();
        }

        let shared = Arc::clone(&self.state);
        let writer = Arc::clone(&self.writer);
        let delay = self.debounce;

        state.pending_persist = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Once the handle is cleared no one can abort this task, so the
            // write below always completes.
            let (revision, employees) = {
                let mut state = shared.write().await;
                state.pending_persist = None;
                (state.revision, state.ordered())
            };

            if let Err(e) = writer.write(revision, &employees).await {
                tracing::error!(error = %e, "failed to save local employee snapshot");
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir, debounce_ms: u64) -> DirectoryCache {
        DirectoryCache::new(
            SnapshotFile::new(dir.path().join("employees.json")),
            Duration::from_millis(debounce_ms),
        )
    }

    fn read_ids(dir: &TempDir) -> Vec<String> {
        let raw = std::fs::read_to_string(dir.path().join("employees.json")).unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
        rows.iter()
            .map(|r| r["empid"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_insertion_order_is_kept() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 10_000);

        cache
            .replace_all(vec![Employee::new("B"), Employee::new("A"), Employee::new("C")])
            .await;
        cache.upsert_mobile("A", Some("9825533053".into())).await;
        cache.upsert_mobile("D", None).await;

        let ids: Vec<String> = cache.list().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["B", "A", "C", "D"]);

        let sorted: Vec<String> = cache.sorted().await.into_iter().map(|e| e.id).collect();
        assert_eq!(sorted, vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_upsert_keeps_name_and_clears_mobile() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 10_000);
        cache
            .replace_all(vec![Employee::new("E1").with_name("Asha").with_mobile("111")])
            .await;

        let updated = cache.upsert_mobile("E1", Some("9825533053".into())).await;
        assert_eq!(updated.name.as_deref(), Some("Asha"));
        assert_eq!(updated.mobile.as_deref(), Some("9825533053"));

        let cleared = cache.upsert_mobile("E1", None).await;
        assert_eq!(cleared.name.as_deref(), Some("Asha"));
        assert!(cleared.mobile.is_none());
    }

    #[tokio::test]
    async fn test_burst_of_updates_is_persisted_once_after_debounce() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 50);
        cache.load_snapshot().await.unwrap();

        for i in 0..20 {
            cache.upsert_mobile(&format!("E{i:02}"), Some("9825533053".into())).await;
        }
        assert!(cache.has_pending_persist().await);
        // Nothing written yet: the file still holds the empty array
        assert!(read_ids(&dir).is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(!cache.has_pending_persist().await);
        assert_eq!(read_ids(&dir).len(), 20);
    }

    #[tokio::test]
    async fn test_flush_writes_pending_changes_immediately() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 60_000);
        cache.load_snapshot().await.unwrap();

        cache.upsert_mobile("E1", Some("9825533053".into())).await;
        assert!(cache.flush().await.unwrap());
        assert_eq!(read_ids(&dir), vec!["E1"]);

        // Nothing pending any more
        assert!(!cache.flush().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_snapshot_restores_previous_state() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 60_000);
        cache.load_snapshot().await.unwrap();
        cache
            .replace_all(vec![Employee::new("Z").with_name("Zoe"), Employee::new("Y")])
            .await;
        cache.flush().await.unwrap();

        let reopened = cache_in(&dir, 60_000);
        assert_eq!(reopened.load_snapshot().await.unwrap(), 2);
        let ids: Vec<String> = reopened.list().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["Z", "Y"]);
        assert_eq!(reopened.get("Z").await.unwrap().name.as_deref(), Some("Zoe"));
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_memory_state() {
        let dir = TempDir::new().unwrap();
        // The snapshot path is a directory, so every write fails
        let blocked = dir.path().join("employees.json");
        std::fs::create_dir(&blocked).unwrap();
        let cache = DirectoryCache::new(SnapshotFile::new(&blocked), Duration::from_millis(60_000));

        cache.upsert_mobile("E1", Some("9825533053".into())).await;
        assert!(cache.flush().await.is_err());
        assert_eq!(
            cache.get("E1").await.unwrap().mobile.as_deref(),
            Some("9825533053")
        );
    }
}

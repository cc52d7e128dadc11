//! In-memory implementation of the backing store traits

use super::{
    BackendError, BackendResult, PathRecord, PathRecordBackend, PathRecordUpdate, ProgressBackend,
    ProgressRecord, ProgressUpdate, Variable, VariableBackend, VariableWriteRequest,
};
use crate::definition::{PathId, StepId};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Number of calls received per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `get_path`
    pub get_path: usize,
    /// `update_path`
    pub update_path: usize,
    /// `list_variables`
    pub list_variables: usize,
    /// `create_variable`
    pub create_variable: usize,
    /// `update_variable`
    pub update_variable: usize,
    /// `list_progress`
    pub list_progress: usize,
    /// `upsert_progress`
    pub upsert_progress: usize,
}

impl CallCounts {
    /// Variable writes of either kind
    pub fn variable_writes(&self) -> usize {
        self.create_variable + self.update_variable
    }
}

#[derive(Debug, Default)]
struct Counters {
    get_path: AtomicUsize,
    update_path: AtomicUsize,
    list_variables: AtomicUsize,
    create_variable: AtomicUsize,
    update_variable: AtomicUsize,
    list_progress: AtomicUsize,
    upsert_progress: AtomicUsize,
}

#[derive(Debug, Default)]
struct Tables {
    paths: HashMap<PathId, PathRecord>,
    variables: Vec<Variable>,
    progress: HashMap<(PathId, StepId), ProgressRecord>,
}

/// Backing store kept in memory
///
/// Calls are counted per operation. Writes can be made to fail and reads can
/// be delayed, which is how tests exercise the failure and cancellation paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    counters: Counters,
    fail_writes: AtomicBool,
    read_delay_ms: AtomicUsize,
}

impl MemoryBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a path record
    pub async fn insert_path(&self, record: PathRecord) {
        self.tables.lock().await.paths.insert(record.id, record);
    }

    /// Current copy of a path record
    pub async fn path(&self, path_id: PathId) -> Option<PathRecord> {
        self.tables.lock().await.paths.get(&path_id).cloned()
    }

    /// Insert a variable row as a server would have it
    pub async fn insert_variable(&self, variable: Variable) {
        self.tables.lock().await.variables.push(variable);
    }

    /// All variable rows of a path, duplicates included
    pub async fn variables(&self, path_id: PathId) -> Vec<Variable> {
        self.tables
            .lock()
            .await
            .variables
            .iter()
            .filter(|v| v.path_id == path_id)
            .cloned()
            .collect()
    }

    /// Insert or replace a progress record
    pub async fn insert_progress(&self, record: ProgressRecord) {
        self.tables
            .lock()
            .await
            .progress
            .insert((record.path_id, record.step_id), record);
    }

    /// Progress record of one step
    pub async fn progress(&self, path_id: PathId, step_id: StepId) -> Option<ProgressRecord> {
        self.tables
            .lock()
            .await
            .progress
            .get(&(path_id, step_id))
            .cloned()
    }

    /// Make every write fail with [`BackendError::Unavailable`] while set
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every read by `delay`
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Snapshot of the call counters
    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            get_path: c.get_path.load(Ordering::SeqCst),
            update_path: c.update_path.load(Ordering::SeqCst),
            list_variables: c.list_variables.load(Ordering::SeqCst),
            create_variable: c.create_variable.load(Ordering::SeqCst),
            update_variable: c.update_variable.load(Ordering::SeqCst),
            list_progress: c.list_progress.load(Ordering::SeqCst),
            upsert_progress: c.upsert_progress.load(Ordering::SeqCst),
        }
    }

    fn check_writable(&self) -> BackendResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("writes are disabled".to_string()));
        }
        Ok(())
    }

    async fn read_delay(&self) {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
    }
}

#[async_trait]
impl PathRecordBackend for MemoryBackend {
    async fn get_path(&self, path_id: PathId) -> BackendResult<PathRecord> {
        self.counters.get_path.fetch_add(1, Ordering::SeqCst);
        self.read_delay().await;
        self.tables
            .lock()
            .await
            .paths
            .get(&path_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("path {path_id}")))
    }

    async fn update_path(&self, path_id: PathId, update: &PathRecordUpdate) -> BackendResult<()> {
        self.counters.update_path.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let mut tables = self.tables.lock().await;
        let record = tables
            .paths
            .get_mut(&path_id)
            .ok_or_else(|| BackendError::NotFound(format!("path {path_id}")))?;
        if let Some(data) = &update.data {
            record.data = Some(Value::String(data.clone()));
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl VariableBackend for MemoryBackend {
    async fn list_variables(&self, path_id: PathId) -> BackendResult<Vec<Variable>> {
        self.counters.list_variables.fetch_add(1, Ordering::SeqCst);
        self.read_delay().await;
        Ok(self.variables(path_id).await)
    }

    async fn create_variable(&self, request: &VariableWriteRequest) -> BackendResult<()> {
        self.counters.create_variable.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        self.tables.lock().await.variables.push(Variable {
            path_id: request.path_id,
            variable_index: request.variable_index,
            variable_name: request.variable_name.clone(),
            rag_source_id: request.rag_source_id,
            value: request.value.clone(),
            created_at: Some(Utc::now()),
        });
        Ok(())
    }

    async fn update_variable(&self, request: &VariableWriteRequest) -> BackendResult<()> {
        self.counters.update_variable.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let mut tables = self.tables.lock().await;
        let row = tables
            .variables
            .iter_mut()
            .find(|v| {
                v.path_id == request.path_id
                    && v.variable_index == request.variable_index
                    && v.variable_name == request.variable_name
            })
            .ok_or_else(|| {
                BackendError::NotFound(format!(
                    "variable {}/{} of path {}",
                    request.variable_index, request.variable_name, request.path_id
                ))
            })?;
        row.value = request.value.clone();
        row.rag_source_id = request.rag_source_id;
        Ok(())
    }
}

#[async_trait]
impl ProgressBackend for MemoryBackend {
    async fn list_progress(&self, path_id: PathId) -> BackendResult<Vec<ProgressRecord>> {
        self.counters.list_progress.fetch_add(1, Ordering::SeqCst);
        self.read_delay().await;
        let tables = self.tables.lock().await;
        let mut records: Vec<ProgressRecord> = tables
            .progress
            .values()
            .filter(|r| r.path_id == path_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.step_id);
        Ok(records)
    }

    async fn upsert_progress(&self, update: &ProgressUpdate) -> BackendResult<()> {
        self.counters.upsert_progress.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        self.insert_progress(ProgressRecord {
            path_id: update.path_id,
            step_id: update.step_id,
            status: update.status,
            result_text: update.result_text.clone().unwrap_or(Value::Null),
            executed_at: update.executed_at,
        })
        .await;
        Ok(())
    }
}

//! Path variables and the write intent log
//!
//! Every identity written during a session gets an [`Intent`] recording the
//! value last requested, the value last committed by the backend and whether
//! the row is known to exist server side. That log gives three guarantees:
//!
//! - writing the committed value again is a no-op,
//! - the first write of an identity creates the row and later ones update it,
//! - writes that failed or were abandoned can be replayed.

use crate::backend::{Variable, VariableBackend, VariableWriteRequest};
use crate::definition::PathId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Key a step uses to find its variable
///
/// Some step kinds key their variable by `variable_index_number`, others by
/// `variable_name`, a few by both. Both lookups are kept as written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableIdentity {
    /// Keyed by index
    Index(i64),
    /// Keyed by name
    Name(String),
}

impl std::fmt::Display for VariableIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableIdentity::Index(index) => write!(f, "#{index}"),
            VariableIdentity::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// A write a step behavior wants performed
#[derive(Debug, Clone, PartialEq)]
pub struct VariableWrite {
    /// Intent log key
    pub identity: VariableIdentity,
    /// Index sent to the backend
    pub variable_index: i64,
    /// Name sent to the backend
    pub variable_name: String,
    /// RAG source the value refers to
    pub rag_source_id: Option<i64>,
    /// Value to store
    pub value: Value,
}

impl VariableWrite {
    /// Request body for `path_id`
    pub fn to_request(&self, path_id: PathId) -> VariableWriteRequest {
        VariableWriteRequest {
            path_id,
            variable_index: self.variable_index,
            rag_source_id: self.rag_source_id,
            variable_name: self.variable_name.clone(),
            value: self.value.clone(),
        }
    }
}

/// State of one intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    /// Sent, or about to be sent, with no answer applied
    Pending,
    /// The backend holds `committed`
    Committed,
    /// The last attempt failed
    Failed,
}

/// What the log knows about one identity
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    /// Value of the latest write request
    pub requested: Value,
    /// Value the backend is known to hold
    pub committed: Option<Value>,
    /// Whether a row exists server side
    pub exists: bool,
    /// Current state
    pub state: IntentState,
    /// Attempts made for the current request
    pub attempts: u32,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    request: Option<VariableWriteRequest>,
    row_key: Option<RowKey>,
}

/// Key columns of the server row an intent writes to
#[derive(Debug, Clone, PartialEq)]
struct RowKey {
    variable_index: i64,
    variable_name: String,
    rag_source_id: Option<i64>,
}

impl RowKey {
    fn of_row(row: &Variable) -> Self {
        Self {
            variable_index: row.variable_index,
            variable_name: row.variable_name.clone(),
            rag_source_id: row.rag_source_id,
        }
    }

    fn of_request(request: &VariableWriteRequest) -> Self {
        Self {
            variable_index: request.variable_index,
            variable_name: request.variable_name.clone(),
            rag_source_id: request.rag_source_id,
        }
    }

    /// Point `request` at this row
    fn apply(&self, mut request: VariableWriteRequest) -> VariableWriteRequest {
        request.variable_index = self.variable_index;
        request.variable_name = self.variable_name.clone();
        if request.rag_source_id.is_none() {
            request.rag_source_id = self.rag_source_id;
        }
        request
    }
}

impl Intent {
    fn empty() -> Self {
        Self {
            requested: Value::Null,
            committed: None,
            exists: false,
            state: IntentState::Committed,
            attempts: 0,
            updated_at: Utc::now(),
            request: None,
            row_key: None,
        }
    }

    fn is_unsettled(&self) -> bool {
        matches!(self.state, IntentState::Pending | IntentState::Failed)
    }
}

/// Result of [`VariableStore::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value equals the committed one; nothing was sent
    Unchanged,
    /// A new row was created
    Created,
    /// An existing row was overwritten
    Updated,
    /// The backend call failed; the intent stays replayable
    Failed,
}

/// Idempotent client for path variables
pub struct VariableStore {
    backend: Arc<dyn VariableBackend>,
    log: BTreeMap<(PathId, VariableIdentity), Intent>,
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("intents", &self.log.len())
            .finish()
    }
}

impl VariableStore {
    /// Store over `backend` with an empty log
    pub fn new(backend: Arc<dyn VariableBackend>) -> Self {
        Self {
            backend,
            log: BTreeMap::new(),
        }
    }

    /// Shared handle to the backend, for detached reads
    pub fn backend(&self) -> Arc<dyn VariableBackend> {
        Arc::clone(&self.backend)
    }

    /// Intent recorded for one identity
    pub fn intent(&self, path_id: PathId, identity: &VariableIdentity) -> Option<&Intent> {
        self.log.get(&(path_id, identity.clone()))
    }

    /// Write a value, creating or updating the row as needed
    ///
    /// Backend failures are logged and reported as [`WriteOutcome::Failed`];
    /// they never propagate.
    pub async fn write(&mut self, path_id: PathId, write: VariableWrite) -> WriteOutcome {
        let key = (path_id, write.identity.clone());
        let intent = self.log.entry(key.clone()).or_insert_with(Intent::empty);

        if intent.committed.as_ref() == Some(&write.value) {
            trace!("Variable {} of path {} unchanged", write.identity, path_id);
            return WriteOutcome::Unchanged;
        }

        let request = write.to_request(path_id);
        intent.requested = write.value.clone();
        intent.state = IntentState::Pending;
        intent.attempts = 0;
        intent.request = Some(request.clone());
        intent.updated_at = Utc::now();

        self.send(key, request).await
    }

    /// Re-issue every intent that failed or was abandoned mid-flight
    ///
    /// Returns the number of intents committed by this call.
    pub async fn replay_failed(&mut self, path_id: PathId) -> usize {
        let unsettled: Vec<((PathId, VariableIdentity), VariableWriteRequest)> = self
            .log
            .iter()
            .filter(|((path, _), intent)| *path == path_id && intent.is_unsettled())
            .filter_map(|(key, intent)| intent.request.clone().map(|r| (key.clone(), r)))
            .collect();

        if unsettled.is_empty() {
            return 0;
        }
        debug!(
            "Replaying {} unsettled variable writes for path {}",
            unsettled.len(),
            path_id
        );

        let mut committed = 0;
        for (key, request) in unsettled {
            match self.send(key, request).await {
                WriteOutcome::Created | WriteOutcome::Updated => committed += 1,
                WriteOutcome::Unchanged | WriteOutcome::Failed => {}
            }
        }
        committed
    }

    /// Number of intents in `Pending` or `Failed` state for a path
    pub fn unsettled_count(&self, path_id: PathId) -> usize {
        self.log
            .iter()
            .filter(|((path, _), intent)| *path == path_id && intent.is_unsettled())
            .count()
    }

    /// All variables of a path
    pub async fn read_all(&self, path_id: PathId) -> crate::backend::BackendResult<Vec<Variable>> {
        self.backend.list_variables(path_id).await
    }

    /// Read the rows matching any of `identities`
    ///
    /// A failed read is logged and treated as "no rows".
    pub async fn read_matching(
        backend: &dyn VariableBackend,
        path_id: PathId,
        identities: &[VariableIdentity],
    ) -> Vec<Variable> {
        if identities.is_empty() {
            return Vec::new();
        }
        match backend.list_variables(path_id).await {
            Ok(rows) => {
                let matching: Vec<Variable> = rows
                    .into_iter()
                    .filter(|row| identities.iter().any(|id| row.matches(id)))
                    .collect();
                debug!(
                    "Prefill found {} matching variables for path {}",
                    matching.len(),
                    path_id
                );
                matching
            }
            Err(e) => {
                warn!("Failed to read variables for path {}: {}", path_id, e);
                Vec::new()
            }
        }
    }

    /// Read and reconcile in one go; see [`VariableStore::reconcile`]
    pub async fn prefill(
        &mut self,
        path_id: PathId,
        identities: &[VariableIdentity],
    ) -> Vec<Variable> {
        let rows = Self::read_matching(self.backend.as_ref(), path_id, identities).await;
        self.reconcile(path_id, identities, &rows);
        rows
    }

    /// Record server rows as committed and existing
    ///
    /// An unsettled intent keeps its state and request so it can still be
    /// replayed, but now replays as an update.
    pub fn reconcile(&mut self, path_id: PathId, identities: &[VariableIdentity], rows: &[Variable]) {
        for identity in identities {
            let Some(row) = rows.iter().find(|row| row.matches(identity)) else {
                continue;
            };
            let intent = self
                .log
                .entry((path_id, identity.clone()))
                .or_insert_with(Intent::empty);
            intent.exists = true;
            intent.row_key = Some(RowKey::of_row(row));
            if !intent.is_unsettled() {
                intent.committed = Some(row.value.clone());
                intent.requested = row.value.clone();
                intent.state = IntentState::Committed;
            }
            intent.updated_at = Utc::now();
            trace!("Reconciled variable {} of path {}", identity, path_id);
        }
    }

    async fn send(
        &mut self,
        key: (PathId, VariableIdentity),
        request: VariableWriteRequest,
    ) -> WriteOutcome {
        let Some(intent) = self.log.get_mut(&key) else {
            return WriteOutcome::Failed;
        };
        let exists = intent.exists;
        // Updates address the row the server holds, not the step's own key
        let request = match (&intent.row_key, exists) {
            (Some(row_key), true) => row_key.apply(request),
            _ => request,
        };
        intent.attempts += 1;
        intent.request = Some(request.clone());
        debug!(
            "Writing variable {} of path {} (attempt {})",
            key.1, key.0, intent.attempts
        );

        let result = if exists {
            self.backend.update_variable(&request).await
        } else {
            self.backend.create_variable(&request).await
        };

        let Some(intent) = self.log.get_mut(&key) else {
            return WriteOutcome::Failed;
        };
        intent.updated_at = Utc::now();
        match result {
            Ok(()) => {
                trace!(
                    "Committed variable {} of path {} ({})",
                    key.1,
                    key.0,
                    if exists { "update" } else { "create" }
                );
                intent.row_key = Some(RowKey::of_request(&request));
                intent.committed = Some(request.value);
                intent.exists = true;
                intent.state = IntentState::Committed;
                intent.request = None;
                if exists {
                    WriteOutcome::Updated
                } else {
                    WriteOutcome::Created
                }
            }
            Err(e) => {
                warn!(
                    "Failed to write variable {} of path {} after {} attempts: {}",
                    key.1, key.0, intent.attempts, e
                );
                intent.state = IntentState::Failed;
                WriteOutcome::Failed
            }
        }
    }
}

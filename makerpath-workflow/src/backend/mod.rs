//! Backing store collaborators
//!
//! The engine talks to three resources: path records, path variables and
//! step progress. Each is a trait so hosts can plug in the REST backend
//! ([`HttpBackend`]) or the in-memory one ([`MemoryBackend`]) used by tests and
//! offline sessions.

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::{CallCounts, MemoryBackend};

use crate::definition::{PathId, StepId};
use crate::variables::VariableIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use makerpath_common::{ErrorSeverity, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors returned by backing store calls
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials were rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success status
    #[error("Backend returned status {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The response body did not have the expected shape
    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    /// The backend refused the call without reaching a server
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl Severity for BackendError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            BackendError::Unauthorized(_) => ErrorSeverity::Critical,
            BackendError::Http(_) => ErrorSeverity::Error,
            BackendError::NotFound(_) => ErrorSeverity::Error,
            BackendError::Api { .. } => ErrorSeverity::Error,
            BackendError::Decode(_) => ErrorSeverity::Error,
            BackendError::Unavailable(_) => ErrorSeverity::Warning,
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Lifecycle status of a path record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    /// Created but never worked on
    #[default]
    Draft,
    /// Being worked through
    InProgress,
    /// Finalized
    Completed,
}

/// A persisted path record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRecord {
    /// Record id
    pub id: PathId,
    /// Title shown in path lists
    #[serde(default)]
    pub title: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: PathStatus,
    /// Serialized session; a JSON string, structured JSON, or null
    #[serde(default)]
    pub data: Option<Value>,
}

/// Body of `PATCH /paths/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRecordUpdate {
    /// New serialized session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// New status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PathStatus>,
}

/// A variable row scoped to one path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Owning path
    pub path_id: PathId,
    /// Index key
    #[serde(default)]
    pub variable_index: i64,
    /// Name key
    #[serde(default)]
    pub variable_name: String,
    /// RAG source the value refers to
    #[serde(default)]
    pub rag_source_id: Option<i64>,
    /// Stored value
    #[serde(default)]
    pub value: Value,
    /// Server timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Variable {
    /// Whether this row belongs to `identity`
    pub fn matches(&self, identity: &VariableIdentity) -> bool {
        match identity {
            VariableIdentity::Index(index) => self.variable_index == *index,
            VariableIdentity::Name(name) => self.variable_name == *name,
        }
    }
}

/// Body of `POST /variables` and `PUT /variables`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableWriteRequest {
    /// Owning path
    pub path_id: PathId,
    /// Index key
    pub variable_index: i64,
    /// RAG source the value refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_source_id: Option<i64>,
    /// Name key
    pub variable_name: String,
    /// Value to store
    pub value: Value,
}

/// Outcome recorded for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Never run
    #[default]
    NotExecuted,
    /// Completed
    Success,
    /// Ran and failed
    Failed,
}

/// A persisted step outcome, one per path and step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Owning path
    pub path_id: PathId,
    /// Step the record is about
    pub step_id: StepId,
    /// Outcome
    #[serde(default)]
    pub status: ProgressStatus,
    /// Free-form result payload
    #[serde(default)]
    pub result_text: Value,
    /// When the step was executed
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
}

/// Body of `POST /progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Owning path
    pub path_id: PathId,
    /// Step the record is about
    pub step_id: StepId,
    /// Outcome
    pub status: ProgressStatus,
    /// Free-form result payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_text: Option<Value>,
    /// When the step was executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

/// Access to path records
#[async_trait]
pub trait PathRecordBackend: Send + Sync {
    /// Fetch one record
    async fn get_path(&self, path_id: PathId) -> BackendResult<PathRecord>;

    /// Apply a partial update to one record
    async fn update_path(&self, path_id: PathId, update: &PathRecordUpdate) -> BackendResult<()>;
}

/// Access to path variables
#[async_trait]
pub trait VariableBackend: Send + Sync {
    /// All variables of a path
    async fn list_variables(&self, path_id: PathId) -> BackendResult<Vec<Variable>>;

    /// Create a new row
    async fn create_variable(&self, request: &VariableWriteRequest) -> BackendResult<()>;

    /// Overwrite an existing row
    async fn update_variable(&self, request: &VariableWriteRequest) -> BackendResult<()>;
}

/// Access to step progress records
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    /// All progress records of a path
    async fn list_progress(&self, path_id: PathId) -> BackendResult<Vec<ProgressRecord>>;

    /// Insert or replace the record for one step
    async fn upsert_progress(&self, update: &ProgressUpdate) -> BackendResult<()>;
}

//! Step completion and selectability
//!
//! Completion is monotonic within a session: ids are only ever inserted into
//! the completed set. Every step of the definition is selectable from the
//! start, whether or not earlier steps are complete.

use crate::backend::{ProgressBackend, ProgressRecord, ProgressStatus, ProgressUpdate};
use crate::definition::{PathId, StepId, WorkflowStep};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Completed and selectable step sets of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    completed: BTreeSet<StepId>,
    selectable: BTreeSet<StepId>,
}

impl ProgressState {
    /// Seed from persisted records
    ///
    /// Only `success` records of `path_id` count as completed.
    pub fn seed(path_id: PathId, steps: &[WorkflowStep], records: &[ProgressRecord]) -> Self {
        let completed = records
            .iter()
            .filter(|r| r.path_id == path_id && r.status == ProgressStatus::Success)
            .map(|r| r.step_id)
            .collect();
        let selectable = steps.iter().map(|s| s.step_id).collect();
        Self {
            completed,
            selectable,
        }
    }

    /// Completed step ids
    pub fn completed(&self) -> &BTreeSet<StepId> {
        &self.completed
    }

    /// Selectable step ids
    pub fn selectable(&self) -> &BTreeSet<StepId> {
        &self.selectable
    }

    /// Whether `step_id` is complete
    pub fn is_completed(&self, step_id: StepId) -> bool {
        self.completed.contains(&step_id)
    }

    /// Whether `step_id` may be selected
    pub fn is_selectable(&self, step_id: StepId) -> bool {
        self.selectable.contains(&step_id)
    }

    /// Insert into the completed set; returns whether it was new
    pub fn insert_completed(&mut self, step_id: StepId) -> bool {
        self.completed.insert(step_id)
    }
}

/// Successor of `current` in ascending `step_id` order
///
/// `None` when `current` is the last step or not part of `steps`.
pub fn next_step_id(steps: &[WorkflowStep], current: StepId) -> Option<StepId> {
    let ids: BTreeSet<StepId> = steps.iter().map(|s| s.step_id).collect();
    if !ids.contains(&current) {
        return None;
    }
    ids.range(current..).nth(1).copied()
}

/// Persists step outcomes and maintains [`ProgressState`]
pub struct ProgressTracker {
    backend: Arc<dyn ProgressBackend>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker").finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Tracker over `backend`
    pub fn new(backend: Arc<dyn ProgressBackend>) -> Self {
        Self { backend }
    }

    /// Read the persisted records of a path and seed its state
    ///
    /// A failed read is logged and seeds an empty completed set.
    pub async fn load(&self, path_id: PathId, steps: &[WorkflowStep]) -> ProgressState {
        let records = match self.backend.list_progress(path_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to read progress for path {}: {}", path_id, e);
                Vec::new()
            }
        };
        let state = ProgressState::seed(path_id, steps, &records);
        debug!(
            "Path {} has {} of {} steps complete",
            path_id,
            state.completed.len(),
            steps.len()
        );
        state
    }

    /// Mark a step complete and persist a `success` record
    ///
    /// The record is written on every call; the local set changes only the
    /// first time. A failed write is logged and the local update is kept.
    pub async fn mark_complete(
        &self,
        state: &mut ProgressState,
        path_id: PathId,
        step_id: StepId,
    ) -> bool {
        let inserted = state.insert_completed(step_id);
        if inserted {
            debug!("Step {} of path {} complete", step_id, path_id);
        }

        let update = ProgressUpdate {
            path_id,
            step_id,
            status: ProgressStatus::Success,
            result_text: None,
            executed_at: Some(Utc::now()),
        };
        if let Err(e) = self.backend.upsert_progress(&update).await {
            warn!(
                "Failed to persist completion of step {} for path {}: {}",
                step_id, path_id, e
            );
        }
        inserted
    }

    /// Persist a `failed` record; the completed set is untouched
    pub async fn mark_failed(&self, path_id: PathId, step_id: StepId, result_text: Value) {
        let update = ProgressUpdate {
            path_id,
            step_id,
            status: ProgressStatus::Failed,
            result_text: Some(result_text),
            executed_at: Some(Utc::now()),
        };
        if let Err(e) = self.backend.upsert_progress(&update).await {
            warn!(
                "Failed to persist failure of step {} for path {}: {}",
                step_id, path_id, e
            );
        }
    }
}

//! Cancellable step commands
//!
//! Side effects started for a step run inside that step's [`CommandScope`].
//! When the user moves to another step the scope is cancelled: in-flight
//! futures are dropped at their next suspension point and results that still
//! arrive are discarded instead of being applied to the session.

use crate::backend::{Variable, VariableBackend};
use crate::definition::{PathId, StepId};
use crate::variables::{VariableIdentity, VariableStore};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation scope of one step
#[derive(Debug, Clone)]
pub struct CommandScope {
    step_id: StepId,
    generation: u64,
    token: CancellationToken,
}

impl CommandScope {
    /// Fresh scope for `step_id`
    pub fn new(step_id: StepId, generation: u64) -> Self {
        Self {
            step_id,
            generation,
            token: CancellationToken::new(),
        }
    }

    /// Step the scope belongs to
    pub fn step_id(&self) -> StepId {
        self.step_id
    }

    /// Counter distinguishing successive scopes of the same step
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel every command running in this scope
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!(
                "Cancelling commands of step {} (generation {})",
                self.step_id, self.generation
            );
        }
        self.token.cancel();
    }

    /// Whether the scope was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether `other` is this very scope rather than a later one
    pub fn same_as(&self, other: &CommandScope) -> bool {
        self.step_id == other.step_id && self.generation == other.generation
    }

    /// Run `future` unless the scope is cancelled first
    ///
    /// Returns `None` when cancelled; the future is dropped.
    pub async fn run<F, T>(&self, future: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = future => Some(output),
        }
    }
}

/// Detached read of a step's variables
///
/// Owns everything it needs so the host can spawn it; hand the result back
/// with `PathController::apply_prefill`.
#[derive(Clone)]
pub struct PrefillCommand {
    scope: CommandScope,
    path_id: PathId,
    identities: Vec<VariableIdentity>,
    backend: Arc<dyn VariableBackend>,
}

impl std::fmt::Debug for PrefillCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefillCommand")
            .field("scope", &self.scope)
            .field("path_id", &self.path_id)
            .field("identities", &self.identities)
            .finish()
    }
}

impl PrefillCommand {
    /// Command reading `identities` of `path_id` within `scope`
    pub fn new(
        scope: CommandScope,
        path_id: PathId,
        identities: Vec<VariableIdentity>,
        backend: Arc<dyn VariableBackend>,
    ) -> Self {
        Self {
            scope,
            path_id,
            identities,
            backend,
        }
    }

    /// Step the command is for
    pub fn step_id(&self) -> StepId {
        self.scope.step_id()
    }

    /// Perform the read
    pub async fn run(self) -> PrefillResult {
        let rows = self
            .scope
            .run(VariableStore::read_matching(
                self.backend.as_ref(),
                self.path_id,
                &self.identities,
            ))
            .await;
        PrefillResult {
            scope: self.scope,
            path_id: self.path_id,
            identities: self.identities,
            rows,
        }
    }
}

/// Outcome of a [`PrefillCommand`]
#[derive(Debug, Clone)]
pub struct PrefillResult {
    /// Scope the read ran in
    pub scope: CommandScope,
    /// Path that was read
    pub path_id: PathId,
    /// Identities the step owns
    pub identities: Vec<VariableIdentity>,
    /// Matching rows, `None` when the scope was cancelled
    pub rows: Option<Vec<Variable>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let scope = CommandScope::new(StepId::new(1), 1);
        assert_eq!(scope.run(async { 5 }).await, Some(5));
    }

    #[tokio::test]
    async fn test_cancelled_scope_drops_future() {
        let scope = CommandScope::new(StepId::new(1), 1);
        let handle = scope.clone();
        let task = tokio::spawn(async move {
            handle
                .run(tokio::time::sleep(Duration::from_secs(30)))
                .await
        });

        scope.cancel();
        assert_eq!(task.await.unwrap(), None);
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_same_as_compares_generation() {
        let a = CommandScope::new(StepId::new(1), 1);
        let b = CommandScope::new(StepId::new(1), 2);
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }

    #[tokio::test]
    async fn test_prefill_command_reads_matching_rows() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert_variable(Variable {
                path_id: PathId::new(1),
                variable_index: 2,
                variable_name: "brief".to_string(),
                rag_source_id: None,
                value: json!("hello"),
                created_at: None,
            })
            .await;

        let command = PrefillCommand::new(
            CommandScope::new(StepId::new(1), 1),
            PathId::new(1),
            vec![VariableIdentity::Index(2)],
            backend,
        );
        assert_eq!(command.step_id(), StepId::new(1));
        let result = command.run().await;
        assert_eq!(result.rows.unwrap().len(), 1);
    }
}

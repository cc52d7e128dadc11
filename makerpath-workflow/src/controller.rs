//! Session orchestration
//!
//! [`PathController`] owns the single [`PathSession`] of an open path and is
//! the only place that mutates it. Loading, step selection, input handling
//! and finalize all go through here; variable and progress persistence is
//! delegated to [`VariableStore`] and [`ProgressTracker`].

use crate::actions::{ActionDispatcher, ActionError, ExternalTransform, StepContext, StepInput, StepView};
use crate::backend::{
    HttpBackend, PathRecordBackend, PathRecordUpdate, PathStatus, ProgressBackend, Variable,
    VariableBackend,
};
use crate::commands::{CommandScope, PrefillCommand, PrefillResult};
use crate::definition::{PathCatalogEntry, PathId, StepId};
use crate::error::{ControllerError, ControllerResult};
use crate::parser::ParsedWorkflow;
use crate::progress::{next_step_id, ProgressState, ProgressTracker};
use crate::relay::{EventRelay, StepEvent};
use crate::session::{PathSession, SessionBlob, SessionMode, WizardPhase};
use crate::templates::TemplateLibrary;
use crate::variables::{VariableIdentity, VariableStore, WriteOutcome};
use chrono::Utc;
use makerpath_config::BackendConfig;
use makerpath_common::Pretty;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Where a session comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSource {
    /// A persisted path record
    Saved(PathId),
    /// A bundled template, instantiated for a new path record
    Template {
        /// Workflow key of the template
        key: String,
        /// Record the new session belongs to
        path_id: PathId,
    },
}

/// What a [`PathController::submit`] call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    /// Outcome of each variable write, in call order
    pub writes: Vec<WriteOutcome>,
    /// Whether the step was marked complete
    pub completed: bool,
    /// Whether the step's scope was cancelled before the submit finished
    pub cancelled: bool,
}

/// Top-level orchestrator of one path session
pub struct PathController {
    paths: Arc<dyn PathRecordBackend>,
    variables: VariableStore,
    progress: ProgressTracker,
    dispatcher: ActionDispatcher,
    templates: TemplateLibrary,
    transform: Option<Arc<dyn ExternalTransform>>,
    relay: EventRelay,
    session: Option<PathSession>,
    scopes: HashMap<StepId, CommandScope>,
    next_generation: u64,
}

impl std::fmt::Debug for PathController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathController")
            .field("templates", &self.templates.len())
            .field("has_transform", &self.transform.is_some())
            .field("session", &self.session)
            .field("scopes", &self.scopes.len())
            .finish()
    }
}

impl PathController {
    /// Controller over separate backends, with the bundled templates
    pub fn new(
        paths: Arc<dyn PathRecordBackend>,
        variables: Arc<dyn VariableBackend>,
        progress: Arc<dyn ProgressBackend>,
    ) -> Self {
        Self {
            paths,
            variables: VariableStore::new(variables),
            progress: ProgressTracker::new(progress),
            dispatcher: ActionDispatcher::new(),
            templates: TemplateLibrary::builtin(),
            transform: None,
            relay: EventRelay::new(),
            session: None,
            scopes: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Controller over one backend serving paths, variables and progress
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: PathRecordBackend + VariableBackend + ProgressBackend + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend)
    }

    /// Controller talking to the HTTP backing store described by `config`
    pub fn from_config(config: &BackendConfig) -> ControllerResult<Self> {
        let backend = HttpBackend::from_config(config)?;
        Ok(Self::from_backend(Arc::new(backend)))
    }

    /// Replace the template library
    pub fn with_templates(mut self, templates: TemplateLibrary) -> Self {
        self.templates = templates;
        self
    }

    /// Register the transform used by steps that need one
    pub fn with_transform(mut self, transform: Arc<dyn ExternalTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// The loaded session, if any
    pub fn session(&self) -> Option<&PathSession> {
        self.session.as_ref()
    }

    /// The variable store and its intent log
    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// Templates available for [`PathSource::Template`]
    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    /// Picker entries of the available templates
    pub fn catalog(&self) -> Vec<PathCatalogEntry> {
        self.templates.catalog()
    }

    fn session_ref(&self) -> ControllerResult<&PathSession> {
        self.session.as_ref().ok_or(ControllerError::NoSession)
    }

    fn session_mut(&mut self) -> ControllerResult<&mut PathSession> {
        self.session.as_mut().ok_or(ControllerError::NoSession)
    }

    /// Open a session, replacing any session already loaded
    ///
    /// Commands still running for the previous session are cancelled.
    pub async fn load(&mut self, source: PathSource) -> ControllerResult<&PathSession> {
        self.cancel_all_scopes();

        let session = match source {
            PathSource::Saved(path_id) => self.load_saved(path_id).await?,
            PathSource::Template { key, path_id } => {
                let template = self
                    .templates
                    .get(&key)
                    .cloned()
                    .ok_or(ControllerError::TemplateNotFound(key))?;
                let definition = template.definition;
                let progress = ProgressState::seed(path_id, &definition.steps, &[]);
                info!(
                    "Starting path {} from template '{}'",
                    path_id, template.key
                );
                PathSession::new(
                    path_id,
                    definition.steps,
                    progress,
                    PathStatus::InProgress,
                    WizardPhase::Steps,
                )
                .with_metadata(definition.stage_name, definition.output_type)
            }
        };

        self.install(session);
        self.session_ref()
    }

    async fn load_saved(&mut self, path_id: PathId) -> ControllerResult<PathSession> {
        let record = self.paths.get_path(path_id).await?;
        let blob = SessionBlob::decode(record.data.as_ref())
            .map_err(ControllerError::InvalidSessionData)?;

        let (steps, phase, stage_name, output_type) = match blob {
            Some(blob) => {
                let phase = blob
                    .active_tab
                    .as_deref()
                    .map(WizardPhase::from_tab)
                    .unwrap_or_default();
                (
                    blob.steps,
                    phase,
                    blob.stage_name.unwrap_or_else(|| record.title.clone()),
                    blob.output_type.unwrap_or_default(),
                )
            }
            None => (
                Vec::new(),
                WizardPhase::SelectTemplate,
                record.title.clone(),
                String::new(),
            ),
        };

        let progress = self.progress.load(path_id, &steps).await;
        let mut session = PathSession::new(path_id, steps, progress, record.status, phase)
            .with_metadata(stage_name, output_type);
        self.restore_selections(&mut session).await;

        info!(
            "Loaded path {} ({:?}, {} steps, {} complete, {:?} mode)",
            path_id,
            session.status(),
            session.steps().len(),
            session.progress().completed().len(),
            session.mode()
        );
        Ok(session)
    }

    /// Start a session from a freshly parsed definition
    pub async fn load_definition(
        &mut self,
        path_id: PathId,
        parsed: ParsedWorkflow,
    ) -> ControllerResult<&PathSession> {
        self.cancel_all_scopes();

        let definition = parsed.definition;
        let progress = self.progress.load(path_id, &definition.steps).await;
        let session = PathSession::new(
            path_id,
            definition.steps,
            progress,
            PathStatus::InProgress,
            WizardPhase::Steps,
        )
        .with_metadata(definition.stage_name, definition.output_type);
        info!("Starting path {} from definition '{}'", path_id, parsed.key);

        self.install(session);
        self.session_ref()
    }

    fn install(&mut self, session: PathSession) {
        let selected = session.selected_step_id();
        self.session = Some(session);
        if let Some(step_id) = selected {
            self.open_scope(step_id);
        }
    }

    /// Rebuild step selections from the stored variables
    ///
    /// Progress records stay authoritative for completion here; nothing is
    /// auto-completed.
    async fn restore_selections(&mut self, session: &mut PathSession) {
        let rows = match self.variables.read_all(session.path_id()).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    "Failed to read variables for path {}: {}",
                    session.path_id(),
                    e
                );
                return;
            }
        };

        let owned: Vec<(StepId, Vec<VariableIdentity>)> = session
            .steps()
            .iter()
            .map(|step| {
                let behavior = self.dispatcher.resolve(&step.action);
                (step.step_id, behavior.owned_identities(step))
            })
            .filter(|(_, identities)| !identities.is_empty())
            .collect();

        for (step_id, identities) in owned {
            self.variables
                .reconcile(session.path_id(), &identities, &rows);
            if let Some(value) = first_match(&identities, &rows) {
                session.selections.insert(step_id, value);
            }
        }
    }

    fn open_scope(&mut self, step_id: StepId) -> CommandScope {
        self.next_generation += 1;
        let scope = CommandScope::new(step_id, self.next_generation);
        if let Some(previous) = self.scopes.insert(step_id, scope.clone()) {
            previous.cancel();
        }
        scope
    }

    /// Live scope of a step, opened on demand
    fn scope_for(&mut self, step_id: StepId) -> CommandScope {
        match self.scopes.get(&step_id) {
            Some(scope) if !scope.is_cancelled() => scope.clone(),
            _ => self.open_scope(step_id),
        }
    }

    fn cancel_all_scopes(&mut self) {
        for (_, scope) in self.scopes.drain() {
            scope.cancel();
        }
    }

    fn is_live(&self, scope: &CommandScope) -> bool {
        self.scopes
            .get(&scope.step_id())
            .map(|live| live.same_as(scope) && !live.is_cancelled())
            .unwrap_or(false)
    }

    /// Scope of the selected step
    pub fn current_scope(&self) -> Option<CommandScope> {
        let selected = self.session.as_ref()?.selected_step_id()?;
        self.scopes.get(&selected).cloned()
    }

    /// Select a step
    ///
    /// Returns `false` when the step is not selectable. Commands of the
    /// previously selected step are cancelled.
    pub fn select_step(&mut self, step_id: StepId) -> ControllerResult<bool> {
        let session = self.session_ref()?;
        if !session.progress().is_selectable(step_id) {
            debug!("Step {} is not selectable", step_id);
            return Ok(false);
        }
        let previous = session.selected_step_id();
        if previous == Some(step_id) {
            return Ok(true);
        }

        if let Some(previous) = previous {
            if let Some(scope) = self.scopes.remove(&previous) {
                scope.cancel();
            }
        }
        self.session_mut()?.selected_step_id = Some(step_id);
        self.open_scope(step_id);
        debug!("Selected step {}", step_id);
        Ok(true)
    }

    /// Cancel everything still running for a step that left the screen
    pub fn unmount_step(&mut self, step_id: StepId) {
        if let Some(scope) = self.scopes.remove(&step_id) {
            scope.cancel();
        }
    }

    /// Detached prefill read for a step, `None` if the step owns no variables
    ///
    /// Run it wherever suits the host and hand the result to
    /// [`PathController::apply_prefill`].
    pub fn prefill_command(&mut self, step_id: StepId) -> ControllerResult<Option<PrefillCommand>> {
        let session = self.session_ref()?;
        let step = session
            .step(step_id)
            .ok_or(ControllerError::StepNotFound(step_id))?;
        let identities = self.dispatcher.resolve(&step.action).owned_identities(step);
        if identities.is_empty() {
            return Ok(None);
        }

        let path_id = session.path_id();
        let scope = self.scope_for(step_id);
        Ok(Some(PrefillCommand::new(
            scope,
            path_id,
            identities,
            self.variables.backend(),
        )))
    }

    /// Apply a finished prefill read
    ///
    /// Results from a cancelled or superseded scope are discarded. When any
    /// row matched, the step's selection is restored and, in edit mode, the
    /// step is marked complete. Returns whether the result was applied.
    pub async fn apply_prefill(&mut self, result: PrefillResult) -> ControllerResult<bool> {
        let step_id = result.scope.step_id();
        let Some(rows) = result.rows else {
            debug!("Prefill of step {} was cancelled", step_id);
            return Ok(false);
        };
        if !self.is_live(&result.scope) {
            debug!(
                "Discarding stale prefill of step {} (generation {})",
                step_id,
                result.scope.generation()
            );
            return Ok(false);
        }

        let session = self.session.as_mut().ok_or(ControllerError::NoSession)?;
        if session.path_id() != result.path_id {
            debug!("Discarding prefill for path {}", result.path_id);
            return Ok(false);
        }

        self.variables
            .reconcile(result.path_id, &result.identities, &rows);
        let Some(value) = first_match(&result.identities, &rows) else {
            return Ok(true);
        };
        debug!("Prefilled step {}: {}", step_id, Pretty(&value));
        session.selections.insert(step_id, value);

        if session.mode() == SessionMode::Edit {
            self.progress
                .mark_complete(&mut session.progress, result.path_id, step_id)
                .await;
        }
        Ok(true)
    }

    /// Prefill a step in place
    pub async fn mount_step(&mut self, step_id: StepId) -> ControllerResult<bool> {
        let Some(command) = self.prefill_command(step_id)? else {
            return Ok(false);
        };
        let result = command.run().await;
        self.apply_prefill(result).await
    }

    /// View of a step for the host to draw
    pub fn render_step(&self, step_id: StepId) -> ControllerResult<StepView> {
        let session = self.session_ref()?;
        let step = session
            .step(step_id)
            .ok_or(ControllerError::StepNotFound(step_id))?;
        let ctx = StepContext {
            path_id: session.path_id(),
            step,
            completed: session.is_completed(step_id),
            mode: session.mode(),
            selection: session.selection(step_id),
        };
        Ok(self.dispatcher.resolve(&step.action).render(&ctx))
    }

    /// Feed user input to a step
    ///
    /// Writes are issued in call order inside the step's scope. If the scope
    /// is cancelled midway the remaining writes are skipped and the step is
    /// not completed; unsettled writes stay in the intent log for replay.
    pub async fn submit(&mut self, step_id: StepId, input: StepInput) -> ControllerResult<SubmitReport> {
        let session = self.session_ref()?;
        if session.mode() == SessionMode::View {
            return Err(ControllerError::ReadOnly);
        }
        let path_id = session.path_id();
        let step = session
            .step(step_id)
            .cloned()
            .ok_or(ControllerError::StepNotFound(step_id))?;

        let outcome = self.dispatcher.resolve(&step.action).interpret(&step, input)?;
        let scope = self.scope_for(step_id);
        let mut report = SubmitReport::default();
        let mut writes = outcome.writes;

        if let Some(request) = outcome.transform {
            let transform = self
                .transform
                .clone()
                .ok_or_else(|| ActionError::TransformUnavailable {
                    action: step.action.to_string(),
                })?;
            let transformed = scope.run(transform.transform(&step, request.input)).await;
            match transformed {
                None => {
                    report.cancelled = true;
                    return Ok(report);
                }
                Some(Err(e)) => {
                    self.progress
                        .mark_failed(path_id, step_id, json!(e.to_string()))
                        .await;
                    return Err(e.into());
                }
                Some(Ok(value)) => {
                    let mut write = request.write;
                    write.value = value;
                    writes.push(write);
                }
            }
        }

        for write in writes {
            let value = write.value.clone();
            let written = scope.run(self.variables.write(path_id, write)).await;
            match written {
                Some(outcome) => {
                    report.writes.push(outcome);
                    self.session_mut()?.selections.insert(step_id, value);
                }
                None => {
                    debug!("Submit of step {} cancelled", step_id);
                    report.cancelled = true;
                    return Ok(report);
                }
            }
        }

        if outcome.complete {
            let session = self.session.as_mut().ok_or(ControllerError::NoSession)?;
            self.progress
                .mark_complete(&mut session.progress, path_id, step_id)
                .await;
            report.completed = true;
        }
        Ok(report)
    }

    /// Mark a step complete; returns whether it was newly completed
    pub async fn mark_complete(&mut self, step_id: StepId) -> ControllerResult<bool> {
        let session = self.session.as_mut().ok_or(ControllerError::NoSession)?;
        if session.mode() == SessionMode::View {
            return Err(ControllerError::ReadOnly);
        }
        if session.step(step_id).is_none() {
            return Err(ControllerError::StepNotFound(step_id));
        }
        let path_id = session.path_id();
        Ok(self
            .progress
            .mark_complete(&mut session.progress, path_id, step_id)
            .await)
    }

    /// Record a failed execution of a step
    pub async fn mark_failed(&mut self, step_id: StepId, result_text: Value) -> ControllerResult<()> {
        let session = self.session_ref()?;
        if session.step(step_id).is_none() {
            return Err(ControllerError::StepNotFound(step_id));
        }
        let path_id = session.path_id();
        self.progress.mark_failed(path_id, step_id, result_text).await;
        Ok(())
    }

    /// Move the selection to the next step by `step_id`
    ///
    /// At the last step the selection is left unchanged. Returns the
    /// selected step afterwards.
    pub fn advance(&mut self) -> ControllerResult<Option<StepId>> {
        let session = self.session_ref()?;
        let Some(current) = session.selected_step_id() else {
            return Ok(None);
        };
        if let Some(next) = next_step_id(session.steps(), current) {
            self.select_step(next)?;
        }
        Ok(self.session_ref()?.selected_step_id())
    }

    /// Leave view mode so a completed path can be modified
    pub fn enter_edit_mode(&mut self) -> ControllerResult<()> {
        let session = self.session_mut()?;
        if session.mode == SessionMode::View {
            info!("Path {} re-opened for editing", session.path_id());
            session.mode = SessionMode::Edit;
        }
        Ok(())
    }

    /// Change the wizard phase
    ///
    /// In view mode template selection is not reachable; the request lands on
    /// the export phase instead. Returns the phase now in effect.
    pub fn set_phase(&mut self, phase: WizardPhase) -> ControllerResult<WizardPhase> {
        let session = self.session_mut()?;
        session.phase = if session.mode == SessionMode::View && phase == WizardPhase::SelectTemplate {
            debug!("Read-only path redirected from template selection to export");
            WizardPhase::Export
        } else {
            phase
        };
        Ok(session.phase)
    }

    /// Persist the whole session and mark the path completed
    ///
    /// The record is updated in one call. Local mode switches to view only
    /// after that call succeeds.
    pub async fn finalize(&mut self) -> ControllerResult<()> {
        let session = self.session_ref()?;
        let path_id = session.path_id();
        let blob = session.to_blob(Utc::now());
        let data = serde_json::to_string(&blob)
            .map_err(|e| ControllerError::InvalidSessionData(e.to_string()))?;
        let update = PathRecordUpdate {
            data: Some(data),
            status: Some(PathStatus::Completed),
        };

        self.paths.update_path(path_id, &update).await?;

        let session = self.session_mut()?;
        session.status = PathStatus::Completed;
        session.mode = SessionMode::View;
        info!("Path {} finalized", path_id);
        Ok(())
    }

    /// Re-send variable writes that failed or were abandoned
    pub async fn replay_failed_writes(&mut self) -> ControllerResult<usize> {
        let path_id = self.session_ref()?.path_id();
        Ok(self.variables.replay_failed(path_id).await)
    }

    /// Rebroadcast an event to every rendered step surface
    pub fn relay(&self, event: StepEvent) -> usize {
        self.relay.relay(event)
    }

    /// Receive relayed events
    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.relay.subscribe()
    }
}

/// Value of the first row matching any identity, identities in order
fn first_match(identities: &[VariableIdentity], rows: &[Variable]) -> Option<Value> {
    identities
        .iter()
        .find_map(|identity| rows.iter().find(|row| row.matches(identity)))
        .map(|row| row.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::StepActionTag;
    use crate::backend::{MemoryBackend, PathRecord};
    use crate::definition::WorkflowStep;
    use crate::parser::WorkflowParser;
    use async_trait::async_trait;
    use std::time::Duration;

    const PATH: PathId = PathId::new(7);

    fn steps() -> Vec<WorkflowStep> {
        vec![
            WorkflowStep::new(3, "review", StepActionTag::Chat).with_variable_name("notes"),
            WorkflowStep::new(1, "brief", StepActionTag::TextInput).with_variable_name("brief"),
            WorkflowStep::new(2, "draft", StepActionTag::GenerateText).with_variable_index(2),
        ]
    }

    async fn backend_with_path(status: PathStatus, data: Option<Value>) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert_path(PathRecord {
                id: PATH,
                title: "Launch plan".to_string(),
                status,
                data,
            })
            .await;
        backend
    }

    fn blob(steps: Vec<WorkflowStep>) -> Value {
        Value::String(
            serde_json::to_string(&json!({ "steps": steps, "activeTab": "steps" })).unwrap(),
        )
    }

    async fn loaded() -> (Arc<MemoryBackend>, PathController) {
        let backend = backend_with_path(PathStatus::InProgress, Some(blob(steps()))).await;
        let mut controller = PathController::from_backend(backend.clone());
        controller.load(PathSource::Saved(PATH)).await.unwrap();
        (backend, controller)
    }

    fn variable(name: &str, index: i64, value: Value) -> Variable {
        Variable {
            path_id: PATH,
            variable_index: index,
            variable_name: name.to_string(),
            rag_source_id: None,
            value,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_load_saved_orders_steps() {
        let (_, controller) = loaded().await;
        let session = controller.session().unwrap();
        let ids: Vec<i64> = session.steps().iter().map(|s| s.step_id.value()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(session.selected_step_id(), Some(StepId::new(1)));
        assert_eq!(session.mode(), SessionMode::Edit);
        assert_eq!(session.stage_name(), "Launch plan");
        assert_eq!(session.progress().selectable().len(), 3);
    }

    #[tokio::test]
    async fn test_load_missing_path_is_persistence_error() {
        let mut controller = PathController::from_backend(Arc::new(MemoryBackend::new()));
        let error = controller.load(PathSource::Saved(PATH)).await.unwrap_err();
        assert!(matches!(error, ControllerError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_load_invalid_data() {
        let backend =
            backend_with_path(PathStatus::InProgress, Some(json!({"description": "x"}))).await;
        let mut controller = PathController::from_backend(backend);
        let error = controller.load(PathSource::Saved(PATH)).await.unwrap_err();
        assert!(matches!(error, ControllerError::InvalidSessionData(_)));
    }

    #[tokio::test]
    async fn test_load_record_without_data_starts_at_template_selection() {
        let backend = backend_with_path(PathStatus::Draft, None).await;
        let mut controller = PathController::from_backend(backend);
        let session = controller.load(PathSource::Saved(PATH)).await.unwrap();
        assert!(session.steps().is_empty());
        assert_eq!(session.phase(), WizardPhase::SelectTemplate);
        assert_eq!(session.selected_step_id(), None);
    }

    #[tokio::test]
    async fn test_load_template() {
        let mut controller = PathController::from_backend(Arc::new(MemoryBackend::new()));
        let session = controller
            .load(PathSource::Template {
                key: "market_report".to_string(),
                path_id: PATH,
            })
            .await
            .unwrap();
        assert!(!session.steps().is_empty());
        assert_eq!(session.status(), PathStatus::InProgress);
        assert_eq!(session.mode(), SessionMode::Edit);

        let error = controller
            .load(PathSource::Template {
                key: "missing".to_string(),
                path_id: PATH,
            })
            .await
            .unwrap_err();
        assert!(matches!(error, ControllerError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn test_load_definition() {
        let parsed = WorkflowParser::parse(
            r#""wf":{"stage_name":"Mine","steps":[{"step_id":2,"name":"b","action":"chat"},{"step_id":1,"name":"a","action":"text_input"},]}"#,
        )
        .unwrap();
        let mut controller = PathController::from_backend(Arc::new(MemoryBackend::new()));
        let session = controller.load_definition(PATH, parsed).await.unwrap();
        assert_eq!(session.stage_name(), "Mine");
        assert_eq!(session.selected_step_id(), Some(StepId::new(1)));
    }

    #[tokio::test]
    async fn test_advance_stops_at_last_step() {
        let (_, mut controller) = loaded().await;
        assert_eq!(controller.advance().unwrap(), Some(StepId::new(2)));
        assert_eq!(controller.advance().unwrap(), Some(StepId::new(3)));
        assert_eq!(controller.advance().unwrap(), Some(StepId::new(3)));
    }

    #[tokio::test]
    async fn test_select_unknown_step_is_refused() {
        let (_, mut controller) = loaded().await;
        assert!(!controller.select_step(StepId::new(99)).unwrap());
        assert!(controller.select_step(StepId::new(3)).unwrap());
        assert_eq!(
            controller.session().unwrap().selected_step_id(),
            Some(StepId::new(3))
        );
    }

    #[tokio::test]
    async fn test_submit_writes_and_completes() {
        let (backend, mut controller) = loaded().await;
        let report = controller
            .submit(StepId::new(1), StepInput::Text("Ship it".to_string()))
            .await
            .unwrap();

        assert_eq!(report.writes, vec![WriteOutcome::Created]);
        assert!(report.completed);
        let session = controller.session().unwrap();
        assert!(session.is_completed(StepId::new(1)));
        assert_eq!(session.selection(StepId::new(1)), Some(&json!("Ship it")));
        assert_eq!(backend.variables(PATH).await.len(), 1);

        let again = controller
            .submit(StepId::new(1), StepInput::Text("Ship it".to_string()))
            .await
            .unwrap();
        assert_eq!(again.writes, vec![WriteOutcome::Unchanged]);
        assert_eq!(backend.calls().variable_writes(), 1);
    }

    #[tokio::test]
    async fn test_chat_write_does_not_complete() {
        let (_, mut controller) = loaded().await;
        let report = controller
            .submit(StepId::new(3), StepInput::Generated(json!("answer")))
            .await
            .unwrap();
        assert!(!report.completed);
        assert!(!controller.session().unwrap().is_completed(StepId::new(3)));
    }

    #[tokio::test]
    async fn test_submit_unknown_step() {
        let (_, mut controller) = loaded().await;
        let error = controller
            .submit(StepId::new(42), StepInput::MarkComplete)
            .await
            .unwrap_err();
        assert!(matches!(error, ControllerError::StepNotFound(_)));
    }

    #[tokio::test]
    async fn test_mount_prefills_and_auto_completes() {
        let (backend, mut controller) = loaded().await;
        backend
            .insert_variable(variable("brief", 0, json!("from server")))
            .await;

        assert!(controller.mount_step(StepId::new(1)).await.unwrap());
        let session = controller.session().unwrap();
        assert!(session.is_completed(StepId::new(1)));
        assert_eq!(session.selection(StepId::new(1)), Some(&json!("from server")));

        // The row is known to exist now, so a new value is an update
        let report = controller
            .submit(StepId::new(1), StepInput::Text("edited".to_string()))
            .await
            .unwrap();
        assert_eq!(report.writes, vec![WriteOutcome::Updated]);
        assert_eq!(backend.calls().create_variable, 0);
    }

    #[tokio::test]
    async fn test_edit_after_prefill_updates_row_under_its_own_index() {
        let (backend, mut controller) = loaded().await;
        backend
            .insert_variable(variable("brief", 5, json!("from server")))
            .await;

        assert!(controller.mount_step(StepId::new(1)).await.unwrap());
        let report = controller
            .submit(StepId::new(1), StepInput::Text("edited".to_string()))
            .await
            .unwrap();
        assert_eq!(report.writes, vec![WriteOutcome::Updated]);
        assert_eq!(backend.calls().create_variable, 0);

        let rows = backend.variables(PATH).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].variable_index, 5);
        assert_eq!(rows[0].value, json!("edited"));
        assert_eq!(controller.variables().unsettled_count(PATH), 0);
    }

    #[tokio::test]
    async fn test_mount_without_rows_does_not_complete() {
        let (_, mut controller) = loaded().await;
        assert!(controller.mount_step(StepId::new(2)).await.unwrap());
        assert!(!controller.session().unwrap().is_completed(StepId::new(2)));
    }

    #[tokio::test]
    async fn test_stale_prefill_is_discarded() {
        let (backend, mut controller) = loaded().await;
        backend
            .insert_variable(variable("brief", 0, json!("late")))
            .await;
        backend.set_read_delay(Duration::from_millis(200));

        let command = controller.prefill_command(StepId::new(1)).unwrap().unwrap();
        let pending = tokio::spawn(command.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.select_step(StepId::new(2)).unwrap();

        let result = pending.await.unwrap();
        assert!(!controller.apply_prefill(result).await.unwrap());
        let session = controller.session().unwrap();
        assert!(!session.is_completed(StepId::new(1)));
        assert_eq!(session.selection(StepId::new(1)), None);
    }

    #[tokio::test]
    async fn test_superseded_result_is_discarded_even_with_rows() {
        let (_, mut controller) = loaded().await;
        let old_scope = controller.current_scope().unwrap();
        controller.select_step(StepId::new(2)).unwrap();
        controller.select_step(StepId::new(1)).unwrap();

        let result = PrefillResult {
            scope: old_scope,
            path_id: PATH,
            identities: vec![VariableIdentity::Name("brief".to_string())],
            rows: Some(vec![variable("brief", 0, json!("old"))]),
        };
        assert!(!controller.apply_prefill(result).await.unwrap());
        assert!(!controller.session().unwrap().is_completed(StepId::new(1)));
    }

    #[tokio::test]
    async fn test_view_mode_is_read_only() {
        let backend = backend_with_path(PathStatus::Completed, Some(blob(steps()))).await;
        let mut controller = PathController::from_backend(backend);
        controller.load(PathSource::Saved(PATH)).await.unwrap();

        assert_eq!(controller.session().unwrap().mode(), SessionMode::View);
        let error = controller
            .submit(StepId::new(1), StepInput::Text("x".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(error, ControllerError::ReadOnly));
        assert!(controller.render_step(StepId::new(1)).unwrap().read_only);

        assert_eq!(
            controller.set_phase(WizardPhase::SelectTemplate).unwrap(),
            WizardPhase::Export
        );
        controller.enter_edit_mode().unwrap();
        assert_eq!(controller.session().unwrap().mode(), SessionMode::Edit);
        assert_eq!(
            controller.set_phase(WizardPhase::SelectTemplate).unwrap(),
            WizardPhase::SelectTemplate
        );
    }

    #[tokio::test]
    async fn test_view_mode_prefill_does_not_complete() {
        let backend = backend_with_path(PathStatus::Completed, Some(blob(steps()))).await;
        let mut controller = PathController::from_backend(backend.clone());
        controller.load(PathSource::Saved(PATH)).await.unwrap();
        backend
            .insert_variable(variable("brief", 0, json!("kept")))
            .await;

        controller.mount_step(StepId::new(1)).await.unwrap();
        let session = controller.session().unwrap();
        assert_eq!(session.selection(StepId::new(1)), Some(&json!("kept")));
        assert!(!session.is_completed(StepId::new(1)));
        assert_eq!(backend.calls().upsert_progress, 0);
    }

    #[tokio::test]
    async fn test_finalize_failure_keeps_edit_mode() {
        let (backend, mut controller) = loaded().await;
        backend.set_fail_writes(true);
        let error = controller.finalize().await.unwrap_err();
        assert!(matches!(error, ControllerError::Persistence(_)));
        assert_eq!(controller.session().unwrap().mode(), SessionMode::Edit);
    }

    #[tokio::test]
    async fn test_finalize_switches_to_view() {
        let (backend, mut controller) = loaded().await;
        controller.finalize().await.unwrap();
        assert_eq!(controller.session().unwrap().mode(), SessionMode::View);
        assert_eq!(backend.calls().update_path, 1);
        assert_eq!(
            backend.path(PATH).await.unwrap().status,
            PathStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failed_writes_are_replayed() {
        let (backend, mut controller) = loaded().await;
        backend.set_fail_writes(true);
        let report = controller
            .submit(StepId::new(1), StepInput::Text("offline".to_string()))
            .await
            .unwrap();
        assert_eq!(report.writes, vec![WriteOutcome::Failed]);
        assert!(controller.session().unwrap().is_completed(StepId::new(1)));

        backend.set_fail_writes(false);
        assert_eq!(controller.replay_failed_writes().await.unwrap(), 1);
        assert_eq!(backend.variables(PATH).await[0].value, json!("offline"));
    }

    #[derive(Debug)]
    struct Uppercase;

    #[async_trait]
    impl ExternalTransform for Uppercase {
        async fn transform(&self, _step: &WorkflowStep, input: Value) -> crate::actions::ActionResult<Value> {
            Ok(json!(input.as_str().unwrap_or_default().to_uppercase()))
        }
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl ExternalTransform for Broken {
        async fn transform(&self, _step: &WorkflowStep, _input: Value) -> crate::actions::ActionResult<Value> {
            Err(ActionError::TransformFailed("parser crashed".to_string()))
        }
    }

    async fn translation_controller(transform: Option<Arc<dyn ExternalTransform>>) -> (Arc<MemoryBackend>, PathController) {
        let steps = vec![WorkflowStep::new(1, "extract", StepActionTag::TranslationExtract)
            .with_variable_name("strings")];
        let backend = backend_with_path(PathStatus::InProgress, Some(blob(steps))).await;
        let mut controller = PathController::from_backend(backend.clone());
        if let Some(transform) = transform {
            controller = controller.with_transform(transform);
        }
        controller.load(PathSource::Saved(PATH)).await.unwrap();
        (backend, controller)
    }

    #[tokio::test]
    async fn test_transform_output_is_written() {
        let (backend, mut controller) = translation_controller(Some(Arc::new(Uppercase))).await;
        let report = controller
            .submit(StepId::new(1), StepInput::Text("hello".to_string()))
            .await
            .unwrap();
        assert!(report.completed);
        assert_eq!(backend.variables(PATH).await[0].value, json!("HELLO"));
    }

    #[tokio::test]
    async fn test_missing_transform() {
        let (_, mut controller) = translation_controller(None).await;
        let error = controller
            .submit(StepId::new(1), StepInput::Text("hello".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ControllerError::Action(ActionError::TransformUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_transform_records_failure() {
        let (backend, mut controller) = translation_controller(Some(Arc::new(Broken))).await;
        assert!(controller
            .submit(StepId::new(1), StepInput::Text("hello".to_string()))
            .await
            .is_err());
        let record = backend.progress(PATH, StepId::new(1)).await.unwrap();
        assert_eq!(record.status, crate::backend::ProgressStatus::Failed);
        assert!(!controller.session().unwrap().is_completed(StepId::new(1)));
    }

    #[tokio::test]
    async fn test_relay_rebroadcasts() {
        let (_, controller) = loaded().await;
        let mut first = controller.subscribe();
        let mut second = controller.subscribe();
        let event = StepEvent::AnchorClicked {
            step_id: StepId::new(2),
            anchor: "#summary".to_string(),
        };
        assert_eq!(controller.relay(event.clone()), 2);
        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[test]
    fn test_no_session_errors() {
        let mut controller = PathController::from_backend(Arc::new(MemoryBackend::new()));
        assert!(matches!(
            controller.select_step(StepId::new(1)),
            Err(ControllerError::NoSession)
        ));
        assert!(matches!(
            controller.render_step(StepId::new(1)),
            Err(ControllerError::NoSession)
        ));
        assert!(!controller.catalog().is_empty());
    }
}

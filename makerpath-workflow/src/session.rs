//! In-memory path session and its persisted form

use crate::backend::PathStatus;
use crate::definition::{sort_steps, PathId, StepId, WorkflowStep};
use crate::parser::WorkflowParser;
use crate::progress::ProgressState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Whether the session accepts changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Steps can be worked on
    #[default]
    Edit,
    /// Read-only view of a completed path
    View,
}

/// Top-level wizard phase, persisted as `activeTab`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WizardPhase {
    /// Choosing a template
    SelectTemplate,
    /// Working through the steps
    #[default]
    Steps,
    /// Exporting the result
    Export,
}

impl WizardPhase {
    /// Name stored in `activeTab`
    pub fn as_tab(&self) -> &'static str {
        match self {
            WizardPhase::SelectTemplate => "select_template",
            WizardPhase::Steps => "steps",
            WizardPhase::Export => "export",
        }
    }

    /// Read a stored tab name; anything unrecognized is [`WizardPhase::Steps`]
    pub fn from_tab(tab: &str) -> Self {
        match tab.trim() {
            "select_template" | "selectTemplate" | "template" => WizardPhase::SelectTemplate,
            "export" => WizardPhase::Export,
            _ => WizardPhase::Steps,
        }
    }
}

/// The persisted session blob stored in a path record's `data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBlob {
    /// Steps; older records store them under `modules`
    #[serde(alias = "modules", default)]
    pub steps: Vec<WorkflowStep>,
    /// Wizard phase name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tab: Option<String>,
    /// Kind of document produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    /// Workflow title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    /// When the path was finalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionBlob {
    /// Decode a record's `data` field
    ///
    /// Accepts a JSON string or structured JSON, with the steps under `steps`
    /// or `modules`. A raw workflow definition is accepted too and goes
    /// through the parser. `None` or blank data yields `Ok(None)`.
    pub fn decode(data: Option<&Value>) -> Result<Option<Self>, String> {
        let document = match data {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => return Ok(None),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(document) => document,
                Err(_) => return Self::from_definition_text(text).map(Some),
            },
            Some(document) => document.clone(),
        };

        let is_blob = document
            .as_object()
            .map(|o| o.contains_key("steps") || o.contains_key("modules"))
            .unwrap_or(false);

        if is_blob {
            serde_json::from_value(document)
                .map(Some)
                .map_err(|e| format!("session data is malformed: {e}"))
        } else {
            Self::from_definition_text(&document.to_string()).map(Some)
        }
    }

    fn from_definition_text(text: &str) -> Result<Self, String> {
        let parsed = WorkflowParser::parse(text).map_err(|e| e.user_message())?;
        debug!("Session data holds a raw workflow definition '{}'", parsed.key);
        Ok(Self {
            steps: parsed.definition.steps,
            active_tab: None,
            output_type: Some(parsed.definition.output_type),
            stage_name: Some(parsed.definition.stage_name),
            completed_at: None,
        })
    }
}

/// State of one open path, owned by the controller
#[derive(Debug, Clone, PartialEq)]
pub struct PathSession {
    pub(crate) path_id: PathId,
    pub(crate) steps: Vec<WorkflowStep>,
    pub(crate) selected_step_id: Option<StepId>,
    pub(crate) progress: ProgressState,
    pub(crate) mode: SessionMode,
    pub(crate) status: PathStatus,
    pub(crate) phase: WizardPhase,
    pub(crate) stage_name: String,
    pub(crate) output_type: String,
    pub(crate) selections: BTreeMap<StepId, Value>,
}

impl PathSession {
    /// New session with the first step selected
    ///
    /// Steps are kept in ascending `step_id` order. In view mode a stored
    /// [`WizardPhase::SelectTemplate`] is replaced by [`WizardPhase::Export`].
    pub fn new(
        path_id: PathId,
        mut steps: Vec<WorkflowStep>,
        progress: ProgressState,
        status: PathStatus,
        phase: WizardPhase,
    ) -> Self {
        sort_steps(&mut steps);
        let mode = if status == PathStatus::Completed {
            SessionMode::View
        } else {
            SessionMode::Edit
        };
        let phase = if mode == SessionMode::View && phase == WizardPhase::SelectTemplate {
            WizardPhase::Export
        } else {
            phase
        };

        Self {
            path_id,
            selected_step_id: steps.first().map(|s| s.step_id),
            steps,
            progress,
            mode,
            status,
            phase,
            stage_name: String::new(),
            output_type: String::new(),
            selections: BTreeMap::new(),
        }
    }

    /// Set the title and output type
    pub fn with_metadata(mut self, stage_name: impl Into<String>, output_type: impl Into<String>) -> Self {
        self.stage_name = stage_name.into();
        self.output_type = output_type.into();
        self
    }

    /// Path the session belongs to
    pub fn path_id(&self) -> PathId {
        self.path_id
    }

    /// Steps in ascending `step_id` order
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Step by id
    pub fn step(&self, step_id: StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Currently selected step
    pub fn selected_step_id(&self) -> Option<StepId> {
        self.selected_step_id
    }

    /// Completed and selectable sets
    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    /// Whether a step is complete
    pub fn is_completed(&self, step_id: StepId) -> bool {
        self.progress.is_completed(step_id)
    }

    /// Session mode
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Record status
    pub fn status(&self) -> PathStatus {
        self.status
    }

    /// Wizard phase
    pub fn phase(&self) -> WizardPhase {
        self.phase
    }

    /// Workflow title
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Kind of document produced
    pub fn output_type(&self) -> &str {
        &self.output_type
    }

    /// Value held for a step
    pub fn selection(&self, step_id: StepId) -> Option<&Value> {
        self.selections.get(&step_id)
    }

    /// Values held for all steps
    pub fn selections(&self) -> &BTreeMap<StepId, Value> {
        &self.selections
    }

    /// Whether every required step is complete
    pub fn required_steps_complete(&self) -> bool {
        self.steps
            .iter()
            .filter(|s| s.required)
            .all(|s| self.progress.is_completed(s.step_id))
    }

    /// Blob persisted on finalize
    pub fn to_blob(&self, completed_at: DateTime<Utc>) -> SessionBlob {
        SessionBlob {
            steps: self.steps.clone(),
            active_tab: Some(self.phase.as_tab().to_string()),
            output_type: Some(self.output_type.clone()),
            stage_name: Some(self.stage_name.clone()),
            completed_at: Some(completed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::StepActionTag;
    use serde_json::json;

    fn steps(ids: &[i64]) -> Vec<WorkflowStep> {
        ids.iter()
            .map(|id| WorkflowStep::new(*id, format!("s{id}"), StepActionTag::TextInput))
            .collect()
    }

    #[test]
    fn test_phase_tabs() {
        assert_eq!(WizardPhase::from_tab("export"), WizardPhase::Export);
        assert_eq!(
            WizardPhase::from_tab("select_template"),
            WizardPhase::SelectTemplate
        );
        assert_eq!(WizardPhase::from_tab("somewhere"), WizardPhase::Steps);
        assert_eq!(WizardPhase::Export.as_tab(), "export");
    }

    #[test]
    fn test_session_orders_steps_and_selects_first() {
        let session = PathSession::new(
            PathId::new(1),
            steps(&[3, 1, 2]),
            ProgressState::default(),
            PathStatus::InProgress,
            WizardPhase::Steps,
        );
        let ids: Vec<i64> = session.steps().iter().map(|s| s.step_id.value()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(session.selected_step_id(), Some(StepId::new(1)));
        assert_eq!(session.mode(), SessionMode::Edit);
    }

    #[test]
    fn test_completed_status_opens_in_view_mode_at_export() {
        let session = PathSession::new(
            PathId::new(1),
            steps(&[1]),
            ProgressState::default(),
            PathStatus::Completed,
            WizardPhase::SelectTemplate,
        );
        assert_eq!(session.mode(), SessionMode::View);
        assert_eq!(session.phase(), WizardPhase::Export);
    }

    #[test]
    fn test_decode_string_blob_with_modules_alias() {
        let data = json!(r#"{"modules":[{"step_id":1,"name":"a","action":"chat"}],"activeTab":"export"}"#);
        let blob = SessionBlob::decode(Some(&data)).unwrap().unwrap();
        assert_eq!(blob.steps.len(), 1);
        assert_eq!(blob.active_tab.as_deref(), Some("export"));
    }

    #[test]
    fn test_decode_structured_blob() {
        let data = json!({"steps": [], "stageName": "Plan", "outputType": "doc"});
        let blob = SessionBlob::decode(Some(&data)).unwrap().unwrap();
        assert!(blob.steps.is_empty());
        assert_eq!(blob.stage_name.as_deref(), Some("Plan"));
    }

    #[test]
    fn test_decode_raw_definition() {
        let data = json!({"wf": {"stage_name": "Plan", "steps": [{"step_id": 1, "name": "a", "action": "chat"}]}});
        let blob = SessionBlob::decode(Some(&data)).unwrap().unwrap();
        assert_eq!(blob.steps.len(), 1);
        assert_eq!(blob.stage_name.as_deref(), Some("Plan"));

        let fragment = json!(r#""wf": {"steps": [{"step_id": 1, "name": "a", "action": "chat"},]}"#);
        assert_eq!(SessionBlob::decode(Some(&fragment)).unwrap().unwrap().steps.len(), 1);
    }

    #[test]
    fn test_decode_empty_and_invalid() {
        assert_eq!(SessionBlob::decode(None).unwrap(), None);
        assert_eq!(SessionBlob::decode(Some(&Value::Null)).unwrap(), None);
        assert_eq!(SessionBlob::decode(Some(&json!("  "))).unwrap(), None);
        assert!(SessionBlob::decode(Some(&json!({"description": "x"}))).is_err());
        assert!(SessionBlob::decode(Some(&json!({"steps": "nope"}))).is_err());
    }

    #[test]
    fn test_blob_uses_camel_case() {
        let session = PathSession::new(
            PathId::new(1),
            steps(&[1]),
            ProgressState::default(),
            PathStatus::InProgress,
            WizardPhase::Export,
        )
        .with_metadata("Plan", "document");
        let blob = serde_json::to_value(session.to_blob(Utc::now())).unwrap();

        assert_eq!(blob["activeTab"], json!("export"));
        assert_eq!(blob["stageName"], json!("Plan"));
        assert_eq!(blob["outputType"], json!("document"));
        assert!(blob.get("completedAt").is_some());
        assert_eq!(blob["steps"][0]["step_id"], json!(1));
    }
}

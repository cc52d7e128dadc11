//! Workflow definition types
//!
//! A [`WorkflowDefinition`] is what the parser produces from a pasted or
//! generated JSON document. It is immutable once loaded; a new definition is
//! obtained by parsing again.

use crate::actions::StepActionTag;
use crate::variables::VariableIdentity;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// Identifier of a step, unique within one definition
///
/// Steps are always presented and navigated in ascending `StepId` order,
/// whatever order they had in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StepId(i64);

impl StepId {
    /// Create a new step id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Numeric value
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for StepId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for StepId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Generated definitions sometimes quote the id
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawStepId {
            Number(i64),
            Text(String),
        }

        match RawStepId::deserialize(deserializer)? {
            RawStepId::Number(id) => Ok(Self(id)),
            RawStepId::Text(text) => text.trim().parse::<i64>().map(Self).map_err(|_| {
                serde::de::Error::custom(format!("step_id '{text}' is not an integer"))
            }),
        }
    }
}

/// Identifier of a path record in the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId(i64);

impl PathId {
    /// Create a new path id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Numeric value
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for PathId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of a required file; documents use both numbers and strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileRefId {
    /// Numeric id
    Number(i64),
    /// Text id
    Text(String),
}

/// A file the workflow expects the user to provide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredFile {
    /// File id
    pub id: FileRefId,
    /// Display name
    #[serde(default)]
    pub name: String,
}

/// One node in a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique id within the definition
    pub step_id: StepId,
    /// Internal identifier, never translated
    pub name: String,
    /// Optional user-facing label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Behavior tag
    pub action: StepActionTag,
    /// Where the step reads its input from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_source_type: Option<String>,
    /// Name of the variable holding the step's input file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file_variable: Option<String>,
    /// Index of the variable holding the step's input file
    #[serde(
        default,
        rename = "input_file_variable_index_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_file_variable_index: Option<i64>,
    /// Prompt shown to the user or sent to a generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_prompt: Option<String>,
    /// Index of the variable this step writes
    #[serde(
        default,
        rename = "variable_index_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub variable_index: Option<i64>,
    /// Name of the variable this step writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    /// Whether the step must be completed before finalizing
    #[serde(default)]
    pub required: bool,
    /// Expected output format of generated content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl WorkflowStep {
    /// Create a step with only the mandatory fields set
    pub fn new(step_id: i64, name: impl Into<String>, action: StepActionTag) -> Self {
        Self {
            step_id: StepId::new(step_id),
            name: name.into(),
            display_name: None,
            action,
            input_source_type: None,
            input_file_variable: None,
            input_file_variable_index: None,
            input_prompt: None,
            variable_index: None,
            variable_name: None,
            required: false,
            output_format: None,
        }
    }

    /// Set the variable index
    pub fn with_variable_index(mut self, index: i64) -> Self {
        self.variable_index = Some(index);
        self
    }

    /// Set the variable name
    pub fn with_variable_name(mut self, name: impl Into<String>) -> Self {
        self.variable_name = Some(name.into());
        self
    }

    /// Set the input prompt
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.input_prompt = Some(prompt.into());
        self
    }

    /// Label to show the user
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or(&self.name)
    }

    /// Identity keyed by `variable_index_number`, if the step has one
    pub fn index_identity(&self) -> Option<VariableIdentity> {
        self.variable_index.map(VariableIdentity::Index)
    }

    /// Identity keyed by `variable_name`, if the step has a non-blank one
    pub fn name_identity(&self) -> Option<VariableIdentity> {
        self.variable_name
            .as_ref()
            .filter(|name| !name.trim().is_empty())
            .map(|name| VariableIdentity::Name(name.clone()))
    }
}

/// A parsed workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Title of the workflow
    #[serde(default)]
    pub stage_name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Kind of document the workflow produces
    #[serde(default)]
    pub output_type: String,
    /// Files the user is expected to supply
    #[serde(default)]
    pub required_files: Vec<RequiredFile>,
    /// Variable indexes that must exist before finalizing
    #[serde(default)]
    pub required_variables: Vec<i64>,
    /// Steps in source order
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Steps in ascending `step_id` order
    pub fn ordered_steps(&self) -> Vec<&WorkflowStep> {
        let mut steps: Vec<&WorkflowStep> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.step_id);
        steps
    }

    /// Look up a step by id
    pub fn step(&self, step_id: StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    /// Validate the definition structure
    pub fn validate_structure(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        if self.steps.is_empty() {
            errors.push("Workflow must contain at least one step".to_string());
        }

        for step in &self.steps {
            if !seen.insert(step.step_id) {
                errors.push(format!("Duplicate step_id {}", step.step_id));
            }
            if step.name.trim().is_empty() {
                errors.push(format!("Step {} has an empty name", step.step_id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Sort steps in place by ascending `step_id`
pub fn sort_steps(steps: &mut [WorkflowStep]) {
    steps.sort_by_key(|step| step.step_id);
}

/// Entry shown in a path picker for a parsed or bundled workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathCatalogEntry {
    /// Workflow key
    pub id: String,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Kind of document produced
    pub output_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: i64) -> WorkflowStep {
        WorkflowStep::new(id, format!("step_{id}"), StepActionTag::TextInput)
    }

    #[test]
    fn test_step_id_accepts_numeric_string() {
        let id: StepId = serde_json::from_value(json!("7")).unwrap();
        assert_eq!(id, StepId::new(7));

        let id: StepId = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(id.value(), 3);

        assert!(serde_json::from_value::<StepId>(json!("seven")).is_err());
    }

    #[test]
    fn test_step_deserializes_document_field_names() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "step_id": 2,
            "name": "pick_files",
            "action": "select_files",
            "variable_index_number": 4,
            "input_file_variable_index_number": 1,
            "output_format": "markdown"
        }))
        .unwrap();

        assert_eq!(step.step_id, StepId::new(2));
        assert_eq!(step.action, StepActionTag::SelectFiles);
        assert_eq!(step.variable_index, Some(4));
        assert_eq!(step.input_file_variable_index, Some(1));
        assert!(!step.required);
        assert_eq!(step.output_format.as_deref(), Some("markdown"));
    }

    #[test]
    fn test_ordered_steps_ascending() {
        let definition = WorkflowDefinition {
            stage_name: String::new(),
            description: String::new(),
            output_type: String::new(),
            required_files: Vec::new(),
            required_variables: Vec::new(),
            steps: vec![step(1), step(3), step(2)],
        };

        let ids: Vec<i64> = definition
            .ordered_steps()
            .iter()
            .map(|s| s.step_id.value())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(definition.step(StepId::new(3)).unwrap().name, "step_3");
    }

    #[test]
    fn test_validate_structure_reports_duplicates() {
        let definition = WorkflowDefinition {
            stage_name: "Report".to_string(),
            description: String::new(),
            output_type: String::new(),
            required_files: Vec::new(),
            required_variables: Vec::new(),
            steps: vec![step(1), step(1)],
        };

        let errors = definition.validate_structure().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Duplicate step_id 1")));
    }

    #[test]
    fn test_label_falls_back_to_name() {
        let mut s = step(1);
        assert_eq!(s.label(), "step_1");
        s.display_name = Some("Describe your product".to_string());
        assert_eq!(s.label(), "Describe your product");
    }

    #[test]
    fn test_identities() {
        let s = step(1).with_variable_index(5).with_variable_name("summary");
        assert_eq!(s.index_identity(), Some(VariableIdentity::Index(5)));
        assert_eq!(
            s.name_identity(),
            Some(VariableIdentity::Name("summary".to_string()))
        );
        assert_eq!(step(2).with_variable_name("  ").name_identity(), None);
    }

    #[test]
    fn test_required_file_ids_accept_numbers_and_strings() {
        let files: Vec<RequiredFile> =
            serde_json::from_value(json!([{"id": 1, "name": "a"}, {"id": "doc-2", "name": "b"}]))
                .unwrap();
        assert_eq!(files[0].id, FileRefId::Number(1));
        assert_eq!(files[1].id, FileRefId::Text("doc-2".to_string()));
    }
}

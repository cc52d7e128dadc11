//! JSON workflow definition parser
//!
//! Definitions are frequently hand-pasted or produced by a language model and
//! are only approximately valid JSON. The parser repairs the common
//! malformations before handing the text to `serde_json`:
//!
//! 1. Blank input is rejected.
//! 2. Trailing commas before `}` or `]` are stripped.
//! 3. A bare `"key": {...}` fragment is wrapped in an outer object.
//! 4. Missing closing braces at the end of a truncated paste are appended.
//!
//! The first top-level key of the document names the workflow; its value must
//! carry a `steps` array.

use crate::definition::{PathCatalogEntry, RequiredFile, StepId, WorkflowDefinition, WorkflowStep};
use makerpath_common::{ErrorSeverity, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("trailing comma pattern is valid"));

/// Errors that can occur while parsing a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Nothing but whitespace was supplied
    #[error("Workflow definition is empty")]
    EmptyInput,

    /// The repaired text is still not valid JSON
    #[error("Workflow definition is not valid JSON: {message}")]
    InvalidJson {
        /// Message from the JSON parser
        message: String,
    },

    /// The document has no top-level key naming the workflow
    #[error("Workflow definition has no workflow key. Expected {{\"<workflow_key>\": {{ ... }}}}")]
    MissingWorkflowKey,

    /// The workflow object has no `steps` array
    #[error("Workflow '{workflow_key}' has no \"steps\" array")]
    MissingSteps {
        /// Key of the workflow missing its steps
        workflow_key: String,
    },

    /// A step could not be read
    #[error("Step {index} is invalid: {message}")]
    InvalidStep {
        /// Zero-based position in the `steps` array
        index: usize,
        /// What was wrong with it
        message: String,
    },

    /// Two steps share one `step_id`
    #[error("Duplicate step_id {step_id}; step ids must be unique")]
    DuplicateStepId {
        /// The repeated id
        step_id: StepId,
    },
}

impl ParseError {
    /// Message suitable for display next to the input control
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl Severity for ParseError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            ParseError::EmptyInput => ErrorSeverity::Warning,
            ParseError::InvalidJson { .. } => ErrorSeverity::Error,
            ParseError::MissingWorkflowKey => ErrorSeverity::Error,
            ParseError::MissingSteps { .. } => ErrorSeverity::Error,
            ParseError::InvalidStep { .. } => ErrorSeverity::Error,
            ParseError::DuplicateStepId { .. } => ErrorSeverity::Error,
        }
    }
}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// A successfully parsed workflow
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedWorkflow {
    /// The workflow key, first key of the document
    pub key: String,
    /// The definition found under the key
    pub definition: WorkflowDefinition,
    /// Entry for presenting the workflow in a path picker
    pub catalog_entry: PathCatalogEntry,
}

/// Parser for JSON workflow definitions
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse raw text into a workflow definition
    pub fn parse(raw: &str) -> ParseResult<ParsedWorkflow> {
        let repaired = Self::repair(raw)?;
        let document: Value =
            serde_json::from_str(&repaired).map_err(|e| ParseError::InvalidJson {
                message: e.to_string(),
            })?;
        Self::from_document(&document)
    }

    /// Apply the textual repairs and return the text handed to the JSON parser
    pub fn repair(raw: &str) -> ParseResult<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let mut text = Self::strip_trailing_commas(trimmed).into_owned();

        if !text.starts_with('{') {
            debug!("Wrapping workflow fragment in an outer object");
            text = format!("{{{text}}}");
        }

        let opens = text.matches('{').count();
        let closes = text.matches('}').count();
        if opens > closes {
            debug!("Appending {} missing closing braces", opens - closes);
            text.push_str(&"}".repeat(opens - closes));
        }

        Ok(text)
    }

    /// Read a workflow out of an already parsed JSON document
    pub fn from_document(document: &Value) -> ParseResult<ParsedWorkflow> {
        let (key, body) = document
            .as_object()
            .and_then(|object| object.iter().next())
            .ok_or(ParseError::MissingWorkflowKey)?;

        let body = body.as_object().ok_or_else(|| ParseError::MissingSteps {
            workflow_key: key.clone(),
        })?;
        let raw_steps = body
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::MissingSteps {
                workflow_key: key.clone(),
            })?;

        let steps = Self::parse_steps(raw_steps)?;
        let definition = WorkflowDefinition {
            stage_name: Self::text_field(body, "stage_name"),
            description: Self::text_field(body, "description"),
            output_type: Self::text_field(body, "output_type"),
            required_files: Self::required_files(key, body),
            required_variables: body
                .get("required_variables")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(Value::as_i64).collect())
                .unwrap_or_default(),
            steps,
        };

        let name = if definition.stage_name.trim().is_empty() {
            key.clone()
        } else {
            definition.stage_name.clone()
        };
        let catalog_entry = PathCatalogEntry {
            id: key.clone(),
            name,
            description: definition.description.clone(),
            output_type: definition.output_type.clone(),
        };

        debug!(
            "Parsed workflow '{}' with {} steps",
            key,
            definition.steps.len()
        );

        Ok(ParsedWorkflow {
            key: key.clone(),
            definition,
            catalog_entry,
        })
    }

    fn strip_trailing_commas(text: &str) -> Cow<'_, str> {
        TRAILING_COMMA.replace_all(text, "$1")
    }

    fn parse_steps(raw_steps: &[Value]) -> ParseResult<Vec<WorkflowStep>> {
        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(raw_steps.len());

        for (index, raw) in raw_steps.iter().enumerate() {
            let step: WorkflowStep =
                serde_json::from_value(raw.clone()).map_err(|e| ParseError::InvalidStep {
                    index,
                    message: e.to_string(),
                })?;
            if !seen.insert(step.step_id) {
                return Err(ParseError::DuplicateStepId {
                    step_id: step.step_id,
                });
            }
            steps.push(step);
        }

        Ok(steps)
    }

    fn text_field(body: &Map<String, Value>, field: &str) -> String {
        body.get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn required_files(key: &str, body: &Map<String, Value>) -> Vec<RequiredFile> {
        let Some(raw) = body.get("required_files") else {
            return Vec::new();
        };
        match serde_json::from_value(raw.clone()) {
            Ok(files) => files,
            Err(e) => {
                warn!("Ignoring malformed required_files in workflow '{key}': {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::StepActionTag;

    #[test]
    fn test_recovers_missing_outer_brace_and_trailing_comma() {
        let raw = r#""wf":{"steps":[{"step_id":1,"name":"A","action":"text_input","required":true},]}"#;
        let parsed = WorkflowParser::parse(raw).unwrap();

        assert_eq!(parsed.key, "wf");
        assert_eq!(parsed.definition.steps.len(), 1);
        assert_eq!(parsed.definition.steps[0].name, "A");
        assert_eq!(parsed.definition.steps[0].action, StepActionTag::TextInput);
        assert!(parsed.definition.steps[0].required);
    }

    #[test]
    fn test_rejects_empty_input() {
        assert_eq!(WorkflowParser::parse(""), Err(ParseError::EmptyInput));
        assert_eq!(WorkflowParser::parse("  \n\t "), Err(ParseError::EmptyInput));
    }

    #[test]
    fn test_rejects_missing_steps() {
        let err = WorkflowParser::parse(r#"{"wf":{"description":"x"}}"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingSteps {
                workflow_key: "wf".to_string()
            }
        );
    }

    #[test]
    fn test_steps_must_be_an_array() {
        let err = WorkflowParser::parse(r#"{"wf":{"steps":{"step_id":1}}}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingSteps { .. }));
    }

    #[test]
    fn test_rejects_document_without_key() {
        assert_eq!(
            WorkflowParser::parse("{}"),
            Err(ParseError::MissingWorkflowKey)
        );
    }

    #[test]
    fn test_invalid_json_carries_parser_message() {
        let err = WorkflowParser::parse(r#"{"wf": {"steps": [}"#).unwrap_err();
        match err {
            ParseError::InvalidJson { message } => assert!(!message.is_empty()),
            other => panic!("expected InvalidJson, got {other:?}"),
        }
    }

    #[test]
    fn test_appends_missing_closing_braces() {
        let raw = r#"{"wf":{"steps":[{"step_id":1,"name":"A","action":"chat"}]"#;
        assert_eq!(
            WorkflowParser::repair(raw).unwrap(),
            r#"{"wf":{"steps":[{"step_id":1,"name":"A","action":"chat"}]}}"#
        );
        let parsed = WorkflowParser::parse(raw).unwrap();
        assert_eq!(parsed.definition.steps[0].action, StepActionTag::Chat);
    }

    #[test]
    fn test_strips_trailing_commas_with_whitespace() {
        let raw = "{\"wf\":{\"stage_name\":\"S\",\n \"steps\":[],\n}\n,}";
        let repaired = WorkflowParser::repair(raw).unwrap();
        assert_eq!(repaired, "{\"wf\":{\"stage_name\":\"S\",\n \"steps\":[]\n}\n}");
    }

    #[test]
    fn test_first_key_is_workflow_key() {
        let raw = r#"{"zeta":{"steps":[]},"alpha":{"steps":[]}}"#;
        assert_eq!(WorkflowParser::parse(raw).unwrap().key, "zeta");
    }

    #[test]
    fn test_catalog_entry() {
        let raw = r#"{"market_report":{
            "stage_name":"Market Report",
            "description":"Research a market",
            "output_type":"document",
            "required_files":[{"id":1,"name":"brief.pdf"}],
            "required_variables":[1, 2],
            "steps":[{"step_id":1,"name":"brief","action":"upload_file"}]
        }}"#;
        let parsed = WorkflowParser::parse(raw).unwrap();

        assert_eq!(
            parsed.catalog_entry,
            PathCatalogEntry {
                id: "market_report".to_string(),
                name: "Market Report".to_string(),
                description: "Research a market".to_string(),
                output_type: "document".to_string(),
            }
        );
        assert_eq!(parsed.definition.required_files.len(), 1);
        assert_eq!(parsed.definition.required_variables, vec![1, 2]);
    }

    #[test]
    fn test_catalog_name_falls_back_to_key() {
        let parsed = WorkflowParser::parse(r#"{"wf":{"steps":[]}}"#).unwrap();
        assert_eq!(parsed.catalog_entry.name, "wf");
    }

    #[test]
    fn test_invalid_step_reports_index() {
        let raw = r#"{"wf":{"steps":[
            {"step_id":1,"name":"A","action":"chat"},
            {"name":"B","action":"chat"}
        ]}}"#;
        let err = WorkflowParser::parse(raw).unwrap_err();
        assert!(matches!(err, ParseError::InvalidStep { index: 1, .. }));
    }

    #[test]
    fn test_rejects_duplicate_step_ids() {
        let raw = r#"{"wf":{"steps":[
            {"step_id":1,"name":"A","action":"chat"},
            {"step_id":"1","name":"B","action":"chat"}
        ]}}"#;
        assert_eq!(
            WorkflowParser::parse(raw).unwrap_err(),
            ParseError::DuplicateStepId {
                step_id: StepId::new(1)
            }
        );
    }

    #[test]
    fn test_unknown_action_is_kept() {
        let raw = r#"{"wf":{"steps":[{"step_id":1,"name":"A","action":"summon_dragon"}]}}"#;
        let parsed = WorkflowParser::parse(raw).unwrap();
        assert_eq!(
            parsed.definition.steps[0].action,
            StepActionTag::Unknown("summon_dragon".to_string())
        );
    }

    #[test]
    fn test_user_message_and_severity() {
        let err = ParseError::MissingWorkflowKey;
        assert!(err.user_message().contains("workflow key"));
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert_eq!(ParseError::EmptyInput.severity(), ErrorSeverity::Warning);
    }
}

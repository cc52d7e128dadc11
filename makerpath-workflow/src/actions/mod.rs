//! Step behaviors and their dispatch
//!
//! Each [`StepActionTag`] resolves to a [`StepBehavior`]: a capability bundle
//! that knows how to render the step, which variables the step owns, and how
//! to turn user input into variable writes. The engine never calls an AI
//! provider itself. A behavior that needs one returns a [`TransformRequest`],
//! and the host-supplied [`ExternalTransform`] produces the value.
//!
//! Unrecognized tags never fail: they resolve to the generic behavior, which
//! only offers a manual "mark complete".

mod behaviors;
mod tag;

pub use behaviors::{
    ChatBehavior, ExportBehavior, FileGeneratorBehavior, GeneratorBehavior, GenericBehavior,
    OptimizerBehavior, SaverBehavior, SelectorBehavior, TextInputBehavior,
    TranslationExtractorBehavior, TranslationGeneratorBehavior, TranslationSaverBehavior,
    UploaderBehavior,
};
pub use tag::{Capabilities, StepActionTag};

use crate::definition::{PathId, StepId, WorkflowStep};
use crate::session::SessionMode;
use crate::variables::{VariableIdentity, VariableWrite};
use async_trait::async_trait;
use makerpath_common::{ErrorSeverity, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while interpreting step input
#[derive(Debug, Error)]
pub enum ActionError {
    /// The behavior cannot use this kind of input
    #[error("Action '{action}' cannot accept {input} input")]
    UnsupportedInput {
        /// Wire name of the action
        action: String,
        /// Kind of input received
        input: &'static str,
    },

    /// The input was the right kind but unusable
    #[error("Invalid input for action '{action}': {message}")]
    InvalidInput {
        /// Wire name of the action
        action: String,
        /// What was wrong
        message: String,
    },

    /// A transform was requested but the host registered none
    #[error("Action '{action}' needs an external transform but none is registered")]
    TransformUnavailable {
        /// Wire name of the action
        action: String,
    },

    /// The external transform failed
    #[error("External transform failed: {0}")]
    TransformFailed(String),
}

impl ActionError {
    fn unsupported(step: &WorkflowStep, input: &StepInput) -> Self {
        ActionError::UnsupportedInput {
            action: step.action.to_string(),
            input: input.kind(),
        }
    }

    fn invalid(step: &WorkflowStep, message: impl Into<String>) -> Self {
        ActionError::InvalidInput {
            action: step.action.to_string(),
            message: message.into(),
        }
    }
}

impl Severity for ActionError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            ActionError::UnsupportedInput { .. } => ErrorSeverity::Error,
            ActionError::InvalidInput { .. } => ErrorSeverity::Warning,
            ActionError::TransformUnavailable { .. } => ErrorSeverity::Critical,
            ActionError::TransformFailed(_) => ErrorSeverity::Error,
        }
    }
}

/// Result type for action operations
pub type ActionResult<T> = Result<T, ActionError>;

/// Everything a behavior needs to render one step
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Path the step belongs to
    pub path_id: PathId,
    /// The step itself
    pub step: &'a WorkflowStep,
    /// Whether the step is complete
    pub completed: bool,
    /// Session mode
    pub mode: SessionMode,
    /// Value currently held for the step, from prefill or a submit
    pub selection: Option<&'a Value>,
}

/// Something the host can offer the user on a step surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Affordance {
    /// Manually mark the step done
    MarkComplete,
    /// Choose an AI provider credential
    SelectCredential,
    /// Choose files from the shared library
    SelectFiles {
        /// Whether several files may be chosen
        multiple: bool,
    },
    /// Choose a RAG source
    SelectRagSource,
    /// Enter free text
    TextField {
        /// Prompt shown above the field
        prompt: Option<String>,
    },
    /// Run a generator
    Generate {
        /// Prompt sent to the model
        prompt: Option<String>,
        /// Requested output format
        output_format: Option<String>,
    },
    /// Upload a file
    UploadFile {
        /// Source type hint
        source_type: Option<String>,
    },
    /// Rewrite the prompt
    OptimizePrompt {
        /// Prompt to optimize
        prompt: Option<String>,
    },
    /// Save into the shared library
    SaveToLibrary,
    /// Open a chat panel
    ChatPanel {
        /// Opening prompt
        prompt: Option<String>,
    },
    /// Produce a downloadable file
    GenerateFile {
        /// Requested file format
        output_format: Option<String>,
    },
    /// Extract translatable strings from an earlier variable
    ExtractTranslations {
        /// Variable holding the source
        source_variable: Option<String>,
    },
    /// Translate extracted strings
    GenerateTranslations,
    /// Store translations
    SaveTranslations,
    /// Export the path result
    Export {
        /// Requested export format
        output_format: Option<String>,
    },
}

/// What the host renders for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    /// Step id
    pub step_id: StepId,
    /// Title to display
    pub title: String,
    /// Canonical action name
    pub action: String,
    /// Capability profile
    pub capabilities: Capabilities,
    /// Offered affordances, in display order
    pub affordances: Vec<Affordance>,
    /// Value to prefill the surface with
    pub prefill: Option<Value>,
    /// Whether the step is complete
    pub completed: bool,
    /// Whether the surface must not accept input
    pub read_only: bool,
}

impl StepView {
    /// View with the fields every behavior shares and no affordances
    pub fn base(ctx: &StepContext<'_>, capabilities: Capabilities) -> Self {
        let mut affordances = Vec::new();
        if capabilities.needs_external_credential {
            affordances.push(Affordance::SelectCredential);
        }
        Self {
            step_id: ctx.step.step_id,
            title: ctx.step.label().to_string(),
            action: ctx.step.action.to_string(),
            capabilities,
            affordances,
            prefill: ctx.selection.cloned(),
            completed: ctx.completed,
            read_only: ctx.mode == SessionMode::View,
        }
    }

    /// Append an affordance
    pub fn offer(mut self, affordance: Affordance) -> Self {
        self.affordances.push(affordance);
        self
    }
}

/// User input handed to a behavior
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    /// Items picked from the shared library
    Selection(Vec<Value>),
    /// A RAG source pick
    RagSource {
        /// Source id
        rag_source_id: i64,
        /// Display label
        label: Option<String>,
    },
    /// Free text
    Text(String),
    /// Output produced outside the engine
    Generated(Value),
    /// A finished upload
    Uploaded {
        /// File id assigned by the library
        file_id: Value,
        /// Original file name
        name: String,
    },
    /// Manual completion with no data
    MarkComplete,
}

impl StepInput {
    /// Short name of the input kind
    pub fn kind(&self) -> &'static str {
        match self {
            StepInput::Selection(_) => "selection",
            StepInput::RagSource { .. } => "rag source",
            StepInput::Text(_) => "text",
            StepInput::Generated(_) => "generated",
            StepInput::Uploaded { .. } => "upload",
            StepInput::MarkComplete => "mark complete",
        }
    }
}

/// A value the engine must obtain from the host before writing it
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    /// Input handed to the transform
    pub input: Value,
    /// Write to perform with the transform's output as value
    pub write: VariableWrite,
}

/// What interpreting one input produced
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    /// Writes in the order they must be issued
    pub writes: Vec<VariableWrite>,
    /// Transform to run before the writes are complete
    pub transform: Option<TransformRequest>,
    /// Whether the step is complete afterwards
    pub complete: bool,
}

impl StepOutcome {
    /// Outcome that only completes the step
    pub fn complete_only() -> Self {
        Self {
            writes: Vec::new(),
            transform: None,
            complete: true,
        }
    }

    /// Outcome with one write that completes the step
    pub fn write_and_complete(write: VariableWrite) -> Self {
        Self {
            writes: vec![write],
            transform: None,
            complete: true,
        }
    }
}

/// Host-supplied transform for steps whose output comes from outside
///
/// Translation extraction runs source through a code rewriting tool; that tool
/// is opaque to the engine and plugged in here.
#[async_trait]
pub trait ExternalTransform: Send + Sync {
    /// Turn `input` into the value stored for `step`
    async fn transform(&self, step: &WorkflowStep, input: Value) -> ActionResult<Value>;
}

/// Behavior of one family of step actions
pub trait StepBehavior: Send + Sync + std::fmt::Debug {
    /// Name of the behavior, for logs
    fn behavior_type(&self) -> &'static str;

    /// The tag this behavior was resolved for
    fn tag(&self) -> &StepActionTag;

    /// Capability profile; a pure function of the tag
    fn capabilities(&self) -> Capabilities {
        self.tag().capabilities()
    }

    /// Build the view of a step
    fn render(&self, ctx: &StepContext<'_>) -> StepView;

    /// Variable identities this step reads and writes
    fn owned_identities(&self, _step: &WorkflowStep) -> Vec<VariableIdentity> {
        Vec::new()
    }

    /// Turn user input into writes and completion
    fn interpret(&self, step: &WorkflowStep, input: StepInput) -> ActionResult<StepOutcome>;
}

/// Resolves tags to behaviors
#[derive(Debug, Default, Clone, Copy)]
pub struct ActionDispatcher;

impl ActionDispatcher {
    /// Create a dispatcher
    pub fn new() -> Self {
        Self
    }

    /// Behavior for `tag`; unknown tags get [`GenericBehavior`]
    pub fn resolve(&self, tag: &StepActionTag) -> Arc<dyn StepBehavior> {
        let behavior: Arc<dyn StepBehavior> = match tag {
            StepActionTag::SelectFiles | StepActionTag::SelectRagSource => {
                Arc::new(SelectorBehavior::new(tag.clone()))
            }
            StepActionTag::TextInput => Arc::new(TextInputBehavior::new(tag.clone())),
            StepActionTag::GenerateText | StepActionTag::GenerateDocument => {
                Arc::new(GeneratorBehavior::new(tag.clone()))
            }
            StepActionTag::UploadFile => Arc::new(UploaderBehavior::new(tag.clone())),
            StepActionTag::OptimizePrompt => Arc::new(OptimizerBehavior::new(tag.clone())),
            StepActionTag::SaveVariable | StepActionTag::SaveOutput => {
                Arc::new(SaverBehavior::new(tag.clone()))
            }
            StepActionTag::Chat => Arc::new(ChatBehavior::new(tag.clone())),
            StepActionTag::GenerateFile => Arc::new(FileGeneratorBehavior::new(tag.clone())),
            StepActionTag::TranslationExtract => Arc::new(TranslationExtractorBehavior::new(tag.clone())),
            StepActionTag::TranslationGenerate => {
                Arc::new(TranslationGeneratorBehavior::new(tag.clone()))
            }
            StepActionTag::TranslationSave => Arc::new(TranslationSaverBehavior::new(tag.clone())),
            StepActionTag::ExportTemplate => Arc::new(ExportBehavior::new(tag.clone())),
            StepActionTag::ReviewOutput => Arc::new(GenericBehavior::new(tag.clone())),
            StepActionTag::Unknown(raw) => {
                warn!("Unknown step action '{}', using generic behavior", raw);
                Arc::new(GenericBehavior::new(tag.clone()))
            }
        };
        debug!(
            "Resolved action '{}' to {}",
            behavior.tag(),
            behavior.behavior_type()
        );
        behavior
    }
}

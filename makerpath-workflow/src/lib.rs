//! # Maker Path Workflow Engine
//!
//! Interprets a declarative JSON workflow definition as an ordered sequence of
//! typed steps and drives a resumable, guided session through them.
//!
//! ## Features
//!
//! - **Lenient Parser**: Repairs trailing commas, missing outer braces and
//!   truncated pastes before validating a definition
//! - **Action Dispatch**: Every step action resolves to a behavior; unknown
//!   actions fall back to a generic "mark complete" behavior
//! - **Progress Tracking**: Monotonic completion and step selectability
//! - **Variable Store**: Idempotent create/update of step variables through an
//!   intent log that can replay failed writes
//! - **Cancellable Commands**: Work started for a step is cancelled when the
//!   user moves on, so late results never touch the session
//! - **Backends**: HTTP client for the backing store and an in-memory store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use makerpath_workflow::{MemoryBackend, PathController, PathId, PathSource, StepInput};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(MemoryBackend::new());
//! let mut controller = PathController::from_backend(backend);
//!
//! controller
//!     .load(PathSource::Template {
//!         key: "prompt_workbench".to_string(),
//!         path_id: PathId::new(1),
//!     })
//!     .await?;
//!
//! let first = controller.session().and_then(|s| s.selected_step_id());
//! if let Some(step_id) = first {
//!     controller.mount_step(step_id).await?;
//!     controller
//!         .submit(step_id, StepInput::Text("Summarize the release notes".into()))
//!         .await?;
//!     controller.advance()?;
//! }
//!
//! controller.finalize().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod actions;
pub mod backend;
mod commands;
mod controller;
mod definition;
mod error;
mod parser;
mod progress;
mod relay;
mod session;
mod templates;
mod variables;

pub use actions::{
    ActionDispatcher, ActionError, ActionResult, Affordance, Capabilities, ExternalTransform,
    StepActionTag, StepBehavior, StepContext, StepInput, StepOutcome, StepView, TransformRequest,
};
pub use backend::{
    BackendError, BackendResult, HttpBackend, MemoryBackend, PathRecord, PathRecordBackend,
    PathStatus, ProgressBackend, ProgressRecord, ProgressStatus, Variable, VariableBackend,
};
pub use commands::{CommandScope, PrefillCommand, PrefillResult};
pub use controller::{PathController, PathSource, SubmitReport};
pub use definition::{
    FileRefId, PathCatalogEntry, PathId, RequiredFile, StepId, WorkflowDefinition, WorkflowStep,
};
pub use error::{ControllerError, ControllerResult};
pub use parser::{ParseError, ParseResult, ParsedWorkflow, WorkflowParser};
pub use progress::{next_step_id, ProgressState, ProgressTracker};
pub use relay::{EventRelay, StepEvent};
pub use session::{PathSession, SessionBlob, SessionMode, WizardPhase};
pub use templates::TemplateLibrary;
pub use variables::{Intent, IntentState, VariableIdentity, VariableStore, VariableWrite, WriteOutcome};

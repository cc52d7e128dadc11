use crate::actions::ActionError;
use crate::backend::BackendError;
use crate::definition::StepId;
use crate::parser::ParseError;
use makerpath_common::{ErrorSeverity, Severity};
use thiserror::Error as ThisError;

/// Errors returned by [`crate::PathController`]
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum ControllerError {
    /// No path has been loaded
    #[error("No path session is loaded")]
    NoSession,

    /// The step is not part of the loaded path
    #[error("Step {0} is not part of this path")]
    StepNotFound(StepId),

    /// The path is completed and open read-only
    #[error("The path is read-only; enter edit mode to change it")]
    ReadOnly,

    /// No bundled template carries this key
    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    /// The stored session data could not be decoded
    #[error("Stored session data is invalid: {0}")]
    InvalidSessionData(String),

    /// A workflow definition failed to parse
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A step rejected its input
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Loading or finalizing against the backing store failed
    #[error("Persistence failed: {0}")]
    Persistence(#[from] BackendError),
}

impl Severity for ControllerError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            // Critical: the stored path cannot be trusted or reached
            ControllerError::Persistence(_) => ErrorSeverity::Critical,
            ControllerError::InvalidSessionData(_) => ErrorSeverity::Critical,
            // Warning: expected in normal use of a completed path
            ControllerError::ReadOnly => ErrorSeverity::Warning,
            ControllerError::Parse(e) => e.severity(),
            ControllerError::Action(e) => e.severity(),
            ControllerError::NoSession => ErrorSeverity::Error,
            ControllerError::StepNotFound(_) => ErrorSeverity::Error,
            ControllerError::TemplateNotFound(_) => ErrorSeverity::Error,
        }
    }
}

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

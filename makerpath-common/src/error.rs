//! Error severity classification shared by the Maker Path crates
//!
//! Each crate defines its own `thiserror` enums. Implementing [`Severity`] on
//! them lets hosts pick a log level or decide whether to surface an error
//! without matching on every variant themselves.

/// Severity levels for error classification
///
/// - **Warning**: something is off but the operation went through
///   (a persistence write that was swallowed, an unknown action tag).
/// - **Error**: the operation failed but the session is still usable
///   (a malformed workflow paste, a step that cannot take the given input).
/// - **Critical**: the session cannot continue
///   (the path record could not be loaded or the session blob is corrupt).
///
/// # Examples
///
/// ```rust
/// use makerpath_common::ErrorSeverity;
///
/// let swallowed_write = ErrorSeverity::Warning;
/// let bad_paste = ErrorSeverity::Error;
/// let corrupt_blob = ErrorSeverity::Critical;
/// assert_ne!(swallowed_write, corrupt_blob);
/// assert!(bad_paste < corrupt_blob);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Potential issue but the operation can proceed
    Warning,

    /// Operation failed but the session can continue
    Error,

    /// The session cannot continue without intervention
    Critical,
}

impl ErrorSeverity {
    /// Lowercase label used in log fields
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for error types that have severity levels
///
/// # Example
///
/// ```rust
/// use makerpath_common::{ErrorSeverity, Severity};
///
/// #[derive(Debug)]
/// enum SaveError {
///     Offline,
///     CorruptBlob,
/// }
///
/// impl Severity for SaveError {
///     fn severity(&self) -> ErrorSeverity {
///         match self {
///             SaveError::Offline => ErrorSeverity::Warning,
///             SaveError::CorruptBlob => ErrorSeverity::Critical,
///         }
///     }
/// }
///
/// assert_eq!(SaveError::Offline.severity(), ErrorSeverity::Warning);
/// ```
pub trait Severity {
    /// Get the severity level of this error
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error should stop the current session
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ErrorSeverity);

    impl Severity for Fixed {
        fn severity(&self) -> ErrorSeverity {
            self.0
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }

    #[test]
    fn test_is_critical_default() {
        assert!(Fixed(ErrorSeverity::Critical).is_critical());
        assert!(!Fixed(ErrorSeverity::Error).is_critical());
        assert!(!Fixed(ErrorSeverity::Warning).is_critical());
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(ErrorSeverity::Warning.to_string(), "warning");
        assert_eq!(ErrorSeverity::Critical.to_string(), "critical");
    }
}

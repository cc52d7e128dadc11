//! # Maker Path Common
//!
//! Foundational pieces shared by the Maker Path crates:
//!
//! - [`error`] - the [`Severity`] trait and [`ErrorSeverity`] levels every
//!   crate-level error enum implements
//! - [`logging`] - the [`Pretty`] log formatter and [`init_tracing`]

pub mod error;
pub mod logging;

pub use error::{ErrorSeverity, Severity};
pub use logging::{init_tracing, Pretty, DEFAULT_LOG_FILTER};

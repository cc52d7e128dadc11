//! Logging utilities for the Maker Path crates
//!
//! Everything logs through `tracing`. Hosts call [`init_tracing`] once with
//! the filter from their configuration; libraries never install a subscriber
//! on their own.

use serde::Serialize;
use std::fmt::Debug;
use tracing_subscriber::EnvFilter;

/// Filter used when the configured one cannot be parsed
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Wrapper for pretty-printing types in logs as YAML
///
/// ```ignore
/// use makerpath_common::Pretty;
///
/// tracing::debug!("Writing variable: {}", Pretty(&request));
/// ```
///
/// Outputs YAML with a leading newline. Debug is used as a fallback if YAML
/// serialization fails.
pub struct Pretty<T>(pub T);

impl<T: Serialize + Debug> std::fmt::Display for Pretty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_yaml_ng::to_string(&self.0) {
            Ok(yaml) => write!(f, "\n{}", yaml),
            Err(_) => write!(f, "\n{:#?}", self.0),
        }
    }
}

impl<T: Serialize + Debug> std::fmt::Debug for Pretty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// Install a global fmt subscriber filtered by `filter`
///
/// `RUST_LOG` wins over `filter` when set. An unparsable filter falls back to
/// [`DEFAULT_LOG_FILTER`]. Returns `false` when a subscriber was already
/// installed, which makes repeated calls harmless.
pub fn init_tracing(filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Payload {
        path_id: i64,
        value: String,
    }

    #[test]
    fn test_pretty_renders_yaml() {
        let rendered = Pretty(&Payload {
            path_id: 7,
            value: "draft".to_string(),
        })
        .to_string();

        assert!(rendered.starts_with('\n'));
        assert!(rendered.contains("path_id: 7"));
        assert!(rendered.contains("value: draft"));
    }

    #[test]
    fn test_init_tracing_is_repeatable() {
        let _first = init_tracing("debug");
        assert!(!init_tracing("not a [valid filter"));
    }
}

//! Maker Path configuration management using Figment
//!
//! Hosts embedding the workflow engine load a [`MakerPathConfig`] describing
//! the backing store and the log filter.
//!
//! # Sources
//!
//! Later sources override earlier ones:
//!
//! 1. Built-in defaults
//! 2. `~/.makerpath/makerpath.{toml,yaml,yml,json}`
//! 3. `./.makerpath/makerpath.{toml,yaml,yml,json}`
//! 4. `MAKERPATH_` environment variables, `__` separating nested keys
//!
//! ```no_run
//! use makerpath_config::load_configuration;
//!
//! let config = load_configuration()?;
//! makerpath_common::init_tracing(&config.logging.filter);
//! println!("Backend: {}", config.backend.base_url);
//! # Ok::<(), makerpath_config::ConfigError>(())
//! ```
//!
//! ```bash
//! export MAKERPATH_BACKEND__BASE_URL="https://paths.example.com/api"
//! export MAKERPATH_BACKEND__API_TOKEN="..."
//! export MAKERPATH_LOGGING__FILTER="makerpath_workflow=debug"
//! ```

pub mod discovery;
pub mod error;
pub mod provider;
pub mod types;

pub use discovery::{ConfigFile, ConfigFormat, ConfigScope, FileDiscovery};
pub use error::{ConfigError, ConfigResult};
pub use provider::{load_configuration, ConfigProvider, ENV_NESTING_SEPARATOR, ENV_PREFIX};
pub use types::{BackendConfig, LoggingConfig, MakerPathConfig, DEFAULT_BASE_URL};

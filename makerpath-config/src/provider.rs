//! Configuration provider using Figment

use crate::{
    discovery::{ConfigFile, ConfigFormat, FileDiscovery},
    ConfigResult, MakerPathConfig,
};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use makerpath_common::Pretty;
use tracing::{debug, info, trace};

/// Prefix of environment variables read by the provider
pub const ENV_PREFIX: &str = "MAKERPATH_";

/// Separator for nested keys in environment variables
///
/// `MAKERPATH_BACKEND__BASE_URL` maps to `backend.base_url`.
pub const ENV_NESTING_SEPARATOR: &str = "__";

/// Loads [`MakerPathConfig`] from every source in precedence order
///
/// Nothing is cached: each [`ConfigProvider::load`] reads the files and the
/// environment again.
#[derive(Debug, Default)]
pub struct ConfigProvider {
    discovery: FileDiscovery,
}

impl ConfigProvider {
    /// Provider over the standard global and project directories
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider over a custom discovery, mostly for tests and embedding hosts
    pub fn with_discovery(discovery: FileDiscovery) -> Self {
        Self { discovery }
    }

    /// Load and validate the configuration
    pub fn load(&self) -> ConfigResult<MakerPathConfig> {
        let config: MakerPathConfig = self.build_figment().extract()?;
        config.validate()?;

        info!(
            "Loaded configuration for backend {}",
            config.backend.base_url
        );
        debug!("Configuration: {}", Pretty(&redacted(&config)));
        Ok(config)
    }

    /// Sources merged in order, later ones override earlier ones:
    /// 1. Defaults
    /// 2. Discovered files (global, then project)
    /// 3. `MAKERPATH_` environment variables
    fn build_figment(&self) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(MakerPathConfig::default()));

        for file in self.discovery.discover_all() {
            trace!("Merging config file {}", file.path.display());
            figment = figment.merge(Self::file_provider(&file));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_NESTING_SEPARATOR))
    }

    fn file_provider(file: &ConfigFile) -> Figment {
        match file.format {
            ConfigFormat::Toml => Figment::from(Toml::file(&file.path)),
            ConfigFormat::Yaml => Figment::from(Yaml::file(&file.path)),
            ConfigFormat::Json => Figment::from(Json::file(&file.path)),
        }
    }
}

/// Load the configuration from the standard locations
pub fn load_configuration() -> ConfigResult<MakerPathConfig> {
    ConfigProvider::new().load()
}

fn redacted(config: &MakerPathConfig) -> MakerPathConfig {
    let mut copy = config.clone();
    if copy.backend.api_token.is_some() {
        copy.backend.api_token = Some("***".to_string());
    }
    copy
}

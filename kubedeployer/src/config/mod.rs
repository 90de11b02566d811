mod error;

use std::path::{Path, PathBuf};

use deployer_base::consts::{
    DEFAULT_CONCURRENCY, DEFAULT_DEPLOYER_NAME, DEFAULT_FIELD_MANAGER, DEFAULT_NAMESPACE,
};
use deployer_cli::config::LogConfig;
use resolve_path::PathResolveExt;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

pub use self::error::Error;

/// Settings of one deployer instance, read from a YAML file. Every field has a
/// default, so an empty file is a valid configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Identity stamped on every object and namespace this deployer creates.
    #[serde(default = "default_deployer_name")]
    pub deployer_name: String,

    /// Target namespace when neither a batch nor the registry names one.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Where the ownership registry is persisted. A lock file is kept next
    /// to it.
    #[serde(default = "deployer_base::config::default_state_file_path")]
    pub state_file_path: PathBuf,

    #[serde(default = "default_field_manager")]
    pub field_manager: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "LogConfig::default")]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deployer_name: default_deployer_name(),
            namespace: default_namespace(),
            state_file_path: deployer_base::config::default_state_file_path(),
            field_manager: default_field_manager(),
            concurrency: default_concurrency(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// The first existing file among the default path and its fallbacks.
    pub fn search_config_file_path() -> Option<PathBuf> {
        std::iter::once(Self::default_path())
            .chain(deployer_base::fallback_project_config_directories().into_iter().map(|mut path| {
                path.push(deployer_base::CLI_CONFIG_NAME);
                path
            }))
            .find(|path| path.try_exists().unwrap_or(false))
    }

    #[inline]
    pub fn default_path() -> PathBuf {
        [
            deployer_base::PROJECT_CONFIG_DIR.to_path_buf(),
            PathBuf::from(deployer_base::CLI_CONFIG_NAME),
        ]
        .into_iter()
        .collect()
    }

    #[inline]
    #[must_use]
    pub fn template_basic() -> Vec<u8> { include_bytes!("../../config/config.yaml").to_vec() }

    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, when a path in it cannot
    /// be resolved, or when a value is out of range.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut config: Self = {
            let path =
                path.as_ref().try_resolve().map(|path| path.to_path_buf()).with_context(|_| {
                    error::ResolveFilePathSnafu { file_path: path.as_ref().to_path_buf() }
                })?;
            let data =
                std::fs::read(&path).context(error::OpenConfigSnafu { filename: path.clone() })?;
            serde_yaml::from_slice(&data).context(error::ParseConfigSnafu { filename: path })?
        };

        config.state_file_path = resolve(&config.state_file_path)?;
        config.log.file_path = config.log.file_path.as_deref().map(resolve).transpose()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Fails when a value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        ensure!(!self.deployer_name.trim().is_empty(), error::EmptyDeployerNameSnafu);
        ensure!(self.concurrency > 0, error::ZeroConcurrencySnafu);
        Ok(())
    }
}

fn resolve(path: &Path) -> Result<PathBuf, Error> {
    path.try_resolve()
        .map(|path| path.to_path_buf())
        .with_context(|_| error::ResolveFilePathSnafu { file_path: path.to_path_buf() })
}

fn default_deployer_name() -> String { DEFAULT_DEPLOYER_NAME.to_string() }

fn default_namespace() -> String { DEFAULT_NAMESPACE.to_string() }

fn default_field_manager() -> String { DEFAULT_FIELD_MANAGER.to_string() }

const fn default_concurrency() -> usize { DEFAULT_CONCURRENCY }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_matches_defaults() {
        let config: Config = serde_yaml::from_slice(&Config::template_basic()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str(
            "deployerName: edge\nconcurrency: 2\nlog:\n  level: DEBUG\n",
        )
        .unwrap();
        assert_eq!(config.deployer_name, "edge");
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.log.level, tracing::Level::DEBUG);
    }

    #[test]
    fn test_validation() {
        let config = Config { concurrency: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(Error::ZeroConcurrency)));

        let config = Config { deployer_name: " ".to_string(), ..Config::default() };
        assert!(matches!(config.validate(), Err(Error::EmptyDeployerName)));
    }
}

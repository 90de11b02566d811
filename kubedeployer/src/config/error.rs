use std::path::PathBuf;

use snafu::Snafu;

/// Errors raised while loading the configuration file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to open config from {}, error: {source}", filename.display()))]
    OpenConfig { filename: PathBuf, source: std::io::Error },

    #[snafu(display("Failed to parse config from {}, error: {source}", filename.display()))]
    ParseConfig { filename: PathBuf, source: serde_yaml::Error },

    /// The path could not be expanded, for instance a `~` without a home
    /// directory.
    #[snafu(display("Failed to resolve file path {}, error: {source}", file_path.display()))]
    ResolveFilePath { file_path: PathBuf, source: std::io::Error },

    #[snafu(display("Deployer name must not be empty"))]
    EmptyDeployerName,

    #[snafu(display("Concurrency must be at least 1"))]
    ZeroConcurrency,
}

use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to read batch from {}, error: {source}", filename.display()))]
    ReadBatch { filename: PathBuf, source: std::io::Error },

    #[snafu(display("Failed to read batch from standard input, error: {source}"))]
    ReadStdin { source: std::io::Error },

    #[snafu(display("Failed to parse batch from {}, error: {source}", filename.display()))]
    ParseBatch { filename: PathBuf, source: serde_yaml::Error },

    #[snafu(display("Failed to resolve file path {}, error: {source}", file_path.display()))]
    ResolveFilePath { file_path: PathBuf, source: std::io::Error },
}

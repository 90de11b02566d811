use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Registry is locked by another running deployer, lock file {}",
        lock_path.display()
    ))]
    RegistryLocked { lock_path: PathBuf },

    #[snafu(display("Failed to create lock file {}, error: {source}", lock_path.display()))]
    CreateLock { lock_path: PathBuf, source: std::io::Error },

    #[snafu(display("Failed to create state directory {}, error: {source}", path.display()))]
    CreateStateDirectory { path: PathBuf, source: std::io::Error },

    #[snafu(display("Failed to read registry state from {}, error: {source}", filename.display()))]
    ReadState { filename: PathBuf, source: std::io::Error },

    #[snafu(display("Failed to parse registry state from {}, error: {source}", filename.display()))]
    ParseState { filename: PathBuf, source: serde_yaml::Error },

    #[snafu(display("Failed to serialize registry state, error: {source}"))]
    SerializeState { source: serde_yaml::Error },

    #[snafu(display("Failed to write registry state to {}, error: {source}", filename.display()))]
    WriteState { filename: PathBuf, source: std::io::Error },
}

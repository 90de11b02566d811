use std::path::PathBuf;

/// Location of the ownership registry when the configuration does not name
/// one.
#[inline]
#[must_use]
pub fn default_state_file_path() -> PathBuf {
    [crate::PROJECT_STATE_DIR.to_path_buf(), PathBuf::from(crate::STATE_FILE_NAME)]
        .into_iter()
        .collect()
}

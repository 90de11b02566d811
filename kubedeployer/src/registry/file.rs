use std::{
    collections::BTreeSet,
    fs::{File, OpenOptions, TryLockError},
    io::Write,
    path::{Path, PathBuf},
};

use snafu::ResultExt;

use crate::{
    registry::{
        Error, MemoryRegistry, NamespaceTarget, OwnershipRecord, OwnershipRegistry, RegistryState,
        error,
    },
    resource::OwnerId,
};

/// Advisory lock on a file next to the state file.
///
/// The operating system drops the lock with the last handle, so a killed
/// process never leaves the registry locked. The file itself stays behind and
/// only carries the pid of the last holder.
#[derive(Debug)]
struct LockFile {
    _file: File,
}

impl LockFile {
    fn acquire(path: PathBuf) -> Result<Self, Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|_| error::CreateLockSnafu { lock_path: path.clone() })?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return error::RegistryLockedSnafu { lock_path: path }.fail();
            }
            Err(TryLockError::Error(source)) => {
                return Err(Error::CreateLock { lock_path: path, source });
            }
        }

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .with_context(|_| error::CreateLockSnafu { lock_path: path.clone() })?;
        tracing::debug!("Acquired registry lock {}", path.display());
        Ok(Self { _file: file })
    }
}

/// Registry persisted as a YAML file.
///
/// Opening takes an advisory lock on a file next to the state file, so a
/// second deployer process pointed at the same state is rejected instead of
/// interleaving writes. The lock dies with the process holding it. Commits
/// write a temporary file and rename it over the state file.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    inner: MemoryRegistry,
    _lock: LockFile,
}

impl FileRegistry {
    /// Opens the registry stored at `path`, creating its directory when
    /// missing. A missing state file opens an empty registry.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::RegistryLocked`] while another process holds the
    /// lock, and when the state file cannot be read or parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|_| error::CreateStateDirectorySnafu { path: parent.to_path_buf() })?;
        }

        let lock = LockFile::acquire(sibling(&path, "lock"))?;
        let state = match std::fs::read(&path) {
            Ok(data) if data.is_empty() => RegistryState::default(),
            Ok(data) => serde_yaml::from_slice(&data)
                .with_context(|_| error::ParseStateSnafu { filename: path.clone() })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No registry state at {}, starting empty", path.display());
                RegistryState::default()
            }
            Err(source) => return Err(Error::ReadState { filename: path, source }),
        };

        tracing::debug!(
            "Opened registry {} with {} owner(s)",
            path.display(),
            state.owners.len()
        );
        Ok(Self { path, inner: MemoryRegistry::with_state(state), _lock: lock })
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(format!(".{extension}"));
    path.with_file_name(name)
}

impl OwnershipRegistry for FileRegistry {
    fn get(&self, owner: &OwnerId) -> Option<&OwnershipRecord> { self.inner.get(owner) }

    fn owners(&self) -> BTreeSet<OwnerId> { self.inner.owners() }

    fn set(&mut self, owner: OwnerId, record: OwnershipRecord) { self.inner.set(owner, record); }

    fn remove(&mut self, owner: &OwnerId) -> Option<OwnershipRecord> { self.inner.remove(owner) }

    fn namespace_target(&self) -> &NamespaceTarget { self.inner.namespace_target() }

    fn set_namespace_target(&mut self, target: NamespaceTarget) {
        self.inner.set_namespace_target(target);
    }

    fn commit(&mut self) -> Result<(), Error> {
        let data = serde_yaml::to_string(self.inner.staged()).context(error::SerializeStateSnafu)?;
        let tmp_path = sibling(&self.path, "tmp");
        std::fs::write(&tmp_path, data)
            .with_context(|_| error::WriteStateSnafu { filename: tmp_path.clone() })?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|_| error::WriteStateSnafu { filename: self.path.clone() })?;
        self.inner.commit()
    }

    fn rollback(&mut self) { self.inner.rollback(); }

    fn snapshot(&self) -> RegistryState { self.inner.snapshot() }
}

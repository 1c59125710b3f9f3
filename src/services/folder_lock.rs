use crate::services::fs_attrs;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use thiserror::Error;
use uuid::Uuid;

/// Random token identifying this process instance.
///
/// Written into every sentinel this process creates, so a sentinel can be
/// traced back to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeId(String);

impl RuntimeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Details handed to the caller when a folder already carries a sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConflict {
    pub folder: Utf8PathBuf,
    pub sentinel: Utf8PathBuf,
    /// Token found in the sentinel, if it could be read
    pub owner: Option<String>,
    /// The sentinel is the one this very instance holds
    pub held_by_this_process: bool,
}

/// What to do about a [`LockConflict`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDecision {
    /// Leave the other session alone and do not open the folder
    Abort,
    /// Delete the existing sentinel and take the folder over
    ForceOverride,
}

/// Errors that can occur while locking a folder
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Folder is already in use by another session (sentinel {sentinel})")]
    Conflict {
        sentinel: Utf8PathBuf,
        owner: Option<String>,
    },

    #[error("Failed to create lock file {sentinel}: {source}")]
    CreateFailed {
        sentinel: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to override lock file {sentinel}: {source}")]
    OverrideFailed {
        sentinel: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
struct HeldLock {
    folder: Utf8PathBuf,
    sentinel: Utf8PathBuf,
    // Open for the whole session; on Windows nobody else can touch the file.
    handle: File,
}

/// Cooperative one-session-per-folder lock.
///
/// Acquiring drops a hidden sentinel file containing the [`RuntimeId`] into
/// the folder and keeps it open. A sentinel left by a crashed process looks
/// exactly like a live one, which is why conflicts are always handed to the
/// caller instead of being resolved here.
#[derive(Debug)]
pub struct FolderLock {
    lock_file_name: String,
    runtime_id: RuntimeId,
    held: Option<HeldLock>,
}

impl FolderLock {
    pub fn new(lock_file_name: impl Into<String>, runtime_id: RuntimeId) -> Self {
        Self {
            lock_file_name: lock_file_name.into(),
            runtime_id,
            held: None,
        }
    }

    pub fn runtime_id(&self) -> &RuntimeId {
        &self.runtime_id
    }

    pub fn sentinel_path(&self, folder: &Utf8Path) -> Utf8PathBuf {
        folder.join(&self.lock_file_name)
    }

    /// Folder currently locked by this instance
    pub fn held_folder(&self) -> Option<&Utf8Path> {
        self.held.as_ref().map(|held| held.folder.as_path())
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Lock `folder` for this session.
    ///
    /// If a sentinel is already there, `on_conflict` decides. Aborting yields
    /// [`LockError::Conflict`]; overriding deletes the sentinel and retries
    /// creation exactly once. Any lock held on another folder is released
    /// first.
    pub fn acquire<F>(&mut self, folder: &Utf8Path, on_conflict: F) -> Result<(), LockError>
    where
        F: FnOnce(&LockConflict) -> LockDecision,
    {
        if let Some(held) = self.held_folder().map(Utf8Path::to_path_buf) {
            if held.as_path() != folder {
                self.release(&held);
            }
        }

        let sentinel = self.sentinel_path(folder);

        match self.create_sentinel(&sentinel) {
            Ok(handle) => {
                self.adopt(folder, sentinel, handle);
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => return Err(LockError::CreateFailed { sentinel, source }),
        }

        let conflict = LockConflict {
            folder: folder.to_path_buf(),
            owner: fs::read_to_string(&sentinel)
                .ok()
                .map(|token| token.trim().to_string()),
            held_by_this_process: self.held_folder() == Some(folder),
            sentinel: sentinel.clone(),
        };
        tracing::warn!(
            "Lock conflict on {} (owner: {})",
            conflict.folder,
            conflict.owner.as_deref().unwrap_or("unknown")
        );

        match on_conflict(&conflict) {
            LockDecision::Abort => {
                tracing::info!("Lock conflict on {}: aborted by caller", folder);
                Err(LockError::Conflict {
                    sentinel,
                    owner: conflict.owner,
                })
            }
            LockDecision::ForceOverride => {
                tracing::warn!("Lock conflict on {}: forcing override", folder);
                if conflict.held_by_this_process {
                    self.held = None;
                }

                match fs::remove_file(&sentinel) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => return Err(LockError::OverrideFailed { sentinel, source }),
                }

                match self.create_sentinel(&sentinel) {
                    Ok(handle) => {
                        self.adopt(folder, sentinel, handle);
                        Ok(())
                    }
                    // Someone recreated it between our delete and create.
                    Err(source) if source.kind() == io::ErrorKind::AlreadyExists => {
                        Err(LockError::OverrideFailed { sentinel, source })
                    }
                    Err(source) => Err(LockError::CreateFailed { sentinel, source }),
                }
            }
        }
    }

    /// Give up the lock on `folder`.
    ///
    /// Does nothing when `folder` is not the locked one or no longer exists,
    /// so it is safe to call any number of times. The sentinel is only deleted
    /// while it still carries this instance's token.
    pub fn release(&mut self, folder: &Utf8Path) {
        if self.held_folder() != Some(folder) {
            return;
        }
        let Some(held) = self.held.take() else {
            return;
        };
        drop(held.handle);

        if !held.folder.is_dir() {
            tracing::debug!("Lock folder {} is gone, nothing to release", held.folder);
            return;
        }

        match fs::read_to_string(&held.sentinel) {
            Ok(token) if token.trim() != self.runtime_id.as_str() => {
                tracing::warn!(
                    "Lock file {} now belongs to another session, leaving it",
                    held.sentinel
                );
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            _ => {}
        }

        match fs::remove_file(&held.sentinel) {
            Ok(()) => tracing::info!("Released lock on {}", held.folder),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to delete lock file {}: {}", held.sentinel, e),
        }
    }

    /// Release whatever folder is locked.
    pub fn release_held(&mut self) {
        if let Some(folder) = self.held_folder().map(Utf8Path::to_path_buf) {
            self.release(&folder);
        }
    }

    fn create_sentinel(&self, sentinel: &Utf8Path) -> io::Result<File> {
        let mut options = fs_attrs::create_new_options(true);
        fs_attrs::make_exclusive(&mut options);
        let mut handle = options.open(sentinel)?;

        let written = handle
            .write_all(self.runtime_id.as_str().as_bytes())
            .and_then(|()| handle.sync_all());
        if let Err(e) = written {
            drop(handle);
            let _ = fs::remove_file(sentinel);
            return Err(e);
        }

        Ok(handle)
    }

    fn adopt(&mut self, folder: &Utf8Path, sentinel: Utf8PathBuf, handle: File) {
        tracing::info!("Locked {} ({})", folder, self.runtime_id);
        self.held = Some(HeldLock {
            folder: folder.to_path_buf(),
            sentinel,
            handle,
        });
    }
}

impl Drop for FolderLock {
    fn drop(&mut self) {
        self.release_held();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LOCK_NAME: &str = ".test.lock";

    fn temp_folder() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, path)
    }

    fn never_called(_: &LockConflict) -> LockDecision {
        panic!("no conflict expected")
    }

    #[test]
    fn test_acquire_writes_runtime_id() {
        let (_temp_dir, folder) = temp_folder();
        let mut lock = FolderLock::new(LOCK_NAME, RuntimeId::generate());

        lock.acquire(&folder, never_called).unwrap();

        assert!(lock.is_held());
        assert_eq!(lock.held_folder(), Some(folder.as_path()));
        assert!(folder.join(LOCK_NAME).exists());
    }

    #[test]
    #[cfg(not(windows))]
    fn test_sentinel_content_is_runtime_id() {
        let (_temp_dir, folder) = temp_folder();
        let id = RuntimeId::generate();
        let mut lock = FolderLock::new(LOCK_NAME, id.clone());

        lock.acquire(&folder, never_called).unwrap();

        let content = fs::read_to_string(folder.join(LOCK_NAME)).unwrap();
        assert_eq!(content, id.as_str());
    }

    #[test]
    fn test_second_acquire_same_process_raises_conflict() {
        let (_temp_dir, folder) = temp_folder();
        let mut lock = FolderLock::new(LOCK_NAME, RuntimeId::generate());
        lock.acquire(&folder, never_called).unwrap();

        let mut seen = None;
        let result = lock.acquire(&folder, |conflict| {
            seen = Some(conflict.clone());
            LockDecision::Abort
        });

        assert!(matches!(result, Err(LockError::Conflict { .. })));
        assert!(seen.unwrap().held_by_this_process);
        assert!(lock.is_held());
    }

    #[test]
    fn test_release_deletes_sentinel_and_is_idempotent() {
        let (_temp_dir, folder) = temp_folder();
        let mut lock = FolderLock::new(LOCK_NAME, RuntimeId::generate());
        lock.acquire(&folder, never_called).unwrap();

        lock.release(&folder);
        lock.release(&folder);

        assert!(!lock.is_held());
        assert!(!folder.join(LOCK_NAME).exists());
    }

    #[test]
    fn test_release_unlocked_folder_is_noop() {
        let (_temp_dir, folder) = temp_folder();
        let mut lock = FolderLock::new(LOCK_NAME, RuntimeId::generate());

        lock.release(&folder);
        lock.release(Utf8Path::new("/nonexistent/folder"));

        assert!(!lock.is_held());
    }

    #[test]
    fn test_acquire_other_folder_releases_previous() {
        let (_temp_a, folder_a) = temp_folder();
        let (_temp_b, folder_b) = temp_folder();
        let mut lock = FolderLock::new(LOCK_NAME, RuntimeId::generate());

        lock.acquire(&folder_a, never_called).unwrap();
        lock.acquire(&folder_b, never_called).unwrap();

        assert!(!folder_a.join(LOCK_NAME).exists());
        assert!(folder_b.join(LOCK_NAME).exists());
        assert_eq!(lock.held_folder(), Some(folder_b.as_path()));
    }

    #[test]
    fn test_drop_releases() {
        let (_temp_dir, folder) = temp_folder();
        {
            let mut lock = FolderLock::new(LOCK_NAME, RuntimeId::generate());
            lock.acquire(&folder, never_called).unwrap();
        }
        assert!(!folder.join(LOCK_NAME).exists());
    }

    #[test]
    fn test_missing_folder_is_create_failed() {
        let mut lock = FolderLock::new(LOCK_NAME, RuntimeId::generate());
        let result = lock.acquire(Utf8Path::new("/nonexistent/folder"), never_called);
        assert!(matches!(result, Err(LockError::CreateFailed { .. })));
        assert!(!lock.is_held());
    }
}

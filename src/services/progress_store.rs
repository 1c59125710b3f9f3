use crate::models::{AppSettings, PersistedRecord, RecordMap};
use crate::services::fs_attrs;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;
use std::io::{self, Write};
use thiserror::Error;

/// Sidecar content: file name to persisted fields.
pub type ProgressSnapshot = IndexMap<String, PersistedRecord>;

/// Errors that can occur while saving or loading progress
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Progress file {path} is corrupt: {source}")]
    Corrupt {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize progress: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Utf8Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How the sidecar is named and written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub file_name: String,
    pub backup_extension: String,
    pub indent: bool,
    pub hide: bool,
}

impl From<&AppSettings> for StoreOptions {
    fn from(settings: &AppSettings) -> Self {
        Self {
            file_name: settings.save_file_name.clone(),
            backup_extension: settings.backup_extension.clone(),
            indent: settings.indent_save_file,
            hide: settings.hide_save_file,
        }
    }
}

/// Result of a save request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Folder gone or nothing to persist
    Skipped,
    Written {
        path: Utf8PathBuf,
        backup: Option<Utf8PathBuf>,
        records: usize,
    },
}

/// How a loaded sidecar lined up with the records found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Saved entries applied to an existing record
    pub applied: usize,
    /// Records on disk that the sidecar did not know about
    pub new_on_disk: usize,
    /// Saved entries whose file no longer exists
    pub stale: usize,
}

/// Result of a load request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No sidecar yet; expected on the first visit of a folder
    NotFound,
    Merged(MergeSummary),
}

/// Reads and writes the per-folder progress sidecar.
///
/// Every save writes the full snapshot to a temporary file and renames it
/// over the previous one, so a crash mid-write never leaves a truncated
/// sidecar behind.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    options: StoreOptions,
}

impl ProgressStore {
    pub fn new(options: StoreOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn save_path(&self, folder: &Utf8Path) -> Utf8PathBuf {
        folder.join(&self.options.file_name)
    }

    pub fn backup_path(&self, folder: &Utf8Path) -> Utf8PathBuf {
        folder.join(format!(
            "{}.{}",
            self.options.file_name, self.options.backup_extension
        ))
    }

    fn staging_path(&self, folder: &Utf8Path) -> Utf8PathBuf {
        folder.join(format!("{}.tmp", self.options.file_name))
    }

    /// Persist the selection and timestamps of every record.
    ///
    /// With `make_backup`, the previous sidecar is first copied next to it.
    /// An error means nothing durable changed except possibly the backup.
    pub fn save(
        &self,
        folder: &Utf8Path,
        records: &RecordMap,
        make_backup: bool,
    ) -> Result<SaveOutcome, StoreError> {
        if !folder.is_dir() || records.is_empty() {
            tracing::debug!("Nothing to save for {}", folder);
            return Ok(SaveOutcome::Skipped);
        }

        let path = self.save_path(folder);
        let snapshot: ProgressSnapshot = records
            .iter()
            .map(|(name, record)| (name.clone(), record.persisted()))
            .collect();
        let bytes = if self.options.indent {
            serde_json::to_vec_pretty(&snapshot)?
        } else {
            serde_json::to_vec(&snapshot)?
        };

        let existed = path.exists();
        if existed {
            fs_attrs::clear_readonly(&path).map_err(StoreError::io(&path))?;
        }

        let backup = if make_backup && existed {
            Some(self.write_backup(folder, &path)?)
        } else {
            None
        };

        let staging = self.staging_path(folder);
        let written = self
            .write_staging(&staging, &bytes)
            .and_then(|()| fs::rename(&staging, &path));
        if let Err(source) = written {
            let _ = fs::remove_file(&staging);
            return Err(StoreError::Io { path, source });
        }

        tracing::info!(
            "Saved progress for {} records to {}{}",
            snapshot.len(),
            path,
            if backup.is_some() { " (with backup)" } else { "" }
        );

        Ok(SaveOutcome::Written {
            path,
            backup,
            records: snapshot.len(),
        })
    }

    /// Read the sidecar of `folder`, if there is one.
    pub fn read(&self, folder: &Utf8Path) -> Result<Option<ProgressSnapshot>, StoreError> {
        let path = self.save_path(folder);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }

    /// Read the sidecar and merge it into `records`.
    ///
    /// A corrupt sidecar is an error and leaves `records` untouched.
    pub fn load(
        &self,
        folder: &Utf8Path,
        records: &mut RecordMap,
    ) -> Result<LoadOutcome, StoreError> {
        match self.read(folder)? {
            None => {
                tracing::info!("No progress file in {}, starting fresh", folder);
                Ok(LoadOutcome::NotFound)
            }
            Some(snapshot) => {
                let summary = merge_snapshot(&snapshot, records);
                tracing::info!(
                    "Loaded progress from {}: {} applied, {} new, {} stale",
                    folder,
                    summary.applied,
                    summary.new_on_disk,
                    summary.stale
                );
                Ok(LoadOutcome::Merged(summary))
            }
        }
    }

    fn write_backup(&self, folder: &Utf8Path, path: &Utf8Path) -> Result<Utf8PathBuf, StoreError> {
        let backup = self.backup_path(folder);
        fs_attrs::clear_readonly(&backup).map_err(StoreError::io(&backup))?;
        match fs::remove_file(&backup) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(StoreError::Io { path: backup, source }),
        }
        fs::copy(path, &backup).map_err(StoreError::io(&backup))?;
        tracing::debug!("Backed up {} to {}", path, backup);
        Ok(backup)
    }

    fn write_staging(&self, staging: &Utf8Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = fs_attrs::create_options(self.options.hide).open(staging)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

/// Apply saved fields onto the in-memory records.
///
/// Only keys present on both sides are touched, and only `is_selected` and a
/// known `capture_timestamp` are copied. Records missing from the snapshot
/// keep their defaults; snapshot entries without a record are ignored.
pub fn merge_snapshot(snapshot: &ProgressSnapshot, records: &mut RecordMap) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for (name, saved) in snapshot {
        match records.get_mut(name) {
            Some(record) => {
                record.is_selected = saved.is_selected;
                if saved.capture_timestamp.is_some() {
                    record.capture_timestamp = saved.capture_timestamp;
                }
                summary.applied += 1;
            }
            None => summary.stale += 1,
        }
    }

    summary.new_on_disk = records
        .keys()
        .filter(|name| !snapshot.contains_key(*name))
        .count();

    summary
}

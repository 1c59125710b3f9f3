use crate::models::{ImageRecord, RecordMap};
use crate::state::{BatchOperation, BatchProgress};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use thiserror::Error;
use uuid::Uuid;

/// strftime pattern of capture-date file names (extension appended separately)
pub const CAPTURE_NAME_FORMAT: &str = "IMG_%Y%m%d_%H%M%S";

/// How exported or renamed files are named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportNaming {
    /// Keep the original file name
    #[default]
    Original,
    /// `IMG_YYYYMMDD_HHMMSS.<ext>` from the capture time; unresolved
    /// pictures keep their original name
    CaptureDate,
}

/// A file copied by an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub source: String,
    pub destination: String,
}

/// Errors that can occur while exporting
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No picture is selected")]
    NothingSelected,

    #[error("Cannot derive an export folder from {0}")]
    InvalidSourceFolder(Utf8PathBuf),

    #[error("Export destination exists and is not a folder: {0}")]
    DestinationExists(Utf8PathBuf),

    #[error("Failed to create export folder {path}: {source}")]
    CreateDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to copy {file_name} to {destination} ({} files already copied): {source}", .copied.len())]
    Copy {
        file_name: String,
        destination: Utf8PathBuf,
        /// Files copied before the failure; they stay in place
        copied: Vec<CopiedFile>,
        #[source]
        source: io::Error,
    },
}

/// Result of a completed export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub destination: Utf8PathBuf,
    pub copied: Vec<CopiedFile>,
}

/// Where one file of a rename batch ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedFile {
    pub original: String,
    /// Name the file has on disk now
    pub current: String,
    /// Name the file was meant to get
    pub planned: String,
}

impl RenamedFile {
    /// The file reached its planned name
    pub fn is_final(&self) -> bool {
        self.current == self.planned
    }
}

/// Outcome of a rename batch, complete or not
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameReport {
    pub files: Vec<RenamedFile>,
}

impl RenameReport {
    pub fn finalized(&self) -> impl Iterator<Item = &RenamedFile> {
        self.files.iter().filter(|file| file.is_final())
    }

    /// Files left under their random staging name
    pub fn stranded(&self) -> impl Iterator<Item = &RenamedFile> {
        self.files.iter().filter(|file| !file.is_final())
    }

    pub fn is_complete(&self) -> bool {
        self.files.iter().all(RenamedFile::is_final)
    }
}

/// Errors that can occur while renaming in place
#[derive(Error, Debug)]
pub enum RenameError {
    #[error("Cannot rename in {0}: folder not found")]
    Plan(Utf8PathBuf),

    #[error("Failed to stage {file_name} for renaming (rolled back: {rolled_back}): {source}")]
    Stage {
        file_name: String,
        /// Every already staged file got its original name back
        rolled_back: bool,
        #[source]
        source: io::Error,
    },

    #[error("{} of {} files are still under staging names", .report.stranded().count(), .report.files.len())]
    Incomplete {
        report: RenameReport,
        failures: Vec<(String, io::Error)>,
    },
}

/// Capture-date name of a record, if its timestamp is known
pub fn capture_date_name(record: &ImageRecord) -> Option<String> {
    let timestamp = record.capture_timestamp?;
    let stem = timestamp.format(CAPTURE_NAME_FORMAT).to_string();
    Some(match Utf8Path::new(&record.file_name).extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_lowercase()),
        None => stem,
    })
}

/// Name a record should get under `naming`, before collision handling
pub fn target_name(record: &ImageRecord, naming: ExportNaming) -> String {
    match naming {
        ExportNaming::Original => record.file_name.clone(),
        ExportNaming::CaptureDate => {
            capture_date_name(record).unwrap_or_else(|| record.file_name.clone())
        }
    }
}

/// Hands out collision-free file names inside one folder for one batch.
///
/// A name is taken if an earlier call in the same batch reserved it, or if a
/// file of that name exists and is not about to be moved away. Taken names
/// get `_2`, `_3`, ... inserted before the extension. Comparisons ignore
/// case so the result is safe on case-insensitive file systems.
#[derive(Debug)]
pub struct NamePlanner {
    folder: Utf8PathBuf,
    reserved: HashSet<String>,
    vacating: HashSet<String>,
}

impl NamePlanner {
    pub fn new(folder: &Utf8Path) -> Self {
        Self {
            folder: folder.to_path_buf(),
            reserved: HashSet::new(),
            vacating: HashSet::new(),
        }
    }

    /// Treat `names` as free on disk; they belong to files leaving the folder.
    pub fn vacating<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.vacating
            .extend(names.into_iter().map(|name| name.as_ref().to_lowercase()));
        self
    }

    pub fn reserve(&mut self, desired: &str) -> String {
        let path = Utf8Path::new(desired);
        let stem = path.file_stem().unwrap_or(desired);
        let extension = path.extension();

        let mut candidate = desired.to_string();
        let mut counter = 2;
        while self.is_taken(&candidate) {
            candidate = match extension {
                Some(ext) => format!("{}_{}.{}", stem, counter, ext),
                None => format!("{}_{}", stem, counter),
            };
            counter += 1;
        }

        self.reserved.insert(candidate.to_lowercase());
        candidate
    }

    fn is_taken(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.reserved.contains(&key)
            || (self.folder.join(name).exists() && !self.vacating.contains(&key))
    }
}

/// Folder next to `source` receiving an export: `<name> <label> <n>`.
///
/// A trailing `" <label> <n>"` already on the source name is dropped first, so
/// exporting from `Trip sorted 1` yields `Trip sorted 2` rather than
/// `Trip sorted 1 sorted 1`. `n` is the first counter from 1 that is free.
pub fn export_folder_path(source: &Utf8Path, label: &str) -> Result<Utf8PathBuf, ExportError> {
    let invalid = || ExportError::InvalidSourceFolder(source.to_path_buf());
    let parent = source.parent().ok_or_else(invalid)?;
    let name = source.file_name().ok_or_else(invalid)?;

    let suffix = Regex::new(&format!(r"^(.*) {} \d+$", regex::escape(label)))
        .map_err(|_| invalid())?;
    let base = suffix
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(name);

    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{} {} {}", base, label, counter));
        if !candidate.exists() {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// Copy every selected record into `destination`.
///
/// Records are taken in map order. Nothing is ever overwritten; the first
/// failure stops the batch and the error lists what had been copied.
pub fn export_selected<F>(
    records: &RecordMap,
    destination: &Utf8Path,
    naming: ExportNaming,
    mut on_progress: F,
) -> Result<ExportReport, ExportError>
where
    F: FnMut(&BatchProgress),
{
    let selected: Vec<&ImageRecord> = records.values().filter(|r| r.is_selected).collect();
    if selected.is_empty() {
        return Err(ExportError::NothingSelected);
    }

    if destination.exists() && !destination.is_dir() {
        return Err(ExportError::DestinationExists(destination.to_path_buf()));
    }
    fs::create_dir_all(destination).map_err(|source| ExportError::CreateDir {
        path: destination.to_path_buf(),
        source,
    })?;
    tracing::info!("Exporting {} pictures to {}", selected.len(), destination);

    let mut planner = NamePlanner::new(destination);
    let mut copied = Vec::with_capacity(selected.len());

    for (position, record) in selected.iter().enumerate() {
        let name = planner.reserve(&target_name(record, naming));
        let target = destination.join(&name);

        if let Err(source) = copy_without_overwrite(&record.full_path, &target) {
            tracing::error!("Export stopped at {}: {}", record.file_name, source);
            return Err(ExportError::Copy {
                file_name: record.file_name.clone(),
                destination: target,
                copied,
                source,
            });
        }

        copied.push(CopiedFile {
            source: record.file_name.clone(),
            destination: name,
        });
        on_progress(&BatchProgress {
            operation: BatchOperation::Export,
            current: position + 1,
            total: selected.len(),
            file_name: record.file_name.clone(),
        });
    }

    Ok(ExportReport {
        destination: destination.to_path_buf(),
        copied,
    })
}

fn copy_without_overwrite(source: &Utf8Path, target: &Utf8Path) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)?;

    let copied = io::copy(&mut input, &mut output).and_then(|bytes| {
        output.sync_all()?;
        Ok(bytes)
    });
    match copied {
        Ok(bytes) => {
            if let Ok(modified) = input.metadata().and_then(|m| m.modified()) {
                let _ = output.set_modified(modified);
            }
            Ok(bytes)
        }
        Err(e) => {
            drop(output);
            let _ = fs::remove_file(target);
            Err(e)
        }
    }
}

/// Rename every record with a known capture time to its capture-date name.
///
/// Runs in two phases so that overlapping old and new names cannot clash:
/// every file first moves to a random name, then to its final one. If the
/// first phase fails the staged files are moved back. If the second phase
/// fails for some files, the others still finish and the error carries a
/// report of which files sit under their final name and which under a
/// random one. There is no automatic resume.
pub fn rename_by_capture_date<F>(
    folder: &Utf8Path,
    records: &RecordMap,
    mut on_progress: F,
) -> Result<RenameReport, RenameError>
where
    F: FnMut(&BatchProgress),
{
    if !folder.is_dir() {
        return Err(RenameError::Plan(folder.to_path_buf()));
    }

    let batch: Vec<(String, String)> = records
        .values()
        .filter_map(|record| {
            capture_date_name(record)
                .filter(|name| *name != record.file_name)
                .map(|name| (record.file_name.clone(), name))
        })
        .collect();

    let mut planner =
        NamePlanner::new(folder).vacating(batch.iter().map(|(original, _)| original));
    let mut files: Vec<RenamedFile> = batch
        .iter()
        .map(|(original, desired)| RenamedFile {
            original: original.clone(),
            current: original.clone(),
            planned: planner.reserve(desired),
        })
        .collect();
    let total = files.len() * 2;
    tracing::info!("Renaming {} pictures in {}", files.len(), folder);

    for position in 0..files.len() {
        let staged = staging_name(&files[position].original);
        let result = fs::rename(
            folder.join(&files[position].original),
            folder.join(&staged),
        );
        if let Err(source) = result {
            let rolled_back = unstage(folder, &mut files[..position]);
            tracing::error!(
                "Staging {} failed, rolled back: {}",
                files[position].original,
                rolled_back
            );
            return Err(RenameError::Stage {
                file_name: files[position].original.clone(),
                rolled_back,
                source,
            });
        }
        files[position].current = staged;
        on_progress(&BatchProgress {
            operation: BatchOperation::Rename,
            current: position + 1,
            total,
            file_name: files[position].original.clone(),
        });
    }

    let mut failures = Vec::new();
    let staged_count = files.len();
    for (position, file) in files.iter_mut().enumerate() {
        match move_without_overwrite(folder, &file.current, &file.planned) {
            Ok(()) => file.current = file.planned.clone(),
            Err(e) => {
                tracing::error!(
                    "{} stays as {}: could not take {}: {}",
                    file.original,
                    file.current,
                    file.planned,
                    e
                );
                failures.push((file.original.clone(), e));
            }
        }
        on_progress(&BatchProgress {
            operation: BatchOperation::Rename,
            current: staged_count + position + 1,
            total,
            file_name: file.original.clone(),
        });
    }

    let report = RenameReport { files };
    if failures.is_empty() {
        Ok(report)
    } else {
        Err(RenameError::Incomplete { report, failures })
    }
}

fn staging_name(original: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    match Utf8Path::new(original).extension() {
        Some(ext) => format!("{}.{}", token, ext),
        None => token,
    }
}

/// Move staged files back to their original names. True if all made it.
fn unstage(folder: &Utf8Path, files: &mut [RenamedFile]) -> bool {
    let mut all_restored = true;
    for file in files.iter_mut() {
        match move_without_overwrite(folder, &file.current, &file.original) {
            Ok(()) => file.current = file.original.clone(),
            Err(e) => {
                tracing::error!("Could not restore {} from {}: {}", file.original, file.current, e);
                all_restored = false;
            }
        }
    }
    all_restored
}

fn move_without_overwrite(folder: &Utf8Path, from: &str, to: &str) -> io::Result<()> {
    let target = folder.join(to);
    if target.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", target),
        ));
    }
    fs::rename(folder.join(from), target)
}

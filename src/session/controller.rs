// Session controller
//
// Drives one folder at a time through Closed -> Locking -> Scanning ->
// Resolving -> Ready and back, wiring the lock, the scanner, the progress
// store, the timestamp resolver and the cache together.

use crate::metrics::SessionMetrics;
use crate::models::{AppSettings, ImageRecord, RecordMap};
use crate::services::export::{self, ExportNaming, ExportReport, RenameReport};
use crate::services::{
    CacheError, ExportError, FolderLock, ImageDecoder, LoadOutcome, LockConflict, LockDecision,
    LockError, ProgressStore, RenameError, RuntimeId, SaveOutcome, ScanError, SessionCache,
    StoreError, StoreOptions, TimestampResolver, scan_images,
};
use crate::session::deferred::{DeferredPrepare, PrepareRequest};
use crate::state::{BatchOperation, BatchProgress, EventBus, SessionEvent, SessionPhase};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by the controller
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No folder is ready (session is {0})")]
    NotReady(SessionPhase),

    #[error("No picture named {0} in this session")]
    UnknownRecord(String),

    #[error("Index {index} is outside the session ({total} pictures)")]
    IndexOutOfBounds { index: usize, total: usize },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Rename(#[from] RenameError),
}

/// What opening a folder found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSummary {
    pub folder: Utf8PathBuf,
    pub records: usize,
    pub load: LoadOutcome,
    /// Capture times resolved during this open
    pub resolved: usize,
}

/// What a rescan changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub records: usize,
    pub added: usize,
    pub removed: usize,
    pub resolved: usize,
}

/// Result of an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub report: ExportReport,
    /// The exported folder is now the open session
    pub reopened: bool,
}

/// Orchestrates a sorting session over one folder.
///
/// Owns the record map, the cache, the folder lock and the progress store.
/// Nothing here is shared between threads; the only postponed work is the
/// cache preparation queued by [`select`](Self::select).
///
/// Any failure while a folder is being opened leaves the controller
/// `Closed` with the lock released. Failures once `Ready` are reported but
/// keep the session open; a failed save does not undo the in-memory change.
pub struct SessionController {
    settings: AppSettings,
    decoder: Box<dyn ImageDecoder>,
    resolver: TimestampResolver,
    lock: FolderLock,
    store: ProgressStore,
    cache: SessionCache,
    records: RecordMap,
    folder: Option<Utf8PathBuf>,
    phase: SessionPhase,
    selected: Option<usize>,
    deferred: DeferredPrepare,
    events: EventBus,
    metrics: Arc<SessionMetrics>,
}

impl SessionController {
    pub fn new(
        settings: AppSettings,
        decoder: Box<dyn ImageDecoder>,
        resolver: TimestampResolver,
    ) -> Self {
        let lock = FolderLock::new(settings.lock_file_name.clone(), RuntimeId::generate());
        tracing::debug!("Session runtime id {}", lock.runtime_id());

        Self {
            lock,
            store: ProgressStore::new(StoreOptions::from(&settings)),
            cache: SessionCache::new(settings.cached_images_count),
            deferred: DeferredPrepare::new(settings.prepare_delay()),
            records: RecordMap::new(),
            folder: None,
            phase: SessionPhase::Closed,
            selected: None,
            events: EventBus::new(),
            metrics: Arc::new(SessionMetrics::new()),
            settings,
            decoder,
            resolver,
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn folder(&self) -> Option<&Utf8Path> {
        self.folder.as_deref()
    }

    /// Records in display order
    pub fn records(&self) -> &RecordMap {
        &self.records
    }

    pub fn record(&self, file_name: &str) -> Option<&ImageRecord> {
        self.records.get(file_name)
    }

    pub fn record_at(&self, index: usize) -> Option<&ImageRecord> {
        self.records.get_index(index).map(|(_, record)| record)
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_count(&self) -> usize {
        self.records.values().filter(|r| r.is_selected).count()
    }

    /// File names currently holding a decoded image, oldest first
    pub fn resident(&self) -> &[String] {
        self.cache.resident()
    }

    pub fn pending_prepares(&self) -> usize {
        self.deferred.len()
    }

    pub fn runtime_id(&self) -> &RuntimeId {
        self.lock.runtime_id()
    }

    pub fn lock_path(&self, folder: &Utf8Path) -> Utf8PathBuf {
        self.lock.sentinel_path(folder)
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Open `folder`, closing whatever was open before.
    ///
    /// `on_conflict` is asked what to do if the folder is already locked.
    pub fn open_folder<F>(
        &mut self,
        folder: &Utf8Path,
        on_conflict: F,
    ) -> Result<OpenSummary, SessionError>
    where
        F: FnOnce(&LockConflict) -> LockDecision,
    {
        if self.phase != SessionPhase::Closed {
            self.close();
        }

        tracing::info!("Opening folder {}", folder);
        match self.open_steps(folder, on_conflict) {
            Ok(summary) => {
                tracing::info!(
                    "Folder {} ready with {} pictures ({} selected)",
                    folder,
                    summary.records,
                    self.selected_count()
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!("Failed to open {}: {}", folder, e);
                self.teardown();
                Err(e)
            }
        }
    }

    fn open_steps<F>(
        &mut self,
        folder: &Utf8Path,
        on_conflict: F,
    ) -> Result<OpenSummary, SessionError>
    where
        F: FnOnce(&LockConflict) -> LockDecision,
    {
        self.enter(SessionPhase::Locking);
        self.lock.acquire(folder, on_conflict)?;
        self.folder = Some(folder.to_path_buf());

        self.enter(SessionPhase::Scanning);
        self.records = scan_images(folder, &self.settings)?
            .into_iter()
            .map(|name| (name.clone(), ImageRecord::new(folder, name)))
            .collect();

        self.enter(SessionPhase::Resolving);
        let load = self.store.load(folder, &mut self.records)?;
        let resolved = self.resolve_timestamps();
        self.persist(false)?;
        self.sort_records();

        self.enter(SessionPhase::Ready);
        self.metrics.record_folder_opened();
        self.events.emit(SessionEvent::FolderOpened {
            folder: folder.to_path_buf(),
            records: self.records.len(),
        });

        Ok(OpenSummary {
            folder: folder.to_path_buf(),
            records: self.records.len(),
            load,
            resolved,
        })
    }

    /// Pick up files added to or removed from the open folder.
    ///
    /// Known records keep their selection and capture time. The lock stays
    /// held; a failure closes the session like a failed open.
    pub fn rescan(&mut self) -> Result<ScanSummary, SessionError> {
        let folder = self.ensure_ready()?;
        match self.rescan_steps(&folder) {
            Ok(summary) => {
                tracing::info!(
                    "Rescanned {}: {} pictures, {} added, {} removed",
                    folder,
                    summary.records,
                    summary.added,
                    summary.removed
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!("Rescan of {} failed: {}", folder, e);
                self.close();
                Err(e)
            }
        }
    }

    fn rescan_steps(&mut self, folder: &Utf8Path) -> Result<ScanSummary, SessionError> {
        self.deferred.clear();
        self.cache.clear(&mut self.records);
        self.selected = None;

        self.enter(SessionPhase::Scanning);
        let names = scan_images(folder, &self.settings)?;
        let mut previous = std::mem::take(&mut self.records);
        let mut added = 0;
        for name in names {
            let record = match previous.swap_remove(&name) {
                Some(record) => record,
                None => {
                    added += 1;
                    ImageRecord::new(folder, name.clone())
                }
            };
            self.records.insert(name, record);
        }
        let removed = previous.len();

        self.enter(SessionPhase::Resolving);
        let resolved = self.resolve_timestamps();
        self.persist(false)?;
        self.sort_records();

        self.enter(SessionPhase::Ready);
        Ok(ScanSummary {
            records: self.records.len(),
            added,
            removed,
            resolved,
        })
    }

    /// Close the session: drop decoded images and records, release the lock.
    ///
    /// Safe to call in any phase and more than once.
    pub fn close(&mut self) {
        if self.phase == SessionPhase::Closed {
            return;
        }

        if let Some(folder) = self.teardown() {
            tracing::info!("Closed folder {}", folder);
            self.events.emit(SessionEvent::FolderClosed { folder });
        }
        self.metrics.log_summary();
    }

    fn teardown(&mut self) -> Option<Utf8PathBuf> {
        self.deferred.clear();
        self.cache.clear(&mut self.records);
        self.records.clear();
        self.selected = None;
        self.lock.release_held();
        if self.phase != SessionPhase::Closed {
            self.enter(SessionPhase::Closed);
        }
        self.folder.take()
    }

    /// Make `index` the current picture and queue a cache preparation.
    ///
    /// The cache is not touched until [`run_deferred`](Self::run_deferred) or
    /// [`flush_deferred`](Self::flush_deferred) runs.
    pub fn select(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let total = self.records.len();
        if index >= total {
            return Err(SessionError::IndexOutOfBounds { index, total });
        }

        self.selected = Some(index);
        self.deferred.push(PrepareRequest {
            selected_index: index,
            total_count: total,
        });
        Ok(())
    }

    /// Wait the configured delay, then run every queued preparation.
    pub async fn run_deferred(&mut self) -> Result<usize, SessionError> {
        if self.deferred.is_empty() {
            return Ok(0);
        }
        tokio::time::sleep(self.deferred.delay()).await;
        self.flush_deferred()
    }

    /// Run every queued preparation now, oldest first.
    ///
    /// Returns how many ran. Requests made for a session that has since
    /// changed size are dropped.
    pub fn flush_deferred(&mut self) -> Result<usize, SessionError> {
        let mut ran = 0;
        while let Some(request) = self.deferred.pop() {
            if self.phase != SessionPhase::Ready || request.total_count != self.records.len() {
                tracing::debug!(
                    "Dropping stale cache request for index {}",
                    request.selected_index
                );
                continue;
            }
            if let Err(e) = self.prepare(request) {
                self.deferred.clear();
                return Err(e);
            }
            ran += 1;
        }
        Ok(ran)
    }

    fn prepare(&mut self, request: PrepareRequest) -> Result<(), SessionError> {
        let before = self.cache.len();
        let started = Instant::now();
        let decoded = self.cache.prepare(
            &mut self.records,
            request.selected_index,
            request.total_count,
            self.decoder.as_ref(),
        )?;
        let evicted = (before + decoded).saturating_sub(self.cache.len());

        self.metrics.record_prepare(decoded, evicted, started.elapsed());
        self.events.emit(SessionEvent::CacheUpdated {
            resident: self.cache.resident().to_vec(),
        });
        Ok(())
    }

    /// Flip the selection of one picture and save. Returns the new flag.
    pub fn toggle_selection(&mut self, file_name: &str) -> Result<bool, SessionError> {
        self.ensure_ready()?;
        let record = self
            .records
            .get_mut(file_name)
            .ok_or_else(|| SessionError::UnknownRecord(file_name.to_string()))?;
        let selected = record.toggle_selection();
        tracing::debug!("{} is now {}", file_name, if selected { "kept" } else { "discarded" });

        self.selection_changed();
        self.persist(false)?;
        Ok(selected)
    }

    /// Set the selection of one picture, saving only if it changed.
    pub fn set_selected(&mut self, file_name: &str, selected: bool) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let record = self
            .records
            .get_mut(file_name)
            .ok_or_else(|| SessionError::UnknownRecord(file_name.to_string()))?;
        if record.is_selected == selected {
            return Ok(());
        }
        record.is_selected = selected;

        self.selection_changed();
        self.persist(false)?;
        Ok(())
    }

    /// Select every picture. Returns how many changed.
    pub fn select_all(&mut self) -> Result<usize, SessionError> {
        self.set_all(true)
    }

    /// Deselect every picture. Returns how many changed.
    pub fn deselect_all(&mut self) -> Result<usize, SessionError> {
        self.set_all(false)
    }

    // A bulk change cannot be undone one picture at a time, so the current
    // sidecar is backed up first. If that fails nothing is changed.
    fn set_all(&mut self, selected: bool) -> Result<usize, SessionError> {
        self.ensure_ready()?;
        self.persist(true)?;

        let mut changed = 0;
        for record in self.records.values_mut() {
            if record.is_selected != selected {
                record.is_selected = selected;
                changed += 1;
            }
        }
        tracing::info!(
            "{} all pictures ({} changed)",
            if selected { "Selected" } else { "Deselected" },
            changed
        );

        self.selection_changed();
        self.persist(false)?;
        Ok(changed)
    }

    /// Copy the selected pictures into a fresh folder next to the current one.
    pub fn export(&mut self, naming: ExportNaming) -> Result<ExportSummary, SessionError> {
        let folder = self.ensure_ready()?;
        let destination = export::export_folder_path(&folder, &self.settings.export_folder_label)?;
        self.export_to(&destination, naming)
    }

    /// Copy the selected pictures into `destination`.
    ///
    /// With `open_folder_after_export` the destination becomes the open
    /// session afterwards. If it cannot be opened the source is reopened.
    pub fn export_to(
        &mut self,
        destination: &Utf8Path,
        naming: ExportNaming,
    ) -> Result<ExportSummary, SessionError> {
        let source = self.ensure_ready()?;

        let events = &self.events;
        let result = export::export_selected(&self.records, destination, naming, |progress| {
            events.emit(SessionEvent::BatchProgress(progress.clone()));
        });
        match &result {
            Ok(report) => self.metrics.record_exported(report.copied.len()),
            Err(ExportError::Copy { copied, .. }) => self.metrics.record_exported(copied.len()),
            Err(_) => {}
        }
        let report = result?;
        tracing::info!(
            "Exported {} pictures from {} to {}",
            report.copied.len(),
            source,
            destination
        );

        let reopened = self.settings.open_folder_after_export
            && match self.open_folder(destination, |_| LockDecision::Abort) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("Could not open exported folder {}: {}", destination, e);
                    if let Err(e) = self.open_folder(&source, |_| LockDecision::Abort) {
                        tracing::error!("Could not reopen {}: {}", source, e);
                    }
                    false
                }
            };

        Ok(ExportSummary { report, reopened })
    }

    /// Rename every picture with a known capture time to `IMG_<date>_<time>`.
    ///
    /// The record map follows the files to their new names and is saved, also
    /// when only part of the batch went through. In that case the error's
    /// report says which files still carry a random staging name.
    pub fn rename_by_capture_date(&mut self) -> Result<RenameReport, SessionError> {
        let folder = self.ensure_ready()?;
        self.deferred.clear();
        self.cache.clear(&mut self.records);
        self.selected = None;

        let events = &self.events;
        let result = export::rename_by_capture_date(&folder, &self.records, |progress| {
            events.emit(SessionEvent::BatchProgress(progress.clone()));
        });

        match result {
            Ok(report) => {
                self.apply_renames(&report);
                self.persist(false)?;
                Ok(report)
            }
            Err(RenameError::Incomplete { report, failures }) => {
                self.apply_renames(&report);
                if let Err(e) = self.persist(false) {
                    tracing::warn!("Could not save after partial rename: {}", e);
                }
                Err(RenameError::Incomplete { report, failures }.into())
            }
            Err(e @ RenameError::Stage {
                rolled_back: false, ..
            }) => {
                tracing::warn!("Rollback incomplete, rescanning {}", folder);
                if let Err(rescan) = self.rescan() {
                    tracing::error!("Rescan after failed rename failed: {}", rescan);
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_renames(&mut self, report: &RenameReport) {
        self.metrics.record_renamed(report.finalized().count());

        let moved: HashMap<&str, &str> = report
            .files
            .iter()
            .filter(|file| file.current != file.original)
            .map(|file| (file.original.as_str(), file.current.as_str()))
            .collect();
        if moved.is_empty() {
            return;
        }

        let records = std::mem::take(&mut self.records);
        self.records = records
            .into_iter()
            .map(|(name, mut record)| match moved.get(name.as_str()) {
                Some(new_name) => {
                    record.rename(*new_name);
                    (new_name.to_string(), record)
                }
                None => (name, record),
            })
            .collect();
        self.sort_records();
    }

    fn resolve_timestamps(&mut self) -> usize {
        let total = self
            .records
            .values()
            .filter(|r| r.capture_timestamp.is_none())
            .count();
        if total == 0 {
            return 0;
        }

        let mut resolved = 0;
        let pending = self
            .records
            .values_mut()
            .filter(|r| r.capture_timestamp.is_none());
        for (position, record) in pending.enumerate() {
            record.capture_timestamp = self.resolver.resolve(&record.full_path);
            if record.capture_timestamp.is_some() {
                resolved += 1;
            }
            self.events.emit(SessionEvent::BatchProgress(BatchProgress {
                operation: BatchOperation::ResolveTimestamps,
                current: position + 1,
                total,
                file_name: record.file_name.clone(),
            }));
        }

        tracing::info!("Resolved {} of {} capture times", resolved, total);
        resolved
    }

    /// Oldest first, unknown capture times before all known ones, ties by name.
    fn sort_records(&mut self) {
        self.records.sort_by(|_, a, _, b| {
            a.capture_timestamp
                .cmp(&b.capture_timestamp)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        for (position, record) in self.records.values_mut().enumerate() {
            record.index = Some(position as u32);
        }
    }

    fn persist(&self, make_backup: bool) -> Result<SaveOutcome, StoreError> {
        let Some(folder) = &self.folder else {
            return Ok(SaveOutcome::Skipped);
        };

        match self.store.save(folder, &self.records, make_backup) {
            Ok(outcome) => {
                if let SaveOutcome::Written { backup, .. } = &outcome {
                    self.metrics.record_save(backup.is_some());
                    self.events.emit(SessionEvent::ProgressSaved {
                        backup: backup.is_some(),
                    });
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("Failed to save progress in {}: {}", folder, e);
                self.metrics.record_save_failure();
                self.events.emit(SessionEvent::SaveFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn selection_changed(&self) {
        self.events.emit(SessionEvent::SelectionChanged {
            selected: self.selected_count(),
            total: self.records.len(),
        });
    }

    fn enter(&mut self, next: SessionPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.phase,
            next
        );
        let from = std::mem::replace(&mut self.phase, next);
        tracing::debug!("Session {} -> {}", from, next);
        self.events.emit(SessionEvent::PhaseChanged { from, to: next });
    }

    fn ensure_ready(&self) -> Result<Utf8PathBuf, SessionError> {
        match (&self.folder, self.phase) {
            (Some(folder), SessionPhase::Ready) => Ok(folder.clone()),
            _ => Err(SessionError::NotReady(self.phase)),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DecodedImage;
    use crate::services::DecodeError;
    use std::fs;
    use tempfile::TempDir;

    struct BlankDecoder;

    impl ImageDecoder for BlankDecoder {
        fn decode(&self, _path: &Utf8Path) -> Result<DecodedImage, DecodeError> {
            Ok(DecodedImage::new(1, 1, vec![0; 4]))
        }
    }

    fn controller(cached: u32) -> SessionController {
        let settings = AppSettings {
            cached_images_count: cached,
            ..AppSettings::default()
        };
        SessionController::new(settings, Box::new(BlankDecoder), TimestampResolver::new())
    }

    fn folder_with(names: &[&str]) -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        for name in names {
            fs::write(path.join(name), b"x").unwrap();
        }
        (temp_dir, path)
    }

    #[test]
    fn test_operations_need_ready_session() {
        let mut controller = controller(3);

        assert!(matches!(
            controller.select(0),
            Err(SessionError::NotReady(SessionPhase::Closed))
        ));
        assert!(matches!(
            controller.toggle_selection("a.jpg"),
            Err(SessionError::NotReady(_))
        ));
        assert!(matches!(controller.select_all(), Err(SessionError::NotReady(_))));
    }

    #[test]
    fn test_records_sorted_unknown_first() {
        let (_temp_dir, folder) = folder_with(&[
            "IMG_20240102_000000.jpg",
            "zebra.jpg",
            "IMG_20240101_000000.jpg",
            "apple.jpg",
        ]);
        let mut controller = controller(3);

        controller.open_folder(&folder, |_| LockDecision::Abort).unwrap();

        let order: Vec<&str> = controller.records().keys().map(String::as_str).collect();
        assert_eq!(
            order,
            vec![
                "apple.jpg",
                "zebra.jpg",
                "IMG_20240101_000000.jpg",
                "IMG_20240102_000000.jpg"
            ]
        );
        let indices: Vec<Option<u32>> = controller.records().values().map(|r| r.index).collect();
        assert_eq!(indices, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_select_is_deferred_until_flush() {
        let (_temp_dir, folder) = folder_with(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut controller = controller(3);
        controller.open_folder(&folder, |_| LockDecision::Abort).unwrap();

        controller.select(0).unwrap();
        assert!(controller.resident().is_empty());
        assert_eq!(controller.pending_prepares(), 1);

        assert_eq!(controller.flush_deferred().unwrap(), 1);
        assert_eq!(controller.resident(), ["a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_select_out_of_bounds() {
        let (_temp_dir, folder) = folder_with(&["a.jpg"]);
        let mut controller = controller(3);
        controller.open_folder(&folder, |_| LockDecision::Abort).unwrap();

        assert!(matches!(
            controller.select(1),
            Err(SessionError::IndexOutOfBounds { index: 1, total: 1 })
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_temp_dir, folder) = folder_with(&["a.jpg"]);
        let mut controller = controller(3);
        controller.open_folder(&folder, |_| LockDecision::Abort).unwrap();

        controller.close();
        controller.close();

        assert_eq!(controller.phase(), SessionPhase::Closed);
        assert!(controller.records().is_empty());
        assert!(controller.folder().is_none());
    }
}

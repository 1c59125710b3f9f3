//! Services module - the building blocks of a sorting session.
//!
//! Everything here works on plain data ([`RecordMap`](crate::models::RecordMap),
//! folders, settings) and knows nothing about the controller that drives it,
//! which keeps each piece testable on its own.
//!
//! # Components
//!
//! - [`SessionCache`]: bounded set of decoded pictures around the current
//!   selection (current, next, previous), evicting the oldest first.
//! - [`ImageDecoder`] / [`StandardDecoder`]: turn a file into RGBA pixels.
//! - [`FolderLock`]: sentinel file keeping two sessions off the same folder.
//! - [`ProgressStore`]: the per-folder sidecar with merge-on-load and backups.
//! - [`scan_images`]: list the pictures of a folder.
//! - [`TimestampResolver`]: capture time from metadata or the file name.
//! - [`export`]: collision-safe naming, copy export and two-phase rename.
//! - [`fs_attrs`]: hidden and read-only attribute helpers.
//!
//! # Failure model
//!
//! Each service owns its error enum. Expected absences are values rather than
//! errors: a folder without a sidecar loads as [`LoadOutcome::NotFound`], and
//! saving into a vanished folder is [`SaveOutcome::Skipped`].

pub mod cache;
pub mod decoder;
pub mod export;
pub mod folder_lock;
pub mod fs_attrs;
pub mod progress_store;
pub mod scanner;
pub mod timestamp;

pub use cache::{CacheError, SessionCache};
pub use decoder::{DecodeError, ImageDecoder, StandardDecoder};
pub use export::{
    CopiedFile, ExportError, ExportNaming, ExportReport, NamePlanner, RenameError, RenameReport,
    RenamedFile,
};
pub use folder_lock::{FolderLock, LockConflict, LockDecision, LockError, RuntimeId};
pub use progress_store::{
    LoadOutcome, MergeSummary, ProgressSnapshot, ProgressStore, SaveOutcome, StoreError,
    StoreOptions,
};
pub use scanner::{ScanError, scan_images};
pub use timestamp::{CaptureTimeSource, TimestampResolver};

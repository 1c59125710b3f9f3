//! Data models for PictureSorter.
//!
//! - [`ImageRecord`]: per-file metadata, selection flag and the decoded-image slot
//! - [`RecordMap`]: every record of one session, keyed by file name
//! - [`PersistedRecord`]: the durable projection written to the progress sidecar
//! - [`AppSettings`]: user settings loaded from `settings.yaml`
//!
//! # Architecture Note
//!
//! Records are owned by the [`SessionController`](crate::session::SessionController).
//! Only the [`SessionCache`](crate::services::SessionCache) fills or empties a
//! record's decoded image, which keeps "has pixels" and "is resident" in step.

pub mod config;
pub mod image_record;

pub use config::AppSettings;
pub use image_record::{CaptureTimestamp, DecodedImage, ImageRecord, PersistedRecord, RecordMap};

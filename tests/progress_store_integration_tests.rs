//! Integration tests for the progress sidecar
//!
//! These tests verify that ProgressStore:
//! - Treats a missing sidecar as a fresh folder, not an error
//! - Merges saved state onto the files currently on disk
//! - Never deselects or drops pictures the sidecar does not know
//! - Keeps a recoverable backup before bulk changes

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use picture_sorter::AppSettings;
use picture_sorter::models::{ImageRecord, RecordMap};
use picture_sorter::services::{LoadOutcome, ProgressStore, SaveOutcome, StoreError, StoreOptions};
use std::fs;
use tempfile::TempDir;

fn temp_folder() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, path)
}

fn store() -> ProgressStore {
    ProgressStore::new(StoreOptions::from(&AppSettings::default()))
}

fn records(folder: &Utf8Path, names: &[&str]) -> RecordMap {
    names
        .iter()
        .map(|name| (name.to_string(), ImageRecord::new(folder, *name)))
        .collect()
}

#[test]
fn test_missing_sidecar_defaults_to_selected() {
    let (_temp_dir, folder) = temp_folder();
    let mut records = records(&folder, &["a.jpg", "b.jpg", "c.jpg"]);

    let outcome = store().load(&folder, &mut records).unwrap();

    assert_eq!(outcome, LoadOutcome::NotFound);
    assert!(records.values().all(|r| r.is_selected));
    assert!(records.values().all(|r| r.capture_timestamp.is_none()));
}

#[test]
fn test_new_file_defaults_to_selected_after_merge() {
    let (_temp_dir, folder) = temp_folder();
    let when = NaiveDate::from_ymd_opt(2023, 5, 6)
        .unwrap()
        .and_hms_opt(7, 8, 9)
        .unwrap();

    // Earlier session knew A and B
    let mut earlier = records(&folder, &["A.jpg", "B.jpg"]);
    earlier.get_mut("A.jpg").unwrap().is_selected = false;
    earlier.get_mut("B.jpg").unwrap().capture_timestamp = Some(when);
    store().save(&folder, &earlier, false).unwrap();

    // C appeared since
    let mut current = records(&folder, &["A.jpg", "B.jpg", "C.jpg"]);
    let outcome = store().load(&folder, &mut current).unwrap();

    match outcome {
        LoadOutcome::Merged(summary) => {
            assert_eq!(summary.applied, 2);
            assert_eq!(summary.new_on_disk, 1);
        }
        other => panic!("Expected a merge, got: {:?}", other),
    }
    assert!(!current["A.jpg"].is_selected);
    assert!(current["B.jpg"].is_selected);
    assert_eq!(current["B.jpg"].capture_timestamp, Some(when));
    assert!(current["C.jpg"].is_selected);
    assert_eq!(current["C.jpg"].capture_timestamp, None);
}

#[test]
fn test_removed_file_is_not_reintroduced() {
    let (_temp_dir, folder) = temp_folder();
    store()
        .save(&folder, &records(&folder, &["kept.jpg", "deleted.jpg"]), false)
        .unwrap();

    let mut current = records(&folder, &["kept.jpg"]);
    store().load(&folder, &mut current).unwrap();

    assert_eq!(current.len(), 1);
    assert!(!current.contains_key("deleted.jpg"));
}

#[test]
fn test_unknown_timestamp_does_not_erase_resolved_one() {
    let (_temp_dir, folder) = temp_folder();
    let when = NaiveDate::from_ymd_opt(2020, 2, 2)
        .unwrap()
        .and_hms_opt(2, 2, 2)
        .unwrap();
    store()
        .save(&folder, &records(&folder, &["a.jpg"]), false)
        .unwrap();

    let mut current = records(&folder, &["a.jpg"]);
    current.get_mut("a.jpg").unwrap().capture_timestamp = Some(when);
    store().load(&folder, &mut current).unwrap();

    assert_eq!(current["a.jpg"].capture_timestamp, Some(when));
}

#[test]
fn test_backup_before_bulk_change_is_loadable() {
    let (_temp_dir, folder) = temp_folder();
    let mut records = records(&folder, &["a.jpg", "b.jpg"]);
    records.get_mut("b.jpg").unwrap().is_selected = false;
    store().save(&folder, &records, false).unwrap();

    // Bulk select: backup first, then write the new state
    store().save(&folder, &records, true).unwrap();
    for record in records.values_mut() {
        record.is_selected = true;
    }
    store().save(&folder, &records, false).unwrap();

    // Restoring the backup brings the old selection back
    let backup_options = StoreOptions {
        file_name: format!("{}.bak", AppSettings::default().save_file_name),
        ..StoreOptions::from(&AppSettings::default())
    };
    let mut restored = self::records(&folder, &["a.jpg", "b.jpg"]);
    ProgressStore::new(backup_options)
        .load(&folder, &mut restored)
        .unwrap();

    assert!(restored["a.jpg"].is_selected);
    assert!(!restored["b.jpg"].is_selected);
}

#[test]
fn test_corrupt_sidecar_is_reported() {
    let (_temp_dir, folder) = temp_folder();
    fs::write(store().save_path(&folder), b"\x00\x01garbage").unwrap();
    let mut records = records(&folder, &["a.jpg"]);

    let result = store().load(&folder, &mut records);

    assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    // The corrupt file is kept for the user to inspect
    assert!(store().save_path(&folder).exists());
}

#[test]
fn test_save_into_vanished_folder_is_skipped() {
    let (temp_dir, folder) = temp_folder();
    let records = records(&folder, &["a.jpg"]);
    drop(temp_dir);

    let outcome = store().save(&folder, &records, true).unwrap();
    assert_eq!(outcome, SaveOutcome::Skipped);
}

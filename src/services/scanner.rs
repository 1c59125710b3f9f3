use crate::models::AppSettings;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use thiserror::Error;

/// Errors that can occur while listing a folder
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Folder not found: {0}")]
    FolderNotFound(Utf8PathBuf),

    #[error("Failed to read folder {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// List the pictures directly inside `folder`.
///
/// Only regular files with an enabled extension are returned, sorted by name.
/// The session's own files (sidecar, backup, lock) never count as pictures,
/// and names that are not valid UTF-8 are skipped.
pub fn scan_images(folder: &Utf8Path, settings: &AppSettings) -> Result<Vec<String>, ScanError> {
    if !folder.is_dir() {
        return Err(ScanError::FolderNotFound(folder.to_path_buf()));
    }

    let entries = fs::read_dir(folder).map_err(|source| ScanError::Io {
        path: folder.to_path_buf(),
        source,
    })?;
    let reserved = settings.reserved_file_names();

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| match entry.file_name().into_string() {
            Ok(name) => Some(name),
            Err(raw) => {
                tracing::warn!("Skipping non UTF-8 file name in {}: {:?}", folder, raw);
                None
            }
        })
        .filter(|name| !reserved.iter().any(|r| r == name))
        .filter(|name| {
            Utf8Path::new(name)
                .extension()
                .map(|ext| settings.accepts_extension(ext))
                .unwrap_or(false)
        })
        .collect();

    names.sort();
    tracing::debug!("Found {} pictures in {}", names.len(), folder);
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_folder() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_scan_filters_by_extension() {
        let (_temp_dir, folder) = temp_folder();
        for name in ["b.JPG", "a.png", "notes.txt", "c.jpeg", "d.bmp", "e.gif"] {
            fs::write(folder.join(name), b"x").unwrap();
        }

        let names = scan_images(&folder, &AppSettings::default()).unwrap();

        assert_eq!(names, vec!["a.png", "b.JPG", "c.jpeg", "d.bmp"]);
    }

    #[test]
    fn test_scan_skips_directories_and_session_files() {
        let (_temp_dir, folder) = temp_folder();
        let settings = AppSettings {
            save_file_name: "progress.png".to_string(),
            ..AppSettings::default()
        };
        fs::create_dir(folder.join("nested.jpg")).unwrap();
        fs::write(folder.join("progress.png"), b"{}").unwrap();
        fs::write(folder.join("real.png"), b"x").unwrap();

        let names = scan_images(&folder, &settings).unwrap();

        assert_eq!(names, vec!["real.png"]);
    }

    #[test]
    fn test_scan_missing_folder() {
        let result = scan_images(Utf8Path::new("/nonexistent/folder"), &AppSettings::default());
        assert!(matches!(result, Err(ScanError::FolderNotFound(_))));
    }
}

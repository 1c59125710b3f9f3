//! File attribute helpers for the session's own files.
//!
//! Windows has a real "hidden" attribute; elsewhere hidden means a leading
//! dot in the name, so marking a file hidden is a no-op there.

use camino::Utf8Path;
use std::fs::{self, OpenOptions};
use std::io;

#[cfg(windows)]
const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

/// Open options creating a file that must not exist yet.
pub fn create_new_options(hidden: bool) -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    apply_hidden(&mut options, hidden);
    options
}

/// Open options creating or truncating a file.
pub fn create_options(hidden: bool) -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    apply_hidden(&mut options, hidden);
    options
}

#[cfg(windows)]
fn apply_hidden(options: &mut OpenOptions, hidden: bool) {
    use std::os::windows::fs::OpenOptionsExt;
    if hidden {
        options.attributes(FILE_ATTRIBUTE_HIDDEN);
    }
}

#[cfg(not(windows))]
fn apply_hidden(_options: &mut OpenOptions, _hidden: bool) {}

/// Deny other handles any access while this one is open.
#[cfg(windows)]
pub fn make_exclusive(options: &mut OpenOptions) {
    use std::os::windows::fs::OpenOptionsExt;
    options.share_mode(0);
}

#[cfg(not(windows))]
pub fn make_exclusive(_options: &mut OpenOptions) {}

/// Make an existing file writable again. Missing files are fine.
pub fn clear_readonly(path: &Utf8Path) -> io::Result<()> {
    match fs::metadata(path) {
        Ok(metadata) => {
            let mut permissions = metadata.permissions();
            if permissions.readonly() {
                permissions.set_readonly(false);
                fs::set_permissions(path, permissions)?;
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_create_new_refuses_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().join("sentinel")).unwrap();

        create_new_options(true).open(&path).unwrap();
        let second = create_new_options(true).open(&path);

        assert_eq!(second.unwrap_err().kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_clear_readonly() {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().join("locked.txt")).unwrap();
        fs::write(&path, "x").unwrap();

        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions).unwrap();

        clear_readonly(&path).unwrap();
        assert!(!fs::metadata(&path).unwrap().permissions().readonly());
    }

    #[test]
    fn test_clear_readonly_missing_file() {
        assert!(clear_readonly(Utf8Path::new("/nonexistent/file.txt")).is_ok());
    }
}

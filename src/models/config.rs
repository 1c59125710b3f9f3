use serde::{Deserialize, Serialize};
use std::time::Duration;

/// User settings from `settings.yaml`
///
/// Read once when a session starts and passed to the
/// [`SessionController`](crate::session::SessionController) by value.
/// Missing keys fall back to their defaults, so older files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Maximum number of decoded pictures kept in memory. 0 disables caching.
    pub cached_images_count: u32,

    /// Name of the progress sidecar written inside each sorted folder
    pub save_file_name: String,

    /// Extension of the backup copy made before bulk selection changes
    pub backup_extension: String,

    /// Name of the sentinel file guarding an open folder
    pub lock_file_name: String,

    /// Picture extensions shown to the user, without the dot
    pub file_extensions: Vec<String>,

    /// Reopen the freshly exported folder so sorting can be chained
    pub open_folder_after_export: bool,

    /// Pretty-print the sidecar
    pub indent_save_file: bool,

    /// Mark the sidecar hidden
    pub hide_save_file: bool,

    /// Word placed between the source folder name and the export counter
    pub export_folder_label: String,

    /// Delay before the cache is prepared after a selection change
    pub prepare_delay_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            cached_images_count: 5,
            save_file_name: "pictureSorter.pssave".to_string(),
            backup_extension: "bak".to_string(),
            lock_file_name: ".pictureSorter.lock".to_string(),
            file_extensions: ["png", "jpg", "jpeg", "bmp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            open_folder_after_export: true,
            indent_save_file: true,
            hide_save_file: false,
            export_folder_label: "sorted".to_string(),
            prepare_delay_ms: 10,
        }
    }
}

impl AppSettings {
    pub fn prepare_delay(&self) -> Duration {
        Duration::from_millis(self.prepare_delay_ms)
    }

    /// Check whether an extension (any case, no dot) is enabled
    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.file_extensions
            .iter()
            .any(|ext| ext.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }

    /// File names that belong to the session machinery rather than the user
    pub fn reserved_file_names(&self) -> [String; 3] {
        [
            self.save_file_name.clone(),
            format!("{}.{}", self.save_file_name, self.backup_extension),
            self.lock_file_name.clone(),
        ]
    }
}

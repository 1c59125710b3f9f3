use crate::models::AppSettings;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// File name of the settings file inside the settings directory.
pub const SETTINGS_FILE_NAME: &str = "settings.yaml";

/// Prefix of environment variables overriding individual settings,
/// e.g. `PICTURE_SORTER_CACHED_IMAGES_COUNT=3`.
pub const DEFAULT_ENV_PREFIX: &str = "PICTURE_SORTER";

/// Settings manager for loading and saving the YAML settings file.
///
/// Settings are layered: built-in defaults, then `settings.yaml`, then
/// environment variables. They are read once per session; nothing here is a
/// process-wide singleton.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
    env_prefix: String,
}

impl SettingsManager {
    /// Create a new SettingsManager with the specified settings directory.
    ///
    /// # Arguments
    /// * `settings_dir` - Directory holding `settings.yaml` (created if missing)
    pub fn new<P: AsRef<Utf8Path>>(settings_dir: P) -> Result<Self> {
        let settings_dir = settings_dir.as_ref().to_path_buf();

        if !settings_dir.exists() {
            fs::create_dir_all(&settings_dir).with_context(|| {
                format!("Failed to create settings directory: {}", settings_dir)
            })?;
        }

        Ok(Self {
            settings_path: settings_dir.join(SETTINGS_FILE_NAME),
            settings_dir,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        })
    }

    /// Use a different environment variable prefix for overrides.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load the settings.
    ///
    /// A missing file is not an error: the defaults are written back so the
    /// user has something to edit.
    pub fn load_settings(&self) -> Result<AppSettings> {
        let first_run = !self.settings_path.exists();

        let layered = config::Config::builder()
            .add_source(
                config::File::from(self.settings_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("file_extensions"),
            )
            .build()
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?;

        let settings: AppSettings = layered
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        if first_run {
            tracing::warn!(
                "Settings file not found at {}, writing defaults",
                self.settings_path
            );
            self.save_settings(&AppSettings::default())?;
        } else {
            tracing::info!("Loaded settings from {}", self.settings_path);
        }

        Ok(settings)
    }

    /// Save the settings file.
    ///
    /// # Arguments
    /// * `settings` - The AppSettings to save
    pub fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Reset the settings to their defaults and persist them.
    pub fn reset_settings(&self) -> Result<AppSettings> {
        let settings = AppSettings::default();
        self.save_settings(&settings)?;
        Ok(settings)
    }

    /// Get the settings directory path.
    pub fn settings_dir(&self) -> &Utf8Path {
        &self.settings_dir
    }

    /// Get the settings file path.
    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_settings_manager() -> (SettingsManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let settings_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = SettingsManager::new(&settings_path)
            .unwrap()
            .with_env_prefix("PICTURE_SORTER_UNIT_TEST_UNSET");
        (manager, temp_dir)
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let (manager, _temp_dir) = create_test_settings_manager();
        assert!(!manager.settings_path().exists());

        let settings = manager.load_settings().unwrap();

        assert_eq!(settings, AppSettings::default());
        assert!(manager.settings_path().exists());
    }

    #[test]
    fn test_load_save_settings() {
        let (manager, _temp_dir) = create_test_settings_manager();

        let mut settings = AppSettings::default();
        settings.cached_images_count = 3;
        settings.hide_save_file = true;
        manager.save_settings(&settings).unwrap();

        let loaded = manager.load_settings().unwrap();
        assert_eq!(loaded.cached_images_count, 3);
        assert!(loaded.hide_save_file);
    }

    #[test]
    fn test_reset_settings() {
        let (manager, _temp_dir) = create_test_settings_manager();

        let mut settings = AppSettings::default();
        settings.cached_images_count = 1;
        manager.save_settings(&settings).unwrap();

        let reset = manager.reset_settings().unwrap();
        assert_eq!(reset.cached_images_count, 5);
        assert_eq!(manager.load_settings().unwrap().cached_images_count, 5);
    }

    #[test]
    fn test_malformed_settings_file_is_an_error() {
        let (manager, _temp_dir) = create_test_settings_manager();
        fs::write(manager.settings_path(), "cached_images_count: [not, a, number]\n").unwrap();

        assert!(manager.load_settings().is_err());
    }
}

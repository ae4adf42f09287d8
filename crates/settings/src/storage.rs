use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::settings::BotSettings;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize settings {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings file {0} already exists")]
    AlreadyExists(PathBuf),
}

/// JSON-backed settings file.
/// 以 JSON 檔案保存的設定。
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    data: BotSettings,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, settings: BotSettings) -> Self {
        Self {
            path: path.into(),
            data: settings,
        }
    }

    /// Loads and sanitizes `path`; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut data = BotSettings::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: BotSettings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    /// Writes a default settings file. An existing file is kept unless `force`.
    pub fn init(path: impl AsRef<Path>, force: bool) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() && !force {
            return Err(SettingsError::AlreadyExists(path));
        }
        let store = Self::new(path, BotSettings::default());
        store.save()?;
        Ok(store)
    }

    pub fn settings(&self) -> &BotSettings {
        &self.data
    }

    pub fn into_settings(self) -> BotSettings {
        self.data
    }

    pub fn update<F>(&mut self, op: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut BotSettings),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            SettingsError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| SettingsError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_leaves_no_temporary_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("printbot.json");
        SettingsStore::new(&path, BotSettings::default()).save().unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("printbot.json");
        fs::write(&path, "{}").unwrap();

        let err = SettingsStore::init(&path, false).unwrap_err();
        assert!(matches!(err, SettingsError::AlreadyExists(ref existing) if existing == &path));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");

        SettingsStore::init(&path, true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("\"printing\""));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("printbot.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SettingsStore::load(&path),
            Err(SettingsError::Parse { .. })
        ));
    }
}

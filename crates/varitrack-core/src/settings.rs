use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{error::SettingsError, store::UserSettings};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    pub repeat_enabled: bool,
}

/// JSON-file backed user settings. Writes go through a temp file so a crash
/// never leaves a truncated settings file behind.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    values: Mutex<PersistedSettings>,
}

impl SettingsStore {
    #[instrument(fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, SettingsError> {
        let values = load_settings(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn snapshot(&self) -> PersistedSettings {
        self.values.lock().clone()
    }
}

impl UserSettings for SettingsStore {
    fn repeat_enabled(&self) -> bool {
        self.values.lock().repeat_enabled
    }

    fn set_repeat_enabled(&self, enabled: bool) -> Result<(), SettingsError> {
        let mut values = self.values.lock();
        let mut updated = values.clone();
        updated.repeat_enabled = enabled;
        save_settings(&self.path, &updated)?;
        *values = updated;
        debug!(enabled, "repeat setting stored");
        Ok(())
    }
}

fn load_settings(path: &Path) -> Result<PersistedSettings> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "settings file missing, using defaults");
            return Ok(PersistedSettings::default());
        }
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read settings: {}", path.display()));
        }
    };

    match serde_json::from_slice(&content) {
        Ok(settings) => Ok(settings),
        Err(error) => {
            warn!(path = %path.display(), ?error, "settings file corrupt, using defaults");
            Ok(PersistedSettings::default())
        }
    }
}

fn save_settings(path: &Path, settings: &PersistedSettings) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf);
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create directory: {}", parent.display()))?;

    let json = serde_json::to_vec_pretty(settings).context("failed to serialize settings")?;
    let mut temp_file = tempfile::NamedTempFile::new_in(&parent)
        .context("failed to create temp settings file")?;
    temp_file
        .write_all(&json)
        .context("failed to write temp settings file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist settings: {}", path.display()))?;

    info!(path = %path.display(), "settings saved");
    Ok(())
}

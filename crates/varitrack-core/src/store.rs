//! Collaborator seams the transport depends on: track storage and user settings.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    error::{SettingsError, StoreError},
    source::{AudioSource, TrackId},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackHandle {
    pub id: TrackId,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl TrackHandle {
    #[must_use]
    pub fn display_name(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| self.id.to_string(), |stem| stem.to_string_lossy().into_owned())
    }
}

pub trait TrackStore: Send + Sync {
    /// Ordered playlist; the order defines next/previous.
    fn list_tracks(&self) -> Result<Vec<TrackHandle>, StoreError>;

    fn open_track(&self, handle: &TrackHandle) -> Result<AudioSource, StoreError>;

    fn import_track(&self, external_path: &Path) -> Result<TrackHandle, StoreError>;

    fn delete_track(&self, id: &TrackId) -> Result<(), StoreError>;
}

pub trait UserSettings: Send + Sync {
    fn repeat_enabled(&self) -> bool;

    fn set_repeat_enabled(&self, enabled: bool) -> Result<(), SettingsError>;
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    repeat_enabled: AtomicBool,
}

impl MemorySettings {
    #[must_use]
    pub fn new(repeat_enabled: bool) -> Self {
        Self {
            repeat_enabled: AtomicBool::new(repeat_enabled),
        }
    }
}

impl UserSettings for MemorySettings {
    fn repeat_enabled(&self) -> bool {
        self.repeat_enabled.load(Ordering::Acquire)
    }

    fn set_repeat_enabled(&self, enabled: bool) -> Result<(), SettingsError> {
        self.repeat_enabled.store(enabled, Ordering::Release);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTrackStore {
    sources: RwLock<Vec<AudioSource>>,
}

impl MemoryTrackStore {
    #[must_use]
    pub fn new(sources: Vec<AudioSource>) -> Self {
        Self {
            sources: RwLock::new(sources),
        }
    }

    pub fn push(&self, source: AudioSource) {
        self.sources.write().push(source);
    }
}

impl TrackStore for MemoryTrackStore {
    fn list_tracks(&self) -> Result<Vec<TrackHandle>, StoreError> {
        Ok(self
            .sources
            .read()
            .iter()
            .map(|source| TrackHandle {
                id: source.id().clone(),
                path: source.path().to_path_buf(),
                size_bytes: source.frame_length() * source.channels() as u64 * 4,
            })
            .collect())
    }

    fn open_track(&self, handle: &TrackHandle) -> Result<AudioSource, StoreError> {
        self.sources
            .read()
            .iter()
            .find(|source| *source.id() == handle.id)
            .cloned()
            .ok_or_else(|| StoreError::TrackNotFound(handle.id.clone()))
    }

    fn import_track(&self, external_path: &Path) -> Result<TrackHandle, StoreError> {
        let source = AudioSource::open(external_path)?;
        let id = source.id().clone();
        let mut sources = self.sources.write();
        if sources.iter().any(|existing| *existing.id() == id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let handle = TrackHandle {
            id,
            path: external_path.to_path_buf(),
            size_bytes: source.frame_length() * source.channels() as u64 * 4,
        };
        sources.push(source);
        Ok(handle)
    }

    fn delete_track(&self, id: &TrackId) -> Result<(), StoreError> {
        let mut sources = self.sources.write();
        let before = sources.len();
        sources.retain(|source| source.id() != id);
        if sources.len() == before {
            return Err(StoreError::TrackNotFound(id.clone()));
        }
        Ok(())
    }
}

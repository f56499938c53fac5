use std::{
    collections::BTreeSet,
    fs,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    error::StoreError,
    source::{AudioSource, TrackId},
    store::{TrackHandle, TrackStore},
};

#[derive(Debug, Clone)]
pub struct TrackLibrary {
    root: PathBuf,
}

impl TrackLibrary {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!(
                "failed to create track library directory: {}",
                self.root.display()
            )
        })
    }

    // Ids name a single file directly inside the root.
    fn track_path(&self, id: &TrackId) -> Result<PathBuf, StoreError> {
        let mut components = Path::new(id.as_str()).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(id.as_str())),
            _ => {
                warn!(track_id = %id, "rejecting track id outside the library");
                Err(StoreError::TrackNotFound(id.clone()))
            }
        }
    }
}

impl TrackStore for TrackLibrary {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    fn list_tracks(&self) -> Result<Vec<TrackHandle>, StoreError> {
        Ok(scan_tracks(&self.root)?)
    }

    #[instrument(skip(self, handle), fields(track_id = %handle.id))]
    fn open_track(&self, handle: &TrackHandle) -> Result<AudioSource, StoreError> {
        let path = self.track_path(&handle.id)?;
        if !path.is_file() {
            return Err(StoreError::TrackNotFound(handle.id.clone()));
        }
        Ok(AudioSource::open(&path)?)
    }

    #[instrument(skip(self), fields(root = %self.root.display(), external_path = %external_path.display()))]
    fn import_track(&self, external_path: &Path) -> Result<TrackHandle, StoreError> {
        if !is_supported_audio(external_path) {
            return Err(StoreError::UnsupportedExtension(external_path.to_path_buf()));
        }

        self.ensure_root()?;
        let id = TrackId::from_path(external_path);
        let destination = self.track_path(&id)?;
        if destination.exists() {
            return Err(StoreError::AlreadyExists(id));
        }

        let size_bytes = fs::copy(external_path, &destination)
            .with_context(|| {
                format!(
                    "failed to copy {} into track library",
                    external_path.display()
                )
            })
            .map_err(StoreError::from)?;
        info!(track_id = %id, size_bytes, "track imported");

        Ok(TrackHandle {
            id,
            path: destination,
            size_bytes,
        })
    }

    #[instrument(skip(self), fields(root = %self.root.display(), track_id = %id))]
    fn delete_track(&self, id: &TrackId) -> Result<(), StoreError> {
        let path = self.track_path(id)?;
        if !path.is_file() {
            return Err(StoreError::TrackNotFound(id.clone()));
        }
        fs::remove_file(&path)
            .with_context(|| format!("failed to delete track file: {}", path.display()))
            .map_err(StoreError::from)?;
        info!("track deleted");
        Ok(())
    }
}

fn scan_tracks(directory: &Path) -> Result<Vec<TrackHandle>> {
    if !directory.exists() {
        debug!(
            directory = %directory.display(),
            "track library directory missing, treating as empty"
        );
        return Ok(Vec::new());
    }

    if !directory.is_dir() {
        return Err(anyhow::anyhow!(
            "track library path is not a directory: {}",
            directory.display()
        ));
    }

    let mut tracks = Vec::new();
    for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(?error, "ignoring unreadable entry while scanning track library");
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_supported_audio(entry.path()) {
            continue;
        }

        let size_bytes = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        tracks.push(TrackHandle {
            id: TrackId::from_path(entry.path()),
            path: entry.path().to_path_buf(),
            size_bytes,
        });
    }

    tracks.sort_by(|left, right| left.id.cmp(&right.id));
    debug!(count = tracks.len(), "track library scan complete");
    Ok(tracks)
}

fn is_supported_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|extension| supported_audio_extensions().contains(extension.as_str()))
}

fn supported_audio_extensions() -> BTreeSet<&'static str> {
    [
        "wav", "flac", "mp3", "ogg", "m4a", "aac", "aiff", "aif", "caf",
    ]
    .into_iter()
    .collect()
}

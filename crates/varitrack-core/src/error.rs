use std::path::PathBuf;

use thiserror::Error;

use crate::source::TrackId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("unreadable audio format in {path}: {reason}")]
    UnreadableAudioFormat { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph attach failed, output device unavailable: {0}")]
    Attach(String),
    #[error("audio engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("no audio source attached to the playback graph")]
    NotAttached,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderModeError {
    #[error("graph must be stopped before entering offline render mode")]
    GraphRunning,
    #[error("no audio source attached to the playback graph")]
    NotAttached,
    #[error("offline block size must be greater than zero")]
    InvalidBlockSize,
    #[error("offline format must have a non-zero sample rate and channel count")]
    InvalidFormat,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("graph is not in offline render mode")]
    NotInOfflineMode,
    #[error("offline graph has not been started")]
    GraphStopped,
    #[error("render buffer too small: need {needed} samples, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error(transparent)]
    Mode(#[from] RenderModeError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("export sink failed: {0}")]
    Sink(String),
    #[error("export cancelled")]
    Cancelled,
    #[error("export worker failed: {0}")]
    Worker(String),
}

impl From<anyhow::Error> for RenderError {
    fn from(value: anyhow::Error) -> Self {
        Self::Sink(format!("{value:#}"))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),
    #[error("track already exists in library: {0}")]
    AlreadyExists(TrackId),
    #[error("unsupported audio file extension: {0}")]
    UnsupportedExtension(PathBuf),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for SettingsError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no track loaded")]
    NoTrackLoaded,
    #[error("transport is busy rendering an export")]
    Busy,
    #[error("transport has been shut down")]
    ShutDown,
    #[error("an export is already in progress")]
    ExportInProgress,
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

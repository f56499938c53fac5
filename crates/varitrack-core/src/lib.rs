pub mod cancel;
pub mod clock;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod fixtures;
pub mod graph;
pub mod library;
pub mod playlist;
pub mod render;
pub mod settings;
pub mod source;
pub mod store;
pub mod transport;

pub use cancel::CancellationToken;
pub use clock::TransportClock;
pub use config::AppConfig;
#[cfg(feature = "cpal-output")]
pub use device::CpalDevice;
pub use device::{ManualDevice, ManualDeviceHandle, OutputDevice, RenderCallback};
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use error::{
    GraphError, RenderError, RenderModeError, SettingsError, SourceError, StoreError,
    TransportError,
};
pub use graph::{PlaybackGraph, RenderStatus};
pub use library::TrackLibrary;
pub use playlist::{BoundaryAvailability, Direction};
pub use render::{ExportSink, ExportedFile, OfflineRenderer, SampleEncoding, WavExportSink};
pub use settings::{PersistedSettings, SettingsStore};
pub use source::{AudioSource, ChannelLayout, PcmFormat, TrackId};
pub use store::{MemorySettings, MemoryTrackStore, TrackHandle, TrackStore, UserSettings};
pub use transport::{
    ExportJob, NoopObserver, PlaybackState, TransportConfig, TransportController, TransportDeps,
    TransportObserver,
};

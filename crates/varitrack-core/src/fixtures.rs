//! Deterministic sources, sinks and observers for headless runs and tests.

use std::{
    f32::consts::TAU,
    path::{Path, PathBuf},
    sync::{Arc, mpsc::Receiver},
    time::Duration,
};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::{
    device::{ManualDevice, ManualDeviceHandle},
    error::{RenderError, TransportError},
    playlist::BoundaryAvailability,
    render::{ExportSink, ExportedFile},
    source::{AudioSource, ChannelLayout, PcmFormat, TrackId},
    store::{MemorySettings, MemoryTrackStore},
    transport::{TransportConfig, TransportController, TransportDeps, TransportObserver},
};

const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.5;

#[must_use]
pub fn tone_source(id: &str, sample_rate: u32, layout: ChannelLayout, seconds: f64) -> AudioSource {
    let frames = (seconds.max(0.0) * f64::from(sample_rate)).round() as usize;
    let channels = layout.count();
    let mut samples = Vec::with_capacity(frames * channels);
    for frame in 0..frames {
        let value = tone_value(frame, sample_rate);
        samples.extend(std::iter::repeat_n(value, channels));
    }
    AudioSource::from_samples(TrackId::new(id), PathBuf::from(id), sample_rate, layout, samples)
}

#[must_use]
pub fn ramp_source(id: &str, sample_rate: u32, frames: usize) -> AudioSource {
    let samples = (0..frames).map(|frame| frame as f32).collect();
    AudioSource::from_samples(
        TrackId::new(id),
        PathBuf::from(id),
        sample_rate,
        ChannelLayout::Mono,
        samples,
    )
}

pub fn write_tone_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f64) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (seconds.max(0.0) * f64::from(sample_rate)).round() as usize;

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create fixture wav: {}", path.display()))?;
    for frame in 0..frames {
        let sample = (tone_value(frame, sample_rate) * f32::from(i16::MAX)).round() as i16;
        for _ in 0..channels {
            writer
                .write_sample(sample)
                .context("failed to write fixture sample")?;
        }
    }
    writer.finalize().context("failed to finalize fixture wav")?;
    Ok(())
}

fn tone_value(frame: usize, sample_rate: u32) -> f32 {
    let phase = frame as f32 / sample_rate as f32 * TONE_HZ * TAU;
    phase.sin() * TONE_AMPLITUDE
}

#[derive(Debug, Default)]
pub struct CollectedOutput {
    pub samples: Vec<f32>,
    pub block_sizes: Vec<usize>,
    pub finalized: bool,
}

/// In-memory export sink. Output stays readable through the shared handle
/// after the sink itself has been consumed.
pub struct CollectingSink {
    format: PcmFormat,
    output: Arc<Mutex<CollectedOutput>>,
    gate: Option<Receiver<()>>,
    fail_after_blocks: Option<usize>,
}

impl CollectingSink {
    #[must_use]
    pub fn new(format: PcmFormat) -> (Self, Arc<Mutex<CollectedOutput>>) {
        let output = Arc::new(Mutex::new(CollectedOutput::default()));
        (
            Self {
                format,
                output: Arc::clone(&output),
                gate: None,
                fail_after_blocks: None,
            },
            output,
        )
    }

    /// Each block waits for one message on `gate`; a dropped sender opens it for good.
    #[must_use]
    pub fn gated(mut self, gate: Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    #[must_use]
    pub fn failing_after(mut self, blocks: usize) -> Self {
        self.fail_after_blocks = Some(blocks);
        self
    }
}

impl ExportSink for CollectingSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write_block(&mut self, samples: &[f32]) -> Result<(), RenderError> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }

        let mut output = self.output.lock();
        if self
            .fail_after_blocks
            .is_some_and(|limit| output.block_sizes.len() >= limit)
        {
            return Err(RenderError::Sink("collecting sink refused block".to_string()));
        }
        output.samples.extend_from_slice(samples);
        output
            .block_sizes
            .push(samples.len() / usize::from(self.format.channels));
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<ExportedFile, RenderError> {
        let mut output = self.output.lock();
        output.finalized = true;
        let frames = (output.samples.len() / usize::from(self.format.channels)) as u64;
        Ok(ExportedFile {
            path: PathBuf::from("memory"),
            format: self.format,
            frames,
            duration_seconds: frames as f64 / f64::from(self.format.sample_rate),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Position(f64),
    PlaybackState(bool),
    Availability(BoundaryAvailability),
    TrackLoaded(TrackId, f64),
    RenderProgress(f64),
    RenderCompleted(Result<ExportedFile, RenderError>),
    Error(String),
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    #[must_use]
    pub fn last_position(&self) -> Option<f64> {
        self.events.lock().iter().rev().find_map(|event| match event {
            ObserverEvent::Position(seconds) => Some(*seconds),
            _ => None,
        })
    }

    #[must_use]
    pub fn last_availability(&self) -> Option<BoundaryAvailability> {
        self.events.lock().iter().rev().find_map(|event| match event {
            ObserverEvent::Availability(availability) => Some(*availability),
            _ => None,
        })
    }

    #[must_use]
    pub fn playback_changes(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ObserverEvent::PlaybackState(playing) => Some(*playing),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ObserverEvent) {
        self.events.lock().push(event);
    }
}

impl TransportObserver for RecordingObserver {
    fn on_position_changed(&self, seconds: f64) {
        self.push(ObserverEvent::Position(seconds));
    }

    fn on_playback_state_changed(&self, is_playing: bool) {
        self.push(ObserverEvent::PlaybackState(is_playing));
    }

    fn on_track_boundary_availability(&self, availability: BoundaryAvailability) {
        self.push(ObserverEvent::Availability(availability));
    }

    fn on_track_loaded(&self, track: &TrackId, duration_seconds: f64) {
        self.push(ObserverEvent::TrackLoaded(track.clone(), duration_seconds));
    }

    fn on_render_progress(&self, fraction: f64) {
        self.push(ObserverEvent::RenderProgress(fraction));
    }

    fn on_render_completed(&self, result: &Result<ExportedFile, RenderError>) {
        self.push(ObserverEvent::RenderCompleted(result.clone()));
    }

    fn on_transport_error(&self, error: &TransportError) {
        self.push(ObserverEvent::Error(error.to_string()));
    }
}

/// A controller over a [`ManualDevice`] and in-memory collaborators. The poll
/// interval is long enough that tests drive `tick` themselves.
pub struct TransportHarness {
    pub controller: TransportController,
    pub device: ManualDeviceHandle,
    pub observer: Arc<RecordingObserver>,
    pub store: Arc<MemoryTrackStore>,
    pub settings: Arc<MemorySettings>,
}

impl TransportHarness {
    #[must_use]
    pub fn new(format: PcmFormat, sources: Vec<AudioSource>) -> Self {
        Self::with_config(
            format,
            sources,
            TransportConfig {
                poll_interval: Duration::from_secs(3_600),
                ..TransportConfig::default()
            },
        )
    }

    #[must_use]
    pub fn with_config(format: PcmFormat, sources: Vec<AudioSource>, config: TransportConfig) -> Self {
        let device = ManualDevice::new(format);
        let handle = device.handle();
        let observer = Arc::new(RecordingObserver::default());
        let store = Arc::new(MemoryTrackStore::new(sources));
        let settings = Arc::new(MemorySettings::new(false));
        let controller = TransportController::new(
            Box::new(device),
            TransportDeps {
                store: Arc::clone(&store) as _,
                settings: Arc::clone(&settings) as _,
                observer: Arc::clone(&observer) as _,
            },
            config,
        );

        Self {
            controller,
            device: handle,
            observer,
            store,
            settings,
        }
    }
}

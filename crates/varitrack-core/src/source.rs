use std::{
    fmt,
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use tracing::{debug, instrument, warn};

use crate::error::SourceError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        Self(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    #[must_use]
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }

    #[must_use]
    pub fn count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }
}

/// Immutable decoded audio asset. Clones share the sample storage.
#[derive(Clone)]
pub struct AudioSource {
    id: TrackId,
    path: PathBuf,
    sample_rate: u32,
    layout: ChannelLayout,
    frame_length: u64,
    samples: Arc<[f32]>,
}

impl AudioSource {
    #[instrument(fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let unreadable = |reason: String| SourceError::UnreadableAudioFormat {
            path: path.to_path_buf(),
            reason,
        };

        let decoded = decode_interleaved(path).map_err(|error| unreadable(format!("{error:#}")))?;
        let layout = ChannelLayout::from_count(decoded.channels)
            .ok_or_else(|| unreadable(format!("unsupported channel count {}", decoded.channels)))?;
        if decoded.sample_rate == 0 {
            return Err(unreadable("sample rate is zero".to_string()));
        }

        let source = Self::from_samples(
            TrackId::from_path(path),
            path,
            decoded.sample_rate,
            layout,
            decoded.samples,
        );
        debug!(
            track_id = %source.id,
            sample_rate = source.sample_rate,
            frames = source.frame_length,
            "audio source opened"
        );
        Ok(source)
    }

    /// Builds a source from interleaved samples. A trailing partial frame is dropped.
    #[must_use]
    pub fn from_samples(
        id: TrackId,
        path: impl Into<PathBuf>,
        sample_rate: u32,
        layout: ChannelLayout,
        mut samples: Vec<f32>,
    ) -> Self {
        let channels = layout.count();
        let whole = samples.len() - samples.len() % channels;
        if whole != samples.len() {
            warn!(dropped = samples.len() - whole, "dropping partial trailing frame");
            samples.truncate(whole);
        }

        Self {
            id,
            path: path.into(),
            sample_rate: sample_rate.max(1),
            layout,
            frame_length: (whole / channels) as u64,
            samples: samples.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &TrackId {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.layout.count()
    }

    #[must_use]
    pub fn frame_length(&self) -> u64 {
        self.frame_length
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.frame_length as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn format(&self) -> PcmFormat {
        PcmFormat::new(self.sample_rate, self.layout.count() as u16)
    }

    #[must_use]
    pub fn sample(&self, frame: u64, channel: usize) -> f32 {
        if frame >= self.frame_length {
            return 0.0;
        }
        let channels = self.layout.count();
        let index = frame as usize * channels + channel.min(channels - 1);
        self.samples[index]
    }

    #[must_use]
    pub fn frame(&self, index: u64) -> Option<&[f32]> {
        if index >= self.frame_length {
            return None;
        }
        let channels = self.layout.count();
        let start = index as usize * channels;
        self.samples.get(start..start + channels)
    }

    #[must_use]
    pub fn same_asset(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.samples, &other.samples)
    }
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSource")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("sample_rate", &self.sample_rate)
            .field("layout", &self.layout)
            .field("frame_length", &self.frame_length)
            .finish_non_exhaustive()
    }
}

struct DecodedPcm {
    sample_rate: u32,
    channels: usize,
    samples: Vec<f32>,
}

fn decode_interleaved(path: &Path) -> Result<DecodedPcm> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("unrecognized audio container")?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found"))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("unsupported audio codec")?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map_or(0, |value| value.count());
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!("audio stream reset required"));
            }
            Err(error) => return Err(error.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                warn!(reason, "skipping undecodable packet");
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() {
        return Err(anyhow::anyhow!("decoded zero samples"));
    }

    Ok(DecodedPcm {
        sample_rate,
        channels,
        samples,
    })
}

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::{debug, info, instrument, warn};

use crate::{
    cancel::CancellationToken,
    error::RenderError,
    graph::{PlaybackGraph, RenderStatus},
    source::PcmFormat,
};

pub const DEFAULT_BLOCK_FRAMES: usize = 4_096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub format: PcmFormat,
    pub frames: u64,
    pub duration_seconds: f64,
}

pub trait ExportSink: Send {
    fn format(&self) -> PcmFormat;

    fn write_block(&mut self, samples: &[f32]) -> Result<(), RenderError>;

    /// Completes the output. Never called after a failed or cancelled render.
    fn finalize(self: Box<Self>) -> Result<ExportedFile, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    Int16,
    Float32,
}

impl SampleEncoding {
    #[must_use]
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(Self::Int16),
            32 => Some(Self::Float32),
            _ => None,
        }
    }
}

/// WAV sink that writes into a hidden temp file next to the destination and
/// only moves it into place on `finalize`.
pub struct WavExportSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    temp_path: Option<TempPath>,
    destination: PathBuf,
    format: PcmFormat,
    encoding: SampleEncoding,
    samples_written: u64,
}

impl WavExportSink {
    #[instrument(fields(path = %destination.display(), sample_rate = format.sample_rate, channels = format.channels))]
    pub fn create(
        destination: &Path,
        format: PcmFormat,
        encoding: SampleEncoding,
    ) -> Result<Self> {
        if !format.is_valid() {
            return Err(anyhow::anyhow!("invalid export format {format:?}"));
        }

        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf);
        fs::create_dir_all(&parent).with_context(|| {
            format!("failed to create export directory: {}", parent.display())
        })?;

        let temp_path = tempfile::Builder::new()
            .prefix(".varitrack-export-")
            .suffix(".wav")
            .tempfile_in(&parent)
            .context("failed to create temporary export file")?
            .into_temp_path();

        let spec = match encoding {
            SampleEncoding::Int16 => hound::WavSpec {
                channels: format.channels,
                sample_rate: format.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            SampleEncoding::Float32 => hound::WavSpec {
                channels: format.channels,
                sample_rate: format.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
        };
        let writer = hound::WavWriter::create(&temp_path, spec).with_context(|| {
            format!("failed to create wav file: {}", temp_path.display())
        })?;

        Ok(Self {
            writer: Some(writer),
            temp_path: Some(temp_path),
            destination: destination.to_path_buf(),
            format,
            encoding,
            samples_written: 0,
        })
    }
}

impl ExportSink for WavExportSink {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn write_block(&mut self, samples: &[f32]) -> Result<(), RenderError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RenderError::Sink("wav sink already finalized".to_string()))?;

        for sample in samples {
            let result = match self.encoding {
                SampleEncoding::Int16 => {
                    let quantized = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
                    writer.write_sample(quantized)
                }
                SampleEncoding::Float32 => writer.write_sample(*sample),
            };
            result.map_err(|error| RenderError::Sink(format!("failed to write sample: {error}")))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<ExportedFile, RenderError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| RenderError::Sink("wav sink already finalized".to_string()))?;
        writer
            .finalize()
            .context("failed to finalize wav file")?;

        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| RenderError::Sink("temporary export file missing".to_string()))?;
        temp_path
            .persist(&self.destination)
            .map_err(|error| anyhow::anyhow!(error.error))
            .with_context(|| format!("failed to persist export: {}", self.destination.display()))?;

        let frames = self.samples_written / u64::from(self.format.channels);
        info!(path = %self.destination.display(), frames, "wav export completed");
        Ok(ExportedFile {
            path: self.destination.clone(),
            format: self.format,
            frames,
            duration_seconds: frames as f64 / f64::from(self.format.sample_rate),
        })
    }
}

impl Drop for WavExportSink {
    fn drop(&mut self) {
        if self.temp_path.is_some() {
            debug!(path = %self.destination.display(), "discarding unfinished wav export");
        }
        // close the writer before the temp file is unlinked
        drop(self.writer.take());
        drop(self.temp_path.take());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OfflineRenderer {
    block_frames: usize,
}

impl Default for OfflineRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_FRAMES)
    }
}

impl OfflineRenderer {
    #[must_use]
    pub fn new(block_frames: usize) -> Self {
        Self {
            block_frames: block_frames.max(1),
        }
    }

    #[must_use]
    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// Renders everything from `offset_seconds` to the end of the attached source.
    ///
    /// Whatever the outcome, the graph leaves offline mode and is re-scheduled
    /// at `offset_seconds`, ready for real-time playback.
    #[instrument(skip(self, graph, sink, cancel, progress), fields(block_frames = self.block_frames))]
    pub fn render(
        &self,
        graph: &mut PlaybackGraph,
        offset_seconds: f64,
        mut sink: Box<dyn ExportSink>,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(f64),
    ) -> Result<ExportedFile, RenderError> {
        let outcome = self.drain(graph, offset_seconds, sink.as_mut(), cancel, progress);

        graph.stop();
        graph.exit_offline_render_mode();
        let restored = graph.schedule_from_offset(offset_seconds);

        match (outcome, restored) {
            (Ok(blocks), Ok(_)) => {
                let exported = sink.finalize()?;
                info!(blocks, frames = exported.frames, "offline render completed");
                Ok(exported)
            }
            (Ok(_), Err(error)) => {
                warn!(%error, "failed to restore graph schedule after export");
                Err(error.into())
            }
            (Err(error), restored) => {
                if let Err(restore_error) = restored {
                    warn!(%restore_error, "failed to restore graph schedule after failed export");
                }
                warn!(%error, "offline render aborted");
                Err(error)
            }
        }
    }

    fn drain(
        &self,
        graph: &mut PlaybackGraph,
        offset_seconds: f64,
        sink: &mut dyn ExportSink,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(f64),
    ) -> Result<usize, RenderError> {
        let format = sink.format();
        graph.stop();
        graph.schedule_from_offset(offset_seconds)?;
        graph.enter_offline_render_mode(format, self.block_frames)?;
        graph.start()?;

        let expected_frames = graph.expected_remaining_frames().max(1);
        let block_len = graph
            .offline_block_len()
            .ok_or(RenderError::NotInOfflineMode)?;
        let channels = usize::from(format.channels);
        let mut block = vec![0.0_f32; block_len];
        let mut blocks = 0_usize;
        let mut frames_rendered = 0_u64;

        loop {
            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }

            match graph.render_next_block(&mut block)? {
                RenderStatus::Rendered { frames } => {
                    sink.write_block(&block[..frames * channels])?;
                    blocks += 1;
                    frames_rendered += frames as u64;
                    progress((frames_rendered as f64 / expected_frames as f64).min(1.0));
                }
                RenderStatus::Finished => break,
            }
        }

        debug!(blocks, frames_rendered, "offline drain finished");
        Ok(blocks)
    }
}

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    device::OutputDevice,
    error::{GraphError, RenderError, RenderModeError},
    source::{AudioSource, PcmFormat, TrackId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Rendered { frames: usize },
    Finished,
}

struct RenderCore {
    source: AudioSource,
    output: PcmFormat,
    rate: f32,
    running: bool,
    scheduled: bool,
    segment_start: f64,
    read_head: f64,
}

impl RenderCore {
    fn new(source: AudioSource, output: PcmFormat, rate: f32) -> Self {
        Self {
            source,
            output,
            rate,
            running: false,
            scheduled: false,
            segment_start: 0.0,
            read_head: 0.0,
        }
    }

    fn step(&self) -> f64 {
        f64::from(self.rate) * f64::from(self.source.sample_rate())
            / f64::from(self.output.sample_rate.max(1))
    }

    fn schedule(&mut self, offset_frames: u64) {
        let start = offset_frames.min(self.source.frame_length()) as f64;
        self.segment_start = start;
        self.read_head = start;
        self.scheduled = true;
    }

    fn release(&mut self) {
        self.running = false;
        self.scheduled = false;
        self.segment_start = 0.0;
        self.read_head = 0.0;
    }

    fn elapsed_seconds(&self) -> f64 {
        if !self.scheduled {
            return 0.0;
        }
        (self.read_head - self.segment_start) / f64::from(self.source.sample_rate())
    }

    fn remaining_source_frames(&self) -> f64 {
        if !self.scheduled {
            return 0.0;
        }
        (self.source.frame_length() as f64 - self.read_head).max(0.0)
    }

    /// Hardware pull. The read head keeps advancing through silence after the
    /// source is exhausted, like a device clock would.
    fn render_realtime(&mut self, output: &mut [f32]) {
        if !self.running || !self.scheduled {
            output.fill(0.0);
            return;
        }

        let channels = usize::from(self.output.channels.max(1));
        let step = self.step();
        for frame in output.chunks_mut(channels) {
            self.write_frame(frame);
            self.read_head += step;
        }
    }

    fn render_offline(&mut self, output: &mut [f32], max_frames: usize) -> usize {
        let channels = usize::from(self.output.channels.max(1));
        let end = self.source.frame_length() as f64;
        let step = self.step();
        let mut frames = 0;

        for frame in output.chunks_mut(channels).take(max_frames) {
            if self.read_head >= end {
                break;
            }
            self.write_frame(frame);
            self.read_head += step;
            frames += 1;
        }
        frames
    }

    fn write_frame(&self, frame: &mut [f32]) {
        let source_channels = self.source.channels();
        let index = self.read_head.floor();
        let fraction = (self.read_head - index) as f32;
        let index = index as u64;

        let interpolate = |channel: usize| {
            let current = self.source.sample(index, channel);
            let next = if index + 1 < self.source.frame_length() {
                self.source.sample(index + 1, channel)
            } else {
                current
            };
            current + (next - current) * fraction
        };

        match (source_channels, frame.len()) {
            (1, _) => frame.fill(interpolate(0)),
            (_, 1) => frame[0] = (interpolate(0) + interpolate(1)) * 0.5,
            (_, _) => {
                frame[0] = interpolate(0);
                frame[1] = interpolate(1);
                frame[2..].fill(0.0);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OfflineMode {
    block_frames: usize,
}

/// Processing topology: source reader → rate node → output device (or offline blocks).
pub struct PlaybackGraph {
    device: Box<dyn OutputDevice>,
    core: Option<Arc<Mutex<RenderCore>>>,
    device_format: Option<PcmFormat>,
    device_engaged: bool,
    offline: Option<OfflineMode>,
    rate: f32,
}

impl PlaybackGraph {
    #[must_use]
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            device,
            core: None,
            device_format: None,
            device_engaged: false,
            offline: None,
            rate: 1.0,
        }
    }

    #[instrument(skip(self, source), fields(device = self.device.name(), track_id = %source.id()))]
    pub fn attach(&mut self, source: &AudioSource) -> Result<(), GraphError> {
        if self.offline.is_some() {
            self.exit_offline_render_mode();
        }
        self.stop();
        self.core = None;
        self.device_format = None;

        let format = self.device.format()?;
        if !format.is_valid() {
            return Err(GraphError::Attach(format!(
                "device reported invalid format {format:?}"
            )));
        }

        self.core = Some(Arc::new(Mutex::new(RenderCore::new(
            source.clone(),
            format,
            self.rate,
        ))));
        self.device_format = Some(format);
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "graph attached"
        );
        Ok(())
    }

    pub fn detach(&mut self) {
        if self.offline.is_some() {
            self.exit_offline_render_mode();
        }
        self.stop();
        self.core = None;
        self.device_format = None;
    }

    #[must_use]
    pub fn attached_track(&self) -> Option<TrackId> {
        self.core
            .as_ref()
            .map(|core| core.lock().source.id().clone())
    }

    pub fn schedule_from_start(&mut self) -> Result<u64, GraphError> {
        self.schedule_from_offset(0.0)
    }

    pub fn schedule_from_offset(&mut self, seconds: f64) -> Result<u64, GraphError> {
        let core = self.core.as_ref().ok_or(GraphError::NotAttached)?;
        let mut core = core.lock();
        let sample_rate = f64::from(core.source.sample_rate());
        let offset_samples = (seconds.max(0.0) * sample_rate).round() as u64;
        let remaining = core.source.frame_length().saturating_sub(offset_samples);
        core.schedule(offset_samples);
        debug!(offset_samples, remaining, "segment scheduled");
        Ok(remaining)
    }

    pub fn start(&mut self) -> Result<(), GraphError> {
        let core = Arc::clone(self.core.as_ref().ok_or(GraphError::NotAttached)?);

        if self.offline.is_none() {
            if !self.device_engaged {
                let callback_core = Arc::clone(&core);
                self.device.open(Box::new(move |output: &mut [f32]| {
                    callback_core.lock().render_realtime(output);
                }))?;
                self.device_engaged = true;
            }
            self.device.play()?;
        }

        core.lock().running = true;
        Ok(())
    }

    pub fn pause(&mut self) {
        if let Some(core) = &self.core {
            core.lock().running = false;
        }
        if self.device_engaged {
            self.device.pause();
        }
    }

    pub fn stop(&mut self) {
        if let Some(core) = &self.core {
            core.lock().release();
        }
        if self.device_engaged {
            self.device.close();
            self.device_engaged = false;
        }
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
        if let Some(core) = &self.core {
            core.lock().rate = rate;
        }
    }

    #[must_use]
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Seconds of source audio consumed since the last schedule call.
    #[must_use]
    pub fn elapsed_render_time(&self) -> f64 {
        self.core
            .as_ref()
            .map_or(0.0, |core| core.lock().elapsed_seconds())
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.core.as_ref().is_some_and(|core| core.lock().running)
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.is_some()
    }

    #[instrument(skip(self), fields(sample_rate = format.sample_rate, channels = format.channels))]
    pub fn enter_offline_render_mode(
        &mut self,
        format: PcmFormat,
        max_frames_per_block: usize,
    ) -> Result<(), RenderModeError> {
        let core = self.core.as_ref().ok_or(RenderModeError::NotAttached)?;
        if max_frames_per_block == 0 {
            return Err(RenderModeError::InvalidBlockSize);
        }
        if !format.is_valid() {
            return Err(RenderModeError::InvalidFormat);
        }

        let mut core = core.lock();
        if core.running || self.device_engaged {
            return Err(RenderModeError::GraphRunning);
        }
        core.output = format;
        self.offline = Some(OfflineMode {
            block_frames: max_frames_per_block,
        });
        debug!(max_frames_per_block, "offline render mode entered");
        Ok(())
    }

    #[must_use]
    pub fn offline_block_len(&self) -> Option<usize> {
        let mode = self.offline?;
        let core = self.core.as_ref()?;
        let channels = usize::from(core.lock().output.channels);
        Some(mode.block_frames * channels)
    }

    /// Output frames still to come from the scheduled segment at the current rate.
    #[must_use]
    pub fn expected_remaining_frames(&self) -> u64 {
        self.core.as_ref().map_or(0, |core| {
            let core = core.lock();
            let step = core.step();
            if step <= 0.0 {
                return 0;
            }
            (core.remaining_source_frames() / step).ceil() as u64
        })
    }

    pub fn render_next_block(&mut self, into: &mut [f32]) -> Result<RenderStatus, RenderError> {
        let mode = self.offline.ok_or(RenderError::NotInOfflineMode)?;
        let core = self.core.as_ref().ok_or(GraphError::NotAttached)?;
        let mut core = core.lock();
        if !core.running {
            return Err(RenderError::GraphStopped);
        }

        let needed = mode.block_frames * usize::from(core.output.channels);
        if into.len() < needed {
            return Err(RenderError::BufferTooSmall {
                needed,
                actual: into.len(),
            });
        }

        if !core.scheduled {
            return Ok(RenderStatus::Finished);
        }
        match core.render_offline(&mut into[..needed], mode.block_frames) {
            0 => Ok(RenderStatus::Finished),
            frames => Ok(RenderStatus::Rendered { frames }),
        }
    }

    pub fn exit_offline_render_mode(&mut self) {
        if self.offline.take().is_none() {
            return;
        }
        if let Some(core) = &self.core {
            let mut core = core.lock();
            core.release();
            match self.device_format {
                Some(format) => core.output = format,
                None => warn!("no device format recorded while leaving offline mode"),
            }
        }
        debug!("offline render mode exited");
    }
}

impl Drop for PlaybackGraph {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::ManualDevice,
        source::{ChannelLayout, TrackId},
    };

    fn ramp_source(frames: usize, sample_rate: u32) -> AudioSource {
        let samples = (0..frames).map(|frame| frame as f32).collect();
        AudioSource::from_samples(
            TrackId::new("ramp"),
            "ramp.wav",
            sample_rate,
            ChannelLayout::Mono,
            samples,
        )
    }

    #[test]
    fn half_rate_interpolates_between_frames() {
        let mut core = RenderCore::new(ramp_source(8, 100), PcmFormat::new(100, 1), 0.5);
        core.schedule(0);
        core.running = true;

        let mut output = vec![0.0; 4];
        core.render_realtime(&mut output);
        assert_eq!(output, vec![0.0, 0.5, 1.0, 1.5]);
        assert!((core.elapsed_seconds() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn stereo_source_downmixes_to_mono_output() {
        let source = AudioSource::from_samples(
            TrackId::new("pair"),
            "pair.wav",
            10,
            ChannelLayout::Stereo,
            vec![1.0, 0.0, 0.5, 0.5],
        );
        let mut core = RenderCore::new(source, PcmFormat::new(10, 1), 1.0);
        core.schedule(0);
        let mut output = vec![0.0; 2];
        assert_eq!(core.render_offline(&mut output, 2), 2);
        assert_eq!(output, vec![0.5, 0.5]);
    }

    #[test]
    fn schedule_clamps_remaining_frames() {
        let mut graph = PlaybackGraph::new(Box::new(ManualDevice::new(PcmFormat::new(100, 2))));
        graph.attach(&ramp_source(100, 100)).expect("attach should succeed");

        assert_eq!(graph.schedule_from_offset(0.25).expect("schedule"), 75);
        assert_eq!(graph.schedule_from_offset(5.0).expect("schedule"), 0);
        assert_eq!(graph.schedule_from_start().expect("schedule"), 100);
    }

    #[test]
    fn failed_reattach_leaves_nothing_attached() {
        let device = ManualDevice::new(PcmFormat::new(100, 1));
        let handle = device.handle();
        let mut graph = PlaybackGraph::new(Box::new(device));
        graph.attach(&ramp_source(100, 100)).expect("attach should succeed");
        assert_eq!(graph.attached_track(), Some(TrackId::new("ramp")));

        handle.set_available(false);
        assert!(matches!(
            graph.attach(&ramp_source(50, 100)),
            Err(GraphError::Attach(_))
        ));
        assert_eq!(graph.attached_track(), None);
        assert!(!handle.is_open());
    }

    #[test]
    fn elapsed_time_survives_pause() {
        let device = ManualDevice::new(PcmFormat::new(100, 2));
        let handle = device.handle();
        let mut graph = PlaybackGraph::new(Box::new(device));
        graph.attach(&ramp_source(400, 100)).expect("attach should succeed");
        graph.schedule_from_offset(1.0).expect("schedule should succeed");
        graph.start().expect("start should succeed");

        handle.pump(50);
        graph.pause();
        handle.pump(50);
        assert!((graph.elapsed_render_time() - 0.5).abs() < 1e-9);

        graph.start().expect("resume should succeed");
        handle.pump(25);
        assert!((graph.elapsed_render_time() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn offline_mode_requires_stopped_graph() {
        let mut graph = PlaybackGraph::new(Box::new(ManualDevice::new(PcmFormat::new(100, 1))));
        graph.attach(&ramp_source(100, 100)).expect("attach should succeed");
        graph.schedule_from_start().expect("schedule should succeed");
        graph.start().expect("start should succeed");

        assert_eq!(
            graph.enter_offline_render_mode(PcmFormat::new(100, 1), 16),
            Err(RenderModeError::GraphRunning)
        );

        graph.stop();
        graph
            .enter_offline_render_mode(PcmFormat::new(100, 1), 16)
            .expect("stopped graph should enter offline mode");
        assert!(graph.is_offline());
    }

    #[test]
    fn offline_blocks_cover_remaining_frames() {
        let mut graph = PlaybackGraph::new(Box::new(ManualDevice::new(PcmFormat::new(100, 1))));
        graph.attach(&ramp_source(100, 100)).expect("attach should succeed");
        graph.schedule_from_offset(0.3).expect("schedule should succeed");
        graph
            .enter_offline_render_mode(PcmFormat::new(100, 1), 32)
            .expect("offline mode should be entered");

        let mut block = vec![0.0; 32];
        assert_eq!(
            graph.render_next_block(&mut block),
            Err(RenderError::GraphStopped)
        );
        graph.start().expect("offline start should succeed");

        let mut frames = Vec::new();
        while let RenderStatus::Rendered { frames: count } =
            graph.render_next_block(&mut block).expect("render should succeed")
        {
            frames.push(count);
        }
        assert_eq!(frames, vec![32, 32, 6]);

        graph.exit_offline_render_mode();
        assert!(!graph.is_offline());
        assert!(!graph.is_playing());
    }
}

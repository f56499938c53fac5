use std::{
    sync::{
        Arc, Weak,
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    cancel::CancellationToken,
    clock::TransportClock,
    device::OutputDevice,
    error::{RenderError, StoreError, TransportError},
    graph::PlaybackGraph,
    playlist::{self, BoundaryAvailability, Direction},
    render::{DEFAULT_BLOCK_FRAMES, ExportSink, ExportedFile, OfflineRenderer},
    source::{AudioSource, TrackId},
    store::{TrackHandle, TrackStore, UserSettings},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MIN_RATE: f32 = 0.5;
pub const DEFAULT_MAX_RATE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Rendering,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub poll_interval: Duration,
    pub min_rate: f32,
    pub max_rate: f32,
    pub default_rate: f32,
    pub export_block_frames: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_rate: DEFAULT_MIN_RATE,
            max_rate: DEFAULT_MAX_RATE,
            default_rate: 1.0,
            export_block_frames: DEFAULT_BLOCK_FRAMES,
        }
    }
}

impl TransportConfig {
    fn clamp_rate(&self, rate: f32) -> f32 {
        let (low, high) = if self.min_rate <= self.max_rate {
            (self.min_rate, self.max_rate)
        } else {
            (self.max_rate, self.min_rate)
        };
        if rate.is_finite() {
            rate.clamp(low, high)
        } else {
            1.0_f32.clamp(low, high)
        }
    }
}

/// Presentation callbacks. Invoked while the controller is locked, so
/// implementations must not call back into the controller.
pub trait TransportObserver: Send + Sync {
    fn on_position_changed(&self, _seconds: f64) {}

    fn on_playback_state_changed(&self, _is_playing: bool) {}

    fn on_track_boundary_availability(&self, _availability: BoundaryAvailability) {}

    fn on_track_loaded(&self, _track: &TrackId, _duration_seconds: f64) {}

    fn on_render_progress(&self, _fraction: f64) {}

    fn on_render_completed(&self, _result: &Result<ExportedFile, RenderError>) {}

    /// Failures raised by the background poll, which has no caller to return to.
    fn on_transport_error(&self, _error: &TransportError) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl TransportObserver for NoopObserver {}

#[derive(Clone)]
pub struct TransportDeps {
    pub store: Arc<dyn TrackStore>,
    pub settings: Arc<dyn UserSettings>,
    pub observer: Arc<dyn TransportObserver>,
}

/// Handle to a running export. Dropping it detaches the worker.
pub struct ExportJob {
    handle: JoinHandle<Result<ExportedFile, RenderError>>,
    cancel: CancellationToken,
}

impl ExportJob {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the worker has rendered and handed the graph back.
    pub fn wait(self) -> Result<ExportedFile, RenderError> {
        self.handle
            .join()
            .map_err(|_| RenderError::Worker("export worker panicked".to_string()))?
    }
}

struct PollTask {
    token: CancellationToken,
    _wake: mpsc::Sender<()>,
}

struct ExportTask {
    cancel: CancellationToken,
}

struct ControllerInner {
    self_ref: Weak<Mutex<ControllerInner>>,
    graph: Option<PlaybackGraph>,
    clock: TransportClock,
    source: Option<AudioSource>,
    state: PlaybackState,
    reported_playing: bool,
    config: TransportConfig,
    store: Arc<dyn TrackStore>,
    settings: Arc<dyn UserSettings>,
    observer: Arc<dyn TransportObserver>,
    poll: Option<PollTask>,
    export: Option<ExportTask>,
    shut_down: bool,
}

pub struct TransportController {
    inner: Arc<Mutex<ControllerInner>>,
}

impl TransportController {
    #[must_use]
    pub fn new(device: Box<dyn OutputDevice>, deps: TransportDeps, config: TransportConfig) -> Self {
        let mut graph = PlaybackGraph::new(device);
        graph.set_rate(config.clamp_rate(config.default_rate));
        let inner = Arc::new_cyclic(|self_ref| {
            Mutex::new(ControllerInner {
                self_ref: self_ref.clone(),
                graph: Some(graph),
                clock: TransportClock::default(),
                source: None,
                state: PlaybackState::Idle,
                reported_playing: false,
                config,
                store: deps.store,
                settings: deps.settings,
                observer: deps.observer,
                poll: None,
                export: None,
                shut_down: false,
            })
        });
        Self { inner }
    }

    #[instrument(skip(self, source), fields(track_id = %source.id()))]
    pub fn load_track(&self, source: AudioSource) -> Result<(), TransportError> {
        self.inner.lock().load_track(source)
    }

    #[instrument(skip(self, handle), fields(track_id = %handle.id))]
    pub fn open_track(&self, handle: &TrackHandle) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.ensure_ready()?;
        let source = inner.open_handle(handle)?;
        inner.load_track(source)
    }

    #[instrument(skip(self))]
    pub fn play(&self) -> Result<(), TransportError> {
        self.inner.lock().play()
    }

    #[instrument(skip(self))]
    pub fn pause(&self) -> Result<(), TransportError> {
        self.inner.lock().pause()
    }

    #[instrument(skip(self))]
    pub fn seek(&self, seconds: f64) -> Result<(), TransportError> {
        self.inner.lock().seek(seconds)
    }

    /// Applies a clamped playback rate live; returns the rate in effect.
    #[instrument(skip(self))]
    pub fn set_rate(&self, rate: f32) -> Result<f32, TransportError> {
        self.inner.lock().set_rate(rate)
    }

    #[instrument(skip(self))]
    pub fn toggle_repeat(&self) -> Result<bool, TransportError> {
        let inner = self.inner.lock();
        inner.ensure_ready()?;
        let enabled = !inner.settings.repeat_enabled();
        inner.settings.set_repeat_enabled(enabled)?;
        info!(enabled, "repeat toggled");
        Ok(enabled)
    }

    /// Returns `false` without side effects when already at the last track.
    #[instrument(skip(self))]
    pub fn next_track(&self) -> Result<bool, TransportError> {
        self.inner.lock().navigate(Direction::Next)
    }

    /// Returns `false` without side effects when already at the first track.
    #[instrument(skip(self))]
    pub fn previous_track(&self) -> Result<bool, TransportError> {
        self.inner.lock().navigate(Direction::Previous)
    }

    #[instrument(skip(self, sink))]
    pub fn export(&self, sink: Box<dyn ExportSink>) -> Result<ExportJob, TransportError> {
        self.inner.lock().begin_export(sink)
    }

    pub fn cancel_export(&self) {
        if let Some(task) = &self.inner.lock().export {
            info!("export cancellation requested");
            task.cancel.cancel();
        }
    }

    /// One polling step: publishes the position and handles end-of-track.
    pub fn tick(&self) {
        self.inner.lock().tick();
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    #[must_use]
    pub fn position(&self) -> f64 {
        self.inner.lock().position()
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.inner.lock().clock.duration()
    }

    #[must_use]
    pub fn rate(&self) -> f32 {
        let inner = self.inner.lock();
        inner.graph.as_ref().map_or(1.0, PlaybackGraph::rate)
    }

    #[must_use]
    pub fn current_track(&self) -> Option<TrackId> {
        self.inner
            .lock()
            .source
            .as_ref()
            .map(|source| source.id().clone())
    }

    #[must_use]
    pub fn repeat_enabled(&self) -> bool {
        self.inner.lock().settings.repeat_enabled()
    }

    pub fn boundary_availability(&self) -> Result<BoundaryAvailability, TransportError> {
        let inner = self.inner.lock();
        let Some(source) = &inner.source else {
            return Ok(BoundaryAvailability::default());
        };
        let list = inner.store.list_tracks()?;
        Ok(playlist::availability(source.id(), &list))
    }

    /// Cancels the poll and any export and releases the graph. Idempotent;
    /// every later mutating call fails with `TransportError::ShutDown`.
    pub fn shutdown(&self) {
        self.inner.lock().shutdown();
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        self.inner.lock().shutdown();
    }
}

impl ControllerInner {
    fn ensure_ready(&self) -> Result<(), TransportError> {
        if self.shut_down {
            return Err(TransportError::ShutDown);
        }
        if self.state == PlaybackState::Rendering || self.graph.is_none() {
            return Err(TransportError::Busy);
        }
        Ok(())
    }

    fn transition(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "transport state changed");
        }
        self.state = state;
        let playing = state == PlaybackState::Playing;
        if playing != self.reported_playing {
            self.reported_playing = playing;
            self.observer.on_playback_state_changed(playing);
        }
    }

    fn open_handle(&self, handle: &TrackHandle) -> Result<AudioSource, TransportError> {
        self.store.open_track(handle).map_err(|error| match error {
            StoreError::Source(source_error) => TransportError::Source(source_error),
            other => TransportError::Store(other),
        })
    }

    fn load_track(&mut self, source: AudioSource) -> Result<(), TransportError> {
        self.ensure_ready()?;
        let resume = self.state == PlaybackState::Playing;
        self.cancel_poll();
        self.state = PlaybackState::Idle;
        self.source = None;

        let graph = self.graph.as_mut().ok_or(TransportError::Busy)?;
        graph.stop();
        let attached = graph.attach(&source).and_then(|()| graph.schedule_from_start());
        if let Err(error) = attached {
            graph.detach();
            self.clock = TransportClock::default();
            self.transition(PlaybackState::Idle);
            warn!(%error, track_id = %source.id(), "failed to attach track");
            return Err(error.into());
        }

        let duration = source.duration_seconds();
        self.clock = TransportClock::new(duration);
        self.clock.reset(0.0);
        info!(track_id = %source.id(), duration, resume, "track loaded");
        self.observer.on_track_loaded(source.id(), duration);
        self.observer.on_position_changed(0.0);
        self.source = Some(source);
        self.publish_availability();

        self.state = PlaybackState::Paused;
        if resume {
            self.start_playback()
        } else {
            self.transition(PlaybackState::Paused);
            Ok(())
        }
    }

    fn play(&mut self) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if self.state == PlaybackState::Playing {
            debug!("play ignored, already playing");
            return Ok(());
        }
        if self.source.is_none() {
            debug!("play ignored, no track loaded");
            return Ok(());
        }
        if self.clock.last_position() >= self.clock.duration() {
            debug!("play requested at end of track, restarting from the top");
            self.reschedule(0.0)?;
        }
        self.start_playback()
    }

    fn start_playback(&mut self) -> Result<(), TransportError> {
        let graph = self.graph.as_mut().ok_or(TransportError::Busy)?;
        if let Err(error) = graph.start() {
            warn!(%error, "failed to start playback graph");
            self.transition(PlaybackState::Paused);
            return Err(error.into());
        }

        if let Err(error) = self.start_poll() {
            if let Some(graph) = self.graph.as_mut() {
                graph.pause();
            }
            self.transition(PlaybackState::Paused);
            return Err(error);
        }

        self.transition(PlaybackState::Playing);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if self.state != PlaybackState::Playing {
            debug!("pause ignored, not playing");
            return Ok(());
        }

        self.cancel_poll();
        let position = self.position();
        if let Some(graph) = self.graph.as_mut() {
            graph.pause();
        }
        self.transition(PlaybackState::Paused);
        self.observer.on_position_changed(position);
        Ok(())
    }

    fn seek(&mut self, seconds: f64) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if self.source.is_none() {
            debug!("seek ignored, no track loaded");
            return Ok(());
        }

        let target = if seconds.is_finite() {
            seconds.clamp(0.0, self.clock.duration())
        } else {
            0.0
        };
        if (target - seconds).abs() > f64::EPSILON {
            debug!(requested = seconds, target, "seek clamped");
        }

        let was_playing = self.state == PlaybackState::Playing;
        self.reschedule(target)?;

        if was_playing {
            let graph = self.graph.as_mut().ok_or(TransportError::Busy)?;
            if let Err(error) = graph.start() {
                warn!(%error, "failed to restart playback after seek");
                self.cancel_poll();
                self.transition(PlaybackState::Paused);
                return Err(error.into());
            }
        }
        Ok(())
    }

    fn reschedule(&mut self, target: f64) -> Result<(), TransportError> {
        let graph = self.graph.as_mut().ok_or(TransportError::Busy)?;
        graph.stop();
        graph.schedule_from_offset(target)?;
        self.clock.reset(target);
        self.observer.on_position_changed(target);
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> Result<f32, TransportError> {
        self.ensure_ready()?;
        let clamped = self.config.clamp_rate(rate);
        if let Some(graph) = self.graph.as_mut() {
            graph.set_rate(clamped);
        }
        debug!(requested = rate, applied = clamped, "rate applied");
        Ok(clamped)
    }

    fn navigate(&mut self, direction: Direction) -> Result<bool, TransportError> {
        self.ensure_ready()?;
        let Some(current) = self.source.as_ref().map(|source| source.id().clone()) else {
            return Ok(false);
        };

        let list = self.store.list_tracks()?;
        let Some(handle) = playlist::resolve(&current, &list, direction).cloned() else {
            debug!(?direction, track_id = %current, "navigation at playlist boundary");
            self.observer
                .on_track_boundary_availability(playlist::availability(&current, &list));
            return Ok(false);
        };

        let source = self.open_handle(&handle)?;
        self.load_track(source)?;
        Ok(true)
    }

    fn publish_availability(&self) {
        let Some(source) = &self.source else {
            return;
        };
        let availability = match self.store.list_tracks() {
            Ok(list) => playlist::availability(source.id(), &list),
            Err(error) => {
                warn!(%error, "failed to list tracks for boundary availability");
                BoundaryAvailability::default()
            }
        };
        self.observer.on_track_boundary_availability(availability);
    }

    fn position(&mut self) -> f64 {
        match (&self.graph, self.state) {
            (Some(graph), PlaybackState::Playing | PlaybackState::Paused) => {
                self.clock.current_position(graph.elapsed_render_time())
            }
            _ => self.clock.last_position(),
        }
    }

    fn tick(&mut self) {
        if self.shut_down || self.state != PlaybackState::Playing {
            return;
        }
        let Some(graph) = &self.graph else {
            return;
        };

        let elapsed = graph.elapsed_render_time();
        let raw = self.clock.raw_position(elapsed);
        let position = self.clock.current_position(elapsed);
        self.observer.on_position_changed(position);

        if raw > self.clock.duration() {
            self.handle_end_of_track();
        }
    }

    fn handle_end_of_track(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };

        if self.settings.repeat_enabled() {
            info!(track_id = %source.id(), "end of track, repeating");
            if let Err(error) = self.load_track(source) {
                self.report_error(error);
            }
            return;
        }

        info!(track_id = %source.id(), "end of track");
        match self.navigate(Direction::Next) {
            Ok(true) => {}
            Ok(false) => self.settle_at_end(),
            Err(error) => {
                self.report_error(error);
                if self.source.is_some() {
                    self.settle_at_end();
                }
            }
        }
    }

    fn settle_at_end(&mut self) {
        self.cancel_poll();
        let duration = self.clock.duration();
        if let Some(graph) = self.graph.as_mut() {
            graph.stop();
            if let Err(error) = graph.schedule_from_offset(duration) {
                warn!(%error, "failed to park graph at end of track");
            }
        }
        self.clock.reset(duration);
        self.transition(PlaybackState::Paused);
        self.observer.on_position_changed(duration);
    }

    fn report_error(&self, error: TransportError) {
        warn!(%error, "transport error during polling");
        self.observer.on_transport_error(&error);
    }

    fn start_poll(&mut self) -> Result<(), TransportError> {
        self.cancel_poll();

        let token = CancellationToken::new();
        let (wake_tx, wake_rx) = mpsc::channel::<()>();
        let weak = self.self_ref.clone();
        let interval = self.config.poll_interval;
        let thread_token = token.clone();

        thread::Builder::new()
            .name("varitrack-poll".to_string())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = wake_rx.recv_timeout(interval) {
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    let mut inner = shared.lock();
                    if thread_token.is_cancelled() {
                        break;
                    }
                    inner.tick();
                }
            })
            .map_err(|error| TransportError::Spawn("poll", error.to_string()))?;

        self.poll = Some(PollTask {
            token,
            _wake: wake_tx,
        });
        Ok(())
    }

    /// Dropping the wake sender interrupts the poll thread's wait.
    fn cancel_poll(&mut self) {
        if let Some(task) = self.poll.take() {
            task.token.cancel();
        }
    }

    fn begin_export(&mut self, sink: Box<dyn ExportSink>) -> Result<ExportJob, TransportError> {
        if self.shut_down {
            return Err(TransportError::ShutDown);
        }
        if self.state == PlaybackState::Rendering || self.export.is_some() {
            warn!("export rejected, another export is running");
            return Err(TransportError::ExportInProgress);
        }
        let Some(source) = &self.source else {
            return Err(TransportError::NoTrackLoaded);
        };
        let track_id = source.id().clone();
        let mut graph = self.graph.take().ok_or(TransportError::ExportInProgress)?;

        self.cancel_poll();
        let offset = self.clock.current_position(graph.elapsed_render_time());
        graph.stop();
        self.clock.reset(offset);
        self.transition(PlaybackState::Rendering);

        let cancel = CancellationToken::new();
        let renderer = OfflineRenderer::new(self.config.export_block_frames);
        let slot = Arc::new(Mutex::new(Some(graph)));
        let worker_slot = Arc::clone(&slot);
        let worker_cancel = cancel.clone();
        let weak = self.self_ref.clone();
        let observer = Arc::clone(&self.observer);
        info!(track_id = %track_id, offset, "export started");

        let spawned = thread::Builder::new()
            .name("varitrack-export".to_string())
            .spawn(move || {
                let Some(mut graph) = worker_slot.lock().take() else {
                    return Err(RenderError::Worker("playback graph missing".to_string()));
                };
                let mut progress = |fraction: f64| observer.on_render_progress(fraction);
                let result = renderer.render(&mut graph, offset, sink, &worker_cancel, &mut progress);

                match weak.upgrade() {
                    Some(shared) => shared.lock().finish_export(graph, offset, &result),
                    None => debug!("controller released during export, dropping graph"),
                }
                result
            });

        match spawned {
            Ok(handle) => {
                self.export = Some(ExportTask {
                    cancel: cancel.clone(),
                });
                Ok(ExportJob { handle, cancel })
            }
            Err(error) => {
                if let Some(mut graph) = slot.lock().take() {
                    if let Err(restore_error) = graph.schedule_from_offset(offset) {
                        warn!(%restore_error, "failed to restore graph after export spawn failure");
                    }
                    self.graph = Some(graph);
                }
                self.transition(PlaybackState::Paused);
                Err(TransportError::Spawn("export", error.to_string()))
            }
        }
    }

    fn finish_export(
        &mut self,
        mut graph: PlaybackGraph,
        offset: f64,
        result: &Result<ExportedFile, RenderError>,
    ) {
        self.export = None;
        if self.shut_down {
            graph.detach();
            return;
        }

        self.graph = Some(graph);
        self.clock.reset(offset);
        self.transition(PlaybackState::Paused);
        match result {
            Ok(exported) => info!(path = %exported.path.display(), frames = exported.frames, "export finished"),
            Err(error) => warn!(%error, "export failed"),
        }
        self.observer.on_position_changed(offset);
        self.observer.on_render_completed(result);
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.cancel_poll();
        if let Some(task) = &self.export {
            task.cancel.cancel();
        }
        if let Some(graph) = self.graph.as_mut() {
            graph.detach();
        }
        self.source = None;
        self.transition(PlaybackState::Idle);
        debug!("transport shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_clamp_handles_inverted_bounds_and_nan() {
        let config = TransportConfig {
            min_rate: 2.0,
            max_rate: 0.5,
            ..TransportConfig::default()
        };
        assert!((config.clamp_rate(3.0) - 2.0).abs() < f32::EPSILON);
        assert!((config.clamp_rate(f32::NAN) - 1.0).abs() < f32::EPSILON);
    }
}

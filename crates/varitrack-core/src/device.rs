use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{error::GraphError, source::PcmFormat};

pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Real-time output the playback graph drives.
///
/// Implementations call the render callback from their own clock; the graph
/// never calls into a device while holding its render lock.
pub trait OutputDevice: Send {
    fn name(&self) -> &str;

    fn format(&self) -> Result<PcmFormat, GraphError>;

    fn open(&mut self, callback: RenderCallback) -> Result<(), GraphError>;

    fn play(&mut self) -> Result<(), GraphError>;

    fn pause(&mut self);

    fn close(&mut self);
}

struct ManualDeviceState {
    available: bool,
    playing: bool,
    callback: Option<RenderCallback>,
    frames_rendered: u64,
}

/// Output device whose clock advances only when [`ManualDeviceHandle::pump`] is called.
pub struct ManualDevice {
    format: PcmFormat,
    state: Arc<Mutex<ManualDeviceState>>,
}

#[derive(Clone)]
pub struct ManualDeviceHandle {
    format: PcmFormat,
    state: Arc<Mutex<ManualDeviceState>>,
}

impl ManualDevice {
    #[must_use]
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            state: Arc::new(Mutex::new(ManualDeviceState {
                available: true,
                playing: false,
                callback: None,
                frames_rendered: 0,
            })),
        }
    }

    #[must_use]
    pub fn handle(&self) -> ManualDeviceHandle {
        ManualDeviceHandle {
            format: self.format,
            state: Arc::clone(&self.state),
        }
    }
}

impl OutputDevice for ManualDevice {
    fn name(&self) -> &str {
        "manual"
    }

    fn format(&self) -> Result<PcmFormat, GraphError> {
        if self.state.lock().available {
            Ok(self.format)
        } else {
            Err(GraphError::Attach("manual device marked unavailable".to_string()))
        }
    }

    fn open(&mut self, callback: RenderCallback) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(GraphError::EngineUnavailable(
                "manual device marked unavailable".to_string(),
            ));
        }
        state.callback = Some(callback);
        state.playing = false;
        Ok(())
    }

    fn play(&mut self) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(GraphError::EngineUnavailable(
                "manual device marked unavailable".to_string(),
            ));
        }
        if state.callback.is_none() {
            return Err(GraphError::EngineUnavailable(
                "manual device has no open stream".to_string(),
            ));
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().playing = false;
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.callback = None;
    }
}

impl ManualDeviceHandle {
    /// Advances the device clock by `frames`, returning the rendered interleaved output.
    /// A paused or closed device yields silence without invoking the graph.
    pub fn pump(&self, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0; frames * usize::from(self.format.channels)];
        let mut state = self.state.lock();
        if !state.playing {
            return output;
        }
        if let Some(callback) = state.callback.as_mut() {
            callback(&mut output);
            state.frames_rendered += frames as u64;
        }
        output
    }

    pub fn set_available(&self, available: bool) {
        let mut state = self.state.lock();
        state.available = available;
        if !available {
            state.playing = false;
        }
        debug!(available, "manual device availability changed");
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.state.lock().frames_rendered
    }

    #[must_use]
    pub fn format(&self) -> PcmFormat {
        self.format
    }
}

impl Drop for ManualDevice {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.callback = None;
        state.playing = false;
    }
}

#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalDevice;

#[cfg(feature = "cpal-output")]
mod cpal_output {
    use std::{
        sync::mpsc::{self, Sender},
        thread::{self, JoinHandle},
    };

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{error, info, warn};

    use super::{OutputDevice, RenderCallback};
    use crate::{error::GraphError, source::PcmFormat};

    enum StreamCommand {
        Play(Sender<Result<(), GraphError>>),
        Pause,
        Close,
    }

    /// Default system output through cpal. The stream lives on its own thread
    /// because cpal streams are not `Send` on every host.
    pub struct CpalDevice {
        name: String,
        format: PcmFormat,
        commands: Option<Sender<StreamCommand>>,
        worker: Option<JoinHandle<()>>,
    }

    impl CpalDevice {
        pub fn default_output() -> Result<Self, GraphError> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| GraphError::Attach("no output device available".to_string()))?;
            let supported = device
                .default_output_config()
                .map_err(|error| GraphError::Attach(error.to_string()))?;
            let name = device.name().unwrap_or_else(|_| "default".to_string());
            let format = PcmFormat::new(supported.sample_rate().0, supported.channels());
            info!(device = %name, ?format, "output device discovered");

            Ok(Self {
                name,
                format,
                commands: None,
                worker: None,
            })
        }
    }

    impl OutputDevice for CpalDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn format(&self) -> Result<PcmFormat, GraphError> {
            Ok(self.format)
        }

        fn open(&mut self, mut callback: RenderCallback) -> Result<(), GraphError> {
            self.close();

            let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), GraphError>>();
            let format = self.format;

            let worker = thread::Builder::new()
                .name("varitrack-output".to_string())
                .spawn(move || {
                    let unavailable = |message: String| GraphError::EngineUnavailable(message);
                    let stream = cpal::default_host()
                        .default_output_device()
                        .ok_or_else(|| unavailable("output device disappeared".to_string()))
                        .and_then(|device| {
                            let config = cpal::StreamConfig {
                                channels: format.channels,
                                sample_rate: cpal::SampleRate(format.sample_rate),
                                buffer_size: cpal::BufferSize::Default,
                            };
                            device
                                .build_output_stream(
                                    &config,
                                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                        callback(data);
                                    },
                                    |error| error!(%error, "output stream error"),
                                    None,
                                )
                                .map_err(|error| unavailable(error.to_string()))
                        });

                    let stream = match stream {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(error) => {
                            let _ = ready_tx.send(Err(error));
                            return;
                        }
                    };

                    while let Ok(command) = command_rx.recv() {
                        match command {
                            StreamCommand::Play(reply) => {
                                let result = stream
                                    .play()
                                    .map_err(|error| GraphError::EngineUnavailable(error.to_string()));
                                let _ = reply.send(result);
                            }
                            StreamCommand::Pause => {
                                if let Err(error) = stream.pause() {
                                    warn!(%error, "failed to pause output stream");
                                }
                            }
                            StreamCommand::Close => break,
                        }
                    }
                })
                .map_err(|error| GraphError::EngineUnavailable(error.to_string()))?;

            ready_rx
                .recv()
                .map_err(|_| GraphError::EngineUnavailable("output thread exited".to_string()))??;
            self.commands = Some(command_tx);
            self.worker = Some(worker);
            Ok(())
        }

        fn play(&mut self) -> Result<(), GraphError> {
            let commands = self
                .commands
                .as_ref()
                .ok_or_else(|| GraphError::EngineUnavailable("stream not open".to_string()))?;
            let (reply_tx, reply_rx) = mpsc::channel();
            commands
                .send(StreamCommand::Play(reply_tx))
                .map_err(|_| GraphError::EngineUnavailable("output thread exited".to_string()))?;
            reply_rx
                .recv()
                .map_err(|_| GraphError::EngineUnavailable("output thread exited".to_string()))?
        }

        fn pause(&mut self) {
            if let Some(commands) = &self.commands {
                let _ = commands.send(StreamCommand::Pause);
            }
        }

        fn close(&mut self) {
            if let Some(commands) = self.commands.take() {
                let _ = commands.send(StreamCommand::Close);
            }
            if let Some(worker) = self.worker.take()
                && worker.join().is_err()
            {
                warn!("output thread panicked");
            }
        }
    }

    impl Drop for CpalDevice {
        fn drop(&mut self) {
            self.close();
        }
    }
}

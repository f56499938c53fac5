use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use varitrack_core::{
    AppConfig, AudioSource, ExportedFile, ManualDevice, PcmFormat, RenderError,
    SettingsStore, TrackHandle, TrackId, TrackLibrary, TrackStore, TransportConfig,
    TransportController, TransportDeps, TransportObserver, UserSettings, WavExportSink,
    diagnostics::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "varitrack-cli")]
#[command(about = "Headless transport, library and export tools for Varitrack")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the discovered varitrack.config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Lists the tracks in the library in playlist order.
    List,
    Import {
        path: PathBuf,
    },
    Delete {
        id: String,
    },
    /// Decodes an audio file and prints its format.
    Inspect {
        path: PathBuf,
    },
    /// Renders a library track from `--from` to its end into a WAV file.
    Export {
        id: String,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 1.0)]
        rate: f32,

        #[arg(long, default_value_t = 0.0)]
        from: f64,
    },
    Repeat {
        #[arg(long)]
        toggle: bool,
    },
    /// Plays a library track on the default output device.
    Play {
        id: String,

        #[arg(long, default_value_t = 1.0)]
        rate: f32,
    },
}

struct ProgressLogger;

impl TransportObserver for ProgressLogger {
    fn on_render_progress(&self, fraction: f64) {
        debug!(progress = format!("{:.1}%", fraction * 100.0), "export progress");
    }

    fn on_render_completed(&self, result: &Result<ExportedFile, RenderError>) {
        if let Err(error) = result {
            tracing::warn!(%error, "export did not complete");
        }
    }

    fn on_position_changed(&self, seconds: f64) {
        debug!(position = seconds, "position");
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(log_dir) = cli.log_dir {
        config.diagnostics.logs_directory = log_dir;
    }
    let _telemetry = init_tracing(&config)?;

    let library = Arc::new(TrackLibrary::new(&config.library.directory));
    let settings = Arc::new(
        SettingsStore::open(&config.settings.path).context("failed to open settings store")?,
    );

    match cli.command {
        Commands::List => {
            let tracks = library.list_tracks()?;
            for track in &tracks {
                println!("{}\t{}\t{} bytes", track.id, track.display_name(), track.size_bytes);
            }
            info!(count = tracks.len(), "tracks listed");
        }
        Commands::Import { path } => {
            let handle = library.import_track(&path)?;
            println!("{}", serde_json::to_string_pretty(&handle)?);
        }
        Commands::Delete { id } => {
            library.delete_track(&TrackId::new(id))?;
        }
        Commands::Inspect { path } => {
            let source = AudioSource::open(&path)?;
            let summary = serde_json::json!({
                "id": source.id(),
                "sample_rate": source.sample_rate(),
                "layout": source.layout(),
                "frames": source.frame_length(),
                "duration_seconds": source.duration_seconds(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Export {
            id,
            output,
            rate,
            from,
        } => {
            let handle = find_track(library.as_ref(), &id)?;
            let exported = export_track(&config, library, settings, &handle, output, rate, from)?;
            println!("{}", serde_json::to_string_pretty(&exported)?);
        }
        Commands::Repeat { toggle } => {
            let enabled = if toggle {
                let enabled = !settings.repeat_enabled();
                settings.set_repeat_enabled(enabled)?;
                enabled
            } else {
                settings.repeat_enabled()
            };
            println!("repeat: {}", if enabled { "on" } else { "off" });
        }
        Commands::Play { id, rate } => {
            let handle = find_track(library.as_ref(), &id)?;
            play_track(&config, library, settings, &handle, rate)?;
        }
    }

    Ok(())
}

fn find_track(library: &TrackLibrary, id: &str) -> anyhow::Result<TrackHandle> {
    library
        .list_tracks()?
        .into_iter()
        .find(|handle| handle.id.as_str() == id)
        .ok_or_else(|| anyhow::anyhow!("track not found in library: {id}"))
}

fn export_track(
    config: &AppConfig,
    library: Arc<TrackLibrary>,
    settings: Arc<SettingsStore>,
    handle: &TrackHandle,
    output: Option<PathBuf>,
    rate: f32,
    from: f64,
) -> anyhow::Result<ExportedFile> {
    let source = library.open_track(handle)?;
    let format = PcmFormat::new(
        config.export.sample_rate.unwrap_or(source.sample_rate()),
        config.export.channels.unwrap_or(source.format().channels),
    );
    let destination =
        output.unwrap_or_else(|| default_export_path(&config.export.output_directory, handle));

    let controller = TransportController::new(
        Box::new(ManualDevice::new(source.format())),
        TransportDeps {
            store: library,
            settings,
            observer: Arc::new(ProgressLogger),
        },
        TransportConfig::from(config),
    );
    controller.load_track(source)?;
    controller.set_rate(rate)?;
    controller.seek(from)?;

    let sink = WavExportSink::create(&destination, format, config.export.encoding())?;
    let job = controller.export(Box::new(sink))?;
    let exported = job.wait()?;
    info!(path = %exported.path.display(), frames = exported.frames, "export written");
    Ok(exported)
}

fn default_export_path(directory: &Path, handle: &TrackHandle) -> PathBuf {
    directory.join(format!("{}-export.wav", handle.display_name()))
}

#[cfg(feature = "cpal-output")]
fn play_track(
    config: &AppConfig,
    library: Arc<TrackLibrary>,
    settings: Arc<SettingsStore>,
    handle: &TrackHandle,
    rate: f32,
) -> anyhow::Result<()> {
    use std::{thread, time::Duration};

    use varitrack_core::{CpalDevice, PlaybackState};

    let device = CpalDevice::default_output()?;
    let controller = TransportController::new(
        Box::new(device),
        TransportDeps {
            store: library,
            settings,
            observer: Arc::new(ProgressLogger),
        },
        TransportConfig::from(config),
    );
    controller.open_track(handle)?;
    let applied = controller.set_rate(rate)?;
    controller.play()?;
    info!(track_id = %handle.id, rate = applied, "playing");

    while controller.state() == PlaybackState::Playing {
        thread::sleep(Duration::from_millis(250));
        println!(
            "{}\t{:.2}/{:.2}",
            controller.current_track().map_or_else(String::new, |id| id.to_string()),
            controller.position(),
            controller.duration()
        );
    }
    controller.shutdown();
    Ok(())
}

#[cfg(not(feature = "cpal-output"))]
fn play_track(
    _config: &AppConfig,
    _library: Arc<TrackLibrary>,
    _settings: Arc<SettingsStore>,
    handle: &TrackHandle,
    _rate: f32,
) -> anyhow::Result<()> {
    Err(anyhow::anyhow!(
        "cannot play {}: real-time playback requires the cpal-output feature",
        handle.id
    ))
}

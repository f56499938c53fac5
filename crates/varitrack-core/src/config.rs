use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    render::{DEFAULT_BLOCK_FRAMES, SampleEncoding},
    transport::{DEFAULT_MAX_RATE, DEFAULT_MIN_RATE, TransportConfig},
};

pub const CONFIG_FILE_NAME: &str = "varitrack.config.toml";
pub const CONFIG_PATH_ENV: &str = "VARITRACK_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub library: LibraryConfig,
    pub transport: TransportSection,
    pub export: ExportConfig,
    pub settings: SettingsConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub poll_interval_ms: u64,
    pub min_rate: f32,
    pub max_rate: f32,
    pub default_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub block_frames: usize,
    pub bits_per_sample: u16,
    /// Overrides the source sample rate when set.
    pub sample_rate: Option<u32>,
    /// Overrides the source channel count when set.
    pub channels: Option<u16>,
    pub output_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    pub logs_directory: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/tracks"),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            min_rate: DEFAULT_MIN_RATE,
            max_rate: DEFAULT_MAX_RATE,
            default_rate: 1.0,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            block_frames: DEFAULT_BLOCK_FRAMES,
            bits_per_sample: 16,
            sample_rate: None,
            channels: None,
            output_directory: PathBuf::from("data/exports"),
        }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/settings.json"),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: crate::diagnostics::DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: "varitrack".to_string(),
            logs_directory: PathBuf::from("logs"),
        }
    }
}

impl ExportConfig {
    #[must_use]
    pub fn encoding(&self) -> SampleEncoding {
        SampleEncoding::from_bits(self.bits_per_sample).unwrap_or(SampleEncoding::Int16)
    }
}

impl From<&AppConfig> for TransportConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.transport.poll_interval_ms.max(1)),
            min_rate: config.transport.min_rate,
            max_rate: config.transport.max_rate,
            default_rate: config.transport.default_rate,
            export_block_frames: config.export.block_frames.max(1),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        match discover_config_path()? {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("no {CONFIG_FILE_NAME} found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;

        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }
}

fn discover_config_path() -> Result<Option<PathBuf>> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    Ok(candidates.into_iter().find(|path| path.is_file()))
}

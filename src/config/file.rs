//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon/realtime.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::DisplayPolicy;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeConfigFile {
    /// Remote session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Capture/playback configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Remote session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Streaming endpoint (e.g. `ws://127.0.0.1:3000/realtime`)
    pub endpoint: Option<String>,

    /// System prompt sent during the handshake
    pub system_prompt: Option<String>,

    /// How tentatively generated assistant text is shown
    pub display_policy: Option<DisplayPolicy>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Wire rate for microphone frames
    pub capture_sample_rate: Option<u32>,

    /// Wire rate for assistant audio
    pub playback_sample_rate: Option<u32>,

    /// Samples per capture frame
    pub frame_samples: Option<usize>,

    /// Audio held back before playback starts
    pub prebuffer_ms: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `RealtimeConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> RealtimeConfigFile {
    config_file_path().map_or_else(RealtimeConfigFile::default, |path| load_config_file_from(&path))
}

/// Load the TOML config file from an explicit path
///
/// Returns `RealtimeConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> RealtimeConfigFile {
    if !path.exists() {
        return RealtimeConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                RealtimeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RealtimeConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon/realtime.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon")
            .join("realtime.toml")
    })
}

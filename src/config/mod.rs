//! Configuration management for Beacon realtime

pub mod file;

use serde::Deserialize;

use crate::{Error, Result};

pub use file::RealtimeConfigFile;

/// Default streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:3000/realtime";

/// Default wire rate for microphone frames
pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Default wire rate for assistant audio
pub const DEFAULT_PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Default samples per capture frame
pub const DEFAULT_FRAME_SAMPLES: usize = 512;

/// Default playback pre-buffer
pub const DEFAULT_PREBUFFER_MS: u32 = 100;

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
Keep your responses short, generally two or three sentences for chatty scenarios.";

/// How tentatively generated assistant text is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayPolicy {
    /// Shown unless the turn is explicitly marked speculative
    #[default]
    FailOpen,
    /// Hidden unless the turn is explicitly marked final
    FailClosed,
}

impl std::str::FromStr for DisplayPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail-open" => Ok(Self::FailOpen),
            "fail-closed" => Ok(Self::FailClosed),
            other => Err(Error::Config(format!("unknown display policy: {other}"))),
        }
    }
}

/// Per-connection voice session configuration
///
/// Immutable once a session is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSessionConfig {
    /// System prompt sent as the second handshake message
    pub system_prompt: String,

    /// Streaming endpoint URL
    pub endpoint: String,

    /// Wire rate for microphone frames
    pub capture_sample_rate: u32,

    /// Wire rate for assistant audio
    pub playback_sample_rate: u32,

    /// Samples per capture frame
    pub frame_samples: usize,

    /// Audio held back before playback starts (and after underrun/barge-in)
    pub prebuffer_ms: u32,

    /// Display policy for speculative assistant text
    pub display_policy: DisplayPolicy,
}

impl Default for VoiceSessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            capture_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            playback_sample_rate: DEFAULT_PLAYBACK_SAMPLE_RATE,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            prebuffer_ms: DEFAULT_PREBUFFER_MS,
            display_policy: DisplayPolicy::FailOpen,
        }
    }
}

impl VoiceSessionConfig {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::from_sources(fc, |key| std::env::var(key).ok());
        config.validate()?;

        tracing::debug!(
            endpoint = %config.endpoint,
            capture_sample_rate = config.capture_sample_rate,
            playback_sample_rate = config.playback_sample_rate,
            "loaded voice session configuration"
        );

        Ok(config)
    }

    /// Merge a config file overlay and an environment lookup over defaults
    ///
    /// Unparsable numeric env values are ignored.
    pub fn from_sources(fc: RealtimeConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            system_prompt: env("BEACON_REALTIME_SYSTEM_PROMPT")
                .or(fc.session.system_prompt)
                .unwrap_or(defaults.system_prompt),
            endpoint: env("BEACON_REALTIME_ENDPOINT")
                .or(fc.session.endpoint)
                .unwrap_or(defaults.endpoint),
            capture_sample_rate: env("BEACON_REALTIME_CAPTURE_RATE")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.capture_sample_rate)
                .unwrap_or(defaults.capture_sample_rate),
            playback_sample_rate: env("BEACON_REALTIME_PLAYBACK_RATE")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.playback_sample_rate)
                .unwrap_or(defaults.playback_sample_rate),
            frame_samples: fc.audio.frame_samples.unwrap_or(defaults.frame_samples),
            prebuffer_ms: fc.audio.prebuffer_ms.unwrap_or(defaults.prebuffer_ms),
            display_policy: fc.session.display_policy.unwrap_or_default(),
        }
    }

    /// Override the endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns error on an empty endpoint, a zero sample rate, or a zero frame size
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("endpoint must not be empty".to_string()));
        }
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.frame_samples == 0 {
            return Err(Error::Config("frame_samples must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Pre-buffer length in playback samples
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn prebuffer_samples(&self) -> usize {
        (u64::from(self.playback_sample_rate) * u64::from(self.prebuffer_ms) / 1000) as usize
    }
}

//! # Configuration Management
//!
//! This module handles loading and managing client configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `BACKEND_URL` environment variable
//! 2. Environment variables (APP_BACKEND__URL, APP_CAPTURE__BLOCK_SIZE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main client configuration that contains all settings.
///
/// ## Why separate config structs:
/// The outbound side (capture), the inbound side (playback) and the concrete
/// device choices (media) change for different reasons, so they are grouped apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

/// Where the duplex channel connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// WebSocket endpoint, `ws://` or `wss://`
    pub url: String,
}

/// Outbound (microphone and camera) settings.
///
/// ## Fields:
/// - `sample_rate`: Rate the backend expects for `audio/pcm` envelopes (16 kHz)
/// - `block_size`: Samples per microphone block (4096 at 16 kHz ≈ 256 ms)
/// - `video_interval_ms`: Snapshot period (1000 ms = 1 Hz)
/// - `max_video_width`: Snapshots wider than this are scaled down
/// - `jpeg_quality`: JPEG quality, 1-100
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub video_interval_ms: u64,
    pub max_video_width: u32,
    pub jpeg_quality: u8,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
}

/// Inbound (synthesized speech) settings.
///
/// ## Tuning guidelines:
/// - Larger `batch_duration_ms`: fewer seams between units, more latency
/// - Larger `lead_in_ms`: more protection against underrun after a resync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub batch_duration_ms: u32,
    pub lead_in_ms: u32,
    pub visualizer_gain: f32,
}

/// Concrete device choices for the binary.
///
/// Any field left empty falls back to the native device (with the `device`
/// feature) or disables that path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// WAV file streamed as the microphone
    pub input_wav: Option<PathBuf>,
    /// WAV file the played-back audio is recorded into
    pub output_wav: Option<PathBuf>,
    /// Still image served as the camera
    pub video_image: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                url: "ws://localhost:9083".to_string(),
            },
            capture: CaptureConfig {
                sample_rate: 16000,
                block_size: 4096,
                video_interval_ms: 1000,
                max_video_width: 1024,
                jpeg_quality: 90,
                mic_enabled: true,
                camera_enabled: true,
            },
            playback: PlaybackConfig {
                sample_rate: 24000,
                batch_duration_ms: 200,
                lead_in_ms: 50,
                visualizer_gain: 1.0,
            },
            media: MediaConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the BACKEND_URL shortcut
    ///
    /// ## Environment Variable Examples:
    /// - `APP_BACKEND__URL=wss://example.org/live`
    /// - `APP_CAPTURE__MIC_ENABLED=false`
    /// - `APP_MEDIA__INPUT_WAV=./question.wav`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(url) = env::var("BACKEND_URL") {
            settings = settings.set_override("backend.url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The backend URL is a WebSocket URL
    /// - Sample rates, block size and batch duration are non-zero
    /// - JPEG quality is within 1-100
    pub fn validate(&self) -> Result<()> {
        let url = self.backend.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Backend URL must start with ws:// or wss://, got '{}'",
                url
            ));
        }

        if self.capture.sample_rate == 0 || self.playback.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.capture.block_size == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        if self.capture.video_interval_ms == 0 {
            return Err(anyhow::anyhow!("Video interval must be greater than 0"));
        }

        if self.capture.max_video_width == 0 {
            return Err(anyhow::anyhow!("Maximum video width must be greater than 0"));
        }

        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(anyhow::anyhow!(
                "JPEG quality must be between 1 and 100, got {}",
                self.capture.jpeg_quality
            ));
        }

        if self.playback.batch_duration_ms == 0 {
            return Err(anyhow::anyhow!("Playback batch duration must be greater than 0"));
        }

        Ok(())
    }
}

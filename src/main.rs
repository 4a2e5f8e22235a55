//! # Live Media Client - Main Application Entry Point
//!
//! Connects one session to the configured backend and runs it until the user
//! presses Ctrl-C, the process gets SIGTERM, or the backend closes the channel.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the session runs on the actix system's event loop
//! - **Result<T, E>**: startup errors bubble up to `main` through `anyhow`
//! - **cfg attributes**: native audio devices only exist with the `device` feature
//! - **static**: a global shutdown flag set from the signal task
//!
//! ## Media Selection:
//! | Setting | Used for | Fallback |
//! |---|---|---|
//! | `media.input_wav` | microphone | native microphone (`device` feature) or none |
//! | `media.output_wav` | speaker | native speaker (`device` feature) |
//! | `media.video_image` | camera | no video |

use anyhow::Result;
use live_media_client::config::{AppConfig, MediaConfig};
use live_media_client::device::image_source::StillImageSource;
use live_media_client::device::wav::{WavFileInput, WavRecorder};
use live_media_client::device::{AudioInput, MediaDevices, OutputDevice, VideoSource};
use live_media_client::{Session, TracingObserver, UiObserver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting live-media-client v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend endpoint: {}", config.backend.url);

    let media = build_media(&config)?;
    let observer: Arc<dyn UiObserver> = Arc::new(TracingObserver);

    setup_signal_handlers();

    let session = Session::start(config, media, observer).await?;

    tokio::select! {
        _ = wait_for_session_end(&session) => {
            info!("Session ended");
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping session...");
            Session::stop(&session);
            wait_for_session_end(&session).await;
        }
    }

    info!("Client stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// ## Log Levels:
/// - `RUST_LOG` wins when set
/// - otherwise debug for this crate, which includes per-unit scheduling lines
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_media_client=debug,actix=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Pick the devices the session runs with.
fn build_media(config: &AppConfig) -> Result<MediaDevices> {
    let media = &config.media;
    Ok(MediaDevices {
        audio_input: build_audio_input(media),
        video_source: media
            .video_image
            .as_ref()
            .map(|path| Box::new(StillImageSource::new(path)) as Box<dyn VideoSource>),
        output: build_output(media, config.playback.sample_rate)?,
    })
}

fn build_audio_input(media: &MediaConfig) -> Option<Box<dyn AudioInput>> {
    if let Some(path) = &media.input_wav {
        return Some(Box::new(WavFileInput::new(path)));
    }

    #[cfg(feature = "device")]
    {
        Some(Box::new(live_media_client::device::native::MicrophoneInput::new()))
    }

    #[cfg(not(feature = "device"))]
    {
        warn!("No input WAV configured and native devices are disabled, microphone is off");
        None
    }
}

fn build_output(media: &MediaConfig, sample_rate: u32) -> Result<Box<dyn OutputDevice>> {
    if let Some(path) = &media.output_wav {
        return Ok(Box::new(WavRecorder::start(path, sample_rate)?));
    }

    #[cfg(feature = "device")]
    {
        Ok(Box::new(live_media_client::device::native::SpeakerOutput::open()?))
    }

    #[cfg(not(feature = "device"))]
    {
        Err(anyhow::anyhow!(
            "No output device: set APP_MEDIA__OUTPUT_WAV or build with --features device"
        ))
    }
}

/// Set up handlers for SIGTERM and SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let signals = (
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()),
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()),
        );
        let (mut sigterm, mut sigint) = match signals {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

async fn wait_for_session_end(session: &actix::Addr<Session>) {
    while session.connected() {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

//! # Media Device Collaborators
//!
//! The pipeline never talks to hardware directly. It sees three small traits:
//! - **AudioInput**: delivers microphone blocks through a callback
//! - **VideoSource**: hands out the current camera frame on demand
//! - **OutputDevice**: accepts playback units with a committed start time
//!
//! ## Implementations:
//! | Implementor | Backing |
//! |---|---|
//! | [`wav::WavFileInput`] | a WAV file streamed at real-time pace |
//! | [`wav::WavRecorder`] | a [`Timeline`] rendered in real time into a WAV file |
//! | [`image_source::StillImageSource`] | a still image standing in for a camera |
//! | `native::MicrophoneInput` / `native::SpeakerOutput` | cpal (feature `device`) |
//!
//! ## Threading:
//! Devices run their own threads (audio callbacks, pacing loops). Anything they
//! hand back to the session crosses threads, hence the `Send` bounds on the
//! callbacks; the session itself stays single-threaded.

pub mod image_source;
#[cfg(feature = "device")]
pub mod native;
pub mod timeline;
pub mod wav;

pub use timeline::{Timeline, TimelineOutput};

use crate::error::PipelineResult;
use image::DynamicImage;
use std::sync::Arc;

/// Identifies one scheduled playback unit on an output device.
pub type SourceId = u64;

/// Receives one captured block of mono samples at the device's rate.
pub type FrameSink = Box<dyn FnMut(Vec<f32>) + Send + 'static>;

/// Notified when a scheduled unit finishes playing on its own.
pub type CompletionHandler = Arc<dyn Fn(SourceId) + Send + Sync + 'static>;

/// A microphone-like source of audio blocks.
pub trait AudioInput {
    /// Acquire the device and report the rate it will actually deliver.
    ///
    /// Fails with `MediaAccess` when the device is missing or permission is denied.
    fn open(&mut self) -> PipelineResult<u32>;

    /// Start delivering blocks of `block_size` mono samples to `sink`.
    fn start(&mut self, block_size: usize, sink: FrameSink) -> PipelineResult<()>;

    /// Stop delivering blocks. Safe to call more than once.
    fn stop(&mut self);
}

/// A camera-like source of still frames.
pub trait VideoSource {
    fn open(&mut self) -> PipelineResult<()>;

    /// The current frame, or `None` when no live frame is available.
    fn grab_frame(&mut self) -> Option<DynamicImage>;
}

/// A speaker-like sink that plays units at committed times.
pub trait OutputDevice {
    /// Native rate of the device.
    fn sample_rate(&self) -> u32;

    /// Monotonic output clock in seconds; only deltas are meaningful.
    fn current_time(&self) -> f64;

    /// Commit `samples` (at `sample_rate`) to start at `start_at` seconds.
    fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32, start_at: f64) -> PipelineResult<SourceId>;

    /// Stop a unit immediately. Stopping an already-ended unit returns an
    /// error the caller is expected to ignore.
    fn stop(&mut self, id: SourceId) -> PipelineResult<()>;

    /// Register the natural-completion callback.
    fn set_completion_handler(&mut self, handler: CompletionHandler);

    /// Release the device. Called once at session teardown.
    fn close(&mut self) {}
}

/// The devices one session runs with.
pub struct MediaDevices {
    pub audio_input: Option<Box<dyn AudioInput>>,
    pub video_source: Option<Box<dyn VideoSource>>,
    pub output: Box<dyn OutputDevice>,
}

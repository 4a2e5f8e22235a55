//! # Live Media Client
//!
//! Real-time media client for a conversational backend: microphone audio and
//! camera snapshots go out over one WebSocket, synthesized speech comes back
//! and is played without gaps, and a barge-in signal from the backend cuts
//! playback off immediately.
//!
//! ## Module Map:
//! - [`audio`]: PCM codec, resampling, playback scheduler, visualizer
//! - [`capture`]: microphone and camera frames to outbound envelopes
//! - [`websocket`]: envelopes and the duplex transport channel
//! - [`session`]: the actor tying everything together
//! - [`device`]: microphone, camera and speaker collaborators
//! - [`observer`]: the interface a UI implements to follow a session
//! - [`config`], [`error`], [`state`]: settings, errors and session counters

pub mod audio;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod observer;
pub mod session;
pub mod state;
pub mod websocket;

pub use config::AppConfig;
pub use error::{PipelineError, PipelineResult};
pub use observer::{LogEntry, LogKind, TracingObserver, UiObserver};
pub use session::Session;
pub use websocket::ChannelState;

//! # Audio Module
//!
//! Everything that touches samples on their way in or out of the session.
//!
//! ## Key Components:
//! - **Codec**: float ↔ 16-bit PCM and the base64 wire encoding
//! - **Resample**: rate conversion and downmixing for device audio
//! - **Scheduler**: the gapless playback queue with barge-in support
//! - **Visualizer**: waveform rendering of live input
//!
//! ## Audio Format Requirements:
//! - **Outbound**: 16 kHz, 16-bit PCM, mono, little-endian
//! - **Inbound**: 24 kHz, 16-bit PCM, mono, little-endian

pub mod codec; // PCM conversion and transport encoding
pub mod resample; // Rate conversion
pub mod scheduler; // Playback queue
pub mod visualizer; // Waveform rendering

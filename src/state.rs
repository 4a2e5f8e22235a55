//! # Session Statistics
//!
//! Counters one session keeps about its own traffic. They are never sent
//! anywhere; the session logs them once when it tears down.
//!
//! ## Key Rust Concepts:
//!
//! ### Plain fields instead of locks
//! - **Why no Arc/RwLock**: the session actor owns its stats and handles one
//!   message at a time, so `&mut self` is all the synchronization needed
//! - **Copy counters**: `u64` counters are updated in place with `+=`
//!
//! ### chrono and uuid
//! - **DateTime<Utc>**: wall-clock start time, printable in logs
//! - **Uuid**: random id that ties every log line of one session together

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Per-session traffic counters.
///
/// ## Rust Concepts:
/// - **#[derive(Debug, Clone)]**: printable with `{:?}` and copyable for tests
/// - **Instant**: monotonic time for the session duration
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    start_instant: Instant,

    /// Microphone envelopes handed to the channel
    pub audio_frames_sent: u64,
    /// Microphone blocks dropped (muted, stopped or channel not open)
    pub audio_frames_dropped: u64,
    /// Camera envelopes handed to the channel
    pub video_frames_sent: u64,
    /// Inbound envelopes that parsed
    pub envelopes_received: u64,
    /// Inbound frames dropped as malformed
    pub decode_errors: u64,
    /// Playback units committed to the output device
    pub units_scheduled: u64,
    /// Playback units the output device rejected
    pub playback_errors: u64,
    /// Barge-in signals that cut off active or queued playback
    pub interrupts: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            start_instant: Instant::now(),
            audio_frames_sent: 0,
            audio_frames_dropped: 0,
            video_frames_sent: 0,
            envelopes_received: 0,
            decode_errors: 0,
            units_scheduled: 0,
            playback_errors: 0,
            interrupts: 0,
        }
    }

    /// Seconds since the session started.
    pub fn uptime_seconds(&self) -> f64 {
        self.start_instant.elapsed().as_secs_f64()
    }

    /// Write the counters as one structured log line.
    pub fn log_summary(&self) {
        info!(
            session_id = %self.session_id,
            started_at = %self.started_at.to_rfc3339(),
            uptime_seconds = self.uptime_seconds(),
            audio_frames_sent = self.audio_frames_sent,
            audio_frames_dropped = self.audio_frames_dropped,
            video_frames_sent = self.video_frames_sent,
            envelopes_received = self.envelopes_received,
            decode_errors = self.decode_errors,
            units_scheduled = self.units_scheduled,
            playback_errors = self.playback_errors,
            interrupts = self.interrupts,
            "Session summary"
        );
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_start_at_zero() {
        let stats = SessionStats::new();
        assert_eq!(stats.audio_frames_sent, 0);
        assert_eq!(stats.decode_errors, 0);
        assert!(stats.uptime_seconds() >= 0.0);
        assert!(stats.started_at <= Utc::now());
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        assert_ne!(SessionStats::new().session_id, SessionStats::new().session_id);
    }
}

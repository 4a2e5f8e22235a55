//! # UI Observer
//!
//! The presentation layer is not part of the client core. Whatever shows the
//! user what is going on (a terminal, a window, a test) implements
//! [`UiObserver`] and is told about three things:
//! - **Status changes** of the backend channel
//! - **Log entries**, including transcript text from the backend
//! - **Waveforms** of the live microphone input
//!
//! Observers are called from the session's event loop and must not block.

use crate::audio::visualizer::Waveform;
use crate::websocket::ChannelState;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Severity and origin of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Warn,
    Error,
    /// Text sent by the backend
    Transcript,
}

/// One line for the user-facing log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Info,
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Warn,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Error,
            message: message.into(),
        }
    }

    pub fn transcript(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Transcript,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            LogKind::Info => "info",
            LogKind::Warn => "warn",
            LogKind::Error => "error",
            LogKind::Transcript => "text",
        };
        write!(f, "[{}] {}", tag, self.message)
    }
}

/// Receives everything the session wants the user to see.
pub trait UiObserver: Send + Sync {
    fn on_status_change(&self, state: ChannelState);

    fn on_log(&self, entry: &LogEntry);

    /// Called for every captured microphone block while capture runs.
    fn on_visualize(&self, _waveform: &Waveform) {}
}

/// Observer that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl UiObserver for TracingObserver {
    fn on_status_change(&self, state: ChannelState) {
        info!(state = %state, "Channel status changed");
    }

    fn on_log(&self, entry: &LogEntry) {
        match entry.kind {
            LogKind::Info => info!("{}", entry.message),
            LogKind::Warn => warn!("{}", entry.message),
            LogKind::Error => error!("{}", entry.message),
            LogKind::Transcript => info!(text = %entry.message, "Backend text"),
        }
    }

    fn on_visualize(&self, waveform: &Waveform) {
        let peak = waveform
            .points
            .iter()
            .map(|&(_, y)| (waveform.height / 2.0 - y).abs())
            .fold(0.0f32, f32::max);
        debug!(points = waveform.points.len(), peak = peak, "Input waveform");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Observer that records what it was told.

    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingObserver {
        pub statuses: Mutex<Vec<ChannelState>>,
        pub logs: Mutex<Vec<LogEntry>>,
        pub waveforms: Mutex<usize>,
    }

    impl RecordingObserver {
        pub fn statuses(&self) -> Vec<ChannelState> {
            self.statuses.lock().clone()
        }

        pub fn logs_of(&self, kind: LogKind) -> Vec<String> {
            self.logs
                .lock()
                .iter()
                .filter(|entry| entry.kind == kind)
                .map(|entry| entry.message.clone())
                .collect()
        }

        pub fn waveform_count(&self) -> usize {
            *self.waveforms.lock()
        }
    }

    impl UiObserver for RecordingObserver {
        fn on_status_change(&self, state: ChannelState) {
            self.statuses.lock().push(state);
        }

        fn on_log(&self, entry: &LogEntry) {
            self.logs.lock().push(entry.clone());
        }

        fn on_visualize(&self, _waveform: &Waveform) {
            *self.waveforms.lock() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_display() {
        assert_eq!(LogEntry::transcript("hello").to_string(), "[text] hello");
        assert_eq!(LogEntry::error("boom").to_string(), "[error] boom");
    }

    #[test]
    fn test_recording_observer_filters_by_kind() {
        let observer = testing::RecordingObserver::default();
        observer.on_log(&LogEntry::info("connected"));
        observer.on_log(&LogEntry::transcript("hi there"));
        observer.on_status_change(ChannelState::Open);

        assert_eq!(observer.logs_of(LogKind::Transcript), vec!["hi there".to_string()]);
        assert_eq!(observer.statuses(), vec![ChannelState::Open]);
    }
}

//! # Playback Scheduler
//!
//! Turns a bursty stream of decoded speech chunks into continuous output.
//! Chunks are queued in arrival order, batched into units of up to a target
//! duration, and committed to the output device back to back against its clock,
//! so consecutive units neither overlap nor leave gaps.
//!
//! ## Scheduling Step:
//! 1. Pop chunks from the front of the queue until the next one would push the
//!    unit past the batch ceiling (a unit always takes at least one chunk)
//! 2. Start the unit at `next_start_time` if that is still ahead of the clock;
//!    otherwise playback has underrun, so re-anchor at `clock + lead_in`
//! 3. Advance `next_start_time` to the end of the unit and track it as active
//! 4. Repeat until the queue is empty; scheduling looks ahead and never waits
//!    for a unit to finish
//!
//! ## Ownership of the trigger:
//! `enqueue` never schedules by itself. It reports whether a step needs to be
//! triggered and the owner runs [`PlaybackScheduler::run`] as a separate task,
//! so chunks that arrive in the same burst are batched together and an
//! interrupt that lands before the step cancels them cleanly.

use crate::device::{CompletionHandler, OutputDevice, SourceId};
use crate::error::PipelineError;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Scheduler tuning, derived from the playback configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Rate of the decoded chunks (24 kHz from the backend)
    pub sample_rate: u32,
    /// Upper bound on the duration of one combined unit
    pub batch_duration_ms: u32,
    /// Safety margin applied when re-anchoring after an underrun
    pub lead_in_ms: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            batch_duration_ms: 200,
            lead_in_ms: 50,
        }
    }
}

impl SchedulerConfig {
    /// Most samples one unit may combine.
    pub fn max_batch_samples(&self) -> usize {
        (self.sample_rate as u64 * self.batch_duration_ms as u64 / 1000) as usize
    }

    pub fn lead_in_seconds(&self) -> f64 {
        self.lead_in_ms as f64 / 1000.0
    }
}

/// One decoded chunk waiting in the queue.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub samples: Vec<f32>,
    /// Arrival order within the session
    pub sequence: u64,
}

/// A unit committed to the output device and not yet finished.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
    pub sample_count: usize,
}

impl ScheduledSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Outcome of one scheduling step.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Units handed to the output device, in start order
    pub scheduled: Vec<ScheduledSource>,
    /// Units the output device rejected; they were skipped
    pub failures: Vec<PipelineError>,
}

/// Gapless, strictly ordered playback queue.
pub struct PlaybackScheduler {
    config: SchedulerConfig,
    output: Box<dyn OutputDevice>,
    queue: VecDeque<PlaybackChunk>,
    next_start_time: f64,
    active_sources: Vec<ScheduledSource>,
    playing: bool,
    next_sequence: u64,
}

impl PlaybackScheduler {
    pub fn new(config: SchedulerConfig, output: Box<dyn OutputDevice>) -> Self {
        Self {
            config,
            output,
            queue: VecDeque::new(),
            next_start_time: 0.0,
            active_sources: Vec::new(),
            playing: false,
            next_sequence: 0,
        }
    }

    /// Append a decoded chunk to the queue.
    ///
    /// ## Returns:
    /// - **true**: nothing was playing, the caller must trigger [`run`](Self::run)
    /// - **false**: a step is already pending, or the chunk was empty
    pub fn enqueue(&mut self, samples: Vec<f32>) -> bool {
        if samples.is_empty() {
            return false;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push_back(PlaybackChunk { samples, sequence });

        if self.playing {
            false
        } else {
            self.playing = true;
            true
        }
    }

    /// Run the scheduling step: drain the whole queue into units.
    ///
    /// Runs to completion without yielding. A unit the device rejects is logged
    /// and skipped; `next_start_time` only advances for accepted units.
    pub fn run(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        let rate = self.config.sample_rate as f64;

        while !self.queue.is_empty() {
            let (samples, first_sequence, chunk_count) = self.pop_batch();
            let sample_count = samples.len();
            let duration = sample_count as f64 / rate;

            let now = self.output.current_time();
            let start_at = if self.next_start_time > now {
                self.next_start_time
            } else {
                now + self.config.lead_in_seconds()
            };

            match self.output.schedule(samples, self.config.sample_rate, start_at) {
                Ok(id) => {
                    debug!(
                        source_id = id,
                        first_chunk = first_sequence,
                        chunks = chunk_count,
                        samples = sample_count,
                        start_at = start_at,
                        "Scheduled playback unit"
                    );
                    let source = ScheduledSource {
                        id,
                        start_at,
                        duration,
                        sample_count,
                    };
                    self.next_start_time = source.end_at();
                    self.active_sources.push(source.clone());
                    report.scheduled.push(source);
                }
                Err(err) => {
                    warn!(first_chunk = first_sequence, "Skipping playback unit: {}", err);
                    report.failures.push(err);
                }
            }
        }

        self.playing = false;
        report
    }

    /// Combine chunks from the front of the queue, up to the batch ceiling.
    fn pop_batch(&mut self) -> (Vec<f32>, u64, usize) {
        let max_samples = self.config.max_batch_samples();
        let mut combined = Vec::new();
        let mut first_sequence = 0;
        let mut chunk_count = 0;

        while let Some(chunk) = self.queue.front() {
            if chunk_count > 0 && combined.len() + chunk.samples.len() > max_samples {
                break;
            }
            if let Some(chunk) = self.queue.pop_front() {
                if chunk_count == 0 {
                    first_sequence = chunk.sequence;
                }
                combined.extend_from_slice(&chunk.samples);
                chunk_count += 1;
            }
        }

        (combined, first_sequence, chunk_count)
    }

    /// Hard stop for barge-in.
    ///
    /// Stops every active unit (failures to stop an already-ended unit are
    /// swallowed), drops everything queued and resets the clock anchor so the
    /// next chunk re-anchors against the current time. Calling it while idle
    /// changes nothing.
    ///
    /// ## Returns:
    /// Number of active units that were stopped.
    pub fn interrupt(&mut self) -> usize {
        if self.active_sources.is_empty() && self.queue.is_empty() {
            self.playing = false;
            return 0;
        }

        let sources = std::mem::take(&mut self.active_sources);
        for source in &sources {
            if let Err(err) = self.output.stop(source.id) {
                debug!(source_id = source.id, "Ignoring stop failure: {}", err);
            }
        }

        self.queue.clear();
        self.next_start_time = 0.0;
        self.playing = false;
        sources.len()
    }

    /// A unit finished playing on its own.
    ///
    /// Returns false when the unit is no longer tracked (already interrupted).
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        let before = self.active_sources.len();
        self.active_sources.retain(|source| source.id != id);
        before != self.active_sources.len()
    }

    /// Route natural completions of units back to the owner.
    pub fn set_completion_handler(&mut self, handler: CompletionHandler) {
        self.output.set_completion_handler(handler);
    }

    /// Release the output device. The scheduler is unusable afterwards.
    pub fn close_output(&mut self) {
        self.output.close();
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    pub fn active_sources(&self) -> &[ScheduledSource] {
        &self.active_sources
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }
}

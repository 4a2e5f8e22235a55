//! Sample-clocked mixer shared between the session and an audio thread.
//!
//! The session commits units at absolute times; the audio side pulls rendered
//! samples in whatever block sizes it likes. The clock is the number of samples
//! rendered so far, so it only advances as fast as the device consumes audio.
//!
//! A unit owns exactly the samples between the rounded positions of its start
//! and end times, so units that follow each other in time also follow each
//! other sample for sample at any device rate. Resampling ringing on either
//! side of a unit overlaps its neighbours and is mixed in.

use super::{CompletionHandler, OutputDevice, SourceId};
use crate::audio::resample::{Clip, StreamResampler};
use crate::error::{PipelineError, PipelineResult};
use parking_lot::Mutex;
use std::sync::Arc;

struct TimelineSource {
    id: SourceId,
    /// Sample index of `samples[0]`
    origin: u64,
    /// First sample the unit owns
    start: u64,
    /// One past the last sample the unit owns
    end: u64,
    samples: Vec<f32>,
}

impl TimelineSource {
    /// Where the last audible sample, ringing included, has played.
    fn tail_end(&self) -> u64 {
        self.origin + self.samples.len() as u64
    }
}

/// Mono mixing timeline.
pub struct Timeline {
    sample_rate: u32,
    position: u64,
    next_id: SourceId,
    sources: Vec<TimelineSource>,
    completion: Option<CompletionHandler>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            next_id: 0,
            sources: Vec::new(),
            completion: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Sample index a time in seconds falls on.
    pub fn sample_at(&self, time: f64) -> u64 {
        (time.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Place samples (already at the timeline rate) at `start_at` seconds.
    ///
    /// A start in the past is honored as-is: the part that is already behind
    /// the clock is never heard.
    pub fn insert(&mut self, samples: Vec<f32>, start_at: f64) -> SourceId {
        let start = self.sample_at(start_at);
        self.insert_at(samples, start)
    }

    /// Place samples at an absolute sample index.
    pub fn insert_at(&mut self, samples: Vec<f32>, start: u64) -> SourceId {
        let end = start + samples.len() as u64;
        self.push(start, start, end, samples)
    }

    /// Place a resampled clip so its own first sample lands on `start`.
    ///
    /// Leading ringing that would fall before sample 0 is cut off.
    pub fn insert_clip(&mut self, clip: Clip, start: u64) -> SourceId {
        let Clip {
            mut samples,
            lead,
            frames,
        } = clip;
        let lead = lead as u64;
        if lead > start {
            samples.drain(..(lead - start) as usize);
        }
        self.push(start.saturating_sub(lead), start, start + frames as u64, samples)
    }

    fn push(&mut self, origin: u64, start: u64, end: u64, samples: Vec<f32>) -> SourceId {
        self.next_id += 1;
        self.sources.push(TimelineSource {
            id: self.next_id,
            origin,
            start,
            end,
            samples,
        });
        self.next_id
    }

    /// Owned sample span of a live source.
    pub fn span(&self, id: SourceId) -> Option<(u64, u64)> {
        self.sources
            .iter()
            .find(|source| source.id == id)
            .map(|source| (source.start, source.end))
    }

    /// Drop a source before it finishes. False if it already ended.
    pub fn remove(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|source| source.id != id);
        before != self.sources.len()
    }

    pub fn active_count(&self) -> usize {
        self.sources.len()
    }

    /// Mix the next `out.len()` samples and advance the clock.
    ///
    /// ## Returns:
    /// Ids of sources that finished within this block, in end order.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        out.iter_mut().for_each(|sample| *sample = 0.0);

        let block_start = self.position;
        let block_end = block_start + out.len() as u64;

        for source in &self.sources {
            let from = source.origin.max(block_start);
            let to = source.tail_end().min(block_end);
            for t in from..to {
                out[(t - block_start) as usize] += source.samples[(t - source.origin) as usize];
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.position = block_end;

        let mut ended: Vec<(u64, SourceId)> = self
            .sources
            .iter()
            .filter(|source| source.tail_end() <= block_end)
            .map(|source| (source.tail_end(), source.id))
            .collect();
        ended.sort_unstable();
        self.sources.retain(|source| source.tail_end() > block_end);

        ended.into_iter().map(|(_, id)| id).collect()
    }

    /// Render from a shared timeline and notify completions outside the lock.
    pub fn pull(shared: &Mutex<Timeline>, out: &mut [f32]) {
        let (ended, handler) = {
            let mut timeline = shared.lock();
            let ended = timeline.render(out);
            (ended, timeline.completion.clone())
        };

        if let Some(handler) = handler {
            for id in ended {
                handler(id);
            }
        }
    }
}

/// [`OutputDevice`] view of a shared [`Timeline`].
///
/// Whoever renders the timeline (a cpal callback, the WAV recorder thread)
/// drives the clock; this handle only commits and cancels units.
pub struct TimelineOutput {
    timeline: Arc<Mutex<Timeline>>,
    /// Unit rate to timeline rate, rebuilt when the unit rate changes
    resampler: Option<StreamResampler>,
}

impl TimelineOutput {
    pub fn new(timeline: Arc<Mutex<Timeline>>) -> Self {
        Self {
            timeline,
            resampler: None,
        }
    }

    fn resampler(&mut self, from_rate: u32, to_rate: u32) -> PipelineResult<&mut StreamResampler> {
        let stale = self
            .resampler
            .as_ref()
            .map_or(true, |resampler| resampler.from_rate() != from_rate || resampler.to_rate() != to_rate);
        if stale {
            self.resampler = None;
        }
        match &mut self.resampler {
            Some(resampler) => Ok(resampler),
            slot => Ok(slot.insert(StreamResampler::new(from_rate, to_rate)?)),
        }
    }

    pub fn timeline(&self) -> Arc<Mutex<Timeline>> {
        Arc::clone(&self.timeline)
    }
}

impl OutputDevice for TimelineOutput {
    fn sample_rate(&self) -> u32 {
        self.timeline.lock().sample_rate()
    }

    fn current_time(&self) -> f64 {
        self.timeline.lock().current_time()
    }

    fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32, start_at: f64) -> PipelineResult<SourceId> {
        if samples.is_empty() {
            return Err(PipelineError::Playback("empty playback unit".to_string()));
        }
        if sample_rate == 0 {
            return Err(PipelineError::Playback("unit has a zero sample rate".to_string()));
        }

        let (rate, start, end) = {
            let timeline = self.timeline.lock();
            let end_at = start_at + samples.len() as f64 / sample_rate as f64;
            (timeline.sample_rate(), timeline.sample_at(start_at), timeline.sample_at(end_at))
        };
        let frames = (end - start) as usize;
        let clip = self.resampler(sample_rate, rate)?.convert_clip(&samples, frames)?;

        Ok(self.timeline.lock().insert_clip(clip, start))
    }

    fn stop(&mut self, id: SourceId) -> PipelineResult<()> {
        if self.timeline.lock().remove(id) {
            Ok(())
        } else {
            Err(PipelineError::Playback(format!("unit {} already ended", id)))
        }
    }

    fn set_completion_handler(&mut self, handler: CompletionHandler) {
        self.timeline.lock().completion = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_render_places_source_at_start_sample() {
        let mut timeline = Timeline::new(10);
        timeline.insert(vec![0.5, 0.5], 0.3);

        let mut out = [0.0f32; 5];
        let ended = timeline.render(&mut out);

        assert_eq!(out, [0.0, 0.0, 0.0, 0.5, 0.5]);
        assert_eq!(ended.len(), 1);
        assert!((timeline.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_back_to_back_sources_leave_no_gap() {
        let mut timeline = Timeline::new(10);
        timeline.insert(vec![0.1; 3], 0.0);
        timeline.insert(vec![0.2; 3], 0.3);

        let mut out = [0.0f32; 6];
        timeline.render(&mut out);
        assert_eq!(out, [0.1, 0.1, 0.1, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn test_source_spanning_blocks_ends_once() {
        let mut timeline = Timeline::new(10);
        let id = timeline.insert(vec![0.1; 6], 0.0);

        let mut out = [0.0f32; 4];
        assert!(timeline.render(&mut out).is_empty());
        assert_eq!(timeline.render(&mut out), vec![id]);
        assert_eq!(out, [0.1, 0.1, 0.0, 0.0]);
        assert_eq!(timeline.active_count(), 0);
    }

    #[test]
    fn test_removed_source_is_silent() {
        let mut timeline = Timeline::new(10);
        let id = timeline.insert(vec![0.9; 4], 0.0);
        assert!(timeline.remove(id));
        assert!(!timeline.remove(id));

        let mut out = [1.0f32; 4];
        assert!(timeline.render(&mut out).is_empty());
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn test_pull_notifies_completion() {
        let shared = Arc::new(Mutex::new(Timeline::new(10)));
        let mut output = TimelineOutput::new(Arc::clone(&shared));
        let last_ended = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&last_ended);
        output.set_completion_handler(Arc::new(move |id| seen.store(id, Ordering::SeqCst)));

        let id = output.schedule(vec![0.1; 2], 10, 0.0).unwrap();
        let mut out = [0.0f32; 4];
        Timeline::pull(&shared, &mut out);

        assert_eq!(last_ended.load(Ordering::SeqCst), id);
        assert!(output.stop(id).is_err());
    }

    #[test]
    fn test_schedule_resamples_to_device_rate() {
        let shared = Arc::new(Mutex::new(Timeline::new(48000)));
        let mut output = TimelineOutput::new(Arc::clone(&shared));
        let id = output.schedule(vec![0.0; 2400], 24000, 0.0).unwrap();
        assert_eq!(shared.lock().span(id), Some((0, 4800)));

        // The unit's trailing ringing still has to play out
        let mut out = vec![0.0f32; 4800];
        Timeline::pull(&shared, &mut out);
        assert_eq!(shared.lock().active_count(), 1);
        Timeline::pull(&shared, &mut out);
        assert_eq!(shared.lock().active_count(), 0);
    }

    #[test]
    fn test_contiguous_units_share_boundaries_at_44100() {
        let shared = Arc::new(Mutex::new(Timeline::new(44100)));
        let mut output = TimelineOutput::new(Arc::clone(&shared));

        let mut start_at = 0.05;
        let mut ids = Vec::new();
        for len in [1000, 1003, 777, 1601, 4800, 2399, 1, 3333] {
            ids.push(output.schedule(vec![0.25; len], 24000, start_at).unwrap());
            start_at += len as f64 / 24000.0;
        }

        let timeline = shared.lock();
        let spans: Vec<(u64, u64)> = ids.iter().map(|&id| timeline.span(id).unwrap()).collect();
        assert_eq!(spans[0].0, 2205);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(spans[spans.len() - 1].1, timeline.sample_at(start_at));
    }

    #[test]
    fn test_contiguous_units_render_as_one_signal() {
        let shared = Arc::new(Mutex::new(Timeline::new(44100)));
        let mut output = TimelineOutput::new(Arc::clone(&shared));

        let level = |t: f32| (2.0 * std::f32::consts::PI * 110.0 * t).cos() * 0.5;
        let tone: Vec<f32> = (0..7200).map(|i| level(i as f32 / 24000.0)).collect();

        let mut start_at = 0.0;
        let mut offset = 0;
        let mut seams = Vec::new();
        for len in [1003, 777, 1601, 2000, 1819] {
            output.schedule(tone[offset..offset + len].to_vec(), 24000, start_at).unwrap();
            offset += len;
            start_at += len as f64 / 24000.0;
            seams.push(shared.lock().sample_at(start_at) as usize);
        }
        seams.pop();

        let mut out = vec![0.0f32; 13230];
        Timeline::pull(&shared, &mut out);

        // No dropped sample, no doubled sample around any seam
        for seam in seams {
            for t in seam - 3..seam + 3 {
                let expected = level(t as f32 / 44100.0);
                assert!((out[t] - expected).abs() < 0.05, "seam {} sample {}: {}", seam, t, out[t]);
            }
        }
    }
}

//! File-backed audio devices.
//!
//! `WavFileInput` behaves like a microphone that says the contents of a WAV
//! file and then stays silent; `WavRecorder` behaves like a speaker whose
//! output lands in a WAV file. Both keep real-time pace so the session sees
//! the same timing it would with hardware.

use super::timeline::{Timeline, TimelineOutput};
use super::{AudioInput, CompletionHandler, FrameSink, OutputDevice, SourceId};
use crate::audio::codec::{float_to_int16, int16_to_float};
use crate::audio::resample::downmix_to_mono;
use crate::error::{PipelineError, PipelineResult};
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// RIFF format tag for integer PCM
const WAV_FORMAT_PCM: u16 = 1;

/// How often the recorder renders the timeline
const RECORDER_TICK: Duration = Duration::from_millis(20);

/// Decode a WAV file into mono float samples.
///
/// ## Returns:
/// `(samples, sample_rate)`; multi-channel files are averaged down to mono.
pub fn read_wav_mono(path: &Path) -> PipelineResult<(Vec<f32>, u32)> {
    let mut file = File::open(path).map_err(|e| {
        PipelineError::MediaAccess(format!("cannot open {}: {}", path.display(), e))
    })?;
    let (header, data) = wav::read(&mut file)
        .map_err(|e| PipelineError::MediaAccess(format!("cannot read {}: {}", path.display(), e)))?;

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(samples) => int16_to_float(&samples),
        wav::BitDepth::TwentyFour(samples) => samples.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => {
            return Err(PipelineError::MediaAccess(format!(
                "{} contains no audio",
                path.display()
            )))
        }
    };

    let mono = downmix_to_mono(&interleaved, header.channel_count.max(1) as usize);
    Ok((mono, header.sampling_rate))
}

/// Write mono 16-bit PCM samples as a WAV file.
pub fn write_wav_mono(file: &mut File, samples: Vec<i16>, sample_rate: u32) -> PipelineResult<()> {
    let header = wav::Header::new(WAV_FORMAT_PCM, 1, sample_rate, 16);
    wav::write(header, &wav::BitDepth::Sixteen(samples), file)?;
    Ok(())
}

/// A WAV file played into the pipeline as if it were a live microphone.
pub struct WavFileInput {
    path: PathBuf,
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WavFileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            samples: Arc::new(Vec::new()),
            sample_rate: 0,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl AudioInput for WavFileInput {
    fn open(&mut self) -> PipelineResult<u32> {
        let (samples, sample_rate) = read_wav_mono(&self.path)?;
        if sample_rate == 0 {
            return Err(PipelineError::MediaAccess(format!(
                "{} declares a zero sample rate",
                self.path.display()
            )));
        }
        info!(
            path = %self.path.display(),
            sample_rate = sample_rate,
            seconds = samples.len() as f64 / sample_rate as f64,
            "Opened WAV input"
        );
        self.samples = Arc::new(samples);
        self.sample_rate = sample_rate;
        Ok(sample_rate)
    }

    /// Deliver the file block by block at real-time pace, then silence.
    fn start(&mut self, block_size: usize, mut sink: FrameSink) -> PipelineResult<()> {
        if self.sample_rate == 0 {
            return Err(PipelineError::MediaAccess("WAV input was not opened".to_string()));
        }
        if self.worker.is_some() {
            return Ok(());
        }

        let samples = Arc::clone(&self.samples);
        let running = Arc::clone(&self.running);
        let block_size = block_size.max(1);
        let block_period = Duration::from_secs_f64(block_size as f64 / self.sample_rate as f64);
        running.store(true, Ordering::SeqCst);

        let worker = thread::Builder::new()
            .name("wav-input".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut offset = 0usize;
                let mut blocks = 0u32;

                while running.load(Ordering::SeqCst) {
                    let block = if offset < samples.len() {
                        let end = (offset + block_size).min(samples.len());
                        let mut block = samples[offset..end].to_vec();
                        block.resize(block_size, 0.0);
                        block
                    } else {
                        vec![0.0; block_size]
                    };
                    offset += block_size;
                    sink(block);

                    blocks += 1;
                    // Pace against the start instant so sleep jitter does not accumulate
                    let due = started + block_period * blocks;
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                }
                debug!(blocks = blocks, "WAV input stopped");
            })
            .map_err(|e| PipelineError::MediaAccess(format!("cannot start WAV input: {}", e)))?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for WavFileInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A speaker whose output is recorded into a WAV file.
///
/// A worker thread renders the timeline in real time; the file is written when
/// the device is closed.
pub struct WavRecorder {
    path: PathBuf,
    file: Option<File>,
    output: TimelineOutput,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Vec<i16>>>,
}

impl WavRecorder {
    /// Create the file and start the real-time clock.
    pub fn start(path: impl Into<PathBuf>, sample_rate: u32) -> PipelineResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| {
            PipelineError::MediaAccess(format!("cannot create {}: {}", path.display(), e))
        })?;

        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
        let output = TimelineOutput::new(Arc::clone(&timeline));
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);

        let worker = thread::Builder::new()
            .name("wav-recorder".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut rendered: u64 = 0;
                let mut recorded = Vec::new();
                let mut block = Vec::new();

                while worker_running.load(Ordering::SeqCst) {
                    thread::sleep(RECORDER_TICK);
                    let due = (started.elapsed().as_secs_f64() * sample_rate as f64) as u64;
                    if due <= rendered {
                        continue;
                    }
                    block.resize((due - rendered) as usize, 0.0);
                    Timeline::pull(&timeline, &mut block);
                    recorded.extend(float_to_int16(&block));
                    rendered = due;
                }
                recorded
            })
            .map_err(|e| PipelineError::MediaAccess(format!("cannot start WAV recorder: {}", e)))?;

        info!(path = %path.display(), sample_rate = sample_rate, "Recording playback to WAV");

        Ok(Self {
            path,
            file: Some(file),
            output,
            sample_rate,
            running,
            worker: Some(worker),
        })
    }
}

impl OutputDevice for WavRecorder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32, start_at: f64) -> PipelineResult<SourceId> {
        self.output.schedule(samples, sample_rate, start_at)
    }

    fn stop(&mut self, id: SourceId) -> PipelineResult<()> {
        self.output.stop(id)
    }

    fn set_completion_handler(&mut self, handler: CompletionHandler) {
        self.output.set_completion_handler(handler);
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            return;
        };
        let recorded = match worker.join() {
            Ok(recorded) => recorded,
            Err(_) => {
                error!("WAV recorder thread panicked, nothing written");
                return;
            }
        };

        if let Some(mut file) = self.file.take() {
            let seconds = recorded.len() as f64 / self.sample_rate as f64;
            match write_wav_mono(&mut file, recorded, self.sample_rate) {
                Ok(()) => info!(path = %self.path.display(), seconds = seconds, "Wrote playback recording"),
                Err(err) => error!(path = %self.path.display(), "Failed to write playback recording: {}", err),
            }
        }
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

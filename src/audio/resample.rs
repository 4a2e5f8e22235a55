//! Sample-rate conversion and channel downmixing.
//!
//! Capture devices do not always honor the requested rate, and output devices
//! rarely run at the backend's 24 kHz, so both edges of the pipeline convert
//! here before samples reach the codec or the mixer.

use crate::error::{PipelineError, PipelineResult};
use rubato::{FftFixedIn, Resampler};

/// Input chunk for one resampler step: 10 ms at the source rate.
fn chunk_frames(rate: u32) -> usize {
    (rate as usize / 100).max(1)
}

struct Engine {
    resampler: FftFixedIn<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    pending: Vec<f32>,
}

impl Engine {
    /// Run the chunk sitting in `input` and append what comes out.
    fn step(&mut self, converted: &mut Vec<f32>) -> PipelineResult<()> {
        let (_, produced) = self
            .resampler
            .process_into_buffer(&self.input, &mut self.output, None)?;
        converted.extend_from_slice(&self.output[0][..produced]);
        Ok(())
    }

    fn reset(&mut self) {
        self.resampler.reset();
        self.pending.clear();
    }
}

/// Output of [`StreamResampler::convert_clip`].
pub struct Clip {
    /// Leading ringing, the clip itself, then trailing ringing
    pub samples: Vec<f32>,
    /// Samples ahead of the clip's first sample
    pub lead: usize,
    /// Samples that belong to the clip proper
    pub frames: usize,
}

/// Mono resampler that keeps its filter state for the life of a stream.
///
/// Input that does not fill a whole chunk waits for the next block, so a
/// stream fed in arbitrary block sizes loses no samples and no phase at the
/// block boundaries. Equal rates pass samples through untouched.
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    engine: Option<Engine>,
}

impl StreamResampler {
    /// ## Errors:
    /// `MediaAccess` if either rate is zero or the pair is unsupported.
    pub fn new(from_rate: u32, to_rate: u32) -> PipelineResult<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(PipelineError::MediaAccess(format!(
                "cannot resample {} Hz to {} Hz",
                from_rate, to_rate
            )));
        }

        let engine = if from_rate == to_rate {
            None
        } else {
            let resampler =
                FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, chunk_frames(from_rate), 1, 1)?;
            let input = resampler.input_buffer_allocate(true);
            let output = resampler.output_buffer_allocate(true);
            Some(Engine {
                resampler,
                input,
                output,
                pending: Vec::new(),
            })
        };

        Ok(Self {
            from_rate,
            to_rate,
            engine,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Convert the next block of a continuous stream.
    ///
    /// Only whole chunks are converted; a short block can return nothing and
    /// its samples come out with a later block.
    pub fn process(&mut self, block: &[f32]) -> PipelineResult<Vec<f32>> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(block.to_vec());
        };

        engine.pending.extend_from_slice(block);
        let mut converted = Vec::new();
        let mut offset = 0;
        loop {
            let needed = engine.resampler.input_frames_next();
            if engine.pending.len() - offset < needed {
                break;
            }
            engine.input[0][..needed].copy_from_slice(&engine.pending[offset..offset + needed]);
            offset += needed;
            engine.step(&mut converted)?;
        }
        engine.pending.drain(..offset);

        Ok(converted)
    }

    /// Convert one unit of a stream that arrives in separate pieces.
    ///
    /// The clip keeps the filter ringing on both sides of its `frames`
    /// samples. Mixing consecutive clips with their ringing overlapped adds
    /// up to the stream converted in one piece, so pieces join without a
    /// click. Filter state is cleared before and after.
    pub fn convert_clip(&mut self, samples: &[f32], frames: usize) -> PipelineResult<Clip> {
        let Some(engine) = self.engine.as_mut() else {
            let mut converted = samples.to_vec();
            converted.resize(frames, 0.0);
            return Ok(Clip {
                samples: converted,
                lead: 0,
                frames,
            });
        };

        engine.reset();
        let delay = engine.resampler.output_delay();
        let margin = engine.resampler.output_frames_next();
        // One chunk of silence ahead of the clip holds the leading ringing
        let silence = engine.resampler.input_frames_next();
        let wanted = delay + margin + frames + margin;

        let mut converted = Vec::with_capacity(wanted);
        let mut fed = 0;
        while converted.len() < wanted {
            let needed = engine.resampler.input_frames_next();
            for (i, slot) in engine.input[0][..needed].iter_mut().enumerate() {
                *slot = (fed + i)
                    .checked_sub(silence)
                    .and_then(|pos| samples.get(pos).copied())
                    .unwrap_or(0.0);
            }
            fed += needed;
            engine.step(&mut converted)?;
        }
        engine.reset();

        converted.drain(..delay);
        converted.truncate(margin + frames + margin);
        Ok(Clip {
            samples: converted,
            lead: margin,
            frames,
        })
    }

    /// Forget buffered input and filter history, e.g. when a stream restarts.
    pub fn reset(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.reset();
        }
    }
}

/// Average interleaved frames down to mono.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

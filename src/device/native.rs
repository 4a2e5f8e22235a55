//! Native microphone and speaker through cpal.

use super::timeline::{Timeline, TimelineOutput};
use super::{AudioInput, CompletionHandler, FrameSink, OutputDevice, SourceId};
use crate::audio::resample::downmix_to_mono;
use crate::error::{PipelineError, PipelineResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

/// Collects interleaved callback data into fixed-size mono blocks.
struct BlockAssembler {
    channels: usize,
    block_size: usize,
    pending: Vec<f32>,
    sink: FrameSink,
}

impl BlockAssembler {
    fn push(&mut self, interleaved: &[f32]) {
        self.pending.extend(downmix_to_mono(interleaved, self.channels));
        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            let block = std::mem::replace(&mut self.pending, rest);
            (self.sink)(block);
        }
    }
}

/// Default system microphone.
pub struct MicrophoneInput {
    device: Option<cpal::Device>,
    config: Option<cpal::SupportedStreamConfig>,
    stream: Option<cpal::Stream>,
}

impl MicrophoneInput {
    pub fn new() -> Self {
        Self {
            device: None,
            config: None,
            stream: None,
        }
    }
}

impl Default for MicrophoneInput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioInput for MicrophoneInput {
    fn open(&mut self) -> PipelineResult<u32> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| PipelineError::MediaAccess("no input device available".to_string()))?;
        let config = device
            .default_input_config()
            .map_err(|e| PipelineError::MediaAccess(format!("input device unusable: {}", e)))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!(device = %name, config = ?config, "Opened microphone");

        let sample_rate = config.sample_rate().0;
        self.device = Some(device);
        self.config = Some(config);
        Ok(sample_rate)
    }

    fn start(&mut self, block_size: usize, sink: FrameSink) -> PipelineResult<()> {
        let (Some(device), Some(config)) = (&self.device, &self.config) else {
            return Err(PipelineError::MediaAccess("microphone was not opened".to_string()));
        };

        let mut assembler = BlockAssembler {
            channels: config.channels() as usize,
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size * 2),
            sink,
        };
        let stream_config: cpal::StreamConfig = config.clone().into();
        let on_error = |err: cpal::StreamError| error!("Microphone stream error: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| assembler.push(data),
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    assembler.push(&floats);
                },
                on_error,
                None,
            ),
            format => {
                return Err(PipelineError::MediaAccess(format!(
                    "unsupported input sample format: {:?}",
                    format
                )))
            }
        }
        .map_err(|e| PipelineError::MediaAccess(format!("cannot open input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| PipelineError::MediaAccess(format!("cannot start input stream: {}", e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            info!("Microphone stopped");
        }
    }
}

/// Default system speaker, clocked by its own callback.
pub struct SpeakerOutput {
    output: TimelineOutput,
    sample_rate: u32,
    stream: Option<cpal::Stream>,
}

impl SpeakerOutput {
    pub fn open() -> PipelineResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PipelineError::MediaAccess("no output device available".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| PipelineError::MediaAccess(format!("output device unusable: {}", e)))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!(device = %name, config = ?config, "Opened speaker");

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
        let output = TimelineOutput::new(Arc::clone(&timeline));
        let stream_config: cpal::StreamConfig = config.clone().into();
        let on_error = |err: cpal::StreamError| error!("Speaker stream error: {}", err);
        let mut mono = Vec::new();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mono.resize(data.len() / channels, 0.0);
                    Timeline::pull(&timeline, &mut mono);
                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.iter_mut().for_each(|out| *out = sample);
                    }
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    mono.resize(data.len() / channels, 0.0);
                    Timeline::pull(&timeline, &mut mono);
                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        let value = (sample * 32767.0) as i16;
                        frame.iter_mut().for_each(|out| *out = value);
                    }
                },
                on_error,
                None,
            ),
            format => {
                return Err(PipelineError::MediaAccess(format!(
                    "unsupported output sample format: {:?}",
                    format
                )))
            }
        }
        .map_err(|e| PipelineError::MediaAccess(format!("cannot open output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| PipelineError::MediaAccess(format!("cannot start output stream: {}", e)))?;

        Ok(Self {
            output,
            sample_rate,
            stream: Some(stream),
        })
    }
}

impl OutputDevice for SpeakerOutput {
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
        if self.stream.take().is_some() {
            info!("Speaker closed");
        }
    }
}

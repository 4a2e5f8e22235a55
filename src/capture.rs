//! # Capture Pipeline
//!
//! Turns microphone blocks and camera frames into outbound envelopes.
//!
//! ## Audio Path:
//! 1. Drop the block if capture is stopped, the mic is muted or the channel is not open
//! 2. Resample to the outbound rate when the device runs at a different rate;
//!    one resampler lives for the whole session so blocks join up seamlessly
//! 3. Quantize to 16-bit PCM and base64 it into an `audio/pcm` envelope
//!
//! ## Video Path:
//! 1. Skip the tick if capture is stopped, the camera is off, there is no frame
//!    or the channel is not open
//! 2. Scale down to the width limit, keeping the aspect ratio (never up)
//! 3. Encode as JPEG into an `image/jpeg` envelope
//!
//! Dropped blocks and skipped ticks are gone for good: nothing is buffered
//! against a live microphone or camera.

use crate::audio::resample::StreamResampler;
use crate::config::CaptureConfig;
use crate::error::PipelineResult;
use crate::websocket::OutboundEnvelope;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use tracing::debug;

/// Capture flags plus the encoding settings for both paths.
pub struct CapturePipeline {
    config: CaptureConfig,
    /// Microphone rate to outbound rate
    resampler: StreamResampler,
    capturing: bool,
    mic_enabled: bool,
    camera_enabled: bool,
}

impl CapturePipeline {
    /// ## Errors:
    /// `MediaAccess` if the microphone rate cannot be converted.
    pub fn new(config: CaptureConfig, input_rate: u32) -> PipelineResult<Self> {
        let resampler = StreamResampler::new(input_rate, config.sample_rate)?;
        if input_rate != config.sample_rate {
            debug!(
                input_rate = input_rate,
                target_rate = config.sample_rate,
                "Microphone rate differs, blocks will be resampled"
            );
        }
        Ok(Self {
            mic_enabled: config.mic_enabled,
            camera_enabled: config.camera_enabled,
            config,
            resampler,
            capturing: false,
        })
    }

    pub fn start(&mut self) {
        self.capturing = true;
    }

    pub fn stop(&mut self) {
        self.capturing = false;
        self.resampler.reset();
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn set_mic_enabled(&mut self, enabled: bool) {
        self.mic_enabled = enabled;
    }

    pub fn set_camera_enabled(&mut self, enabled: bool) {
        self.camera_enabled = enabled;
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    /// Whether a block should reach the visualizer. Muting the mic does not
    /// hide the input level.
    pub fn should_visualize(&self) -> bool {
        self.capturing
    }

    /// Build the envelope for one microphone block, or `None` to drop it.
    ///
    /// A dropped block breaks the stream, so the resampler starts over with
    /// the next block that goes out. A block too short to fill a resampler
    /// chunk also yields `None`; its samples go out with the next one.
    pub fn audio_envelope(&mut self, block: &[f32], channel_open: bool) -> PipelineResult<Option<OutboundEnvelope>> {
        if !self.capturing || !self.mic_enabled || !channel_open || block.is_empty() {
            self.resampler.reset();
            return Ok(None);
        }

        let resampled = self.resampler.process(block)?;
        if resampled.is_empty() {
            return Ok(None);
        }
        Ok(Some(OutboundEnvelope::audio(&resampled)))
    }

    /// Build the envelope for one video tick, or `None` to skip it.
    ///
    /// ## Errors:
    /// `MediaAccess` if the frame cannot be encoded.
    pub fn video_envelope(
        &self,
        frame: Option<DynamicImage>,
        channel_open: bool,
    ) -> PipelineResult<Option<OutboundEnvelope>> {
        if !self.capturing || !self.camera_enabled || !channel_open {
            return Ok(None);
        }
        let Some(frame) = frame else {
            return Ok(None);
        };

        let scaled = downscale(&frame.to_rgb8(), self.config.max_video_width);
        let jpeg = encode_jpeg(&scaled, self.config.jpeg_quality)?;
        debug!(
            width = scaled.width(),
            height = scaled.height(),
            bytes = jpeg.len(),
            "Encoded video snapshot"
        );
        Ok(Some(OutboundEnvelope::image(&jpeg)))
    }
}

/// Scale a frame so its width is at most `max_width`.
///
/// Aspect ratio is preserved and frames already narrow enough are returned
/// as they are.
pub fn downscale(frame: &RgbImage, max_width: u32) -> RgbImage {
    let (width, height) = frame.dimensions();
    if width <= max_width || max_width == 0 {
        return frame.clone();
    }

    let scaled_height = ((height as u64 * max_width as u64) as f64 / width as f64).round().max(1.0) as u32;
    imageops::resize(frame, max_width, scaled_height, FilterType::Triangle)
}

/// Encode an RGB frame as baseline JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> PipelineResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder.encode_image(frame)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::decode_pcm_chunk;
    use crate::config::AppConfig;
    use crate::websocket::MimeType;

    fn pipeline(input_rate: u32) -> CapturePipeline {
        let mut pipeline = CapturePipeline::new(AppConfig::default().capture, input_rate).unwrap();
        pipeline.start();
        pipeline
    }

    #[test]
    fn test_block_becomes_pcm_envelope() {
        let mut pipeline = pipeline(16000);
        let envelope = pipeline.audio_envelope(&[0.0, 0.5, -0.5], true).unwrap().unwrap();

        assert_eq!(envelope.mime_type, MimeType::AudioPcm);
        let decoded = decode_pcm_chunk(&envelope.data).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2], -0.5);
    }

    #[test]
    fn test_blocks_dropped_when_not_sendable() {
        let mut pipeline = pipeline(16000);
        assert!(pipeline.audio_envelope(&[0.1; 8], false).unwrap().is_none());

        pipeline.set_mic_enabled(false);
        assert!(pipeline.audio_envelope(&[0.1; 8], true).unwrap().is_none());
        assert!(pipeline.should_visualize());

        pipeline.set_mic_enabled(true);
        pipeline.stop();
        assert!(pipeline.audio_envelope(&[0.1; 8], true).unwrap().is_none());
        assert!(!pipeline.should_visualize());
    }

    #[test]
    fn test_device_rate_is_resampled_to_outbound_rate() {
        let mut pipeline = pipeline(48000);
        let envelope = pipeline.audio_envelope(&vec![0.25; 4800], true).unwrap().unwrap();
        let decoded = decode_pcm_chunk(&envelope.data).unwrap();
        assert_eq!(decoded.len(), 1600);
    }

    #[test]
    fn test_resampler_carries_over_between_blocks() {
        let mut pipeline = pipeline(44100);
        let mut sent = 0;
        for _ in 0..20 {
            if let Some(envelope) = pipeline.audio_envelope(&vec![0.1; 4096], true).unwrap() {
                sent += decode_pcm_chunk(&envelope.data).unwrap().len();
            }
        }
        // 81920 input samples hold 185 whole 441-sample chunks of 160 each
        assert_eq!(sent, 185 * 160);
    }

    #[test]
    fn test_short_block_waits_for_the_next() {
        let mut pipeline = pipeline(48000);
        assert!(pipeline.audio_envelope(&[0.1; 300], true).unwrap().is_none());
        let envelope = pipeline.audio_envelope(&[0.1; 180], true).unwrap().unwrap();
        assert_eq!(decode_pcm_chunk(&envelope.data).unwrap().len(), 160);

        // A dropped block discards what was waiting
        assert!(pipeline.audio_envelope(&[0.1; 300], true).unwrap().is_none());
        assert!(pipeline.audio_envelope(&[0.1; 8], false).unwrap().is_none());
        assert!(pipeline.audio_envelope(&[0.1; 180], true).unwrap().is_none());
    }

    #[test]
    fn test_downscale_preserves_aspect_and_never_upscales() {
        let wide = RgbImage::new(2048, 1536);
        let scaled = downscale(&wide, 1024);
        assert_eq!(scaled.dimensions(), (1024, 768));

        let small = RgbImage::new(640, 480);
        assert_eq!(downscale(&small, 1024).dimensions(), (640, 480));
    }

    #[test]
    fn test_video_tick_produces_jpeg() {
        let pipeline = pipeline(16000);
        let frame = DynamicImage::new_rgb8(1600, 900);
        let envelope = pipeline.video_envelope(Some(frame), true).unwrap().unwrap();

        assert_eq!(envelope.mime_type, MimeType::ImageJpeg);
        let bytes = crate::audio::codec::decode_binary(&envelope.data).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 1024);
        assert_eq!(decoded.height(), 576);
    }

    #[test]
    fn test_video_tick_skipped_without_frame_or_camera() {
        let mut pipeline = pipeline(16000);
        assert!(pipeline.video_envelope(None, true).unwrap().is_none());

        let frame = DynamicImage::new_rgb8(8, 8);
        assert!(pipeline.video_envelope(Some(frame.clone()), false).unwrap().is_none());

        pipeline.set_camera_enabled(false);
        assert!(pipeline.video_envelope(Some(frame), true).unwrap().is_none());
    }
}

//! # Session Actor
//!
//! One connection to the backend, from connect to teardown. All state that
//! the pipeline mutates (capture flags, the playback queue, the channel) lives
//! in a single [`Session`] actor, and every callback from the outside world
//! arrives as a typed message on its mailbox.
//!
//! ## Events:
//! | Message | Source |
//! |---|---|
//! | [`FrameCaptured`] | microphone thread, one per block |
//! | [`VideoTick`] | the actor's own 1 Hz interval |
//! | [`EnvelopeReceived`] | inbound socket stream |
//! | [`ChannelStateChanged`] | inbound socket stream ending |
//! | [`SourceEnded`] | output device, when a unit finishes on its own |
//! | [`DrainPlayback`] | the actor itself, after the first chunk of a burst |
//! | [`SetMicEnabled`], [`SetCameraEnabled`], [`Disconnect`] | the UI |
//!
//! ## Key Rust Concepts:
//! - **Actor model**: messages are handled one at a time on one thread, so no
//!   handler ever sees the playback queue half updated
//! - **Addr<A>**: a `Send` handle that device threads use to post events back
//! - **ctx.notify**: posts a message to ourselves so the scheduling step runs
//!   as its own task instead of inside the handler that queued the chunk
//!
//! ## Lifecycle:
//! 1. [`Session::start`] opens media, connects and starts the actor
//! 2. `started` reports `Open`, starts capture and arms the video timer
//! 3. Closing the channel, [`Disconnect`] or [`Session::stop`] stops the actor
//! 4. `stopped` stops capture, interrupts playback, closes the channel and
//!    the output device, reports `Closed` and logs the session counters

use crate::audio::codec::decode_pcm_chunk;
use crate::audio::scheduler::{PlaybackScheduler, SchedulerConfig};
use crate::audio::visualizer::Visualizer;
use crate::capture::CapturePipeline;
use crate::config::AppConfig;
use crate::device::{AudioInput, MediaDevices, SourceId, VideoSource};
use crate::error::{PipelineError, PipelineResult};
use crate::observer::{LogEntry, UiObserver};
use crate::state::SessionStats;
use crate::websocket::{ChannelState, InboundEnvelope, InboundFrame, TransportChannel};

use actix::prelude::*;
use futures_util::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Size of the waveform handed to observers
const WAVEFORM_WIDTH: f32 = 512.0;
const WAVEFORM_HEIGHT: f32 = 128.0;

/// One microphone block at the input device's rate.
#[derive(Message)]
#[rtype(result = "()")]
pub struct FrameCaptured {
    pub samples: Vec<f32>,
}

/// Time to take a camera snapshot.
#[derive(Message)]
#[rtype(result = "()")]
pub struct VideoTick;

/// One inbound text frame.
#[derive(Message)]
#[rtype(result = "()")]
pub struct EnvelopeReceived(pub String);

#[derive(Message)]
#[rtype(result = "()")]
pub struct ChannelStateChanged(pub ChannelState);

/// A playback unit finished on its own.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SourceEnded(pub SourceId);

/// Run the playback scheduling step.
#[derive(Message)]
#[rtype(result = "()")]
pub struct DrainPlayback;

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetMicEnabled(pub bool);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetCameraEnabled(pub bool);

/// End the session.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect;

/// Ask for a point-in-time view of the session.
#[derive(Message)]
#[rtype(result = "SessionSnapshot")]
pub struct GetSnapshot;

/// What the session looks like right now.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub channel_state: ChannelState,
    pub capturing: bool,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub playing: bool,
    pub queued_chunks: usize,
    pub active_units: usize,
    pub next_start_time: f64,
    pub stats: SessionStats,
}

/// The real-time media session.
pub struct Session {
    config: AppConfig,
    stats: SessionStats,
    capture: CapturePipeline,
    audio_input: Option<Box<dyn AudioInput>>,
    video_source: Option<Box<dyn VideoSource>>,
    transport: TransportChannel,
    scheduler: PlaybackScheduler,
    visualizer: Visualizer,
    observer: Arc<dyn UiObserver>,
    torn_down: bool,
}

impl Session {
    /// Open the media devices, connect to the backend and start the session.
    ///
    /// ## Errors:
    /// - `MediaAccess`: a device could not be opened; nothing was connected
    /// - `Connection`: the backend could not be reached
    ///
    /// Either way the observer has already been told, and the devices are
    /// released when the error is returned.
    pub async fn start(
        config: AppConfig,
        mut media: MediaDevices,
        observer: Arc<dyn UiObserver>,
    ) -> PipelineResult<Addr<Session>> {
        observer.on_status_change(ChannelState::Connecting);

        let opened = match Self::open_media(&config, &mut media) {
            Ok(capture) => TransportChannel::connect(&config.backend.url)
                .await
                .map(|(transport, inbound)| (capture, transport, inbound)),
            Err(err) => Err(err),
        };

        match opened {
            Ok((capture, transport, inbound)) => {
                Ok(Self::launch(config, media, capture, transport, inbound, observer))
            }
            Err(err) => {
                error!(kind = err.kind(), recoverable = err.is_recoverable(), "Session failed to start: {}", err);
                observer.on_log(&LogEntry::error(err.to_string()));
                observer.on_status_change(ChannelState::Closed);
                media.output.close();
                Err(err)
            }
        }
    }

    /// Ask a running session to stop. Safe to call more than once.
    pub fn stop(addr: &Addr<Session>) {
        addr.do_send(Disconnect);
    }

    /// Open the devices and set up capture for the rate the microphone
    /// delivers (the outbound rate when there is no microphone).
    fn open_media(config: &AppConfig, media: &mut MediaDevices) -> PipelineResult<CapturePipeline> {
        let input_rate = match media.audio_input.as_mut() {
            Some(input) => input.open()?,
            None => config.capture.sample_rate,
        };
        if input_rate == 0 {
            return Err(PipelineError::MediaAccess("microphone reports a zero sample rate".to_string()));
        }
        if let Some(video) = media.video_source.as_mut() {
            video.open()?;
        }
        CapturePipeline::new(config.capture.clone(), input_rate)
    }

    /// Start the actor on already opened devices and an already open channel.
    pub fn launch<S>(
        config: AppConfig,
        media: MediaDevices,
        capture: CapturePipeline,
        transport: TransportChannel,
        inbound: S,
        observer: Arc<dyn UiObserver>,
    ) -> Addr<Session>
    where
        S: Stream<Item = Result<WsMessage, tungstenite::Error>> + 'static,
    {
        let MediaDevices {
            audio_input,
            video_source,
            output,
        } = media;

        let scheduler = PlaybackScheduler::new(
            SchedulerConfig {
                sample_rate: config.playback.sample_rate,
                batch_duration_ms: config.playback.batch_duration_ms,
                lead_in_ms: config.playback.lead_in_ms,
            },
            output,
        );
        let visualizer = Visualizer::new(config.playback.visualizer_gain);

        Session::create(move |ctx| {
            ctx.add_stream(inbound);
            Session {
                config,
                stats: SessionStats::new(),
                capture,
                audio_input,
                video_source,
                transport,
                scheduler,
                visualizer,
                observer,
                torn_down: false,
            }
        })
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.stats.session_id,
            channel_state: self.transport.state(),
            capturing: self.capture.is_capturing(),
            mic_enabled: self.capture.mic_enabled(),
            camera_enabled: self.capture.camera_enabled(),
            playing: self.scheduler.is_playing(),
            queued_chunks: self.scheduler.queued_chunks(),
            active_units: self.scheduler.active_sources().len(),
            next_start_time: self.scheduler.next_start_time(),
            stats: self.stats.clone(),
        }
    }

    fn start_capture(&mut self, ctx: &mut Context<Self>) -> PipelineResult<()> {
        self.capture.start();

        if let Some(input) = self.audio_input.as_mut() {
            let addr = ctx.address();
            input.start(
                self.config.capture.block_size,
                Box::new(move |samples| addr.do_send(FrameCaptured { samples })),
            )?;
        }

        if self.video_source.is_some() {
            let period = Duration::from_millis(self.config.capture.video_interval_ms.max(1));
            ctx.run_interval(period, |_act, ctx| ctx.notify(VideoTick));
        }

        Ok(())
    }

    /// Act on one inbound envelope: barge-in first, then text, then audio.
    fn handle_envelope(&mut self, text: &str, ctx: &mut Context<Self>) {
        let envelope = match InboundEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.report_decode_error(err);
                return;
            }
        };
        self.stats.envelopes_received += 1;

        if envelope.is_interrupted() {
            self.interrupt_playback();
        }

        if let Some(text) = envelope.text.as_deref() {
            self.observer.on_log(&LogEntry::transcript(text));
        }

        if let Some(audio) = envelope.audio.as_deref() {
            match decode_pcm_chunk(audio) {
                Ok(samples) => {
                    if self.scheduler.enqueue(samples) {
                        ctx.notify(DrainPlayback);
                    }
                }
                Err(err) => self.report_decode_error(err),
            }
        }
    }

    fn interrupt_playback(&mut self) {
        let cleared = self.scheduler.queued_chunks();
        let stopped = self.scheduler.interrupt();
        if stopped + cleared > 0 {
            self.stats.interrupts += 1;
        }
        info!(
            session_id = %self.stats.session_id,
            stopped_units = stopped,
            "Playback interrupted"
        );
        self.observer
            .on_log(&LogEntry::info(format!("Playback interrupted, {} unit(s) stopped", stopped)));
    }

    fn report_decode_error(&mut self, err: PipelineError) {
        self.stats.decode_errors += 1;
        warn!(session_id = %self.stats.session_id, kind = err.kind(), "Dropping inbound message: {}", err);
        self.observer.on_log(&LogEntry::warn(format!("Dropped malformed message: {}", err)));
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.capture.stop();
        if let Some(input) = self.audio_input.as_mut() {
            input.stop();
        }
        self.scheduler.interrupt();
        self.transport.close();
        self.scheduler.close_output();

        self.observer.on_status_change(ChannelState::Closed);
        self.stats.log_summary();
    }
}

impl Actor for Session {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            session_id = %self.stats.session_id,
            endpoint = %self.transport.endpoint(),
            "Session started"
        );

        let addr = ctx.address();
        self.scheduler
            .set_completion_handler(Arc::new(move |id| addr.do_send(SourceEnded(id))));

        self.observer.on_status_change(self.transport.state());

        if let Err(err) = self.start_capture(ctx) {
            error!(session_id = %self.stats.session_id, "Capture failed to start: {}", err);
            self.observer.on_log(&LogEntry::error(err.to_string()));
            ctx.stop();
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.teardown();
        info!(session_id = %self.stats.session_id, "Session stopped");
    }
}

impl Handler<FrameCaptured> for Session {
    type Result = ();

    fn handle(&mut self, msg: FrameCaptured, _ctx: &mut Self::Context) {
        if self.capture.should_visualize() {
            let waveform = self.visualizer.trace(&msg.samples, WAVEFORM_WIDTH, WAVEFORM_HEIGHT);
            self.observer.on_visualize(&waveform);
        }

        let sent = match self.capture.audio_envelope(&msg.samples, self.transport.is_open()) {
            Ok(envelope) => envelope
                .map(|envelope| self.transport.send(&envelope))
                .unwrap_or(false),
            Err(err) => {
                warn!(session_id = %self.stats.session_id, kind = err.kind(), "Dropping microphone block: {}", err);
                self.observer.on_log(&LogEntry::warn(err.to_string()));
                false
            }
        };

        if sent {
            self.stats.audio_frames_sent += 1;
        } else {
            self.stats.audio_frames_dropped += 1;
        }
    }
}

impl Handler<VideoTick> for Session {
    type Result = ();

    fn handle(&mut self, _msg: VideoTick, _ctx: &mut Self::Context) {
        let frame = self.video_source.as_mut().and_then(|source| source.grab_frame());

        match self.capture.video_envelope(frame, self.transport.is_open()) {
            Ok(Some(envelope)) => {
                if self.transport.send(&envelope) {
                    self.stats.video_frames_sent += 1;
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(session_id = %self.stats.session_id, kind = err.kind(), "Skipping video frame: {}", err);
                self.observer.on_log(&LogEntry::warn(err.to_string()));
            }
        }
    }
}

impl Handler<EnvelopeReceived> for Session {
    type Result = ();

    fn handle(&mut self, msg: EnvelopeReceived, ctx: &mut Self::Context) {
        self.handle_envelope(&msg.0, ctx);
    }
}

impl Handler<DrainPlayback> for Session {
    type Result = ();

    fn handle(&mut self, _msg: DrainPlayback, _ctx: &mut Self::Context) {
        let report = self.scheduler.run();

        self.stats.units_scheduled += report.scheduled.len() as u64;
        for err in report.failures {
            self.stats.playback_errors += 1;
            self.observer.on_log(&LogEntry::warn(format!("Skipped playback unit: {}", err)));
        }
        if let Some(last) = report.scheduled.last() {
            debug!(
                session_id = %self.stats.session_id,
                units = report.scheduled.len(),
                playback_until = last.end_at(),
                "Playback scheduled"
            );
        }
    }
}

impl Handler<SourceEnded> for Session {
    type Result = ();

    fn handle(&mut self, msg: SourceEnded, _ctx: &mut Self::Context) {
        self.scheduler.source_ended(msg.0);
    }
}

impl Handler<ChannelStateChanged> for Session {
    type Result = ();

    fn handle(&mut self, msg: ChannelStateChanged, ctx: &mut Self::Context) {
        match msg.0 {
            ChannelState::Closed => {
                info!(session_id = %self.stats.session_id, "Backend channel closed");
                ctx.stop();
            }
            state => self.observer.on_status_change(state),
        }
    }
}

impl Handler<SetMicEnabled> for Session {
    type Result = ();

    fn handle(&mut self, msg: SetMicEnabled, _ctx: &mut Self::Context) {
        self.capture.set_mic_enabled(msg.0);
        info!(session_id = %self.stats.session_id, enabled = msg.0, "Microphone toggled");
    }
}

impl Handler<SetCameraEnabled> for Session {
    type Result = ();

    fn handle(&mut self, msg: SetCameraEnabled, _ctx: &mut Self::Context) {
        self.capture.set_camera_enabled(msg.0);
        info!(session_id = %self.stats.session_id, enabled = msg.0, "Camera toggled");
    }
}

impl Handler<Disconnect> for Session {
    type Result = ();

    fn handle(&mut self, _msg: Disconnect, ctx: &mut Self::Context) {
        info!(session_id = %self.stats.session_id, "Disconnect requested");
        ctx.stop();
    }
}

impl Handler<GetSnapshot> for Session {
    type Result = MessageResult<GetSnapshot>;

    fn handle(&mut self, _msg: GetSnapshot, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot())
    }
}

/// Inbound socket frames, in arrival order.
impl StreamHandler<Result<WsMessage, tungstenite::Error>> for Session {
    fn handle(&mut self, item: Result<WsMessage, tungstenite::Error>, ctx: &mut Self::Context) {
        match InboundFrame::classify(item) {
            InboundFrame::Envelope(text) => self.handle_envelope(&text, ctx),
            InboundFrame::Malformed(err) => self.report_decode_error(err),
            InboundFrame::Control => {}
            InboundFrame::Closed(reason) => {
                if let Some(err) = reason {
                    error!(session_id = %self.stats.session_id, "Backend channel failed: {}", err);
                    self.observer.on_log(&LogEntry::error(err.to_string()));
                }
                ctx.notify(ChannelStateChanged(ChannelState::Closed));
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.notify(ChannelStateChanged(ChannelState::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::encode_pcm_frame;
    use crate::device::image_source::StillImageSource;
    use crate::device::testing::ManualOutput;
    use crate::observer::testing::RecordingObserver;
    use crate::observer::LogKind;
    use image::DynamicImage;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    struct Harness {
        addr: Addr<Session>,
        output: ManualOutput,
        observer: Arc<RecordingObserver>,
        outbound: UnboundedReceiver<WsMessage>,
        inbound: UnboundedSender<Result<WsMessage, tungstenite::Error>>,
    }

    fn launch_with(
        transport: TransportChannel,
        outbound: UnboundedReceiver<WsMessage>,
        media: MediaDevices,
        output: ManualOutput,
    ) -> Harness {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let observer = Arc::new(RecordingObserver::default());
        let config = AppConfig::default();
        let capture = CapturePipeline::new(config.capture.clone(), 16000).unwrap();
        let addr = Session::launch(
            config,
            media,
            capture,
            transport,
            UnboundedReceiverStream::new(inbound_rx),
            observer.clone(),
        );
        Harness {
            addr,
            output,
            observer,
            outbound,
            inbound,
        }
    }

    fn launch() -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = ManualOutput::new(0.0);
        let media = MediaDevices {
            audio_input: None,
            video_source: None,
            output: Box::new(output.clone()),
        };
        launch_with(TransportChannel::from_sender(tx), rx, media, output)
    }

    /// Let queued self-notifications run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn audio_envelope(samples: usize) -> String {
        format!(r#"{{"audio":"{}"}}"#, encode_pcm_frame(&vec![0.25; samples]))
    }

    fn sent_texts(outbound: &mut UnboundedReceiver<WsMessage>) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(message) = outbound.try_recv() {
            if let WsMessage::Text(text) = message {
                texts.push(text);
            }
        }
        texts
    }

    #[actix::test]
    async fn test_session_reports_open_on_start() {
        let harness = launch();
        let snapshot = harness.addr.send(GetSnapshot).await.unwrap();

        assert_eq!(snapshot.channel_state, ChannelState::Open);
        assert!(snapshot.capturing);
        assert_eq!(harness.observer.statuses(), vec![ChannelState::Open]);
    }

    #[actix::test]
    async fn test_captured_frame_is_sent_and_visualized() {
        let mut harness = launch();
        harness
            .addr
            .send(FrameCaptured { samples: vec![0.1; 4096] })
            .await
            .unwrap();

        let texts = sent_texts(&mut harness.outbound);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("\"mime_type\":\"audio/pcm\""));
        assert_eq!(harness.observer.waveform_count(), 1);
    }

    #[actix::test]
    async fn test_muted_mic_still_visualizes_but_sends_nothing() {
        let mut harness = launch();
        harness.addr.send(SetMicEnabled(false)).await.unwrap();
        harness.addr.send(FrameCaptured { samples: vec![0.1; 64] }).await.unwrap();

        assert!(sent_texts(&mut harness.outbound).is_empty());
        assert_eq!(harness.observer.waveform_count(), 1);
        let snapshot = harness.addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.stats.audio_frames_dropped, 1);
    }

    #[actix::test]
    async fn test_capture_tick_on_closed_channel_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = TransportChannel::from_sender(tx);
        transport.close();
        assert!(matches!(rx.try_recv(), Ok(WsMessage::Close(None))));

        let output = ManualOutput::new(0.0);
        let media = MediaDevices {
            audio_input: None,
            video_source: Some(Box::new(StillImageSource::from_image(DynamicImage::new_rgb8(32, 24)))),
            output: Box::new(output.clone()),
        };
        let mut harness = launch_with(transport, rx, media, output);

        harness.addr.send(FrameCaptured { samples: vec![0.1; 64] }).await.unwrap();
        harness.addr.send(VideoTick).await.unwrap();

        assert!(harness.outbound.try_recv().is_err());
        let snapshot = harness.addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.stats.audio_frames_sent, 0);
        assert_eq!(snapshot.stats.video_frames_sent, 0);
        assert_eq!(snapshot.stats.audio_frames_dropped, 1);
    }

    #[actix::test]
    async fn test_video_tick_sends_jpeg_snapshot() {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = ManualOutput::new(0.0);
        let media = MediaDevices {
            audio_input: None,
            video_source: Some(Box::new(StillImageSource::from_image(DynamicImage::new_rgb8(32, 24)))),
            output: Box::new(output.clone()),
        };
        let mut harness = launch_with(TransportChannel::from_sender(tx), rx, media, output);

        harness.addr.send(VideoTick).await.unwrap();
        let texts = sent_texts(&mut harness.outbound);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("\"mime_type\":\"image/jpeg\""));

        harness.addr.send(SetCameraEnabled(false)).await.unwrap();
        harness.addr.send(VideoTick).await.unwrap();
        assert!(sent_texts(&mut harness.outbound).is_empty());
    }

    #[actix::test]
    async fn test_audio_burst_is_scheduled_as_one_unit() {
        let harness = launch();
        for _ in 0..3 {
            harness
                .inbound
                .send(Ok(WsMessage::Text(audio_envelope(1600))))
                .unwrap();
        }
        settle().await;

        let units = harness.output.scheduled();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].samples.len(), 4800);
        assert!((units[0].start_at - 0.05).abs() < 1e-9);

        let snapshot = harness.addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.stats.units_scheduled, 1);
        assert!((snapshot.next_start_time - 0.25).abs() < 1e-9);
    }

    #[actix::test]
    async fn test_idle_interrupt_is_not_counted() {
        let harness = launch();
        harness.addr.send(EnvelopeReceived(audio_envelope(2400))).await.unwrap();
        settle().await;
        let id = harness.output.scheduled()[0].id;
        harness.addr.send(SourceEnded(id)).await.unwrap();

        harness
            .addr
            .send(EnvelopeReceived(r#"{"interrupted":true}"#.to_string()))
            .await
            .unwrap();

        let snapshot = harness.addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.stats.interrupts, 0);
        assert!(harness.output.stopped().is_empty());
        assert!((snapshot.next_start_time - 0.15).abs() < 1e-9);
    }

    #[actix::test]
    async fn test_interrupted_envelope_stops_two_active_units() {
        let harness = launch();
        harness.addr.send(EnvelopeReceived(audio_envelope(4800))).await.unwrap();
        settle().await;
        harness.addr.send(EnvelopeReceived(audio_envelope(4800))).await.unwrap();
        settle().await;

        let before = harness.addr.send(GetSnapshot).await.unwrap();
        assert_eq!(before.active_units, 2);

        harness
            .addr
            .send(EnvelopeReceived(r#"{"interrupted":true}"#.to_string()))
            .await
            .unwrap();

        let after = harness.addr.send(GetSnapshot).await.unwrap();
        assert_eq!(harness.output.stopped().len(), 2);
        assert_eq!(after.active_units, 0);
        assert_eq!(after.queued_chunks, 0);
        assert_eq!(after.next_start_time, 0.0);
        assert!(!after.playing);
        assert_eq!(after.stats.interrupts, 1);
    }

    #[actix::test]
    async fn test_malformed_messages_are_dropped_and_session_continues() {
        let harness = launch();
        harness.inbound.send(Ok(WsMessage::Text("not json".to_string()))).unwrap();
        harness.inbound.send(Ok(WsMessage::Binary(vec![1, 2, 3]))).unwrap();
        harness
            .inbound
            .send(Ok(WsMessage::Text(r#"{"audio":"@@@"}"#.to_string())))
            .unwrap();
        harness.inbound.send(Ok(WsMessage::Text(audio_envelope(2400)))).unwrap();
        settle().await;

        let snapshot = harness.addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.stats.decode_errors, 3);
        assert_eq!(snapshot.stats.units_scheduled, 1);
        assert_eq!(snapshot.channel_state, ChannelState::Open);
        assert_eq!(harness.observer.logs_of(LogKind::Warn).len(), 3);
    }

    #[actix::test]
    async fn test_text_is_logged_as_transcript() {
        let harness = launch();
        harness
            .addr
            .send(EnvelopeReceived(r#"{"text":"Hello there"}"#.to_string()))
            .await
            .unwrap();

        assert_eq!(harness.observer.logs_of(LogKind::Transcript), vec!["Hello there".to_string()]);
    }

    #[actix::test]
    async fn test_completed_unit_leaves_active_set() {
        let harness = launch();
        harness.addr.send(EnvelopeReceived(audio_envelope(2400))).await.unwrap();
        settle().await;

        let id = harness.output.scheduled()[0].id;
        harness.addr.send(SourceEnded(id)).await.unwrap();
        let snapshot = harness.addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.active_units, 0);
    }

    #[actix::test]
    async fn test_close_frame_tears_session_down() {
        let mut harness = launch();
        harness.addr.send(EnvelopeReceived(audio_envelope(2400))).await.unwrap();
        settle().await;

        harness.inbound.send(Ok(WsMessage::Close(None))).unwrap();
        settle().await;

        assert!(!harness.addr.connected());
        assert_eq!(harness.observer.statuses().last(), Some(&ChannelState::Closed));
        assert!(harness.output.is_closed());
        assert_eq!(harness.output.stopped().len(), 1);
        assert!(matches!(harness.outbound.try_recv(), Ok(WsMessage::Close(None))));
    }

    #[actix::test]
    async fn test_disconnect_is_idempotent() {
        let harness = launch();
        Session::stop(&harness.addr);
        Session::stop(&harness.addr);
        settle().await;

        assert!(!harness.addr.connected());
        let closed = harness
            .observer
            .statuses()
            .iter()
            .filter(|state| **state == ChannelState::Closed)
            .count();
        assert_eq!(closed, 1);
    }
}

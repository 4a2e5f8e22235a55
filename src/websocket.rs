//! # WebSocket Transport Channel
//!
//! The single duplex channel between the client and the conversational backend.
//! Everything on the wire is a JSON text frame.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: `connect()` completes the handshake before the channel counts as open
//! 2. **Outbound**: one envelope per capture tick, `{"data": "<base64>", "mime_type": ...}`
//! 3. **Inbound**: `{"audio"?: "<base64 PCM>", "text"?: "...", "interrupted"?: true}`
//! 4. **Close**: a Close frame, a socket error or the end of the stream ends the channel
//!
//! ## Delivery Policy:
//! Sends on a channel that is not `Open` are dropped, never queued. There is no
//! reconnection: a new connection belongs to a new session.
//!
//! ## Rust Concepts:
//! - **Split streams**: the socket is split into a sink (owned by a writer task)
//!   and a stream (handed to the session actor)
//! - **mpsc channels**: the session pushes frames into an unbounded channel so
//!   sending never awaits on the socket
//! - **serde attributes**: `rename` and `skip_serializing_if` shape the JSON

use crate::audio::codec::{encode_binary, encode_pcm_frame};
use crate::error::{PipelineError, PipelineResult};

use futures_util::{stream::SplitStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Inbound half of a connected socket.
pub type InboundStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Lifecycle of the duplex channel. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Closed => write!(f, "closed"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Open => write!(f, "open"),
        }
    }
}

/// Payload type of an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "audio/pcm")]
    AudioPcm,
    #[serde(rename = "image/jpeg")]
    ImageJpeg,
}

/// Message sent from the client to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Base64 payload
    pub data: String,
    pub mime_type: MimeType,
}

impl OutboundEnvelope {
    /// One microphone block as 16-bit little-endian PCM.
    pub fn audio(samples: &[f32]) -> Self {
        Self {
            data: encode_pcm_frame(samples),
            mime_type: MimeType::AudioPcm,
        }
    }

    /// One encoded camera snapshot.
    pub fn image(jpeg: &[u8]) -> Self {
        Self {
            data: encode_binary(jpeg),
            mime_type: MimeType::ImageJpeg,
        }
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Message received from the backend. Every field is optional and acted on
/// independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Base64 16-bit PCM at the playback rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Transcript or assistant text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Barge-in signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

impl InboundEnvelope {
    /// Parse one text frame. Anything that is not a JSON object of the
    /// expected shape is a `Decode` error.
    pub fn parse(text: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.unwrap_or(false)
    }
}

/// What one inbound socket item means to the session.
#[derive(Debug)]
pub enum InboundFrame {
    /// A text frame carrying an envelope
    Envelope(String),
    /// A frame the protocol does not use for data
    Malformed(PipelineError),
    /// Ping/pong and other frames the socket library already handled
    Control,
    /// The peer closed the channel or the socket failed
    Closed(Option<PipelineError>),
}

impl InboundFrame {
    pub fn classify(item: Result<Message, tungstenite::Error>) -> Self {
        match item {
            Ok(Message::Text(text)) => InboundFrame::Envelope(text),
            Ok(Message::Binary(bytes)) => InboundFrame::Malformed(PipelineError::Decode(format!(
                "unexpected binary frame of {} bytes",
                bytes.len()
            ))),
            Ok(Message::Close(frame)) => {
                debug!(frame = ?frame, "Received close frame");
                InboundFrame::Closed(None)
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => InboundFrame::Control,
            Err(err) => InboundFrame::Closed(Some(err.into())),
        }
    }
}

/// Sending half of the duplex channel.
pub struct TransportChannel {
    endpoint: String,
    state: ChannelState,
    outbound: Option<UnboundedSender<Message>>,
    frames_sent: u64,
}

impl TransportChannel {
    /// Open the channel to `endpoint`.
    ///
    /// The returned channel is `Open` only once the handshake has completed;
    /// the inbound stream is handed back separately so the owner can attach it
    /// to its event loop. Must be called inside a Tokio runtime.
    ///
    /// ## Errors:
    /// `Connection` if the socket or the handshake fails.
    pub async fn connect(endpoint: &str) -> PipelineResult<(Self, InboundStream)> {
        info!(endpoint = %endpoint, state = %ChannelState::Connecting, "Connecting to backend");

        let (socket, response) = connect_async(endpoint)
            .await
            .map_err(|e| PipelineError::Connection(format!("cannot connect to {}: {}", endpoint, e)))?;
        debug!(status = %response.status(), "WebSocket handshake completed");

        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel::<Message>();

        let writer_endpoint = endpoint.to_string();
        tokio::spawn(async move {
            let outbound = UnboundedReceiverStream::new(rx).map(Ok::<_, tungstenite::Error>);
            if let Err(err) = outbound.forward(sink).await {
                warn!(endpoint = %writer_endpoint, "WebSocket writer stopped: {}", err);
            }
        });

        let mut channel = Self::from_sender(tx);
        channel.endpoint = endpoint.to_string();
        info!(endpoint = %endpoint, state = %channel.state, "Connected to backend");
        Ok((channel, stream))
    }

    /// An already open channel whose frames go to `tx`.
    pub fn from_sender(tx: UnboundedSender<Message>) -> Self {
        Self {
            endpoint: String::new(),
            state: ChannelState::Open,
            outbound: Some(tx),
            frames_sent: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Send one envelope as a text frame.
    ///
    /// Returns whether the frame was handed to the socket. On a channel that
    /// is not open the envelope is dropped and this is not an error.
    pub fn send(&mut self, envelope: &OutboundEnvelope) -> bool {
        if !self.is_open() {
            return false;
        }

        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!("Dropping unserializable envelope: {}", err);
                return false;
            }
        };

        let delivered = self
            .outbound
            .as_ref()
            .map(|tx| tx.send(Message::Text(json)).is_ok())
            .unwrap_or(false);

        if delivered {
            self.frames_sent += 1;
        } else {
            // The writer task is gone, so the socket is too
            self.mark_closed();
        }
        delivered
    }

    /// The socket went away underneath us.
    pub fn mark_closed(&mut self) {
        self.outbound = None;
        self.state = ChannelState::Closed;
    }

    /// Close the channel. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(Message::Close(None));
            info!(endpoint = %self.endpoint, frames_sent = self.frames_sent, "Closed backend channel");
        }
        self.state = ChannelState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_envelope_wire_shape() {
        let envelope = OutboundEnvelope::audio(&[0.0, -1.0]);
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(value["mime_type"], "audio/pcm");
        // 0x0000, 0x8000 little-endian
        assert_eq!(value["data"], "AAAAgA==");

        let image = OutboundEnvelope::image(&[0xFF, 0xD8]);
        let json = image.to_json().unwrap();
        assert!(json.contains("\"mime_type\":\"image/jpeg\""));
        assert!(json.contains("\"data\":\"/9g=\""));
    }

    #[test]
    fn test_inbound_fields_are_independent() {
        let envelope = InboundEnvelope::parse(r#"{"audio":"AAA=","text":"hi","interrupted":true}"#).unwrap();
        assert_eq!(envelope.audio.as_deref(), Some("AAA="));
        assert_eq!(envelope.text.as_deref(), Some("hi"));
        assert!(envelope.is_interrupted());

        let empty = InboundEnvelope::parse("{}").unwrap();
        assert_eq!(empty, InboundEnvelope::default());
        assert!(!empty.is_interrupted());

        let unknown = InboundEnvelope::parse(r#"{"turn_complete":true,"text":"ok"}"#).unwrap();
        assert_eq!(unknown.text.as_deref(), Some("ok"));
    }

    #[test]
    fn test_malformed_inbound_is_decode_error() {
        assert!(matches!(InboundEnvelope::parse("not json"), Err(PipelineError::Decode(_))));
        assert!(matches!(InboundEnvelope::parse(r#"{"audio":5}"#), Err(PipelineError::Decode(_))));
        assert!(matches!(InboundEnvelope::parse("42"), Err(PipelineError::Decode(_))));
    }

    #[test]
    fn test_classify_frames() {
        assert!(matches!(
            InboundFrame::classify(Ok(Message::Text("{}".to_string()))),
            InboundFrame::Envelope(_)
        ));
        assert!(matches!(
            InboundFrame::classify(Ok(Message::Binary(vec![1, 2, 3]))),
            InboundFrame::Malformed(PipelineError::Decode(_))
        ));
        assert!(matches!(InboundFrame::classify(Ok(Message::Ping(vec![]))), InboundFrame::Control));
        assert!(matches!(InboundFrame::classify(Ok(Message::Close(None))), InboundFrame::Closed(None)));
        assert!(matches!(
            InboundFrame::classify(Err(tungstenite::Error::ConnectionClosed)),
            InboundFrame::Closed(Some(PipelineError::Connection(_)))
        ));
    }

    #[test]
    fn test_send_delivers_text_frames_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = TransportChannel::from_sender(tx);

        assert!(channel.send(&OutboundEnvelope::audio(&[0.0])));
        assert!(channel.send(&OutboundEnvelope::image(&[1])));
        assert_eq!(channel.frames_sent(), 2);

        match rx.try_recv().unwrap() {
            Message::Text(text) => assert!(text.contains("audio/pcm")),
            other => panic!("unexpected frame {:?}", other),
        }
        match rx.try_recv().unwrap() {
            Message::Text(text) => assert!(text.contains("image/jpeg")),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_send_after_close_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = TransportChannel::from_sender(tx);
        channel.close();
        channel.close();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(rx.try_recv(), Ok(Message::Close(None))));
        assert!(!channel.send(&OutboundEnvelope::audio(&[0.5])));
        assert!(rx.try_recv().is_err());
        assert_eq!(channel.frames_sent(), 0);
    }

    #[test]
    fn test_send_marks_closed_when_writer_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut channel = TransportChannel::from_sender(tx);

        assert!(!channel.send(&OutboundEnvelope::audio(&[0.5])));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let result = TransportChannel::connect("ws://127.0.0.1:1").await;
        assert!(matches!(result, Err(PipelineError::Connection(_))));
    }
}

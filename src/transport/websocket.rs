//! WebSocket transport adapter.
//!
//! Thin wire adapter for a Speechmatics-style real-time endpoint. It opens
//! the connection, performs the `StartRecognition` handshake, forwards
//! binary audio frames, and demultiplexes server messages into
//! [`TransportEvent`]s. No session policy lives here: reconnects, backoff
//! and credential rotation are all decisions of the session owner.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Transport, TransportEvent, TransportHandle};
use crate::config::{AsrConfig, DiarizationMode};
use crate::error::AsrError;
use crate::transport::messages::TranscriptMessage;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection factory for the real provider endpoint.
#[derive(Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }

    fn start_recognition_payload(config: &AsrConfig) -> String {
        let mut transcription = json!({
            "language": config.language,
            "enable_partials": config.enable_partials,
            "max_delay": config.max_delay,
            "max_delay_mode": config.max_delay_mode,
            "operating_point": config.operating_point,
        });

        let vocab = config.parsed_hotwords();
        if !vocab.is_empty() {
            transcription["additional_vocab"] = vocab
                .iter()
                .map(|w| json!({ "content": w }))
                .collect::<Vec<_>>()
                .into();
        }

        match config.diarization {
            DiarizationMode::None => {}
            mode => {
                transcription["diarization"] = json!(mode);
                if matches!(
                    mode,
                    DiarizationMode::Speaker | DiarizationMode::ChannelAndSpeaker
                ) {
                    transcription["speaker_diarization_config"] = json!({
                        "max_speakers": config.max_speakers,
                        "speaker_sensitivity": config.speaker_sensitivity,
                        "prefer_current_speaker": config.prefer_current_speaker,
                    });
                }
                if !config.channel_labels.is_empty() {
                    transcription["channel_diarization_labels"] = json!(config.channel_labels);
                }
            }
        }

        json!({
            "message": "StartRecognition",
            "audio_format": {
                "type": "raw",
                "encoding": "pcm_s16le",
                "sample_rate": config.sample_rate,
            },
            "transcription_config": transcription,
        })
        .to_string()
    }

    /// Map one server text message onto a transport event. Returns `None`
    /// for message types the session does not consume.
    fn demux(raw: &str) -> Option<TransportEvent> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparsable server message");
                return Some(TransportEvent::Malformed(format!(
                    "unparsable server message: {e}"
                )));
            }
        };

        let kind = value.get("message").and_then(|m| m.as_str()).unwrap_or("");
        match kind {
            "RecognitionStarted" => Some(TransportEvent::SessionStarted {
                session_id: value
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(str::to_string),
            }),
            "AddPartialTranscript" => match serde_json::from_value::<TranscriptMessage>(value) {
                Ok(msg) => Some(TransportEvent::Partial(msg)),
                Err(e) => Some(TransportEvent::Malformed(format!(
                    "malformed partial transcript: {e}"
                ))),
            },
            "AddTranscript" => match serde_json::from_value::<TranscriptMessage>(value) {
                Ok(msg) => Some(TransportEvent::Final(msg)),
                Err(e) => Some(TransportEvent::Malformed(format!(
                    "malformed transcript: {e}"
                ))),
            },
            "Info" => Some(TransportEvent::Info(
                value
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or(raw)
                    .to_string(),
            )),
            "Warning" => Some(TransportEvent::Warning(
                value
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or(raw)
                    .to_string(),
            )),
            "Error" => Some(TransportEvent::Error {
                message: value
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or(raw)
                    .to_string(),
                code: value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .map(str::to_string),
            }),
            "EndOfTranscript" => Some(TransportEvent::SessionEnded),
            "AudioAdded" => None,
            other => {
                debug!(kind = other, "ignoring server message");
                None
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Handle = WebSocketHandle;

    async fn connect(
        &self,
        credential: &str,
        config: &AsrConfig,
    ) -> Result<(Self::Handle, mpsc::UnboundedReceiver<TransportEvent>), AsrError> {
        let url = Url::parse(&config.url)
            .map_err(|e| AsrError::Configuration(format!("invalid endpoint URL: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AsrError::Configuration("endpoint URL has no host".to_string()))?
            .to_string();

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", &host)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header("Authorization", format!("Bearer {credential}"))
            .body(())
            .map_err(|e| AsrError::Configuration(format!("failed to build request: {e}")))?;

        let (ws_stream, _response) = match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(AsrError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                return Err(AsrError::ConnectionFailed(format!(
                    "handshake timed out after {CONNECT_TIMEOUT:?}"
                )));
            }
        };
        info!(endpoint = %config.url, "websocket connected");

        let (mut sink, mut stream) = ws_stream.split();

        sink.send(Message::Text(
            Self::start_recognition_payload(config).into(),
        ))
        .await
        .map_err(|e| AsrError::Network(format!("failed to start recognition: {e}")))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = Self::demux(text.as_str()) {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "server closed the connection");
                        let _ = event_tx.send(TransportEvent::SessionEnded);
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Binary(data)) => {
                        warn!(len = data.len(), "unexpected binary message from server");
                    }
                    Ok(Message::Frame(_)) => {}
                    Err(e) => {
                        error!(error = %e, "websocket read failed");
                        let _ = event_tx.send(TransportEvent::Error {
                            message: e.to_string(),
                            code: None,
                        });
                        break;
                    }
                }
            }
            // Dropping event_tx closes the event stream; the session
            // observes the end of the connection through that.
        });

        Ok((
            WebSocketHandle {
                sink,
                reader: Some(reader),
                audio_seq: 0,
            },
            event_rx,
        ))
    }
}

/// Write side of one live WebSocket connection.
pub struct WebSocketHandle {
    sink: WsSink,
    reader: Option<tokio::task::JoinHandle<()>>,
    audio_seq: u64,
}

#[async_trait]
impl TransportHandle for WebSocketHandle {
    async fn send_audio(&mut self, chunk: Bytes) -> Result<(), AsrError> {
        self.audio_seq += 1;
        self.sink
            .send(Message::Binary(chunk))
            .await
            .map_err(|e| AsrError::Network(format!("failed to send audio: {e}")))
    }

    async fn flush(&mut self) -> Result<(), AsrError> {
        let payload = json!({
            "message": "EndOfStream",
            "last_seq_no": self.audio_seq,
        })
        .to_string();
        self.sink
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| AsrError::Network(format!("failed to flush stream: {e}")))
    }

    async fn close(&mut self) -> Result<(), AsrError> {
        let _ = self.sink.send(Message::Close(None)).await;
        if let Some(reader) = self.reader.take() {
            if timeout(Duration::from_secs(5), reader).await.is_err() {
                warn!("reader task did not finish within the close window");
            }
        }
        Ok(())
    }
}

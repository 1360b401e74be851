//! Transport abstraction between the session core and the provider wire.
//!
//! The session logic never talks to a socket directly. It drives a
//! [`Transport`] to open connections and a [`TransportHandle`] to stream
//! audio, and consumes [`TransportEvent`]s demultiplexed from the
//! provider. This keeps the reconnect and aggregation machinery fully
//! testable against a scripted mock, with the real WebSocket adapter in
//! [`websocket`] kept deliberately thin.

pub mod messages;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::AsrConfig;
use crate::error::AsrError;

pub use messages::{Alternative, ChannelId, ResultEntry, TranscriptMessage, TranscriptMetadata};
pub use websocket::WebSocketTransport;

/// Events delivered by a live connection, already demultiplexed from the
/// provider's wire format.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The provider acknowledged the session; its clock starts at zero now.
    SessionStarted { session_id: Option<String> },
    /// An in-progress result subject to revision.
    Partial(TranscriptMessage),
    /// A result the provider will not revise.
    Final(TranscriptMessage),
    Info(String),
    Warning(String),
    Error {
        message: String,
        code: Option<String>,
    },
    /// A provider payload that could not be parsed. Recovered locally:
    /// the message is skipped and the connection stays up.
    Malformed(String),
    /// The provider closed the current utterance/session.
    SessionEnded,
}

/// Connection factory. One `connect` call yields at most one live
/// connection; the session owner never holds two concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Handle: TransportHandle;

    /// Open a connection authenticated with `credential` and configured
    /// from `config`. Returns the write-side handle and the event stream;
    /// the event stream closing means the connection is gone.
    async fn connect(
        &self,
        credential: &str,
        config: &AsrConfig,
    ) -> Result<(Self::Handle, mpsc::UnboundedReceiver<TransportEvent>), AsrError>;
}

/// Write side of one live connection. Opaque: the session core never
/// inspects vendor internals behind it.
#[async_trait]
pub trait TransportHandle: Send {
    /// Stream one conditioned audio chunk.
    async fn send_audio(&mut self, chunk: Bytes) -> Result<(), AsrError>;

    /// Ask the provider to finalize the in-flight utterance (end of
    /// stream). Used by the disconnect drain mode and by interruption.
    async fn flush(&mut self) -> Result<(), AsrError>;

    /// Tear the connection down. Idempotent.
    async fn close(&mut self) -> Result<(), AsrError>;
}

//! Resilient streaming speech-to-text client.
//!
//! `streamscribe` keeps a long-lived session against a remote streaming
//! ASR provider, feeds it conditioned PCM audio, and reconstructs an
//! ordered, gap-free transcript across network drops, provider errors and
//! credential exhaustion. It performs no speech decoding itself; the
//! provider protocol sits behind the [`transport::Transport`] seam.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamscribe::{AsrConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AsrConfig {
//!         credentials: vec!["primary-key".into(), "backup-key".into()],
//!         language: "en".into(),
//!         ..Default::default()
//!     };
//!
//!     let mut session = SessionManager::new(config);
//!     session.on_segment(Arc::new(|segment| {
//!         Box::pin(async move {
//!             println!("[{}] {}", segment.speaker, segment.text);
//!         })
//!     }));
//!
//!     session.start().await?;
//!     let pcm_frame = vec![0u8; 5120]; // 160 ms of 16 kHz s16le audio
//!     session.send_audio(&pcm_frame).await?;
//!     session.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod audio;
pub mod backoff;
pub mod config;
pub mod credentials;
pub mod error;
pub mod session;
pub mod timeline;
pub mod transport;

// Re-export commonly used items for convenience
pub use aggregator::{ResultAggregator, TranscriptSegment, WordToken, LABEL_UNSET};
pub use backoff::BackoffController;
pub use config::{AsrConfig, DiarizationMode, DrainMode, FinalMode, MaxDelayMode};
pub use credentials::CredentialRotator;
pub use error::{AsrError, ErrorEvent, Severity};
pub use session::{
    ErrorEventCallback, FinalizeCallback, FinalizeSignal, SegmentCallback, SessionManager,
    SessionState,
};
pub use timeline::AudioTimeline;
pub use transport::{Transport, TransportEvent, TransportHandle, WebSocketTransport};

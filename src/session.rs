//! Session lifecycle orchestration.
//!
//! One [`SessionManager`] owns exactly one logical recognition session: it
//! conditions and queues inbound audio, drives the transport connection
//! state machine, routes provider events into the aggregator, and applies
//! the reconnect policy (backoff plus credential rotation on quota
//! failures). At most one transport connection is live at any time.
//!
//! Concurrency model: a single supervising task owns the state machine,
//! the timeline and the aggregator. The transmit path and the event path
//! both run inside that task's `select!` loop, so every mutation of
//! session state is serialized by construction. Callers interact through
//! the bounded audio queue, a command channel and a shutdown signal.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::aggregator::{ResultAggregator, TranscriptSegment};
use crate::audio;
use crate::backoff::BackoffController;
use crate::config::{AsrConfig, DrainMode};
use crate::credentials::CredentialRotator;
use crate::error::{is_quota_error, AsrError, ErrorEvent};
use crate::timeline::AudioTimeline;
use crate::transport::{Transport, TransportEvent, TransportHandle, WebSocketTransport};

/// Bounded audio queue depth. Upstream capture is real-time paced, so the
/// producer blocking briefly on a full queue is acceptable.
const AUDIO_QUEUE_DEPTH: usize = 256;

/// Ceiling for waiting on the supervising task during `stop()`.
const STOP_WAIT: Duration = Duration::from_secs(5);

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Draining,
    Reconnecting,
    Closed,
    /// Terminal: credentials exhausted or a fatal error was reported.
    Failed,
}

/// Brackets around a forced-final request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeSignal {
    Began,
    Ended,
}

pub type SegmentCallback =
    Arc<dyn Fn(TranscriptSegment) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
pub type ErrorEventCallback =
    Arc<dyn Fn(ErrorEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
pub type FinalizeCallback =
    Arc<dyn Fn(FinalizeSignal) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Default)]
struct CallbackSet {
    segment: Mutex<Option<SegmentCallback>>,
    error: Mutex<Option<ErrorEventCallback>>,
    finalize: Mutex<Option<FinalizeCallback>>,
}

impl CallbackSet {
    async fn emit_segment(&self, segment: TranscriptSegment) {
        let cb = self.segment.lock().clone();
        if let Some(cb) = cb {
            cb(segment).await;
        }
    }

    async fn emit_error(&self, event: ErrorEvent) {
        let cb = self.error.lock().clone();
        if let Some(cb) = cb {
            cb(event).await;
        }
    }

    async fn emit_finalize(&self, signal: FinalizeSignal) {
        let cb = self.finalize.lock().clone();
        if let Some(cb) = cb {
            cb(signal).await;
        }
    }
}

enum Command {
    Finalize,
    Interrupt,
}

/// Streaming session manager, generic over the transport seam.
pub struct SessionManager<T: Transport = WebSocketTransport> {
    config: AsrConfig,
    transport: Arc<T>,
    state: Arc<RwLock<SessionState>>,
    rotator: Arc<Mutex<CredentialRotator>>,
    callbacks: Arc<CallbackSet>,
    audio_tx: mpsc::Sender<Bytes>,
    /// Held until `start()` hands it to the supervising task.
    audio_rx: Option<mpsc::Receiver<Bytes>>,
    command_tx: Option<mpsc::UnboundedSender<Command>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    supervisor: Option<tokio::task::JoinHandle<()>>,
    /// Per-session transmit counter for periodic logging.
    frames_in: AtomicU64,
}

impl SessionManager<WebSocketTransport> {
    /// Session against the real provider endpoint.
    pub fn new(config: AsrConfig) -> Self {
        Self::with_transport(config, WebSocketTransport::new())
    }
}

impl<T: Transport> SessionManager<T> {
    pub fn with_transport(config: AsrConfig, transport: T) -> Self {
        let config = config.normalized();
        let rotator = CredentialRotator::new(config.credentials.clone());
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        Self {
            config,
            transport: Arc::new(transport),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            rotator: Arc::new(Mutex::new(rotator)),
            callbacks: Arc::new(CallbackSet::default()),
            audio_tx,
            audio_rx: Some(audio_rx),
            command_tx: None,
            shutdown_tx: None,
            supervisor: None,
            frames_in: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AsrConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Register the transcript segment callback.
    pub fn on_segment(&self, callback: SegmentCallback) {
        *self.callbacks.segment.lock() = Some(callback);
    }

    /// Register the error event callback.
    pub fn on_error(&self, callback: ErrorEventCallback) {
        *self.callbacks.error.lock() = Some(callback);
    }

    /// Register the finalize bracket callback.
    pub fn on_finalize(&self, callback: FinalizeCallback) {
        *self.callbacks.finalize.lock() = Some(callback);
    }

    /// Clear attempted-credential history and return to the first
    /// credential. Deliberate operator action; never done automatically.
    pub fn reset_credential_rotation(&self) {
        self.rotator.lock().reset_rotation();
    }

    /// Start the session: `Idle -> Connecting`, spawning the supervising
    /// task that owns the connection lifecycle.
    pub async fn start(&mut self) -> Result<(), AsrError> {
        if self.state() != SessionState::Idle {
            return Err(AsrError::InvalidState(format!(
                "cannot start from {:?}",
                self.state()
            )));
        }
        if self.rotator.lock().is_empty() {
            *self.state.write() = SessionState::Failed;
            let event = ErrorEvent::fatal("no credentials configured");
            self.callbacks.emit_error(event).await;
            return Err(AsrError::Configuration(
                "no credentials configured".to_string(),
            ));
        }

        let audio_rx = self
            .audio_rx
            .take()
            .ok_or_else(|| AsrError::InvalidState("session already consumed".to_string()))?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.command_tx = Some(command_tx);
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = Supervisor {
            transport: self.transport.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            rotator: self.rotator.clone(),
            callbacks: self.callbacks.clone(),
            audio_tx: self.audio_tx.clone(),
            audio_rx,
            command_rx,
            shutdown_rx,
            timeline: AudioTimeline::new(),
            aggregator: ResultAggregator::new(self.config.final_mode, self.config.language.clone()),
            backoff: BackoffController::new(
                Duration::from_millis(self.config.retry_initial_ms),
                Duration::from_millis(self.config.retry_max_ms),
            ),
            pending_finalize: false,
        };

        *self.state.write() = SessionState::Connecting;
        self.supervisor = Some(tokio::spawn(supervisor.run()));
        info!("session started");
        Ok(())
    }

    /// Feed one raw PCM frame. The frame is gain-conditioned and queued
    /// for the transmit path; outside `Streaming` it stays queued. In
    /// `Closed`/`Failed` the frame is dropped with a warning; returns
    /// whether the frame was accepted.
    pub async fn send_audio(&self, frame: &[u8]) -> Result<bool, AsrError> {
        if frame.is_empty() {
            warn!("empty audio frame, ignoring");
            return Ok(false);
        }

        let count = self.frames_in.fetch_add(1, Ordering::Relaxed) + 1;
        match self.state() {
            SessionState::Closed | SessionState::Failed => {
                if count % 100 == 1 {
                    warn!(frame = count, state = ?self.state(), "dropping audio frame");
                }
                return Ok(false);
            }
            _ => {}
        }

        let conditioned = audio::apply_gain(frame, self.config.audio_gain);
        if count % 100 == 1 {
            debug!(frame = count, bytes = conditioned.len(), "queueing audio frame");
        }

        self.audio_tx
            .send(Bytes::from(conditioned))
            .await
            .map_err(|_| AsrError::SessionClosed)?;
        Ok(true)
    }

    /// Force a final result boundary for the in-flight utterance using the
    /// configured drain mode.
    pub fn finalize(&self) -> Result<(), AsrError> {
        self.send_command(Command::Finalize)
    }

    /// Clear pending aggregation and flush in-flight recognition, without
    /// changing session state. Used when the consumer detects barge-in.
    pub fn interrupt(&self) -> Result<(), AsrError> {
        self.send_command(Command::Interrupt)
    }

    fn send_command(&self, command: Command) -> Result<(), AsrError> {
        let tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| AsrError::InvalidState("session not started".to_string()))?;
        tx.send(command).map_err(|_| AsrError::SessionClosed)
    }

    /// Stop the session: any state -> `Closed`. Idempotent. Waits a
    /// bounded interval for the supervising task to wind down and
    /// invalidates the transport handle on the way out.
    pub async fn stop(&mut self) -> Result<(), AsrError> {
        if self.state() == SessionState::Closed {
            return Ok(());
        }

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.supervisor.take() {
            if timeout(STOP_WAIT, handle).await.is_err() {
                warn!("supervisor did not stop within {STOP_WAIT:?}");
            }
        }
        self.command_tx = None;
        *self.state.write() = SessionState::Closed;
        info!("session stopped");
        Ok(())
    }
}

/// Outcome of one connection's streaming loop.
enum Outcome {
    /// `stop()` was requested.
    Shutdown,
    /// The provider closed the utterance/session; reconnect promptly.
    Drained,
    /// The connection failed; the message drives failure classification.
    Failed(String),
}

/// The supervising task: owns the state machine, timeline, aggregator and
/// reconnect policy for one session.
struct Supervisor<T: Transport> {
    transport: Arc<T>,
    config: AsrConfig,
    state: Arc<RwLock<SessionState>>,
    rotator: Arc<Mutex<CredentialRotator>>,
    callbacks: Arc<CallbackSet>,
    /// Clone of the producer side, used by the mute-package drain to push
    /// silence through the normal audio path.
    audio_tx: mpsc::Sender<Bytes>,
    audio_rx: mpsc::Receiver<Bytes>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    shutdown_rx: broadcast::Receiver<()>,
    timeline: AudioTimeline,
    aggregator: ResultAggregator,
    backoff: BackoffController,
    pending_finalize: bool,
}

impl<T: Transport> Supervisor<T> {
    async fn run(mut self) {
        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(_) => {}
            }

            self.set_state(SessionState::Connecting);
            // Separate statement: the rotator guard must drop before
            // `fail` takes `&mut self`.
            let credential = self.rotator.lock().current().map(str::to_string);
            let credential = match credential {
                Some(c) => c,
                None => {
                    self.fail("no credentials configured").await;
                    return;
                }
            };

            match self.transport.connect(&credential, &self.config).await {
                Ok((handle, events)) => {
                    debug!(
                        credential_index = self.rotator.lock().current_index(),
                        "connection established, awaiting recognition start"
                    );
                    match self.run_connection(handle, events).await {
                        Outcome::Shutdown => break,
                        Outcome::Drained => {
                            self.set_state(SessionState::Reconnecting);
                            // Pace reconnects without penalizing a clean
                            // drain with the full backoff ramp.
                            let floor = Duration::from_millis(self.config.retry_initial_ms);
                            if self.sleep_or_shutdown(floor).await {
                                break;
                            }
                        }
                        Outcome::Failed(message) => {
                            if !self.handle_failure(&message).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "connect attempt failed");
                    if !self.handle_failure(&e.to_string()).await {
                        return;
                    }
                }
            }
        }

        self.aggregator.clear();
        self.set_state(SessionState::Closed);
    }

    /// Drive one live connection until it ends. Always closes the handle
    /// before returning so no stale connection outlives this scope.
    async fn run_connection(
        &mut self,
        mut handle: T::Handle,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Outcome {
        let mut streaming = false;
        let mut draining = false;

        let outcome = loop {
            let Self {
                audio_rx,
                command_rx,
                shutdown_rx,
                timeline,
                aggregator,
                callbacks,
                config,
                audio_tx,
                backoff,
                state,
                pending_finalize,
                ..
            } = self;

            tokio::select! {
                _ = shutdown_rx.recv() => break Outcome::Shutdown,

                event = events.recv() => match event {
                    None => break Outcome::Failed("connection lost".to_string()),
                    Some(TransportEvent::SessionStarted { session_id }) => {
                        info!(?session_id, "recognition started");
                        streaming = true;
                        *state.write() = SessionState::Streaming;
                        // Fold the previous connection's audio into the
                        // base offset; done exactly once per reconnect.
                        timeline.reset();
                        backoff.on_success();
                    }
                    Some(TransportEvent::Partial(msg)) => {
                        for segment in aggregator.handle_partial(&msg, timeline) {
                            callbacks.emit_segment(segment).await;
                        }
                    }
                    Some(TransportEvent::Final(msg)) => {
                        let mut saw_final = false;
                        for segment in aggregator.handle_final(&msg, timeline) {
                            saw_final |= segment.is_final;
                            callbacks.emit_segment(segment).await;
                        }
                        if saw_final && *pending_finalize {
                            *pending_finalize = false;
                            callbacks.emit_finalize(FinalizeSignal::Ended).await;
                        }
                    }
                    Some(TransportEvent::Info(reason)) => {
                        debug!(reason = %reason, "provider info");
                    }
                    Some(TransportEvent::Warning(reason)) => {
                        warn!(reason = %reason, "provider warning");
                    }
                    Some(TransportEvent::Malformed(message)) => {
                        // Skip the message and keep the connection; a
                        // garbled payload is not a connection failure and
                        // must never reach quota classification.
                        warn!(message = %message, "malformed provider message, skipping");
                        callbacks.emit_error(ErrorEvent::non_fatal(&message)).await;
                    }
                    Some(TransportEvent::Error { message, code }) => {
                        error!(message = %message, ?code, "provider error");
                        if !is_quota_error(&message) {
                            let mut event = ErrorEvent::non_fatal(&message);
                            if let Some(code) = code {
                                event = event.with_vendor_code(code);
                            }
                            callbacks.emit_error(event).await;
                        }
                        break Outcome::Failed(message);
                    }
                    Some(TransportEvent::SessionEnded) => {
                        info!(draining, "provider ended the session");
                        break Outcome::Drained;
                    }
                },

                command = command_rx.recv() => match command {
                    None => break Outcome::Shutdown,
                    Some(Command::Finalize) => {
                        *pending_finalize = true;
                        callbacks.emit_finalize(FinalizeSignal::Began).await;
                        match config.drain_mode {
                            DrainMode::Disconnect => {
                                draining = true;
                                *state.write() = SessionState::Draining;
                                if let Err(e) = handle.flush().await {
                                    break Outcome::Failed(e.to_string());
                                }
                            }
                            DrainMode::MutePackage => {
                                let silence = audio::silence_chunk(
                                    config.sample_rate,
                                    config.mute_chunk_ms,
                                );
                                if audio_tx.try_send(Bytes::from(silence)).is_err() {
                                    warn!("audio queue full, mute package dropped");
                                }
                            }
                        }
                    }
                    Some(Command::Interrupt) => {
                        aggregator.clear();
                        if let Err(e) = handle.flush().await {
                            break Outcome::Failed(e.to_string());
                        }
                    }
                },

                // No writes after EndOfStream: while draining, chunks
                // stay queued for the next connection.
                chunk = audio_rx.recv(), if streaming && !draining => match chunk {
                    None => break Outcome::Shutdown,
                    Some(chunk) => {
                        let duration =
                            audio::chunk_duration_ms(chunk.len(), config.sample_rate);
                        if let Err(e) = handle.send_audio(chunk).await {
                            break Outcome::Failed(e.to_string());
                        }
                        timeline.add_audio(duration);
                    }
                },
            }
        };

        // Explicit handle invalidation: never leave a reference to a
        // closed connection behind.
        let _ = handle.close().await;
        outcome
    }

    /// Classify a connection failure and decide whether to keep going.
    /// Returns false when the session is terminally failed.
    async fn handle_failure(&mut self, message: &str) -> bool {
        self.set_state(SessionState::Reconnecting);

        if is_quota_error(message) {
            warn!(message = %message, "quota/authorization failure, rotating credential");
            let rotation = self.rotator.lock().rotate().map(str::to_string);
            match rotation {
                Ok(_) => {
                    if self.rotator.lock().has_multiple() {
                        info!(
                            credential_index = self.rotator.lock().current_index(),
                            "switched credential, reconnecting"
                        );
                        // Fresh credential: reconnect immediately.
                        return true;
                    }
                    // Single-credential set: nothing to switch to, fall
                    // through to the backoff path below.
                }
                Err(AsrError::CredentialsExhausted) => {
                    self.fail("all credentials exhausted").await;
                    return false;
                }
                Err(e) => {
                    self.fail(&e.to_string()).await;
                    return false;
                }
            }
        }

        let delay = self.backoff.on_failure();
        debug!(?delay, "reconnect backoff");
        !self.sleep_or_shutdown(delay).await
    }

    /// Terminal failure: report once, park in `Failed`, no more retries.
    async fn fail(&mut self, message: &str) {
        error!(message = %message, "session failed");
        self.set_state(SessionState::Failed);
        self.aggregator.clear();
        self.callbacks.emit_error(ErrorEvent::fatal(message)).await;
    }

    /// Sleep unless shutdown arrives first; true means shutdown.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.recv() => true,
            _ = sleep(delay) => false,
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = ?*state, to = ?next, "session state transition");
            *state = next;
        }
    }
}

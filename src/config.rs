//! Session configuration.
//!
//! The configuration surface mirrors what the host hands us as JSON.
//! Loading is lenient by design: malformed input falls back to documented
//! defaults and surfaces a non-fatal configuration error instead of
//! refusing to start, and out-of-range numeric values are clamped with a
//! logged warning.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AsrError;

/// Default real-time endpoint used when the configured URL is empty.
pub const DEFAULT_ENDPOINT: &str = "wss://eu2.rt.speechmatics.com/v2";

/// Diarization mode requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiarizationMode {
    None,
    #[default]
    Speaker,
    Channel,
    ChannelAndSpeaker,
}

/// How a forced-final request is delivered to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// Flush and close the current utterance; the session reconnects and
    /// the provider emits its final on teardown.
    #[default]
    Disconnect,
    /// Push a synthetic silence chunk through the normal audio path to
    /// coax a final boundary without dropping the connection.
    #[serde(alias = "mute_pkg")]
    MutePackage,
}

/// Segment production mode for the aggregator. Fixed for the lifetime of a
/// session; never switched mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalMode {
    /// Buffer tokens until end-of-sentence, then flush one final segment.
    #[default]
    Sentence,
    /// Emit every final word as its own final segment.
    Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxDelayMode {
    #[default]
    Flexible,
    Fixed,
}

/// Full configuration for one streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Ordered credential list; rotation order under quota failures.
    pub credentials: Vec<String>,
    /// Provider endpoint. Empty falls back to [`DEFAULT_ENDPOINT`].
    pub url: String,
    pub language: String,
    pub sample_rate: u32,
    /// Audio chunk duration advertised in the provider handshake.
    pub chunk_ms: u32,
    /// Gain applied to inbound PCM before transmission (1.0 - 10.0).
    pub audio_gain: f32,
    pub enable_partials: bool,
    pub final_mode: FinalMode,
    pub drain_mode: DrainMode,
    /// Silence length pushed for the mute-package drain mode.
    pub mute_chunk_ms: u32,
    pub diarization: DiarizationMode,
    /// 2 - 100 speakers.
    pub max_speakers: u32,
    /// 0.0 - 1.0; lower separates speakers more eagerly.
    pub speaker_sensitivity: f32,
    pub prefer_current_speaker: bool,
    pub channel_labels: Vec<String>,
    pub operating_point: String,
    pub max_delay: f32,
    pub max_delay_mode: MaxDelayMode,
    /// Entries are `word` or `word|weight`; malformed entries are skipped
    /// with a warning.
    pub hotwords: Vec<String>,
    /// Backoff floor in milliseconds.
    pub retry_initial_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub retry_max_ms: u64,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            credentials: Vec::new(),
            url: DEFAULT_ENDPOINT.to_string(),
            language: "en".to_string(),
            sample_rate: 16000,
            chunk_ms: 160,
            audio_gain: 7.0,
            enable_partials: true,
            final_mode: FinalMode::Sentence,
            drain_mode: DrainMode::Disconnect,
            mute_chunk_ms: 1500,
            diarization: DiarizationMode::Speaker,
            max_speakers: 10,
            speaker_sensitivity: 0.35,
            prefer_current_speaker: true,
            channel_labels: Vec::new(),
            operating_point: "enhanced".to_string(),
            max_delay: 0.7,
            max_delay_mode: MaxDelayMode::Flexible,
            hotwords: Vec::new(),
            retry_initial_ms: 500,
            retry_max_ms: 30_000,
        }
    }
}

impl AsrConfig {
    /// Strict JSON load. Unknown fields are ignored, missing fields take
    /// their defaults; only syntactically broken input fails.
    pub fn from_json(raw: &str) -> Result<Self, AsrError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| AsrError::Configuration(e.to_string()))?;
        Ok(config.normalized())
    }

    /// Lenient JSON load: broken input yields the documented defaults plus
    /// the configuration error for the caller to surface as non-fatal.
    pub fn from_json_lenient(raw: &str) -> (Self, Option<AsrError>) {
        match Self::from_json(raw) {
            Ok(config) => (config, None),
            Err(e) => {
                warn!(error = %e, "invalid configuration, falling back to defaults");
                (Self::default().normalized(), Some(e))
            }
        }
    }

    /// Clamp out-of-range values to their documented bounds and apply the
    /// default endpoint for an empty URL.
    pub fn normalized(mut self) -> Self {
        if self.url.trim().is_empty() {
            self.url = DEFAULT_ENDPOINT.to_string();
        }
        if !(1.0..=10.0).contains(&self.audio_gain) {
            warn!(gain = self.audio_gain, "audio_gain out of range, clamping");
            self.audio_gain = self.audio_gain.clamp(1.0, 10.0);
        }
        if !(0.0..=1.0).contains(&self.speaker_sensitivity) {
            warn!(
                sensitivity = self.speaker_sensitivity,
                "speaker_sensitivity out of range, clamping"
            );
            self.speaker_sensitivity = self.speaker_sensitivity.clamp(0.0, 1.0);
        }
        if !(2..=100).contains(&self.max_speakers) {
            warn!(
                max_speakers = self.max_speakers,
                "max_speakers out of range, clamping"
            );
            self.max_speakers = self.max_speakers.clamp(2, 100);
        }
        if self.sample_rate == 0 {
            warn!("sample_rate of zero is invalid, using 16000");
            self.sample_rate = 16000;
        }
        if self.chunk_ms == 0 {
            warn!("chunk_ms of zero is invalid, using 160");
            self.chunk_ms = 160;
        }
        self
    }

    /// Audio chunk size in bytes for 16-bit mono PCM at the configured
    /// sample rate and chunk duration.
    pub fn chunk_bytes(&self) -> usize {
        (self.sample_rate as usize * 2 / 1000) * self.chunk_ms as usize
    }

    /// Hotword entries with any `|weight` suffix stripped; entries that do
    /// not match `word` or `word|digits` are skipped with a warning.
    pub fn parsed_hotwords(&self) -> Vec<String> {
        let mut parsed = Vec::new();
        for entry in &self.hotwords {
            let tokens: Vec<&str> = entry.split('|').collect();
            match tokens.as_slice() {
                [word] if !word.is_empty() => parsed.push((*word).to_string()),
                [word, weight]
                    if !word.is_empty() && weight.chars().all(|c| c.is_ascii_digit()) =>
                {
                    parsed.push((*word).to_string());
                }
                _ => warn!(entry = %entry, "invalid hotword entry, skipping"),
            }
        }
        parsed
    }
}

//! Provider message payloads.
//!
//! The provider sends JSON text messages. Transcript-bearing messages come
//! in two shapes: partial/word-final messages carry the assembled text in
//! `metadata`, and token-level messages carry per-word entries in
//! `results`, each with timing, an end-of-sentence flag and ranked
//! alternatives. All provider timestamps are seconds; they are converted
//! to milliseconds at ingestion and never leave this crate as seconds.

use serde::Deserialize;

/// Convert a provider timestamp in seconds to whole milliseconds.
pub fn secs_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0) as u64
    } else {
        0
    }
}

/// A transcript-bearing message from the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptMessage {
    #[serde(default)]
    pub metadata: Option<TranscriptMetadata>,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
}

impl TranscriptMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Speaker of the first alternative of the first result entry, or
    /// `None` when absent, blank or unparsable. Callers substitute the
    /// unset sentinel; an empty string is never propagated.
    pub fn first_speaker(&self) -> Option<&str> {
        let alt = self.results.first()?.alternatives.first()?;
        let speaker = alt.speaker.as_deref()?.trim();
        if speaker.is_empty() {
            None
        } else {
            Some(speaker)
        }
    }

    /// Channel label of the first result entry, normalised to a string.
    pub fn first_channel(&self) -> Option<String> {
        let channel = self.results.first()?.channel.as_ref()?.to_label();
        if channel.is_empty() {
            None
        } else {
            Some(channel)
        }
    }
}

/// Pre-assembled transcript text with message-level timing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptMetadata {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
}

impl TranscriptMetadata {
    pub fn start_ms(&self) -> u64 {
        secs_to_ms(self.start_time)
    }

    pub fn duration_ms(&self) -> u64 {
        secs_to_ms(self.end_time).saturating_sub(self.start_ms())
    }
}

/// One token-level entry in a transcript message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultEntry {
    /// `word` or `punctuation`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    /// End-of-sentence marker set by the provider on the closing token.
    #[serde(default)]
    pub is_eos: bool,
    #[serde(default)]
    pub channel: Option<ChannelId>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

impl ResultEntry {
    pub fn is_punctuation(&self) -> bool {
        self.kind == "punctuation"
    }

    pub fn start_ms(&self) -> u64 {
        secs_to_ms(self.start_time)
    }

    pub fn duration_ms(&self) -> u64 {
        secs_to_ms(self.end_time).saturating_sub(self.start_ms())
    }
}

/// One ranked transcription candidate for a token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub speaker: Option<String>,
}

/// Channel identifier as delivered by the transport.
///
/// Upstream sources disagree on the representation, so all three are
/// accepted in priority order: string first, then signed, then unsigned
/// integers. Everything is normalised to a string label.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChannelId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl ChannelId {
    pub fn to_label(&self) -> String {
        match self {
            ChannelId::Text(s) => s.trim().to_string(),
            ChannelId::Signed(n) => n.to_string(),
            ChannelId::Unsigned(n) => n.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_convert_to_whole_milliseconds() {
        assert_eq!(secs_to_ms(0.0), 0);
        assert_eq!(secs_to_ms(1.5), 1500);
        assert_eq!(secs_to_ms(-2.0), 0);
        assert_eq!(secs_to_ms(f64::NAN), 0);
    }

    #[test]
    fn parses_partial_message_with_metadata() {
        let msg = TranscriptMessage::parse(
            r#"{
                "metadata": {"transcript": "hello there", "start_time": 1.0, "end_time": 2.2},
                "results": [
                    {"type": "word", "start_time": 1.0, "end_time": 1.4,
                     "alternatives": [{"content": "hello", "speaker": "S2"}]}
                ]
            }"#,
        )
        .unwrap();

        let meta = msg.metadata.as_ref().unwrap();
        assert_eq!(meta.transcript, "hello there");
        assert_eq!(meta.start_ms(), 1000);
        assert_eq!(meta.duration_ms(), 1200);
        assert_eq!(msg.first_speaker(), Some("S2"));
    }

    #[test]
    fn missing_or_blank_speaker_is_none() {
        let msg = TranscriptMessage::parse(
            r#"{"results": [{"type": "word", "alternatives": [{"content": "hi"}]}]}"#,
        )
        .unwrap();
        assert_eq!(msg.first_speaker(), None);

        let msg = TranscriptMessage::parse(
            r#"{"results": [{"type": "word", "alternatives": [{"content": "hi", "speaker": "  "}]}]}"#,
        )
        .unwrap();
        assert_eq!(msg.first_speaker(), None);
    }

    #[test]
    fn channel_id_accepts_three_representations() {
        for (raw, expected) in [
            (r#"{"results": [{"channel": "Agent"}]}"#, "Agent"),
            (r#"{"results": [{"channel": -3}]}"#, "-3"),
            (r#"{"results": [{"channel": 18446744073709551615}]}"#, "18446744073709551615"),
        ] {
            let msg = TranscriptMessage::parse(raw).unwrap();
            assert_eq!(msg.first_channel().as_deref(), Some(expected));
        }
    }

    #[test]
    fn eos_and_punctuation_flags() {
        let msg = TranscriptMessage::parse(
            r#"{"results": [
                {"type": "word", "start_time": 0.1, "end_time": 0.4,
                 "alternatives": [{"content": "done"}]},
                {"type": "punctuation", "start_time": 0.4, "end_time": 0.4,
                 "is_eos": true, "alternatives": [{"content": "."}]}
            ]}"#,
        )
        .unwrap();
        assert!(!msg.results[0].is_punctuation());
        assert!(msg.results[1].is_punctuation());
        assert!(msg.results[1].is_eos);
        assert_eq!(msg.results[0].duration_ms(), 300);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(TranscriptMessage::parse("{\"results\": [{]").is_err());
    }
}

//! Word-to-sentence aggregation of provider results.
//!
//! The provider emits token-level results; downstream consumers want
//! ordered transcript segments. Two mutually exclusive modes, fixed at
//! configuration time:
//!
//! - **Word-final**: every final message becomes a final segment as-is,
//!   every partial becomes a non-final segment. No buffering.
//! - **Sentence-final**: tokens accumulate in a pending buffer until the
//!   provider flags end-of-sentence, then flush as one final segment.
//!   While the buffer is non-empty a non-final preview is re-emitted after
//!   every message, so consumers see incremental text without losing
//!   confirmed words.
//!
//! All timestamps produced here are session-absolute milliseconds, mapped
//! through the [`AudioTimeline`] so they stay monotonic across reconnects.

use tracing::debug;

use crate::config::FinalMode;
use crate::timeline::AudioTimeline;
use crate::transport::messages::TranscriptMessage;

/// Sentinel for an unknown speaker or channel. Never an empty string.
pub const LABEL_UNSET: &str = "NONE";

/// Immutable per-word token. Speaker/channel may be empty here; the
/// sentinel is only substituted at segment construction.
#[derive(Debug, Clone, PartialEq)]
pub struct WordToken {
    pub text: String,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub is_punctuation: bool,
    pub speaker: String,
    pub channel: String,
}

/// One ordered transcript segment handed to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    pub is_final: bool,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub language: String,
    pub words: Vec<WordToken>,
    pub speaker: String,
    pub channel: String,
}

/// Join tokens into sentence text: punctuation attaches without a leading
/// space, words are space-joined.
pub fn join_tokens(tokens: &[WordToken]) -> String {
    let mut text = String::new();
    for token in tokens {
        if !text.is_empty() && !token.is_punctuation {
            text.push(' ');
        }
        text.push_str(&token.text);
    }
    text
}

fn sentence_start_ms(tokens: &[WordToken]) -> u64 {
    tokens.first().map(|t| t.start_ms).unwrap_or(0)
}

fn sentence_duration_ms(tokens: &[WordToken]) -> u64 {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => {
            (last.start_ms + last.duration_ms).saturating_sub(first.start_ms)
        }
        _ => 0,
    }
}

/// First non-empty label among the tokens, else the unset sentinel.
fn first_label<'a, F: Fn(&'a WordToken) -> &'a str>(tokens: &'a [WordToken], pick: F) -> String {
    tokens
        .iter()
        .map(pick)
        .find(|label| !label.is_empty())
        .unwrap_or(LABEL_UNSET)
        .to_string()
}

/// Consumes provider messages, produces ordered transcript segments.
#[derive(Debug)]
pub struct ResultAggregator {
    mode: FinalMode,
    language: String,
    /// Pending sentence buffer. Owned here; cleared on flush, on stop and
    /// on forced interruption.
    pending: Vec<WordToken>,
}

impl ResultAggregator {
    pub fn new(mode: FinalMode, language: impl Into<String>) -> Self {
        Self {
            mode,
            language: language.into(),
            pending: Vec::new(),
        }
    }

    pub fn mode(&self) -> FinalMode {
        self.mode
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop all buffered tokens. Used on stop and on interruption.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "clearing pending sentence buffer");
            self.pending.clear();
        }
    }

    /// Process a partial (revisable) message.
    ///
    /// Sentence-final mode ignores partials entirely; confirmed tokens
    /// already drive the preview cadence.
    pub fn handle_partial(
        &mut self,
        msg: &TranscriptMessage,
        timeline: &AudioTimeline,
    ) -> Vec<TranscriptSegment> {
        if self.mode != FinalMode::Word {
            return Vec::new();
        }

        let Some(meta) = msg.metadata.as_ref() else {
            return Vec::new();
        };
        if meta.transcript.is_empty() {
            return Vec::new();
        }

        vec![TranscriptSegment {
            text: meta.transcript.clone(),
            is_final: false,
            start_ms: timeline.absolute_ms(meta.start_ms()),
            duration_ms: meta.duration_ms(),
            language: self.language.clone(),
            words: Vec::new(),
            speaker: msg
                .first_speaker()
                .unwrap_or(LABEL_UNSET)
                .to_string(),
            channel: msg.first_channel().unwrap_or_else(|| LABEL_UNSET.to_string()),
        }]
    }

    /// Process a final (non-revisable) message.
    pub fn handle_final(
        &mut self,
        msg: &TranscriptMessage,
        timeline: &AudioTimeline,
    ) -> Vec<TranscriptSegment> {
        match self.mode {
            FinalMode::Word => self.word_final(msg, timeline),
            FinalMode::Sentence => self.sentence_final(msg, timeline),
        }
    }

    fn word_final(
        &mut self,
        msg: &TranscriptMessage,
        timeline: &AudioTimeline,
    ) -> Vec<TranscriptSegment> {
        let Some(meta) = msg.metadata.as_ref() else {
            return Vec::new();
        };
        if meta.transcript.is_empty() {
            return Vec::new();
        }

        vec![TranscriptSegment {
            text: meta.transcript.clone(),
            is_final: true,
            start_ms: timeline.absolute_ms(meta.start_ms()),
            duration_ms: meta.duration_ms(),
            language: self.language.clone(),
            words: Vec::new(),
            speaker: msg
                .first_speaker()
                .unwrap_or(LABEL_UNSET)
                .to_string(),
            channel: msg.first_channel().unwrap_or_else(|| LABEL_UNSET.to_string()),
        }]
    }

    fn sentence_final(
        &mut self,
        msg: &TranscriptMessage,
        timeline: &AudioTimeline,
    ) -> Vec<TranscriptSegment> {
        let mut segments = Vec::new();

        for entry in &msg.results {
            if let Some(alt) = entry.alternatives.first() {
                if !alt.content.is_empty() {
                    self.pending.push(WordToken {
                        text: alt.content.clone(),
                        start_ms: timeline.absolute_ms(entry.start_ms()),
                        duration_ms: entry.duration_ms(),
                        is_punctuation: entry.is_punctuation(),
                        speaker: alt.speaker.clone().unwrap_or_default(),
                        channel: entry
                            .channel
                            .as_ref()
                            .map(|c| c.to_label())
                            .unwrap_or_default(),
                    });
                }
            }

            if entry.is_eos {
                segments.push(self.flush_sentence(true));
            }
        }

        // Mid-sentence leftovers become a non-final preview on every
        // message until the sentence closes, even if unchanged.
        if !self.pending.is_empty() {
            segments.push(self.preview_segment());
        }

        segments
    }

    fn flush_sentence(&mut self, is_final: bool) -> TranscriptSegment {
        let segment = TranscriptSegment {
            text: join_tokens(&self.pending),
            is_final,
            start_ms: sentence_start_ms(&self.pending),
            duration_ms: sentence_duration_ms(&self.pending),
            language: self.language.clone(),
            words: self.pending.clone(),
            speaker: first_label(&self.pending, |t| &t.speaker),
            channel: first_label(&self.pending, |t| &t.channel),
        };
        self.pending.clear();
        segment
    }

    fn preview_segment(&self) -> TranscriptSegment {
        TranscriptSegment {
            text: join_tokens(&self.pending),
            is_final: false,
            start_ms: sentence_start_ms(&self.pending),
            duration_ms: sentence_duration_ms(&self.pending),
            language: self.language.clone(),
            words: self.pending.clone(),
            speaker: first_label(&self.pending, |t| &t.speaker),
            channel: first_label(&self.pending, |t| &t.channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline() -> AudioTimeline {
        AudioTimeline::new()
    }

    fn word(content: &str, start: f64, end: f64, eos: bool) -> serde_json::Value {
        serde_json::json!({
            "type": "word",
            "start_time": start,
            "end_time": end,
            "is_eos": eos,
            "alternatives": [{"content": content}]
        })
    }

    fn punct(content: &str, at: f64, eos: bool) -> serde_json::Value {
        serde_json::json!({
            "type": "punctuation",
            "start_time": at,
            "end_time": at,
            "is_eos": eos,
            "alternatives": [{"content": content}]
        })
    }

    fn message(results: Vec<serde_json::Value>) -> TranscriptMessage {
        serde_json::from_value(serde_json::json!({ "results": results })).unwrap()
    }

    #[test]
    fn join_attaches_punctuation_without_space() {
        let tokens = vec![
            WordToken {
                text: "hello".into(),
                start_ms: 0,
                duration_ms: 300,
                is_punctuation: false,
                speaker: String::new(),
                channel: String::new(),
            },
            WordToken {
                text: "world".into(),
                start_ms: 300,
                duration_ms: 300,
                is_punctuation: false,
                speaker: String::new(),
                channel: String::new(),
            },
            WordToken {
                text: ".".into(),
                start_ms: 600,
                duration_ms: 0,
                is_punctuation: true,
                speaker: String::new(),
                channel: String::new(),
            },
        ];
        assert_eq!(join_tokens(&tokens), "hello world.");
    }

    #[test]
    fn sentence_flushes_on_eos_and_empties_buffer() {
        let mut agg = ResultAggregator::new(FinalMode::Sentence, "en");
        let tl = timeline();

        let msg = message(vec![
            word("hello", 0.0, 0.4, false),
            word("world", 0.4, 0.8, false),
            punct(".", 0.8, true),
        ]);
        let segments = agg.handle_final(&msg, &tl);

        assert_eq!(segments.len(), 1);
        let seg = &segments[0];
        assert!(seg.is_final);
        assert_eq!(seg.text, "hello world.");
        assert_eq!(seg.start_ms, 0);
        assert_eq!(seg.duration_ms, 800);
        assert_eq!(seg.words.len(), 3);
        assert_eq!(agg.pending_len(), 0);
    }

    #[test]
    fn mid_sentence_tokens_emit_non_final_preview() {
        let mut agg = ResultAggregator::new(FinalMode::Sentence, "en");
        let tl = timeline();

        let segments = agg.handle_final(&message(vec![word("hello", 0.0, 0.4, false)]), &tl);
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].is_final);
        assert_eq!(segments[0].text, "hello");
        assert_eq!(agg.pending_len(), 1);

        // Preview repeats on the next message even though nothing flushed.
        let segments = agg.handle_final(&message(vec![word("there", 0.4, 0.8, false)]), &tl);
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].is_final);
        assert_eq!(segments[0].text, "hello there");
    }

    #[test]
    fn eos_followed_by_leftovers_emits_final_then_preview() {
        let mut agg = ResultAggregator::new(FinalMode::Sentence, "en");
        let tl = timeline();

        let msg = message(vec![
            word("done", 0.0, 0.3, false),
            punct(".", 0.3, true),
            word("next", 0.5, 0.8, false),
        ]);
        let segments = agg.handle_final(&msg, &tl);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].is_final);
        assert_eq!(segments[0].text, "done.");
        assert!(!segments[1].is_final);
        assert_eq!(segments[1].text, "next");
        assert_eq!(agg.pending_len(), 1);
    }

    #[test]
    fn sentence_speaker_is_first_non_empty() {
        let mut agg = ResultAggregator::new(FinalMode::Sentence, "en");
        let tl = timeline();

        let msg: TranscriptMessage = serde_json::from_value(serde_json::json!({
            "results": [
                {"type": "word", "start_time": 0.0, "end_time": 0.3,
                 "alternatives": [{"content": "hi"}]},
                {"type": "word", "start_time": 0.3, "end_time": 0.6,
                 "alternatives": [{"content": "you", "speaker": "S2"}]},
                {"type": "word", "start_time": 0.6, "end_time": 0.9, "is_eos": true,
                 "alternatives": [{"content": "there", "speaker": "S3"}]}
            ]
        }))
        .unwrap();

        let segments = agg.handle_final(&msg, &tl);
        assert_eq!(segments[0].speaker, "S2"); // first non-empty wins
    }

    #[test]
    fn absent_speaker_uses_sentinel_never_empty() {
        let mut agg = ResultAggregator::new(FinalMode::Sentence, "en");
        let tl = timeline();

        let segments = agg.handle_final(&message(vec![word("hi", 0.0, 0.2, true)]), &tl);
        assert_eq!(segments[0].speaker, LABEL_UNSET);
        assert_eq!(segments[0].channel, LABEL_UNSET);
    }

    #[test]
    fn word_mode_emits_one_final_segment_per_message() {
        let mut agg = ResultAggregator::new(FinalMode::Word, "en");
        let tl = timeline();

        let msg: TranscriptMessage = serde_json::from_value(serde_json::json!({
            "metadata": {"transcript": "hello", "start_time": 1.0, "end_time": 1.4},
            "results": [
                {"type": "word", "start_time": 1.0, "end_time": 1.4,
                 "alternatives": [{"content": "hello", "speaker": "S1"}]}
            ]
        }))
        .unwrap();

        let segments = agg.handle_final(&msg, &tl);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_final);
        assert_eq!(segments[0].text, "hello");
        assert_eq!(segments[0].speaker, "S1");
        assert_eq!(segments[0].start_ms, 1000);
        assert_eq!(segments[0].duration_ms, 400);
        assert_eq!(agg.pending_len(), 0);
    }

    #[test]
    fn word_mode_partial_is_non_final_without_word_detail() {
        let mut agg = ResultAggregator::new(FinalMode::Word, "en");
        let tl = timeline();

        let msg: TranscriptMessage = serde_json::from_value(serde_json::json!({
            "metadata": {"transcript": "hel", "start_time": 1.0, "end_time": 1.2}
        }))
        .unwrap();

        let segments = agg.handle_partial(&msg, &tl);
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].is_final);
        assert!(segments[0].words.is_empty());
        assert_eq!(segments[0].speaker, LABEL_UNSET);
    }

    #[test]
    fn sentence_mode_ignores_partials() {
        let mut agg = ResultAggregator::new(FinalMode::Sentence, "en");
        let tl = timeline();

        let msg: TranscriptMessage = serde_json::from_value(serde_json::json!({
            "metadata": {"transcript": "hel"}
        }))
        .unwrap();
        assert!(agg.handle_partial(&msg, &tl).is_empty());
    }

    #[test]
    fn empty_transcript_emits_nothing() {
        let mut agg = ResultAggregator::new(FinalMode::Word, "en");
        let tl = timeline();
        let msg: TranscriptMessage =
            serde_json::from_value(serde_json::json!({"metadata": {"transcript": ""}})).unwrap();
        assert!(agg.handle_final(&msg, &tl).is_empty());
        assert!(agg.handle_partial(&msg, &tl).is_empty());
    }

    #[test]
    fn timeline_offset_shifts_segment_starts() {
        let mut agg = ResultAggregator::new(FinalMode::Sentence, "en");
        let mut tl = timeline();
        tl.add_audio(5000);
        tl.reset(); // base offset now 5000 ms

        let segments = agg.handle_final(&message(vec![word("hi", 1.0, 1.5, true)]), &tl);
        assert_eq!(segments[0].start_ms, 6000);
    }

    #[test]
    fn clear_drops_pending_tokens() {
        let mut agg = ResultAggregator::new(FinalMode::Sentence, "en");
        let tl = timeline();
        agg.handle_final(&message(vec![word("hi", 0.0, 0.2, false)]), &tl);
        assert_eq!(agg.pending_len(), 1);
        agg.clear();
        assert_eq!(agg.pending_len(), 0);
    }
}

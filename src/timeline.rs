//! Session-absolute audio timeline across provider reconnects.
//!
//! The provider's own clock restarts at zero on every new connection, but
//! the transcript must carry timestamps that keep increasing for the whole
//! life of a session. `AudioTimeline` tracks how much audio has been
//! submitted on the current connection and folds that into a base offset on
//! each successful reconnect, so provider-relative times can be mapped to
//! session-absolute milliseconds.

/// Monotonic offset record for one session.
///
/// Provider-relative timestamps within a single connection are trusted to
/// be non-decreasing (a provider contract, not enforced here); given that,
/// absolute timestamps produced by [`AudioTimeline::absolute_ms`] are
/// non-decreasing across any sequence of resets.
#[derive(Debug, Default)]
pub struct AudioTimeline {
    /// Audio duration accumulated before the most recent reset.
    base_offset_ms: u64,
    /// Audio submitted since the last reset, advanced by the transmit path.
    cursor_ms: u64,
}

impl AudioTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the current cursor into the base offset and zero the cursor.
    ///
    /// Called exactly once per successful (re)connection acknowledgment,
    /// on the provider's "recognition started" signal.
    pub fn reset(&mut self) {
        self.base_offset_ms += self.cursor_ms;
        self.cursor_ms = 0;
    }

    /// Record audio submitted to the transport. Advanced as chunks are
    /// sent, independent of provider acknowledgment.
    pub fn add_audio(&mut self, duration_ms: u64) {
        self.cursor_ms += duration_ms;
    }

    /// Map a provider-relative timestamp to session-absolute time.
    pub fn absolute_ms(&self, provider_ms: u64) -> u64 {
        self.base_offset_ms + provider_ms
    }

    /// Audio submitted since the last reset.
    pub fn total_audio_duration_ms(&self) -> u64 {
        self.cursor_ms
    }

    /// Audio accumulated before the last reset.
    pub fn base_offset_ms(&self) -> u64 {
        self.base_offset_ms
    }
}

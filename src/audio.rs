//! Audio conditioning for the transmit path.
//!
//! The provider expects linear 16-bit little-endian PCM. Capture pipelines
//! frequently deliver audio that is too quiet for reliable recognition, so
//! every chunk is run through a gain stage before it is queued for
//! transmission. The transform is pure: no state, no I/O.

use tracing::warn;

/// Apply a gain factor to a chunk of 16-bit little-endian PCM samples,
/// saturating to the signed 16-bit range instead of wrapping.
///
/// An empty chunk yields an empty chunk. An odd trailing byte (incomplete
/// sample) is passed through unchanged; both cases log a warning and are
/// not errors.
pub fn apply_gain(raw: &[u8], gain: f32) -> Vec<u8> {
    if raw.is_empty() {
        warn!("audio chunk is empty, nothing to condition");
        return Vec::new();
    }

    let mut out = Vec::with_capacity(raw.len());
    let pairs = raw.chunks_exact(2);
    let remainder = pairs.remainder();

    for pair in pairs {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        let amplified = (f32::from(sample) * gain)
            .round()
            .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        out.extend_from_slice(&amplified.to_le_bytes());
    }

    if !remainder.is_empty() {
        warn!(
            len = raw.len(),
            "audio chunk has an odd trailing byte, passing it through unchanged"
        );
        out.extend_from_slice(remainder);
    }

    out
}

/// Build a silence chunk of the given duration for the mute-package drain
/// mode: all-zero 16-bit mono PCM at the session sample rate.
pub fn silence_chunk(sample_rate: u32, duration_ms: u32) -> Vec<u8> {
    let samples = (u64::from(sample_rate) * u64::from(duration_ms)) / 1000;
    vec![0u8; (samples * 2) as usize]
}

/// Duration in milliseconds represented by a chunk of 16-bit mono PCM.
pub fn chunk_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (byte_len as u64 * 1000) / (u64::from(sample_rate) * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn unpack(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect()
    }

    #[test]
    fn unity_gain_is_identity() {
        let input = pack(&[0, 100, -100, i16::MAX, i16::MIN]);
        assert_eq!(apply_gain(&input, 1.0), input);
    }

    #[test]
    fn gain_scales_in_range_samples() {
        let input = pack(&[100, -200, 0]);
        let out = unpack(&apply_gain(&input, 2.0));
        assert_eq!(out, vec![200, -400, 0]);
    }

    #[test]
    fn gain_saturates_instead_of_wrapping() {
        let input = pack(&[30000, -30000]);
        let out = unpack(&apply_gain(&input, 4.0));
        assert_eq!(out, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn fractional_gain_rounds() {
        let input = pack(&[3]);
        let out = unpack(&apply_gain(&input, 0.5));
        assert_eq!(out, vec![2]); // 1.5 rounds away from zero
    }

    #[test]
    fn output_always_within_i16_range() {
        let extremes = pack(&[i16::MIN, -1, 0, 1, i16::MAX]);
        for gain in [0.0, 0.5, 1.0, 7.0, 100.0] {
            for s in unpack(&apply_gain(&extremes, gain)) {
                assert!((i16::MIN..=i16::MAX).contains(&s));
            }
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(apply_gain(&[], 7.0).is_empty());
    }

    #[test]
    fn odd_trailing_byte_passes_through() {
        let mut input = pack(&[1000]);
        input.push(0x7f);
        let out = apply_gain(&input, 2.0);
        assert_eq!(out.len(), 3);
        assert_eq!(unpack(&out[..2]), vec![2000]);
        assert_eq!(out[2], 0x7f);
    }

    #[test]
    fn silence_chunk_length_matches_duration() {
        // 16 kHz mono s16le: 32 bytes per millisecond.
        assert_eq!(silence_chunk(16000, 1500).len(), 48000);
        assert!(silence_chunk(16000, 1500).iter().all(|&b| b == 0));
    }

    #[test]
    fn chunk_duration_round_trips() {
        assert_eq!(chunk_duration_ms(32000, 16000), 1000);
        assert_eq!(chunk_duration_ms(0, 16000), 0);
        assert_eq!(chunk_duration_ms(3200, 0), 0);
    }
}

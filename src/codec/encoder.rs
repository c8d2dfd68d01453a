//! Capture encoder
//!
//! Turns a window of normalized capture samples into an outbound
//! [`AudioFrame`]: computes the metering level and converts to 16-bit PCM.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::buffer::AudioFrame;
use crate::constants::{DEFAULT_LEVEL_GAIN, MAX_LEVEL, PCM_SCALE};

/// Externally observable input level in `[0, 100]`
///
/// Written by the capture path, read by UI metering. Stored as raw f32 bits
/// so neither side ever blocks.
#[derive(Debug, Default)]
pub struct LevelMeter {
    bits: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Encoder for outbound capture frames
pub struct CaptureEncoder {
    gain: f32,
    meter: Arc<LevelMeter>,
    /// Next frame sequence number
    sequence: u32,
}

impl CaptureEncoder {
    pub fn new(gain: f32, meter: Arc<LevelMeter>) -> Self {
        Self {
            gain,
            meter,
            sequence: 0,
        }
    }

    /// Encode one capture window.
    ///
    /// Updates the level meter as a side effect.
    pub fn encode(&mut self, window: &[f32]) -> AudioFrame {
        let level = level_from_rms(rms(window), self.gain);
        self.meter.set(level);

        let samples: Vec<i16> = window.iter().copied().map(to_pcm16).collect();
        let frame = AudioFrame::new(samples, level, self.sequence);

        self.sequence = self.sequence.wrapping_add(1);
        frame
    }
}

impl Default for CaptureEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL_GAIN, Arc::new(LevelMeter::new()))
    }
}

/// Root-mean-square amplitude of a window (0 for an empty window)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Map an RMS amplitude to a level in `[0, 100]`.
///
/// The result is always in range, whatever the input: NaN maps to 0,
/// infinities saturate.
pub fn level_from_rms(rms: f32, gain: f32) -> f32 {
    let level = rms * gain;
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, MAX_LEVEL)
}

/// Normalized float sample to signed 16-bit PCM, saturating on overflow.
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    // `as` saturates and maps NaN to 0
    (sample * PCM_SCALE) as i16
}

/// Little-endian byte image of 16-bit samples
pub fn pcm16_le_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(s);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_silence_is_level_zero() {
        let mut encoder = CaptureEncoder::default();
        let frame = encoder.encode(&[0.0; 4096]);
        assert_eq!(frame.level(), 0.0);
        assert!(frame.samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_clipping_is_clamped() {
        let meter = Arc::new(LevelMeter::new());
        let mut encoder = CaptureEncoder::new(DEFAULT_LEVEL_GAIN, meter.clone());
        let frame = encoder.encode(&[1.0; 256]);
        assert_eq!(frame.level(), 100.0);
        assert_eq!(meter.get(), 100.0);
    }

    #[test]
    fn test_quiet_signal_level() {
        // rms 0.1 * 400 = 40
        let level = level_from_rms(rms(&[0.1, -0.1, 0.1, -0.1]), 400.0);
        assert!((level - 40.0).abs() < 1e-3);
    }

    #[test]
    fn test_pcm_conversion_saturates() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), 32767);
        assert_eq!(to_pcm16(-1.0), -32767);
        assert_eq!(to_pcm16(3.5), i16::MAX);
        assert_eq!(to_pcm16(-3.5), i16::MIN);
        assert_eq!(to_pcm16(f32::NAN), 0);
    }

    #[test]
    fn test_le_byte_layout() {
        let bytes = pcm16_le_bytes(&[1, -2, 0x1234]);
        assert_eq!(&bytes[..], &[0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn test_sequence_advances() {
        let mut encoder = CaptureEncoder::default();
        assert_eq!(encoder.encode(&[0.0; 16]).sequence(), 0);
        assert_eq!(encoder.encode(&[0.0; 16]).sequence(), 1);
    }

    #[test]
    fn test_non_finite_input_level() {
        assert_eq!(level_from_rms(f32::NAN, 400.0), 0.0);
        assert_eq!(level_from_rms(f32::INFINITY, 400.0), 100.0);

        let mut encoder = CaptureEncoder::default();
        let frame = encoder.encode(&[f32::NAN, f32::INFINITY, -f32::INFINITY]);
        assert!((0.0..=100.0).contains(&frame.level()));
    }

    proptest! {
        #[test]
        fn prop_level_always_in_range(
            window in prop::collection::vec(-1.0e6f32..1.0e6f32, 0..512),
            dc in -10.0f32..10.0f32,
        ) {
            let mut encoder = CaptureEncoder::default();
            let shifted: Vec<f32> = window.iter().map(|s| s + dc).collect();
            let frame = encoder.encode(&shifted);
            prop_assert!((0.0..=100.0).contains(&frame.level()));
            prop_assert_eq!(frame.samples().len(), shifted.len());
        }

        #[test]
        fn prop_level_in_range_for_any_gain(r in any::<f32>(), gain in 0.0f32..1.0e9f32) {
            let level = level_from_rms(r, gain);
            prop_assert!((0.0..=100.0).contains(&level));
        }
    }
}

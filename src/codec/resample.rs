//! Channel down-mixing and sample-rate conversion
//!
//! Rate conversion runs on rubato's polynomial `FastFixedIn`: the capture
//! path streams device callbacks through [`StreamResampler`], playback
//! converts each inbound chunk in one shot with [`resample_chunk`].

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::AudioError;

/// Input block for the streaming resampler: 10ms at the source rate
const BLOCKS_PER_SECOND: u32 = 100;

/// Average interleaved frames down to mono.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn create_resampler(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<FastFixedIn<f32>, AudioError> {
    FastFixedIn::<f32>::new(
        to_rate as f64 / from_rate.max(1) as f64,
        1.0,
        PolynomialDegree::Septic,
        chunk_size.max(1),
        1,
    )
    .map_err(|e| AudioError::UnsupportedFormat(format!("resampler {}Hz -> {}Hz: {}", from_rate, to_rate, e)))
}

/// Mono resampler fed in arbitrary slices
///
/// Input is collected into fixed blocks, so the device callback size does
/// not matter and no seam appears between callbacks.
pub struct StreamResampler {
    /// `None` when both rates match
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, AudioError> {
        if from_rate == to_rate {
            return Ok(Self::passthrough());
        }
        let block = (from_rate / BLOCKS_PER_SECOND) as usize;
        Ok(Self {
            resampler: Some(create_resampler(from_rate, to_rate, block)?),
            pending: Vec::with_capacity(block * 2),
        })
    }

    pub fn passthrough() -> Self {
        Self {
            resampler: None,
            pending: Vec::new(),
        }
    }

    /// Convert what is available. A partial block waits for the next call.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };
        self.pending.extend_from_slice(input);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let mut converted = resampler
                .process(&[&self.pending[..needed]], None)
                .map_err(|e| AudioError::StreamError(format!("Resampling failed: {}", e)))?;
            self.pending.drain(..needed);
            if let Some(channel) = converted.first_mut() {
                output.append(channel);
            }
        }
        Ok(output)
    }
}

/// Convert one complete mono buffer to exactly `out_len` samples.
///
/// The interpolation delay is flushed and trimmed, so consecutive chunks
/// line up end to start.
pub fn resample_chunk(input: &[f32], from_rate: u32, to_rate: u32, out_len: usize) -> Result<Vec<f32>, AudioError> {
    if from_rate == to_rate || input.is_empty() {
        let mut output = input.to_vec();
        output.resize(out_len, 0.0);
        return Ok(output);
    }

    let mut resampler = create_resampler(from_rate, to_rate, input.len())?;
    let delay = resampler.output_delay();
    let failed = |e: rubato::ResampleError| AudioError::StreamError(format!("Resampling failed: {}", e));

    let mut output = resampler
        .process(&[input], None)
        .map_err(failed)?
        .into_iter()
        .next()
        .unwrap_or_default();
    let tail = resampler
        .process_partial(None::<&[&[f32]]>, None)
        .map_err(failed)?;
    if let Some(channel) = tail.first() {
        output.extend_from_slice(channel);
    }

    output.drain(..delay.min(output.len()));
    output.resize(out_len, 0.0);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_stream_48k_to_16k_length() {
        let mut resampler = StreamResampler::new(48_000, 16_000).unwrap();
        let mut total = 0;
        // Callback sizes that do not line up with the block size
        for _ in 0..10 {
            total += resampler.process(&[0.25; 333]).unwrap().len();
        }
        // 3330 input samples hold six full 480-sample blocks
        assert!((955..=965).contains(&total), "got {}", total);
    }

    #[test]
    fn test_stream_settles_on_dc() {
        let mut resampler = StreamResampler::new(44_100, 16_000).unwrap();
        let out = resampler.process(&[0.5; 4410]).unwrap();
        assert!(!out.is_empty());
        let settled = &out[out.len() / 2..];
        assert!(settled.iter().all(|&s| (s - 0.5).abs() < 1e-3), "{:?}", &settled[..4]);
    }

    #[test]
    fn test_passthrough() {
        let mut resampler = StreamResampler::new(16_000, 16_000).unwrap();
        assert_eq!(resampler.process(&[0.1, 0.2]).unwrap(), vec![0.1, 0.2]);
    }

    #[test]
    fn test_chunk_has_requested_length() {
        let out = resample_chunk(&[0.0; 240], 24_000, 48_000, 480).unwrap();
        assert_eq!(out.len(), 480);

        // 1001 samples at 24kHz land on 1839 or 1840 frames at 44.1kHz
        let out = resample_chunk(&[0.3; 1001], 24_000, 44_100, 1840).unwrap();
        assert_eq!(out.len(), 1840);
        assert!((out[900] - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_same_rate_chunk_is_padded_or_trimmed() {
        assert_eq!(resample_chunk(&[0.1, 0.2], 24_000, 24_000, 3).unwrap(), vec![0.1, 0.2, 0.0]);
        assert_eq!(resample_chunk(&[0.1, 0.2], 24_000, 24_000, 1).unwrap(), vec![0.1]);
    }
}

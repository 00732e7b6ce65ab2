//! # Sample Rate Conversion
//!
//! Band-limited resampling of 16-bit mono PCM between the telephony rate and the
//! rates the speech backend speaks.
//!
//! Every call builds a fresh resampler, runs the whole buffer through it and
//! flushes it, so no state carries over between chunks. The resampler's delay is
//! trimmed off, giving exactly `ceil(n * to / from)` output samples for `n` input
//! samples.

use crate::error::ResampleError;
use byteorder::{ByteOrder, LittleEndian};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Smallest chunk the resampler is built for; shorter buffers are zero padded.
const MIN_CHUNK_FRAMES: usize = 256;

/// Upper bound on flush passes; a pass yields at least one chunk of output.
const MAX_FLUSH_PASSES: usize = 8;

/// Resample little-endian 16-bit mono PCM from `from_rate` to `to_rate`.
pub fn resample_pcm16(pcm: &[u8], from_rate: u32, to_rate: u32) -> Result<Vec<u8>, ResampleError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(ResampleError::UnsupportedRate {
            from: from_rate,
            to: to_rate,
        });
    }

    let input: Vec<f32> = pcm
        .chunks_exact(2)
        .map(|bytes| LittleEndian::read_i16(bytes) as f32 / 32768.0)
        .collect();

    if input.is_empty() {
        return Ok(Vec::new());
    }
    if from_rate == to_rate {
        return Ok(pcm[..input.len() * 2].to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let expected = (input.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;

    let params = SincInterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let chunk_frames = input.len().max(MIN_CHUNK_FRAMES);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_frames, 1)
        .map_err(|e| ResampleError::Construction(e.to_string()))?;
    let delay = resampler.output_delay();

    let waves = vec![input];
    let mut output = resampler
        .process_partial(Some(waves.as_slice()), None)
        .map_err(|e| ResampleError::Process(e.to_string()))?
        .remove(0);

    // Push zeros through until the delayed tail of the signal has come out.
    let mut passes = 0;
    while output.len() < delay + expected && passes < MAX_FLUSH_PASSES {
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| ResampleError::Process(e.to_string()))?
            .remove(0);
        if tail.is_empty() {
            break;
        }
        output.extend_from_slice(&tail);
        passes += 1;
    }

    let start = delay.min(output.len());
    let end = (delay + expected).min(output.len());

    // Anything the filter did not produce is silence.
    let mut bytes = vec![0u8; expected * 2];
    for (sample, out) in output[start..end].iter().zip(bytes.chunks_exact_mut(2)) {
        let scaled = (sample * 32768.0).clamp(-32768.0, 32767.0);
        LittleEndian::write_i16(out, scaled as i16);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(sample_rate: u32, frequency: f32, samples: usize, amplitude: f32) -> Vec<u8> {
        (0..samples)
            .flat_map(|i| {
                let phase = i as f32 * 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
                ((phase.sin() * amplitude) as i16).to_le_bytes()
            })
            .collect()
    }

    fn rms(pcm: &[u8]) -> f64 {
        let samples: Vec<f64> = pcm
            .chunks_exact(2)
            .map(|b| LittleEndian::read_i16(b) as f64)
            .collect();
        (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn test_upsample_telephony_to_backend_input() {
        // One 20 ms packet at 8 kHz.
        let input = tone(8_000, 440.0, 160, 10_000.0);
        let output = resample_pcm16(&input, 8_000, 16_000).unwrap();
        assert_eq!(output.len(), 640);
    }

    #[test]
    fn test_downsample_backend_output_to_telephony() {
        let input = tone(24_000, 440.0, 2_400, 10_000.0);
        let output = resample_pcm16(&input, 24_000, 8_000).unwrap();
        assert_eq!(output.len(), 1_600);

        // A 440 Hz tone is well inside the passband, so energy survives.
        let ratio = rms(&output) / rms(&input);
        assert!(ratio > 0.5 && ratio < 1.5, "energy ratio {}", ratio);
    }

    #[test]
    fn test_output_length_rounds_up() {
        let input = tone(24_000, 200.0, 100, 1_000.0);
        let output = resample_pcm16(&input, 24_000, 8_000).unwrap();
        assert_eq!(output.len(), 34 * 2);
    }

    #[test]
    fn test_single_sample_keeps_exact_length() {
        let output = resample_pcm16(&[0x10, 0x00], 8_000, 16_000).unwrap();
        assert_eq!(output.len(), 4);
    }

    #[test]
    fn test_empty_and_identity() {
        assert!(resample_pcm16(&[], 8_000, 16_000).unwrap().is_empty());
        assert_eq!(resample_pcm16(&[1, 2, 3, 4, 5], 8_000, 8_000).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert_eq!(
            resample_pcm16(&[0, 0], 0, 8_000),
            Err(ResampleError::UnsupportedRate { from: 0, to: 8_000 })
        );
    }
}

//! # Audio Preprocessing
//!
//! Pure functions that turn arbitrary uploaded audio into the canonical form
//! the classifiers expect: mono float samples in [-1.0, 1.0] at the target
//! sample rate. Nothing in this module holds state; every function maps an
//! input array to an output array.
//!
//! ## Pipeline Order:
//! 1. **Format loading**: WAV container decode (8/16/24-bit int, 32-bit float)
//!    with mean downmix to mono, or raw 16-bit PCM fallback
//! 2. **Resampling**: Linear interpolation to the target rate
//! 3. **Silence trimming**: Drop leading/trailing samples below threshold
//! 4. **Peak normalization**: Scale towards a target peak level
//! 5. **Length cap**: Keep only the leading N seconds before inference

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::io::Cursor;
use tracing::{debug, warn};

/// Load audio from bytes, accepting WAV containers or raw 16-bit PCM.
///
/// ## Behavior:
/// - A parseable WAV header drives the decode: sample rate, channel count, and
///   bit depth come from the container, multi-channel audio is downmixed to
///   mono by arithmetic mean, and the result is resampled to
///   `target_sample_rate` if needed.
/// - Anything that fails WAV parsing is treated as raw little-endian 16-bit
///   signed mono PCM already at the target rate.
///
/// Returns the samples and the rate they ended up at (always
/// `target_sample_rate` in practice).
pub fn load_audio_from_bytes(data: &[u8], target_sample_rate: u32) -> (Vec<f32>, u32) {
    match wav::read(&mut Cursor::new(data)) {
        Ok((header, track)) => {
            let samples = decode_track(track);
            let channels = header.channel_count.max(1) as usize;

            let mono = if channels > 1 {
                downmix_to_mono(&samples, channels)
            } else {
                samples
            };

            debug!(
                sample_rate = header.sampling_rate,
                channels,
                samples = mono.len(),
                "Decoded WAV container"
            );

            if header.sampling_rate != target_sample_rate {
                let resampled = resample(&mono, header.sampling_rate, target_sample_rate);
                (resampled, target_sample_rate)
            } else {
                (mono, target_sample_rate)
            }
        }
        Err(_) => {
            // No recognizable container: interpret as raw 16-bit PCM at the
            // assumed default rate.
            let mut cursor = Cursor::new(data);
            let mut samples = Vec::with_capacity(data.len() / 2);
            while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
                samples.push(sample as f32 / 32768.0);
            }
            (samples, target_sample_rate)
        }
    }
}

/// Decode one WAV track into normalized float samples.
fn decode_track(track: wav::BitDepth) -> Vec<f32> {
    match track {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => Vec::new(),
    }
}

/// Downmix interleaved multi-channel samples to mono by arithmetic mean.
fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample audio to a target rate using linear interpolation.
///
/// The output length is `len * target_rate / source_rate`, rounded. Matching
/// rates (or empty input) return the input unchanged, so the common 16kHz →
/// 16kHz path costs one copy and nothing else.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let step = source_rate as f64 / target_rate as f64;
    let out_len =
        (samples.len() as f64 * target_rate as f64 / source_rate as f64).round() as usize;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = (pos as usize).min(last);
        let next = (idx + 1).min(last);
        let frac = (pos - idx as f64) as f32;
        out.push(samples[idx] + (samples[next] - samples[idx]) * frac);
    }
    out
}

/// Trim silence from the beginning and end of the audio.
///
/// Finds the first and last sample whose absolute amplitude exceeds
/// `threshold` and returns that inclusive sub-range.
///
/// ## Edge Case:
/// If nothing exceeds the threshold (total silence) the input is returned
/// unchanged, never an empty slice.
pub fn trim_silence(samples: &[f32], threshold: f32) -> &[f32] {
    let first = samples.iter().position(|s| s.abs() > threshold);
    let last = samples.iter().rposition(|s| s.abs() > threshold);

    match (first, last) {
        (Some(start), Some(end)) => &samples[start..=end],
        _ => samples,
    }
}

/// Scale every sample so the peak lands on `target_peak`.
///
/// ## Edge Case:
/// A current peak of exactly zero (all-silent audio) returns the input
/// unchanged rather than dividing by zero.
pub fn normalize(samples: &[f32], target_peak: f32) -> Vec<f32> {
    let current_peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

    if current_peak == 0.0 {
        return samples.to_vec();
    }

    let gain = target_peak / current_peak;
    samples.iter().map(|s| s * gain).collect()
}

/// Truncate audio to at most `max_length_seconds`, keeping the leading
/// samples and discarding everything past the cap.
pub fn apply_length_cap(mut samples: Vec<f32>, sample_rate: u32, max_length_seconds: u32) -> Vec<f32> {
    let max_samples = sample_rate as usize * max_length_seconds as usize;
    if samples.len() > max_samples {
        warn!(
            samples = samples.len(),
            max_samples, "Audio too long, truncating before inference"
        );
        samples.truncate(max_samples);
    }
    samples
}

/// Encode float samples back into a 16-bit mono WAV container.
///
/// Used by the remote classifier, which uploads audio as a file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|s| (s * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect();

    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut cursor = Cursor::new(Vec::new());
    wav::write(header, &wav::BitDepth::Sixteen(pcm), &mut cursor)?;
    Ok(cursor.into_inner())
}

/// Derived audio-quality snapshot, computed once per classification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AudioMetrics {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub rms_level: f32,
    pub peak_level: f32,
    pub is_clipping: bool,
    pub is_too_quiet: bool,
}

impl AudioMetrics {
    /// Calculate metrics from a sample array.
    ///
    /// ## Formulas:
    /// - duration = len / sample_rate
    /// - RMS = sqrt(mean(sample²))
    /// - peak = max(|sample|)
    /// - clipping when peak > 0.99, too quiet when RMS < 0.01
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        let duration = samples.len() as f64 / sample_rate as f64;

        let rms = if samples.is_empty() {
            0.0
        } else {
            let sum_squares: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
            (sum_squares / samples.len() as f64).sqrt() as f32
        };

        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        Self {
            duration_seconds: duration,
            sample_rate,
            rms_level: rms,
            peak_level: peak,
            is_clipping: peak > 0.99,
            is_too_quiet: rms < 0.01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: Vec<i16>, channels: u16, sample_rate: u32) -> Vec<u8> {
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, channels, sample_rate, 16);
        let mut cursor = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut cursor).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_load_wav_mono() {
        let bytes = wav_bytes(vec![0, 16384, -16384], 1, 16000);
        let (samples, rate) = load_audio_from_bytes(&bytes, 16000);
        assert_eq!(rate, 16000);
        assert_eq!(samples, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn test_load_wav_downmixes_stereo() {
        // Interleaved L/R frames: (16384, 0) and (-16384, -16384).
        let bytes = wav_bytes(vec![16384, 0, -16384, -16384], 2, 16000);
        let (samples, _) = load_audio_from_bytes(&bytes, 16000);
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.25).abs() < 1e-6);
        assert!((samples[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_load_wav_resamples_to_target() {
        let bytes = wav_bytes(vec![0i16; 8000], 1, 8000);
        let (samples, rate) = load_audio_from_bytes(&bytes, 16000);
        assert_eq!(rate, 16000);
        assert_eq!(samples.len(), 16000);
    }

    #[test]
    fn test_load_raw_pcm_fallback() {
        let mut data = Vec::new();
        for sample in [100i16, -100, 2000] {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        let (samples, rate) = load_audio_from_bytes(&data, 16000);
        assert_eq!(rate, 16000);
        assert_eq!(samples.len(), 3);
        assert!((samples[2] - 2000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_length() {
        let samples = vec![0.0f32; 960];
        let out = resample(&samples, 48000, 16000);
        assert_eq!(out.len(), 320);

        let out = resample(&samples, 16000, 48000);
        assert_eq!(out.len(), 2880);
    }

    #[test]
    fn test_resample_interpolates() {
        // Upsampling a ramp should stay monotonic.
        let samples: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let out = resample(&samples, 8000, 16000);
        for pair in out.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_trim_silence_finds_range() {
        let samples = vec![0.0, 0.001, 0.5, 0.2, 0.005, 0.0];
        let trimmed = trim_silence(&samples, 0.01);
        assert_eq!(trimmed, &[0.5, 0.2]);
    }

    #[test]
    fn test_trim_silence_total_silence_unchanged() {
        let samples = vec![0.001, -0.002, 0.003];
        let trimmed = trim_silence(&samples, 0.01);
        assert_eq!(trimmed, samples.as_slice());
        assert_eq!(trimmed.len(), 3);
    }

    #[test]
    fn test_normalize_scales_to_target() {
        let samples = vec![0.1, -0.45, 0.3];
        let normalized = normalize(&samples, 0.9);
        let peak = normalized.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!((peak - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_all_zero_unchanged() {
        let samples = vec![0.0f32; 10];
        assert_eq!(normalize(&samples, 0.9), samples);
    }

    #[test]
    fn test_length_cap() {
        let samples = vec![0.5f32; 16000 * 35];
        let capped = apply_length_cap(samples, 16000, 30);
        assert_eq!(capped.len(), 16000 * 30);

        let short = vec![0.5f32; 100];
        assert_eq!(apply_length_cap(short.clone(), 16000, 30), short);
    }

    #[test]
    fn test_metrics_formulas() {
        let samples = vec![0.5f32; 16000];
        let metrics = AudioMetrics::from_samples(&samples, 16000);

        assert!((metrics.duration_seconds - 1.0).abs() < 1e-9);
        assert!((metrics.rms_level - 0.5).abs() < 1e-6);
        assert!((metrics.peak_level - 0.5).abs() < 1e-6);
        assert!(!metrics.is_clipping);
        assert!(!metrics.is_too_quiet);
    }

    #[test]
    fn test_metrics_flags() {
        let loud = vec![1.0f32; 100];
        let metrics = AudioMetrics::from_samples(&loud, 16000);
        assert!(metrics.is_clipping);

        let quiet = vec![0.001f32; 100];
        let metrics = AudioMetrics::from_samples(&quiet, 16000);
        assert!(metrics.is_too_quiet);

        let empty = AudioMetrics::from_samples(&[], 16000);
        assert_eq!(empty.rms_level, 0.0);
        assert_eq!(empty.duration_seconds, 0.0);
    }

    #[test]
    fn test_encode_wav_round_trip() {
        let samples = vec![0.0, 0.25, -0.25, 0.999];
        let bytes = encode_wav(&samples, 16000).unwrap();

        let (decoded, rate) = load_audio_from_bytes(&bytes, 16000);
        assert_eq!(rate, 16000);
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}

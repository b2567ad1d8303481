//! # Audio Buffer Management
//!
//! Accumulates binary audio chunks for a single streaming session and tracks
//! how much audio has arrived. Chunks stay in arrival order and are only
//! decoded to float samples when a classification actually runs.
//!
//! ## Key Features:
//! - **O(1) append**: Chunks are stored as received, no copying until decode
//! - **Duration tracking**: Running sample count maintained alongside the chunks
//! - **Thread safety**: Interior mutex so the WebSocket actor and spawned
//!   classification tasks can share one buffer

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::sync::Mutex;

/// Bytes per sample for 16-bit PCM.
const BYTES_PER_SAMPLE: usize = 2;

/// Per-session accumulator for raw 16-bit mono PCM chunks.
///
/// ## Invariant:
/// `total_samples` always equals the sum of chunk byte lengths divided by two.
/// Both are updated together under the same lock.
pub struct AudioBuffer {
    inner: Mutex<BufferInner>,
    sample_rate: u32,
    channels: u8,
}

struct BufferInner {
    chunks: Vec<Vec<u8>>,
    total_samples: usize,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                chunks: Vec::new(),
                total_samples: 0,
            }),
            sample_rate,
            channels,
        }
    }

    /// Append a raw PCM chunk to the buffer.
    ///
    /// ## Error Handling:
    /// Rejects empty chunks and chunks with an odd byte count, since 16-bit
    /// samples always occupy two bytes.
    pub fn append(&self, data: &[u8]) -> Result<(), String> {
        if data.is_empty() {
            return Err("No audio data provided".to_string());
        }
        if data.len() % BYTES_PER_SAMPLE != 0 {
            return Err("Audio data length must be even for 16-bit samples".to_string());
        }

        let mut inner = self.inner.lock().unwrap();
        inner.total_samples += data.len() / BYTES_PER_SAMPLE;
        inner.chunks.push(data.to_vec());
        Ok(())
    }

    /// Current buffer duration in milliseconds, integer-truncated.
    ///
    /// ## Calculation:
    /// `total_samples / sample_rate * 1000`, computed in integer arithmetic so
    /// 9000 samples at 16kHz report 562ms rather than 562.5.
    pub fn duration_ms(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        (inner.total_samples as u64 * 1000) / self.sample_rate as u64
    }

    /// Decode all buffered chunks into normalized float samples.
    ///
    /// Chunks are concatenated in arrival order and read as little-endian
    /// signed 16-bit integers, scaled from [-32768, 32767] to [-1.0, 1.0].
    pub fn to_sample_array(&self) -> Vec<f32> {
        let inner = self.inner.lock().unwrap();
        if inner.chunks.is_empty() {
            return Vec::new();
        }

        let mut samples = Vec::with_capacity(inner.total_samples);
        for chunk in &inner.chunks {
            let mut cursor = Cursor::new(chunk.as_slice());
            while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
                samples.push(sample as f32 / 32768.0);
            }
        }
        samples
    }

    /// Discard all chunks and reset the sample count to zero.
    ///
    /// Called after each classification decision that keeps the session open.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.chunks.clear();
        inner.total_samples = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().chunks.is_empty()
    }

    pub fn total_samples(&self) -> usize {
        self.inner.lock().unwrap().total_samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_formula() {
        let buffer = AudioBuffer::new(16000, 1);

        // Three 6000-byte chunks = 9000 samples at 16kHz = 562.5ms, truncated.
        for _ in 0..3 {
            buffer.append(&vec![0u8; 6000]).unwrap();
        }

        assert_eq!(buffer.total_samples(), 9000);
        assert_eq!(buffer.duration_ms(), 562);
    }

    #[test]
    fn test_append_rejects_bad_chunks() {
        let buffer = AudioBuffer::new(16000, 1);
        assert!(buffer.append(&[]).is_err());
        assert!(buffer.append(&[0u8; 15]).is_err());
        assert!(buffer.append(&[0u8; 16]).is_ok());
    }

    #[test]
    fn test_decode_normalization() {
        let buffer = AudioBuffer::new(16000, 1);

        let mut data = Vec::new();
        for sample in [0i16, 16384, -16384, i16::MIN] {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        buffer.append(&data).unwrap();

        let samples = buffer.to_sample_array();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.5);
        assert_eq!(samples[2], -0.5);
        assert_eq!(samples[3], -1.0);
    }

    #[test]
    fn test_chunks_decode_in_arrival_order() {
        let buffer = AudioBuffer::new(16000, 1);
        buffer.append(&100i16.to_le_bytes()).unwrap();
        buffer.append(&200i16.to_le_bytes()).unwrap();

        let samples = buffer.to_sample_array();
        assert!(samples[0] < samples[1]);
    }

    #[test]
    fn test_clear_resets_state() {
        let buffer = AudioBuffer::new(16000, 1);
        buffer.append(&vec![0u8; 320]).unwrap();
        assert!(!buffer.is_empty());
        assert!(buffer.duration_ms() > 0);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.duration_ms(), 0);
        assert_eq!(buffer.total_samples(), 0);
        assert!(buffer.to_sample_array().is_empty());
    }
}

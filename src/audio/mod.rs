//! # Audio Processing Module
//!
//! Handles the audio side of the detection pipeline: accumulating streamed
//! PCM chunks per session and turning raw bytes into the canonical sample
//! representation the classifiers consume.
//!
//! ## Key Components:
//! - **Audio Buffer**: Per-session chunk accumulator with duration tracking
//! - **Audio Processor**: Format loading, resampling, trimming, normalization,
//!   and quality metrics
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz by default (configurable)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers
//!
//! WAV uploads in other widths or channel counts are converted on load;
//! streamed frames must already be 16-bit mono at the session rate.

pub mod buffer;
pub mod processor;

pub use buffer::AudioBuffer;
pub use processor::AudioMetrics;

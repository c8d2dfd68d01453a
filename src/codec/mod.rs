//! PCM codec helpers
//!
//! Outbound capture frames are encoded to 16 kHz signed 16-bit PCM; inbound
//! speech is decoded from 24 kHz PCM to floats.

pub mod decoder;
pub mod encoder;
pub mod resample;

pub use decoder::{decode_base64_pcm, decode_pcm16_le};
pub use encoder::{CaptureEncoder, LevelMeter};
pub use resample::{downmix, resample_chunk, StreamResampler};

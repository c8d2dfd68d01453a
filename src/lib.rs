//! # Live Voice Session
//!
//! Real-time voice conversation with a remote speech service: the microphone
//! is streamed up, synthesized speech is streamed down and played back
//! gaplessly, and the remote side can cut its own answer short (barge-in).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          SessionManager (session::manager)               │
//! │                                                                          │
//! │  ┌────────────┐   ┌───────────────┐   ┌────────────┐                     │
//! │  │ Microphone │──▶│ FrameAssembler│──▶│ FrameQueue │ (bounded, drops     │
//! │  │ cpal thread│   │ resample 16k  │   │ ArrayQueue │  newest when full)  │
//! │  └────────────┘   │ CaptureEncoder│   └─────┬──────┘                     │
//! │                   └───────────────┘         │ uplink task                │
//! │                                             ▼                            │
//! │                          ┌──────────────────────────────────┐            │
//! │                          │ DuplexChannel (network::channel) │◀──▶ remote │
//! │                          └──────────────────┬───────────────┘   service  │
//! │                                             │ coordinator task           │
//! │                      ┌──────────────────────┴─────────────┐              │
//! │                      ▼                                    ▼              │
//! │           ┌────────────────────┐           ┌───────────────────────┐     │
//! │           │ PlaybackScheduler  │           │ InterruptionController│     │
//! │           │ cursor = max(c,now)│           │ stop all, cursor=now  │     │
//! │           └─────────┬──────────┘           └──────────┬────────────┘     │
//! │                     └──────────┐   ┌──────────────────┘                  │
//! │                                ▼   ▼                                     │
//! │                    Mutex<ScheduleState> { cursor, active units }         │
//! │                                  │                                       │
//! │                                  ▼                                       │
//! │                     ┌──────────────────────────┐                         │
//! │                     │ CpalOutput mixer thread  │──▶ Speakers             │
//! │                     └──────────────────────────┘                         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use session::{SessionManager, SessionState, SessionStatus};

/// Application-wide constants
pub mod constants {
    /// Outbound (microphone) wire sample rate
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Inbound (synthesized speech) sample rate
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Samples per outbound frame
    pub const DEFAULT_FRAME_SIZE: usize = 4096;

    /// Gain applied to the RMS amplitude before clamping to the level range
    pub const DEFAULT_LEVEL_GAIN: f32 = 400.0;

    /// Upper bound of the metering level
    pub const MAX_LEVEL: f32 = 100.0;

    /// Scale factor from normalized float to signed 16-bit PCM
    pub const PCM_SCALE: f32 = 32767.0;

    /// Outbound frame queue capacity (in frames)
    pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

    /// Inbound event channel capacity
    pub const INBOUND_EVENT_CAPACITY: usize = 256;

    /// Default transport connection timeout in milliseconds
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Default HTTP port for the control surface
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}

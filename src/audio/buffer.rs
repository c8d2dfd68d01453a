//! Outbound audio frames and the capture hand-off queue
//!
//! The capture callback pushes into a bounded lock-free queue and never
//! waits; the uplink task drains it asynchronously.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::codec::encoder::pcm16_le_bytes;
use crate::constants::CAPTURE_SAMPLE_RATE;

/// Immutable chunk of outbound audio: mono 16 kHz signed 16-bit samples
#[derive(Clone, Debug)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
    /// Metering level in `[0, 100]`
    level: f32,
    /// Frame sequence number
    sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, level: f32, sequence: u32) -> Self {
        Self {
            samples: samples.into(),
            level,
            sequence,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn sample_rate(&self) -> u32 {
        CAPTURE_SAMPLE_RATE
    }

    /// Frame duration at the wire rate
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.samples.len() as u64 * 1_000_000_000 / CAPTURE_SAMPLE_RATE as u64)
    }

    /// Wire payload: little-endian PCM bytes
    pub fn to_wire(&self) -> Bytes {
        pcm16_le_bytes(&self.samples)
    }
}

/// Decoded inbound speech: mono normalized samples at `sample_rate`
#[derive(Clone, Debug, PartialEq)]
pub struct AudioChunk {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration, truncated to the nanosecond
    pub fn duration(&self) -> Duration {
        Self::duration_of(self.samples.len(), self.sample_rate)
    }

    /// Duration of `len` samples at `sample_rate`; the one rounding rule
    /// shared by the scheduler cursor and the output devices
    pub fn duration_of(len: usize, sample_rate: u32) -> Duration {
        Duration::from_nanos(len as u64 * 1_000_000_000 / sample_rate.max(1) as u64)
    }
}

/// Bounded frame queue between the capture thread and the uplink task
pub struct FrameQueue {
    queue: ArrayQueue<AudioFrame>,
    notify: Notify,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Create a new queue holding up to `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a frame without blocking.
    ///
    /// Returns false if the queue is full; the new frame is dropped.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => {
                self.pushed.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Wait for the next frame.
    pub async fn pop(&self) -> AudioFrame {
        loop {
            if let Some(frame) = self.queue.pop() {
                return frame;
            }
            // A permit stored by notify_one covers a push racing this check
            self.notify.notified().await;
        }
    }

    /// Discard everything still queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a frame queue
pub type SharedFrameQueue = Arc<FrameQueue>;

/// Create a new shared frame queue
pub fn create_frame_queue(capacity: usize) -> SharedFrameQueue {
    Arc::new(FrameQueue::new(capacity))
}

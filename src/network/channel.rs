//! Bidirectional streaming channel to the remote service
//!
//! A [`DuplexChannel`] splits into a [`ChannelSender`] (fire-and-forget,
//! never waits) and an [`EventStream`] (ordered inbound events that end after
//! `Closed` or `TransportError`). Transports drive the other side through a
//! [`ChannelEndpoint`].

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::audio::buffer::{AudioChunk, AudioFrame};
use crate::config::LiveConfig;
use crate::constants::INBOUND_EVENT_CAPACITY;
use crate::error::NetworkError;

/// Event produced by the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Synthesized speech, already decoded
    AudioChunk(AudioChunk),
    /// The remote discarded its in-progress response
    Interruption,
    Closed,
    TransportError(String),
}

impl InboundEvent {
    /// Whether the sequence ends after this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboundEvent::Closed | InboundEvent::TransportError(_))
    }
}

/// Opens channels to the remote conversational service
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete the session handshake.
    ///
    /// Resolves once the remote reports the channel open.
    async fn open(&self, config: &LiveConfig, api_key: &str) -> Result<DuplexChannel, NetworkError>;
}

struct ChannelShared {
    closed: AtomicBool,
    cancel: CancellationToken,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl ChannelShared {
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Outbound half
#[derive(Clone)]
pub struct ChannelSender {
    outbound: mpsc::Sender<Bytes>,
    shared: Arc<ChannelShared>,
}

impl ChannelSender {
    /// Enqueue a frame for the transport without waiting.
    ///
    /// Delivery is not guaranteed: the frame is dropped when the transport
    /// is saturated, and nothing is sent once the channel is closed.
    pub fn send(&self, frame: &AudioFrame) {
        if self.is_closed() {
            return;
        }
        match self.outbound.try_send(frame.to_wire()) {
            Ok(()) => {
                self.shared.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Transport saturated, dropped frame {}", frame.sequence());
            }
            Err(TrySendError::Closed(_)) => {
                self.shared.mark_closed();
            }
        }
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Closing duplex channel");
        }
        self.shared.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.shared.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.shared.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Inbound half: ordered, lazy, terminates after `Closed`/`TransportError`
pub struct EventStream {
    inbound: mpsc::Receiver<InboundEvent>,
    shared: Arc<ChannelShared>,
    finished: bool,
}

impl EventStream {
    /// Wait for the next event; `None` once the sequence has ended.
    ///
    /// A transport that disappears without a word reads as `Closed`.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        if self.finished {
            return None;
        }
        let event = self.inbound.recv().await.unwrap_or(InboundEvent::Closed);
        if event.is_terminal() {
            self.finished = true;
            self.shared.mark_closed();
        }
        Some(event)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Transport side of a channel
pub struct ChannelEndpoint {
    /// Frames queued by [`ChannelSender::send`]
    pub outbound: mpsc::Receiver<Bytes>,
    /// Events for the [`EventStream`], in remote order
    pub inbound: mpsc::Sender<InboundEvent>,
    shared: Arc<ChannelShared>,
}

impl ChannelEndpoint {
    /// Fires when the local side closes the channel
    pub fn cancelled(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Record that the transport is gone; later sends become no-ops.
    pub fn mark_closed(&self) {
        self.shared.mark_closed();
    }

    pub async fn deliver(&self, event: InboundEvent) -> Result<(), NetworkError> {
        if event.is_terminal() {
            self.shared.mark_closed();
        }
        self.inbound.send(event).await.map_err(|_| NetworkError::Closed)
    }
}

/// Both halves of an open channel
pub struct DuplexChannel {
    sender: ChannelSender,
    events: EventStream,
}

impl DuplexChannel {
    /// New channel plus the endpoint its transport drives
    pub fn pair(outbound_capacity: usize) -> (Self, ChannelEndpoint) {
        let (out_tx, out_rx) = mpsc::channel(outbound_capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(INBOUND_EVENT_CAPACITY);
        let shared = Arc::new(ChannelShared {
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        });

        let channel = Self {
            sender: ChannelSender {
                outbound: out_tx,
                shared: shared.clone(),
            },
            events: EventStream {
                inbound: in_rx,
                shared: shared.clone(),
                finished: false,
            },
        };
        let endpoint = ChannelEndpoint {
            outbound: out_rx,
            inbound: in_tx,
            shared,
        };
        (channel, endpoint)
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    pub fn split(self) -> (ChannelSender, EventStream) {
        (self.sender, self.events)
    }
}

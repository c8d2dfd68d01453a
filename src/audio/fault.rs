//! Device failures raised after a stream is running

use tokio::sync::mpsc;

use crate::error::AudioError;

/// Reports device failures from audio threads without blocking
#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<AudioError>,
}

impl FaultReporter {
    pub fn report(&self, err: AudioError) {
        tracing::warn!("Audio device fault: {}", err);
        // Nobody listening once the session is gone
        let _ = self.tx.send(err);
    }
}

/// Session side of the fault channel
pub type FaultReceiver = mpsc::UnboundedReceiver<AudioError>;

pub fn fault_channel() -> (FaultReporter, FaultReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FaultReporter { tx }, rx)
}

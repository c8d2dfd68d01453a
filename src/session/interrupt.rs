//! Barge-in handling
//!
//! When the remote side discards its response, everything still queued for
//! playback is silenced and the timeline restarts at the current clock, so the
//! next response plays immediately rather than after the stale tail.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::session::scheduler::SharedSchedule;

pub struct InterruptionController {
    schedule: SharedSchedule,
    interruptions: AtomicU64,
}

impl InterruptionController {
    pub fn new(schedule: SharedSchedule) -> Self {
        Self {
            schedule,
            interruptions: AtomicU64::new(0),
        }
    }

    /// Stop all active units, clear the set and move the cursor to `now`.
    ///
    /// Runs under the schedule lock, so no chunk can be placed against the
    /// old cursor while the purge is in progress. Returns the units stopped.
    pub fn on_interrupt(&self, now: Duration) -> usize {
        let stopped = self.schedule.lock().purge(now);
        self.interruptions.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Interrupted: stopped {} playback unit(s)", stopped);
        stopped
    }

    pub fn interruptions(&self) -> u64 {
        self.interruptions.load(Ordering::Relaxed)
    }
}

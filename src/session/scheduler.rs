//! Gapless playback scheduling
//!
//! Inbound chunks are placed back to back on the output device clock. The
//! cursor marks where the next chunk goes; a chunk that arrives after the
//! cursor has already passed starts immediately instead.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::audio::buffer::AudioChunk;
use crate::audio::playback::{PlaybackOutput, UnitId};
use crate::error::AudioError;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

fn next_unit_id() -> UnitId {
    NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed)
}

/// One chunk committed to the output device
pub struct PlaybackUnit {
    id: UnitId,
    start_at: Duration,
    duration: Duration,
    output: Arc<dyn PlaybackOutput>,
}

impl PlaybackUnit {
    /// Silence the unit on its device
    fn stop(self) {
        tracing::trace!("Stopping unit {} ({:?} from {:?})", self.id, self.duration, self.start_at);
        self.output.stop(self.id);
    }
}

/// Cursor plus the set of units that have not finished yet
///
/// Shared by the scheduler, the interruption controller and the completion
/// callbacks, always behind a single mutex.
#[derive(Default)]
pub struct ScheduleState {
    cursor: Duration,
    /// Start of the current playback phase; moves on every interruption
    phase_start: Duration,
    active: HashMap<UnitId, PlaybackUnit>,
}

impl ScheduleState {
    pub fn cursor(&self) -> Duration {
        self.cursor
    }

    pub fn phase_start(&self) -> Duration {
        self.phase_start
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: UnitId) -> bool {
        self.active.contains_key(&id)
    }

    /// Stop every active unit and restart the timeline at `at`.
    ///
    /// Returns the number of units stopped.
    pub(crate) fn purge(&mut self, at: Duration) -> usize {
        let stopped = self.active.len();
        for (_, unit) in self.active.drain() {
            unit.stop();
        }
        self.cursor = at;
        self.phase_start = at;
        stopped
    }
}

pub type SharedSchedule = Arc<Mutex<ScheduleState>>;

pub fn create_schedule() -> SharedSchedule {
    Arc::new(Mutex::new(ScheduleState::default()))
}

/// Where a chunk landed on the device clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    pub start_at: Duration,
    pub duration: Duration,
}

/// Places inbound chunks on the output timeline
pub struct PlaybackScheduler {
    schedule: SharedSchedule,
    output: Arc<dyn PlaybackOutput>,
    chunks_scheduled: AtomicU64,
}

impl PlaybackScheduler {
    pub fn new(schedule: SharedSchedule, output: Arc<dyn PlaybackOutput>) -> Self {
        Self {
            schedule,
            output,
            chunks_scheduled: AtomicU64::new(0),
        }
    }

    /// Schedule `chunk` at `max(cursor, now)` and advance the cursor by its
    /// duration.
    ///
    /// The unit stays in the active set until it completes naturally or is
    /// stopped. When the output rejects the chunk nothing changes.
    pub fn schedule(&self, chunk: &AudioChunk, now: Duration) -> Result<ScheduledUnit, AudioError> {
        let mut state = self.schedule.lock();
        let start_at = state.cursor.max(now);
        let duration = chunk.duration();
        let id = next_unit_id();

        // Weak: a late completion must not keep a finished session alive
        let schedule: Weak<Mutex<ScheduleState>> = Arc::downgrade(&self.schedule);
        let on_complete = Box::new(move || {
            if let Some(schedule) = schedule.upgrade() {
                if schedule.lock().active.remove(&id).is_some() {
                    tracing::trace!("Playback unit {} finished", id);
                }
            }
        });

        self.output
            .schedule(id, chunk.samples().clone(), chunk.sample_rate(), start_at, on_complete)?;

        debug_assert!(start_at >= state.phase_start);
        state.active.insert(
            id,
            PlaybackUnit {
                id,
                start_at,
                duration,
                output: self.output.clone(),
            },
        );
        state.cursor = start_at + duration;
        self.chunks_scheduled.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            "Scheduled unit {} at {:?} for {:?} (cursor {:?})",
            id,
            start_at,
            duration,
            state.cursor
        );
        Ok(ScheduledUnit {
            id,
            start_at,
            duration,
        })
    }

    pub fn cursor(&self) -> Duration {
        self.schedule.lock().cursor
    }

    pub fn active_units(&self) -> usize {
        self.schedule.lock().active.len()
    }

    pub fn chunks_scheduled(&self) -> u64 {
        self.chunks_scheduled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOutput;
    use proptest::prelude::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// `millis` of audio at 24 kHz
    fn chunk(millis: u64) -> AudioChunk {
        AudioChunk::new(vec![0.0; (millis * 24) as usize], 24_000)
    }

    fn scheduler() -> (PlaybackScheduler, SharedSchedule, Arc<FakeOutput>) {
        let schedule = create_schedule();
        let output = FakeOutput::new();
        (
            PlaybackScheduler::new(schedule.clone(), output.clone()),
            schedule,
            output,
        )
    }

    #[test]
    fn test_back_to_back_chunks() {
        let (scheduler, _, output) = scheduler();
        let t0 = ms(1_000);

        let starts: Vec<Duration> = (0..3)
            .map(|_| scheduler.schedule(&chunk(500), t0).unwrap().start_at)
            .collect();

        assert_eq!(starts, vec![t0, t0 + ms(500), t0 + ms(1_000)]);
        assert_eq!(scheduler.cursor(), t0 + ms(1_500));
        assert_eq!(output.starts(), starts);
        assert_eq!(scheduler.active_units(), 3);
    }

    #[test]
    fn test_late_chunk_starts_now() {
        let (scheduler, _, _) = scheduler();
        scheduler.schedule(&chunk(100), ms(0)).unwrap();

        let late = scheduler.schedule(&chunk(100), ms(300)).unwrap();
        assert_eq!(late.start_at, ms(300));
        assert_eq!(scheduler.cursor(), ms(400));
    }

    #[test]
    fn test_natural_completion_leaves_active_set() {
        let (scheduler, schedule, output) = scheduler();
        let first = scheduler.schedule(&chunk(100), ms(0)).unwrap();
        let second = scheduler.schedule(&chunk(100), ms(0)).unwrap();

        assert!(output.complete(first.id));
        let state = schedule.lock();
        assert!(!state.is_active(first.id));
        assert!(state.is_active(second.id));
        assert_eq!(state.cursor(), ms(200));
    }

    #[test]
    fn test_rejected_chunk_changes_nothing() {
        let (scheduler, schedule, output) = scheduler();
        scheduler.schedule(&chunk(100), ms(0)).unwrap();
        output.fail_schedule(true);

        assert!(scheduler.schedule(&chunk(100), ms(0)).is_err());
        assert_eq!(schedule.lock().cursor(), ms(100));
        assert_eq!(scheduler.active_units(), 1);
        assert_eq!(scheduler.chunks_scheduled(), 1);
    }

    #[test]
    fn test_purge_stops_everything() {
        let (scheduler, schedule, output) = scheduler();
        let ids: Vec<UnitId> = (0..3)
            .map(|_| scheduler.schedule(&chunk(200), ms(0)).unwrap().id)
            .collect();

        let stopped = schedule.lock().purge(ms(50));
        assert_eq!(stopped, 3);
        assert_eq!(scheduler.active_units(), 0);
        assert_eq!(scheduler.cursor(), ms(50));

        let mut stopped_ids = output.stopped();
        stopped_ids.sort_unstable();
        assert_eq!(stopped_ids, ids);
    }

    #[test]
    fn test_completion_after_session_dropped() {
        let (scheduler, schedule, output) = scheduler();
        let unit = scheduler.schedule(&chunk(100), ms(0)).unwrap();
        drop(scheduler);
        drop(schedule);
        // The pending completion outlives the schedule and must be harmless
        assert!(output.complete(unit.id));
    }

    #[test]
    fn test_unit_ids_are_unique() {
        let (scheduler, _, _) = scheduler();
        let a = scheduler.schedule(&chunk(10), ms(0)).unwrap();
        let b = scheduler.schedule(&chunk(10), ms(0)).unwrap();
        assert_ne!(a.id, b.id);
    }

    proptest! {
        #[test]
        fn prop_units_never_overlap(
            chunks in prop::collection::vec((1u64..400, 0u64..300), 1..20)
        ) {
            let (scheduler, _, _) = scheduler();
            let mut now = Duration::ZERO;
            let mut previous_end = Duration::ZERO;

            for (length, advance) in chunks {
                now += ms(advance);
                let unit = scheduler.schedule(&chunk(length), now).unwrap();
                prop_assert!(unit.start_at >= now);
                prop_assert!(unit.start_at >= previous_end);
                // Gapless whenever the cursor was still ahead of the clock
                if previous_end >= now {
                    prop_assert_eq!(unit.start_at, previous_end);
                }
                previous_end = unit.start_at + unit.duration;
                prop_assert_eq!(scheduler.cursor(), previous_end);
            }
        }
    }
}

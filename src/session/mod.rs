//! Session orchestration: lifecycle, playback scheduling and barge-in

pub mod backend;
pub mod interrupt;
pub mod manager;
pub mod scheduler;
pub mod state;

pub use backend::{AudioBackend, CpalBackend};
pub use interrupt::InterruptionController;
pub use manager::{SessionManager, SessionStatus};
pub use scheduler::{PlaybackScheduler, PlaybackUnit, ScheduleState, ScheduledUnit, SharedSchedule};
pub use state::SessionState;

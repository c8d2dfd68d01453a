//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod fault;
pub mod playback;

pub use buffer::{create_frame_queue, AudioChunk, AudioFrame, FrameQueue, SharedFrameQueue};
pub use capture::{CaptureDevice, CpalCapture, FrameAssembler};
pub use device::{list_devices, get_device_by_id, AudioDevice, AudioDeviceInfo};
pub use fault::{fault_channel, FaultReceiver, FaultReporter};
pub use playback::{Completion, CpalOutput, PlaybackOutput, UnitId};

//! Device acquisition for a session

use std::sync::Arc;

use crate::audio::capture::{CaptureDevice, CpalCapture};
use crate::audio::fault::FaultReporter;
use crate::audio::playback::{CpalOutput, PlaybackOutput};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Opens the capture and playback devices for one session
///
/// Both calls may block while the platform negotiates access. A device that
/// fails once running reports through `faults`.
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self, faults: FaultReporter) -> Result<Box<dyn CaptureDevice>, AudioError>;

    fn open_output(&self, faults: FaultReporter) -> Result<Arc<dyn PlaybackOutput>, AudioError>;
}

/// cpal devices chosen by the audio configuration
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(&self, faults: FaultReporter) -> Result<Box<dyn CaptureDevice>, AudioError> {
        Ok(Box::new(CpalCapture::new(self.input_device.as_deref(), faults)))
    }

    fn open_output(&self, faults: FaultReporter) -> Result<Arc<dyn PlaybackOutput>, AudioError> {
        let output = CpalOutput::open(self.output_device.as_deref(), faults)?;
        tracing::info!("Playback device running at {}Hz", output.sample_rate());
        Ok(Arc::new(output))
    }
}

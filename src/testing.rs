//! In-memory devices and transport for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::capture::{CaptureDevice, FrameAssembler};
use crate::audio::fault::FaultReporter;
use crate::audio::playback::{Completion, PlaybackOutput, UnitId};
use crate::config::LiveConfig;
use crate::error::{AudioError, NetworkError};
use crate::network::channel::{ChannelEndpoint, Connector, DuplexChannel};
use crate::session::backend::AudioBackend;

/// Wait up to a second for `condition`, yielding to spawned tasks in between
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 1s");
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleCall {
    pub id: UnitId,
    pub start_at: Duration,
    pub len: usize,
    pub sample_rate: u32,
}

/// Playback output with a manual clock that records what it was asked to do
#[derive(Default)]
pub struct FakeOutput {
    now: Mutex<Duration>,
    scheduled: Mutex<Vec<ScheduleCall>>,
    pending: Mutex<HashMap<UnitId, Completion>>,
    stopped: Mutex<Vec<UnitId>>,
    closes: AtomicUsize,
    fail_schedule: AtomicBool,
}

impl FakeOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_now(&self, now: Duration) {
        *self.now.lock() = now;
    }

    pub fn fail_schedule(&self, fail: bool) {
        self.fail_schedule.store(fail, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> Vec<ScheduleCall> {
        self.scheduled.lock().clone()
    }

    pub fn starts(&self) -> Vec<Duration> {
        self.scheduled.lock().iter().map(|call| call.start_at).collect()
    }

    pub fn stopped(&self) -> Vec<UnitId> {
        self.stopped.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Play `id` to its end. False if it was stopped or never scheduled.
    pub fn complete(&self, id: UnitId) -> bool {
        let done = self.pending.lock().remove(&id);
        match done {
            Some(done) => {
                done();
                true
            }
            None => false,
        }
    }
}

impl PlaybackOutput for FakeOutput {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn schedule(
        &self,
        id: UnitId,
        samples: Arc<[f32]>,
        sample_rate: u32,
        start_at: Duration,
        on_complete: Completion,
    ) -> Result<(), AudioError> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(AudioError::StreamError("output lost".into()));
        }
        self.scheduled.lock().push(ScheduleCall {
            id,
            start_at,
            len: samples.len(),
            sample_rate,
        });
        self.pending.lock().insert(id, on_complete);
        Ok(())
    }

    fn stop(&self, id: UnitId) {
        self.pending.lock().remove(&id);
        self.stopped.lock().push(id);
    }

    fn close(&self) -> Result<(), AudioError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shared view of the scripted microphone
#[derive(Default)]
pub struct MicControl {
    assembler: Mutex<Option<FrameAssembler>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    /// Thread that last released the device
    stopped_on: Mutex<Option<ThreadId>>,
}

impl MicControl {
    /// Deliver samples as the device callback would. Returns frames emitted.
    pub fn feed(&self, samples: &[f32]) -> usize {
        self.assembler
            .lock()
            .as_mut()
            .map(|assembler| assembler.push_interleaved(samples))
            .unwrap_or(0)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn stopped_on(&self) -> Option<ThreadId> {
        *self.stopped_on.lock()
    }
}

pub struct ScriptedCapture {
    control: Arc<MicControl>,
    deny: bool,
    fail_stop: bool,
    running: bool,
}

impl CaptureDevice for ScriptedCapture {
    fn start(&mut self, assembler: FrameAssembler) -> Result<(), AudioError> {
        if self.deny {
            return Err(AudioError::DeviceUnavailable("permission denied".into()));
        }
        *self.control.assembler.lock() = Some(assembler);
        self.control.starts.fetch_add(1, Ordering::SeqCst);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if self.running {
            self.running = false;
            self.control.assembler.lock().take();
            self.control.stops.fetch_add(1, Ordering::SeqCst);
            *self.control.stopped_on.lock() = Some(std::thread::current().id());
        }
        if self.fail_stop {
            return Err(AudioError::StreamError("device wedged".into()));
        }
        Ok(())
    }
}

/// Backend handing out a scripted microphone and a [`FakeOutput`]
pub struct FakeBackend {
    pub capture: Arc<MicControl>,
    pub output: Arc<FakeOutput>,
    deny_capture: AtomicBool,
    fail_capture_stop: AtomicBool,
    outputs_opened: AtomicUsize,
    /// Fault channel of the most recently opened devices
    faults: Mutex<Option<FaultReporter>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            capture: Arc::new(MicControl::default()),
            output: FakeOutput::new(),
            deny_capture: AtomicBool::new(false),
            fail_capture_stop: AtomicBool::new(false),
            outputs_opened: AtomicUsize::new(0),
            faults: Mutex::new(None),
        }
    }

    pub fn deny_capture(&self) {
        self.deny_capture.store(true, Ordering::SeqCst);
    }

    pub fn fail_capture_stop(&self) {
        self.fail_capture_stop.store(true, Ordering::SeqCst);
    }

    pub fn outputs_opened(&self) -> usize {
        self.outputs_opened.load(Ordering::SeqCst)
    }

    /// Fail a running device the way an unplugged one does
    pub fn lose_device(&self, reason: &str) {
        if let Some(faults) = self.faults.lock().as_ref() {
            faults.report(AudioError::StreamError(reason.to_string()));
        }
    }
}

impl AudioBackend for FakeBackend {
    fn open_capture(&self, faults: FaultReporter) -> Result<Box<dyn CaptureDevice>, AudioError> {
        *self.faults.lock() = Some(faults);
        Ok(Box::new(ScriptedCapture {
            control: self.capture.clone(),
            deny: self.deny_capture.load(Ordering::SeqCst),
            fail_stop: self.fail_capture_stop.load(Ordering::SeqCst),
            running: false,
        }))
    }

    fn open_output(&self, faults: FaultReporter) -> Result<Arc<dyn PlaybackOutput>, AudioError> {
        *self.faults.lock() = Some(faults);
        self.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    Accept,
    Fail(NetworkError),
    /// Accepts after a slow handshake
    Delay(Duration),
    /// Never completes the handshake
    Hang,
}

/// Connector whose channels are driven by the test through their endpoints
pub struct MemoryConnector {
    behavior: Mutex<ConnectBehavior>,
    endpoints: mpsc::UnboundedSender<ChannelEndpoint>,
    opens: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEndpoint>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            behavior: Mutex::new(ConnectBehavior::Accept),
            endpoints: tx,
            opens: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, _config: &LiveConfig, _api_key: &str) -> Result<DuplexChannel, NetworkError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().clone();
        match behavior {
            ConnectBehavior::Accept => {
                let (channel, endpoint) = DuplexChannel::pair(64);
                let _ = self.endpoints.send(endpoint);
                Ok(channel)
            }
            ConnectBehavior::Delay(wait) => {
                tokio::time::sleep(wait).await;
                let (channel, endpoint) = DuplexChannel::pair(64);
                let _ = self.endpoints.send(endpoint);
                Ok(channel)
            }
            ConnectBehavior::Fail(e) => Err(e),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }
}

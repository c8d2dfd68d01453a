//! Session lifecycle
//!
//! Owns the single voice session: acquires the devices and the channel in
//! order, runs the uplink and coordinator tasks while streaming, and releases
//! everything on every exit path. State changes are published on a broadcast
//! channel.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::buffer::{create_frame_queue, SharedFrameQueue};
use crate::audio::capture::{CaptureDevice, FrameAssembler};
use crate::audio::fault::{fault_channel, FaultReceiver, FaultReporter};
use crate::audio::playback::PlaybackOutput;
use crate::codec::encoder::{CaptureEncoder, LevelMeter};
use crate::config::{AppConfig, AudioConfig, LiveConfig};
use crate::error::{AudioError, Error, NetworkError, Result, SessionError};
use crate::network::channel::{ChannelSender, Connector, EventStream, InboundEvent};
use crate::session::backend::AudioBackend;
use crate::session::interrupt::InterruptionController;
use crate::session::scheduler::{create_schedule, PlaybackScheduler, SharedSchedule};
use crate::session::state::SessionState;

const TRANSITION_CAPACITY: usize = 32;

/// How long `stop` waits for a cancelled start to wind down
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of the session for display
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Microphone level in `[0, 100]`
    pub level: f32,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    /// Frames produced by the microphone
    pub frames_captured: u64,
    pub frames_sent: u64,
    /// Frames lost to a full capture queue or a saturated transport
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub interruptions: u64,
    pub active_units: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct SessionInfo {
    id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Why a streaming session is ending
enum Shutdown {
    Requested,
    RemoteClosed,
    Failed(Error),
}

/// Everything one session holds. Filled in acquisition order.
struct Resources {
    cancel: CancellationToken,
    queue: SharedFrameQueue,
    schedule: SharedSchedule,
    capture: Option<Box<dyn CaptureDevice>>,
    output: Option<Arc<dyn PlaybackOutput>>,
    sender: Option<ChannelSender>,
    scheduler: Option<Arc<PlaybackScheduler>>,
    interrupter: Option<Arc<InterruptionController>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Resources {
    fn new(cancel: CancellationToken, queue_capacity: usize) -> Self {
        Self {
            cancel,
            queue: create_frame_queue(queue_capacity),
            schedule: create_schedule(),
            capture: None,
            output: None,
            sender: None,
            scheduler: None,
            interrupter: None,
            tasks: Vec::new(),
        }
    }

    /// Release whatever was acquired. Each step runs even if an earlier one
    /// failed; calling it again is a no-op.
    fn release(&mut self) {
        self.cancel.cancel();

        if let Some(sender) = self.sender.take() {
            sender.close();
        }

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                tracing::warn!("Failed to release capture device: {}", e);
            }
        }

        let stopped = self.schedule.lock().purge(Duration::ZERO);
        if stopped > 0 {
            tracing::debug!("Stopped {} playback unit(s) on teardown", stopped);
        }

        if let Some(output) = self.output.take() {
            if let Err(e) = output.close() {
                tracing::warn!("Failed to release output device: {}", e);
            }
        }

        self.queue.clear();
        self.scheduler = None;
        self.interrupter = None;
        // Tasks exit on the cancelled token
        self.tasks.clear();
    }
}

/// Handles to what a successful connect produced
struct Acquired {
    events: EventStream,
    output: Arc<dyn PlaybackOutput>,
    sender: ChannelSender,
}

struct Inner {
    audio: AudioConfig,
    live: LiveConfig,
    api_key: Mutex<Option<String>>,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    state: Mutex<SessionState>,
    session: Mutex<Option<Resources>>,
    /// Cancels the start attempt in flight
    pending: Mutex<Option<CancellationToken>>,
    transitions: broadcast::Sender<SessionState>,
    meter: Arc<LevelMeter>,
    info: Mutex<SessionInfo>,
}

impl Inner {
    /// Move to `next` and publish it. Caller holds the state lock.
    fn transition(&self, state: &mut SessionState, next: SessionState) {
        if !state.can_transition_to(next) {
            tracing::warn!("Unexpected session transition {} -> {}", state, next);
        }
        tracing::info!("Session {} -> {}", state, next);
        *state = next;
        // No subscribers is fine
        let _ = self.transitions.send(next);
    }

    fn settle_idle(&self) {
        self.meter.reset();
        {
            let mut info = self.info.lock();
            info.id = None;
            info.started_at = None;
        }
        let mut state = self.state.lock();
        self.transition(&mut state, SessionState::Idle);
    }

    fn record_error(&self, err: &Error) {
        self.info.lock().last_error = Some(err.user_reason());
    }

    /// Tear down a streaming session. Safe to call from any path, any number
    /// of times; only the first call does anything.
    fn shutdown(&self, cause: Shutdown) {
        let mut resources = {
            let mut state = self.state.lock();
            let Some(resources) = self.session.lock().take() else {
                return;
            };
            let next = match cause {
                Shutdown::Failed(_) => SessionState::Error,
                _ => SessionState::Closing,
            };
            self.transition(&mut state, next);
            resources
        };

        match &cause {
            Shutdown::Requested => tracing::info!("Stopping session"),
            Shutdown::RemoteClosed => tracing::info!("Remote side closed the session"),
            Shutdown::Failed(err) => {
                tracing::error!("Session failed: {}", err);
                self.record_error(err);
            }
        }

        resources.release();
        self.settle_idle();
    }

    /// Returns true when a start attempt was cancelled and still has to
    /// release what it acquired.
    fn request_stop(&self) -> bool {
        let state = self.state.lock();
        let current = *state;
        match current {
            SessionState::Connecting => match self.pending.lock().as_ref() {
                Some(token) => {
                    tracing::info!("Cancelling session start");
                    token.cancel();
                    true
                }
                None => false,
            },
            SessionState::Streaming => {
                drop(state);
                self.shutdown(Shutdown::Requested);
                false
            }
            // Teardown already under way on another path
            SessionState::Closing | SessionState::Error => true,
            SessionState::Idle => {
                tracing::debug!("Stop ignored in state {}", current);
                false
            }
        }
    }
}

/// The single voice session
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// The API credential is read from the environment variable named by
    /// `live.api_key_env`; see [`SessionManager::set_api_key`] to override it.
    pub fn new(config: &AppConfig, backend: Arc<dyn AudioBackend>, connector: Arc<dyn Connector>) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                audio: config.audio.clone(),
                live: config.live.clone(),
                api_key: Mutex::new(config.live.api_key().ok()),
                backend,
                connector,
                state: Mutex::new(SessionState::Idle),
                session: Mutex::new(None),
                pending: Mutex::new(None),
                transitions,
                meter: Arc::new(LevelMeter::new()),
                info: Mutex::new(SessionInfo::default()),
            }),
        }
    }

    pub fn set_api_key(&self, key: Option<String>) {
        *self.inner.api_key.lock() = key.filter(|k| !k.trim().is_empty());
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// Latest microphone level; 0 when no session is running
    pub fn level(&self) -> f32 {
        self.inner.meter.get()
    }

    /// Receive every state transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.inner.transitions.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = &self.inner;
        let state = *inner.state.lock();
        let info = inner.info.lock().clone();
        let mut status = SessionStatus {
            state,
            level: inner.meter.get(),
            session_id: info.id,
            started_at: info.started_at,
            frames_captured: 0,
            frames_sent: 0,
            frames_dropped: 0,
            chunks_scheduled: 0,
            interruptions: 0,
            active_units: 0,
            last_error: info.last_error,
        };

        if let Some(resources) = inner.session.lock().as_ref() {
            status.frames_captured = resources.queue.pushed_count();
            status.frames_dropped = resources.queue.dropped_count();
            if let Some(sender) = &resources.sender {
                status.frames_sent = sender.frames_sent();
                status.frames_dropped += sender.frames_dropped();
            }
            if let Some(scheduler) = &resources.scheduler {
                status.chunks_scheduled = scheduler.chunks_scheduled();
            }
            if let Some(interrupter) = &resources.interrupter {
                status.interruptions = interrupter.interruptions();
            }
            status.active_units = resources.schedule.lock().active_len();
        }
        status
    }

    /// Start a session: Idle → Connecting → Streaming.
    ///
    /// Acquires the microphone, the output device and the channel, in that
    /// order. On failure everything acquired so far is released and the
    /// session passes through Error back to Idle. Rejected without side
    /// effects unless the session is Idle.
    pub async fn start(&self) -> Result<()> {
        let (cancel, api_key) = self.begin()?;
        let (faults, fault_rx) = fault_channel();
        let mut resources = Resources::new(cancel, self.inner.audio.queue_capacity);
        let acquired = self.acquire(&mut resources, &api_key, faults).await;

        match self.finish_start(resources, acquired, fault_rx) {
            Ok(()) => Ok(()),
            Err((mut resources, err)) => {
                off_runtime(self.inner.clone(), move |inner| {
                    resources.release();
                    inner.settle_idle();
                })
                .await;
                Err(err)
            }
        }
    }

    /// Stop the session and wait until it is back to Idle. Idempotent.
    ///
    /// While connecting, the start attempt is cancelled instead and
    /// `start` returns [`SessionError::Cancelled`].
    pub async fn stop(&self) {
        // Subscribe first so the final Idle cannot slip past
        let mut transitions = self.subscribe();
        let pending = off_runtime(self.inner.clone(), |inner| inner.request_stop())
            .await
            .unwrap_or(false);
        if pending {
            self.wait_idle(&mut transitions).await;
        }
    }

    async fn wait_idle(&self, transitions: &mut broadcast::Receiver<SessionState>) {
        let settled = tokio::time::timeout(STOP_TIMEOUT, async {
            while self.state() != SessionState::Idle {
                match transitions.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        })
        .await;
        if settled.is_err() {
            tracing::warn!("Session still {} after {:?}", self.state(), STOP_TIMEOUT);
        }
    }

    fn begin(&self) -> Result<(CancellationToken, String)> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if *state != SessionState::Idle {
            return Err(SessionError::AlreadyActive(*state).into());
        }

        let Some(api_key) = inner.api_key.lock().clone() else {
            let err = Error::from(SessionError::MissingCredential);
            tracing::warn!("{}", err);
            inner.record_error(&err);
            return Err(err);
        };

        let cancel = CancellationToken::new();
        *inner.pending.lock() = Some(cancel.clone());
        *inner.info.lock() = SessionInfo {
            id: Some(Uuid::new_v4()),
            started_at: Some(Utc::now()),
            last_error: None,
        };
        inner.transition(&mut state, SessionState::Connecting);
        Ok((cancel, api_key))
    }

    async fn acquire(&self, resources: &mut Resources, api_key: &str, faults: FaultReporter) -> Result<Acquired> {
        let inner = &self.inner;
        let cancel = resources.cancel.clone();

        let backend = inner.backend.clone();
        let encoder = CaptureEncoder::new(inner.audio.level_gain, inner.meter.clone());
        let assembler = FrameAssembler::new(inner.audio.frame_size, encoder, resources.queue.clone());
        let capture_faults = faults.clone();
        let capture = until_cancelled(
            &cancel,
            tokio::task::spawn_blocking(move || {
                let mut capture = backend.open_capture(capture_faults)?;
                capture.start(assembler)?;
                Ok::<_, AudioError>(capture)
            }),
        )
        .await?;
        resources.capture = Some(capture);

        let backend = inner.backend.clone();
        let output = until_cancelled(&cancel, tokio::task::spawn_blocking(move || backend.open_output(faults))).await?;
        resources.output = Some(output.clone());

        let channel = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled.into()),
            opened = inner.connector.open(&inner.live, api_key) => opened?,
        };
        let (sender, events) = channel.split();
        resources.sender = Some(sender.clone());

        Ok(Acquired { events, output, sender })
    }

    /// Publish the outcome of a start attempt. On failure the resources
    /// come back to the caller for release off the async workers.
    fn finish_start(
        &self,
        mut resources: Resources,
        acquired: Result<Acquired>,
        mut faults: FaultReceiver,
    ) -> std::result::Result<(), (Resources, Error)> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        inner.pending.lock().take();

        // A stop or a device fault that raced the last acquisition step still wins
        let acquired = match acquired {
            Ok(_) if resources.cancel.is_cancelled() => Err(SessionError::Cancelled.into()),
            Ok(acquired) => match faults.try_recv() {
                Ok(fault) => Err(fault.into()),
                Err(_) => Ok(acquired),
            },
            other => other,
        };

        match acquired {
            Ok(Acquired { events, output, sender }) => {
                let schedule = resources.schedule.clone();
                schedule.lock().purge(output.now());
                let scheduler = Arc::new(PlaybackScheduler::new(schedule.clone(), output.clone()));
                let interrupter = Arc::new(InterruptionController::new(schedule));

                // Nothing recorded while connecting goes out late
                resources.queue.clear();

                let cancel = resources.cancel.clone();
                resources.tasks.push(tokio::spawn(run_uplink(
                    resources.queue.clone(),
                    sender,
                    cancel.clone(),
                )));
                resources.tasks.push(tokio::spawn(run_coordinator(
                    inner.clone(),
                    events,
                    scheduler.clone(),
                    interrupter.clone(),
                    output,
                    faults,
                    cancel,
                )));
                resources.scheduler = Some(scheduler);
                resources.interrupter = Some(interrupter);

                *inner.session.lock() = Some(resources);
                inner.transition(&mut state, SessionState::Streaming);
                Ok(())
            }
            Err(err) => {
                let cancelled = matches!(err, Error::Session(SessionError::Cancelled));
                if cancelled {
                    inner.transition(&mut state, SessionState::Closing);
                } else {
                    tracing::error!("Session failed to start: {}", err);
                    inner.record_error(&err);
                    inner.transition(&mut state, SessionState::Error);
                }
                Err((resources, err))
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(token) = self.inner.pending.lock().as_ref() {
            token.cancel();
        }
        self.inner.shutdown(Shutdown::Requested);
    }
}

/// Run teardown on the blocking pool; device release joins audio threads
async fn off_runtime<T: Send + 'static>(
    inner: Arc<Inner>,
    teardown: impl FnOnce(&Inner) -> T + Send + 'static,
) -> Option<T> {
    match tokio::task::spawn_blocking(move || teardown(&inner)).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!("Session teardown task failed: {}", e);
            None
        }
    }
}

/// Await a blocking device call unless the attempt is cancelled first
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    task: JoinHandle<std::result::Result<T, AudioError>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled.into()),
        joined = task => match joined {
            Ok(result) => result.map_err(Error::from),
            Err(e) => Err(AudioError::StreamError(e.to_string()).into()),
        },
    }
}

/// Forward captured frames to the channel until cancelled
async fn run_uplink(queue: SharedFrameQueue, sender: ChannelSender, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = queue.pop() => sender.send(&frame),
        }
    }
    tracing::debug!("Uplink finished");
}

/// Apply inbound events in order until the stream ends, a device fails or
/// the session stops
async fn run_coordinator(
    inner: Arc<Inner>,
    mut events: EventStream,
    scheduler: Arc<PlaybackScheduler>,
    interrupter: Arc<InterruptionController>,
    output: Arc<dyn PlaybackOutput>,
    mut faults: FaultReceiver,
    cancel: CancellationToken,
) {
    let end = |cause: Shutdown| off_runtime(inner.clone(), move |inner| inner.shutdown(cause));

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(fault) = faults.recv() => {
                end(Shutdown::Failed(fault.into())).await;
                break;
            }
            event = events.recv() => event,
        };

        match event {
            Some(InboundEvent::AudioChunk(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                if let Err(e) = scheduler.schedule(&chunk, output.now()) {
                    end(Shutdown::Failed(e.into())).await;
                    break;
                }
            }
            Some(InboundEvent::Interruption) => {
                interrupter.on_interrupt(output.now());
            }
            Some(InboundEvent::TransportError(reason)) => {
                end(Shutdown::Failed(NetworkError::Transport(reason).into())).await;
                break;
            }
            Some(InboundEvent::Closed) | None => {
                end(Shutdown::RemoteClosed).await;
                break;
            }
        }
    }
    tracing::debug!("Coordinator finished");
}

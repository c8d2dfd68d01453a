//! Speech playback
//!
//! [`PlaybackOutput`] is the device-playback capability used by the session:
//! schedule a buffer at a time on the device clock, stop it, and get told
//! when it finishes. [`CpalOutput`] implements it with a small mixer running
//! inside the cpal output callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioChunk;
use crate::audio::device::resolve_output;
use crate::audio::fault::FaultReporter;
use crate::codec::resample::resample_chunk;
use crate::error::AudioError;

/// Identifier of one scheduled playback unit; never reused within a process
pub type UnitId = u64;

/// Natural-completion callback for a scheduled unit
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Device-playback capability
pub trait PlaybackOutput: Send + Sync {
    /// Current position of the device clock
    fn now(&self) -> Duration;

    /// Schedule mono samples to start at `start_at` on the device clock.
    ///
    /// `on_complete` runs once when the unit finishes on its own, on a device
    /// thread. It must never run from inside this call.
    fn schedule(
        &self,
        id: UnitId,
        samples: Arc<[f32]>,
        sample_rate: u32,
        start_at: Duration,
        on_complete: Completion,
    ) -> Result<(), AudioError>;

    /// Silence a unit immediately. Its completion callback is dropped unrun.
    fn stop(&self, id: UnitId);

    /// Release the output device. Safe to call repeatedly.
    fn close(&self) -> Result<(), AudioError>;
}

struct Voice {
    id: UnitId,
    samples: Vec<f32>,
    start_frame: u64,
    on_complete: Option<Completion>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mixes scheduled voices against a frame-counting device clock
struct Mixer {
    voices: Mutex<Vec<Voice>>,
    frames_rendered: AtomicU64,
    sample_rate: u32,
    channels: u16,
}

impl Mixer {
    fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            voices: Mutex::new(Vec::new()),
            frames_rendered: AtomicU64::new(0),
            sample_rate,
            channels: channels.max(1),
        }
    }

    fn now(&self) -> Duration {
        let frames = self.frames_rendered.load(Ordering::Acquire);
        Duration::from_nanos(frames * 1_000_000_000 / self.sample_rate as u64)
    }

    fn frame_at(&self, at: Duration) -> u64 {
        (at.as_nanos() * self.sample_rate as u128 / 1_000_000_000) as u64
    }

    /// Device frames covering `[start_at, start_at + duration)`.
    ///
    /// Both ends are rounded the same way, so a unit starting where the
    /// previous one ends begins on the very next frame.
    fn frame_span(&self, start_at: Duration, duration: Duration) -> (u64, usize) {
        let start = self.frame_at(start_at);
        let end = self.frame_at(start_at + duration);
        (start, (end - start) as usize)
    }

    /// Render one device buffer of interleaved output
    fn render(&self, out: &mut [f32]) {
        let channels = self.channels as usize;
        let frames = (out.len() / channels) as u64;
        let base = self.frames_rendered.load(Ordering::Acquire);
        let window_end = base + frames;
        out.fill(0.0);

        let mut finished = Vec::new();
        {
            let mut voices = self.voices.lock();
            for voice in voices.iter() {
                let from = voice.start_frame.max(base);
                let to = voice.end_frame().min(window_end);
                for frame in from..to {
                    let sample = voice.samples[(frame - voice.start_frame) as usize];
                    let offset = (frame - base) as usize * channels;
                    for slot in &mut out[offset..offset + channels] {
                        *slot += sample;
                    }
                }
            }
            voices.retain_mut(|voice| {
                if voice.end_frame() <= window_end {
                    if let Some(done) = voice.on_complete.take() {
                        finished.push(done);
                    }
                    false
                } else {
                    true
                }
            });
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }
        self.frames_rendered.fetch_add(frames, Ordering::Release);

        // Outside the mixer lock: callbacks take the session schedule lock
        for done in finished {
            done();
        }
    }

    fn insert(&self, voice: Voice) {
        self.voices.lock().push(voice);
    }

    fn remove(&self, id: UnitId) -> bool {
        let mut voices = self.voices.lock();
        let before = voices.len();
        voices.retain(|v| v.id != id);
        voices.len() != before
    }

    fn clear(&self) {
        self.voices.lock().clear();
    }

    #[cfg(test)]
    fn active_voices(&self) -> usize {
        self.voices.lock().len()
    }
}

/// Playback on a cpal output device
pub struct CpalOutput {
    mixer: Arc<Mixer>,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Open the output device and start its stream.
    ///
    /// Fails with [`AudioError::DeviceUnavailable`] if the device cannot be
    /// acquired. Stream errors after that go to `faults`.
    pub fn open(device_id: Option<&str>, faults: FaultReporter) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = bounded::<Result<Arc<Mixer>, AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let device_id = device_id.map(str::to_string);

        let handle = thread::Builder::new()
            .name("voice-playback".to_string())
            .spawn(move || {
                let opened = open_output_stream(device_id.as_deref(), faults);
                match opened {
                    Ok((stream, mixer)) => {
                        let _ = ready_tx.send(Ok(mixer));
                        while running_thread.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        drop(stream);
                        tracing::debug!("Playback stream released");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(mixer)) => Ok(Self {
                mixer,
                running,
                thread_handle: Mutex::new(Some(handle)),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError("playback thread exited during startup".into()))
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate
    }
}

impl PlaybackOutput for CpalOutput {
    fn now(&self) -> Duration {
        self.mixer.now()
    }

    fn schedule(
        &self,
        id: UnitId,
        samples: Arc<[f32]>,
        sample_rate: u32,
        start_at: Duration,
        on_complete: Completion,
    ) -> Result<(), AudioError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(AudioError::StreamError("output closed".into()));
        }
        let duration = AudioChunk::duration_of(samples.len(), sample_rate);
        let (start_frame, frames) = self.mixer.frame_span(start_at, duration);
        let samples = resample_chunk(&samples, sample_rate, self.mixer.sample_rate, frames)?;
        self.mixer.insert(Voice {
            id,
            samples,
            start_frame,
            on_complete: Some(on_complete),
        });
        Ok(())
    }

    fn stop(&self, id: UnitId) {
        if self.mixer.remove(id) {
            tracing::trace!("Stopped playback unit {}", id);
        }
    }

    fn close(&self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        self.mixer.clear();
        let handle = self.thread_handle.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| AudioError::StreamError("playback thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn open_output_stream(
    device_id: Option<&str>,
    faults: FaultReporter,
) -> Result<(cpal::Stream, Arc<Mixer>), AudioError> {
    let device = resolve_output(device_id)?;
    let supported = device.default_config()?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();

    tracing::info!(
        "Opening output '{}': {}Hz, {} channels, {:?}",
        device.name,
        config.sample_rate.0,
        config.channels,
        format
    );

    let mixer = Arc::new(Mixer::new(config.sample_rate.0, config.channels));
    let device = device.into_inner();
    let stream = match format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, mixer.clone(), faults),
        SampleFormat::I16 => build_output::<i16>(&device, &config, mixer.clone(), faults),
        SampleFormat::U16 => build_output::<u16>(&device, &config, mixer.clone(), faults),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }?;
    stream
        .play()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
    Ok((stream, mixer))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mixer>,
    faults: FaultReporter,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| faults.report(AudioError::StreamError(err.to_string())),
            None,
        )
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}

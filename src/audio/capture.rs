//! Microphone capture
//!
//! The input stream runs on its own thread at the cadence of the device
//! buffer. Each callback down-mixes, resamples to the wire rate, cuts fixed
//! size windows, encodes them and pushes the frames into a bounded queue.
//! Nothing on this path touches the network or waits on a lock held by it.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SharedFrameQueue;
use crate::audio::device::resolve_input;
use crate::audio::fault::FaultReporter;
use crate::codec::encoder::CaptureEncoder;
use crate::codec::resample::{downmix, StreamResampler};
use crate::constants::CAPTURE_SAMPLE_RATE;
use crate::error::AudioError;

/// Device-capture capability
///
/// `start` either begins delivering samples to the assembler or fails
/// without producing any frame. Failures after that go to the device's
/// [`FaultReporter`].
pub trait CaptureDevice: Send {
    fn start(&mut self, assembler: FrameAssembler) -> Result<(), AudioError>;

    /// Stop and release the device. Safe to call repeatedly.
    fn stop(&mut self) -> Result<(), AudioError>;
}

/// Turns raw device callbacks into fixed-size outbound frames
pub struct FrameAssembler {
    channels: u16,
    resampler: StreamResampler,
    window: Vec<f32>,
    frame_size: usize,
    encoder: CaptureEncoder,
    queue: SharedFrameQueue,
}

impl FrameAssembler {
    /// Assembler expecting mono input already at the wire rate
    pub fn new(frame_size: usize, encoder: CaptureEncoder, queue: SharedFrameQueue) -> Self {
        Self {
            channels: 1,
            resampler: StreamResampler::passthrough(),
            window: Vec::with_capacity(frame_size),
            frame_size: frame_size.max(1),
            encoder,
            queue,
        }
    }

    /// Declare the device's native format
    pub fn set_input_format(&mut self, sample_rate: u32, channels: u16) -> Result<(), AudioError> {
        self.resampler = StreamResampler::new(sample_rate, CAPTURE_SAMPLE_RATE)?;
        self.channels = channels.max(1);
        self.window.clear();
        Ok(())
    }

    /// Feed one device callback worth of interleaved samples.
    ///
    /// Returns the number of frames handed to the queue.
    pub fn push_interleaved(&mut self, data: &[f32]) -> usize {
        let mono = downmix(data, self.channels);
        let resampled = match self.resampler.process(&mono) {
            Ok(resampled) => resampled,
            Err(e) => {
                tracing::warn!("Dropping capture callback: {}", e);
                return 0;
            }
        };

        let mut emitted = 0;
        let mut rest = &resampled[..];
        while !rest.is_empty() {
            let take = (self.frame_size - self.window.len()).min(rest.len());
            self.window.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.window.len() == self.frame_size {
                let frame = self.encoder.encode(&self.window);
                self.window.clear();
                if self.queue.push(frame) {
                    emitted += 1;
                } else {
                    tracing::trace!("Outbound queue full, dropping newest frame");
                }
            }
        }
        emitted
    }
}

/// Capture from a cpal input device
pub struct CpalCapture {
    /// Configured device id, default input when `None`
    device_id: Option<String>,

    /// Stream errors raised after startup
    faults: FaultReporter,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new(device_id: Option<&str>, faults: FaultReporter) -> Self {
        Self {
            device_id: device_id.map(str::to_string),
            faults,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn start(&mut self, mut assembler: FrameAssembler) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let faults = self.faults.clone();
        let running = self.running.clone();
        let device_id = self.device_id.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                let opened = open_input_stream(device_id.as_deref(), &mut assembler).and_then(
                    |(device, config, format)| {
                        let running_cb = running.clone();
                        let on_samples = move |data: &[f32]| {
                            if !running_cb.load(Ordering::Relaxed) {
                                return;
                            }
                            assembler.push_interleaved(data);
                        };
                        let stream = match format {
                            SampleFormat::F32 => build_input::<f32>(&device, &config, on_samples, faults),
                            SampleFormat::I16 => build_input::<i16>(&device, &config, on_samples, faults),
                            SampleFormat::U16 => build_input::<u16>(&device, &config, on_samples, faults),
                            other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                        }?;
                        stream
                            .play()
                            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
                        Ok(stream)
                    },
                );

                match opened {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Keep thread alive while running
                        while running.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        drop(stream);
                        tracing::debug!("Capture stream released");
                    }
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(AudioError::StreamError(e.to_string()));
            }
        };

        self.thread_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("Audio capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = self.stop();
                Err(e)
            }
            Err(_) => {
                let _ = self.stop();
                Err(AudioError::StreamError("capture thread exited during startup".into()))
            }
        }
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);

        match self.thread_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| AudioError::StreamError("capture thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn open_input_stream(
    device_id: Option<&str>,
    assembler: &mut FrameAssembler,
) -> Result<(cpal::Device, StreamConfig, SampleFormat), AudioError> {
    let device = resolve_input(device_id)?;
    let supported = device.default_config()?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();

    tracing::info!(
        "Opening input '{}': {}Hz, {} channels, {:?}",
        device.name,
        config.sample_rate.0,
        config.channels,
        format
    );
    assembler.set_input_format(config.sample_rate.0, config.channels)?;
    Ok((device.into_inner(), config, format))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut on_samples: impl FnMut(&[f32]) + Send + 'static,
    faults: FaultReporter,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                on_samples(&scratch);
            },
            move |err| faults.report(AudioError::StreamError(err.to_string())),
            None,
        )
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_frame_queue;
    use crate::codec::encoder::LevelMeter;

    fn assembler(frame_size: usize, capacity: usize) -> (FrameAssembler, SharedFrameQueue, Arc<LevelMeter>) {
        let queue = create_frame_queue(capacity);
        let meter = Arc::new(LevelMeter::new());
        let encoder = CaptureEncoder::new(400.0, meter.clone());
        (FrameAssembler::new(frame_size, encoder, queue.clone()), queue, meter)
    }

    #[test]
    fn test_windows_split_across_callbacks() {
        let (mut assembler, queue, _) = assembler(4096, 8);
        assert_eq!(assembler.push_interleaved(&[0.0; 3000]), 0);
        assert_eq!(assembler.push_interleaved(&[0.0; 3000]), 1);
        assert_eq!(assembler.push_interleaved(&[0.0; 3000]), 1);

        let first = queue.try_pop().unwrap();
        assert_eq!(first.samples().len(), 4096);
        assert_eq!(first.sequence(), 0);
        assert_eq!(queue.try_pop().unwrap().sequence(), 1);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_stereo_48k_is_converted() {
        let (mut assembler, queue, _) = assembler(160, 64);
        assembler.set_input_format(48_000, 2).unwrap();
        // 100ms of stereo at 48kHz
        let emitted = assembler.push_interleaved(&vec![0.1; 9600]);
        assert!(emitted >= 9, "emitted {}", emitted);

        let mut last = None;
        while let Some(frame) = queue.try_pop() {
            last = Some(frame);
        }
        let expected = (0.1 * 32767.0) as i16;
        assert!(last
            .unwrap()
            .samples()
            .iter()
            .all(|&s| (s - expected).abs() <= 4));
    }

    #[test]
    fn test_level_meter_updates() {
        let (mut assembler, _queue, meter) = assembler(64, 4);
        assembler.push_interleaved(&[1.0; 64]);
        assert_eq!(meter.get(), 100.0);
    }

    #[test]
    fn test_saturated_queue_never_blocks() {
        let (mut assembler, queue, _) = assembler(16, 2);
        let emitted = assembler.push_interleaved(&[0.0; 16 * 5]);
        assert_eq!(emitted, 2);
        assert_eq!(queue.dropped_count(), 3);
    }
}

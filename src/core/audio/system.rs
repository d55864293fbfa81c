//! System microphone and speakers via cpal.
//!
//! cpal streams are not `Send` on every platform, so each device keeps its
//! stream on a dedicated thread and exchanges samples with it over
//! crossbeam channels. The capture side converts whatever the hardware
//! delivers to mono PCM16 at the session rate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::device::{AudioFormat, CaptureDevice, PlaybackDevice};
use crate::errors::{ClientError, ClientResult};

/// How long a read may wait for the input stream before it counts as failed.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Playback audio buffered ahead of the output callback.
const MAX_QUEUED_MS: usize = 400;

/// Callback chunks buffered between the input stream and the reader.
const CAPTURE_CHANNEL_CHUNKS: usize = 64;

/// Names of the available input and output devices.
#[derive(Debug, Clone, Default)]
pub struct AudioDevices {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Enumerate devices on the default host.
///
/// # Errors
///
/// Returns [`ClientError::Device`] if the host cannot enumerate devices.
pub fn list_devices() -> ClientResult<AudioDevices> {
    let host = cpal::default_host();
    let names = |devices: Vec<cpal::Device>| {
        devices
            .into_iter()
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect::<Vec<_>>()
    };

    let inputs = host
        .input_devices()
        .map_err(|e| ClientError::Device(format!("cannot enumerate devices: {e}")))?
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| ClientError::Device(format!("cannot enumerate devices: {e}")))?
        .collect();

    Ok(AudioDevices {
        inputs: names(inputs),
        outputs: names(outputs),
    })
}

fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into())
}

fn find_input(name: Option<&str>) -> ClientResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| ClientError::Device(format!("cannot enumerate devices: {e}")))?
            .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
            .ok_or_else(|| ClientError::Device(format!("input device '{name}' not found"))),
        None => host
            .default_input_device()
            .ok_or_else(|| ClientError::Device("no default input device".into())),
    }
}

fn find_output(name: Option<&str>) -> ClientResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| ClientError::Device(format!("cannot enumerate devices: {e}")))?
            .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
            .ok_or_else(|| ClientError::Device(format!("output device '{name}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| ClientError::Device("no default output device".into())),
    }
}

/// Thread that owns a live cpal stream until told to stop.
struct StreamThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    /// Spawn `build` on its own thread and wait until the stream is playing.
    fn spawn<F>(name: &str, build: F) -> ClientResult<Self>
    where
        F: FnOnce() -> ClientResult<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<ClientResult<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(ClientError::Device(format!(
                        "failed to start stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Either an explicit stop or the sender being dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| ClientError::Device(format!("failed to spawn audio thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop: stop_tx,
                handle,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(ClientError::Device("audio thread exited early".into()))
            }
        }
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            error!("audio stream thread panicked");
        }
    }
}

// =============================================================================
// Capture
// =============================================================================

/// Microphone capture.
pub struct CpalCapture {
    device_name: Option<String>,
    samples: Option<Receiver<Vec<f32>>>,
    pending: VecDeque<i16>,
    stream_error: Arc<Mutex<Option<String>>>,
    stream: Option<StreamThread>,
}

impl CpalCapture {
    /// Capture from the named input device, or the host default.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            samples: None,
            pending: VecDeque::new(),
            stream_error: Arc::new(Mutex::new(None)),
            stream: None,
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn open(&mut self, format: &AudioFormat) -> ClientResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (tx, rx) = crossbeam_channel::bounded::<Vec<f32>>(CAPTURE_CHANNEL_CHUNKS);
        let wanted = self.device_name.clone();
        let target_rate = format.sample_rate;
        let stream_error = Arc::clone(&self.stream_error);
        *stream_error.lock() = None;

        let stream = StreamThread::spawn("waav-capture", move || {
            let device = find_input(wanted.as_deref())?;
            info!("using input device: {}", device_name(&device));

            let default_config = device
                .default_input_config()
                .map_err(|e| ClientError::Device(format!("no default input config: {e}")))?;
            let native_rate = default_config.sample_rate();
            let native_channels = default_config.channels();
            let stream_config = StreamConfig {
                channels: native_channels,
                sample_rate: native_rate,
                buffer_size: cpal::BufferSize::Default,
            };
            if native_rate != target_rate {
                info!("will resample input from {native_rate}Hz to {target_rate}Hz");
            }

            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                        let mono = if native_channels > 1 {
                            to_mono(data, native_channels)
                        } else {
                            data.to_vec()
                        };
                        offer_chunk(&tx, resample(&mono, native_rate, target_rate));
                    },
                    move |err| {
                        error!("audio input stream error: {err}");
                        *stream_error.lock() = Some(err.to_string());
                    },
                    None,
                )
                .map_err(|e| ClientError::Device(format!("failed to build input stream: {e}")))
        })?;

        self.samples = Some(rx);
        self.pending.clear();
        self.stream = Some(stream);
        Ok(())
    }

    fn read(&mut self, frames: usize) -> ClientResult<Vec<u8>> {
        let samples = self
            .samples
            .as_ref()
            .ok_or_else(|| ClientError::Device("input stream is not open".into()))?;

        while self.pending.len() < frames {
            if let Some(err) = self.stream_error.lock().take() {
                return Err(ClientError::Device(format!("input stream failed: {err}")));
            }
            match samples.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self.pending.extend(chunk.into_iter().map(f32_to_pcm16)),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ClientError::Device("input device stopped delivering audio".into()));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ClientError::Device("input stream closed".into()));
                }
            }
        }

        Ok(self
            .pending
            .drain(..frames)
            .flat_map(i16::to_le_bytes)
            .collect())
    }

    fn close(&mut self) {
        self.samples = None;
        self.pending.clear();
        if let Some(stream) = self.stream.take() {
            stream.stop();
            debug!("input stream closed");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Playback
// =============================================================================

/// Speaker playback.
pub struct CpalPlayback {
    device_name: Option<String>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    stream_error: Arc<Mutex<Option<String>>>,
    max_queued: usize,
    drain_rate: usize,
    stream: Option<StreamThread>,
}

impl CpalPlayback {
    /// Play to the named output device, or the host default.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            stream_error: Arc::new(Mutex::new(None)),
            max_queued: 0,
            drain_rate: 1,
            stream: None,
        }
    }

    fn queued_duration(&self) -> Duration {
        let queued = self.queue.lock().len();
        Duration::from_millis((queued * 1000 / self.drain_rate.max(1)) as u64)
    }
}

impl PlaybackDevice for CpalPlayback {
    fn open(&mut self, format: &AudioFormat) -> ClientResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let wanted = self.device_name.clone();
        let stream_config = StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let queue = Arc::clone(&self.queue);
        let stream_error = Arc::clone(&self.stream_error);
        *stream_error.lock() = None;

        let stream = StreamThread::spawn("waav-playback", move || {
            let device = find_output(wanted.as_deref())?;
            info!("using output device: {}", device_name(&device));

            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                        let mut queue = queue.lock();
                        for sample in data.iter_mut() {
                            *sample = queue.pop_front().unwrap_or(0.0);
                        }
                    },
                    move |err| {
                        error!("audio output stream error: {err}");
                        *stream_error.lock() = Some(err.to_string());
                    },
                    None,
                )
                .map_err(|e| ClientError::Device(format!("failed to build output stream: {e}")))
        })?;

        self.drain_rate = format.sample_rate as usize * format.channels as usize;
        self.max_queued = self.drain_rate * MAX_QUEUED_MS / 1000;
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> ClientResult<()> {
        if self.stream.is_none() {
            return Err(ClientError::Device("output stream is not open".into()));
        }
        if let Some(err) = self.stream_error.lock().take() {
            return Err(ClientError::Device(format!("output stream failed: {err}")));
        }

        // Block while the device is far enough ahead
        while self.queue.lock().len() > self.max_queued {
            thread::sleep(Duration::from_millis(10));
        }

        self.queue.lock().extend(pcm16_to_f32(bytes));
        Ok(())
    }

    fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };

        // Let what is already queued play out
        let deadline = Instant::now() + self.queued_duration() + Duration::from_millis(100);
        while !self.queue.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if !self.queue.lock().is_empty() {
            warn!("output stream closed with audio still queued");
        }
        self.queue.lock().clear();
        stream.stop();
        debug!("output stream closed");
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

/// Hand a callback chunk to the reader without blocking the audio thread.
///
/// Returns `false` if the chunk was dropped because the channel is full.
fn offer_chunk(tx: &Sender<Vec<f32>>, chunk: Vec<f32>) -> bool {
    if tx.try_send(chunk).is_err() {
        debug!("audio channel full, dropping chunk");
        return false;
    }
    true
}

// =============================================================================
// Sample conversion
// =============================================================================

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = pos - idx as f64;
            if idx + 1 < samples.len() {
                (samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac) as f32
            } else {
                samples[idx.min(samples.len() - 1)]
            }
        })
        .collect()
}

fn f32_to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn pcm16_to_f32(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
}

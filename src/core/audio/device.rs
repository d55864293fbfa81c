//! Capture and playback device capabilities.
//!
//! These traits are the narrow seam between the turn-taking core and real
//! audio hardware. Implementations are blocking and stateful only in the
//! sense of holding an open stream; everything else lives in
//! [`AudioSource`](super::AudioSource) and [`AudioSink`](super::AudioSink).

use crate::core::realtime::REALTIME_SAMPLE_RATE;
use crate::errors::ClientResult;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Frames per capture chunk.
pub const DEFAULT_FRAMES_PER_CHUNK: usize = 1024;

/// Fixed stream parameters shared by capture and playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Frames per capture chunk
    pub frames_per_chunk: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: REALTIME_SAMPLE_RATE,
            channels: 1,
            frames_per_chunk: DEFAULT_FRAMES_PER_CHUNK,
        }
    }
}

impl AudioFormat {
    /// Size in bytes of one capture chunk.
    pub fn chunk_bytes(&self) -> usize {
        self.frames_per_chunk * self.channels as usize * BYTES_PER_SAMPLE
    }
}

/// A microphone-like input.
pub trait CaptureDevice: Send {
    /// Open the input stream.
    fn open(&mut self, format: &AudioFormat) -> ClientResult<()>;

    /// Read exactly `frames` frames of PCM16 LE audio, blocking until they
    /// are available.
    fn read(&mut self, frames: usize) -> ClientResult<Vec<u8>>;

    /// Close the input stream. Must be safe to call when already closed.
    fn close(&mut self);
}

/// A speaker-like output.
pub trait PlaybackDevice: Send {
    /// Open the output stream.
    fn open(&mut self, format: &AudioFormat) -> ClientResult<()>;

    /// Render PCM16 LE bytes. May block until the device accepts them.
    fn write(&mut self, bytes: &[u8]) -> ClientResult<()>;

    /// Close the output stream. Must be safe to call when already closed.
    fn close(&mut self);
}

//! Fixed-size frame producer over a capture device.

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::device::{AudioFormat, CaptureDevice};
use crate::errors::{ClientError, ClientResult};

/// Lazy sequence of capture frames that can be stopped and started again.
///
/// Single-producer: every method takes `&mut self`, so only the capture loop
/// that owns the source can pull frames. The device is released on
/// [`stop`](Self::stop) and on drop, whichever comes first.
pub struct AudioSource {
    device: Box<dyn CaptureDevice>,
    format: AudioFormat,
    started: bool,
    last_error: Option<ClientError>,
}

impl AudioSource {
    /// Wrap a capture device. Nothing is opened until [`start`](Self::start).
    pub fn new(device: Box<dyn CaptureDevice>, format: AudioFormat) -> Self {
        Self {
            device,
            format,
            started: false,
            last_error: None,
        }
    }

    /// Stream parameters.
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Whether the device is currently open.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Open the device. Calling it on a started source is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Device`] if the device cannot be opened.
    pub fn start(&mut self) -> ClientResult<()> {
        if self.started {
            return Ok(());
        }
        self.device.open(&self.format)?;
        self.started = true;
        info!(
            "audio capture started: {}Hz, {} channel(s), {} frames per chunk",
            self.format.sample_rate, self.format.channels, self.format.frames_per_chunk
        );
        Ok(())
    }

    /// Close the device. Calling it on a stopped source is a no-op.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.device.close();
        self.started = false;
        info!("audio capture stopped");
    }

    /// Read the next chunk.
    ///
    /// Returns `None` when the source is stopped or the device failed; the
    /// failure is kept for [`take_error`](Self::take_error) and the device
    /// is closed.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if !self.started {
            return None;
        }

        let expected = self.format.chunk_bytes();
        let result = self
            .device
            .read(self.format.frames_per_chunk)
            .and_then(|frame| {
                if frame.len() == expected {
                    Ok(frame)
                } else {
                    Err(ClientError::Device(format!(
                        "short read: expected {expected} bytes, got {}",
                        frame.len()
                    )))
                }
            });

        match result {
            Ok(frame) => Some(Bytes::from(frame)),
            Err(e) => {
                warn!("audio capture read failed: {e}");
                self.last_error = Some(e);
                self.stop();
                None
            }
        }
    }

    /// Take the error that ended the last [`next_frame`](Self::next_frame).
    pub fn take_error(&mut self) -> Option<ClientError> {
        self.last_error.take()
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        if self.started {
            debug!("releasing capture device on drop");
        }
        self.stop();
    }
}

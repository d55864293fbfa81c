//! Fake capture and playback devices

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use waav_talk::core::audio::{AudioFormat, CaptureDevice, PlaybackDevice};
use waav_talk::{ClientError, ClientResult};

/// What the session did to a device.
#[derive(Debug, Default)]
pub struct DeviceProbe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    open: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl DeviceProbe {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Everything written, concatenated in order.
    pub fn played(&self) -> Vec<u8> {
        self.writes.lock().concat()
    }

    fn opened(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
    }

    fn closed(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Microphone producing silence at a steady pace.
pub struct FakeMic {
    probe: Arc<DeviceProbe>,
    frame_delay: Duration,
    failing: bool,
}

impl FakeMic {
    pub fn new() -> (Self, Arc<DeviceProbe>) {
        let probe = Arc::new(DeviceProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
                frame_delay: Duration::from_millis(5),
                failing: false,
            },
            probe,
        )
    }

    /// A microphone whose every read fails.
    pub fn broken() -> (Self, Arc<DeviceProbe>) {
        let (mut mic, probe) = Self::new();
        mic.failing = true;
        (mic, probe)
    }
}

impl CaptureDevice for FakeMic {
    fn open(&mut self, _format: &AudioFormat) -> ClientResult<()> {
        self.probe.opened();
        Ok(())
    }

    fn read(&mut self, frames: usize) -> ClientResult<Vec<u8>> {
        std::thread::sleep(self.frame_delay);
        if self.failing {
            return Err(ClientError::Device("microphone unplugged".to_string()));
        }
        Ok(vec![0u8; frames * 2])
    }

    fn close(&mut self) {
        self.probe.closed();
    }
}

/// Speaker recording every write.
pub struct FakeSpeaker {
    probe: Arc<DeviceProbe>,
    failing: bool,
}

impl FakeSpeaker {
    pub fn new() -> (Self, Arc<DeviceProbe>) {
        let probe = Arc::new(DeviceProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
                failing: false,
            },
            probe,
        )
    }

    /// A speaker whose every write fails.
    pub fn broken() -> (Self, Arc<DeviceProbe>) {
        let (mut speaker, probe) = Self::new();
        speaker.failing = true;
        (speaker, probe)
    }
}

impl PlaybackDevice for FakeSpeaker {
    fn open(&mut self, _format: &AudioFormat) -> ClientResult<()> {
        self.probe.opened();
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> ClientResult<()> {
        if self.failing {
            return Err(ClientError::Device("speaker unplugged".to_string()));
        }
        self.probe.writes.lock().push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.probe.closed();
    }
}

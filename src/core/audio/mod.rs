//! Audio capture and playback.

pub mod device;
pub mod sink;
pub mod source;
#[cfg(feature = "audio-io")]
pub mod system;

pub use device::{AudioFormat, BYTES_PER_SAMPLE, CaptureDevice, PlaybackDevice};
pub use sink::{AudioSink, MAX_PLAYBACK_FAILURES, PlaybackStats};
pub use source::AudioSource;
#[cfg(feature = "audio-io")]
pub use system::{AudioDevices, CpalCapture, CpalPlayback, list_devices};

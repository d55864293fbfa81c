//! Initialization helpers for preparing local audio before a session starts.
//!
//! This module powers the device handling of the `waav-talk` binary. Real
//! hardware access lives behind the default `audio-io` feature; a headless
//! build (`--no-default-features`) fails here with an explanation instead of
//! silently running without a microphone.
//!
//! ```text
//! $ cargo run -- --list-devices
//! ```

use anyhow::Result;
#[cfg(not(feature = "audio-io"))]
use anyhow::anyhow;

use crate::config::ClientConfig;
use crate::core::audio::{CaptureDevice, PlaybackDevice};
#[cfg(feature = "audio-io")]
use crate::core::audio::{CpalCapture, CpalPlayback};

/// Capture and playback devices selected by the configuration.
pub type DevicePair = (Box<dyn CaptureDevice>, Box<dyn PlaybackDevice>);

/// Build the configured microphone and speaker.
///
/// Nothing is opened yet; the session opens each device when it needs it.
#[cfg(feature = "audio-io")]
pub fn system_devices(config: &ClientConfig) -> Result<DevicePair> {
    tracing::info!(
        input = config.input_device.as_deref().unwrap_or("<default>"),
        output = config.output_device.as_deref().unwrap_or("<default>"),
        "using system audio devices"
    );
    Ok((
        Box::new(CpalCapture::new(config.input_device.clone())),
        Box::new(CpalPlayback::new(config.output_device.clone())),
    ))
}

#[cfg(not(feature = "audio-io"))]
pub fn system_devices(_config: &ClientConfig) -> Result<DevicePair> {
    Err(anyhow!(
        "`waav-talk` needs the `audio-io` feature to use the microphone and speakers. \
         Rebuild with `--features audio-io`."
    ))
}

/// Print the available input and output devices.
#[cfg(feature = "audio-io")]
pub fn print_devices() -> Result<()> {
    let devices = crate::core::audio::list_devices()?;

    println!("Input devices:");
    for name in &devices.inputs {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in &devices.outputs {
        println!("  {name}");
    }
    Ok(())
}

#[cfg(not(feature = "audio-io"))]
pub fn print_devices() -> Result<()> {
    Err(anyhow!(
        "`waav-talk --list-devices` requires the `audio-io` feature. \
         Rebuild with `--features audio-io`."
    ))
}

#[cfg(all(test, feature = "audio-io"))]
mod tests {
    use super::*;

    #[test]
    fn test_system_devices_open_nothing_up_front() {
        let mut config = ClientConfig::default();
        config.input_device = Some("no such microphone".to_string());
        config.output_device = Some("no such speaker".to_string());

        // Selection is lazy; a missing device only fails when a session opens it
        assert!(system_devices(&config).is_ok());
    }
}

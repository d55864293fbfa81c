use serde::Deserialize;
use std::path::Path;

/// Complete YAML configuration structure
///
/// All fields are optional so a file only needs to name what it overrides.
/// Values present here take precedence over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// realtime:
///   endpoint: "wss://api.openai.com/v1/realtime"
///   api_key: "sk-..."
///   model: "gpt-4o-mini-realtime-preview"
///
/// session:
///   voice: "alloy"
///   instructions: "You are a calm, friendly voice assistant."
///   transcription_model: "whisper-1"
///   temperature: 0.6
///   greeting: true
///
/// vad:
///   enabled: true
///   threshold: 0.5
///   prefix_padding_ms: 300
///   silence_duration_ms: 600
///
/// audio:
///   input_device: "MacBook Pro Microphone"
///   output_device: "MacBook Pro Speakers"
///   frames_per_chunk: 1024
///   flush_threshold_bytes: 4800
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub realtime: Option<RealtimeYaml>,
    pub session: Option<SessionYaml>,
    pub vad: Option<VadYaml>,
    pub audio: Option<AudioYaml>,
}

/// Connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

/// Conversation settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub voice: Option<String>,
    pub instructions: Option<String>,
    /// Set to an empty string to turn input transcription off
    pub transcription_model: Option<String>,
    pub temperature: Option<f32>,
    pub greeting: Option<bool>,
}

/// Server-side voice activity detection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VadYaml {
    pub enabled: Option<bool>,
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

/// Local audio settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub frames_per_chunk: Option<usize>,
    pub flush_threshold_bytes: Option<usize>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

//! Configuration module for the voice client
//!
//! Configuration comes from environment variables (with `.env` loaded at
//! startup by the binary) and, optionally, a YAML file whose values override
//! the environment. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Environment variables
//! - `OPENAI_API_KEY` (required)
//! - `WAAV_TALK_ENDPOINT`, `WAAV_TALK_MODEL`
//! - `WAAV_TALK_VOICE`, `WAAV_TALK_INSTRUCTIONS`, `WAAV_TALK_TRANSCRIPTION_MODEL`,
//!   `WAAV_TALK_TEMPERATURE`, `WAAV_TALK_GREETING`
//! - `WAAV_TALK_VAD_ENABLED`, `WAAV_TALK_VAD_THRESHOLD`,
//!   `WAAV_TALK_VAD_PREFIX_PADDING_MS`, `WAAV_TALK_VAD_SILENCE_DURATION_MS`
//! - `WAAV_TALK_INPUT_DEVICE`, `WAAV_TALK_OUTPUT_DEVICE`,
//!   `WAAV_TALK_FRAMES_PER_CHUNK`, `WAAV_TALK_FLUSH_THRESHOLD_BYTES`
//!
//! # Example
//! ```rust,no_run
//! use waav_talk::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(&PathBuf::from("talk.yaml"))?;
//! println!("Talking to {} as {}", config.model, config.voice);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::str::FromStr;

use url::Url;

use crate::core::audio::AudioFormat;
use crate::core::realtime::{
    ConnectOptions, DEFAULT_FLUSH_THRESHOLD_BYTES, InputAudioTranscription, REALTIME_URL,
    RealtimeModel, RealtimeVoice, SessionConfig, TurnDetection,
};
use crate::core::session::SessionSettings;
use crate::errors::{ClientError, ClientResult};

mod yaml;

pub use yaml::{AudioYaml, RealtimeYaml, SessionYaml, VadYaml, YamlConfig};

/// Instructions used when none are configured.
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a warm, good-humoured voice assistant. Keep your answers short and conversational.";

/// Input transcription model used when none is configured.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Sampling temperature used when none is configured.
pub const DEFAULT_TEMPERATURE: f32 = 0.6;

/// Temperatures the service accepts.
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.6..=1.2;

/// Server-side voice activity detection settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadSettings {
    /// When false, `turn_detection` is sent as null
    pub enabled: bool,
    /// Activation threshold (0.0-1.0)
    pub threshold: f32,
    /// Audio kept before detected speech, in ms
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn, in ms
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 600,
        }
    }
}

/// Client configuration
///
/// Contains everything needed to run a voice session:
/// - Connection settings (endpoint, API key, model)
/// - Conversation settings (voice, instructions, transcription, temperature)
/// - Voice activity detection
/// - Local audio devices and buffering
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Connection
    pub endpoint: String,
    pub api_key: String,
    pub model: RealtimeModel,

    // Conversation
    pub voice: RealtimeVoice,
    pub instructions: String,
    /// `None` turns input transcription off
    pub transcription_model: Option<String>,
    pub temperature: f32,
    /// Ask the assistant to speak first
    pub greeting: bool,

    // Turn detection
    pub vad: VadSettings,

    // Local audio
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub frames_per_chunk: usize,
    /// Playback batch size; 0 plays every fragment as it arrives
    pub flush_threshold_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: REALTIME_URL.to_string(),
            api_key: String::new(),
            model: RealtimeModel::default(),
            voice: RealtimeVoice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            temperature: DEFAULT_TEMPERATURE,
            greeting: true,
            vad: VadSettings::default(),
            input_device: None,
            output_device: None,
            frames_per_chunk: AudioFormat::default().frames_per_chunk,
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD_BYTES,
        }
    }
}

/// Implement Drop to zeroize the API key when ClientConfig is dropped.
impl Drop for ClientConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.api_key.zeroize();
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or the resulting
    /// configuration fails validation.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::load_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Environment variables provide the base configuration and the YAML file
    /// overrides whatever it names. The merged result is validated.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::load_env()?;
        config.apply_yaml(yaml_config);
        config.validate()?;

        Ok(config)
    }

    fn load_env() -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(key) = env_string("OPENAI_API_KEY") {
            config.api_key = key;
        }
        if let Some(endpoint) = env_string("WAAV_TALK_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(model) = env_string("WAAV_TALK_MODEL") {
            config.model = RealtimeModel::from_str_or_default(&model);
        }
        if let Some(voice) = env_string("WAAV_TALK_VOICE") {
            config.voice = RealtimeVoice::from_str_or_default(&voice);
        }
        if let Some(instructions) = env_string("WAAV_TALK_INSTRUCTIONS") {
            config.instructions = instructions;
        }
        if let Ok(model) = env::var("WAAV_TALK_TRANSCRIPTION_MODEL") {
            config.transcription_model = non_empty(model);
        }
        if let Some(temperature) = env_parse("WAAV_TALK_TEMPERATURE")? {
            config.temperature = temperature;
        }
        if let Some(greeting) = env_bool("WAAV_TALK_GREETING")? {
            config.greeting = greeting;
        }

        if let Some(enabled) = env_bool("WAAV_TALK_VAD_ENABLED")? {
            config.vad.enabled = enabled;
        }
        if let Some(threshold) = env_parse("WAAV_TALK_VAD_THRESHOLD")? {
            config.vad.threshold = threshold;
        }
        if let Some(padding) = env_parse("WAAV_TALK_VAD_PREFIX_PADDING_MS")? {
            config.vad.prefix_padding_ms = padding;
        }
        if let Some(silence) = env_parse("WAAV_TALK_VAD_SILENCE_DURATION_MS")? {
            config.vad.silence_duration_ms = silence;
        }

        config.input_device = env_string("WAAV_TALK_INPUT_DEVICE");
        config.output_device = env_string("WAAV_TALK_OUTPUT_DEVICE");
        if let Some(frames) = env_parse("WAAV_TALK_FRAMES_PER_CHUNK")? {
            config.frames_per_chunk = frames;
        }
        if let Some(bytes) = env_parse("WAAV_TALK_FLUSH_THRESHOLD_BYTES")? {
            config.flush_threshold_bytes = bytes;
        }

        Ok(config)
    }

    /// Override fields with the values present in a YAML file.
    pub fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(realtime) = yaml.realtime {
            if let Some(endpoint) = realtime.endpoint {
                self.endpoint = endpoint;
            }
            if let Some(key) = realtime.api_key {
                self.api_key = key;
            }
            if let Some(model) = realtime.model {
                self.model = RealtimeModel::from_str_or_default(&model);
            }
        }

        if let Some(session) = yaml.session {
            if let Some(voice) = session.voice {
                self.voice = RealtimeVoice::from_str_or_default(&voice);
            }
            if let Some(instructions) = session.instructions {
                self.instructions = instructions;
            }
            if let Some(model) = session.transcription_model {
                self.transcription_model = non_empty(model);
            }
            if let Some(temperature) = session.temperature {
                self.temperature = temperature;
            }
            if let Some(greeting) = session.greeting {
                self.greeting = greeting;
            }
        }

        if let Some(vad) = yaml.vad {
            if let Some(enabled) = vad.enabled {
                self.vad.enabled = enabled;
            }
            if let Some(threshold) = vad.threshold {
                self.vad.threshold = threshold;
            }
            if let Some(padding) = vad.prefix_padding_ms {
                self.vad.prefix_padding_ms = padding;
            }
            if let Some(silence) = vad.silence_duration_ms {
                self.vad.silence_duration_ms = silence;
            }
        }

        if let Some(audio) = yaml.audio {
            if audio.input_device.is_some() {
                self.input_device = audio.input_device;
            }
            if audio.output_device.is_some() {
                self.output_device = audio.output_device;
            }
            if let Some(frames) = audio.frames_per_chunk {
                self.frames_per_chunk = frames;
            }
            if let Some(bytes) = audio.flush_threshold_bytes {
                self.flush_threshold_bytes = bytes;
            }
        }
    }

    /// Check the configuration before any connection is attempted.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidConfiguration`] naming the first invalid
    /// setting.
    pub fn validate(&self) -> ClientResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }

        let url = Url::parse(&self.endpoint).map_err(|e| {
            ClientError::InvalidConfiguration(format!("invalid endpoint '{}': {e}", self.endpoint))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidConfiguration(format!(
                "endpoint must use ws:// or wss://, got '{}'",
                self.endpoint
            )));
        }

        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(ClientError::InvalidConfiguration(format!(
                "VAD threshold must be between 0.0 and 1.0, got {}",
                self.vad.threshold
            )));
        }

        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(ClientError::InvalidConfiguration(format!(
                "temperature must be between {} and {}, got {}",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end(),
                self.temperature
            )));
        }

        if self.frames_per_chunk == 0 {
            return Err(ClientError::InvalidConfiguration(
                "frames per chunk must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Options sent in `session.update`.
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::pcm16(self.voice);
        session.instructions = non_empty(self.instructions.clone());
        session.turn_detection = self.vad.enabled.then(|| TurnDetection::ServerVad {
            threshold: self.vad.threshold,
            prefix_padding_ms: self.vad.prefix_padding_ms,
            silence_duration_ms: self.vad.silence_duration_ms,
        });
        session.input_audio_transcription = self
            .transcription_model
            .clone()
            .map(|model| InputAudioTranscription { model });
        session.temperature = Some(self.temperature);
        session
    }

    /// Everything a [`VoiceSession`](crate::core::session::VoiceSession) needs.
    pub fn session_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::new(self.session_config());
        settings.greeting = self.greeting;
        settings.flush_threshold_bytes = self.flush_threshold_bytes;
        settings.format = AudioFormat {
            frames_per_chunk: self.frames_per_chunk,
            ..AudioFormat::default()
        };
        settings
    }

    /// Where and how to connect.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.api_key.clone(), self.model).with_url(self.endpoint.clone())
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().and_then(non_empty)
}

fn env_parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| format!("Invalid value for {name} '{raw}': {e}"))
        })
        .transpose()
}

fn env_bool(name: &str) -> Result<Option<bool>, String> {
    env_string(name)
        .map(|raw| match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(format!("Invalid boolean for {name}: '{raw}'")),
        })
        .transpose()
}

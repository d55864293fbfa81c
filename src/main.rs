use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use waav_talk::{
    ClientConfig, ConversationEvent, RealtimeModel, RealtimeVoice, VoiceSession, init,
};

/// WaaV Talk - Real-time voice conversation client
#[derive(Parser, Debug)]
#[command(name = "waav-talk")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// System instructions for the assistant
    #[arg(short = 'i', long = "instructions")]
    instructions: Option<String>,

    /// Voice the assistant replies with
    #[arg(short = 'v', long = "voice")]
    voice: Option<String>,

    /// Realtime model
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Wait for the user to speak first
    #[arg(long = "no-greeting")]
    no_greeting: bool,

    /// List audio devices and exit
    #[arg(long = "list-devices")]
    list_devices: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut ClientConfig) -> anyhow::Result<()> {
        if let Some(instructions) = &self.instructions {
            config.instructions = instructions.clone();
        }
        if let Some(voice) = &self.voice {
            config.voice = RealtimeVoice::parse(voice).ok_or_else(|| {
                let known: Vec<&str> = RealtimeVoice::all().iter().map(|v| v.as_str()).collect();
                anyhow!("Unknown voice '{voice}'. Available: {}", known.join(", "))
            })?;
        }
        if let Some(model) = &self.model {
            config.model = RealtimeModel::from_str_or_default(model);
            if config.model.as_str() != model.trim().to_lowercase() {
                tracing::warn!("Unknown model '{model}', using {}", config.model);
            }
        }
        if self.no_greeting {
            config.greeting = false;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing, honouring RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    if cli.list_devices {
        return init::print_devices();
    }

    // Load configuration from file or environment
    let mut config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };
    cli.apply(&mut config)?;
    config.validate()?;

    let (capture, playback) = init::system_devices(&config)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, ending conversation");
                cancel.cancel();
            }
        }
    });

    // Print the conversation as it happens
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                ConversationEvent::Transcript { role, text } => println!("[{role}] {text}"),
                ConversationEvent::ServerError(error) => {
                    eprintln!("[service error] {}", error.message)
                }
                _ => {}
            }
        }
    });

    info!(
        "Starting conversation (model {}, voice {})",
        config.model, config.voice
    );
    let session = VoiceSession::new(config.session_settings(), capture, playback)
        .with_observer(events_tx);
    let result = session.run(&config.connect_options(), cancel).await;
    let _ = printer.await;

    let summary = result?;
    println!(
        "Conversation ended after {:.0}s: {} response(s), {} frame(s) sent, {} frame(s) held back while the assistant spoke",
        summary.duration.as_secs_f64(),
        summary.responses_completed,
        summary.frames_forwarded,
        summary.frames_suppressed
    );
    Ok(())
}

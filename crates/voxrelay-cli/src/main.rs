use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use voxrelay_core::config::Config;
use voxrelay_gateway::{Engines, GatewayState};
use voxrelay_media::{build_transcriber, Synthesizer, VoiceLibrary, XttsSynthesizer};
use voxrelay_providers::{Generator, OllamaGenerator};

mod logging;

#[derive(Parser)]
#[command(
    name = "voxrelay",
    about = "Real-time voice relay: speech in, transcript and spoken reply out",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ./voxrelay.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the voice relay server
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,

        /// Disable speech synthesis even if enabled in config
        #[arg(long)]
        no_tts: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Validate configuration and report problems
    Check,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective configuration (file + environment)
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides()?;

    logging::init(&config.logging(), cli.verbose);

    match cli.command {
        Commands::Serve { port, no_tts } => serve(config, port, no_tts).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
        },
        Commands::Check => check(&config, &config_path)?,
    }

    Ok(())
}

/// Build the engine handles shared by every session.
fn build_engines(config: &Config, no_tts: bool) -> Engines {
    let transcriber = build_transcriber(&config.transcription());
    let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(&config.generation()));

    let synthesizer = if config.tts_enabled() && !no_tts {
        let voices = VoiceLibrary::new(config.voices_dir());
        Some(Arc::new(XttsSynthesizer::new(&config.tts(), voices)) as Arc<dyn Synthesizer>)
    } else {
        None
    };

    Engines {
        transcriber,
        generator,
        synthesizer,
    }
}

async fn serve(config: Config, port: Option<u16>, no_tts: bool) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        warn!("{warning}");
    }
    if !errors.is_empty() {
        for err in &errors {
            error!("{err}");
        }
        anyhow::bail!("Invalid configuration ({} error(s))", errors.len());
    }

    let port = port.unwrap_or_else(|| config.gateway_port());
    let engines = build_engines(&config, no_tts);

    info!(
        transcriber = %engines.transcriber.describe(),
        model = %engines.generator.model(),
        tts = engines.synthesizer.is_some(),
        "Starting voxrelay on port {port}"
    );

    let state = GatewayState::new(Arc::new(config), engines);

    #[cfg(feature = "metrics")]
    let state = state.with_prometheus(voxrelay_gateway::metrics::install_prometheus_recorder()?);

    voxrelay_gateway::start_gateway(Arc::new(state), port).await
}

fn check(config: &Config, config_path: &Path) -> anyhow::Result<()> {
    println!("voxrelay v{}", env!("CARGO_PKG_VERSION"));
    if config_path.exists() {
        println!("Config: {}", config_path.display());
    } else {
        println!("Config: {} (not found, using defaults)", config_path.display());
    }

    let transcription = config.transcription();
    println!("Transcription: {:?} ({})", transcription.engine, transcription.model);
    println!("Generation: {} @ {}", config.generation().model, config.generation().endpoint);
    if config.tts_enabled() {
        let voices = VoiceLibrary::new(config.voices_dir());
        println!("TTS: {} (voices: {})", config.tts().endpoint, voices.list().join(", "));
    } else {
        println!("TTS: disabled");
    }

    let (warnings, errors) = config.validate();
    for warning in &warnings {
        println!("warning: {warning}");
    }
    for err in &errors {
        println!("error: {err}");
    }

    if errors.is_empty() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("{} configuration error(s)", errors.len())
    }
}

//! vox: endpoint status and one-shot TTS/STT through the failover engine.
//!
//! Usage:
//!   vox status [--service tts|stt] [--json]
//!   vox speak "Hello there" [--voice af_sky --voice alloy] --out hello.mp3
//!   vox transcribe meeting.wav [--model whisper-1]
//!   vox config
//!
//! Configuration comes from `VOX_CONFIG` / `config/vox.toml` and `VOX_*` env vars
//! (`.env` is loaded first). `RUST_LOG` controls log output; `--verbose` forces debug.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vox_router::{
    Completion, Endpoint, RouterConfig, Selector, ServiceType, SpeechOutput, SpeechPayload,
};

#[derive(Parser, Debug)]
#[command(name = "vox", version, about = "Speech endpoint registry and failover")]
struct Cli {
    /// Config file (TOML). Defaults to config/vox.toml when present.
    #[arg(long, global = true, env = "VOX_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe endpoints and print their health and capabilities
    Status {
        #[arg(long)]
        service: Option<ServiceType>,
        #[arg(long)]
        json: bool,
    },
    /// Synthesize speech and write the audio to a file
    Speak {
        text: String,
        /// Preferred voice, most preferred first (repeatable)
        #[arg(long = "voice")]
        voices: Vec<String>,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Transcribe an audio file and print the text
    Transcribe {
        file: PathBuf,
        /// Preferred model, most preferred first (repeatable)
        #[arg(long = "model")]
        models: Vec<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => RouterConfig::load_from(path),
        None => RouterConfig::load(),
    }
    .context("failed to load configuration")?;

    match cli.command {
        Command::Config => print_config(&config),
        Command::Status { service, json } => status(&config, service, json).await,
        Command::Speak { text, voices, out } => speak(&config, text, voices, &out).await,
        Command::Transcribe { file, models } => transcribe(&config, &file, models).await,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_config(config: &RouterConfig) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("***".to_string());
    }
    print!("{}", toml::to_string_pretty(&shown).context("failed to render configuration")?);
    Ok(())
}

async fn status(config: &RouterConfig, service: Option<ServiceType>, json: bool) -> anyhow::Result<()> {
    let selector = Selector::from_config(config)?;
    let services = match service {
        Some(service) => vec![service],
        None => ServiceType::ALL.to_vec(),
    };

    let mut endpoints: Vec<Endpoint> = Vec::new();
    for service in services {
        endpoints.extend(selector.tracker().refresh_all(service).await);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&endpoints)?);
        return Ok(());
    }
    for endpoint in &endpoints {
        println!("{}", status_line(endpoint));
    }
    Ok(())
}

fn status_line(endpoint: &Endpoint) -> String {
    let latency = endpoint
        .response_time_ms
        .map(|ms| format!("{}ms", ms))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{:<4} {:<32} {:<18} {:<6} {:<15} models={} voices={} {}",
        endpoint.service_type.as_str(),
        endpoint.url,
        endpoint.provider_type.label(),
        if endpoint.is_local { "local" } else { "remote" },
        endpoint.health.as_str(),
        endpoint.supported_models.len(),
        endpoint.supported_voices.len(),
        latency,
    );
    if let Some(error) = &endpoint.last_error {
        line.push_str(&format!("  ({})", error));
    }
    line
}

async fn speak(config: &RouterConfig, text: String, voices: Vec<String>, out: &Path) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        bail!("nothing to say");
    }
    let preferred = if voices.is_empty() {
        config.tts.voices.clone()
    } else {
        voices
    };
    let payload = SpeechPayload::Speak {
        text,
        format: audio_format(out).to_string(),
    };

    let selector = Selector::from_config(config)?;
    let completion = selector.select(ServiceType::Tts, &preferred, &payload).await?;
    report(&completion);

    match completion.output {
        SpeechOutput::Audio(bytes) => {
            tokio::fs::write(out, &bytes)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(bytes = bytes.len(), path = %out.display(), "audio written");
            Ok(())
        }
        SpeechOutput::Transcript(_) => bail!("endpoint returned a transcript for a speech request"),
    }
}

async fn transcribe(config: &RouterConfig, file: &Path, models: Vec<String>) -> anyhow::Result<()> {
    let audio = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio.wav")
        .to_string();
    let preferred = if models.is_empty() {
        config.stt.models.clone()
    } else {
        models
    };

    let selector = Selector::from_config(config)?;
    let completion = selector
        .select(ServiceType::Stt, &preferred, &SpeechPayload::transcribe(audio, file_name))
        .await?;
    report(&completion);

    match completion.output {
        SpeechOutput::Transcript(text) => {
            println!("{}", text);
            Ok(())
        }
        SpeechOutput::Audio(_) => bail!("endpoint returned audio for a transcription request"),
    }
}

fn report(completion: &Completion) {
    for attempt in &completion.failed_attempts {
        warn!("skipped {}", attempt);
    }
    let selection = &completion.selection;
    info!(
        endpoint = %selection.endpoint_url,
        provider = %selection.provider_type,
        item = %selection.resolved_item,
        model = selection.resolved_model.as_deref().unwrap_or("-"),
        "served"
    );
}

/// `response_format` from the output file extension.
fn audio_format(out: &Path) -> &'static str {
    match out
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("wav") => "wav",
        Some("opus") => "opus",
        Some("aac") => "aac",
        Some("flac") => "flac",
        Some("pcm") => "pcm",
        _ => "mp3",
    }
}

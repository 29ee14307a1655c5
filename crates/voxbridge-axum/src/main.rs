//! voxbridge call server binary.
//!
//! Serves the REST call-setup surface and the per-participant WebSocket
//! channels using the default in-memory wiring (see `bootstrap`).

use clap::Parser;

use voxbridge_axum::{ServerConfig, start_server};
use voxbridge_core::CallSettings;

/// Real-time multilingual call translation server.
#[derive(Debug, Parser)]
#[command(name = "voxbridge-server", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8090)]
    port: u16,

    /// RMS voice-activity threshold (int16 sample scale).
    #[arg(long)]
    rms_threshold: Option<f32>,

    /// Trailing silence (ms) that finalizes an utterance.
    #[arg(long)]
    silence_threshold_ms: Option<u64>,

    /// Hard utterance length cap (ms).
    #[arg(long)]
    max_utterance_ms: Option<u64>,

    /// Maximum concurrent call sessions.
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Allowed CORS origins; allows all when omitted.
    #[arg(long)]
    allow_origin: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxbridge=info,voxbridge_axum=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = CallSettings::default();
    if let Some(v) = cli.rms_threshold {
        settings.rms_threshold = v;
    }
    if let Some(v) = cli.silence_threshold_ms {
        settings.silence_threshold_ms = v;
    }
    if let Some(v) = cli.max_utterance_ms {
        settings.max_utterance_ms = v;
    }
    if let Some(v) = cli.max_sessions {
        settings.max_sessions = v;
    }

    let mut config = ServerConfig::with_defaults().with_settings(settings);
    config.port = cli.port;
    if !cli.allow_origin.is_empty() {
        config = config.with_allowed_origins(cli.allow_origin.clone());
    }

    start_server(config).await
}

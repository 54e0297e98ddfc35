use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use confab_app::config::{self, FileConfig};
use confab_app::runtime::{RuntimeOptions, VoiceRuntime};
use confab_audio::DeviceManager;

#[derive(Debug, Parser)]
#[command(name = "confab", about = "Realtime voice assistant client")]
struct Cli {
    /// API key for the remote session endpoint
    #[arg(long, env = "CONFAB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model to converse with
    #[arg(long)]
    model: Option<String>,

    /// Optional TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input device name (default: system default)
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Output device name (default: system default)
    #[arg(long)]
    output_device: Option<String>,

    /// Target round-trip latency the buffer sizer tunes toward
    #[arg(long)]
    target_latency_ms: Option<f64>,

    /// Run a one-second input gain calibration before connecting
    #[arg(long)]
    calibrate: bool,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging();

    if cli.list_devices {
        return list_devices();
    }

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let api_key = cli
        .api_key
        .context("an API key is required (pass --api-key or set CONFAB_API_KEY)")?;
    let base_endpoint = file
        .endpoint
        .unwrap_or_else(|| config::DEFAULT_ENDPOINT.to_string());
    let endpoint = config::endpoint_url(&base_endpoint, &api_key)?;

    let opts = RuntimeOptions {
        model: cli
            .model
            .or(file.model)
            .unwrap_or_else(|| config::DEFAULT_MODEL.to_string()),
        endpoint,
        input_device: cli.device.or(file.input_device),
        output_device: cli.output_device.or(file.output_device),
        target_latency_ms: cli
            .target_latency_ms
            .or(file.target_latency_ms)
            .unwrap_or(config::DEFAULT_TARGET_LATENCY_MS),
        calibrate_on_start: cli.calibrate,
    };

    tracing::info!("Starting confab with model {}", opts.model);
    let runtime = VoiceRuntime::new(opts)?;
    runtime.run().await?;
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let manager = DeviceManager::new().context("audio host unavailable")?;
    println!("Input devices:");
    for device in manager.enumerate_inputs() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{}", device.name, marker);
    }
    println!("Output devices:");
    for device in manager.enumerate_outputs() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{}", device.name, marker);
    }
    Ok(())
}

fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_appender = tracing_appender::rolling::daily("logs", "confab.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    guard
}

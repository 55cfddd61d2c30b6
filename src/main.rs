#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use primetric_source::config::Config;
use primetric_source::resource::Resource;
use primetric_source::source::PrimetricSource;
use primetric_source::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "primetric-source")]
#[command(about = "Primetric source connector - assignments, employees and projects")]
#[command(version)]
struct Args {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate credentials against the token endpoint
    Check,
    /// List the available streams
    Streams,
    /// Read records from the selected streams (all by default)
    Read {
        #[arg(short, long = "stream")]
        streams: Vec<Resource>,
    },
}

#[derive(Serialize)]
struct StreamInfo {
    name: &'static str,
    path: &'static str,
    primary_key: &'static str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let telemetry_config = TelemetryConfig {
        otlp_endpoint: config.telemetry.otlp_endpoint.clone(),
        log_filter: config
            .telemetry
            .log_filter
            .clone()
            .unwrap_or_else(|| "info".to_string()),
    };
    init_telemetry(telemetry_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let source = PrimetricSource::new(config.api.clone())?;

    let result = match args.command {
        Command::Check => check(&source, &config).await,
        Command::Streams => list_streams(),
        Command::Read { streams } => read(&source, &config, streams).await,
    };

    shutdown_telemetry();
    result
}

async fn check(source: &PrimetricSource, config: &Config) -> anyhow::Result<()> {
    let status = source
        .check_connection(&config.client_id, &config.client_secret)
        .await;
    println!("{}", serde_json::to_string(&status)?);

    if !status.ok {
        shutdown_telemetry();
        std::process::exit(1);
    }
    Ok(())
}

fn list_streams() -> anyhow::Result<()> {
    let streams: Vec<StreamInfo> = Resource::ALL
        .iter()
        .map(|r| StreamInfo {
            name: r.name(),
            path: r.path(),
            primary_key: r.primary_key(),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&streams)?);
    Ok(())
}

async fn read(
    source: &PrimetricSource,
    config: &Config,
    selected: Vec<Resource>,
) -> anyhow::Result<()> {
    let credentials = config.credentials()?;
    let selected = if selected.is_empty() {
        Resource::ALL.to_vec()
    } else {
        selected
    };

    let streams = source
        .streams(&credentials)
        .await
        .context("Failed to obtain access token")?;

    let stdout = io::stdout();
    for stream in streams
        .into_iter()
        .filter(|s| selected.contains(&s.resource()))
    {
        let resource = stream.resource();
        info!(stream = %resource, url = %stream.url(), "Reading stream");

        let mut records = Box::pin(stream.records());
        let mut count: u64 = 0;

        while let Some(record) = records
            .try_next()
            .await
            .with_context(|| format!("Failed to read stream '{}'", resource))?
        {
            let message = json!({
                "stream": resource.name(),
                "record": record,
                "emitted_at": emitted_at(),
            });
            let mut out = stdout.lock();
            serde_json::to_writer(&mut out, &message)?;
            out.write_all(b"\n")?;
            count += 1;
        }

        info!(stream = %resource, records = count, "Finished stream");
    }

    io::stdout().flush()?;
    Ok(())
}

fn emitted_at() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

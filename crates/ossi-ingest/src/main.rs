//! OSSI Ingest - notification-driven OSS object ingestion

use anyhow::{Context, Result};
use clap::Parser;
use ossi_common::logging::{init_logging, LogConfig, LogLevel};
use ossi_ingest::{
    config::IngestConfig,
    pipeline::Ingestor,
    queue::MnsClient,
    scheduler::{IngestionScheduler, StopHandle},
    sink::{JsonLinesSink, RecordSink},
    storage::OssStorage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ossi-ingest")]
#[command(author, version, about = "Ingest OSS objects announced through MNS notifications")]
struct Cli {
    /// Configuration file (TOML); `OSSI__*` environment variables override it
    #[arg(short, long, default_value = "ossi.toml")]
    config: PathBuf,

    /// Append records to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Check configuration and backup targets, then exit
    #[arg(long)]
    check: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ossi-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = IngestConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    info!(
        bucket = %config.bucket,
        endpoint = %config.endpoint,
        queue = %config.mns_settings.queue,
        "Starting OSS ingestion"
    );

    let store = Arc::new(OssStorage::new(&config)?);
    let queue = Arc::new(MnsClient::new(
        &config.mns_settings,
        config.access_key_id.clone(),
        config.access_key_secret.clone(),
    )?);
    let sink: Arc<dyn RecordSink> = match cli.output {
        Some(ref path) => {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("Failed to open output file {}", path.display()))?;
            Arc::new(JsonLinesSink::new(file))
        },
        None => Arc::new(JsonLinesSink::new(tokio::io::stdout())),
    };

    let ingestor = Ingestor::new(&config, store, queue, sink)?;
    ingestor.register(&config).await?;

    if cli.check {
        info!("Configuration OK");
        return Ok(());
    }

    let scheduler = IngestionScheduler::new(Arc::new(ingestor), &config.mns_settings);
    tokio::spawn(shutdown_signal(scheduler.stop_handle()));

    let summary = scheduler.run().await;

    info!(
        polls = summary.polls,
        notifications = summary.notifications,
        acknowledged = summary.acknowledged,
        objects_failed = summary.objects_failed,
        records = summary.records,
        "Ingestion stopped"
    );
    Ok(())
}

/// Stop the scheduler on Ctrl+C or SIGTERM.
async fn shutdown_signal(stop: StopHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }

    stop.stop();
}

//! graphfeed-connect - connector runtime tooling
//!
//! # Usage
//!
//! ```bash
//! # Partition a bundle, one bundle per output line
//! graphfeed-connect split bundle.json
//!
//! # Resolve and validate settings (environment first, then the file)
//! graphfeed-connect validate -c config.yml
//!
//! # Check a marking against a maximum
//! graphfeed-connect tlp TLP:GREEN TLP:AMBER
//!
//! # Run a connector against in-process collaborators until Ctrl+C
//! graphfeed-connect run -c config.yml --work work.jsonl
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graphfeed_bundle::{check_max_tlp, BundlePartitioner};
use graphfeed_connect::control::QueueSettings;
use graphfeed_connect::{
    handler_fn, logging, Connector, ConnectorSettings, MemoryBroker, MemoryControlApi, WorkItem,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "graphfeed-connect")]
#[command(version, about = "Connector runtime for graph ingestion")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition a bundle file and print each bundle as one JSON line
    Split {
        /// Bundle file
        file: PathBuf,
        /// Print the bundle as a single message instead
        #[arg(long)]
        no_split: bool,
    },
    /// Resolve and validate connector settings
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check whether a TLP marking is allowed under a maximum
    Tlp {
        /// Marking of the data, e.g. TLP:GREEN
        tlp: String,
        /// Highest allowed marking, e.g. TLP:AMBER
        max: String,
    },
    /// Run a connector against in-process collaborators until Ctrl+C
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Work items to enqueue, one JSON document per line
        #[arg(long)]
        work: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    match cli.command {
        Commands::Split { file, no_split } => {
            logging::init(default_level);
            split(&file, no_split)
        }
        Commands::Tlp { tlp, max } => {
            logging::init(default_level);
            let allowed = check_max_tlp(&tlp, &max);
            println!("{}", if allowed { "allowed" } else { "denied" });
            Ok(())
        }
        Commands::Validate { config } => {
            let settings = load_settings(config.as_deref(), cli.verbose)?;
            validate(&settings);
            Ok(())
        }
        Commands::Run { config, work } => {
            let settings = load_settings(config.as_deref(), cli.verbose)?;
            run(settings, work.as_deref()).await
        }
    }
}

fn load_settings(path: Option<&Path>, verbose: bool) -> Result<ConnectorSettings> {
    let settings = ConnectorSettings::load(path).context("Failed to load connector settings")?;
    logging::init(if verbose {
        tracing::Level::DEBUG
    } else {
        settings.log_level
    });
    Ok(settings)
}

fn split(file: &Path, no_split: bool) -> Result<()> {
    let content = std::fs::read(file)
        .with_context(|| format!("Failed to read bundle {}", file.display()))?;

    if no_split {
        let value: serde_json::Value =
            serde_json::from_slice(&content).context("Bundle is not valid JSON")?;
        println!("{}", value);
        return Ok(());
    }

    let partitions = BundlePartitioner::new()
        .partition_slice(&content)
        .with_context(|| format!("Failed to partition {}", file.display()))?;
    info!(
        file = %file.display(),
        partitions = partitions.len(),
        "Bundle partitioned"
    );
    for partition in &partitions {
        println!("{}", partition.to_json()?);
    }
    Ok(())
}

fn validate(settings: &ConnectorSettings) {
    info!("Configuration is valid");
    info!("  Platform: {}", settings.opencti_url);
    info!(
        "  Connector: {} ({}, {})",
        settings.name, settings.id, settings.connector_type
    );
    if settings.scope.is_empty() {
        info!("  Scope: (none)");
    } else {
        info!("  Scope: {}", settings.scope.join(", "));
    }
    if let Some(confidence) = settings.confidence_level {
        info!("  Confidence level: {}", confidence);
    }
    info!("  Heartbeat: {:?}", settings.runtime.heartbeat_interval);
    info!("  Reconnect delay: {:?}", settings.runtime.reconnect_delay);
    match settings.runtime.handler_timeout {
        Some(timeout) => info!("  Handler timeout: {:?}", timeout),
        None => info!("  Handler timeout: none"),
    }
    match settings.runtime.health_port {
        Some(port) => info!("  Health endpoint: http://0.0.0.0:{}/health", port),
        None => info!("  Health endpoint: disabled"),
    }
}

async fn run(settings: ConnectorSettings, work: Option<&Path>) -> Result<()> {
    let listen_queue = format!("listen_{}", settings.id);
    let control = Arc::new(MemoryControlApi::new().with_queue_settings(QueueSettings {
        uri: "memory://local".to_string(),
        listen_queue: listen_queue.clone(),
        push_exchange: "push".to_string(),
    }));
    let broker = MemoryBroker::new();

    if let Some(path) = work {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read work items {}", path.display()))?;
        let mut count = 0usize;
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            broker.enqueue(&listen_queue, line.to_string());
            count += 1;
        }
        info!("Enqueued {} work item(s) on {}", count, listen_queue);
    }

    let connector = Connector::start(settings, control.clone(), Arc::new(broker.clone()))
        .await
        .context("Failed to start connector")?;

    let mut consumer = connector.listen(handler_fn(|item: WorkItem| async move {
        info!(work_id = %item.work_id, job_id = ?item.job_id, "Processing work item");
        Ok(vec![format!("processed {}", item.work_id)])
    }));

    tokio::select! {
        _ = shutdown_signal() => {}
        finished = &mut consumer => {
            match finished {
                Ok(Ok(())) => info!("Consumer stopped"),
                Ok(Err(e)) => error!("Consumer failed: {}", e),
                Err(e) => error!("Consumer task panicked: {}", e),
            }
        }
    }

    connector.shutdown().await;
    if !consumer.is_finished() {
        match tokio::time::timeout(Duration::from_secs(10), &mut consumer).await {
            Ok(_) => info!("Consumer stopped"),
            Err(_) => warn!("Consumer did not stop within 10s"),
        }
    }

    info!(
        completed = control.updates_with(graphfeed_connect::JobStatus::Complete).len(),
        failed = control.updates_with(graphfeed_connect::JobStatus::Error).len(),
        "Shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received shutdown signal (Ctrl+C)"),
        _ = terminate => info!("Received shutdown signal (SIGTERM)"),
    }
}

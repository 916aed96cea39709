//! publish-breaker
//!
//! Publishes configuration change events to a message queue through a
//! circuit breaker, so an unhealthy broker is fast-failed instead of being
//! hammered by every writer.
//!
//! # Architecture Overview
//!
//! ```text
//!   stdin (NDJSON change events)
//!        │
//!        ▼
//!   ┌──────────────┐    ┌──────────────────┐    ┌────────────────┐
//!   │ChangeNotifier│───▶│  CircuitBreaker  │───▶│ QueuePublisher │───▶ Broker HTTP API
//!   └──────────────┘    │closed/open/probe │    └────────────────┘
//!                       └──────────────────┘
//!   config (TOML) ── observability (tracing, Prometheus)
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use publish_breaker::config::{load_config, AppConfig};
use publish_breaker::observability::{logging, metrics};
use publish_breaker::{BreakerConfig, ChangeEvent, ChangeNotifier, QueuePublisher};

#[derive(Parser)]
#[command(name = "publish-breaker")]
#[command(about = "Publish configuration change events through a circuit breaker", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (defaults apply when omitted).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the effective settings
    Validate,
    /// Publish newline-delimited JSON change events read from stdin
    Run,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability);

    match cli.command {
        Commands::Validate => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run => run(config).await?,
    }

    Ok(())
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let breaker_config = BreakerConfig::try_from(&config.breaker)?;
    let publisher = QueuePublisher::new(&config.queue)?;

    tracing::info!(
        breaker = %breaker_config.name,
        fail_threshold = breaker_config.fail_threshold.get(),
        open_duration_secs = config.breaker.open_duration_secs,
        success_window_secs = config.breaker.success_window_secs,
        publish_url = %publisher.publish_url(),
        queue = %publisher.queue(),
        "Configuration loaded"
    );

    let notifier = ChangeNotifier::new(breaker_config, publisher);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut published: u64 = 0;
    let mut failed: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let event: ChangeEvent = match serde_json::from_str(line) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed change event");
                        failed += 1;
                        continue;
                    }
                };

                match notifier.notify(event).await {
                    Ok(()) => published += 1,
                    Err(_) => failed += 1,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, stopping");
                break;
            }
        }
    }

    tracing::info!(
        published,
        failed,
        breaker_status = %notifier.breaker().status(),
        "Input drained"
    );
    Ok(())
}

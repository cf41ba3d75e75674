//! skygrep server
//!
//! Follows the Bluesky Jetstream firehose, matches commits against the
//! configured rules and forwards every match to Kafka.

mod config;
mod server;
mod shutdown;
mod state;

use anyhow::Context;
use clap::Parser;
use config::{CONFIG_ENV, ConfigLoader, resolve_config_path};
use server::{build_router, run_server};
use shutdown::{ShutdownSignal, stop_requested};
use skygrep_core::health::HealthTracker;
use skygrep_core::metrics::RuleMetrics;
use skygrep_core::processors::{
    BrokerPublisher, CommitForwarder, JetstreamSource, KafkaTransport, Pipeline, RunningPipeline,
    cursor_from_lookback,
};
use skygrep_core::shutdown::{ShutdownOrchestrator, StoppableTask};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Bluesky firehose consumer forwarding rule matches to Kafka
#[derive(Parser, Debug)]
#[command(name = "skygrep")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of hours to look back in history
    #[arg(long, default_value_t = 24)]
    hours: u64,

    /// Port to run the HTTP server on
    #[arg(short, long, default_value_t = 3030)]
    port: u16,

    /// Path to the configuration file (SKYGREP_CONFIG takes precedence)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "SKYGREP_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.json_logs);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    tracing::info!("Starting skygrep v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = resolve_config_path(std::env::var_os(CONFIG_ENV), args.config);
    let loader = ConfigLoader::new(&config_path);
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = ?loader.path(), "Failed to load configuration:\n{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    tracing::info!(
        path = ?loader.path(),
        rules = config.rules.len(),
        kafka_brokers = config.kafka.brokers.len(),
        "Configuration loaded"
    );

    // Installed before the broker connect so a signal during startup is
    // handled rather than killing the process.
    let mut signals = ShutdownSignal::install().context("failed to install signal handlers")?;

    let rules = Arc::new(config.rules);
    let health = HealthTracker::new(config.health);
    let metrics = RuleMetrics::new(&rules);

    let publisher = BrokerPublisher::new(
        KafkaTransport::new(&config.kafka),
        health.clone(),
        config.kafka.retry,
    );
    let cursor = cursor_from_lookback(args.hours, time::OffsetDateTime::now_utc());
    let source = JetstreamSource::new(
        &config.jetstream,
        rules.wanted_collections(),
        Some(cursor),
    );
    let forwarder = CommitForwarder::new(
        rules.clone(),
        metrics.clone(),
        health.clone(),
        publisher.clone(),
    );

    // Kafka must be reachable before any event is consumed.
    let pipeline = Pipeline::new(publisher.clone(), source, forwarder);
    let connected = match pipeline.connect_until(signals.recv()).await {
        Ok(Some(connected)) => connected,
        Ok(None) => {
            let outcome = ShutdownOrchestrator::new(config.shutdown.step_timeout)
                .step("kafka producer", async move { publisher.close().await })
                .run()
                .await;
            return Ok(ExitCode::from(outcome.exit_code()));
        }
        Err(_) => return Ok(ExitCode::FAILURE),
    };

    // Status endpoints
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let router = build_router(AppState::new(health, metrics));
    let http = StoppableTask::spawn(move |stop_rx| {
        run_server(listener, router, stop_requested(stop_rx))
    });

    // Event stream
    let RunningPipeline {
        publisher,
        supervisor,
        consumer,
    } = connected.start();

    tracing::info!(
        cursor_hours = args.hours,
        cursor,
        port = args.port,
        "Service started"
    );

    signals.recv().await;

    let outcome = ShutdownOrchestrator::new(config.shutdown.step_timeout)
        .step("http server", async move {
            http.stop().await??;
            anyhow::Ok(())
        })
        .step("jetstream consumer", consumer.stop())
        .step("kafka producer", async move {
            supervisor.stop().await?;
            publisher.close().await?;
            anyhow::Ok(())
        })
        .run()
        .await;

    Ok(ExitCode::from(outcome.exit_code()))
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rdkafka=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

//! Diploma Recommender Worker
//!
//! Synchronizes stored recommendations with the predictor:
//! - `recommender sync-user <email>`: one user, report printed as JSON
//! - `recommender sync-all`: every user once
//! - no arguments: batch run every `sync.interval_secs` until Ctrl+C

use diploma_common::{
    config::{AppConfig, ObservabilityConfig},
    db::DbPool,
    metrics::{register_metrics, METRICS_PREFIX, SYNC_BUCKETS},
    predictor::create_predictor,
    VERSION,
};
use diploma_recommender::Synchronizer;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: recommender [sync-user <email> | sync-all]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config.observability);
    info!("Starting Diploma Recommender v{}", VERSION);

    if config.observability.metrics_port != 0 {
        init_metrics(config.observability.metrics_port)?;
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    // Initialize predictor
    let predictor = create_predictor(&config.predictor)?;
    info!(
        provider = %predictor.provider(),
        base_url = %config.predictor.base_url,
        "Predictor initialized"
    );

    let synchronizer = Synchronizer::new(db, predictor, config.sync.clone());

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("sync-user") => {
            let Some(email) = args.get(2) else {
                eprintln!("{}", USAGE);
                std::process::exit(2);
            };

            match synchronizer.sync_user(email).await {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(e) => {
                    error!(email = %email, error = %e, "Synchronization failed");
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Some("sync-all") => {
            let report = synchronizer.sync_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Some(other) => {
            eprintln!("Unknown command: {}\n{}", other, USAGE);
            std::process::exit(2);
        }
        None => run_daemon(&synchronizer, config.sync.interval()).await,
    }

    Ok(())
}

/// Batch run on a fixed interval until Ctrl+C
async fn run_daemon(synchronizer: &Synchronizer, interval: std::time::Duration) {
    info!(interval_secs = interval.as_secs(), "Recommender ready, starting batch loop");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                match synchronizer.sync_all().await {
                    Ok(report) if report.failed.is_empty() => {}
                    Ok(report) => warn!(
                        failed = report.failed.len(),
                        succeeded = report.succeeded.len(),
                        "Batch finished with failures"
                    ),
                    Err(e) => error!(error = %e, "Batch run failed"),
                }
            }
        }
    }

    info!("Recommender shutting down");
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_sync_duration_seconds", METRICS_PREFIX)),
            SYNC_BUCKETS,
        )?
        .install()?;

    register_metrics();
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

//! Observatory - periodic HTTP checker
//!
//! Probes every configured target on a fixed interval, scores response
//! times against their recent history and alerts on UP/DOWN transitions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use observatory::{api, config::CheckerConfig};
use observatory_lib::{
    alerting::AlertStateMachine,
    health::{components, HealthRegistry},
    notify::NotificationDispatcher,
    observability::StructuredLogger,
    prober::HttpProber,
    store::SampleStore,
    CheckLoopBuilder, Pipeline,
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CHECKER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "observatory", version, about = "Periodic HTTP checker")]
struct Args {
    /// Configuration file (defaults to $OBSERVATORY_CONFIG or observatory.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    let config = CheckerConfig::load(args.config.as_deref())?;
    info!(
        targets = config.targets.len(),
        interval_secs = config.interval_secs,
        data_dir = %config.data_dir.display(),
        "Checker configured"
    );

    let health_registry = HealthRegistry::new();

    let store = Arc::new(
        SampleStore::open(config.samples_path()).context("Failed to open sample store")?,
    );
    health_registry.mark_store_open().await;
    let states = AlertStateMachine::load_states(&config.alert_state_path())
        .context("Failed to load alert state")?;
    let alerts = Arc::new(AlertStateMachine::new(config.alerting.threshold).with_states(states));

    let logger = StructuredLogger::new("observatory");
    let mut pipeline = Pipeline::new(config.target_specs(), &config.anomaly, store, alerts)
        .with_logger(logger.clone());

    if config.alerting.enabled {
        let channels = config.alerting.channels.build()?;
        if channels.is_empty() {
            warn!("Alerting enabled but no channel is fully configured");
            health_registry
                .set_degraded(components::NOTIFIER, "No notification channel configured")
                .await;
        }
        let dispatcher = NotificationDispatcher::with_timeout(
            channels,
            std::time::Duration::from_secs(config.alerting.channel_timeout_secs),
        )?;
        pipeline = pipeline.with_dispatcher(dispatcher);
    }
    let pipeline = Arc::new(pipeline);

    let prober = Arc::new(HttpProber::with_timeout(config.probe_timeout())?);
    let check_loop = CheckLoopBuilder::new()
        .pipeline(pipeline.clone())
        .prober(prober)
        .interval(config.interval())
        .max_concurrent(config.max_concurrent_probes)
        .alert_state_path(config.alert_state_path())
        .status_paths(config.status_json_paths.clone())
        .health(health_registry.clone())
        .build()?;

    logger.log_startup(
        CHECKER_VERSION,
        config.targets.len(),
        pipeline.alerting_enabled(),
    );

    if args.once {
        let summary = check_loop.run_once(chrono::Utc::now().timestamp()).await;
        info!(
            checked = summary.checked,
            unreachable = summary.unreachable,
            alerts = summary.alerts_fired,
            "Single pass complete"
        );
        logger.log_shutdown("single pass complete");
        return Ok(());
    }

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), pipeline));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let loop_handle = tokio::spawn(check_loop.run(shutdown_rx));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            logger.log_shutdown("API server stopped");
            result??;
        }
    }

    let _ = shutdown_tx.send(());
    loop_handle.await?;
    info!("Shutting down");

    Ok(())
}

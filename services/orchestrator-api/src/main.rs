//! Order Orchestration Core — API process entry point.
//!
//! Grounded on `gateway::main`'s "init logging, parse args, load config,
//! start server" shape, adapted: config comes from validated environment
//! variables (per the spec's boot-time validation contract) rather than a
//! TOML file, and this process also owns the recovery worker's background
//! loop alongside the HTTP server, since there is no separate worker binary
//! in scope.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Arg, Command};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use orchestrator_common::clock::SystemClock;
use orchestrator_common::config::AppConfig;
use orchestrator_core::context::Context;
use orchestrator_core::image_intake::{DisabledImageExtractor, HttpImageExtractor, ImageExtractor};
use orchestrator_core::notifier::NotifierHandle;
use orchestrator_core::recovery::RecoveryWorker;
use orchestrator_core::schema;
use orchestrator_core::webhook_processor::WhatsAppEventHandler;

use orchestrator_api::{print_routes, OrchestratorApiServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchestrator_api=info,orchestrator_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = Command::new("orchestrator-api")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Order Orchestration Core: webhook ingestion, order lifecycle, vendor selection, credit admission")
        .arg(
            Arg::new("routes")
                .long("routes")
                .help("Print available routes and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("routes") {
        print_routes();
        return Ok(());
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid or missing environment configuration");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    info!(port = config.port, node_env = %config.node_env, "starting orchestrator-api");

    let db = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    schema::run_migrations(&db).await?;

    let clock = Arc::new(SystemClock);
    let http_client = reqwest::Client::builder().timeout(config.external_timeout).build()?;

    let notifier = if config.messaging_enabled() {
        info!("messaging gateway configured, notifier enabled");
        NotifierHandle::spawn(
            http_client.clone(),
            config.messaging_gateway_url(),
            1024,
            config.gateway_concurrency,
            config.notify_max_attempts,
            config.external_timeout,
        )
    } else {
        warn!("WHATSAPP_GATEWAY_TOKEN not set, notifier degraded to no-op");
        NotifierHandle::disabled()
    };

    let image_extractor: Arc<dyn ImageExtractor> = match config.image_extraction_url() {
        Some(endpoint) => {
            info!("image extraction pipeline configured");
            Arc::new(HttpImageExtractor::new(http_client.clone(), endpoint, config.external_timeout))
        }
        None => {
            warn!("IMAGE_EXTRACTION_URL not set, image uploads will be rejected");
            Arc::new(DisabledImageExtractor)
        }
    };

    let ctx = Context::new(db, clock, Arc::clone(&config), notifier, image_extractor);

    spawn_recovery_loop(ctx.clone());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let server = OrchestratorApiServer::new(ctx, bind_addr);
    if let Err(e) = server.start().await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    Ok(())
}

/// Runs the recovery worker's startup reclaim pass once, then the periodic
/// cycle forever on `RECOVERY_INTERVAL`, per §4.10. Spawned alongside the
/// HTTP server rather than as a separate process — this core has no
/// deployment-glue concept of a distinct worker binary in scope.
fn spawn_recovery_loop(ctx: Context) {
    tokio::spawn(async move {
        let worker = RecoveryWorker::new(&ctx);
        match worker.reclaim_at_startup().await {
            Ok(count) => info!(count, "startup workflow reclaim complete"),
            Err(err) => error!(error = %err, "startup workflow reclaim failed"),
        }

        let mut interval = tokio::time::interval(ctx.config.recovery_interval);
        interval.tick().await; // first tick fires immediately; already handled by startup pass above
        loop {
            interval.tick().await;
            let handler = WhatsAppEventHandler::new(&ctx);
            match worker.run_cycle(&handler).await {
                Ok(stats) => info!(?stats, "recovery cycle complete"),
                Err(err) => error!(error = %err, "recovery cycle failed"),
            }
        }
    });
}

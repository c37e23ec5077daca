//! Experiment engine HTTP server

use abtest_api_rest::{build_router, jobs, AppState};
use abtest_config::EngineConfig;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "abtest-server", version, about = "Experiment assignment and evaluation service")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "ABTEST_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = EngineConfig::load(args.config).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.service.port = port;
    }

    init_tracing(&config);

    let state = AppState::from_config(config.clone()).context("failed to build engine")?;

    let job = config.evaluation.enabled.then(|| {
        jobs::spawn_reevaluation(
            state.engine.clone(),
            Duration::from_secs(config.evaluation.interval_secs),
        )
    });

    let addr = format!("{}:{}", config.service.host, config.service.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("{} listening on {}", config.service.name, addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(job) = job {
        job.abort();
    }
    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logging {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

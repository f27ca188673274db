use std::path::PathBuf;

use clap::Parser;
use ghmirror::app;
use ghmirror::config::Config;
use ghmirror::error::runtime::RuntimeError;
use ghmirror::health::HealthMonitor;
use ghmirror::utils::meltdown::{ShutdownSignal, TaggedService};
use meltdown::Meltdown;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Debug, Parser)]
#[command(version, about = "A caching, authenticating reverse proxy for the GitHub REST API.")]
pub struct Args {
    /// Path to an optional config file. Values here are overridden by
    /// environment variables of the same name.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), RuntimeError> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match Config::try_read(args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to read config: {error}");
            std::process::exit(1);
        }
    };

    if let Err(error) = config.validate() {
        eprintln!("configuration validation failed: {error}");
        std::process::exit(1);
    }

    debug!(listen_addr = %config.listen_addr, cache_type = ?config.cache_type, "configuration loaded");

    let app = app::build(config).map_err(|error| {
        tracing::error!(%error, "failed to assemble application");
        RuntimeError::Serve(std::io::Error::other(error.to_string()))
    })?;

    let health_monitor = HealthMonitor::new(
        app.state().client().clone(),
        app.state().config().status_url.clone(),
        app.state().config().github_status_sleep_time,
        app.state().health().clone(),
    );

    let mut meltdown = Meltdown::new()
        .register(TaggedService::new("shutdown-signals", ShutdownSignal))
        .register(TaggedService::new("gateway", app))
        .register(TaggedService::new("health-monitor", health_monitor));

    info!(tasks = ?["shutdown-signals", "gateway", "health-monitor"], "starting services");

    let mut shutting_down = false;
    while let Some((service, result)) = meltdown.next().await {
        match result {
            Ok(()) => info!(%service, "service stopped successfully"),
            Err(error) => tracing::error!(%service, %error, "service crashed"),
        }

        if !shutting_down {
            info!("propagating shutdown signal...");
            meltdown.trigger();
            shutting_down = true;
        }
    }

    info!("shut down");
    Ok(())
}

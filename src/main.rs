//! Entry point for the rendezvous pairing service

use anyhow::Result;
use clap::Parser;
use rendezvous::config::{validate_config, AppConfig};
use rendezvous::service::{AppState, HealthStatus};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Rendezvous - one-on-one chat partner matching
#[derive(Parser)]
#[command(
    name = "rendezvous",
    version,
    about = "Pairs anonymous chat participants at random or by proximity",
    long_about = "Rendezvous consumes search commands over AMQP, keeps a shared pool of \
                 searching participants, pairs them with event-driven workers backed by a \
                 periodic reconciliation sweep, and publishes match events."
)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Connect to the broker, report component health and exit")]
    health_check: bool,

    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    #[arg(
        long,
        value_name = "URL",
        help = "Override shared store URL (memory:// or redis://)"
    )]
    store_url: Option<String>,

    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    #[arg(long, value_name = "SECONDS", help = "Override reconciliation sweep interval")]
    sweep_interval: Option<u64>,

    #[arg(long, value_name = "KM", help = "Override the nearby distance cutoff")]
    nearby_max_distance: Option<f64>,

    #[arg(long, help = "Do not fall back to random matching when nearby finds nobody")]
    no_nearby_fallback: bool,

    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,

    #[arg(long, help = "Validate configuration and exit without starting service")]
    dry_run: bool,
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Defaults, then file or environment, then CLI flags
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }
    if let Some(store_url) = &args.store_url {
        config.store.url = store_url.clone();
    }
    if let Some(port) = args.health_port {
        config.service.health_port = port;
    }
    if let Some(interval) = args.sweep_interval {
        config.matching.sweep_interval_seconds = interval;
    }
    if let Some(distance) = args.nearby_max_distance {
        config.matching.nearby_max_distance_km = distance;
    }
    if args.no_nearby_fallback {
        config.matching.nearby_fallback_to_random = false;
    }

    validate_config(&config)?;
    Ok(config)
}

async fn perform_health_check(config: AppConfig) -> Result<()> {
    let app_state = AppState::new(config).await?;
    let report = app_state.health_check().check().await;

    println!("Health check for {}", report.service);
    let mut healthy = true;
    for check in report.checks.iter().filter(|c| c.name != "service_running") {
        println!("  {}: {}", check.name, check.status);
        if let Some(message) = &check.message {
            println!("    {}", message);
        }
        healthy &= check.status == HealthStatus::Healthy;
    }

    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C) signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("Rendezvous pairing service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   Command queue: {}", config.amqp.command_queue);
    if config.store.is_in_memory() {
        info!("   Store: in-process (this instance only)");
    } else {
        info!("   Store: shared Redis, key prefix '{}'", config.store.key_prefix);
    }
    info!(
        "   Record TTL: {}s, lock TTL: {}s",
        config.matching.record_ttl_seconds, config.matching.lock_ttl_seconds
    );
    info!(
        "   Sweep every {}s, janitor every {}s",
        config.matching.sweep_interval_seconds, config.matching.janitor_interval_seconds
    );
    info!(
        "   Nearby cutoff: {} km (fallback to random: {})",
        config.matching.nearby_max_distance_km, config.matching.nearby_fallback_to_random
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration is valid, dry run complete");
        return Ok(());
    }

    let mut app_state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        if let Err(e) = app_state.shutdown().await {
            warn!("Cleanup after failed start also failed: {}", e);
        }
        std::process::exit(1);
    }

    info!("Press Ctrl+C to shut down gracefully");
    wait_for_shutdown_signal().await;

    app_state.shutdown().await?;
    info!("Rendezvous stopped");
    Ok(())
}

//! smart-conn binary entry point.

use clap::Parser;
use smart_conn::{telemetry, Config, FailoverService, LogNotifier};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Smart Connection failover service for Cloudflare DNS records.
#[derive(Parser, Debug)]
#[command(name = "smart-conn")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "smart-conn.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("SMART_CONN")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    info!(
        config_file = %args.config.display(),
        data_dir = %config.service.data_dir.display(),
        max_concurrent_runs = config.service.max_concurrent_runs,
        "Starting smart-conn"
    );

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            signal_token.cancel();
        }
    });

    // Run failover service
    let service = FailoverService::new(&config, Arc::new(LogNotifier)).await?;
    let result = service.run(shutdown).await;

    // Shutdown telemetry
    telemetry::shutdown();

    if let Err(e) = result {
        error!("failover service error: {}", e);
        return Err(e.into());
    }

    info!("smart-conn shutdown complete");
    Ok(())
}

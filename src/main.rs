//! window-relay: a single-threaded-per-worker file receiver
//!
//! Features:
//! - One mio poll loop per worker, SO_REUSEPORT across workers
//! - Each connection streamed into `recv-<n>.bin` through a fixed window
//! - Optional acknowledgement after each completed transfer
//! - Optional datagram endpoint whose payloads are logged
//! - Configuration via CLI arguments or TOML file

use tracing::info;
use tracing_subscriber::EnvFilter;
use window_relay::config::Config;
use window_relay::runtime;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        datagram = ?config.datagram_listen,
        workers = config.workers,
        max_connections = config.max_connections,
        buffer_size = config.buffer_size,
        output_dir = %config.output_dir.display(),
        acknowledge = config.acknowledge,
        "Starting window-relay"
    );

    runtime::run(config)?;
    Ok(())
}

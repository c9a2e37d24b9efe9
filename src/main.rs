//! file-exchange server
//!
//! Accepts client connections and serves `/register`, `/store`, `/get`,
//! `/dir`, and `/leave` against a local storage directory.
//!
//! Configuration via positional `[HOST] PORT`, CLI flags, or a TOML file.

use file_exchange::{Config, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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
        storage_dir = %config.storage_dir.display(),
        max_connections = config.max_connections,
        idle_timeout = ?config.idle_timeout,
        "Starting file-exchange server"
    );

    let server = Server::new(config)?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!(active = ?server.registry().snapshot(), "Shutting down");
        }
    }

    Ok(())
}

//! Line chat server - Entry Point
//!
//! Loads configuration, binds the listener and serves until accepting fails.

use std::env;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use line_chat::{ChatServer, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_chat=info")),
        )
        .init();

    let mut config = Config::from_env()?;

    // Bind address from command line overrides the config file
    if let Some(addr) = env::args().nth(1) {
        config.listen_addr = addr;
    }

    let server = ChatServer::bind(config).await?;
    info!("Chat server listening on {}", server.local_addr()?);

    if let Err(e) = server.run().await {
        error!("Listener stopped: {}", e);
        return Err(e.into());
    }

    Ok(())
}

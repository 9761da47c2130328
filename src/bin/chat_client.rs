//! Terminal chat client
//!
//! Reads shorthand commands from stdin and prints what the server sends.
//! Logs go to stderr so stdout carries only chat text.

use std::env;

use tokio::io::{stdin, stdout, BufReader};
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::EnvFilter;

use line_chat::{run_client, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_chat=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env()?;

    // Server address from command line overrides the config file
    if let Some(addr) = env::args().nth(1) {
        config.server_addr = addr;
    }

    let stream = TcpStream::connect(&config.server_addr).await?;
    info!("Connected to {}", config.server_addr);

    run_client(stream, BufReader::new(stdin()), stdout(), config.max_server_line_len).await?;

    Ok(())
}

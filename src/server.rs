//! ChatServer listener
//!
//! Accepts TCP connections and spawns one connection handler task per
//! accepted socket. The registry is the only state the tasks share.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::config::Config;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::registry::Registry;

/// The listening side of the chat service
pub struct ChatServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: Arc<Config>,
}

impl ChatServer {
    /// Bind `config.listen_addr`
    pub async fn bind(config: Config) -> Result<Self, AppError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        Ok(Self::from_listener(listener, config))
    }

    /// Serve on an already bound listener
    pub fn from_listener(listener: TcpListener, config: Config) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
            config: Arc::new(config),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared registry handle
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until accepting fails
    pub async fn run(self) -> Result<(), AppError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves or accepting fails
    ///
    /// A failed accept is fatal for the listener; sessions already running
    /// are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send,
    {
        info!("ChatServer started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("ChatServer shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        self.spawn_session(stream);
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        return Err(e.into());
                    }
                },
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream) {
        let registry = Arc::clone(&self.registry);
        let config = Arc::clone(&self.config);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry, config).await {
                error!("Connection handler error: {}", e);
            }
        });
    }
}

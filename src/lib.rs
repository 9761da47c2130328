//! Multi-user line chat
//!
//! A tokio chat service speaking a small line-based protocol over TCP.
//! Clients log in under a unique name, then broadcast to everyone or send
//! private messages to one user.
//!
//! # Architecture
//! - `ChatServer` accepts connections and spawns one `handler` task each
//! - Each connection runs a `Session` state machine (login → active → closed)
//!   and owns a writer task fed by an unbounded queue
//! - The `Registry` is the only shared state: one mutex guards membership,
//!   and join/leave notices are queued inside the same critical section
//! - `ClientSession` mirrors the protocol from the client side
//!
//! # Example
//! ```ignore
//! use line_chat::{ChatServer, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::bind(Config::default()).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod peer;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{run_client, ClientSession, Outgoing};
pub use codec::LineCodec;
pub use config::Config;
pub use error::{AppError, SendError};
pub use handler::{handle_connection, Session, SessionState};
pub use message::{Message, ParseError};
pub use peer::{Outbound, Peer};
pub use registry::Registry;
pub use server::ChatServer;
pub use types::{SessionId, Username};

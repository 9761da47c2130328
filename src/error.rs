//! Error types for the chat server
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::Username;

/// Application-level errors
///
/// `Io` ends the affected connection, `NameTaken` ends a login attempt,
/// and the config variants stop startup.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal for the affected connection)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("JSON config error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config values are unusable
    #[error("Invalid config: {0}")]
    Config(String),

    /// Another active session already owns this name
    #[error("Username already in use: {0}")]
    NameTaken(Username),
}

/// Message send errors
///
/// Occurs when attempting to enqueue to a peer whose writer has ended.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}

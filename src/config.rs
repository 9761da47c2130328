//! Runtime configuration
//!
//! Fixed parameters handed to the core: endpoint addresses and the
//! username/line length limits. Defaults match the classic deployment
//! (port 1337 on all interfaces, loopback for the client) and can be
//! overridden by a JSON file named in `CHAT_CONFIG`.

use std::path::Path;

use serde::Deserialize;

use crate::error::AppError;

/// Environment variable holding the path of a JSON config file
pub const CONFIG_ENV: &str = "CHAT_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the server binds
    pub listen_addr: String,
    /// Address the client connects to
    pub server_addr: String,
    /// Usernames are truncated to this many characters
    pub max_username_len: usize,
    /// Longest accepted line in bytes, terminator excluded
    pub max_message_len: usize,
    /// Longest server line the client reads. Relayed chat lines carry the
    /// sender, recipient and timestamp on top of the request text, and the
    /// acceptance line lists every user, so this sits well above
    /// `max_message_len`.
    pub max_server_line_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:1337".to_string(),
            server_addr: "127.0.0.1:1337".to_string(),
            max_username_len: 16,
            max_message_len: 1024,
            max_server_line_len: 64 * 1024,
        }
    }
}

impl Config {
    /// Parse a JSON document; absent keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Load from the file named by `CHAT_CONFIG`, or use defaults
    pub fn from_env() -> Result<Self, AppError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.max_username_len == 0 {
            return Err(AppError::Config(
                "max_username_len must be at least 1".to_string(),
            ));
        }
        // A login line needs room for "0 " plus at least one character.
        if self.max_message_len < 3 {
            return Err(AppError::Config(
                "max_message_len must be at least 3".to_string(),
            ));
        }
        if self.max_server_line_len < self.relay_line_len() {
            return Err(AppError::Config(format!(
                "max_server_line_len must be at least {} to fit relayed messages",
                self.relay_line_len()
            )));
        }
        Ok(())
    }

    /// Longest chat line the server can relay for a request that fits
    /// `max_message_len`: "6 ", two names, the timestamp, three spaces.
    fn relay_line_len(&self) -> usize {
        self.max_message_len + 2 * self.max_username_len + 24
    }
}

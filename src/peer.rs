//! Peer struct definition
//!
//! Server-side handle to one logged-in connection: who it is and how to
//! queue lines for its writer task.

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::Message;
use crate::types::{SessionId, Username};

/// Notice written to the sender of a private message.
///
/// Not part of the wire grammar; clients show it verbatim.
pub const PRIVATE_SENT_NOTICE: &str = "Private message sent!";

/// Notice written for a request that arrives before login.
pub const PLEASE_LOG_IN_NOTICE: &str = "Please log in!";

/// One line queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A protocol message
    Message(Message),
    /// Free text outside the grammar
    Notice(String),
}

impl Outbound {
    /// Wire text of this item, without the terminator
    pub fn into_line(self) -> String {
        match self {
            Outbound::Message(msg) => msg.encode(),
            Outbound::Notice(text) => text,
        }
    }
}

impl From<Message> for Outbound {
    fn from(msg: Message) -> Self {
        Outbound::Message(msg)
    }
}

/// Live connection handle stored in the registry
///
/// Cheap to clone: the sender is shared with the owning session. The queue
/// is unbounded so enqueueing never waits on a slow reader.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Connection this handle belongs to
    pub id: SessionId,
    /// Normalized login name
    pub username: Username,
    /// Server → client line queue
    pub sender: mpsc::UnboundedSender<Outbound>,
}

impl Peer {
    pub fn new(id: SessionId, username: Username, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            username,
            sender,
        }
    }

    /// Queue a line for this peer
    ///
    /// Returns an error if the writer has gone away (peer disconnected).
    pub fn send(&self, item: impl Into<Outbound>) -> Result<(), SendError> {
        self.sender
            .send(item.into())
            .map_err(|_| SendError::ChannelClosed)
    }
}

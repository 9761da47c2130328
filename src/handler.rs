//! Connection handler
//!
//! One [`Session`] per accepted TCP connection. The session walks the
//! login → active → closed state machine, reading lines from the peer and
//! queueing replies for a dedicated writer task.

use std::sync::Arc;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::codec::LineCodec;
use crate::config::Config;
use crate::error::AppError;
use crate::message::Message;
use crate::peer::{Outbound, Peer, PLEASE_LOG_IN_NOTICE, PRIVATE_SENT_NOTICE};
use crate::registry::Registry;
use crate::types::{SessionId, Username};

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Only a login request is accepted
    AwaitingLogin,
    /// Logged in and present in the registry
    Active,
    /// Login refused; the denial is queued
    Rejected,
    /// Disconnect acknowledged, registry entry removed
    Closing,
    /// Channels released
    Closed,
}

/// What the read loop should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Server-side protocol state for one connection
pub struct Session {
    id: SessionId,
    state: SessionState,
    /// Registry handle, set once login succeeds
    peer: Option<Peer>,
    outbound: mpsc::UnboundedSender<Outbound>,
    registry: Arc<Registry>,
    max_username_len: usize,
}

impl Session {
    pub fn new(
        registry: Arc<Registry>,
        outbound: mpsc::UnboundedSender<Outbound>,
        max_username_len: usize,
    ) -> Self {
        Self {
            id: SessionId::new(),
            state: SessionState::AwaitingLogin,
            peer: None,
            outbound,
            registry,
            max_username_len,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> Option<&Username> {
        self.peer.as_ref().map(|p| &p.username)
    }

    /// Process one line from the peer
    ///
    /// Lines that fail to decode, or are not valid in the current state,
    /// are dropped without touching any state.
    pub async fn handle_line(&mut self, line: &str) -> Flow {
        let msg = match Message::decode(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Session {} discarded line {:?}: {}", self.id, line, e);
                return Flow::Continue;
            }
        };

        match self.state {
            SessionState::AwaitingLogin => self.handle_login(msg).await,
            SessionState::Active => self.handle_request(msg).await,
            SessionState::Rejected | SessionState::Closing | SessionState::Closed => Flow::Close,
        }
    }

    async fn handle_login(&mut self, msg: Message) -> Flow {
        let username = match msg {
            Message::Login { username } => username,
            other => {
                debug!("Session {} sent code {} before login", self.id, other.code());
                let _ = self
                    .outbound
                    .send(Outbound::Notice(PLEASE_LOG_IN_NOTICE.to_string()));
                return Flow::Continue;
            }
        };

        let Some(name) = Username::normalize(&username, self.max_username_len) else {
            info!("Session {} denied: {:?} is not a usable name", self.id, username);
            self.deny();
            return Flow::Close;
        };

        let peer = Peer::new(self.id, name, self.outbound.clone());
        match self.registry.join(peer.clone()).await {
            Ok(()) => {
                info!("Session {} logged in as {}", self.id, peer.username);
                self.peer = Some(peer);
                self.state = SessionState::Active;
                Flow::Continue
            }
            Err(e) => {
                info!("Session {} denied: {}", self.id, e);
                self.deny();
                Flow::Close
            }
        }
    }

    async fn handle_request(&mut self, msg: Message) -> Flow {
        let Some(peer) = self.peer.clone() else {
            return Flow::Close;
        };

        match msg {
            Message::Broadcast { text } => {
                let delivered = self
                    .registry
                    .broadcast(Message::chat(&peer.username, text))
                    .await;
                debug!("{} broadcast to {} session(s)", peer.username, delivered);
                Flow::Continue
            }
            Message::Whisper { from, to, text } => {
                if from != peer.username.as_str() {
                    debug!("{} declared sender {:?}, using session name", peer.username, from);
                }
                self.whisper(&peer, &to, text).await;
                let _ = peer.send(Outbound::Notice(PRIVATE_SENT_NOTICE.to_string()));
                Flow::Continue
            }
            Message::Logout => {
                let _ = peer.send(Message::Goodbye);
                self.registry.leave(&peer).await;
                self.state = SessionState::Closing;
                Flow::Close
            }
            other => {
                debug!("{} sent code {} which is not a request, ignored", peer.username, other.code());
                Flow::Continue
            }
        }
    }

    /// Deliver a private message; an unknown recipient drops it silently
    async fn whisper(&self, sender: &Peer, to: &str, text: String) {
        let Some(recipient) = Username::normalize(to, self.max_username_len) else {
            debug!("{} whispered to unusable name {:?}, dropped", sender.username, to);
            return;
        };

        match self.registry.find(&recipient).await {
            Some(target) => {
                if target
                    .send(Message::private_chat(&sender.username, &recipient, text))
                    .is_err()
                {
                    debug!("{} is closing, private message dropped", recipient);
                }
            }
            None => debug!("{} whispered to absent {}, dropped", sender.username, recipient),
        }
    }

    fn deny(&mut self) {
        let _ = self.outbound.send(Outbound::Message(Message::Denied));
        self.state = SessionState::Rejected;
    }

    /// Read lines until the peer leaves, the line stream fails, or the
    /// writer task goes away
    pub async fn run<S>(&mut self, lines: &mut S) -> Result<(), AppError>
    where
        S: Stream<Item = Result<String, std::io::Error>> + Unpin,
    {
        let outbound = self.outbound.clone();

        loop {
            tokio::select! {
                frame = lines.next() => match frame {
                    Some(Ok(line)) => {
                        if self.handle_line(&line).await == Flow::Close {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        debug!("Session {} reached end of stream", self.id);
                        return Ok(());
                    }
                },
                _ = outbound.closed() => {
                    debug!("Session {} writer ended", self.id);
                    return Ok(());
                }
            }
        }
    }

    /// Release the session
    ///
    /// Safe to call on every exit path: the registry entry is removed and
    /// the departure announced only if that has not happened already.
    pub async fn close(&mut self) {
        if let Some(peer) = self.peer.take() {
            if self.registry.leave(&peer).await {
                info!("{} dropped without logging out", peer.username);
            }
        }
        self.state = SessionState::Closed;
    }
}

/// Handle a new TCP connection
///
/// Splits the socket, spawns the writer task, runs the session state
/// machine and guarantees registry cleanup however the session ends.
pub async fn handle_connection(
    stream: TcpStream,
    registry: Arc<Registry>,
    config: Arc<Config>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (reader, writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LineCodec::new(config.max_message_len));
    let mut sink = FramedWrite::new(writer, LineCodec::new(config.max_message_len));

    // Server -> client line queue
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let write_task = tokio::spawn(async move {
        while let Some(item) = out_rx.recv().await {
            if let Err(e) = sink.send(item.into_line()).await {
                debug!("Write failed, ending write task: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = Session::new(registry, out_tx, config.max_username_len);
    info!("Session {} opened from {}", session.id(), peer_addr);

    let result = session.run(&mut lines).await;
    if let Err(e) = &result {
        warn!("Session {} read failed: {}", session.id(), e);
    }

    session.close().await;
    let id = session.id();
    // Dropping the session drops its queue sender; the writer drains what
    // is left and shuts the socket down.
    drop(session);
    let _ = write_task.await;

    info!("Session {} closed", id);
    result
}

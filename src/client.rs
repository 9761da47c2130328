//! Client session
//!
//! The other end of the protocol: turns typed shorthand into request lines,
//! renders server lines as display text and keeps a local copy of the user
//! list. [`run_client`] wires a session between a server socket and a pair
//! of local input/output streams.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::codec::LineCodec;
use crate::error::AppError;
use crate::message::Message;

/// A line ready to go to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Translated from a shorthand command
    Request(Message),
    /// Unrecognized input, forwarded untouched
    Raw(String),
}

impl Outgoing {
    pub fn into_line(self) -> String {
        match self {
            Outgoing::Request(msg) => msg.encode(),
            Outgoing::Raw(text) => text,
        }
    }
}

/// Local protocol state of a chat client
#[derive(Debug, Default)]
pub struct ClientSession {
    /// Own name as confirmed by the server
    username: Option<String>,
    /// Cached member list, join order
    users: Vec<String>,
    /// Set once the server denied the login or acknowledged a logout
    finished: bool,
}

/// Strip a case-insensitive two-character command plus its space
fn command_arg<'a>(input: &'a str, command: &str) -> Option<&'a str> {
    let head = input.get(..3)?;
    if head.eq_ignore_ascii_case(&format!("{command} ")) {
        input.get(3..)
    } else {
        None
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Translate one line of local input
    ///
    /// | input | request |
    /// |---|---|
    /// | `/i <name>` | login |
    /// | `/o` | disconnect |
    /// | `/w <user> <text>` | private message |
    /// | `/a <text>` | broadcast |
    ///
    /// Anything else is passed through as typed.
    pub fn translate(&self, input: &str) -> Outgoing {
        if input.eq_ignore_ascii_case("/o") {
            return Outgoing::Request(Message::Logout);
        }

        if let Some(name) = command_arg(input, "/i") {
            return Outgoing::Request(Message::Login {
                username: name.to_string(),
            });
        }

        if let Some(rest) = command_arg(input, "/w") {
            let (to, text) = rest.split_once(' ').unwrap_or((rest, ""));
            return Outgoing::Request(Message::Whisper {
                from: self.username.clone().unwrap_or_default(),
                to: to.to_string(),
                text: text.to_string(),
            });
        }

        if let Some(text) = command_arg(input, "/a") {
            return Outgoing::Request(Message::Broadcast {
                text: text.to_string(),
            });
        }

        Outgoing::Raw(input.to_string())
    }

    /// Apply one server line and render it for display
    ///
    /// Lines outside the grammar (such as the private-message notice) are
    /// shown as received; empty lines render nothing.
    pub fn receive(&mut self, line: &str) -> Option<String> {
        let msg = match Message::decode(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Undecodable server line {:?}: {}", line, e);
                return (!line.is_empty()).then(|| line.to_string());
            }
        };

        let text = match msg {
            Message::Accepted { users, welcome } => {
                // The server lists the newcomer last.
                self.username = users.last().cloned();
                self.users = users;
                format!("{welcome}\nAll users: {}", self.user_list())
            }
            Message::Denied => {
                self.finished = true;
                "User name is already in use. Close connection now!".to_string()
            }
            Message::Chat {
                from,
                timestamp,
                text,
            } => format!("[{timestamp}][GMT] {from}: {text}"),
            Message::PrivateChat {
                from,
                timestamp,
                text,
                ..
            } => format!("[{timestamp}][GMT] Private message from {from}:\n{text}"),
            Message::Goodbye => {
                self.finished = true;
                "You have been disconnected from the chatroom!".to_string()
            }
            Message::UserLeft { username } => {
                if let Some(pos) = self.users.iter().position(|u| *u == username) {
                    self.users.remove(pos);
                }
                format!(
                    "{username} has been disconnected from the chatroom!\nAll users: {}",
                    self.user_list()
                )
            }
            Message::UserJoined { username } => {
                let text = format!("{username} has connected to the chatroom!");
                self.users.push(username);
                format!("{text}\nAll users: {}", self.user_list())
            }
            Message::Login { .. }
            | Message::Broadcast { .. }
            | Message::Whisper { .. }
            | Message::Logout => line.to_string(),
        };

        Some(text)
    }

    fn user_list(&self) -> String {
        self.users.join(", ")
    }
}

/// Drive a client session over `stream`
///
/// Reads shorthand from `input` and writes rendered text to `output`, one
/// entry per line. Returns after a denial or logout acknowledgment, when the
/// server closes the connection, or when `input` ends. Ending input while
/// logged in sends a disconnect request first and waits for the reply.
///
/// `max_line_len` bounds lines read from the server; see
/// [`Config::max_server_line_len`](crate::Config::max_server_line_len).
pub async fn run_client<I, O>(
    stream: TcpStream,
    input: I,
    mut output: O,
    max_line_len: usize,
) -> Result<(), AppError>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let (reader, writer) = stream.into_split();
    let mut from_server = FramedRead::new(reader, LineCodec::new(max_line_len));
    let mut to_server = FramedWrite::new(writer, LineCodec::new(max_line_len));

    let mut input = input.lines();
    let mut input_open = true;
    let mut session = ClientSession::new();

    loop {
        tokio::select! {
            typed = input.next_line(), if input_open => match typed? {
                Some(typed) => {
                    let line = session.translate(&typed).into_line();
                    debug!("Sending {:?}", line);
                    to_server.send(line).await?;
                }
                None => {
                    input_open = false;
                    if session.username().is_none() {
                        break;
                    }
                    to_server.send(Message::Logout.encode()).await?;
                }
            },
            frame = from_server.next() => match frame {
                Some(Ok(line)) => {
                    if let Some(text) = session.receive(&line) {
                        output.write_all(text.as_bytes()).await?;
                        output.write_all(b"\n").await?;
                        output.flush().await?;
                    }
                    if session.is_finished() {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    info!("Server closed the connection");
                    break;
                }
            },
        }
    }

    let _ = to_server.close().await;
    Ok(())
}

//! Message protocol definitions
//!
//! Line-based wire grammar shared by both endpoints. Every line is a numeric
//! command code followed by space-separated fields; the last field of a
//! command may itself contain spaces and is never split further.
//!
//! | code | direction | fields |
//! |---|---|---|
//! | 0 | client → server | username |
//! | 1 | server → client | comma-joined user list, welcome text |
//! | 2 | server → client | (none) |
//! | 3 | client → server | text |
//! | 4 | client → server | from, to, text |
//! | 5 | server → client | from, timestamp, text |
//! | 6 | server → client | from, to, timestamp, text |
//! | 7 | client → server | (none) |
//! | 8 | server → client | (none) |
//! | 9 | server → client | username |
//! | 10 | server → client | username |

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use thiserror::Error;

use crate::types::Username;

/// `strftime` layout of the timestamp field in codes 5 and 6 (always GMT)
pub const TIMESTAMP_FORMAT: &str = "%Y:%m:%d:%H:%M:%S";

/// Greeting carried by the acceptance message, followed by the user's name
pub const WELCOME_PREFIX: &str = "Welcome to the chatroom, ";

/// One protocol line, decoded
///
/// One variant per command code. Both directions share the enum so the same
/// codec serves the server and the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// 0: ask to log in under `username`
    Login { username: String },
    /// 1: login accepted; `users` is every member, the new one last
    Accepted { users: Vec<String>, welcome: String },
    /// 2: login denied, name taken
    Denied,
    /// 3: send `text` to everyone
    Broadcast { text: String },
    /// 4: send `text` to one user
    Whisper { from: String, to: String, text: String },
    /// 5: delivery of a broadcast
    Chat {
        from: String,
        timestamp: String,
        text: String,
    },
    /// 6: delivery of a private message
    PrivateChat {
        from: String,
        to: String,
        timestamp: String,
        text: String,
    },
    /// 7: ask to disconnect
    Logout,
    /// 8: disconnect acknowledged
    Goodbye,
    /// 9: a user left
    UserLeft { username: String },
    /// 10: a user joined
    UserJoined { username: String },
}

/// Reasons a line is rejected by [`Message::decode`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("unknown command code '{0}'")]
    UnknownCommand(String),

    #[error("command {code} expects {expected} field(s)")]
    MissingFields { code: u8, expected: usize },
}

impl Message {
    /// Numeric command code of this variant
    pub fn code(&self) -> u8 {
        match self {
            Message::Login { .. } => 0,
            Message::Accepted { .. } => 1,
            Message::Denied => 2,
            Message::Broadcast { .. } => 3,
            Message::Whisper { .. } => 4,
            Message::Chat { .. } => 5,
            Message::PrivateChat { .. } => 6,
            Message::Logout => 7,
            Message::Goodbye => 8,
            Message::UserLeft { .. } => 9,
            Message::UserJoined { .. } => 10,
        }
    }

    /// Encode to a wire line, without the terminator
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode one wire line
    ///
    /// A trailing `\r\n` (or bare `\n`) is stripped; no other whitespace is
    /// touched. Never yields a partially filled message.
    pub fn decode(line: &str) -> Result<Self, ParseError> {
        let line = strip_terminator(line);
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let (code, rest) = match line.split_once(' ') {
            Some((code, rest)) => (code, Some(rest)),
            None => (line, None),
        };

        let message = match code {
            "0" => {
                let [username] = fields::<1>(0, rest)?;
                Message::Login {
                    username: username.to_string(),
                }
            }
            "1" => {
                let [users, welcome] = fields::<2>(1, rest)?;
                // Normalized names are never empty, so empty entries are
                // noise and get dropped. Such a line re-encodes without them.
                Message::Accepted {
                    users: users
                        .split(',')
                        .filter(|u| !u.is_empty())
                        .map(String::from)
                        .collect(),
                    welcome: welcome.to_string(),
                }
            }
            "2" => Message::Denied,
            "3" => {
                let [text] = fields::<1>(3, rest)?;
                Message::Broadcast {
                    text: text.to_string(),
                }
            }
            "4" => {
                let [from, to, text] = fields::<3>(4, rest)?;
                Message::Whisper {
                    from: from.to_string(),
                    to: to.to_string(),
                    text: text.to_string(),
                }
            }
            "5" => {
                let [from, timestamp, text] = fields::<3>(5, rest)?;
                Message::Chat {
                    from: from.to_string(),
                    timestamp: timestamp.to_string(),
                    text: text.to_string(),
                }
            }
            "6" => {
                let [from, to, timestamp, text] = fields::<4>(6, rest)?;
                Message::PrivateChat {
                    from: from.to_string(),
                    to: to.to_string(),
                    timestamp: timestamp.to_string(),
                    text: text.to_string(),
                }
            }
            "7" => Message::Logout,
            "8" => Message::Goodbye,
            "9" => {
                let [username] = fields::<1>(9, rest)?;
                Message::UserLeft {
                    username: username.to_string(),
                }
            }
            "10" => {
                let [username] = fields::<1>(10, rest)?;
                Message::UserJoined {
                    username: username.to_string(),
                }
            }
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };

        Ok(message)
    }

    /// Acceptance reply for `name`, listing `members` in join order
    pub fn accepted(members: &[Username], name: &Username) -> Self {
        Message::Accepted {
            users: members.iter().map(|m| m.to_string()).collect(),
            welcome: format!("{WELCOME_PREFIX}{name}"),
        }
    }

    /// Broadcast delivery stamped with the current GMT time
    pub fn chat(from: &Username, text: String) -> Self {
        Message::Chat {
            from: from.to_string(),
            timestamp: gmt_timestamp(),
            text,
        }
    }

    /// Private delivery stamped with the current GMT time
    pub fn private_chat(from: &Username, to: &Username, text: String) -> Self {
        Message::PrivateChat {
            from: from.to_string(),
            to: to.to_string(),
            timestamp: gmt_timestamp(),
            text,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        match self {
            Message::Login { username }
            | Message::UserLeft { username }
            | Message::UserJoined { username } => write!(f, "{code} {username}"),
            Message::Accepted { users, welcome } => {
                write!(f, "{code} {} {welcome}", users.join(","))
            }
            Message::Broadcast { text } => write!(f, "{code} {text}"),
            Message::Whisper { from, to, text } => write!(f, "{code} {from} {to} {text}"),
            Message::Chat {
                from,
                timestamp,
                text,
            } => write!(f, "{code} {from} {timestamp} {text}"),
            Message::PrivateChat {
                from,
                to,
                timestamp,
                text,
            } => write!(f, "{code} {from} {to} {timestamp} {text}"),
            Message::Denied | Message::Logout | Message::Goodbye => write!(f, "{code} "),
        }
    }
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        Message::decode(line)
    }
}

/// Current time in GMT, formatted for the wire
pub fn gmt_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn strip_terminator(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => line,
    }
}

/// Split `rest` into exactly `N` fields, the last one unsplit
fn fields<const N: usize>(code: u8, rest: Option<&str>) -> Result<[&str; N], ParseError> {
    let missing = ParseError::MissingFields { code, expected: N };
    let rest = rest.ok_or_else(|| missing.clone())?;

    let mut parts = rest.splitn(N, ' ');
    let mut out = [""; N];
    for slot in out.iter_mut() {
        *slot = parts.next().ok_or_else(|| missing.clone())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_login() {
        let msg = Message::decode("0 alice\r\n").unwrap();
        assert_eq!(
            msg,
            Message::Login {
                username: "alice".to_string()
            }
        );
    }

    #[test]
    fn test_decode_final_field_keeps_spaces() {
        let msg = Message::decode("4 alice carol hey there  you").unwrap();
        assert_eq!(
            msg,
            Message::Whisper {
                from: "alice".to_string(),
                to: "carol".to_string(),
                text: "hey there  you".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_accepted_user_list() {
        let msg = Message::decode("1 alice,bob Welcome to the chatroom, bob").unwrap();
        match msg {
            Message::Accepted { users, welcome } => {
                assert_eq!(users, vec!["alice", "bob"]);
                assert_eq!(welcome, "Welcome to the chatroom, bob");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_decode_accepted_drops_empty_entries() {
        let msg = Message::decode("1 a,,b, Welcome to the chatroom, b").unwrap();
        assert_eq!(
            msg,
            Message::Accepted {
                users: vec!["a".to_string(), "b".to_string()],
                welcome: "Welcome to the chatroom, b".to_string(),
            }
        );
        assert_eq!(msg.encode(), "1 a,b Welcome to the chatroom, b");
    }

    #[test]
    fn test_decode_fieldless_commands() {
        assert_eq!(Message::decode("2 ").unwrap(), Message::Denied);
        assert_eq!(Message::decode("7 ").unwrap(), Message::Logout);
        assert_eq!(Message::decode("7").unwrap(), Message::Logout);
        assert_eq!(Message::decode("8 \r\n").unwrap(), Message::Goodbye);
    }

    #[test]
    fn test_decode_empty_text_field() {
        assert_eq!(
            Message::decode("3 ").unwrap(),
            Message::Broadcast {
                text: String::new()
            }
        );
    }

    #[test]
    fn test_decode_keeps_inner_whitespace() {
        let msg = Message::decode("3  padded \r\n").unwrap();
        assert_eq!(
            msg,
            Message::Broadcast {
                text: " padded ".to_string()
            }
        );
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(Message::decode(""), Err(ParseError::Empty));
        assert_eq!(Message::decode("\r\n"), Err(ParseError::Empty));
        assert_eq!(
            Message::decode("hello world"),
            Err(ParseError::UnknownCommand("hello".to_string()))
        );
        assert_eq!(
            Message::decode("11 x"),
            Err(ParseError::UnknownCommand("11".to_string()))
        );
        assert_eq!(
            Message::decode("03 x"),
            Err(ParseError::UnknownCommand("03".to_string()))
        );
        assert_eq!(
            Message::decode(" 3 x"),
            Err(ParseError::UnknownCommand(String::new()))
        );
        assert_eq!(
            Message::decode("3"),
            Err(ParseError::MissingFields {
                code: 3,
                expected: 1
            })
        );
        assert_eq!(
            Message::decode("4 alice carol"),
            Err(ParseError::MissingFields {
                code: 4,
                expected: 3
            })
        );
        assert_eq!(
            Message::decode("6 a b c"),
            Err(ParseError::MissingFields {
                code: 6,
                expected: 4
            })
        );
    }

    #[test]
    fn test_grammar_lines_round_trip() {
        let lines = [
            "0 alice",
            "1 alice Welcome to the chatroom, alice",
            "1 alice,bob,carol Welcome to the chatroom, carol",
            "2 ",
            "3 hi there",
            "4 alice carol hey",
            "5 alice 2016:04:11:10:00:00 hi there",
            "6 alice bob 2016:04:11:10:00:00 psst, over here",
            "7 ",
            "8 ",
            "9 alice",
            "10 bob",
        ];
        for line in lines {
            let msg = Message::decode(line).unwrap();
            assert_eq!(msg.encode(), line);
        }
    }

    #[test]
    fn test_accepted_constructor() {
        let alice = Username::normalize("alice", 16).unwrap();
        let bob = Username::normalize("bob", 16).unwrap();
        let msg = Message::accepted(&[alice, bob.clone()], &bob);
        assert_eq!(msg.encode(), "1 alice,bob Welcome to the chatroom, bob");
    }

    #[test]
    fn test_chat_is_stamped() {
        let alice = Username::normalize("alice", 16).unwrap();
        let msg = Message::chat(&alice, "hi there".to_string());
        match Message::decode(&msg.encode()).unwrap() {
            Message::Chat {
                from,
                timestamp,
                text,
            } => {
                assert_eq!(from, "alice");
                assert_eq!(text, "hi there");
                assert!(chrono::NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT).is_ok());
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_timestamp_is_single_token() {
        let ts = gmt_timestamp();
        assert!(!ts.contains(' '));
        assert_eq!(ts.len(), "2016:04:11:10:00:00".len());
    }
}

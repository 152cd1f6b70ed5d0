//! Outbound messages the bridge can send over a chat connection.
//!
//! Grounded on `client_messages.rs`, trimmed to the moderation-free subset
//! the bridge actually needs (join/part/privmsg/ping plus login) and
//! despecialized from Twitch-specific slash commands.

use std::fmt;

/// A message to be sent to the chat server.
#[derive(Clone, Debug)]
pub enum ClientMessage {
    Pass(String),
    Nick(String),
    CapRequest(Vec<Capability>),
    Join(String),
    Part(String),
    PrivMsg { channel: String, text: String },
    Ping,
    Pong(String),
}

impl fmt::Display for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::Pass(token) => write!(f, "PASS {}", token),
            ClientMessage::Nick(nick) => write!(f, "NICK {}", nick),
            ClientMessage::CapRequest(caps) => write!(
                f,
                "CAP REQ :{}",
                caps.iter()
                    .map(Capability::wire_name)
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            ClientMessage::Join(channel) => write!(f, "JOIN {}", channel),
            ClientMessage::Part(channel) => write!(f, "PART {}", channel),
            ClientMessage::PrivMsg { channel, text } => write!(f, "PRIVMSG {} :{}", channel, text),
            ClientMessage::Ping => write!(f, "PING"),
            ClientMessage::Pong(token) => write!(f, "PONG :{}", token),
        }
    }
}

/// Capabilities requested on connect; membership and tags are required for
/// join/part tracking and for sender-rank derivation respectively.
#[derive(Clone, Copy, Debug)]
pub enum Capability {
    Membership,
    Tags,
    Commands,
}

impl Capability {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Capability::Membership => "twitch.tv/membership",
            Capability::Tags => "twitch.tv/tags",
            Capability::Commands => "twitch.tv/commands",
        }
    }
}

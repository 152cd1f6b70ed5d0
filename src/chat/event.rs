//! Parsed chat events the bridge reacts to.
//!
//! Trimmed from a much larger upstream `Event` enum (badges, emotes, room
//! state, user notices, ...) down to what `sync_streams`/`ChatClient`
//! actually consume: chat lines, the welcome message that flips a client to
//! `Active`, and the PING/PONG heartbeat.

use crate::chat::irc::IrcMessage;

pub const RPL_ENDOFMOTD: &str = "376";

#[derive(Debug, Clone)]
pub enum Event {
    PrivMsg(PrivMsgEvent),
    Ping(String),
    Pong,
    /// Numeric/ambient replies from the server that the bridge doesn't act
    /// on beyond possibly detecting end-of-MOTD.
    Other(IrcMessage),
}

#[derive(Debug, Clone)]
pub struct PrivMsgEvent {
    pub channel: String,
    pub text: String,
    pub sender_login: Option<String>,
    pub display_name: Option<String>,
    pub is_mod: bool,
    pub is_subscriber: bool,
}

impl Event {
    pub fn from_irc(msg: IrcMessage) -> Event {
        match msg.command.as_str() {
            "PRIVMSG" => {
                let channel = msg.param(0).unwrap_or_default().to_string();
                let text = msg.param(1).unwrap_or_default().to_string();
                let display_name = msg.tag("display-name").map(str::to_string);
                let is_mod = msg.tag("mod") == Some("1");
                let is_subscriber = msg.tag("subscriber") == Some("1");
                let sender_login = msg.sender().map(str::to_string);
                Event::PrivMsg(PrivMsgEvent {
                    channel,
                    text,
                    sender_login,
                    display_name,
                    is_mod,
                    is_subscriber,
                })
            }
            "PING" => Event::Ping(msg.param(0).unwrap_or_default().to_string()),
            "PONG" => Event::Pong,
            _ => Event::Other(msg),
        }
    }
}

/// Rank of a chat line's sender relative to its channel, used for command
/// gating (`mod_only`/`sub_only`) and for `%rank%`-style feature text.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SenderRank {
    Broadcaster,
    Mod,
    Subscriber,
    Viewer,
}

impl SenderRank {
    pub fn is_mod_or_above(self) -> bool {
        matches!(self, SenderRank::Broadcaster | SenderRank::Mod)
    }

    pub fn is_sub_or_above(self) -> bool {
        matches!(
            self,
            SenderRank::Broadcaster | SenderRank::Mod | SenderRank::Subscriber
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SenderRank::Broadcaster => "broadcaster",
            SenderRank::Mod => "mod",
            SenderRank::Subscriber => "subscriber",
            SenderRank::Viewer => "viewer",
        }
    }

    pub fn from_str(s: &str) -> SenderRank {
        match s {
            "broadcaster" => SenderRank::Broadcaster,
            "mod" => SenderRank::Mod,
            "subscriber" => SenderRank::Subscriber,
            _ => SenderRank::Viewer,
        }
    }
}

impl PrivMsgEvent {
    /// `sender` prefers the display-name tag (correct capitalization) over
    /// the raw IRC sender.
    pub fn sender(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.sender_login.as_deref())
            .unwrap_or("")
    }

    /// Derive rank per spec: broadcaster iff display-name (case-insensitive)
    /// equals the channel name minus its leading `#`; else mod > subscriber
    /// > viewer, from tags.
    pub fn sender_rank(&self) -> SenderRank {
        let channel_name = self.channel.trim_start_matches('#');
        if self.sender().eq_ignore_ascii_case(channel_name) {
            return SenderRank::Broadcaster;
        }
        if self.is_mod {
            return SenderRank::Mod;
        }
        if self.is_subscriber {
            return SenderRank::Subscriber;
        }
        SenderRank::Viewer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(channel: &str, display_name: &str, is_mod: bool, is_subscriber: bool) -> PrivMsgEvent {
        PrivMsgEvent {
            channel: channel.to_string(),
            text: "hello".to_string(),
            sender_login: Some(display_name.to_lowercase()),
            display_name: Some(display_name.to_string()),
            is_mod,
            is_subscriber,
        }
    }

    #[test]
    fn broadcaster_rank_is_case_insensitive() {
        let event = msg("#Alice", "ALICE", false, false);
        assert_eq!(event.sender_rank(), SenderRank::Broadcaster);
    }

    #[test]
    fn mod_outranks_subscriber() {
        let event = msg("#alice", "bob", true, true);
        assert_eq!(event.sender_rank(), SenderRank::Mod);
    }

    #[test]
    fn subscriber_outranks_viewer() {
        let event = msg("#alice", "bob", false, true);
        assert_eq!(event.sender_rank(), SenderRank::Subscriber);
    }

    #[test]
    fn defaults_to_viewer() {
        let event = msg("#alice", "bob", false, false);
        assert_eq!(event.sender_rank(), SenderRank::Viewer);
    }
}

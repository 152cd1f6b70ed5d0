//! A single live websocket connection to the chat network.
//!
//! Grounded on `client/single.rs::inner_connect_task` and
//! `event/stream.rs::TwitchChatStream`, but reshaped from their generic
//! `Stream`/`Sink` combinator form into a plain connect/send/recv handle:
//! `ChatClient` (below) owns the persistent send queue and reconnect state
//! machine itself, so the connection object only needs to be the thing
//! that's thrown away and recreated on every reconnect attempt.

use std::collections::VecDeque;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::chat::event::Event;
use crate::chat::irc::IrcMessage;
use crate::chat::message::{Capability, ClientMessage};
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct LiveConnection {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    /// Lines from a websocket text frame not yet consumed. A single frame
    /// can carry several `\r\n`-terminated IRC lines; this keeps the ones
    /// after the first across separate `next_event` calls instead of
    /// dropping them when the frame boundary doesn't line up with the IRC
    /// line boundary.
    pending_lines: VecDeque<String>,
}

impl LiveConnection {
    /// Connect, request capabilities, authenticate, and join `channels`.
    pub async fn connect(
        url: &Url,
        nick: &str,
        credential: &str,
        channels: &[String],
    ) -> Result<LiveConnection, Error> {
        debug!("connecting to {}", url);
        let (ws, _) = tokio_tungstenite::connect_async(url.clone()).await?;
        let (write, read) = ws.split();
        let mut conn = LiveConnection {
            write,
            read,
            pending_lines: VecDeque::new(),
        };

        conn.send(&ClientMessage::CapRequest(vec![
            Capability::Tags,
            Capability::Commands,
            Capability::Membership,
        ]))
        .await?;
        conn.send(&ClientMessage::Pass(credential.to_string())).await?;
        conn.send(&ClientMessage::Nick(nick.to_string())).await?;
        for channel in channels {
            conn.send(&ClientMessage::Join(channel.clone())).await?;
        }
        Ok(conn)
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), Error> {
        match msg {
            ClientMessage::Pass(_) => debug!("> PASS ****"),
            _ => debug!("> {}", msg),
        }
        self.write.send(Message::Text(msg.to_string())).await?;
        Ok(())
    }

    /// Read the next parsed event, auto-replying to PINGs. `None` means the
    /// connection closed cleanly.
    pub async fn next_event(&mut self) -> Option<Result<Event, Error>> {
        loop {
            if let Some(line) = self.pending_lines.pop_front() {
                match IrcMessage::parse(&line) {
                    Ok(irc_msg) => {
                        let event = Event::from_irc(irc_msg);
                        if let Event::Ping(ref token) = event {
                            if let Err(e) = self.send(&ClientMessage::Pong(token.clone())).await {
                                return Some(Err(e));
                            }
                            debug!("replied to PING {}", token);
                        }
                        return Some(Ok(event));
                    }
                    Err(e) => {
                        warn!("failed to parse chat line {:?}: {}", line, e);
                        continue;
                    }
                }
            }

            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.pending_lines.extend(
                        text.split("\r\n")
                            .filter(|l| !l.is_empty())
                            .map(str::to_string),
                    );
                }
                Some(Ok(Message::Close(_))) => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(e.into())),
                None => return None,
            }
        }
    }

    pub async fn close(&mut self) {
        self.write.close().await.ok();
    }
}

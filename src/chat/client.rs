//! Per-key chat connection state machine.
//!
//! One `ChatClient` owns exactly one login (host, nick, credential) and
//! speaks for every stream that currently maps to that login. Grounded on
//! `client/single.rs`'s reconnect loop combined with the `IRCClientManager`
//! class from the bridge's original Python implementation, which is the
//! source of the state names, the backoff schedule, and the "drop the
//! in-flight message on send failure" rule.

use std::collections::HashSet;
use std::time::Duration;

use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::chat::connection::LiveConnection;
use crate::chat::event::{Event, PrivMsgEvent};
use crate::chat::message::ClientMessage;
use crate::chat::rate_limit::RateLimiter;

/// Identifies a login: every stream sharing a `ChatClientKey` shares one
/// underlying connection. Streams must never be routed to the wrong key,
/// since credentials for different streams must never cross.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ChatClientKey {
    pub host: Url,
    pub nick: String,
    pub credential: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChatClientState {
    Starting,
    Connected,
    Reconnecting,
    Draining,
    Stopped,
}

enum ClientCommand {
    Send(String, String),
    SetDesired(HashSet<String>),
    Stop,
}

/// Callback invoked for every inbound chat line on a channel the client
/// still considers desired.
pub type EventCallback = Arc<dyn Fn(ChatClientKey, PrivMsgEvent) + Send + Sync>;

pub struct ChatClient {
    pub key: ChatClientKey,
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    state: Arc<Mutex<ChatClientState>>,
}

impl ChatClient {
    pub fn start(
        key: ChatClientKey,
        initial_channels: HashSet<String>,
        rate_limiter: Arc<RateLimiter>,
        on_event: EventCallback,
    ) -> ChatClient {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ChatClientState::Starting));
        tokio::spawn(run(
            key.clone(),
            cmd_rx,
            initial_channels,
            rate_limiter,
            on_event,
            state.clone(),
        ));
        ChatClient { key, cmd_tx, state }
    }

    pub fn send(&self, channel: String, text: String) {
        let _ = self.cmd_tx.send(ClientCommand::Send(channel, text));
    }

    pub fn update_channels(&self, desired: HashSet<String>) {
        let _ = self.cmd_tx.send(ClientCommand::SetDesired(desired));
    }

    /// Requests a graceful shutdown. Since commands are processed strictly
    /// in the order they were enqueued, every `send()` issued before this
    /// call is guaranteed to have already been attempted by the time `Stop`
    /// is handled.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Stop);
    }

    pub fn state(&self) -> ChatClientState {
        *self.state.lock()
    }
}

struct Backoff {
    delay: Duration,
}

const BACKOFF_START: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(10);
const BACKOFF_FACTOR: u32 = 5;

impl Backoff {
    fn new() -> Backoff {
        Backoff { delay: BACKOFF_START }
    }

    fn reset(&mut self) {
        self.delay = BACKOFF_START;
    }

    fn next(&mut self) -> Duration {
        let due = self.delay;
        self.delay = (self.delay * BACKOFF_FACTOR).min(BACKOFF_CAP);
        due
    }
}

fn set_state(handle: &Mutex<ChatClientState>, new: ChatClientState) {
    *handle.lock() = new;
}

fn open_channels(desired: &HashSet<String>, pending: &FnvHashMap<String, u32>) -> Vec<String> {
    desired
        .iter()
        .cloned()
        .chain(pending.keys().cloned())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect()
}

fn note_sent(pending: &mut FnvHashMap<String, u32>, channel: &str) {
    if let Some(count) = pending.get_mut(channel) {
        *count -= 1;
        if *count == 0 {
            pending.remove(channel);
        }
    }
}

/// Joins/parts the live connection so that its joined-channel set matches
/// `desired ∪ channels-with-pending-messages`, per the invariant that a
/// channel may never be parted while a message is still in flight for it.
async fn reconcile_channels(
    conn: &mut LiveConnection,
    joined: &mut HashSet<String>,
    desired: &HashSet<String>,
    pending: &FnvHashMap<String, u32>,
) {
    let should_be_open: HashSet<String> = desired.iter().cloned().chain(pending.keys().cloned()).collect();
    for channel in should_be_open.difference(joined) {
        if conn.send(&ClientMessage::Join(channel.clone())).await.is_ok() {
            joined.insert(channel.clone());
        }
    }
    let to_part: Vec<String> = joined.difference(&should_be_open).cloned().collect();
    for channel in to_part {
        if conn.send(&ClientMessage::Part(channel.clone())).await.is_ok() {
            joined.remove(&channel);
        }
    }
}

async fn run(
    key: ChatClientKey,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    mut desired: HashSet<String>,
    rate_limiter: Arc<RateLimiter>,
    on_event: EventCallback,
    state_handle: Arc<Mutex<ChatClientState>>,
) {
    let mut pending: FnvHashMap<String, u32> = FnvHashMap::default();
    let mut backoff = Backoff::new();
    let mut connected_once = false;

    'reconnect: loop {
        set_state(
            &state_handle,
            if connected_once {
                ChatClientState::Reconnecting
            } else {
                ChatClientState::Starting
            },
        );

        let wanted = open_channels(&desired, &pending);
        let mut conn = match LiveConnection::connect(&key.host, &key.nick, &key.credential, &wanted).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("chat connect to {} failed: {}", key.host, e);
                tokio::time::delay_for(backoff.next()).await;
                continue 'reconnect;
            }
        };
        connected_once = true;
        backoff.reset();
        set_state(&state_handle, ChatClientState::Connected);
        let mut joined: HashSet<String> = wanted.into_iter().collect();

        loop {
            tokio::select! {
                event = conn.next_event() => {
                    match event {
                        Some(Ok(Event::PrivMsg(pm))) => {
                            if desired.contains(&pm.channel) {
                                rate_limiter.update_mod_status(&pm.channel, pm.is_mod);
                                on_event(key.clone(), pm);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("chat connection for {} dropped: {}", key.nick, e);
                            break;
                        }
                        None => {
                            info!("chat connection for {} closed", key.nick);
                            break;
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None => return,
                        Some(ClientCommand::Send(channel, text)) => {
                            *pending.entry(channel.clone()).or_insert(0) += 1;
                            if !joined.contains(&channel) && conn.send(&ClientMessage::Join(channel.clone())).await.is_ok() {
                                joined.insert(channel.clone());
                            }
                            rate_limiter.wait_for_slot(&channel).await;
                            if let Err(e) = conn.send(&ClientMessage::PrivMsg { channel: channel.clone(), text }).await {
                                warn!("send to {} failed, dropping message: {}", channel, e);
                                note_sent(&mut pending, &channel);
                                break;
                            }
                            note_sent(&mut pending, &channel);
                            if !desired.contains(&channel) && !pending.contains_key(&channel)
                                && conn.send(&ClientMessage::Part(channel.clone())).await.is_ok()
                            {
                                joined.remove(&channel);
                            }
                        }
                        Some(ClientCommand::SetDesired(new_desired)) => {
                            desired = new_desired;
                            reconcile_channels(&mut conn, &mut joined, &desired, &pending).await;
                        }
                        Some(ClientCommand::Stop) => {
                            set_state(&state_handle, ChatClientState::Draining);
                            conn.close().await;
                            set_state(&state_handle, ChatClientState::Stopped);
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_channels_unions_desired_and_pending() {
        let mut desired = HashSet::new();
        desired.insert("#alice".to_string());
        let mut pending = FnvHashMap::default();
        pending.insert("#bob".to_string(), 2);
        let mut open = open_channels(&desired, &pending);
        open.sort();
        assert_eq!(open, vec!["#alice".to_string(), "#bob".to_string()]);
    }

    #[test]
    fn note_sent_removes_channel_once_pending_reaches_zero() {
        let mut pending = FnvHashMap::default();
        pending.insert("#alice".to_string(), 1);
        note_sent(&mut pending, "#alice");
        assert!(!pending.contains_key("#alice"));
    }

    #[test]
    fn note_sent_keeps_channel_while_pending_remains() {
        let mut pending = FnvHashMap::default();
        pending.insert("#alice".to_string(), 2);
        note_sent(&mut pending, "#alice");
        assert_eq!(pending.get("#alice"), Some(&1));
    }

    #[test]
    fn backoff_grows_by_factor_and_caps() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(2500));
        assert_eq!(backoff.next(), Duration::from_secs(10));
        assert_eq!(backoff.next(), Duration::from_secs(10));
    }
}

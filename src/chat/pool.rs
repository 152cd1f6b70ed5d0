//! Fan-out over many per-stream channels sharing a handful of logins.
//!
//! Grounded on `client/pool.rs` (one pool, many `SingleClient`s keyed by
//! login) and the original Python's `IRCHostsManager`, which is the source
//! of the "one `ChatClient` per `(host, nick, credential)`, many streams
//! mapped onto its channels" shape and of `update_connections`'s
//! create/update/stop reconciliation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chat::client::{ChatClient, ChatClientKey, EventCallback};
use crate::chat::event::SenderRank;
use crate::chat::rate_limit::RateLimiter;

/// Where one stream's chat lives: which login speaks for it, and which
/// channel on that login is its own.
#[derive(Clone, Debug)]
pub struct StreamBinding {
    pub stream_name: String,
    pub key: ChatClientKey,
    pub channel: String,
}

/// Invoked for every chat line addressed to a stream the pool still has a
/// binding for: `(stream_name, text, sender_display_name, sender_rank)`.
pub type ChatCallback = Arc<dyn Fn(&str, &str, &str, SenderRank) + Send + Sync>;

pub struct ChatPool {
    clients: Mutex<HashMap<ChatClientKey, Arc<ChatClient>>>,
    rate_limiters: Mutex<HashMap<ChatClientKey, Arc<RateLimiter>>>,
    streams: Mutex<HashMap<String, (ChatClientKey, String)>>,
    reverse: Arc<Mutex<HashMap<(ChatClientKey, String), String>>>,
    callback: ChatCallback,
}

impl ChatPool {
    pub fn new(callback: ChatCallback) -> ChatPool {
        ChatPool {
            clients: Mutex::new(HashMap::new()),
            rate_limiters: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            reverse: Arc::new(Mutex::new(HashMap::new())),
            callback,
        }
    }

    /// Enqueues `text` for `stream_name`'s channel. Returns `false` if the
    /// stream has no current binding (e.g. it was closed concurrently).
    pub fn send(&self, stream_name: &str, text: &str) -> bool {
        let target = self.streams.lock().get(stream_name).cloned();
        match target {
            Some((key, channel)) => match self.clients.lock().get(&key) {
                Some(client) => {
                    client.send(channel, text.to_string());
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Reconciles live connections with the desired set of bindings:
    /// creates a `ChatClient` for any login not yet connected, updates the
    /// joined-channel set for logins still in use, and stops logins no
    /// stream needs anymore. Never routes two different credentials'
    /// streams through the same connection and never leaks one stream's
    /// credential to another, since `ChatClientKey` carries the credential
    /// and clients are keyed by it exactly.
    pub fn update_connections(&self, bindings: Vec<StreamBinding>) {
        let mut desired_by_key: HashMap<ChatClientKey, HashSet<String>> = HashMap::new();
        let mut new_streams = HashMap::with_capacity(bindings.len());
        let mut new_reverse = HashMap::with_capacity(bindings.len());

        for binding in bindings {
            desired_by_key
                .entry(binding.key.clone())
                .or_insert_with(HashSet::new)
                .insert(binding.channel.clone());
            new_reverse.insert(
                (binding.key.clone(), binding.channel.clone()),
                binding.stream_name.clone(),
            );
            new_streams.insert(binding.stream_name, (binding.key, binding.channel));
        }

        let mut clients = self.clients.lock();
        let mut rate_limiters = self.rate_limiters.lock();

        for (key, channels) in &desired_by_key {
            if let Some(existing) = clients.get(key) {
                existing.update_channels(channels.clone());
            } else {
                let limiter = rate_limiters
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(RateLimiter::new()))
                    .clone();
                let client = ChatClient::start(
                    key.clone(),
                    channels.clone(),
                    limiter,
                    self.make_event_callback(),
                );
                clients.insert(key.clone(), Arc::new(client));
            }
        }

        let stale: Vec<ChatClientKey> = clients
            .keys()
            .filter(|key| !desired_by_key.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(client) = clients.remove(&key) {
                client.update_channels(HashSet::new());
                client.stop();
            }
            rate_limiters.remove(&key);
        }

        drop(clients);
        drop(rate_limiters);

        *self.streams.lock() = new_streams;
        *self.reverse.lock() = new_reverse;
    }

    fn make_event_callback(&self) -> EventCallback {
        let reverse = self.reverse.clone();
        let callback = self.callback.clone();
        Arc::new(move |key, pm| {
            let stream_name = reverse.lock().get(&(key, pm.channel.clone())).cloned();
            if let Some(stream_name) = stream_name {
                callback(&stream_name, &pm.text, pm.sender(), pm.sender_rank());
            }
        })
    }

    /// Stops every connection. Used during shutdown, after the pip listener
    /// and IPC fabric have already stopped accepting new work.
    pub fn stop_all(&self) {
        for client in self.clients.lock().values() {
            client.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn key(nick: &str) -> ChatClientKey {
        ChatClientKey {
            host: Url::parse("wss://chat.example/").unwrap(),
            nick: nick.to_string(),
            credential: "token".to_string(),
        }
    }

    #[test]
    fn send_fails_without_a_binding() {
        let pool = ChatPool::new(Arc::new(|_, _, _, _| {}));
        assert!(!pool.send("unknown-stream", "hi"));
    }

    #[tokio::test]
    async fn distinct_streams_sharing_a_login_both_get_bindings() {
        let pool = ChatPool::new(Arc::new(|_, _, _, _| {}));
        let shared_key = key("bot");
        pool.update_connections(vec![
            StreamBinding {
                stream_name: "alice-stream".to_string(),
                key: shared_key.clone(),
                channel: "#alice".to_string(),
            },
            StreamBinding {
                stream_name: "bob-stream".to_string(),
                key: shared_key,
                channel: "#bob".to_string(),
            },
        ]);
        assert_eq!(pool.clients.lock().len(), 1);
        assert_eq!(pool.streams.lock().len(), 2);
    }

    #[tokio::test]
    async fn dropping_a_binding_removes_its_client_when_unshared() {
        let pool = ChatPool::new(Arc::new(|_, _, _, _| {}));
        pool.update_connections(vec![StreamBinding {
            stream_name: "alice-stream".to_string(),
            key: key("alice-bot"),
            channel: "#alice".to_string(),
        }]);
        assert_eq!(pool.clients.lock().len(), 1);
        pool.update_connections(vec![]);
        assert_eq!(pool.clients.lock().len(), 0);
    }
}

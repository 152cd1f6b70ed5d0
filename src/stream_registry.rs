//! The set of streams the bridge is configured to host, and the
//! constant-time pip-key check the pip listener uses to authenticate an
//! incoming companion-app connection.
//!
//! Grounded on `pipirc.stream.Stream`; the constant-time comparison isn't
//! in the original (Python's `==` on strings already short-circuits) but is
//! required so that probing a wrong key a character at a time doesn't leak
//! timing information about how much of it matched.

use std::collections::HashMap;

use crate::config::{ServiceConfig, StreamConfig};
use crate::chat::client::ChatClientKey;

#[derive(Debug, Clone)]
pub struct Stream {
    pub name: String,
    pub config: StreamConfig,
    pub chat_key: ChatClientKey,
}

impl Stream {
    pub fn irc_channel(&self) -> String {
        self.config.irc_channel(&self.name)
    }
}

pub struct StreamRegistry {
    streams: HashMap<String, Stream>,
}

impl StreamRegistry {
    pub fn from_config(config: &ServiceConfig) -> Result<StreamRegistry, crate::error::Error> {
        let mut streams = HashMap::with_capacity(config.streams.len());
        for (name, stream_config) in &config.streams {
            let host = url::Url::parse(&stream_config.irc_host)
                .map_err(|e| crate::error::Error::Config(format!("bad irc_host for {}: {}", name, e)))?;
            let chat_key = ChatClientKey {
                host,
                nick: config.irc_user_for(stream_config),
                credential: config.irc_oauth_for(stream_config),
            };
            streams.insert(
                name.clone(),
                Stream {
                    name: name.clone(),
                    config: stream_config.clone(),
                    chat_key,
                },
            );
        }
        Ok(StreamRegistry { streams })
    }

    pub fn get(&self, name: &str) -> Option<&Stream> {
        self.streams.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    /// Finds the stream whose `pip_key` matches `candidate`, comparing
    /// every candidate against every key without short-circuiting so that
    /// lookup time doesn't vary with how many characters matched.
    pub fn find_by_pip_key(&self, candidate: &str) -> Option<&Stream> {
        let mut found: Option<&Stream> = None;
        for stream in self.streams.values() {
            if constant_time_eq(stream.config.pip_key.as_bytes(), candidate.as_bytes()) {
                found = Some(stream);
            }
        }
        found
    }
}

/// Compares two byte strings in time that depends only on their lengths,
/// not their contents. Unequal lengths are rejected up front (length is not
/// secret) but every byte of the shorter comparison still runs.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"abcd1234", b"abcd1234"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatch_at_any_position() {
        assert!(!constant_time_eq(b"abcd1234", b"xbcd1234"));
        assert!(!constant_time_eq(b"abcd1234", b"abcd123x"));
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"short", b"muchlonger"));
    }
}

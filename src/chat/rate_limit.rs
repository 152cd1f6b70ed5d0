//! Outbound message rate limiting.
//!
//! The chat network enforces a rolling-window limit on `PRIVMSG`s per
//! connection (low if the bot isn't a moderator in the channel it's
//! speaking in, much higher if it is). `rate_limits.rs` implements this as a
//! generic `Sink`-wrapping combinator; here it's a plain struct with an
//! async `wait_for_slot`, since `ChatClient`'s send loop already drives its
//! own loop rather than composing `Stream`/`Sink` adapters.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(30);
const NORMAL_LIMIT: usize = 20;
const MODERATOR_LIMIT: usize = 100;

struct Window {
    sent_at: VecDeque<Instant>,
    is_moderator: bool,
}

/// Tracks the outbound-message rate limit for one logical connection. A
/// connection may speak in several channels; moderator status is tracked
/// per channel because it affects the limit for messages to that channel.
pub struct RateLimiter {
    global: Mutex<Window>,
    per_channel: Mutex<std::collections::HashMap<String, bool>>,
}

impl RateLimiter {
    pub fn new() -> RateLimiter {
        RateLimiter {
            global: Mutex::new(Window {
                sent_at: VecDeque::new(),
                is_moderator: false,
            }),
            per_channel: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn update_mod_status(&self, channel: &str, is_mod: bool) {
        self.per_channel.lock().insert(channel.to_string(), is_mod);
    }

    fn limit_for(&self, channel: &str) -> usize {
        if *self.per_channel.lock().get(channel).unwrap_or(&false) {
            MODERATOR_LIMIT
        } else {
            NORMAL_LIMIT
        }
    }

    /// Blocks (asynchronously) until a send to `channel` is permitted, then
    /// records that the send happened.
    pub async fn wait_for_slot(&self, channel: &str) {
        loop {
            let limit = self.limit_for(channel);
            let wait = {
                let mut window = self.global.lock();
                let now = Instant::now();
                while window
                    .sent_at
                    .front()
                    .map_or(false, |t| now.duration_since(*t) > WINDOW)
                {
                    window.sent_at.pop_front();
                }
                if window.sent_at.len() < limit {
                    window.sent_at.push_back(now);
                    None
                } else {
                    Some(WINDOW - now.duration_since(*window.sent_at.front().unwrap()))
                }
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::delay_for(delay).await,
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn normal_limit_applies_without_mod_status() {
        let limiter = RateLimiter::new();
        for _ in 0..NORMAL_LIMIT {
            limiter.wait_for_slot("#alice").await;
        }
        assert_eq!(limiter.global.lock().sent_at.len(), NORMAL_LIMIT);
    }

    #[tokio::test]
    async fn moderator_status_raises_limit() {
        let limiter = RateLimiter::new();
        limiter.update_mod_status("#alice", true);
        assert_eq!(limiter.limit_for("#alice"), MODERATOR_LIMIT);
    }
}

//! The chat side of the bridge: parsing, rate limiting, per-login connection
//! state machines, and the pool that fans a handful of logins out over many
//! per-stream channels.

pub mod client;
pub mod connection;
pub mod event;
pub mod irc;
pub mod message;
pub mod pool;
pub mod rate_limit;

pub use client::{ChatClient, ChatClientKey, ChatClientState};
pub use event::{Event, PrivMsgEvent, SenderRank};
pub use pool::{ChatCallback, ChatPool, StreamBinding};
pub use rate_limit::RateLimiter;

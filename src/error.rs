//! Crate-wide error type.
//!
//! One enum covers every error kind named in the design: `AuthError` and
//! `TransportError` are handled locally by their respective components
//! (pip listener / chat client reconnect), `ProtocolError` causes a dropped
//! IPC frame rather than a closed connection, `UserError` is posted to chat,
//! `ConfigError` is fatal at startup and `Fatal` unwinds the owning task.

use std::borrow::Cow;
use std::fmt;
use std::io;

use tokio_tungstenite::tungstenite;

#[derive(Debug)]
pub enum Error {
    /// Unknown pip key, or a stream that's already connected elsewhere.
    Auth(Cow<'static, str>),
    /// Socket read/write failure on any component.
    Transport(io::Error),
    /// A websocket-level failure on the chat connection.
    Websocket(tungstenite::Error),
    /// Malformed IPC frame or unrecognized message type. The frame is
    /// dropped; the connection is not closed because of this alone.
    Protocol(Cow<'static, str>),
    /// User-facing error raised from a command handler.
    User(String),
    /// Fatal configuration problem, surfaced at startup.
    Config(String),
    /// Uncaught condition in a component's main loop.
    Fatal(Cow<'static, str>),
}

impl Error {
    pub fn protocol(msg: impl Into<Cow<'static, str>>) -> Error {
        Error::Protocol(msg.into())
    }

    pub fn auth(msg: impl Into<Cow<'static, str>>) -> Error {
        Error::Auth(msg.into())
    }

    pub fn fatal(msg: impl Into<Cow<'static, str>>) -> Error {
        Error::Fatal(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Auth(msg) => write!(f, "auth error: {}", msg),
            Error::Transport(e) => write!(f, "transport error: {}", e),
            Error::Websocket(e) => write!(f, "websocket error: {}", e),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::User(msg) => write!(f, "{}", msg),
            Error::Config(msg) => write!(f, "config error: {}", msg),
            Error::Fatal(msg) => write!(f, "fatal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            Error::Websocket(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Transport(e)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::Websocket(e)
    }
}

/// Raised by command handlers to report a user-facing problem. Caught at
/// the dispatch boundary and turned into a rate-limited chat message; never
/// propagates past `Command::invoke`.
#[derive(Debug, Clone)]
pub struct UserError(pub String);

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UserError {}

impl From<UserError> for Error {
    fn from(e: UserError) -> Self {
        Error::User(e.0)
    }
}

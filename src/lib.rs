//! A bridge between a running game's companion-app protocol and
//! live-stream chat: viewers run chat commands that act on the game
//! through the companion-app connection, and the game's state is mirrored
//! back into chat.
//!
//! The crate is split into the two processes that make it up: a `master`
//! process accepts pip-protocol connections ([`pip_listener`]) and fans
//! chat traffic out to streams ([`chat`]), and a pool of `worker`
//! processes each host many [`bot::Bot`]s, reached over the [`ipc`]
//! fabric.

#[macro_use]
extern crate log;

pub mod bot;
pub mod chat;
pub mod config;
pub mod error;
pub mod features;
pub mod ipc;
pub mod master;
pub mod pip_client;
pub mod pip_listener;
pub mod stream_registry;
pub mod worker_main;

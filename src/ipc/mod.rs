//! IPC fabric between the master process and its worker children, passing
//! pip connection file descriptors over Unix domain sockets.

pub mod master;
pub mod protocol;
pub mod worker;

pub use master::{IpcServer, MasterCallbacks};
pub use worker::{next_event, ChatSink, WorkerEvent, WorkerIpc};

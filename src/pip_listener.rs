//! Accepts incoming pip-protocol connections and authenticates them against
//! the configured streams' 32-character secrets before handing the socket
//! off to the master orchestrator.
//!
//! Nothing resembling a raw TCP handshake like this exists upstream;
//! grounded instead on the original's pip key exchange
//! (`pipirc.stream.Stream.gen_pip_key` and the connection flow implied by
//! `ipc.py`'s `open_channel`) and on the listener-accept-loop shape this
//! crate otherwise uses for its websocket connections.

use std::os::unix::io::{AsRawFd, FromRawFd};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::master::Master;

const PIP_KEY_LEN: usize = 32;

pub struct PipListener {
    listener: TcpListener,
}

/// A running `PipListener`'s accept loop. Dropping this without calling
/// `stop` leaves the loop running detached; shutdown should always call
/// `stop` and await it so no new pip connections are authenticated once
/// the rest of the master starts tearing down.
pub struct PipListenerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl PipListenerHandle {
    /// Signals the accept loop to stop taking new connections and waits
    /// for it to actually exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.join.await;
    }
}

impl PipListener {
    pub async fn bind(addr: &str) -> Result<PipListener, Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(PipListener { listener })
    }

    /// Spawns the accept loop on the runtime and returns a handle that can
    /// stop it. Connections already handed off to the master before `stop`
    /// is called are unaffected; only further `accept`s are refused.
    pub fn spawn(self, master: Arc<Master>) -> PipListenerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(master, stop_rx));
        PipListenerHandle { stop_tx, join }
    }

    async fn run(mut self, master: Arc<Master>, mut stop_rx: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    debug!("pip listener stopping, refusing new connections");
                    return;
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("pip listener accept failed: {}", e);
                            continue;
                        }
                    };
                    debug!("pip connection from {}", peer);
                    let master = master.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, &master).await {
                            warn!("pip connection from {} failed: {}", peer, e);
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(mut socket: TcpStream, master: &Master) -> Result<(), Error> {
    let mut key_buf = [0u8; PIP_KEY_LEN];
    socket.read_exact(&mut key_buf).await?;
    let candidate = String::from_utf8_lossy(&key_buf).into_owned();

    let stream = match master.get_stream_by_pip_key(&candidate) {
        Some(stream) => stream,
        None => {
            socket.write_all(b"Unknown pip key.\n").await?;
            return Ok(());
        }
    };

    if master.is_stream_open(&stream.name) {
        socket
            .write_all(
                b"You appear to already be connected.\n\
                  It's possible this is a zombie connection and will disappear soon.\n\
                  Close any other copies of this program, or just try again in a few seconds.\n",
            )
            .await?;
        return Ok(());
    }

    if !master.has_workers() {
        socket
            .write_all(b"Internal server error! We'll get this fixed soon.\n")
            .await?;
        return Ok(());
    }

    socket.write_all(b"OK\n").await?;
    // Tokio 0.2's `TcpStream` has no `into_std`; hand the raw fd to a
    // blocking `std::net::TcpStream` directly and forget the async wrapper
    // so it doesn't close the fd on drop.
    let fd = socket.as_raw_fd();
    std::mem::forget(socket);
    let std_socket = unsafe { std::net::TcpStream::from_raw_fd(fd) };
    if let Err(e) = master.open_stream(stream.name.clone(), std_socket) {
        warn!("failed to open stream {}: {}", stream.name, e);
    }
    Ok(())
}

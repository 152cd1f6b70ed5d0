//! Master-side IPC fabric: accepts worker connections over a Unix domain
//! socket and supervises the worker processes themselves.
//!
//! Grounded on `pipirc.ipc.IPCServer`/`IPCMasterConnection`. Tokio 0.2 has no
//! async story for receiving ancillary data on a Unix socket, so per the
//! allowance for an OS-thread-per-connection alternative, this whole fabric
//! runs on blocking `std::os::unix::net` sockets and `std::thread`, talking
//! to the rest of the (async) master through plain callbacks.

use std::collections::HashMap;
use std::fs;
use std::net::TcpStream as StdTcpStream;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::Error;
use crate::ipc::protocol::{FrameReader, FrameWriter, MasterToWorker, WorkerToMaster};

const WORKER_RESPAWN_INTERVAL: Duration = Duration::from_secs(1);

/// Hooks back into the async master orchestrator. Invoked from IPC worker
/// threads, so implementations must be cheap and non-blocking (typically:
/// forward onto a channel or queue real work on the tokio runtime).
pub trait MasterCallbacks: Send + Sync {
    fn sync_streams(&self);
    fn send_chat(&self, stream_name: &str, text: &str);
}

pub struct IpcServer {
    sock_path: PathBuf,
    conns: Mutex<HashMap<String, Arc<WorkerConn>>>,
    callbacks: Arc<dyn MasterCallbacks>,
    /// Set by `stop()`. A worker `init` arriving after this is set gets
    /// nothing back and its connection is closed, per the master's
    /// graceful-shutdown transition.
    stopping: AtomicBool,
    /// `worker_watchdog` threads, one per configured worker slot, joined by
    /// `stop()` so shutdown doesn't return before every worker has drained.
    worker_handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl IpcServer {
    /// Binds the IPC socket and starts the accept loop plus `worker_count`
    /// supervised worker processes, each invoked as
    /// `<this binary> worker --config <config_path> --ipc <sock_path>`.
    pub fn start(
        config_path: PathBuf,
        worker_count: usize,
        callbacks: Arc<dyn MasterCallbacks>,
    ) -> Result<Arc<IpcServer>, Error> {
        let token: u64 = rand::rngs::OsRng.gen();
        let sock_path = std::env::temp_dir().join(format!("pip-bridge-{:016x}.sock", token));
        let _ = fs::remove_file(&sock_path);
        let listener = UnixListener::bind(&sock_path)
            .map_err(|e| Error::fatal(format!("binding IPC socket {}: {}", sock_path.display(), e)))?;

        let server = Arc::new(IpcServer {
            sock_path,
            conns: Mutex::new(HashMap::new()),
            callbacks,
            stopping: AtomicBool::new(false),
            worker_handles: Mutex::new(Vec::new()),
        });

        {
            let server = server.clone();
            thread::spawn(move || server.accept_loop(listener));
        }
        {
            let mut handles = server.worker_handles.lock();
            for _ in 0..worker_count {
                let server = server.clone();
                let config_path = config_path.clone();
                handles.push(thread::spawn(move || server.worker_watchdog(config_path)));
            }
        }
        Ok(server)
    }

    pub fn sock_path(&self) -> &Path {
        &self.sock_path
    }

    fn accept_loop(self: Arc<Self>, listener: UnixListener) {
        for incoming in listener.incoming() {
            let sock = match incoming {
                Ok(sock) => sock,
                Err(e) => {
                    warn!("IPC accept failed: {}", e);
                    continue;
                }
            };
            let server = self.clone();
            thread::spawn(move || server.handle_connection(sock));
        }
    }

    fn handle_connection(self: Arc<Self>, sock: UnixStream) {
        let mut reader = FrameReader::new(sock);
        let writer = match reader.try_clone_writer() {
            Ok(w) => w,
            Err(e) => {
                warn!("failed to clone IPC connection: {}", e);
                return;
            }
        };
        let conn = Arc::new(WorkerConn {
            name: Mutex::new(None),
            channels: Mutex::new(Default::default()),
            writer,
        });

        loop {
            match reader.read_message::<WorkerToMaster>() {
                Ok(Some(WorkerToMaster::Init { name })) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        debug!("worker {} connected after shutdown began, closing", name);
                        break;
                    }
                    *conn.name.lock() = Some(name.clone());
                    self.conns.lock().insert(name, conn.clone());
                }
                Ok(Some(WorkerToMaster::ChatMessage { channel, text })) => {
                    self.callbacks.send_chat(&channel, &text);
                }
                Ok(Some(WorkerToMaster::CloseChannel { channel })) => {
                    conn.channels.lock().remove(&channel);
                    self.callbacks.sync_streams();
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("IPC worker connection error: {}", e);
                    break;
                }
            }
        }

        let orphaned: Vec<String> = conn.channels.lock().drain().collect();
        for channel in &orphaned {
            self.callbacks
                .send_chat(channel, "Something went wrong. Attempting to reconnect...");
        }
        if let Some(name) = conn.name.lock().take() {
            self.conns.lock().remove(&name);
        }
        self.callbacks.sync_streams();
    }

    fn worker_watchdog(self: Arc<Self>, config_path: PathBuf) {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                warn!("cannot determine own executable path, worker supervision disabled: {}", e);
                return;
            }
        };
        loop {
            let status = Command::new(&exe)
                .arg("worker")
                .arg("--config")
                .arg(&config_path)
                .arg("--ipc")
                .arg(&self.sock_path)
                .status();
            match status {
                Ok(status) if status.success() => return,
                Ok(status) => warn!("worker process exited with {}", status),
                Err(e) => warn!("failed to spawn worker process: {}", e),
            }
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            let jitter = rand::rngs::OsRng.gen_range(0.9, 1.1);
            thread::sleep(WORKER_RESPAWN_INTERVAL.mul_f64(jitter));
        }
    }

    /// Hands a new pip connection to whichever worker currently hosts the
    /// fewest channels.
    pub fn open_channel(&self, channel: String, pip_stream: StdTcpStream) -> Result<(), Error> {
        let chosen = {
            let conns = self.conns.lock();
            conns
                .values()
                .min_by_key(|conn| conn.channels.lock().len())
                .cloned()
        };
        match chosen {
            Some(conn) => conn.open_channel(channel, pip_stream),
            None => Err(Error::fatal("no worker processes are connected")),
        }
    }

    pub fn has_workers(&self) -> bool {
        !self.conns.lock().is_empty()
    }

    /// Every channel currently hosted by some connected worker. A stream is
    /// considered "open" exactly when it appears here.
    pub fn open_channels(&self) -> std::collections::HashSet<String> {
        self.conns
            .lock()
            .values()
            .flat_map(|conn| conn.channels.lock().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn recv_chat(&self, channel: &str, text: &str, sender: &str, sender_rank: &str) {
        let conn = {
            let conns = self.conns.lock();
            conns
                .values()
                .find(|conn| conn.channels.lock().contains(channel))
                .cloned()
        };
        if let Some(conn) = conn {
            if let Err(e) = conn.recv_chat(channel, text, sender, sender_rank) {
                warn!("failed to forward chat to worker: {}", e);
            }
        }
    }

    /// Concurrently stops every connected worker and blocks until the
    /// worker-supervision threads have joined, so the caller knows every
    /// worker process has actually drained and exited before returning.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        let conns: Vec<Arc<WorkerConn>> = self.conns.lock().values().cloned().collect();
        let stoppers: Vec<_> = conns
            .into_iter()
            .map(|conn| thread::spawn(move || conn.stop()))
            .collect();
        for stopper in stoppers {
            let _ = stopper.join();
        }

        let _ = fs::remove_file(&self.sock_path);

        let handles: Vec<_> = self.worker_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

struct WorkerConn {
    name: Mutex<Option<String>>,
    channels: Mutex<std::collections::HashSet<String>>,
    writer: FrameWriter,
}

impl WorkerConn {
    fn stop(&self) {
        let _ = self.writer.write_message(&MasterToWorker::Quit);
    }

    fn open_channel(&self, channel: String, pip_stream: StdTcpStream) -> Result<(), Error> {
        self.channels.lock().insert(channel.clone());
        self.writer
            .write_message(&MasterToWorker::OpenChannel { channel })?;
        self.writer.send_fd(&pip_stream)?;
        Ok(())
    }

    fn recv_chat(&self, channel: &str, text: &str, sender: &str, sender_rank: &str) -> Result<(), Error> {
        self.writer.write_message(&MasterToWorker::ChatMessage {
            channel: channel.to_string(),
            text: text.to_string(),
            sender: sender.to_string(),
            sender_rank: sender_rank.to_string(),
        })
    }
}

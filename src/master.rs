//! The master process's orchestrator: owns the stream registry and wires
//! the IPC fabric's worker-facing events to the chat pool's viewer-facing
//! events and back.
//!
//! Grounded on the original `MasterServer`/`IPCServer.main` relationship:
//! `sync_channels()` there is `sync_streams_now` here, `send_chat`/
//! `recv_chat` are the same two directions of travel. The original calls
//! back into `main` synchronously from gevent greenlets; here the IPC
//! fabric's OS threads instead push onto an unbounded channel that a single
//! task drains on the tokio runtime, which keeps all `ChatPool`/`IpcServer`
//! mutation on one async task without needing a lock around `Master` itself.

use std::net::TcpStream as StdTcpStream;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chat::{ChatPool, SenderRank, StreamBinding};
use crate::ipc::{IpcServer, MasterCallbacks};
use crate::stream_registry::{Stream, StreamRegistry};

enum MasterEvent {
    ChatReceived {
        stream_name: String,
        text: String,
        sender: String,
        rank: SenderRank,
    },
    WorkerChat {
        stream_name: String,
        text: String,
    },
    SyncStreams,
}

struct ForwardToMaster(mpsc::UnboundedSender<MasterEvent>);

impl MasterCallbacks for ForwardToMaster {
    fn sync_streams(&self) {
        let _ = self.0.send(MasterEvent::SyncStreams);
    }

    fn send_chat(&self, stream_name: &str, text: &str) {
        let _ = self.0.send(MasterEvent::WorkerChat {
            stream_name: stream_name.to_string(),
            text: text.to_string(),
        });
    }
}

pub struct Master {
    registry: StreamRegistry,
    ipc: Arc<IpcServer>,
    chat: Arc<ChatPool>,
}

impl Master {
    pub fn start(
        registry: StreamRegistry,
        config_path: PathBuf,
        worker_count: usize,
    ) -> Result<Arc<Master>, crate::error::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let ipc = IpcServer::start(config_path, worker_count, Arc::new(ForwardToMaster(event_tx.clone())))?;

        let chat_tx = event_tx;
        let chat = Arc::new(ChatPool::new(Arc::new(move |stream_name: &str, text: &str, sender: &str, rank: SenderRank| {
            let _ = chat_tx.send(MasterEvent::ChatReceived {
                stream_name: stream_name.to_string(),
                text: text.to_string(),
                sender: sender.to_string(),
                rank,
            });
        })));

        let master = Arc::new(Master { registry, ipc, chat });
        let event_loop_master = master.clone();
        tokio::spawn(async move { event_loop_master.run_events(event_rx).await });
        master.sync_streams_now();
        Ok(master)
    }

    async fn run_events(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<MasterEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                MasterEvent::ChatReceived {
                    stream_name,
                    text,
                    sender,
                    rank,
                } => {
                    self.ipc.recv_chat(&stream_name, &text, &sender, rank.as_str());
                }
                MasterEvent::WorkerChat { stream_name, text } => {
                    self.chat.send(&stream_name, &text);
                }
                MasterEvent::SyncStreams => {
                    self.sync_streams_now();
                }
            }
        }
    }

    fn sync_streams_now(&self) {
        let open_channels = self.ipc.open_channels();
        let bindings = open_channels
            .iter()
            .filter_map(|stream_name| {
                self.registry.get(stream_name).map(|stream| StreamBinding {
                    stream_name: stream_name.clone(),
                    key: stream.chat_key.clone(),
                    channel: stream.irc_channel(),
                })
            })
            .collect();
        self.chat.update_connections(bindings);
    }

    pub fn get_stream_by_pip_key(&self, candidate: &str) -> Option<Stream> {
        self.registry.find_by_pip_key(candidate).cloned()
    }

    pub fn is_stream_open(&self, stream_name: &str) -> bool {
        self.ipc.open_channels().contains(stream_name)
    }

    pub fn has_workers(&self) -> bool {
        self.ipc.has_workers()
    }

    /// Hands a freshly-authenticated pip connection to the least loaded
    /// worker and assigns it to `stream_name`.
    pub fn open_stream(&self, stream_name: String, pip_stream: StdTcpStream) -> Result<(), crate::error::Error> {
        self.ipc.open_channel(stream_name, pip_stream)?;
        self.sync_streams_now();
        Ok(())
    }

    /// Stops the IPC fabric (telling workers to quit) and the chat pool.
    /// Callers should stop accepting new pip connections first; this only
    /// tears down the two components `Master` itself owns.
    pub fn stop(&self) {
        self.ipc.stop();
        self.chat.stop_all();
    }
}

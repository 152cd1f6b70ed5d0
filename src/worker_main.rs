//! Worker process entry point: connects back to the master over IPC and
//! hosts one `Bot` per channel the master assigns it.
//!
//! Grounded on `pipirc.worker.main`. Runs entirely on blocking I/O, same as
//! the rest of the IPC fabric; a worker process has no need for an async
//! runtime since every `Bot`/`Feature`/`PipClient` call here is synchronous.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::bot::Bot;
use crate::chat::SenderRank;
use crate::config::ServiceConfig;
use crate::ipc::{self, ChatSink, WorkerEvent, WorkerIpc};
use crate::pip_client::SocketPipClient;

pub fn run(config: ServiceConfig, sock_path: &Path) {
    let name = format!("{}:{:016x}", std::process::id(), rand::rngs::OsRng.gen::<u64>());
    let (worker_ipc, mut reader) = match WorkerIpc::connect(sock_path, &name) {
        Ok(connected) => connected,
        Err(e) => {
            error!("failed to connect to master IPC socket: {}", e);
            return;
        }
    };
    info!("worker {} connected to master", name);
    let ipc: Arc<dyn ChatSink> = Arc::new(worker_ipc);
    let bots: Mutex<HashMap<String, Bot>> = Mutex::new(HashMap::new());

    loop {
        match ipc::next_event(&mut reader) {
            Ok(WorkerEvent::OpenChannel { channel, pip_stream }) => {
                let stream_config = match config.stream(&channel) {
                    Some(stream_config) => stream_config.clone(),
                    None => {
                        warn!("master assigned unknown stream {}, ignoring", channel);
                        continue;
                    }
                };
                let player_name = config.irc_user_for(&stream_config);
                let pip_client = Arc::new(SocketPipClient::new(pip_stream, player_name));
                let bot = Bot::start(channel.clone(), stream_config, ipc.clone(), pip_client);
                bots.lock().insert(channel, bot);
            }
            Ok(WorkerEvent::ChatMessage {
                channel,
                text,
                sender,
                sender_rank,
            }) => {
                if let Some(bot) = bots.lock().get(&channel) {
                    bot.recv_chat(&text, &sender, SenderRank::from_str(&sender_rank));
                }
            }
            Ok(WorkerEvent::Quit) => {
                info!("worker {} told to quit", name);
                break;
            }
            Ok(WorkerEvent::Closed) => {
                info!("worker {} lost connection to master", name);
                break;
            }
            Err(e) => {
                warn!("worker {} IPC error: {}", name, e);
                break;
            }
        }
    }

    for bot in bots.lock().values() {
        bot.stop();
    }
    info!("worker {} stopped cleanly", name);
}

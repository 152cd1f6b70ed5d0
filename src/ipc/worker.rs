//! Worker-side IPC connection: dials the master's Unix socket, announces
//! itself, and exposes the handful of calls a worker process needs.
//!
//! Grounded on `pipirc.ipc.IPCWorkerConnection`.

use std::net::TcpStream as StdTcpStream;
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::error::Error;
use crate::ipc::protocol::{FrameReader, FrameWriter, MasterToWorker, WorkerToMaster};

/// What a `Bot` needs from its IPC connection: saying something in its
/// stream's chat, and reporting that its stream has closed. Kept as a
/// trait so bots can be unit tested without a real Unix socket.
pub trait ChatSink: Send + Sync {
    fn send_chat(&self, stream_name: &str, text: &str) -> Result<(), Error>;
    fn close_channel(&self, stream_name: &str) -> Result<(), Error>;
}

pub struct WorkerIpc {
    writer: FrameWriter,
}

impl WorkerIpc {
    pub fn connect(sock_path: &Path, name: &str) -> Result<(WorkerIpc, FrameReader), Error> {
        let sock = UnixStream::connect(sock_path)?;
        let reader_sock = sock.try_clone()?;
        let writer = FrameWriter::new(sock);
        let reader = FrameReader::new(reader_sock);
        writer.write_message(&WorkerToMaster::Init {
            name: name.to_string(),
        })?;
        Ok((WorkerIpc { writer }, reader))
    }
}

impl ChatSink for WorkerIpc {
    fn send_chat(&self, channel: &str, text: &str) -> Result<(), Error> {
        self.writer.write_message(&WorkerToMaster::ChatMessage {
            channel: channel.to_string(),
            text: text.to_string(),
        })
    }

    fn close_channel(&self, channel: &str) -> Result<(), Error> {
        self.writer.write_message(&WorkerToMaster::CloseChannel {
            channel: channel.to_string(),
        })
    }
}

/// A frame read off the master connection, with the pip socket already
/// pulled off the wire for `OpenChannel` (the `recv_fd` call has to happen
/// immediately after reading that frame, before any other frame is read).
pub enum WorkerEvent {
    OpenChannel { channel: String, pip_stream: StdTcpStream },
    ChatMessage { channel: String, text: String, sender: String, sender_rank: String },
    Quit,
    Closed,
}

pub fn next_event(reader: &mut FrameReader) -> Result<WorkerEvent, Error> {
    match reader.read_message::<MasterToWorker>()? {
        None => Ok(WorkerEvent::Closed),
        Some(MasterToWorker::OpenChannel { channel }) => {
            let pip_stream = reader.recv_fd()?;
            Ok(WorkerEvent::OpenChannel { channel, pip_stream })
        }
        Some(MasterToWorker::ChatMessage {
            channel,
            text,
            sender,
            sender_rank,
        }) => Ok(WorkerEvent::ChatMessage {
            channel,
            text,
            sender,
            sender_rank,
        }),
        Some(MasterToWorker::Quit) => Ok(WorkerEvent::Quit),
    }
}

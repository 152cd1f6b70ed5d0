//! Wire protocol between the master process and its worker children.
//!
//! Grounded on `pipirc.ipc`'s `IPCConnection`/`IPCMasterConnection`/
//! `IPCWorkerConnection`: newline-delimited JSON frames, with a `type` tag
//! and one variant per message the original dispatches through
//! `_handle_map`. `open channel` additionally transfers the pip
//! connection's file descriptor out of band via `passfd`, exactly as the
//! original does with `gtools.send_fd`/`recv_fd`.

use std::io::{self, Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;

use passfd::FdPassingExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MasterToWorker {
    #[serde(rename = "open channel")]
    OpenChannel { channel: String },
    #[serde(rename = "chat message")]
    ChatMessage {
        channel: String,
        text: String,
        sender: String,
        sender_rank: String,
    },
    #[serde(rename = "quit")]
    Quit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerToMaster {
    #[serde(rename = "init")]
    Init { name: String },
    #[serde(rename = "chat message")]
    ChatMessage { channel: String, text: String },
    #[serde(rename = "close channel")]
    CloseChannel { channel: String },
}

fn to_protocol_error(e: serde_json::Error) -> Error {
    Error::protocol(format!("malformed IPC frame: {}", e))
}

/// Write half of an IPC connection. Kept separate from the read half so a
/// worker-selection thread can send `open channel` while the connection's
/// own read loop blocks on the next incoming frame.
pub struct FrameWriter(Mutex<UnixStream>);

impl FrameWriter {
    pub fn new(sock: UnixStream) -> FrameWriter {
        FrameWriter(Mutex::new(sock))
    }

    pub fn write_message<T: Serialize>(&self, msg: &T) -> Result<(), Error> {
        let line = serde_json::to_string(msg).map_err(to_protocol_error)?;
        let mut sock = self.0.lock();
        sock.write_all(line.as_bytes())?;
        sock.write_all(b"\n")?;
        Ok(())
    }

    /// Hands `stream`'s underlying fd to the peer via `SCM_RIGHTS`. Must be
    /// called immediately after the `write_message` call whose frame
    /// announces it (e.g. `OpenChannel`), with nothing else written to this
    /// socket in between, so the peer's matching `recv_fd` reads the
    /// ancillary data attached to the right `sendmsg`.
    pub fn send_fd(&self, stream: &StdTcpStream) -> Result<(), Error> {
        let sock = self.0.lock();
        sock.send_fd(stream.as_raw_fd())?;
        Ok(())
    }
}

/// Read half of an IPC connection. Reads one byte at a time rather than
/// through a buffered reader: a `BufReader` would happily read ahead past
/// the newline terminating an `open channel` frame, consuming the dummy
/// byte `send_fd`'s matching `recvmsg` needs to see before `recv_fd` is
/// called, and the kernel would have nowhere to deliver the ancillary data.
pub struct FrameReader {
    sock: UnixStream,
}

impl FrameReader {
    pub fn new(sock: UnixStream) -> FrameReader {
        FrameReader { sock }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.sock.read(&mut byte) {
                Ok(0) => return Ok(if line.is_empty() { None } else { Some(String::from_utf8_lossy(&line).into_owned()) }),
                Ok(_) => {
                    if byte[0] == b'\n' {
                        return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                    }
                    line.push(byte[0]);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn read_message<T: for<'de> Deserialize<'de>>(&mut self) -> Result<Option<T>, Error> {
        match self.read_line()? {
            None => Ok(None),
            Some(line) => {
                let msg = serde_json::from_str(&line).map_err(to_protocol_error)?;
                Ok(Some(msg))
            }
        }
    }

    pub fn recv_fd(&mut self) -> Result<StdTcpStream, Error> {
        let fd: RawFd = self.sock.recv_fd()?;
        Ok(unsafe { StdTcpStream::from_raw_fd(fd) })
    }

    pub fn try_clone_writer(&self) -> io::Result<FrameWriter> {
        Ok(FrameWriter::new(self.sock.try_clone()?))
    }
}

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::protocol::Reply;

use super::{ConnectionId, ServerError};

#[derive(Debug, PartialEq, Eq)]
pub enum LineRead {
    Line(String),
    /// The peer closed the stream before sending anything.
    Eof,
    TooLong,
    TimedOut,
}

/// One accepted client stream, split into independently locked halves so a
/// worker writing a reply never waits on an acceptor reading.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
}

impl Connection {
    pub(super) fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<Self, ServerError> {
        stream
            .set_nodelay(true)
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;
        let writer = stream
            .try_clone()
            .map_err(|source| ServerError::StreamClone { source })?;

        Ok(Self {
            id,
            peer_addr,
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Reads a single `\n` or `\r\n` terminated line of at most `max_bytes`
    /// bytes (terminator excluded). A final line without terminator is
    /// accepted. `timeout` bounds the whole line, not each read. Bytes after
    /// the terminator are discarded.
    pub fn read_line(&self, max_bytes: usize, timeout: Duration) -> io::Result<LineRead> {
        let stream = self.reader.lock().expect("connection reader lock poisoned");
        let mut reader: &TcpStream = &stream;
        let deadline = Instant::now() + timeout;

        let mut raw = Vec::new();
        let mut chunk = [0_u8; 512];
        let terminator = loop {
            if let Some(position) = raw.iter().position(|byte| *byte == b'\n') {
                break Some(position);
            }
            // A pending `\r` may still be the first half of the terminator.
            if raw.len() > max_bytes + 1 {
                return Ok(LineRead::TooLong);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(LineRead::TimedOut);
            }
            stream.set_read_timeout(Some(deadline - now))?;
            match reader.read(&mut chunk) {
                Ok(0) => break None,
                Ok(read) => raw.extend_from_slice(&chunk[..read]),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(LineRead::TimedOut);
                }
                Err(error) => return Err(error),
            }
        };

        match terminator {
            Some(position) => {
                raw.truncate(position);
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
            }
            None if raw.is_empty() => return Ok(LineRead::Eof),
            None => {}
        }
        if raw.len() > max_bytes {
            return Ok(LineRead::TooLong);
        }

        Ok(LineRead::Line(String::from_utf8_lossy(&raw).into_owned()))
    }

    pub fn write_reply(&self, reply: &Reply) -> io::Result<()> {
        let mut writer = self.writer.lock().expect("connection writer lock poisoned");
        writer.write_all(reply.status_line().as_bytes())?;
        if let Some(body) = reply.body() {
            writer.write_all(body)?;
        }
        writer.flush()
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.writer
            .lock()
            .expect("connection writer lock poisoned")
            .shutdown(Shutdown::Both)
    }
}

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{TlsAcceptor, server::TlsStream};

use crate::{error::SessionError, status::Status};

const READ_CHUNK: usize = 4096;

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// Left behind while a handshake owns the socket.
    Detached,
}

/// A client socket that can be upgraded to TLS mid-session.
pub(crate) struct Connection {
    stream: Stream,
    buffer: Vec<u8>,
}

impl Connection {
    pub(crate) const fn new(stream: TcpStream) -> Self {
        Self {
            stream: Stream::Plain(stream),
            buffer: Vec::new(),
        }
    }

    pub(crate) const fn is_tls(&self) -> bool {
        matches!(self.stream, Stream::Tls(_))
    }

    async fn fill(&mut self) -> Result<usize, SessionError> {
        let mut chunk = [0; READ_CHUNK];
        let read = match &mut self.stream {
            Stream::Plain(stream) => stream.read(&mut chunk).await?,
            Stream::Tls(stream) => stream.read(&mut chunk).await?,
            Stream::Detached => 0,
        };
        self.buffer.extend_from_slice(&chunk[..read]);
        Ok(read)
    }

    /// Read one line without its line ending, or `None` once the peer has
    /// closed the connection.
    pub(crate) async fn read_line(&mut self, limit: usize) -> Result<Option<Vec<u8>>, SessionError> {
        let mut searched = 0;
        loop {
            if let Some(pos) = self.buffer[searched..].iter().position(|b| *b == b'\n') {
                let end = searched + pos;
                let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }

            searched = self.buffer.len();
            if searched > limit {
                self.buffer.clear();
                return Err(SessionError::LineTooLong(limit));
            }

            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Read a message body up to the lone `.` line, undoing dot-stuffing.
    ///
    /// Returns `Ok(None)` when the body exceeded `max_size`; the rest of it
    /// is consumed and discarded so the session can carry on.
    pub(crate) async fn read_data(
        &mut self,
        max_size: usize,
        line_limit: usize,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        let mut data = Vec::new();
        let mut oversized = false;

        loop {
            let Some(line) = self.read_line(line_limit).await? else {
                return Err(SessionError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            };

            if line == b"." {
                return Ok((!oversized).then_some(data));
            }
            if oversized {
                continue;
            }

            let line = line.strip_prefix(b".").unwrap_or(&line);
            data.extend_from_slice(line);
            data.extend_from_slice(b"\r\n");
            if data.len() > max_size {
                oversized = true;
                data = Vec::new();
            }
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        match &mut self.stream {
            Stream::Plain(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
            Stream::Tls(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
            Stream::Detached => {
                return Err(SessionError::Io(std::io::ErrorKind::NotConnected.into()));
            }
        }
        Ok(())
    }

    /// Send a reply, one line per entry of `lines`.
    pub(crate) async fn send(&mut self, status: Status, lines: &[&str]) -> Result<(), SessionError> {
        let mut out = String::new();
        let last = lines.len().saturating_sub(1);
        for (index, line) in lines.iter().enumerate() {
            let separator = if index == last { ' ' } else { '-' };
            out.push_str(&format!("{status}{separator}{line}\r\n"));
        }
        if lines.is_empty() {
            out.push_str(&format!("{status}\r\n"));
        }

        self.write_all(out.as_bytes()).await
    }

    /// Perform the server side of a TLS handshake on the plain socket.
    ///
    /// Anything the client pipelined before the handshake is discarded.
    pub(crate) async fn upgrade(&mut self, acceptor: &TlsAcceptor) -> Result<(), SessionError> {
        let Stream::Plain(stream) = std::mem::replace(&mut self.stream, Stream::Detached) else {
            return Err(SessionError::Tls("connection is already encrypted".to_string()));
        };
        self.buffer.clear();

        let stream = acceptor
            .accept(stream)
            .await
            .map_err(|err| SessionError::Tls(err.to_string()))?;
        self.stream = Stream::Tls(Box::new(stream));
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        let _ = match &mut self.stream {
            Stream::Plain(stream) => stream.shutdown().await,
            Stream::Tls(stream) => stream.shutdown().await,
            Stream::Detached => Ok(()),
        };
    }
}

//! Minimal SMTP client connection with STARTTLS support.

use std::time::{Duration, Instant};

use postern_common::{incoming, outgoing, tls};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use super::Timeouts;
use crate::{error::ClientError, reply::Reply};

const BUFFER_SIZE: usize = 8192;

/// Replies longer than this are rejected instead of buffered.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum Stream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Stream {
    async fn send(&mut self, data: &[u8]) -> Result<(), ClientError> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ClientError> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }
}

/// An open session with a remote SMTP server.
pub struct SmtpConnection {
    stream: Stream,
    buffer: Vec<u8>,
    extensions: Vec<String>,
    timeouts: Timeouts,
    last_used: Instant,
}

impl std::fmt::Debug for SmtpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConnection")
            .field("tls", &self.is_tls())
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl SmtpConnection {
    /// Connect to `host:port` and read the greeting.
    ///
    /// # Errors
    /// If the connection cannot be made in time, or no greeting arrives.
    pub async fn connect(
        host: &str,
        port: u16,
        timeouts: Timeouts,
    ) -> Result<(Self, Reply), ClientError> {
        let stream = tokio::time::timeout(timeouts.connect, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ClientError::Timeout("connection"))??;

        let mut connection = Self {
            stream: Stream::Plain(stream),
            buffer: Vec::with_capacity(BUFFER_SIZE),
            extensions: Vec::new(),
            timeouts,
            last_used: Instant::now(),
        };

        let banner = connection.read_reply(timeouts.connect, "banner").await?;
        Ok((connection, banner))
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.stream, Stream::Tls(_))
    }

    /// How long this connection has been idle.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Whether the last EHLO advertised `keyword`.
    #[must_use]
    pub fn has_extension(&self, keyword: &str) -> bool {
        self.extensions.iter().any(|ext| {
            ext.split_whitespace()
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case(keyword))
        })
    }

    async fn fill_reply(&mut self) -> Result<Reply, ClientError> {
        let mut chunk = [0u8; BUFFER_SIZE];
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(reply);
            }
            if self.buffer.len() > MAX_BUFFER_SIZE {
                return Err(ClientError::ReplyTooLong(MAX_BUFFER_SIZE));
            }

            let n = self.stream.read(&mut chunk).await?;
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn read_reply(
        &mut self,
        timeout: Duration,
        waiting_for: &'static str,
    ) -> Result<Reply, ClientError> {
        let reply = tokio::time::timeout(timeout, self.fill_reply())
            .await
            .map_err(|_| ClientError::Timeout(waiting_for))??;
        incoming!("{reply}");
        self.last_used = Instant::now();

        Ok(reply)
    }

    /// Send one command line and wait for its reply.
    ///
    /// # Errors
    /// On IO failure, timeout, or an unparseable reply.
    pub async fn command(&mut self, line: &str) -> Result<Reply, ClientError> {
        outgoing!("{line}");
        self.stream.send(format!("{line}\r\n").as_bytes()).await?;
        self.read_reply(self.timeouts.command, "command reply").await
    }

    /// Greet with EHLO, falling back to HELO if the server rejects it.
    ///
    /// # Errors
    /// As for [`SmtpConnection::command`].
    pub async fn greet(&mut self, ehlo_as: &str) -> Result<Reply, ClientError> {
        let reply = self.command(&format!("EHLO {ehlo_as}")).await?;
        if reply.is_success() {
            self.extensions = reply.lines.iter().skip(1).cloned().collect();
            return Ok(reply);
        }

        self.extensions.clear();
        self.command(&format!("HELO {ehlo_as}")).await
    }

    /// Issue STARTTLS and perform the handshake, then greet again.
    ///
    /// # Errors
    /// If the server refuses STARTTLS or the handshake fails.
    pub async fn starttls(
        mut self,
        host: &str,
        connector: &TlsConnector,
        ehlo_as: &str,
    ) -> Result<Self, ClientError> {
        let reply = self.command("STARTTLS").await?;
        if !reply.is_success() {
            return Err(ClientError::Tls(format!("STARTTLS refused: {reply}")));
        }

        let Stream::Plain(stream) = self.stream else {
            return Err(ClientError::Tls("Connection is already TLS".to_string()));
        };

        let server_name = tls::server_name(host).map_err(|e| ClientError::Tls(e.to_string()))?;
        let handshake = connector.connect(server_name, stream);
        let stream = tokio::time::timeout(self.timeouts.command, handshake)
            .await
            .map_err(|_| ClientError::Timeout("TLS handshake"))?
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        let mut upgraded = Self {
            stream: Stream::Tls(Box::new(stream)),
            buffer: Vec::with_capacity(BUFFER_SIZE),
            extensions: Vec::new(),
            timeouts: self.timeouts,
            last_used: Instant::now(),
        };
        upgraded.greet(ehlo_as).await?;

        Ok(upgraded)
    }

    /// Send the message body after a 354 and wait for the final reply.
    ///
    /// Lines starting with `.` are dot-stuffed and a terminating `.` line is
    /// appended.
    ///
    /// # Errors
    /// On IO failure or timeout.
    pub async fn send_data(&mut self, data: &[u8]) -> Result<Reply, ClientError> {
        let payload = dot_stuff(data);
        outgoing!("<{} bytes of message data>", payload.len());

        tokio::time::timeout(self.timeouts.data, self.stream.send(&payload))
            .await
            .map_err(|_| ClientError::Timeout("message data to be accepted"))??;

        self.read_reply(self.timeouts.data, "data reply").await
    }

    /// Say goodbye. Errors are ignored, the connection is going away anyway.
    pub async fn quit(mut self) {
        let _ = self.command("QUIT").await;
    }
}

/// Apply SMTP transparency and append the end-of-data marker.
fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    let mut at_line_start = true;

    for &byte in data {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }

    if !out.is_empty() && !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");

    out
}

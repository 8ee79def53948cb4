//! Shared helpers for the SMTP edge tests.
#![allow(dead_code)] // Not every test uses every helper.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use postern_common::{ComponentOptions, Envelope};
use postern_edge::{Authenticator, Edge, SmtpEdge, SmtpEdgeConfig, Timeouts, Validator};
use postern_queue::{Queue, QueueError, QueueId};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time::timeout,
};

/// A queue that keeps what it is given, or refuses everything.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    envelopes: Mutex<Vec<Envelope>>,
    refuse: Option<fn() -> QueueError>,
}

impl RecordingQueue {
    pub fn refusing(refuse: fn() -> QueueError) -> Self {
        Self {
            envelopes: Mutex::default(),
            refuse: Some(refuse),
        }
    }

    pub async fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().await.clone()
    }
}

#[async_trait]
impl Queue for RecordingQueue {
    async fn enqueue(&self, envelope: Envelope) -> Result<Vec<QueueId>, QueueError> {
        if let Some(refuse) = self.refuse {
            return Err(refuse());
        }

        self.envelopes.lock().await.push(envelope);
        Ok(vec![QueueId::generate()])
    }

    fn kind(&self) -> &'static str {
        "recording"
    }
}

/// Start an edge on an ephemeral localhost port.
///
/// `extra` is appended to the section, after `type`, `hostname` and
/// `listener`.
pub async fn start_edge(
    extra: &str,
    queue: Arc<dyn Queue>,
    validator: Option<Arc<dyn Validator>>,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> SmtpEdge {
    let edge = SmtpEdge::from_options(&section(extra), queue, validator, authenticator)
        .expect("edge built");
    edge.start().await.expect("edge started");
    edge
}

/// Start a bare edge whose sessions give up after `command` and `data`.
pub async fn start_edge_with_timeouts(queue: Arc<dyn Queue>, timeouts: Timeouts) -> SmtpEdge {
    let mut config = SmtpEdgeConfig::from_options(&section("")).expect("config");
    config.timeouts = timeouts;
    let edge = SmtpEdge::new(config, queue, Vec::new(), None).expect("edge built");
    edge.start().await.expect("edge started");
    edge
}

fn section(extra: &str) -> ComponentOptions {
    let source = format!(
        "type = \"smtp\"\nhostname = \"mx.test\"\nlistener = {{ port = 0 }}\n{extra}"
    );
    ComponentOptions::new("edge 'test'", source.parse().expect("valid toml"))
}

/// A hand-driven SMTP client.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Read one (possibly multi-line) reply: its code and the text of each
    /// line.
    pub async fn reply(&mut self) -> (u16, Vec<String>) {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .expect("reply in time")
                .expect("read");
            assert!(read > 0, "connection closed before a reply");

            let line = line.trim_end_matches(['\r', '\n']);
            let code = line[..3].parse().expect("reply code");
            lines.push(line.get(4..).unwrap_or_default().to_string());
            if line.as_bytes().get(3) != Some(&b'-') {
                return (code, lines);
            }
        }
    }

    pub async fn send(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.expect("write");
    }

    pub async fn command(&mut self, line: &str) -> (u16, Vec<String>) {
        self.send(&format!("{line}\r\n")).await;
        self.reply().await
    }

    pub async fn code(&mut self, line: &str) -> u16 {
        self.command(line).await.0
    }

    /// Whether the server has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await,
            Ok(Ok(0) | Err(_))
        )
    }
}

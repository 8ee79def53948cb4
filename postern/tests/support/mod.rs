//! Shared helpers for the orchestrator tests.
#![allow(dead_code)] // Not every test uses every helper.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use postern::{Arguments, Postern, ProcessOps, process::StandardStream};
use postern_common::{Config, Envelope};
use postern_relay::{Relay, RelayError, Reply};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

pub const PID: u32 = 4242;

/// One recorded [`ProcessOps`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetGroup(u32),
    SetUser(u32),
    Redirect(StandardStream, PathBuf),
    Daemonize,
}

/// Process operations against a made-up user database.
#[derive(Debug)]
pub struct FakeOps {
    euid: u32,
    users: HashMap<String, (u32, u32)>,
    groups: HashMap<String, u32>,
    calls: Mutex<Vec<Call>>,
}

impl FakeOps {
    /// Knows user `mail` (uid 8, gid 12) and group `postern` (gid 30).
    pub fn new(euid: u32) -> Arc<Self> {
        Arc::new(Self {
            euid,
            users: HashMap::from([("mail".to_string(), (8, 12))]),
            groups: HashMap::from([("postern".to_string(), 30)]),
            calls: Mutex::default(),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls").clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls").push(call);
    }
}

impl ProcessOps for FakeOps {
    fn effective_uid(&self) -> u32 {
        self.euid
    }

    fn pid(&self) -> u32 {
        PID
    }

    fn lookup_user(&self, name: &str) -> io::Result<Option<(u32, u32)>> {
        Ok(self.users.get(name).copied())
    }

    fn lookup_group(&self, name: &str) -> io::Result<Option<u32>> {
        Ok(self.groups.get(name).copied())
    }

    fn set_group(&self, gid: u32) -> io::Result<()> {
        self.record(Call::SetGroup(gid));
        Ok(())
    }

    fn set_user(&self, uid: u32) -> io::Result<()> {
        self.record(Call::SetUser(uid));
        Ok(())
    }

    fn redirect(&self, stream: StandardStream, path: &Path) -> io::Result<()> {
        self.record(Call::Redirect(stream, path.to_path_buf()));
        Ok(())
    }

    fn daemonize(&self) -> io::Result<()> {
        self.record(Call::Daemonize);
        Ok(())
    }
}

/// An orchestrator over `source`, with fake process operations.
pub fn postern(source: &str, ops: Arc<FakeOps>) -> Postern {
    postern_with(source, Arguments::default(), ops)
}

pub fn postern_with(source: &str, arguments: Arguments, ops: Arc<FakeOps>) -> Postern {
    let config: Config = source.parse().expect("valid configuration");
    Postern::with_ops("postern", arguments, ops).with_config(config)
}

/// A relay that accepts everything and keeps it.
#[derive(Debug, Default)]
pub struct RecordingRelay {
    delivered: Mutex<Vec<Envelope>>,
}

impl RecordingRelay {
    pub fn delivered(&self) -> Vec<Envelope> {
        self.delivered.lock().expect("delivered").clone()
    }

    /// Wait until at least `count` envelopes have arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<Envelope> {
        timeout(Duration::from_secs(5), async {
            loop {
                let delivered = self.delivered();
                if delivered.len() >= count {
                    return delivered;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("delivered in time")
    }
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn attempt(&self, envelope: &Envelope, _attempt: u32) -> Result<Reply, RelayError> {
        self.delivered
            .lock()
            .expect("delivered")
            .push(envelope.clone());
        Ok(Reply::new(250, "2.0.0 Recorded"))
    }

    fn kind(&self) -> &'static str {
        "recording"
    }
}

/// Make relay type `recording` hand out `relay`.
pub fn register_recording(postern: &Postern, relay: &Arc<RecordingRelay>) {
    let relay = Arc::clone(relay);
    postern.register_relay_type("recording", move |_| {
        let relay: Arc<dyn Relay> = relay.clone();
        Ok(relay)
    });
}

async fn reply(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> u16 {
    loop {
        let mut line = String::new();
        let read = timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("reply in time")
            .expect("read");
        assert!(read > 0, "connection closed before a reply");

        if line.as_bytes().get(3) != Some(&b'-') {
            return line[..3].parse().expect("reply code");
        }
    }
}

/// Submit one message over SMTP and return the reply to the final `.`.
pub async fn send_mail(addr: SocketAddr, sender: &str, recipient: &str, body: &str) -> u16 {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    assert_eq!(reply(&mut reader).await, 220);
    for (line, expected) in [
        ("EHLO client.test".to_string(), 250),
        (format!("MAIL FROM:<{sender}>"), 250),
        (format!("RCPT TO:<{recipient}>"), 250),
        ("DATA".to_string(), 354),
    ] {
        writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write");
        assert_eq!(reply(&mut reader).await, expected, "reply to {line}");
    }

    writer
        .write_all(format!("{body}\r\n.\r\n").as_bytes())
        .await
        .expect("write");
    let code = reply(&mut reader).await;

    writer.write_all(b"QUIT\r\n").await.expect("write");
    code
}

/// Greet and give `MAIL FROM`, returning the reply code to it.
pub async fn mail_from(addr: SocketAddr, sender: &str) -> u16 {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    assert_eq!(reply(&mut reader).await, 220);
    writer
        .write_all(b"EHLO client.test\r\n")
        .await
        .expect("write");
    assert_eq!(reply(&mut reader).await, 250);

    writer
        .write_all(format!("MAIL FROM:<{sender}>\r\n").as_bytes())
        .await
        .expect("write");
    reply(&mut reader).await
}

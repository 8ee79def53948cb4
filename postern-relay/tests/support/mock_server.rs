//! Mock SMTP server recording what relays send it.
#![allow(dead_code)] // Not every test uses every knob.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{RwLock, broadcast},
    time::timeout,
};

/// A command received by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content after DATA, with dot-stuffing removed.
    MessageContent(Vec<u8>),
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Config {
    greeting: (u16, String),
    ehlo: Option<Vec<String>>,
    mail_from: (u16, String),
    rcpt_to: (u16, String),
    rcpt_overrides: HashMap<String, (u16, String)>,
    data_end: (u16, String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            greeting: (220, "Mock SMTP Server".to_string()),
            ehlo: Some(vec!["localhost".to_string(), "SIZE 10000".to_string()]),
            mail_from: (250, "OK".to_string()),
            rcpt_to: (250, "OK".to_string()),
            rcpt_overrides: HashMap::new(),
            data_end: (250, "OK: Message accepted".to_string()),
        }
    }
}

fn line(code: u16, message: &str) -> Vec<u8> {
    format!("{code} {message}\r\n").into_bytes()
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<RwLock<usize>>,
    shutdown: broadcast::Sender<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::default()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    pub async fn connections(&self) -> usize {
        *self.connections.read().await
    }

    /// Message bodies received so far.
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` messages have arrived.
    pub async fn wait_for_messages(&self, count: usize, limit: Duration) -> bool {
        timeout(limit, async {
            while self.messages().await.len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<Config>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut buffer = String::new();

        writer.write_all(&line(config.greeting.0, &config.greeting.1)).await?;

        loop {
            buffer.clear();
            let read = timeout(Duration::from_secs(10), reader.read_line(&mut buffer)).await;
            let Ok(Ok(n)) = read else { return Ok(()) };
            if n == 0 {
                return Ok(());
            }

            let command_line = buffer.trim_end().to_string();
            let (verb, argument) = command_line
                .split_once(' ')
                .map_or((command_line.as_str(), ""), |(v, a)| (v, a));
            let argument = argument.to_string();

            let (response, command) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => match &config.ehlo {
                    Some(capabilities) => {
                        let mut out = String::new();
                        for (i, capability) in capabilities.iter().enumerate() {
                            let separator = if i + 1 == capabilities.len() { ' ' } else { '-' };
                            out.push_str(&format!("250{separator}{capability}\r\n"));
                        }
                        (out.into_bytes(), SmtpCommand::Ehlo(argument))
                    }
                    None => (line(502, "Command not implemented"), SmtpCommand::Ehlo(argument)),
                },
                "HELO" => (line(250, "Hello"), SmtpCommand::Helo(argument)),
                "MAIL" => (
                    line(config.mail_from.0, &config.mail_from.1),
                    SmtpCommand::MailFrom(argument),
                ),
                "RCPT" => {
                    let address = argument
                        .trim_start_matches("TO:")
                        .trim_matches(['<', '>'])
                        .to_string();
                    let (code, message) =
                        config.rcpt_overrides.get(&address).unwrap_or(&config.rcpt_to);
                    (line(*code, message), SmtpCommand::RcptTo(argument))
                }
                "RSET" => (line(250, "OK"), SmtpCommand::Rset),
                "DATA" => (line(354, "End data with <CR><LF>.<CR><LF>"), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&line(221, "Bye")).await?;
                    return Ok(());
                }
                _ => (line(500, "Unknown command"), SmtpCommand::Other(command_line.clone())),
            };

            let is_data = command == SmtpCommand::Data;
            commands.write().await.push(command);
            writer.write_all(&response).await?;

            if is_data {
                let mut content = Vec::new();
                loop {
                    buffer.clear();
                    if reader.read_line(&mut buffer).await? == 0 {
                        return Ok(());
                    }
                    if buffer == ".\r\n" {
                        break;
                    }
                    let unstuffed = buffer.strip_prefix('.').unwrap_or(&buffer);
                    content.extend_from_slice(unstuffed.as_bytes());
                }

                commands.write().await.push(SmtpCommand::MessageContent(content));
                writer.write_all(&line(config.data_end.0, &config.data_end.1)).await?;
            }
        }
    }
}

#[derive(Default)]
pub struct MockSmtpServerBuilder {
    config: Config,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: &str) -> Self {
        self.config.greeting = (code, message.to_string());
        self
    }

    #[must_use]
    pub fn without_ehlo(mut self) -> Self {
        self.config.ehlo = None;
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.config.ehlo = Some(capabilities.iter().map(ToString::to_string).collect());
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: &str) -> Self {
        self.config.mail_from = (code, message.to_string());
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: &str) -> Self {
        self.config.rcpt_to = (code, message.to_string());
        self
    }

    /// Respond to `RCPT TO:<address>` with this reply instead of the default.
    #[must_use]
    pub fn with_rcpt_response_for(mut self, address: &str, code: u16, message: &str) -> Self {
        self.config
            .rcpt_overrides
            .insert(address.to_string(), (code, message.to_string()));
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: &str) -> Self {
        self.config.data_end = (code, message.to_string());
        self
    }

    /// Bind to an ephemeral port on localhost and start accepting.
    ///
    /// # Errors
    /// If binding fails.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(RwLock::new(0));
        let (shutdown, mut receiver) = broadcast::channel(1);

        let task_commands = Arc::clone(&commands);
        let task_connections = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = receiver.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        *task_connections.write().await += 1;

                        let config = Arc::clone(&config);
                        let commands = Arc::clone(&task_commands);
                        tokio::spawn(async move {
                            let _ = MockSmtpServer::handle_client(stream, config, commands).await;
                        });
                    }
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            connections,
            shutdown,
        })
    }
}

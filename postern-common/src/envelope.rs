use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an edge learned about the client that submitted a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub peer: Option<SocketAddr>,
    pub ehlo: Option<String>,
    /// Identity the client authenticated as, if any.
    pub auth: Option<String>,
    pub tls: bool,
}

/// A message in flight: the SMTP envelope plus the raw message bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: String,
    pub recipients: Vec<String>,
    /// Header block and body, CRLF line endings, no dot-stuffing.
    pub data: Vec<u8>,
    pub received_at: DateTime<Utc>,
    pub client: ClientInfo,
}

impl Envelope {
    #[must_use]
    pub fn new(sender: impl Into<String>, recipients: Vec<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            sender: sender.into(),
            recipients,
            data: data.into(),
            received_at: Utc::now(),
            client: ClientInfo::default(),
        }
    }

    /// Copy of this envelope with a different recipient list.
    #[must_use]
    pub fn with_recipients(&self, recipients: Vec<String>) -> Self {
        Self {
            recipients,
            ..self.clone()
        }
    }

    /// Offset just past the last header line, before the blank separator.
    fn header_end(&self) -> usize {
        if self.data.starts_with(b"\r\n") {
            return 0;
        }

        self.data
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or(self.data.len(), |pos| pos + 2)
    }

    /// Value of the first header named `name`, case-insensitively.
    ///
    /// Folded continuation lines are joined with a single space.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let headers = String::from_utf8_lossy(&self.data[..self.header_end()]);
        let mut value: Option<String> = None;

        for line in headers.split("\r\n") {
            if let Some(current) = value.as_mut() {
                if line.starts_with([' ', '\t']) {
                    current.push(' ');
                    current.push_str(line.trim());
                    continue;
                }
                break;
            }

            if let Some((key, rest)) = line.split_once(':')
                && key.eq_ignore_ascii_case(name)
            {
                value = Some(rest.trim().to_string());
            }
        }

        value
    }

    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Insert `name: value` before all existing headers.
    pub fn prepend_header(&mut self, name: &str, value: &str) {
        let mut line = format!("{name}: {value}\r\n").into_bytes();
        line.append(&mut self.data);
        self.data = line;
    }

    /// Append `name: value` after the existing headers.
    pub fn append_header(&mut self, name: &str, value: &str) {
        let at = self.header_end();
        let line = format!("{name}: {value}\r\n");
        self.data.splice(at..at, line.into_bytes());
    }

    /// Domain part of an address, lower-cased. Addresses without `@` have none.
    #[must_use]
    pub fn domain_of(address: &str) -> Option<String> {
        address
            .trim_matches(['<', '>'])
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
    }
}

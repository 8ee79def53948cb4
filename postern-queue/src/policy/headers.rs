//! Policies adding trace and identification headers.

use postern_common::{
    ComponentOptions, ConfigError, Envelope, hostname::fill_hostname_template,
};

use super::QueuePolicy;
use crate::QueueId;

/// Adds a `Date` header, stamped with the receive time, when there is none.
#[derive(Debug, Clone, Copy)]
pub struct AddDateHeader;

impl QueuePolicy for AddDateHeader {
    fn apply(&self, mut envelope: Envelope) -> Vec<Envelope> {
        if !envelope.has_header("Date") {
            let date = envelope.received_at.to_rfc2822();
            envelope.append_header("Date", &date);
        }
        vec![envelope]
    }

    fn kind(&self) -> &'static str {
        "add_date_header"
    }
}

/// Adds a `Message-Id` header when there is none.
#[derive(Debug, Clone)]
pub struct AddMessageIdHeader {
    hostname: String,
}

impl AddMessageIdHeader {
    /// # Errors
    /// If `hostname` is not a string.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            hostname: fill_hostname_template(options.str("hostname")?),
        })
    }
}

impl QueuePolicy for AddMessageIdHeader {
    fn apply(&self, mut envelope: Envelope) -> Vec<Envelope> {
        if !envelope.has_header("Message-Id") {
            let id = format!("<{}@{}>", QueueId::generate(), self.hostname);
            envelope.append_header("Message-Id", &id);
        }
        vec![envelope]
    }

    fn kind(&self) -> &'static str {
        "add_messageid_header"
    }
}

/// Prepends a `Received` trace header describing the submitting client.
#[derive(Debug, Clone)]
pub struct AddReceivedHeader {
    hostname: String,
}

impl AddReceivedHeader {
    /// # Errors
    /// If `hostname` is not a string.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            hostname: fill_hostname_template(options.str("hostname")?),
        })
    }

    fn value(&self, envelope: &Envelope) -> String {
        let client = &envelope.client;
        let mut value = String::from("from ");
        value.push_str(client.ehlo.as_deref().unwrap_or("unknown"));
        if let Some(peer) = client.peer {
            value.push_str(&format!(" ([{}])", peer.ip()));
        }

        let mut protocol = String::from("ESMTP");
        if client.tls {
            protocol.push('S');
        }
        if client.auth.is_some() {
            protocol.push('A');
        }
        value.push_str(&format!(" by {} (postern) with {protocol}", self.hostname));

        if let [recipient] = envelope.recipients.as_slice() {
            value.push_str(&format!(" for <{recipient}>"));
        }

        value.push_str(&format!("; {}", envelope.received_at.to_rfc2822()));
        value
    }
}

impl QueuePolicy for AddReceivedHeader {
    fn apply(&self, mut envelope: Envelope) -> Vec<Envelope> {
        let value = self.value(&envelope);
        envelope.prepend_header("Received", &value);
        vec![envelope]
    }

    fn kind(&self) -> &'static str {
        "add_received_header"
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use postern_common::ClientInfo;
    use pretty_assertions::assert_eq;

    use super::*;

    fn options(source: &str) -> ComponentOptions {
        ComponentOptions::new("queue 'main'.policies[0]", source.parse().expect("valid toml"))
    }

    fn envelope(data: &str) -> Envelope {
        let mut envelope = Envelope::new("s@example.com", vec!["r@example.org".to_string()], data);
        envelope.received_at = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 30, 0)
            .single()
            .expect("valid date");
        envelope
    }

    fn only(mut envelopes: Vec<Envelope>) -> Envelope {
        assert_eq!(envelopes.len(), 1);
        envelopes.remove(0)
    }

    #[test]
    fn test_date_added_once() {
        let stamped = only(AddDateHeader.apply(envelope("Subject: x\r\n\r\nbody\r\n")));
        assert_eq!(
            stamped.header("Date").as_deref(),
            Some("Fri, 1 Mar 2024 12:30:00 +0000")
        );

        let again = only(AddDateHeader.apply(stamped.clone()));
        assert_eq!(again.data, stamped.data);
    }

    #[test]
    fn test_message_id() {
        let policy =
            AddMessageIdHeader::from_options(&options("hostname = \"mx.example.com\"")).expect("policy");

        let stamped = only(policy.apply(envelope("Subject: x\r\n\r\n")));
        let id = stamped.header("message-id").expect("id");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@mx.example.com>"));

        let kept = only(policy.apply(envelope("Message-ID: <keep@me>\r\n\r\n")));
        assert_eq!(kept.header("Message-Id").as_deref(), Some("<keep@me>"));
    }

    #[test]
    fn test_received() {
        let policy =
            AddReceivedHeader::from_options(&options("hostname = \"mx.example.com\"")).expect("policy");
        let mut original = envelope("Subject: x\r\n\r\n");
        original.client = ClientInfo {
            peer: Some("192.0.2.7:40000".parse().expect("addr")),
            ehlo: Some("client.example.net".to_string()),
            auth: Some("user".to_string()),
            tls: true,
        };

        let stamped = only(policy.apply(original));
        let text = String::from_utf8(stamped.data).expect("utf8");
        assert_eq!(
            text,
            "Received: from client.example.net ([192.0.2.7]) by mx.example.com (postern) \
             with ESMTPSA for <r@example.org>; Fri, 1 Mar 2024 12:30:00 +0000\r\n\
             Subject: x\r\n\r\n"
        );
    }
}

//! Per-command checks applied by the SMTP session.
//!
//! Each configured [`Validator`] is consulted in turn; the first rejection
//! wins. The built-in [`RulesValidator`] is driven by an edge's `rules` table:
//!
//! ```toml
//! [edge.inbound.rules]
//! banner = "{fqdn} ESMTP ready"
//! dnsbl = ["zen.spamhaus.org"]
//! only_senders = ["alerts@example.com"]
//! only_recipients = ["ops@example.com"]
//! require_credentials = true
//! ```

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::{TokioResolver, name_server::TokioConnectionProvider};
use postern_common::{
    ClientInfo, ComponentOptions, ConfigError, Envelope, hostname::fill_hostname_template,
    internal,
};
use tokio::sync::OnceCell;

use crate::Status;

/// A refusal sent to the client in place of the normal reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: Status,
    pub message: String,
}

impl Rejection {
    #[must_use]
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Validator: Send + Sync + std::fmt::Debug {
    /// On connect. `Ok(Some(text))` replaces the greeting text.
    async fn banner(&self, _client: &ClientInfo) -> Result<Option<String>, Rejection> {
        Ok(None)
    }

    async fn ehlo(&self, _name: &str, _client: &ClientInfo) -> Result<(), Rejection> {
        Ok(())
    }

    async fn mail(&self, _sender: &str, _client: &ClientInfo) -> Result<(), Rejection> {
        Ok(())
    }

    async fn rcpt(&self, _recipient: &str, _client: &ClientInfo) -> Result<(), Rejection> {
        Ok(())
    }

    /// After the message is received, before it is queued.
    async fn data(&self, _envelope: &Envelope) -> Result<(), Rejection> {
        Ok(())
    }
}

/// The checks named in an edge's `rules` table.
#[derive(Debug, Default)]
pub struct RulesValidator {
    banner: Option<String>,
    dnsbl: Vec<String>,
    only_senders: Vec<String>,
    only_recipients: Vec<String>,
    require_credentials: bool,
    resolver: OnceCell<TokioResolver>,
}

impl RulesValidator {
    /// # Errors
    /// If any rule is malformed.
    pub fn from_options(rules: &ComponentOptions) -> Result<Self, ConfigError> {
        let lowercase = |list: Vec<String>| {
            list.into_iter()
                .map(|address| address.to_ascii_lowercase())
                .collect()
        };

        Ok(Self {
            banner: rules.str("banner")?.map(|banner| fill_hostname_template(Some(banner))),
            dnsbl: rules.strings("dnsbl")?,
            only_senders: lowercase(rules.strings("only_senders")?),
            only_recipients: lowercase(rules.strings("only_recipients")?),
            require_credentials: rules.bool_or("require_credentials", false)?,
            resolver: OnceCell::new(),
        })
    }

    /// Whether the credentials rule means AUTH must be offered.
    #[must_use]
    pub const fn requires_credentials(&self) -> bool {
        self.require_credentials
    }

    async fn resolver(&self) -> Option<&TokioResolver> {
        self.resolver
            .get_or_try_init(|| async {
                TokioResolver::builder(TokioConnectionProvider::default())
                    .map(|builder| builder.build())
            })
            .await
            .inspect_err(|err| internal!(level = WARN, "Unable to create DNS resolver: {err}"))
            .ok()
    }

    /// The first blocklist zone listing `ip`, if any.
    async fn listed_in(&self, ip: IpAddr) -> Option<&str> {
        let resolver = self.resolver().await?;

        for zone in &self.dnsbl {
            let query = dnsbl_query(ip, zone);
            if let Ok(lookup) = resolver.lookup_ip(query.as_str()).await
                && lookup.iter().next().is_some()
            {
                return Some(zone);
            }
        }

        None
    }
}

/// The name to look up to check `ip` against blocklist `zone`.
///
/// IPv4 octets and IPv6 nibbles are reversed, as for reverse DNS.
fn dnsbl_query(ip: IpAddr, zone: &str) -> String {
    let zone = zone.trim_end_matches('.');

    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.{zone}.")
        }
        IpAddr::V6(v6) => {
            let nibbles: Vec<String> = v6
                .octets()
                .iter()
                .rev()
                .flat_map(|byte| [byte & 0x0f, byte >> 4])
                .map(|nibble| format!("{nibble:x}"))
                .collect();
            format!("{}.{zone}.", nibbles.join("."))
        }
    }
}

#[async_trait]
impl Validator for RulesValidator {
    async fn banner(&self, client: &ClientInfo) -> Result<Option<String>, Rejection> {
        if !self.dnsbl.is_empty()
            && let Some(peer) = client.peer
            && let Some(zone) = self.listed_in(peer.ip()).await
        {
            internal!(level = INFO, "Rejecting {} listed in {zone}", peer.ip());
            return Err(Rejection::new(Status::Error, "5.7.1 Access denied"));
        }

        Ok(self.banner.clone())
    }

    async fn mail(&self, sender: &str, client: &ClientInfo) -> Result<(), Rejection> {
        if self.require_credentials && client.auth.is_none() {
            return Err(Rejection::new(
                Status::AuthRequired,
                "5.7.0 Authentication required",
            ));
        }

        if !self.only_senders.is_empty()
            && !self.only_senders.contains(&sender.to_ascii_lowercase())
        {
            return Err(Rejection::new(
                Status::Error,
                format!("5.7.1 Sender <{sender}> not allowed"),
            ));
        }

        Ok(())
    }

    async fn rcpt(&self, recipient: &str, _client: &ClientInfo) -> Result<(), Rejection> {
        if !self.only_recipients.is_empty()
            && !self
                .only_recipients
                .contains(&recipient.to_ascii_lowercase())
        {
            return Err(Rejection::new(
                Status::Error,
                format!("5.7.1 Recipient <{recipient}> not allowed"),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn rules(source: &str) -> RulesValidator {
        RulesValidator::from_options(&ComponentOptions::new(
            "edge 'inbound'.rules",
            source.parse().expect("valid toml"),
        ))
        .expect("rules")
    }

    fn client(auth: Option<&str>) -> ClientInfo {
        ClientInfo {
            peer: Some("192.0.2.1:1234".parse().expect("addr")),
            auth: auth.map(ToString::to_string),
            ..ClientInfo::default()
        }
    }

    #[test]
    fn test_dnsbl_query() {
        assert_eq!(
            dnsbl_query("192.0.2.99".parse().expect("ip"), "zen.spamhaus.org"),
            "99.2.0.192.zen.spamhaus.org."
        );

        let v6 = dnsbl_query("2001:db8::1".parse().expect("ip"), "bl.example.");
        assert!(v6.starts_with("1.0.0.0.0.0.0.0"));
        assert!(v6.ends_with("8.b.d.0.1.0.0.2.bl.example."));
    }

    #[tokio::test]
    async fn test_banner_override() {
        let validator = rules("banner = \"welcome to mx.example.com\"");
        assert_eq!(
            validator.banner(&client(None)).await,
            Ok(Some("welcome to mx.example.com".to_string()))
        );

        assert_eq!(rules("").banner(&client(None)).await, Ok(None));
    }

    #[tokio::test]
    async fn test_only_senders_and_recipients() {
        let validator = rules(
            r#"
            only_senders = ["Alerts@example.com"]
            only_recipients = "ops@example.com"
            "#,
        );

        assert!(validator.mail("alerts@EXAMPLE.com", &client(None)).await.is_ok());
        let refused = validator
            .mail("spam@example.net", &client(None))
            .await
            .expect_err("not allowed");
        assert_eq!(refused.status, Status::Error);

        assert!(validator.rcpt("ops@example.com", &client(None)).await.is_ok());
        assert!(validator.rcpt("ceo@example.com", &client(None)).await.is_err());
    }

    #[tokio::test]
    async fn test_require_credentials() {
        let validator = rules("require_credentials = true");
        assert!(validator.requires_credentials());

        let refused = validator
            .mail("a@example.com", &client(None))
            .await
            .expect_err("unauthenticated");
        assert_eq!(refused.status, Status::AuthRequired);

        assert!(validator.mail("a@example.com", &client(Some("user"))).await.is_ok());
    }
}

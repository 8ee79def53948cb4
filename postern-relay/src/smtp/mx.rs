use async_trait::async_trait;
use hickory_resolver::{ResolveError, TokioResolver, name_server::TokioConnectionProvider};
use postern_common::{ComponentOptions, ConfigError, Envelope, internal};
use tokio::sync::OnceCell;

use super::{SmtpRelayConfig, SmtpTransport, defaults};
use crate::{Relay, error::RelayError, merge_outcomes, reply::Reply};

/// A host that accepts mail for a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailServer {
    pub host: String,
    /// MX preference, lower first. Zero for the A/AAAA fallback.
    pub preference: u16,
}

/// Delivers directly to each recipient domain's mail exchangers.
#[derive(Debug)]
pub struct MxSmtpRelay {
    resolver: OnceCell<TokioResolver>,
    transport: SmtpTransport,
}

impl MxSmtpRelay {
    /// # Errors
    /// If any option is malformed.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            resolver: OnceCell::new(),
            transport: SmtpTransport::new(SmtpRelayConfig::from_options(options)?),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SmtpRelayConfig {
        self.transport.config()
    }

    async fn resolver(&self) -> Result<&TokioResolver, RelayError> {
        self.resolver
            .get_or_try_init(|| async {
                TokioResolver::builder(TokioConnectionProvider::default())
                    .map(|builder| builder.build())
                    .map_err(|err| {
                        RelayError::transient(format!("Unable to create DNS resolver: {err}"))
                    })
            })
            .await
    }

    /// MX hosts for `domain` ordered by preference, or its own address when it
    /// has no MX records.
    async fn mail_servers(&self, domain: &str) -> Result<Vec<MailServer>, RelayError> {
        let resolver = self.resolver().await?;

        match resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let mut servers: Vec<_> = lookup
                    .iter()
                    .map(|mx| MailServer {
                        host: mx.exchange().to_utf8().trim_end_matches('.').to_string(),
                        preference: mx.preference(),
                    })
                    .collect();

                if servers.is_empty() {
                    return self.fallback(resolver, domain).await;
                }

                servers.sort_by_key(|server| server.preference);
                Ok(servers)
            }
            Err(err) if err.is_no_records_found() => self.fallback(resolver, domain).await,
            Err(err) => Err(lookup_error(domain, &err)),
        }
    }

    async fn fallback(
        &self,
        resolver: &TokioResolver,
        domain: &str,
    ) -> Result<Vec<MailServer>, RelayError> {
        internal!(level = DEBUG, "No MX records for {domain}, falling back to A/AAAA");

        let lookup = resolver
            .lookup_ip(domain)
            .await
            .map_err(|err| lookup_error(domain, &err))?;

        let servers: Vec<_> = lookup
            .iter()
            .map(|ip| MailServer {
                host: ip.to_string(),
                preference: 0,
            })
            .collect();

        if servers.is_empty() {
            return Err(RelayError::permanent(format!(
                "No mail servers found for domain: {domain}"
            )));
        }

        Ok(servers)
    }

    /// Try each mail server in turn until one gives a definite answer.
    async fn deliver_to_domain(
        &self,
        domain: &str,
        envelope: &Envelope,
        recipients: &[String],
    ) -> Result<Reply, RelayError> {
        let servers = self.mail_servers(domain).await?;
        let mut last_error = None;

        for server in &servers {
            match self
                .transport
                .deliver(&server.host, defaults::PORT, envelope, recipients)
                .await
            {
                Err(err) if err.is_transient() && err.failure().reply.is_none() => {
                    internal!(
                        level = DEBUG,
                        "Delivery to {} for {domain} failed: {err}",
                        server.host
                    );
                    last_error = Some(err);
                }
                outcome => return outcome,
            }
        }

        Err(last_error
            .unwrap_or_else(|| RelayError::transient(format!("No reachable mail server for {domain}"))))
    }
}

fn lookup_error(domain: &str, err: &ResolveError) -> RelayError {
    if err.is_no_records_found() || err.is_nx_domain() {
        RelayError::permanent(format!("No mail servers found for domain: {domain}"))
    } else {
        RelayError::transient(format!("DNS lookup for {domain} failed: {err}"))
    }
}

/// Group recipients by domain, keeping first-seen order.
///
/// Recipients without a domain are returned separately.
pub(crate) fn group_by_domain(recipients: &[String]) -> (Vec<(String, Vec<String>)>, Vec<String>) {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    let mut invalid = Vec::new();

    for recipient in recipients {
        let Some(domain) = Envelope::domain_of(recipient) else {
            invalid.push(recipient.clone());
            continue;
        };

        match groups.iter_mut().find(|(d, _)| *d == domain) {
            Some((_, members)) => members.push(recipient.clone()),
            None => groups.push((domain, vec![recipient.clone()])),
        }
    }

    (groups, invalid)
}

#[async_trait]
impl Relay for MxSmtpRelay {
    async fn attempt(&self, envelope: &Envelope, attempt: u32) -> Result<Reply, RelayError> {
        let (groups, invalid) = group_by_domain(&envelope.recipients);
        let mut outcomes = Vec::with_capacity(groups.len() + 1);

        if !invalid.is_empty() {
            outcomes.push((
                invalid,
                Err(RelayError::permanent("Recipient address has no domain")),
            ));
        }

        for (domain, recipients) in groups {
            internal!(
                level = DEBUG,
                "Delivering to {} recipient(s) at {domain} (attempt {attempt})",
                recipients.len()
            );
            let outcome = self.deliver_to_domain(&domain, envelope, &recipients).await;
            outcomes.push((recipients, outcome));
        }

        merge_outcomes(outcomes)
    }

    fn kind(&self) -> &'static str {
        "mx"
    }

    async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_group_by_domain() {
        let recipients = vec![
            "a@one.example".to_string(),
            "b@TWO.example".to_string(),
            "postmaster".to_string(),
            "c@one.example".to_string(),
        ];

        let (groups, invalid) = group_by_domain(&recipients);
        assert_eq!(
            groups,
            vec![
                (
                    "one.example".to_string(),
                    vec!["a@one.example".to_string(), "c@one.example".to_string()]
                ),
                ("two.example".to_string(), vec!["b@TWO.example".to_string()]),
            ]
        );
        assert_eq!(invalid, vec!["postmaster".to_string()]);
    }

    #[test]
    fn test_from_options() {
        let options = ComponentOptions::new(
            "relay 'direct'",
            "type = \"mx\"\nconcurrent_connections = 2"
                .parse()
                .expect("valid toml"),
        );
        let relay = MxSmtpRelay::from_options(&options).expect("relay");

        assert_eq!(relay.kind(), "mx");
        assert_eq!(relay.config().concurrent_connections, 2);
        assert!(relay.resolver.get().is_none());
    }

    #[tokio::test]
    async fn test_recipient_without_domain_is_permanent() {
        let options = ComponentOptions::new("relay 'direct'", "".parse().expect("valid toml"));
        let relay = MxSmtpRelay::from_options(&options).expect("relay");
        let envelope = Envelope::new("a@b.example", vec!["postmaster".to_string()], "x\r\n");

        let err = relay.attempt(&envelope, 1).await.expect_err("no domain");
        assert!(!err.is_transient());
        assert_eq!(err.recipients(), ["postmaster".to_string()]);
    }
}

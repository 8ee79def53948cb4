use std::collections::HashMap;

use postern_common::{ComponentOptions, ConfigError, Envelope, internal};

use super::QueuePolicy;

/// Rewrites recipients through a `mapping` table.
///
/// Keys are either an exact address or `@domain`. Exact matches win. A
/// value starting with `@` replaces only the domain; any other value
/// replaces the whole address.
///
/// ```toml
/// { type = "forward", mapping = { "root@example.com" = "ops@example.com", "@old.example" = "@new.example" } }
/// ```
#[derive(Debug, Clone)]
pub struct Forward {
    addresses: HashMap<String, String>,
    domains: HashMap<String, String>,
}

impl Forward {
    /// # Errors
    /// If `mapping` is missing or has a non-string value.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        let mapping = options.table("mapping")?.ok_or_else(|| ConfigError::MissingField {
            scope: options.scope().to_string(),
            field: "mapping".to_string(),
        })?;

        let mut addresses = HashMap::new();
        let mut domains = HashMap::new();

        for (key, _) in mapping.iter() {
            let target = mapping.require_str(key)?.to_string();
            match key.strip_prefix('@') {
                Some(domain) => domains.insert(domain.to_ascii_lowercase(), target),
                None => addresses.insert(key.to_ascii_lowercase(), target),
            };
        }

        Ok(Self { addresses, domains })
    }

    fn rewrite(&self, recipient: &str) -> String {
        if let Some(target) = self.addresses.get(&recipient.to_ascii_lowercase()) {
            return target.clone();
        }

        let Some((local, domain)) = recipient.rsplit_once('@') else {
            return recipient.to_string();
        };

        match self.domains.get(&domain.to_ascii_lowercase()) {
            Some(target) if target.starts_with('@') => format!("{local}{target}"),
            Some(target) => target.clone(),
            None => recipient.to_string(),
        }
    }
}

impl QueuePolicy for Forward {
    fn apply(&self, mut envelope: Envelope) -> Vec<Envelope> {
        let mut rewritten: Vec<String> = Vec::with_capacity(envelope.recipients.len());

        for recipient in &envelope.recipients {
            let target = self.rewrite(recipient);
            if target != *recipient {
                internal!(level = DEBUG, "Forwarding {recipient} to {target}");
            }
            if !rewritten.contains(&target) {
                rewritten.push(target);
            }
        }

        envelope.recipients = rewritten;
        vec![envelope]
    }

    fn kind(&self) -> &'static str {
        "forward"
    }
}

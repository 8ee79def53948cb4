//! Policies splitting one envelope into several.

use postern_common::Envelope;

use super::QueuePolicy;

/// One envelope per recipient, so each is retried independently.
#[derive(Debug, Clone, Copy)]
pub struct RecipientSplit;

impl QueuePolicy for RecipientSplit {
    fn apply(&self, envelope: Envelope) -> Vec<Envelope> {
        if envelope.recipients.len() <= 1 {
            return vec![envelope];
        }

        envelope
            .recipients
            .iter()
            .map(|recipient| envelope.with_recipients(vec![recipient.clone()]))
            .collect()
    }

    fn kind(&self) -> &'static str {
        "recipient_split"
    }
}

/// One envelope per recipient domain, in first-seen order.
///
/// Recipients without a domain share one envelope.
#[derive(Debug, Clone, Copy)]
pub struct RecipientDomainSplit;

impl QueuePolicy for RecipientDomainSplit {
    fn apply(&self, envelope: Envelope) -> Vec<Envelope> {
        let mut groups: Vec<(Option<String>, Vec<String>)> = Vec::new();

        for recipient in &envelope.recipients {
            let domain = Envelope::domain_of(recipient);
            match groups.iter_mut().find(|(d, _)| *d == domain) {
                Some((_, members)) => members.push(recipient.clone()),
                None => groups.push((domain, vec![recipient.clone()])),
            }
        }

        if groups.len() <= 1 {
            return vec![envelope];
        }

        groups
            .into_iter()
            .map(|(_, recipients)| envelope.with_recipients(recipients))
            .collect()
    }

    fn kind(&self) -> &'static str {
        "recipient_domain_split"
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn envelope(recipients: &[&str]) -> Envelope {
        Envelope::new(
            "s@example.com",
            recipients.iter().map(ToString::to_string).collect(),
            "Subject: x\r\n\r\nbody\r\n",
        )
    }

    fn recipients(envelopes: &[Envelope]) -> Vec<Vec<&str>> {
        envelopes
            .iter()
            .map(|e| e.recipients.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn test_recipient_split() {
        let split = RecipientSplit.apply(envelope(&["a@one", "b@one", "c@two"]));

        assert_eq!(recipients(&split), vec![vec!["a@one"], vec!["b@one"], vec!["c@two"]]);
        assert!(split.iter().all(|e| e.data == b"Subject: x\r\n\r\nbody\r\n"));
    }

    #[test]
    fn test_domain_split() {
        let split = RecipientDomainSplit.apply(envelope(&["a@one", "b@TWO", "c@one", "local"]));

        assert_eq!(
            recipients(&split),
            vec![vec!["a@one", "c@one"], vec!["b@TWO"], vec!["local"]]
        );
    }

    #[test]
    fn test_single_group_untouched() {
        let original = envelope(&["a@one", "b@one"]);
        assert_eq!(RecipientDomainSplit.apply(original.clone()), vec![original]);
    }
}

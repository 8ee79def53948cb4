//! Outbound delivery for the Postern MTA.
//!
//! A [`Relay`] takes an accepted [`Envelope`] and attempts to hand it to the
//! next hop. Relays are built from a `[relay.<name>]` section; the
//! orchestrator picks the concrete type from the section's `type` tag.

pub mod error;
pub mod maildrop;
pub mod reply;
pub mod smtp;

use async_trait::async_trait;
use postern_common::Envelope;

pub use self::{
    error::{ClientError, Failure, RelayError},
    maildrop::MaildropRelay,
    reply::Reply,
    smtp::{MxSmtpRelay, SmtpRelayConfig, StaticSmtpRelay},
};

#[async_trait]
pub trait Relay: Send + Sync + std::fmt::Debug {
    /// Attempt delivery of `envelope`. `attempt` counts from 1.
    ///
    /// On partial failure the error names only the recipients that failed.
    async fn attempt(&self, envelope: &Envelope, attempt: u32) -> Result<Reply, RelayError>;

    /// The configuration `type` this relay was built from.
    fn kind(&self) -> &'static str;

    /// Release pooled resources.
    async fn shutdown(&self) {}
}

/// Merge per-destination outcomes into one verdict.
///
/// Transient failures win over permanent ones so the queue retries what can
/// be retried; permanent failures for other recipients are dropped from the
/// verdict since they will never succeed.
pub(crate) fn merge_outcomes(
    outcomes: Vec<(Vec<String>, Result<Reply, RelayError>)>,
) -> Result<Reply, RelayError> {
    let mut last_reply = None;
    let mut transient: Option<RelayError> = None;
    let mut permanent: Option<RelayError> = None;

    for (recipients, outcome) in outcomes {
        match outcome {
            Ok(reply) => last_reply = Some(reply),
            Err(err) => {
                let failed = if err.recipients().is_empty() {
                    recipients
                } else {
                    err.recipients().to_vec()
                };
                let slot = if err.is_transient() {
                    &mut transient
                } else {
                    &mut permanent
                };

                *slot = Some(match slot.take() {
                    None => err.for_recipients(failed),
                    Some(previous) => {
                        let mut all = previous.recipients().to_vec();
                        all.extend(failed);
                        previous.for_recipients(all)
                    }
                });
            }
        }
    }

    match (transient, permanent, last_reply) {
        (Some(err), _, _) | (None, Some(err), _) => Err(err),
        (None, None, Some(reply)) => Ok(reply),
        (None, None, None) => Err(RelayError::permanent("No recipients")),
    }
}

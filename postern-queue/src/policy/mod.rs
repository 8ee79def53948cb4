//! Transformations applied to envelopes on their way into a queue.
//!
//! Policies come from a queue section's `policies` array, in order:
//!
//! ```toml
//! [queue.main]
//! type = "disk"
//! relay = "outbound"
//! policies = [
//!     { type = "add_date_header" },
//!     { type = "forward", mapping = { "postmaster@example.com" = "ops@example.com" } },
//!     { type = "recipient_domain_split" },
//! ]
//! ```

mod forward;
mod headers;
mod split;

use std::sync::Arc;

use async_trait::async_trait;
use postern_common::{ComponentOptions, ConfigError, Envelope};

pub use self::{
    forward::Forward,
    headers::{AddDateHeader, AddMessageIdHeader, AddReceivedHeader},
    split::{RecipientDomainSplit, RecipientSplit},
};
use crate::{Queue, QueueError, QueueId};

pub trait QueuePolicy: Send + Sync + std::fmt::Debug {
    /// Transform `envelope`. Splitting policies return several.
    fn apply(&self, envelope: Envelope) -> Vec<Envelope>;

    /// The configuration `type` this policy was built from.
    fn kind(&self) -> &'static str;
}

/// A queue with policies applied to everything it accepts.
///
/// Delivery and retries are the wrapped queue's business.
#[derive(Debug)]
pub struct PolicyQueue {
    inner: Arc<dyn Queue>,
    policies: Vec<Box<dyn QueuePolicy>>,
}

impl PolicyQueue {
    #[must_use]
    pub fn new(inner: Arc<dyn Queue>, policies: Vec<Box<dyn QueuePolicy>>) -> Self {
        Self { inner, policies }
    }

    /// Policy types in the order they are applied.
    #[must_use]
    pub fn policies(&self) -> Vec<&'static str> {
        self.policies.iter().map(|policy| policy.kind()).collect()
    }
}

#[async_trait]
impl Queue for PolicyQueue {
    async fn enqueue(&self, envelope: Envelope) -> Result<Vec<QueueId>, QueueError> {
        let envelopes = self
            .policies
            .iter()
            .fold(vec![envelope], |envelopes, policy| {
                envelopes
                    .into_iter()
                    .flat_map(|envelope| policy.apply(envelope))
                    .collect()
            });

        let mut ids = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            ids.extend(self.inner.enqueue(envelope).await?);
        }

        Ok(ids)
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    async fn start(&self) -> Result<(), QueueError> {
        self.inner.start().await
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }
}

/// Build one policy from its table.
///
/// # Errors
/// If the `type` is not a known policy, or its options are malformed.
pub fn build_policy(options: &ComponentOptions) -> Result<Box<dyn QueuePolicy>, ConfigError> {
    Ok(match options.ty()? {
        "add_date_header" => Box::new(AddDateHeader),
        "add_messageid_header" => Box::new(AddMessageIdHeader::from_options(options)?),
        "add_received_header" => Box::new(AddReceivedHeader::from_options(options)?),
        "recipient_split" => Box::new(RecipientSplit),
        "recipient_domain_split" => Box::new(RecipientDomainSplit),
        "forward" => Box::new(Forward::from_options(options)?),
        other => {
            return Err(ConfigError::UnknownType {
                kind: "policy",
                ty: other.to_string(),
            });
        }
    })
}

/// Wrap `queue` in the policies described by `policies`.
///
/// With no policies the queue is returned as is.
///
/// # Errors
/// If any policy cannot be built.
pub fn add_queue_policies(
    queue: Arc<dyn Queue>,
    policies: &[ComponentOptions],
) -> Result<Arc<dyn Queue>, ConfigError> {
    if policies.is_empty() {
        return Ok(queue);
    }

    let built = policies
        .iter()
        .map(build_policy)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Arc::new(PolicyQueue::new(queue, built)))
}

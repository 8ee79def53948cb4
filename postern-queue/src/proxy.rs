use std::sync::Arc;

use async_trait::async_trait;
use postern_common::{Envelope, internal};
use postern_relay::Relay;

use crate::{Queue, QueueError, QueueId};

/// Relays each message while the client waits, storing nothing.
///
/// The relay's verdict becomes the queue's verdict, so a refused message is
/// refused to the submitting client and retrying is the next hop's problem.
#[derive(Debug)]
pub struct ProxyQueue {
    relay: Arc<dyn Relay>,
}

impl ProxyQueue {
    #[must_use]
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl Queue for ProxyQueue {
    async fn enqueue(&self, envelope: Envelope) -> Result<Vec<QueueId>, QueueError> {
        let id = QueueId::generate();

        match self.relay.attempt(&envelope, 1).await {
            Ok(reply) => {
                internal!(level = INFO, "Relayed {id} through {}: {reply}", self.relay.kind());
                Ok(vec![id])
            }
            Err(err) => {
                internal!(level = INFO, "Relay refused {id}: {err}");
                Err(err.into())
            }
        }
    }

    fn kind(&self) -> &'static str {
        "proxy"
    }
}

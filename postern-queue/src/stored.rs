//! Queues that keep entries in a [`Storage`] and retry on their own schedule.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postern_common::{Envelope, internal};
use postern_relay::{Relay, RelayError};
use tokio::sync::watch;

use crate::{Backoff, Queue, QueueEntry, QueueError, QueueId, Storage};

/// A `memory` or `disk` queue.
///
/// Each entry gets its own delivery task which sleeps until the entry is due,
/// hands it to the relay and acts on the verdict:
///
/// - delivered: the entry is removed
/// - permanent failure: the entry is removed and the failure logged
/// - transient failure: the entry is rescheduled after the [`Backoff`] delay,
///   narrowed to the recipients that failed, or removed once the backoff
///   gives up
#[derive(Debug)]
pub struct StoredQueue {
    kind: &'static str,
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn Storage>,
    relay: Arc<dyn Relay>,
    backoff: Backoff,
    started: AtomicBool,
    scheduled: Mutex<HashSet<QueueId>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("storage", &self.storage)
            .field("relay", &self.relay.kind())
            .field("backoff", &self.backoff)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl StoredQueue {
    #[must_use]
    pub fn new(
        kind: &'static str,
        storage: Arc<dyn Storage>,
        relay: Arc<dyn Relay>,
        backoff: Backoff,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            kind,
            inner: Arc::new(Inner {
                storage,
                relay,
                backoff,
                started: AtomicBool::new(false),
                scheduled: Mutex::new(HashSet::new()),
                shutdown,
            }),
        }
    }

    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.inner.backoff
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    /// Entries with a live delivery task.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Inner {
    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Spawn a delivery task for `entry` unless one already exists.
    fn schedule(self: &Arc<Self>, entry: QueueEntry) {
        let fresh = self
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.id);

        if fresh {
            tokio::spawn(Arc::clone(self).deliver(entry));
        }
    }

    async fn deliver(self: Arc<Self>, mut entry: QueueEntry) {
        let id = entry.id;
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let wait = (entry.next_attempt - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = stopped(&mut shutdown) => break,
            }

            entry.attempts += 1;
            let outcome = self.relay.attempt(&entry.envelope, entry.attempts).await;
            if !self.handle_outcome(&mut entry, outcome).await {
                break;
            }
        }

        self.scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Act on a delivery verdict. Returns `true` if the entry was rescheduled.
    async fn handle_outcome(
        &self,
        entry: &mut QueueEntry,
        outcome: Result<postern_relay::Reply, RelayError>,
    ) -> bool {
        let id = entry.id;

        match outcome {
            Ok(reply) => {
                internal!(level = INFO, "Delivered {id}: {reply}");
            }
            Err(err) if !err.is_transient() => {
                internal!(
                    level = WARN,
                    "Permanent failure delivering {id} from {} to {}: {err}",
                    entry.envelope.sender,
                    failed_recipients(entry, &err).join(", ")
                );
            }
            Err(err) => match self.backoff.delay(entry.attempts) {
                Some(delay) => {
                    let recipients = failed_recipients(entry, &err);
                    internal!(
                        level = INFO,
                        "Transient failure delivering {id} (attempt {}), retrying {} recipient(s) in {}s: {err}",
                        entry.attempts,
                        recipients.len(),
                        delay.as_secs_f64()
                    );

                    entry.envelope.recipients = recipients;
                    entry.next_attempt = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|delay| Utc::now().checked_add_signed(delay))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);

                    match self.storage.write(entry).await {
                        Ok(()) => return true,
                        Err(storage) => {
                            internal!(level = ERROR, "Unable to reschedule {id}: {storage}");
                            return false;
                        }
                    }
                }
                None => {
                    internal!(
                        level = WARN,
                        "Giving up on {id} after {} attempt(s): {err}",
                        entry.attempts
                    );
                }
            },
        }

        if let Err(err) = self.storage.remove(&id).await {
            internal!(level = ERROR, "Unable to remove {id} from queue: {err}");
        }
        false
    }
}

/// The recipients a failure applies to, in envelope order.
fn failed_recipients(entry: &QueueEntry, err: &RelayError) -> Vec<String> {
    let failed = err.recipients();
    if failed.is_empty() {
        return entry.envelope.recipients.clone();
    }

    entry
        .envelope
        .recipients
        .iter()
        .filter(|recipient| failed.contains(recipient))
        .cloned()
        .collect()
}

/// Resolve once `shutdown` reads `true` or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *shutdown.borrow_and_update();
        if stopped || shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl Queue for StoredQueue {
    async fn enqueue(&self, envelope: Envelope) -> Result<Vec<QueueId>, QueueError> {
        if self.inner.is_stopped() {
            return Err(QueueError::ShuttingDown);
        }

        let entry = QueueEntry::new(envelope);
        let id = entry.id;
        self.inner.storage.write(&entry).await?;

        internal!(
            level = DEBUG,
            "Queued {id} from {} for {} recipient(s)",
            entry.envelope.sender,
            entry.envelope.recipients.len()
        );

        if self.inner.started.load(Ordering::Acquire) {
            self.inner.schedule(entry);
        }

        Ok(vec![id])
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn start(&self) -> Result<(), QueueError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let entries = self.inner.storage.load().await?;
        if !entries.is_empty() {
            internal!(
                level = INFO,
                "Rescheduling {} stored entries for {} queue",
                entries.len(),
                self.kind
            );
        }

        for entry in entries {
            self.inner.schedule(entry);
        }

        Ok(())
    }

    async fn stop(&self) {
        self.inner.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use postern_relay::Reply;

    use super::*;
    use crate::{MemoryStorage, backoff::Strategy};

    /// Replays scripted verdicts, then succeeds.
    #[derive(Debug)]
    struct ScriptedRelay {
        verdicts: Mutex<Vec<Result<Reply, RelayError>>>,
        attempts: AtomicU32,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRelay {
        fn new(mut verdicts: Vec<Result<Reply, RelayError>>) -> Arc<Self> {
            verdicts.reverse();
            Arc::new(Self {
                verdicts: Mutex::new(verdicts),
                attempts: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Relay for ScriptedRelay {
        async fn attempt(&self, envelope: &Envelope, attempt: u32) -> Result<Reply, RelayError> {
            assert_eq!(attempt, self.attempts.fetch_add(1, Ordering::SeqCst) + 1);
            self.seen.lock().expect("lock").push(envelope.recipients.clone());
            self.verdicts
                .lock()
                .expect("lock")
                .pop()
                .unwrap_or_else(|| Ok(Reply::new(250, "OK")))
        }

        fn kind(&self) -> &'static str {
            "scripted"
        }
    }

    fn backoff(maximum: u32) -> Backoff {
        Backoff {
            maximum,
            delay: Duration::from_millis(10),
            strategy: Strategy::Constant,
            max_delay: Duration::from_secs(1),
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(
            "sender@example.com",
            vec!["a@example.com".to_string(), "b@example.com".to_string()],
            "Subject: test\r\n\r\nbody\r\n",
        )
    }

    async fn drained(storage: &MemoryStorage) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !storage.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    fn queue(relay: Arc<ScriptedRelay>, maximum: u32) -> (StoredQueue, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let queue = StoredQueue::new("memory", storage.clone(), relay, backoff(maximum));
        (queue, storage)
    }

    #[tokio::test]
    async fn test_delivered_entry_is_removed() {
        let relay = ScriptedRelay::new(vec![]);
        let (queue, storage) = queue(relay.clone(), 0);
        queue.start().await.expect("start");

        let ids = queue.enqueue(envelope()).await.expect("enqueue");
        assert_eq!(ids.len(), 1);

        assert!(drained(&storage).await);
        assert_eq!(relay.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_removed() {
        let relay = ScriptedRelay::new(vec![Err(RelayError::permanent("no such user"))]);
        let (queue, storage) = queue(relay.clone(), 5);
        queue.start().await.expect("start");

        queue.enqueue(envelope()).await.expect("enqueue");

        assert!(drained(&storage).await);
        assert_eq!(relay.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_without_retries_gives_up() {
        let relay = ScriptedRelay::new(vec![Err(RelayError::transient("busy"))]);
        let (queue, storage) = queue(relay.clone(), 0);
        queue.start().await.expect("start");

        queue.enqueue(envelope()).await.expect("enqueue");

        assert!(drained(&storage).await);
        assert_eq!(relay.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_failed_recipients() {
        let relay = ScriptedRelay::new(vec![
            Err(RelayError::transient("greylisted")
                .for_recipients(vec!["b@example.com".to_string()])),
            Err(RelayError::transient("still greylisted")),
        ]);
        let (queue, storage) = queue(relay.clone(), 3);
        queue.start().await.expect("start");

        queue.enqueue(envelope()).await.expect("enqueue");

        assert!(drained(&storage).await);
        assert_eq!(relay.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(
            *relay.seen.lock().expect("lock"),
            vec![
                vec!["a@example.com".to_string(), "b@example.com".to_string()],
                vec!["b@example.com".to_string()],
                vec!["b@example.com".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_start_reloads_and_is_idempotent() {
        let relay = ScriptedRelay::new(vec![]);
        let (queue, storage) = queue(relay.clone(), 0);

        queue.enqueue(envelope()).await.expect("enqueue");
        assert_eq!(storage.len(), 1);
        assert_eq!(relay.attempts.load(Ordering::SeqCst), 0);

        queue.start().await.expect("start");
        queue.start().await.expect("start again");

        assert!(drained(&storage).await);
        assert_eq!(relay.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stopped_queue_refuses_and_keeps_entries() {
        let relay = ScriptedRelay::new(vec![Err(RelayError::transient("down"))]);
        let storage = Arc::new(MemoryStorage::new());
        let mut slow = backoff(5);
        slow.delay = Duration::from_secs(3600);
        let queue = StoredQueue::new("memory", storage.clone(), relay, slow);
        queue.start().await.expect("start");

        queue.enqueue(envelope()).await.expect("enqueue");
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.storage().load().await.expect("load")[0].attempts == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first attempt");

        queue.stop().await;
        assert!(matches!(
            queue.enqueue(envelope()).await,
            Err(QueueError::ShuttingDown)
        ));
        assert_eq!(storage.len(), 1);

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task exits on stop");
    }
}

//! Bus, KV and object-store contracts.
//!
//! These traits are the seam between the flow runtime and the transport.
//! Components hold `Arc<dyn MessageBus>` and never see whether they run over
//! NATS or in-process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use semstreams_msg::Message;
use tokio::sync::mpsc;

use crate::error::BusError;

/// Delivery semantics for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// At-most-once, in-memory. Overflow drops with a counter increment.
    Core,
    /// At-least-once, persisted and replayable. Overflow back-pressures the
    /// publisher.
    Durable,
}

/// One delivered message.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The concrete subject the message arrived on.
    pub subject: String,
    /// The message.
    pub message: Message,
    /// Reply subject for request/reply, if any.
    pub reply: Option<String>,
}

/// A handle to an active subscription.
///
/// Dropping the subscription unsubscribes; the transport prunes the sender
/// on its next delivery attempt.
#[derive(Debug)]
pub struct Subscription {
    pattern: String,
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    /// Wrap a receiver. Used by transport implementations.
    #[must_use]
    pub fn new(pattern: impl Into<String>, receiver: mpsc::Receiver<Delivery>) -> Self {
        Self {
            pattern: pattern.into(),
            receiver,
        }
    }

    /// The pattern this subscription was created with.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Receive the next delivery. Returns `None` when the subscription is
    /// closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_next(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Close the subscription.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// The uniform bus contract.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget publish to all current matching subscribers.
    async fn publish(&self, subject: &str, message: &Message) -> Result<(), BusError>;

    /// Subscribe to a pattern (`*` one token, `>` tail).
    async fn subscribe(&self, pattern: &str, mode: DeliveryMode)
    -> Result<Subscription, BusError>;

    /// Synchronous request/reply with a deadline.
    async fn request(
        &self,
        subject: &str,
        message: &Message,
        timeout: Duration,
    ) -> Result<Message, BusError>;

    /// Open (creating if necessary) a KV bucket.
    async fn kv(&self, bucket: &str) -> Result<Arc<dyn KvStore>, BusError>;

    /// Open (creating if necessary) an object-store bucket.
    async fn object_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, BusError>;
}

// ── KV ──────────────────────────────────────────────────────────────────────

/// A revisioned KV entry.
#[derive(Debug, Clone)]
pub struct KvEntry {
    /// Key within the bucket.
    pub key: String,
    /// Raw value bytes (JSON by convention).
    pub value: Vec<u8>,
    /// Revision assigned by the store; strictly increasing per bucket.
    pub revision: u64,
}

/// Kind of change a watcher observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    /// The key was created or updated.
    Put,
    /// The key was deleted.
    Delete,
}

/// One change event from a KV watch.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// The key that changed.
    pub key: String,
    /// New value for puts, `None` for deletes.
    pub value: Option<Vec<u8>>,
    /// Store revision of this change.
    pub revision: u64,
    /// Change kind.
    pub op: WatchOp,
}

/// Where a watch starts delivering from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStart {
    /// Only changes after the watch is established.
    New,
    /// Replay history from the given revision (exclusive), then go live.
    Revision(u64),
}

/// A revisioned KV bucket.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Bucket name.
    fn bucket(&self) -> &str;

    /// Fetch an entry.
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, BusError>;

    /// Unconditional write. Returns the new revision.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, BusError>;

    /// Compare-and-swap write. `expected_revision == 0` means the key must
    /// not exist. Returns the new revision.
    ///
    /// # Errors
    ///
    /// [`BusError::CasConflict`] when the stored revision differs.
    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: u64,
    ) -> Result<u64, BusError>;

    /// Delete a key. Deleting a missing key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), BusError>;

    /// List all keys in the bucket.
    async fn keys(&self) -> Result<Vec<String>, BusError>;

    /// Watch keys matching a pattern (same grammar as subjects; `>` watches
    /// the whole bucket).
    async fn watch(
        &self,
        pattern: &str,
        start: WatchStart,
    ) -> Result<mpsc::Receiver<WatchEvent>, BusError>;
}

/// Maximum CAS attempts before [`update_with_retry`] gives up.
pub const DEFAULT_CAS_ATTEMPTS: u32 = 10;

/// Compare-and-swap loop: read, transform, update; retry on conflict with
/// capped backoff until the transform applies or the budget is exhausted.
///
/// The transform receives the current value (or `None`) and returns the new
/// bytes, or `None` to abort without writing (the current revision is
/// returned). Writers never hold locks; concurrent updaters are serialised
/// by revision conflicts alone.
///
/// # Errors
///
/// [`BusError::CasExhausted`] after `max_attempts` conflicts; any transform
/// or transport error is passed through.
pub async fn update_with_retry<F>(
    store: &dyn KvStore,
    key: &str,
    max_attempts: u32,
    mut transform: F,
) -> Result<u64, BusError>
where
    F: FnMut(Option<&[u8]>) -> Result<Option<Vec<u8>>, BusError> + Send,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let entry = store.get(key).await?;
        let revision = entry.as_ref().map_or(0, |e| e.revision);
        let current = entry.as_ref().map(|e| e.value.as_slice());

        let Some(next) = transform(current)? else {
            return Ok(revision);
        };

        match store.update(key, next, revision).await {
            Ok(new_revision) => return Ok(new_revision),
            Err(BusError::CasConflict { .. }) if attempt < max_attempts => {
                let backoff = Duration::from_millis(u64::from(2u32.saturating_pow(attempt)).min(50));
                tokio::time::sleep(backoff).await;
            }
            Err(BusError::CasConflict { .. }) => {
                return Err(BusError::CasExhausted {
                    key: key.to_string(),
                    attempts: attempt,
                });
            }
            Err(other) => return Err(other),
        }
    }
}

// ── Object store ────────────────────────────────────────────────────────────

/// Large opaque blobs, keyed by name (content hash by convention).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name.
    fn bucket(&self) -> &str;

    /// Fetch a blob.
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, BusError>;

    /// Store a blob.
    async fn put(&self, name: &str, data: Vec<u8>) -> Result<(), BusError>;

    /// Delete a blob. Deleting a missing blob is a no-op.
    async fn delete(&self, name: &str) -> Result<(), BusError>;
}

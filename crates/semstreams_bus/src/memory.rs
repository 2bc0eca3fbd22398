//! In-process bus implementation.
//!
//! Implements the full bus contract without a transport: wildcard fan-out,
//! core drop / durable replay semantics, request/reply over `_INBOX`
//! subjects, revisioned KV buckets with watch fan-out, and an object store.
//! Used by tests and single-binary deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use semstreams_msg::Message;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::bus::{
    Delivery, DeliveryMode, KvEntry, KvStore, MessageBus, ObjectStore, Subscription, WatchEvent,
    WatchOp, WatchStart,
};
use crate::error::BusError;
use crate::subject;

/// Channel capacity for subscriptions.
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// How many published messages the replay ring retains for durable
/// subscribers.
const REPLAY_CAPACITY: usize = 10_000;

struct SubEntry {
    pattern: String,
    mode: DeliveryMode,
    sender: mpsc::Sender<Delivery>,
}

struct BusInner {
    subs: Mutex<Vec<SubEntry>>,
    replay: Mutex<VecDeque<(String, Message)>>,
    buckets: DashMap<String, Arc<MemoryKv>>,
    objects: DashMap<String, Arc<MemoryObjects>>,
    dropped: AtomicU64,
}

/// Fully in-process [`MessageBus`].
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subs: Mutex::new(Vec::new()),
                replay: Mutex::new(VecDeque::new()),
                buckets: DashMap::new(),
                objects: DashMap::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Messages dropped on full core subscriptions since startup.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn lock_subs(&self) -> std::sync::MutexGuard<'_, Vec<SubEntry>> {
        match self.inner.subs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn deliver(
        &self,
        subject_name: &str,
        message: &Message,
        reply: Option<&str>,
    ) -> Result<(), BusError> {
        // Snapshot matching senders so no lock is held across await.
        let matching: Vec<(DeliveryMode, mpsc::Sender<Delivery>)> = {
            let mut subs = self.lock_subs();
            subs.retain(|s| !s.sender.is_closed());
            subs.iter()
                .filter(|s| subject::matches(&s.pattern, subject_name))
                .map(|s| (s.mode, s.sender.clone()))
                .collect()
        };

        for (mode, sender) in matching {
            let delivery = Delivery {
                subject: subject_name.to_string(),
                message: message.clone(),
                reply: reply.map(str::to_string),
            };
            match mode {
                DeliveryMode::Core => {
                    if sender.try_send(delivery).is_err() {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(subject = subject_name, "core subscriber full, dropping");
                    }
                }
                DeliveryMode::Durable => {
                    // Backpressure: block the publisher instead of dropping.
                    let _ = sender.send(delivery).await;
                }
            }
        }
        Ok(())
    }

    fn record_for_replay(&self, subject_name: &str, message: &Message) {
        let mut ring = match self.inner.replay.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ring.len() >= REPLAY_CAPACITY {
            ring.pop_front();
        }
        ring.push_back((subject_name.to_string(), message.clone()));
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject_name: &str, message: &Message) -> Result<(), BusError> {
        subject::validate_subject(subject_name)?;
        if !subject_name.starts_with(subject::INBOX_PREFIX) {
            self.record_for_replay(subject_name, message);
        }
        self.deliver(subject_name, message, None).await
    }

    async fn subscribe(
        &self,
        pattern: &str,
        mode: DeliveryMode,
    ) -> Result<Subscription, BusError> {
        subject::validate_pattern(pattern)?;
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        // Durable subscribers replay the retained window first. Register
        // before replaying: at-least-once tolerates the duplicate a racing
        // publish could produce.
        {
            let mut subs = self.lock_subs();
            subs.push(SubEntry {
                pattern: pattern.to_string(),
                mode,
                sender: sender.clone(),
            });
        }

        if mode == DeliveryMode::Durable {
            let replayable: Vec<(String, Message)> = {
                let ring = match self.inner.replay.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                ring.iter()
                    .filter(|(s, _)| subject::matches(pattern, s))
                    .cloned()
                    .collect()
            };
            for (s, m) in replayable {
                let _ = sender
                    .send(Delivery {
                        subject: s,
                        message: m,
                        reply: None,
                    })
                    .await;
            }
        }

        debug!(pattern, ?mode, "memory bus subscription created");
        Ok(Subscription::new(pattern, receiver))
    }

    async fn request(
        &self,
        subject_name: &str,
        message: &Message,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        subject::validate_subject(subject_name)?;
        let inbox = subject::new_inbox();
        let mut reply_sub = self.subscribe(&inbox, DeliveryMode::Core).await?;

        self.deliver(subject_name, message, Some(&inbox)).await?;

        match tokio::time::timeout(timeout, reply_sub.next()).await {
            Ok(Some(delivery)) => Ok(delivery.message),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout(subject_name.to_string())),
        }
    }

    async fn kv(&self, bucket: &str) -> Result<Arc<dyn KvStore>, BusError> {
        let store = self
            .inner
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(MemoryKv::new(bucket)))
            .clone();
        Ok(store)
    }

    async fn object_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, BusError> {
        let store = self
            .inner
            .objects
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(MemoryObjects::new(bucket)))
            .clone();
        Ok(store)
    }
}

// ── KV ──────────────────────────────────────────────────────────────────────

struct Watcher {
    pattern: String,
    sender: mpsc::UnboundedSender<WatchEvent>,
}

struct KvState {
    entries: HashMap<String, (Vec<u8>, u64)>,
    revision: u64,
    history: Vec<WatchEvent>,
    watchers: Vec<Watcher>,
}

/// In-process revisioned KV bucket.
pub struct MemoryKv {
    bucket: String,
    state: Mutex<KvState>,
}

impl MemoryKv {
    fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            state: Mutex::new(KvState {
                entries: HashMap::new(),
                revision: 0,
                history: Vec::new(),
                watchers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KvState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn commit(state: &mut KvState, event: WatchEvent) {
        state.history.push(event.clone());
        state
            .watchers
            .retain(|w| !(w.sender.is_closed()));
        for watcher in &state.watchers {
            if subject::matches(&watcher.pattern, &event.key) {
                let _ = watcher.sender.send(event.clone());
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str) -> Result<Option<KvEntry>, BusError> {
        let state = self.lock();
        Ok(state.entries.get(key).map(|(value, revision)| KvEntry {
            key: key.to_string(),
            value: value.clone(),
            revision: *revision,
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, BusError> {
        let mut state = self.lock();
        state.revision += 1;
        let revision = state.revision;
        state.entries.insert(key.to_string(), (value.clone(), revision));
        Self::commit(
            &mut state,
            WatchEvent {
                key: key.to_string(),
                value: Some(value),
                revision,
                op: WatchOp::Put,
            },
        );
        Ok(revision)
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: u64,
    ) -> Result<u64, BusError> {
        let mut state = self.lock();
        let current = state.entries.get(key).map(|(_, rev)| *rev).unwrap_or(0);
        if current != expected_revision {
            return Err(BusError::CasConflict {
                key: key.to_string(),
            });
        }
        state.revision += 1;
        let revision = state.revision;
        state.entries.insert(key.to_string(), (value.clone(), revision));
        Self::commit(
            &mut state,
            WatchEvent {
                key: key.to_string(),
                value: Some(value),
                revision,
                op: WatchOp::Put,
            },
        );
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.entries.remove(key).is_some() {
            state.revision += 1;
            let revision = state.revision;
            Self::commit(
                &mut state,
                WatchEvent {
                    key: key.to_string(),
                    value: None,
                    revision,
                    op: WatchOp::Delete,
                },
            );
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BusError> {
        let state = self.lock();
        let mut keys: Vec<String> = state.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn watch(
        &self,
        pattern: &str,
        start: WatchStart,
    ) -> Result<mpsc::Receiver<WatchEvent>, BusError> {
        // Watchers get an unbounded stage so KV writers never block on a
        // slow consumer; a pump task forwards into the bounded receiver.
        let (stage_tx, mut stage_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        {
            let mut state = self.lock();
            if let WatchStart::Revision(from) = start {
                for event in &state.history {
                    if event.revision > from && subject::matches(pattern, &event.key) {
                        let _ = stage_tx.send(event.clone());
                    }
                }
            }
            state.watchers.push(Watcher {
                pattern: pattern.to_string(),
                sender: stage_tx,
            });
        }

        tokio::spawn(async move {
            while let Some(event) = stage_rx.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

// ── Object store ────────────────────────────────────────────────────────────

/// In-process object store bucket.
pub struct MemoryObjects {
    bucket: String,
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryObjects {
    fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            blobs: DashMap::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjects {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, BusError> {
        Ok(self.blobs.get(name).map(|entry| entry.clone()))
    }

    async fn put(&self, name: &str, data: Vec<u8>) -> Result<(), BusError> {
        self.blobs.insert(name.to_string(), data);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BusError> {
        self.blobs.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::update_with_retry;
    use semstreams_msg::MessageType;

    fn test_message(payload: serde_json::Value) -> Message {
        Message::new(MessageType::new("events", "test", "v1"), payload, "test")
    }

    #[tokio::test]
    async fn test_publish_subscribe_wildcard() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("events.*.v1", DeliveryMode::Core).await.unwrap();

        bus.publish("events.test.v1", &test_message(serde_json::json!({"n": 1})))
            .await
            .unwrap();

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.subject, "events.test.v1");
    }

    #[tokio::test]
    async fn test_no_delivery_on_mismatch() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("events.a.*", DeliveryMode::Core).await.unwrap();
        bus.publish("events.b.v1", &test_message(serde_json::json!({})))
            .await
            .unwrap();
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_durable_replay() {
        let bus = MemoryBus::new();
        bus.publish("events.test.v1", &test_message(serde_json::json!({"n": 1})))
            .await
            .unwrap();
        bus.publish("events.test.v1", &test_message(serde_json::json!({"n": 2})))
            .await
            .unwrap();

        // A durable subscriber created after the fact replays the window.
        let mut sub = bus.subscribe("events.>", DeliveryMode::Durable).await.unwrap();
        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(first.message.payload["n"], 1);
        assert_eq!(second.message.payload["n"], 2);
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = MemoryBus::new();
        let mut service = bus.subscribe("graph.query.entity", DeliveryMode::Core).await.unwrap();

        let bus_clone = bus.clone();
        tokio::spawn(async move {
            if let Some(delivery) = service.next().await
                && let Some(reply) = delivery.reply
            {
                let response = test_message(serde_json::json!({"answer": 42}));
                let _ = bus_clone.publish(&reply, &response).await;
            }
        });

        let response = bus
            .request(
                "graph.query.entity",
                &test_message(serde_json::json!({"q": true})),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(response.payload["answer"], 42);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let bus = MemoryBus::new();
        let err = bus
            .request(
                "graph.query.nobody",
                &test_message(serde_json::json!({})),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_kv_put_get_revisions() {
        let bus = MemoryBus::new();
        let kv = bus.kv("TEST").await.unwrap();
        let r1 = kv.put("a", b"one".to_vec()).await.unwrap();
        let r2 = kv.put("a", b"two".to_vec()).await.unwrap();
        assert!(r2 > r1);
        let entry = kv.get("a").await.unwrap().unwrap();
        assert_eq!(entry.value, b"two");
        assert_eq!(entry.revision, r2);
    }

    #[tokio::test]
    async fn test_kv_cas_conflict() {
        let bus = MemoryBus::new();
        let kv = bus.kv("TEST").await.unwrap();
        let r1 = kv.put("a", b"one".to_vec()).await.unwrap();
        kv.put("a", b"two".to_vec()).await.unwrap();

        let err = kv.update("a", b"stale".to_vec(), r1).await.unwrap_err();
        assert!(matches!(err, BusError::CasConflict { .. }));
    }

    #[tokio::test]
    async fn test_kv_create_requires_absent() {
        let bus = MemoryBus::new();
        let kv = bus.kv("TEST").await.unwrap();
        assert!(kv.update("fresh", b"v".to_vec(), 0).await.is_ok());
        assert!(kv.update("fresh", b"v2".to_vec(), 0).await.is_err());
    }

    #[tokio::test]
    async fn test_update_with_retry_converges_under_contention() {
        let bus = MemoryBus::new();
        let kv = bus.kv("TEST").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let kv = Arc::clone(&kv);
            handles.push(tokio::spawn(async move {
                update_with_retry(kv.as_ref(), "counter", 50, |current| {
                    let n: u64 = current
                        .map(|b| String::from_utf8_lossy(b).parse().unwrap_or(0))
                        .unwrap_or(0);
                    Ok(Some((n + 1).to_string().into_bytes()))
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entry = kv.get("counter").await.unwrap().unwrap();
        assert_eq!(String::from_utf8_lossy(&entry.value), "8");
    }

    #[tokio::test]
    async fn test_kv_watch_live_and_replay() {
        let bus = MemoryBus::new();
        let kv = bus.kv("TEST").await.unwrap();
        kv.put("x", b"1".to_vec()).await.unwrap();

        let mut live = kv.watch(">", WatchStart::New).await.unwrap();
        kv.put("y", b"2".to_vec()).await.unwrap();
        let event = live.recv().await.unwrap();
        assert_eq!(event.key, "y");
        assert_eq!(event.op, WatchOp::Put);

        let mut replay = kv.watch(">", WatchStart::Revision(0)).await.unwrap();
        let first = replay.recv().await.unwrap();
        assert_eq!(first.key, "x");
    }

    #[tokio::test]
    async fn test_object_store_roundtrip() {
        let bus = MemoryBus::new();
        let store = bus.object_store("BLOBS").await.unwrap();
        store.put("hash1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("hash1").await.unwrap(), Some(vec![1, 2, 3]));
        store.delete("hash1").await.unwrap();
        assert_eq!(store.get("hash1").await.unwrap(), None);
    }
}

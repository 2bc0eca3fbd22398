//! NATS transport implementation.
//!
//! Core pub/sub and request/reply map straight onto `async-nats`; durable
//! subscriptions map onto JetStream streams with explicit-ack pull
//! consumers; KV buckets map onto JetStream KV and blobs onto the JetStream
//! object store.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use futures::StreamExt;
use semstreams_msg::Message;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{
    Delivery, DeliveryMode, KvEntry, KvStore, MessageBus, ObjectStore, Subscription, WatchEvent,
    WatchOp, WatchStart,
};
use crate::codec;
use crate::error::BusError;
use crate::subject;

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Channel capacity for subscription pumps.
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Prefix for JetStream stream names derived from durable patterns.
const STREAM_PREFIX: &str = "SEMSTREAMS";

/// Connection settings for [`NatsBus`].
#[derive(Debug, Clone)]
pub struct NatsBusConfig {
    /// Server URLs; the first reachable one wins.
    pub urls: Vec<String>,
    /// Optional credentials.
    pub user: Option<String>,
    /// Optional credentials.
    pub password: Option<String>,
    /// Retention limit for durable streams.
    pub max_age: Duration,
}

impl Default for NatsBusConfig {
    fn default() -> Self {
        Self {
            urls: vec![DEFAULT_NATS_URL.to_string()],
            user: None,
            password: None,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// [`MessageBus`] over a NATS cluster.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsBusConfig,
    reconnects: Arc<std::sync::atomic::AtomicU64>,
}

impl NatsBus {
    /// Connect to NATS.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connect`] if no server is reachable.
    pub async fn connect(config: NatsBusConfig) -> Result<Self, BusError> {
        let urls = config.urls.join(",");
        info!(urls, "connecting to NATS");
        let reconnects = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = Arc::clone(&reconnects);
        let options = match (&config.user, &config.password) {
            (Some(user), Some(password)) => async_nats::ConnectOptions::new()
                .user_and_password(user.clone(), password.clone()),
            _ => async_nats::ConnectOptions::new(),
        }
        .event_callback(move |event| {
            let counter = Arc::clone(&counter);
            async move {
                match event {
                    async_nats::Event::Connected => {
                        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        info!("NATS (re)connected");
                    }
                    async_nats::Event::Disconnected => warn!("NATS disconnected"),
                    other => debug!(event = %other, "NATS client event"),
                }
            }
        });
        let client = options
            .connect(urls.as_str())
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        info!("NATS connection established");
        let jetstream = jetstream::new(client.clone());
        Ok(Self {
            client,
            jetstream,
            config,
            reconnects,
        })
    }

    /// The underlying client, for components that need raw access.
    #[must_use]
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Connection events observed since startup; the first connect counts
    /// as one, every reconnection after that adds one.
    #[must_use]
    pub fn reconnections(&self) -> u64 {
        self.reconnects.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Derive a JetStream-safe stream name from a subject pattern.
    fn stream_name(pattern: &str) -> String {
        let mangled: String = pattern
            .chars()
            .map(|c| match c {
                '.' => '_',
                '*' => 'S',
                '>' => 'T',
                other => other,
            })
            .collect();
        format!("{STREAM_PREFIX}_{}", mangled.to_uppercase())
    }

    async fn durable_subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let stream_name = Self::stream_name(pattern);
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name.clone(),
                subjects: vec![pattern.to_string()],
                max_age: self.config.max_age,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Subscribe {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

        let consumer = stream
            .create_consumer(pull::Config {
                ack_policy: jetstream::consumer::AckPolicy::Explicit,
                filter_subject: pattern.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Subscribe {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let pump_pattern = pattern.to_string();
        tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(pattern = pump_pattern, %error, "durable consumer failed");
                    return;
                }
            };
            while let Some(next) = messages.next().await {
                let js_message = match next {
                    Ok(m) => m,
                    Err(error) => {
                        warn!(pattern = pump_pattern, %error, "durable pull error");
                        continue;
                    }
                };
                match codec::decode(&js_message.payload) {
                    Ok(message) => {
                        let delivery = Delivery {
                            subject: js_message.subject.to_string(),
                            message,
                            reply: None,
                        };
                        // Backpressure before ack: an un-acked message is
                        // redelivered, which downstream dedups on hash.
                        if tx.send(delivery).await.is_err() {
                            break;
                        }
                        if let Err(error) = js_message.ack().await {
                            warn!(pattern = pump_pattern, %error, "ack failed");
                        }
                    }
                    Err(error) => {
                        debug!(pattern = pump_pattern, %error, "skipping undecodable message");
                        let _ = js_message.ack().await;
                    }
                }
            }
        });

        Ok(Subscription::new(pattern, rx))
    }

    async fn core_subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let mut subscriber =
            self.client
                .subscribe(pattern.to_string())
                .await
                .map_err(|e| BusError::Subscribe {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let pump_pattern = pattern.to_string();
        tokio::spawn(async move {
            while let Some(nats_message) = subscriber.next().await {
                match codec::decode(&nats_message.payload) {
                    Ok(message) => {
                        let delivery = Delivery {
                            subject: nats_message.subject.to_string(),
                            message,
                            reply: nats_message.reply.map(|r| r.to_string()),
                        };
                        // Core is at-most-once: drop on overflow.
                        if tx.try_send(delivery).is_err() && tx.is_closed() {
                            break;
                        }
                    }
                    Err(error) => {
                        debug!(pattern = pump_pattern, %error, "skipping undecodable message");
                    }
                }
            }
        });

        Ok(Subscription::new(pattern, rx))
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject_name: &str, message: &Message) -> Result<(), BusError> {
        subject::validate_subject(subject_name)?;
        let payload = codec::encode(message)?;
        self.client
            .publish(subject_name.to_string(), payload.into())
            .await
            .map_err(|e| BusError::Publish {
                subject: subject_name.to_string(),
                message: e.to_string(),
            })
    }

    async fn subscribe(
        &self,
        pattern: &str,
        mode: DeliveryMode,
    ) -> Result<Subscription, BusError> {
        subject::validate_pattern(pattern)?;
        match mode {
            DeliveryMode::Core => self.core_subscribe(pattern).await,
            DeliveryMode::Durable => self.durable_subscribe(pattern).await,
        }
    }

    async fn request(
        &self,
        subject_name: &str,
        message: &Message,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        subject::validate_subject(subject_name)?;
        let payload = codec::encode(message)?;
        let response = tokio::time::timeout(
            timeout,
            self.client.request(subject_name.to_string(), payload.into()),
        )
        .await
        .map_err(|_| BusError::Timeout(subject_name.to_string()))?
        .map_err(|e| BusError::Request {
            subject: subject_name.to_string(),
            message: e.to_string(),
        })?;
        codec::decode(&response.payload)
    }

    async fn kv(&self, bucket: &str) -> Result<Arc<dyn KvStore>, BusError> {
        let store = match self.jetstream.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => self
                .jetstream
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    history: 16,
                    ..Default::default()
                })
                .await
                .map_err(|e| BusError::Kv {
                    bucket: bucket.to_string(),
                    message: e.to_string(),
                })?,
        };
        Ok(Arc::new(NatsKv {
            bucket: bucket.to_string(),
            store,
        }))
    }

    async fn object_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, BusError> {
        let store = match self.jetstream.get_object_store(bucket).await {
            Ok(store) => store,
            Err(_) => self
                .jetstream
                .create_object_store(jetstream::object_store::Config {
                    bucket: bucket.to_string(),
                    ..Default::default()
                })
                .await
                .map_err(|e| BusError::ObjectStore {
                    bucket: bucket.to_string(),
                    message: e.to_string(),
                })?,
        };
        Ok(Arc::new(NatsObjects {
            bucket: bucket.to_string(),
            store,
        }))
    }
}

// ── KV ──────────────────────────────────────────────────────────────────────

struct NatsKv {
    bucket: String,
    store: kv::Store,
}

#[async_trait]
impl KvStore for NatsKv {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str) -> Result<Option<KvEntry>, BusError> {
        let entry = self.store.entry(key).await.map_err(|e| BusError::Kv {
            bucket: self.bucket.clone(),
            message: e.to_string(),
        })?;
        Ok(entry.and_then(|e| match e.operation {
            kv::Operation::Put => Some(KvEntry {
                key: key.to_string(),
                value: e.value.to_vec(),
                revision: e.revision,
            }),
            kv::Operation::Delete | kv::Operation::Purge => None,
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, BusError> {
        self.store
            .put(key, value.into())
            .await
            .map_err(|e| BusError::Kv {
                bucket: self.bucket.clone(),
                message: e.to_string(),
            })
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: u64,
    ) -> Result<u64, BusError> {
        // Revision 0 means create-if-absent. Any rejection is treated as a
        // lost race; persistent failures exhaust the caller's retry budget.
        if expected_revision == 0 {
            self.store
                .create(key, value.into())
                .await
                .map_err(|_| BusError::CasConflict {
                    key: key.to_string(),
                })
        } else {
            self.store
                .update(key, value.into(), expected_revision)
                .await
                .map_err(|_| BusError::CasConflict {
                    key: key.to_string(),
                })
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BusError> {
        self.store.delete(key).await.map_err(|e| BusError::Kv {
            bucket: self.bucket.clone(),
            message: e.to_string(),
        })
    }

    async fn keys(&self) -> Result<Vec<String>, BusError> {
        let mut stream = self.store.keys().await.map_err(|e| BusError::Kv {
            bucket: self.bucket.clone(),
            message: e.to_string(),
        })?;
        let mut keys = Vec::new();
        while let Some(next) = stream.next().await {
            match next {
                Ok(key) => keys.push(key),
                Err(error) => {
                    return Err(BusError::Kv {
                        bucket: self.bucket.clone(),
                        message: error.to_string(),
                    });
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn watch(
        &self,
        pattern: &str,
        start: WatchStart,
    ) -> Result<mpsc::Receiver<WatchEvent>, BusError> {
        let watch = match start {
            WatchStart::New => self.store.watch(pattern).await,
            WatchStart::Revision(from) => {
                self.store.watch_from_revision(pattern, from + 1).await
            }
        }
        .map_err(|e| BusError::Kv {
            bucket: self.bucket.clone(),
            message: e.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let bucket = self.bucket.clone();
        tokio::spawn(async move {
            let mut watch = watch;
            while let Some(next) = watch.next().await {
                let entry = match next {
                    Ok(entry) => entry,
                    Err(error) => {
                        warn!(bucket, %error, "kv watch error");
                        continue;
                    }
                };
                let event = match entry.operation {
                    kv::Operation::Put => WatchEvent {
                        key: entry.key,
                        value: Some(entry.value.to_vec()),
                        revision: entry.revision,
                        op: WatchOp::Put,
                    },
                    kv::Operation::Delete | kv::Operation::Purge => WatchEvent {
                        key: entry.key,
                        value: None,
                        revision: entry.revision,
                        op: WatchOp::Delete,
                    },
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

// ── Object store ────────────────────────────────────────────────────────────

struct NatsObjects {
    bucket: String,
    store: jetstream::object_store::ObjectStore,
}

#[async_trait]
impl ObjectStore for NatsObjects {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, BusError> {
        match self.store.get(name).await {
            Ok(mut object) => {
                let mut data = Vec::new();
                object
                    .read_to_end(&mut data)
                    .await
                    .map_err(|e| BusError::ObjectStore {
                        bucket: self.bucket.clone(),
                        message: e.to_string(),
                    })?;
                Ok(Some(data))
            }
            Err(_) => Ok(None),
        }
    }

    async fn put(&self, name: &str, data: Vec<u8>) -> Result<(), BusError> {
        self.store
            .put(name, &mut data.as_slice())
            .await
            .map(|_| ())
            .map_err(|e| BusError::ObjectStore {
                bucket: self.bucket.clone(),
                message: e.to_string(),
            })
    }

    async fn delete(&self, name: &str) -> Result<(), BusError> {
        self.store
            .delete(name)
            .await
            .map_err(|e| BusError::ObjectStore {
                bucket: self.bucket.clone(),
                message: e.to_string(),
            })
    }
}

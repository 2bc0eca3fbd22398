//! The graph ingest component.
//!
//! Subscribes to the configured graph ingress subjects, runs a fixed worker
//! pool over a bounded queue, and feeds *Graphable* payloads through the
//! data manager. Payloads without the capability are silently skipped —
//! that is not an error for this subscriber. Redelivered messages are
//! deduplicated on content hash.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use semstreams_bus::{Delivery, DeliveryMode, MessageBus, buckets, subject};
use semstreams_flow::{Component, ComponentContext, ComponentKind, FlowError, Health};
use semstreams_msg::{EventPayload, Message, MessageType, Payload, VocabularyRegistry, decode_payload};

use crate::cache::bounded_lru;
use crate::config::GraphConfig;
use crate::data_manager::DataManager;
use crate::error::GraphError;
use crate::index::{IndexManager, IndexTask};
use crate::metrics::GraphMetrics;

/// The graph processor component.
pub struct GraphProcessor {
    name: String,
    config: GraphConfig,
    data: DataManager,
    index_handle: Option<JoinHandle<()>>,
    dedup: Arc<Mutex<lru::LruCache<String, ()>>>,
    metrics: GraphMetrics,
    handles: Vec<JoinHandle<()>>,
}

impl GraphProcessor {
    /// Build the processor: opens buckets, wires the data manager and index
    /// manager. `start` only subscribes and spawns the pool.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Bus`] if a bucket cannot be opened.
    pub async fn new(
        name: impl Into<String>,
        bus: &dyn MessageBus,
        config: GraphConfig,
        vocabulary: Arc<VocabularyRegistry>,
        metrics: GraphMetrics,
    ) -> Result<Self, GraphError> {
        let (index_tx, index_rx) = mpsc::channel::<IndexTask>(config.queue_capacity);

        let entity_kv = bus.kv(buckets::ENTITY_STATES).await?;
        let data = DataManager::new(
            entity_kv,
            Arc::clone(&vocabulary),
            &config,
            index_tx,
            metrics.clone(),
        );

        let index_manager =
            IndexManager::new(bus, vocabulary, &config, metrics.clone()).await?;
        let index_handle = Some(index_manager.spawn(index_rx));

        Ok(Self {
            name: name.into(),
            dedup: Arc::new(Mutex::new(bounded_lru(config.dedup_capacity))),
            config,
            data,
            index_handle,
            metrics,
            handles: Vec::new(),
        })
    }

    /// The shared write/read path, for wiring the query service.
    #[must_use]
    pub fn data_manager(&self) -> DataManager {
        self.data.clone()
    }

    /// Report a dropped message on `events.errors` for the message logger.
    /// The processor never subscribes there, so no feedback loop is
    /// possible.
    async fn report_error(
        bus: &dyn MessageBus,
        component: &str,
        dropped_subject: &str,
        dropped: &Message,
        error: &GraphError,
    ) {
        let payload = EventPayload {
            kind: "graph.ingest".into(),
            body: serde_json::json!({
                "error": error.to_string(),
                "subject": dropped_subject,
                "message_id": dropped.id,
                "hash": dropped.hash,
            }),
        };
        let event = Message::new(
            MessageType::new("events", "errors", "v1"),
            payload.to_json(),
            component,
        );
        if let Err(publish_error) = bus.publish(subject::ERRORS, &event).await {
            debug!(%publish_error, "failed to publish error event");
        }
    }

    /// Process one delivery on a worker.
    async fn process(
        data: &DataManager,
        dedup: &Arc<Mutex<lru::LruCache<String, ()>>>,
        metrics: &GraphMetrics,
        delivery: &Delivery,
    ) -> Result<(), GraphError> {
        let started = Instant::now();
        let message = &delivery.message;
        metrics
            .messages_received
            .with_label_values(&[&message.message_type.to_string()])
            .inc();

        // At-least-once redelivery: same hash, one logical state change.
        {
            let mut seen = match dedup.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if seen.put(message.hash.clone(), ()).is_some() {
                metrics.dedup_hits.inc();
                return Ok(());
            }
        }

        let Some(payload) = decode_payload(&message.payload) else {
            metrics.capability_skips.inc();
            return Ok(());
        };
        let Some(graphable) = payload.as_graphable() else {
            metrics.capability_skips.inc();
            return Ok(());
        };

        payload.validate()?;

        let entity_id = graphable.entity_id().clone();
        let mut triples = graphable.triples();
        let position = payload.as_locatable().map(|l| l.position());
        let observed_at = payload
            .as_timeable()
            .map_or(message.meta.created_at, |t| t.observed_at());

        // A locatable payload materialises its position as location triples,
        // so spatial state survives in the entity record and bin moves can
        // be diffed.
        if let Some(position) = position {
            use semstreams_msg::vocabulary::names;
            let source = message.meta.source.clone();
            let mut coordinate = |predicate: &str, value: f64| {
                triples.push(
                    semstreams_msg::Triple::new(
                        entity_id.clone(),
                        predicate,
                        semstreams_msg::TripleObject::Number(value),
                        source.clone(),
                    )
                    .with_timestamp(observed_at),
                );
            };
            coordinate(names::LATITUDE, position.lat);
            coordinate(names::LONGITUDE, position.lon);
            if let Some(alt) = position.alt {
                coordinate(names::ALTITUDE, alt);
            }
        }

        data.upsert(
            entity_id.clone(),
            entity_id.entity_type().to_string(),
            triples,
            position,
            observed_at,
        )
        .await?;

        metrics
            .messages_processed
            .with_label_values(&[&message.message_type.to_string()])
            .inc();
        metrics
            .processing_duration
            .observe(started.elapsed().as_secs_f64());
        Ok(())
    }
}

#[async_trait]
impl Component for GraphProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Storage
    }

    async fn start(&mut self, ctx: ComponentContext) -> Result<(), FlowError> {
        // Input ports override the configured ingress subjects.
        let subjects: Vec<String> = if ctx.inputs.is_empty() {
            self.config.subscribe_subjects.clone()
        } else {
            ctx.inputs.iter().map(|p| p.subject.clone()).collect()
        };

        let (work_tx, work_rx) = mpsc::channel::<Delivery>(self.config.queue_capacity);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));

        // Worker pool: decode → validate → extract → upsert → index tasks.
        for worker in 0..self.config.workers.max(1) {
            let data = self.data.clone();
            let dedup = Arc::clone(&self.dedup);
            let metrics = self.metrics.clone();
            let work_rx = Arc::clone(&work_rx);
            let bus = Arc::clone(&ctx.bus);
            let component = self.name.clone();
            self.handles.push(tokio::spawn(async move {
                loop {
                    let delivery = { work_rx.lock().await.recv().await };
                    let Some(delivery) = delivery else { break };
                    if let Err(error) =
                        Self::process(&data, &dedup, &metrics, &delivery).await
                    {
                        debug!(worker, %error, "message dropped");
                        metrics
                            .messages_errors
                            .with_label_values(&["validation"])
                            .inc();
                        Self::report_error(
                            bus.as_ref(),
                            &component,
                            &delivery.subject,
                            &delivery.message,
                            &error,
                        )
                        .await;
                    }
                }
            }));
        }

        // Subscription pumps. Durable delivery: a full queue back-pressures
        // the transport instead of dropping.
        for subject in subjects {
            let mut subscription = ctx
                .bus
                .subscribe(&subject, DeliveryMode::Durable)
                .await
                .map_err(FlowError::Bus)?;
            info!(component = self.name, subject, "graph ingress subscribed");

            let work_tx = work_tx.clone();
            self.handles.push(tokio::spawn(async move {
                while let Some(delivery) = subscription.next().await {
                    if work_tx.send(delivery).await.is_err() {
                        break;
                    }
                }
            }));
        }

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), FlowError> {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.index_handle.take() {
            handle.abort();
        }
        info!(component = self.name, "graph processor stopped");
        Ok(())
    }

    fn health(&self) -> Health {
        Health::ok()
    }
}

impl Drop for GraphProcessor {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        if let Some(handle) = &self.index_handle {
            handle.abort();
        }
    }
}

//! Per-message processing pipeline.
//!
//! `upsert entity → apply index diff → schedule embedding → emit downstream
//! event`. The entity write is the commit point: index failures retry with
//! backoff and finally defer to the repair job, and embedding runs on its
//! own queue so it can never block or fail a commit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use semstreams_community::CommunityDetector;
use semstreams_embed::{EmbedError, EmbedderTier};
use semstreams_model::{Classified, EntityPayload, EntityState, ErrorClass};
use semstreams_net::messages::{Envelope, EntityUpdated, MessageType};
use semstreams_net::{subjects, NatsConnection};
use semstreams_store::{EntityStore, IndexMaintainer, StoreError, UpsertOutcome};

use crate::metrics::AppMetrics;

/// Capacity of the embedding queue. Embedding is best-effort: when the
/// queue is full the entity is skipped and picked up again on its next
/// update or by `entity_vector` regeneration.
const EMBED_QUEUE_CAPACITY: usize = 1_024;

/// Retry cap for index diff application before deferring to repair.
const INDEX_RETRIES: usize = 5;

fn backoff(attempt: usize) -> Duration {
    let base = Duration::from_millis(100);
    let cap = Duration::from_secs(10);
    base.saturating_mul(1u32 << attempt.min(16) as u32).min(cap)
}

/// The ingest pipeline shared by all workers.
pub struct Pipeline {
    entities: Arc<EntityStore>,
    index: Arc<IndexMaintainer>,
    detector: Arc<CommunityDetector>,
    metrics: Arc<AppMetrics>,
    embed_tx: mpsc::Sender<EntityState>,
    publisher: Option<NatsConnection>,
}

impl Pipeline {
    /// Build the pipeline and its embedding worker.
    #[must_use]
    pub fn new(
        entities: Arc<EntityStore>,
        index: Arc<IndexMaintainer>,
        embedder: Arc<EmbedderTier>,
        detector: Arc<CommunityDetector>,
        metrics: Arc<AppMetrics>,
        publisher: Option<NatsConnection>,
    ) -> (Arc<Self>, EmbedWorker) {
        let (embed_tx, embed_rx) = mpsc::channel(EMBED_QUEUE_CAPACITY);
        let pipeline = Arc::new(Self {
            entities,
            index,
            detector,
            metrics,
            embed_tx,
            publisher,
        });
        let worker = EmbedWorker {
            rx: embed_rx,
            embedder,
        };
        (pipeline, worker)
    }

    /// Process one validated payload to completion.
    ///
    /// # Errors
    ///
    /// Returns the upsert failure; an index failure after the entity commit
    /// is absorbed (logged, counted, repairable) rather than failing the
    /// message.
    pub async fn process(&self, payload: EntityPayload) -> Result<UpsertOutcome, StoreError> {
        let outcome = self.entities.upsert(payload).await?;
        if outcome.prior.is_none() {
            self.metrics.worker.entity_count.inc();
        }

        let index_started = Instant::now();
        let mut attempt = 0;
        loop {
            match self
                .index
                .apply(outcome.prior.as_ref(), &outcome.current)
                .await
            {
                Ok(stats) => {
                    self.metrics
                        .worker
                        .index_updates
                        .inc_by((stats.added + stats.removed) as u64);
                    self.metrics
                        .worker
                        .index_seconds
                        .observe(index_started.elapsed().as_secs_f64());
                    break;
                }
                Err(e) if e.class() == ErrorClass::Transient && attempt < INDEX_RETRIES => {
                    attempt += 1;
                    warn!(entity_id = %outcome.current.id, attempt, error = %e,
                          "index update failed, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => {
                    // The entity write is durable; the rebuild op repairs
                    // the derived buckets.
                    self.metrics.worker.index_failures.inc();
                    warn!(entity_id = %outcome.current.id, error = %e,
                          "index update failed, repair required");
                    break;
                }
            }
        }

        self.detector.note_churn();

        if self.embed_tx.try_send(outcome.current.clone()).is_err() {
            self.metrics.embed.skipped.inc();
            debug!(entity_id = %outcome.current.id, "embedding queue full, skipping");
        }

        if let Some(publisher) = &self.publisher {
            let event = EntityUpdated {
                entity_id: outcome.current.id.as_str().to_string(),
                version: outcome.current.version,
                entity_type: outcome.current.node.entity_type.clone(),
            };
            match Envelope::new(MessageType::v1("graph", "entity.updated"), &event, "semstreams") {
                Ok(envelope) => {
                    if let Err(e) = publisher.publish(subjects::ENTITY_UPDATED, &envelope).await {
                        warn!(error = %e, "failed to publish entity.updated");
                    }
                }
                Err(e) => warn!(error = %e, "failed to build entity.updated event"),
            }
        }

        Ok(outcome)
    }
}

/// Drains the embedding queue asynchronously from entity commits.
pub struct EmbedWorker {
    rx: mpsc::Receiver<EntityState>,
    embedder: Arc<EmbedderTier>,
}

impl EmbedWorker {
    /// Run until the queue closes or shutdown is signalled.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                state = self.rx.recv() => {
                    let Some(state) = state else { break };
                    match self.embedder.embed_entity(&state).await {
                        Ok(_) => {}
                        Err(EmbedError::Disabled) => {}
                        Err(e) => {
                            warn!(entity_id = %state.id, error = %e, "embedding failed");
                        }
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    }
}

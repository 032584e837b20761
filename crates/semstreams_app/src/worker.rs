//! Bounded worker pool.
//!
//! Per-entity ordering comes from single-writer-per-key hashing: the
//! dispatcher hashes the entity ID to a worker index, so no two workers
//! ever mutate the same entity concurrently while distinct IDs proceed in
//! parallel. The total queue capacity is split across workers; a full queue
//! blocks the dispatcher, which stops consuming from the bus — that is the
//! backpressure path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use semstreams_model::{Classified, EntityPayload, ErrorClass};
use semstreams_net::messages::{DeadLetter, Envelope};
use semstreams_net::{subjects, NatsConnection};

use crate::config::WorkerSettings;
use crate::metrics::AppMetrics;
use crate::pipeline::Pipeline;

/// One unit of work: a validated entity payload plus its envelope, kept for
/// dead-letter reporting.
#[derive(Debug, Clone)]
pub struct Job {
    /// The subject the message arrived on.
    pub subject: String,
    /// The decoded envelope.
    pub envelope: Envelope,
    /// The validated payload.
    pub payload: EntityPayload,
}

/// Where unprocessable messages go.
#[derive(Clone)]
pub enum DeadLetterSink {
    /// Publish to the dead-letter subject.
    Nats(NatsConnection),
    /// Collect in memory (tests).
    Memory(Arc<std::sync::Mutex<Vec<DeadLetter>>>),
    /// Drop silently.
    Discard,
}

impl DeadLetterSink {
    /// Deliver one dead letter.
    pub async fn publish(&self, letter: DeadLetter) {
        match self {
            DeadLetterSink::Nats(conn) => {
                if let Err(e) = conn.publish(subjects::DEAD_LETTER, &letter).await {
                    error!(error = %e, "failed to publish dead letter");
                }
            }
            DeadLetterSink::Memory(sink) => {
                if let Ok(mut letters) = sink.lock() {
                    letters.push(letter);
                }
            }
            DeadLetterSink::Discard => {}
        }
    }
}

fn backoff(attempt: usize) -> Duration {
    let base = Duration::from_millis(100);
    let cap = Duration::from_secs(10);
    base.saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16) as u32)
        .min(cap)
}

/// FNV-1a 64-bit hash. Stable across platforms and builds, so an entity
/// always lands on the same worker index for a given pool size.
fn fnv1a(entity_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in entity_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn worker_for(entity_id: &str, workers: usize) -> usize {
    (fnv1a(entity_id) % workers as u64) as usize
}

/// The bounded worker pool.
pub struct WorkerPool {
    senders: std::sync::Mutex<Vec<mpsc::Sender<Job>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
    cancel: CancellationToken,
    drain_timeout: Duration,
    metrics: Arc<AppMetrics>,
}

impl WorkerPool {
    /// Spawn the workers.
    #[must_use]
    pub fn spawn(
        settings: &WorkerSettings,
        pipeline: Arc<Pipeline>,
        dead_letters: DeadLetterSink,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        let workers = settings.effective_workers();
        let per_worker = (settings.queue_size / workers).max(1);
        let cancel = CancellationToken::new();

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker_index in 0..workers {
            let (tx, rx) = mpsc::channel(per_worker);
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                worker_index,
                rx,
                settings.clone(),
                pipeline.clone(),
                dead_letters.clone(),
                metrics.clone(),
                cancel.clone(),
            )));
        }
        debug!(workers, per_worker, "worker pool started");
        Self {
            senders: std::sync::Mutex::new(senders),
            handles: std::sync::Mutex::new(handles),
            workers,
            cancel,
            drain_timeout: settings.drain_timeout,
            metrics,
        }
    }

    /// Enqueue a job, blocking when the target worker's queue is full.
    ///
    /// Returns `false` when the pool is shutting down.
    pub async fn dispatch(&self, job: Job) -> bool {
        let index = worker_for(job.payload.entity_id().as_str(), self.workers);
        let sender = {
            let Ok(senders) = self.senders.lock() else {
                return false;
            };
            let Some(sender) = senders.get(index) else {
                return false;
            };
            sender.clone()
        };
        self.metrics.worker.queue_depth.inc();
        if sender.send(job).await.is_err() {
            self.metrics.worker.queue_depth.dec();
            return false;
        }
        true
    }

    /// Drain queued work within the deadline, then cancel stragglers.
    pub async fn shutdown(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.clear(); // workers exit once their queues drain
        }
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!("worker drain deadline exceeded, cancelling");
            self.cancel.cancel();
        }
    }
}

async fn worker_loop(
    worker_index: usize,
    mut rx: mpsc::Receiver<Job>,
    settings: WorkerSettings,
    pipeline: Arc<Pipeline>,
    dead_letters: DeadLetterSink,
    metrics: Arc<AppMetrics>,
    cancel: CancellationToken,
) {
    debug!(worker = worker_index, "worker started");
    loop {
        tokio::select! {
            job = rx.recv() => {
                let Some(job) = job else { break };
                metrics.worker.queue_depth.dec();
                process_job(job, &settings, &pipeline, &dead_letters, &metrics).await;
            }
            () = cancel.cancelled() => break,
        }
    }
    debug!(worker = worker_index, "worker stopped");
}

async fn process_job(
    job: Job,
    settings: &WorkerSettings,
    pipeline: &Pipeline,
    dead_letters: &DeadLetterSink,
    metrics: &AppMetrics,
) {
    let started = Instant::now();
    let mut attempt = 0usize;
    loop {
        let result = tokio::time::timeout(
            settings.processing_timeout,
            pipeline.process(job.payload.clone()),
        )
        .await;

        let (class, description) = match result {
            Ok(Ok(outcome)) => {
                metrics.worker.processed.inc();
                metrics
                    .worker
                    .processing_seconds
                    .observe(started.elapsed().as_secs_f64());
                debug!(
                    entity_id = %outcome.current.id,
                    version = outcome.current.version,
                    message_id = job.envelope.id,
                    "message processed"
                );
                return;
            }
            Ok(Err(e)) => (e.class(), e.to_string()),
            Err(_) => (ErrorClass::Timeout, "processing deadline exceeded".to_string()),
        };

        if class.retryable() && attempt < settings.max_retries {
            attempt += 1;
            metrics.worker.retries.inc();
            warn!(
                entity_id = %job.payload.entity_id(),
                message_id = job.envelope.id,
                attempt,
                class = %class,
                error = description,
                "processing failed, retrying"
            );
            tokio::time::sleep(backoff(attempt)).await;
            continue;
        }

        metrics.worker.failed.inc();
        metrics.worker.dead_lettered.inc();
        error!(
            entity_id = %job.payload.entity_id(),
            message_id = job.envelope.id,
            class = %class,
            error = description,
            "message unprocessable, dead-lettering"
        );
        dead_letters
            .publish(DeadLetter {
                subject: job.subject,
                reason: description,
                class,
                message_id: Some(job.envelope.id),
                payload: job.envelope.payload,
                timestamp: Utc::now(),
            })
            .await;
        return;
    }
}

//! Entity ingest loop.
//!
//! Subscribes to the configured event subjects, validates each message into
//! a typed entity payload and dispatches it into the worker pool. A full
//! pool blocks this loop, which stops consuming from the bus — backpressure
//! rather than silent drops. Invalid messages go straight to the dead-letter
//! subject.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::SelectAll;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use semstreams_model::{Classified, VocabularyRegistry};
use semstreams_net::messages::{DeadLetter, Envelope};
use semstreams_net::{codec, NatsConnection, NetError};

use crate::metrics::AppMetrics;
use crate::worker::{DeadLetterSink, Job, WorkerPool};

/// Validate an envelope into a job, or explain why it cannot be one.
fn validate(subject: &str, envelope: Envelope) -> Result<Job, DeadLetter> {
    let payload = match envelope.entity_payload() {
        Ok(payload) => payload,
        Err(e) => {
            return Err(DeadLetter {
                subject: subject.to_string(),
                reason: e.to_string(),
                class: e.class(),
                message_id: Some(envelope.id.clone()),
                payload: envelope.payload,
                timestamp: Utc::now(),
            });
        }
    };
    for triple in payload.triples() {
        if !VocabularyRegistry::valid_predicate(&triple.predicate) {
            return Err(DeadLetter {
                subject: subject.to_string(),
                reason: format!("invalid predicate shape: {:?}", triple.predicate),
                class: semstreams_model::ErrorClass::InvalidInput,
                message_id: Some(envelope.id.clone()),
                payload: envelope.payload,
                timestamp: Utc::now(),
            });
        }
    }
    Ok(Job {
        subject: subject.to_string(),
        envelope,
        payload,
    })
}

/// Run the ingest loop until cancelled.
///
/// # Errors
///
/// Returns [`NetError::Subscribe`] when a subscription cannot be
/// established; per-message failures dead-letter instead of aborting.
pub async fn run_ingest(
    conn: NatsConnection,
    subjects: Vec<String>,
    pool: Arc<WorkerPool>,
    dead_letters: DeadLetterSink,
    metrics: Arc<AppMetrics>,
    cancel: CancellationToken,
) -> Result<(), NetError> {
    let mut stream = SelectAll::new();
    for subject in &subjects {
        stream.push(conn.subscribe(subject).await?);
        info!(subject, "subscribed for ingest");
    }

    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            () = cancel.cancelled() => break,
        };
        let Some(message) = message else { break };
        let subject = message.subject.as_str();

        let envelope: Envelope = match codec::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(subject, error = %e, "undecodable message");
                metrics.worker.dead_lettered.inc();
                dead_letters
                    .publish(DeadLetter {
                        subject: subject.to_string(),
                        reason: e.to_string(),
                        class: e.class(),
                        message_id: None,
                        payload: serde_json::Value::Null,
                        timestamp: Utc::now(),
                    })
                    .await;
                continue;
            }
        };

        match validate(subject, envelope) {
            Ok(job) => {
                debug!(
                    subject,
                    entity_id = %job.payload.entity_id(),
                    message_id = job.envelope.id,
                    "message accepted"
                );
                if !pool.dispatch(job).await {
                    warn!(subject, "worker pool closed, stopping ingest");
                    break;
                }
            }
            Err(letter) => {
                warn!(subject, reason = letter.reason, "invalid payload");
                metrics.worker.dead_lettered.inc();
                dead_letters.publish(letter).await;
            }
        }
    }
    info!("ingest stopped");
    Ok(())
}

//! Rules engine transport loop.
//!
//! Subscribes to the union of all rule watch subjects, feeds messages
//! through the engine and publishes the resulting events — on the shared
//! `events.rule.triggered` subject and on each rule's own subject.

use std::sync::Arc;

use futures::stream::SelectAll;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use semstreams_net::messages::{Envelope, MessageType};
use semstreams_net::{codec, subjects, NatsConnection, NetError};
use semstreams_rules::RulesEngine;

/// Run the rules loop until cancelled.
///
/// # Errors
///
/// Returns [`NetError::Subscribe`] when a subscription cannot be
/// established.
pub async fn run_rules(
    conn: NatsConnection,
    engine: Arc<RulesEngine>,
    cancel: CancellationToken,
) -> Result<(), NetError> {
    if engine.is_empty() {
        info!("no rules configured");
        return Ok(());
    }

    let mut stream = SelectAll::new();
    for subject in engine.watch_subjects() {
        stream.push(conn.subscribe(&subject).await?);
        info!(subject, "rule subscription");
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
                debug!(subject, error = %e, "skipping undecodable message");
                continue;
            }
        };

        for event in engine.handle(subject, &envelope) {
            let out = match Envelope::new(MessageType::v1("rule", "triggered"), &event, "semstreams")
            {
                Ok(out) => out,
                Err(e) => {
                    warn!(rule = event.rule, error = %e, "cannot encode rule event");
                    continue;
                }
            };
            if let Err(e) = conn.publish(subjects::RULE_TRIGGERED, &out).await {
                warn!(rule = event.rule, error = %e, "failed to publish rule event");
            }
            if let Err(e) = conn.publish(&subjects::rule_event(&event.rule), &out).await {
                warn!(rule = event.rule, error = %e, "failed to publish rule event");
            }
        }
    }
    info!("rules engine stopped");
    Ok(())
}

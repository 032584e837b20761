//! Request/reply API over the bus.
//!
//! Subscribes to the `graph.>` tree and dispatches each operation to its
//! [`Core`](crate::core::Core) handler. Every reply is the JSON `Reply`
//! wrapper except `graph.metrics`, which answers with the Prometheus text
//! exposition.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use semstreams_net::api::Reply;
use semstreams_net::{codec, subjects, NatsConnection, NetError};

use crate::core::Core;

async fn handle<R, T, F, Fut>(payload: &[u8], handler: F) -> Vec<u8>
where
    R: DeserializeOwned,
    T: Serialize,
    F: FnOnce(R) -> Fut,
    Fut: Future<Output = Reply<T>>,
{
    let reply = match codec::decode::<R>(payload) {
        Ok(request) => handler(request).await,
        Err(e) => Reply::<T>::error(&e),
    };
    codec::encode(&reply).unwrap_or_else(|_| b"{}".to_vec())
}

/// Run the API loop until cancelled.
///
/// # Errors
///
/// Returns [`NetError::Subscribe`] when the subscription cannot be
/// established; per-message failures are logged, never fatal.
pub async fn run_api(
    conn: NatsConnection,
    core: Arc<Core>,
    cancel: CancellationToken,
) -> Result<(), NetError> {
    let mut sub = conn.subscribe("graph.>").await?;
    info!("query api listening on graph.>");

    loop {
        let message = tokio::select! {
            message = sub.next() => message,
            () = cancel.cancelled() => break,
        };
        let Some(message) = message else { break };
        let subject = message.subject.as_str().to_string();
        let Some(reply_to) = message.reply.clone() else {
            // Fire-and-forget subjects (entity.updated broadcasts and the
            // like) share the graph tree; only request/reply is ours.
            continue;
        };

        debug!(subject, "api request");
        let payload = message.payload.as_ref();
        let response = match subject.as_str() {
            subjects::ENTITY_GET => {
                handle(payload, |request| core.entity_get(request)).await
            }
            subjects::ENTITY_QUERY => {
                handle(payload, |request| core.entity_query(request)).await
            }
            subjects::ENTITY_DELETE => {
                handle(payload, |request| core.entity_delete(request)).await
            }
            subjects::PREDICATE_QUERY => {
                handle(payload, |request| core.predicate_query(request)).await
            }
            subjects::QUERY_PATH => handle(payload, |request| core.path_query(request)).await,
            subjects::QUERY_SEMANTIC => {
                handle(payload, |request| core.semantic_query(request)).await
            }
            subjects::QUERY_LOCAL => handle(payload, |request| core.local_query(request)).await,
            subjects::QUERY_GLOBAL => handle(payload, |request| core.global_query(request)).await,
            subjects::COMMUNITY_GET => {
                handle(payload, |request| core.community_get(request)).await
            }
            subjects::INDEX_REBUILD => {
                let reply = core.index_rebuild().await;
                codec::encode(&reply).unwrap_or_else(|_| b"{}".to_vec())
            }
            subjects::STATS => {
                let reply = core.stats().await;
                codec::encode(&reply).unwrap_or_else(|_| b"{}".to_vec())
            }
            subjects::HEALTH => {
                let reply = Reply::ok(core.health());
                codec::encode(&reply).unwrap_or_else(|_| b"{}".to_vec())
            }
            subjects::METRICS => core.metrics.render().into_bytes(),
            other => {
                warn!(subject = other, "unknown api operation");
                continue;
            }
        };

        if let Err(e) = conn.publish_bytes(reply_to.as_str(), response).await {
            error!(subject, error = %e, "failed to publish reply");
        }
    }
    info!("query api stopped");
    Ok(())
}

//! Neural embedding provider over HTTP.
//!
//! Speaks the common `/embeddings` shape: POST `{model, input: [text]}`,
//! reply `{data: [{embedding: [...]}]}`. Reachability is probed once at
//! startup; a failed probe degrades the tier to the BM25 baseline and is
//! never fatal.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;

/// Fixed text used for the startup connectivity probe.
const PROBE_TEXT: &str = "connectivity probe";

/// Default request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// HTTP client for a remote embedding service.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpEmbedder {
    /// Build a client for the given endpoint and model.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Provider`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbedError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
        })
    }

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Http`] on transport failure and
    /// [`EmbedError::Provider`] on an empty or malformed reply.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request = EmbedRequest {
            model: &self.model,
            input: vec![text],
        };
        let response: EmbedResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::Provider("empty embedding response".to_string()))
    }

    /// Connectivity probe: embed a short fixed string.
    ///
    /// # Errors
    ///
    /// Propagates the embedding failure.
    pub async fn probe(&self) -> Result<(), EmbedError> {
        self.embed(PROBE_TEXT).await.map(|_| ())
    }
}

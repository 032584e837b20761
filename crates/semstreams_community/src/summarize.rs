//! Optional remote prose summariser.
//!
//! When configured, the detector submits each community for an LLM-generated
//! summary after the statistical one is stored. Failures leave the
//! statistical summary in place; prose is strictly additive.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CommunityError;
use crate::store::CommunityRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    community_id: &'a str,
    level: usize,
    keywords: &'a [String],
    members: &'a [String],
    statistical_summary: &'a str,
}

#[derive(Deserialize)]
struct SummarizeResponse {
    summary: String,
}

/// HTTP client for a remote summarisation service.
#[derive(Debug, Clone)]
pub struct HttpSummarizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSummarizer {
    /// Build a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CommunityError::Summarizer`] if the HTTP client cannot be
    /// built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, CommunityError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CommunityError::Summarizer(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Request a prose summary for a community.
    ///
    /// # Errors
    ///
    /// Returns [`CommunityError::Summarizer`] on any transport or decode
    /// failure.
    pub async fn summarize(&self, record: &CommunityRecord) -> Result<String, CommunityError> {
        let request = SummarizeRequest {
            community_id: &record.id,
            level: record.level,
            keywords: &record.keywords,
            members: &record.members,
            statistical_summary: &record.statistical_summary,
        };
        let response: SummarizeResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| CommunityError::Summarizer(e.to_string()))?
            .error_for_status()
            .map_err(|e| CommunityError::Summarizer(e.to_string()))?
            .json()
            .await
            .map_err(|e| CommunityError::Summarizer(e.to_string()))?;
        Ok(response.summary)
    }
}

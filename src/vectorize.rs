//! Cloudflare Vectorize client.
//!
//! Defines the [`VectorIndex`] trait and [`VectorizeClient`], which talks to
//! the v2 index API:
//!
//! | Operation | Endpoint | Body |
//! |-----------|----------|------|
//! | upsert | `POST /vectorize/v2/indexes/{name}/upsert` | NDJSON, one record per line |
//! | query  | `POST /vectorize/v2/indexes/{name}/query`  | `{"vector", "topK", "returnMetadata"}` |
//!
//! An upsert is all-or-nothing from the caller's side: a non-success status
//! fails the whole batch and nothing is retried per record. Transport
//! failures are retried up to `index.max_retries` times; ids are stable, so
//! resending a batch overwrites rather than duplicates.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{Config, Credentials};
use crate::http;
use crate::models::IndexRecord;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

/// A similarity match as returned by the index, best first.
///
/// Every field is optional so one malformed match cannot fail the whole
/// response; incomplete matches are dropped when formatting.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Match {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

#[derive(Deserialize)]
struct QueryEnvelope {
    result: Option<QueryResult>,
}

#[derive(Deserialize)]
struct QueryResult {
    matches: Option<Vec<Match>>,
}

/// A remote vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite `batch`. Returns the number of records accepted.
    async fn upsert(&self, batch: &[IndexRecord]) -> Result<usize, IndexError>;

    /// Nearest neighbours of `vector`, with metadata, in the index's order.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<Match>, IndexError>;
}

/// Serialize records as newline-delimited JSON, in order, with a trailing newline.
pub fn to_ndjson(batch: &[IndexRecord]) -> String {
    let mut out = String::new();
    for record in batch {
        let line = serde_json::json!({
            "id": record.id,
            "values": record.values,
            "metadata": record.metadata,
        });
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

pub struct VectorizeClient {
    client: reqwest::Client,
    credentials: Credentials,
    index_name: String,
    max_retries: u32,
}

impl VectorizeClient {
    /// Build the client. Fails when credentials or the index name are missing.
    pub fn new(config: &Config) -> Result<Self> {
        let (credentials, index_name) = config.index_credentials()?;
        let client = http::build_client(config.index.timeout_secs)?;
        Ok(Self {
            client,
            credentials,
            index_name,
            max_retries: config.index.max_retries,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/accounts/{}/vectorize/v2/indexes/{}/{}",
            self.credentials.api_base, self.credentials.account_id, self.index_name, action
        )
    }

    async fn post(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, IndexError> {
        let request = request.bearer_auth(&self.credentials.token);
        let response = http::send_with_retry(request, self.max_retries, endpoint)
            .await
            .map_err(|e| IndexError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| IndexError::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let body = http::excerpt(&body);
            tracing::warn!(
                endpoint = %endpoint,
                status = status.as_u16(),
                body = %body,
                "vectorize request failed"
            );
            return Err(IndexError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl VectorIndex for VectorizeClient {
    async fn upsert(&self, batch: &[IndexRecord]) -> Result<usize, IndexError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let endpoint = self.endpoint("upsert");
        let payload = to_ndjson(batch);
        tracing::debug!(endpoint = %endpoint, records = batch.len(), bytes = payload.len(), "upserting batch");

        let request = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/x-ndjson")
            .body(payload);
        let body = self.post(&endpoint, request).await?;

        if let Ok(json) = serde_json::from_str::<Value>(&body) {
            if let Some(mutation) = json.pointer("/result/mutationId").and_then(Value::as_str) {
                tracing::debug!(mutation_id = mutation, "batch accepted");
            }
        }
        Ok(batch.len())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<Match>, IndexError> {
        let endpoint = self.endpoint("query");
        let request = self.client.post(&endpoint).json(&serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "returnMetadata": "all",
        }));
        let body = self.post(&endpoint, request).await?;

        parse_query_response(&body).map_err(|message| IndexError::InvalidResponse {
            endpoint,
            message,
        })
    }
}

fn parse_query_response(body: &str) -> Result<Vec<Match>, String> {
    let envelope: QueryEnvelope = serde_json::from_str(body).map_err(|e| e.to_string())?;
    envelope
        .result
        .and_then(|r| r.matches)
        .ok_or_else(|| "missing result.matches".to_string())
}

//! Embedding client for Cloudflare Workers AI.
//!
//! Defines the [`Embedder`] trait and its HTTP implementation,
//! [`WorkersAiEmbedder`], which calls `POST /accounts/{id}/ai/run/{model}`.
//!
//! # Response shapes
//!
//! Workers AI models do not agree on where the vector lives. Every response
//! is classified into an [`EmbeddingPayload`] before any value is read:
//!
//! | Shape | Path |
//! |-------|------|
//! | [`EmbeddingPayload::Flat`] | `embedding` |
//! | [`EmbeddingPayload::ResultResponse`] | `result.response[0]` or `embedding.response[0]` |
//! | [`EmbeddingPayload::ResultData`] | `result.data[0]` or `embedding.data[0]` |
//!
//! For the nested shapes, exactly one level of list nesting is unwrapped: a
//! list of vectors yields its first vector, a list of numbers is used as is.
//! Anything else is [`EmbedError::UnrecognizedResponseShape`].
//!
//! # Fallback and retry
//!
//! - Non-success status from the primary model → one attempt against the
//!   fallback model, never more.
//! - Network errors (connect, timeout) → retried against the same model up to
//!   `embedding.max_retries` times with exponential backoff.
//! - Every request carries an explicit timeout (`embedding.timeout_secs`).

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Config, Credentials, InputFormat, ModelConfig};
use crate::http;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("embedding endpoint {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unrecognized embedding response shape: {0}")]
    UnrecognizedResponseShape(String),

    #[error("embedding value at position {0} is not a number")]
    NonNumeric(usize),

    #[error("embedding value at position {0} is not finite")]
    NonFinite(usize),

    #[error("embedding vector is empty")]
    Empty,
}

/// Turns text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Recognized embedding response encodings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmbeddingPayload<'a> {
    /// `{"embedding": [..]}`
    Flat(&'a [Value]),
    /// `{"result": {"response": [[..], ..]}}` or `{"result": {"response": [..]}}`,
    /// also under an `embedding` mapping
    ResultResponse(&'a [Value]),
    /// `{"result": {"data": [[..], ..]}}` or `{"result": {"data": [..]}}`,
    /// also under an `embedding` mapping
    ResultData(&'a [Value]),
}

impl<'a> EmbeddingPayload<'a> {
    pub fn classify(json: &'a Value) -> Result<Self, EmbedError> {
        match json.get("embedding") {
            Some(Value::Array(flat)) => return Ok(EmbeddingPayload::Flat(flat)),
            Some(wrapper @ Value::Object(_)) => {
                if let Some(payload) = Self::nested(wrapper) {
                    return Ok(payload);
                }
            }
            _ => {}
        }

        if let Some(payload) = json
            .get("result")
            .filter(|r| r.is_object())
            .and_then(Self::nested)
        {
            return Ok(payload);
        }

        Err(EmbedError::UnrecognizedResponseShape(http::excerpt(
            &json.to_string(),
        )))
    }

    /// A `{"response": [..]}` or `{"data": [..]}` wrapper, `response` first.
    fn nested(wrapper: &'a Value) -> Option<Self> {
        if let Some(response) = wrapper.get("response").and_then(Value::as_array) {
            return Some(EmbeddingPayload::ResultResponse(response));
        }
        wrapper
            .get("data")
            .and_then(Value::as_array)
            .map(|data| EmbeddingPayload::ResultData(data))
    }

    /// Extract the numeric vector this payload carries.
    pub fn into_vector(self) -> Result<Vec<f32>, EmbedError> {
        match self {
            EmbeddingPayload::Flat(values) => coerce(values),
            EmbeddingPayload::ResultResponse(list) | EmbeddingPayload::ResultData(list) => {
                match list.first() {
                    None => Err(EmbedError::Empty),
                    Some(Value::Array(inner)) => coerce(inner),
                    Some(_) => coerce(list),
                }
            }
        }
    }
}

/// Classify a response body and extract its vector.
pub fn normalize_response(json: &Value) -> Result<Vec<f32>, EmbedError> {
    EmbeddingPayload::classify(json)?.into_vector()
}

fn coerce(values: &[Value]) -> Result<Vec<f32>, EmbedError> {
    if values.is_empty() {
        return Err(EmbedError::Empty);
    }
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let f = v.as_f64().ok_or(EmbedError::NonNumeric(i))? as f32;
            if f.is_finite() {
                Ok(f)
            } else {
                Err(EmbedError::NonFinite(i))
            }
        })
        .collect()
}

/// Request body for a model's input format.
pub fn request_body(input: InputFormat, text: &str) -> Value {
    match input {
        InputFormat::Text => serde_json::json!({ "text": text }),
        InputFormat::Contexts => serde_json::json!({ "contexts": [{ "text": text }] }),
    }
}

/// Workers AI embedding client with a primary and an optional fallback model.
pub struct WorkersAiEmbedder {
    client: reqwest::Client,
    credentials: Credentials,
    primary: ModelConfig,
    fallback: Option<ModelConfig>,
    max_retries: u32,
}

impl WorkersAiEmbedder {
    /// Build the client. Fails when credentials are missing, before any request.
    pub fn new(config: &Config) -> Result<Self> {
        let credentials = config.embedding_credentials()?;
        let client = http::build_client(config.embedding.timeout_secs)?;
        Ok(Self {
            client,
            credentials,
            primary: config.embedding.primary.clone(),
            fallback: config.embedding.fallback_model().cloned(),
            max_retries: config.embedding.max_retries,
        })
    }

    pub fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/accounts/{}/ai/run/{}",
            self.credentials.api_base, self.credentials.account_id, model
        )
    }

    async fn embed_with(&self, model: &ModelConfig, text: &str) -> Result<Vec<f32>, EmbedError> {
        let endpoint = self.endpoint(&model.model);
        let request = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.credentials.token)
            .json(&request_body(model.input, text));

        let transport = |e: reqwest::Error| EmbedError::Transport {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        };
        let response = http::send_with_retry(request, self.max_retries, &endpoint)
            .await
            .map_err(transport)?;

        let status = response.status();
        let raw = response.text().await.map_err(transport)?;

        if !status.is_success() {
            let body = http::excerpt(&raw);
            tracing::warn!(
                endpoint = %endpoint,
                status = status.as_u16(),
                body = %body,
                "embedding endpoint returned an error"
            );
            return Err(EmbedError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = serde_json::from_str(&raw).map_err(|_| {
            EmbedError::UnrecognizedResponseShape(format!(
                "response is not JSON: {}",
                http::excerpt(&raw)
            ))
        })?;
        normalize_response(&json).inspect_err(|e| {
            tracing::warn!(endpoint = %endpoint, error = %e, "could not read embedding response");
        })
    }
}

#[async_trait]
impl Embedder for WorkersAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let err = match self.embed_with(&self.primary, text).await {
            Ok(vector) => return Ok(vector),
            Err(e) => e,
        };

        match (&err, &self.fallback) {
            (EmbedError::Status { status, .. }, Some(fallback)) => {
                tracing::warn!(
                    primary = %self.primary.model,
                    fallback = %fallback.model,
                    status,
                    "primary embedding model failed, trying fallback"
                );
                self.embed_with(fallback, text).await
            }
            _ => Err(err),
        }
    }
}
